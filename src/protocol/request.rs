use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::{
    codec::{Mapping, Value},
    engine::Params,
};

use super::{NO_RESULTS, PARAMS, QUERY, STATS, TX, TX_ID, dispatcher::NoResultsMode, transaction::TxId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request must be a string or a map, found {0}")]
    Shape(&'static str),
    #[error("field '{field}' must be {expected}, found {found}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("unknown transaction directive '{0}'")]
    UnknownDirective(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxDirective {
    Begin,
    Commit,
    Rollback,
}

impl TxDirective {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxDirective::Begin => "begin",
            TxDirective::Commit => "commit",
            TxDirective::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TxDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxDirective {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "begin" => Ok(TxDirective::Begin),
            "commit" => Ok(TxDirective::Commit),
            "rollback" => Ok(TxDirective::Rollback),
            other => Err(RequestError::UnknownDirective(other.to_string())),
        }
    }
}

/// One decoded request. Null fields count as absent, except `no_results` whose mere
/// presence is recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub query: Option<String>,
    pub params: Params,
    pub stats: bool,
    pub tx: Option<TxDirective>,
    pub tx_id: Option<TxId>,
    pub no_results: Option<bool>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_stats(mut self, stats: bool) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_tx(mut self, tx: TxDirective) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn with_tx_id(mut self, tx_id: TxId) -> Self {
        self.tx_id = Some(tx_id);
        self
    }

    pub fn with_no_results(mut self, no_results: bool) -> Self {
        self.no_results = Some(no_results);
        self
    }

    /// Whether rows must be dropped instead of encoded.
    pub fn discards_results(&self, mode: NoResultsMode) -> bool {
        match mode {
            NoResultsMode::Presence => self.no_results.is_some(),
            NoResultsMode::Value => self.no_results == Some(true),
        }
    }
}

fn field<'a>(entries: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_null())
}

fn mismatch(field: &'static str, expected: &'static str, found: &Value) -> RequestError {
    RequestError::FieldType {
        field,
        expected,
        found: found.kind(),
    }
}

impl TryFrom<Value> for QueryRequest {
    type Error = RequestError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let entries = match value {
            Value::String(query) => return Ok(QueryRequest::query(query)),
            Value::Map(entries) => entries,
            other => return Err(RequestError::Shape(other.kind())),
        };

        let query = match field(&entries, QUERY) {
            Some(Value::String(q)) => Some(q.clone()),
            Some(other) => return Err(mismatch(QUERY, "a string", other)),
            None => None,
        };
        let params = match field(&entries, PARAMS) {
            Some(Value::Map(p)) => Mapping::from(p.clone()),
            Some(other) => return Err(mismatch(PARAMS, "a map", other)),
            None => Mapping::new(),
        };
        let stats = match field(&entries, STATS) {
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(mismatch(STATS, "a bool", other)),
            None => false,
        };
        let tx = match field(&entries, TX) {
            Some(Value::String(s)) => Some(s.parse::<TxDirective>()?),
            Some(other) => return Err(mismatch(TX, "a string", other)),
            None => None,
        };
        let tx_id = match field(&entries, TX_ID) {
            Some(Value::Int(id)) => Some(*id),
            Some(other) => return Err(mismatch(TX_ID, "an integer", other)),
            None => None,
        };
        let no_results = entries
            .iter()
            .find(|(k, _)| k == NO_RESULTS)
            .map(|(_, v)| matches!(v, Value::Bool(true)));

        Ok(QueryRequest {
            query,
            params,
            stats,
            tx,
            tx_id,
            no_results,
        })
    }
}

impl From<QueryRequest> for Value {
    fn from(request: QueryRequest) -> Self {
        let mut map = Mapping::new();
        if let Some(query) = request.query {
            map.insert(QUERY, query);
        }
        if !request.params.is_empty() {
            map.insert(PARAMS, request.params);
        }
        if request.stats {
            map.insert(STATS, true);
        }
        if let Some(tx) = request.tx {
            map.insert(TX, tx.as_str());
        }
        if let Some(tx_id) = request.tx_id {
            map.insert(TX_ID, tx_id);
        }
        if let Some(no_results) = request.no_results {
            map.insert(NO_RESULTS, no_results);
        }
        map.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn bare_string_is_a_query() {
        let request = QueryRequest::try_from(Value::from("start n return n")).unwrap();
        assert_eq!(request, QueryRequest::query("start n return n"));
        assert!(!request.stats);
        assert!(request.params.is_empty());
    }

    #[test]
    fn full_mapping() {
        let request = QueryRequest::try_from(map(vec![
            ("query", Value::from("create (n $props) return n")),
            ("params", map(vec![("props", map(vec![("name", Value::from("a"))]))])),
            ("stats", Value::Bool(true)),
            ("tx", Value::from("commit")),
            ("tx_id", Value::Int(12)),
        ]))
        .unwrap();

        assert_eq!(request.query.as_deref(), Some("create (n $props) return n"));
        assert!(request.params.contains_key("props"));
        assert!(request.stats);
        assert_eq!(request.tx, Some(TxDirective::Commit));
        assert_eq!(request.tx_id, Some(12));
        assert_eq!(request.no_results, None);
    }

    #[test]
    fn null_fields_are_absent() {
        let request =
            QueryRequest::try_from(map(vec![("query", Value::Null), ("tx", Value::from("begin"))]))
                .unwrap();
        assert_eq!(request.query, None);
        assert_eq!(request.tx, Some(TxDirective::Begin));
    }

    #[test]
    fn no_results_presence_and_value() {
        let absent = QueryRequest::query("q");
        let off = QueryRequest::query("q").with_no_results(false);
        let on = QueryRequest::query("q").with_no_results(true);

        assert!(!absent.discards_results(NoResultsMode::Presence));
        assert!(off.discards_results(NoResultsMode::Presence));
        assert!(on.discards_results(NoResultsMode::Presence));

        assert!(!absent.discards_results(NoResultsMode::Value));
        assert!(!off.discards_results(NoResultsMode::Value));
        assert!(on.discards_results(NoResultsMode::Value));
    }

    #[test]
    fn no_results_null_still_counts_as_present() {
        let request = QueryRequest::try_from(map(vec![("no_results", Value::Null)])).unwrap();
        assert_eq!(request.no_results, Some(false));
        assert!(request.discards_results(NoResultsMode::Presence));
    }

    #[test]
    fn builder_survives_the_wire_shape() {
        let request = QueryRequest::query("start n return n")
            .with_stats(true)
            .with_tx(TxDirective::Rollback)
            .with_tx_id(3)
            .with_no_results(true);
        let value: Value = request.clone().into();

        assert_eq!(QueryRequest::try_from(value).unwrap(), request);
    }

    #[test]
    #[should_panic(expected = "UnknownDirective(\"abort\")")]
    fn unknown_directive() {
        QueryRequest::try_from(map(vec![("tx", Value::from("abort"))])).unwrap();
    }

    #[test]
    #[should_panic(expected = "found: \"string\"")]
    fn wrong_field_type() {
        QueryRequest::try_from(map(vec![("stats", Value::from("yes"))])).unwrap();
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(
            QueryRequest::try_from(Value::Int(1)),
            Err(RequestError::Shape("integer"))
        );
    }
}
