//! Streaming encoder turning one query result into an ordered series of reply frames.
//!
//! A reply is laid out as:
//!
//! 1. a header frame listing the column names,
//! 2. one frame per row, values in column order,
//! 3. an optional info frame with timing, counters, update statistics and errors.
//!
//! Frames are produced on demand. The encoder holds at most one row of lookahead, which is
//! what lets it tell whether the frame it just produced is the last one without buffering
//! the result.
//!
//! Any failure while walking the result is captured instead of propagated. Row emission
//! stops and the info frame, carrying the error, becomes the next frame.
use std::{error::Error, iter::Peekable, time::Instant};

use log::debug;

use crate::{
    codec::{self, CodecError, Mapping, Value},
    engine::{QueryResult, Row, RowSource},
};

use super::{convert::convert, error_chain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Rows,
    Info,
    Done,
}

struct Failure {
    message: String,
    trace: String,
}

pub struct ResultEncoder {
    state: State,
    result: Option<Box<dyn QueryResult>>,
    columns: Vec<String>,
    rows: Option<Peekable<RowSource>>,
    stats: bool,
    context: Mapping,
    failure: Option<Failure>,
    started: Instant,
    rows_emitted: u64,
    bytes: u64,
}

impl ResultEncoder {
    /// Prepares the encoder. `result` is `None` when no query ran or its results are
    /// discarded; `context` is merged into the info frame.
    pub fn new(result: Option<Box<dyn QueryResult>>, stats: bool, context: Mapping) -> Self {
        let mut encoder = Self {
            state: State::Header,
            result: None,
            columns: Vec::new(),
            rows: None,
            stats,
            context,
            failure: None,
            started: Instant::now(),
            rows_emitted: 0,
            bytes: 0,
        };

        match result {
            Some(mut result) => {
                match result.columns() {
                    Ok(columns) => {
                        encoder.columns = columns;
                        match result.iterate() {
                            Ok(rows) => encoder.rows = Some(rows.peekable()),
                            Err(e) => encoder.fail(&e),
                        }
                    }
                    Err(e) => {
                        encoder.fail(&e);
                        encoder.state = State::Info;
                    }
                }
                encoder.result = Some(result);
            }
            None => encoder.finish_rows(),
        }
        encoder
    }

    /// Whether another frame will be produced. May pull one row ahead from the source.
    pub fn has_more(&mut self) -> bool {
        match self.state {
            State::Header | State::Info => true,
            State::Done => false,
            State::Rows => {
                if self.failure.is_some() {
                    self.state = State::Info;
                    return true;
                }
                let pending = self.rows.as_mut().is_some_and(|rows| rows.peek().is_some());
                if !pending {
                    self.finish_rows();
                }
                self.state != State::Done
            }
        }
    }

    /// Produces the next frame, or `None` once the reply is complete.
    ///
    /// Codec failures on the header or info frame are returned; everything that goes wrong
    /// on a row is reported inside the info frame instead.
    pub fn produce_next(&mut self) -> Option<Result<Vec<u8>, CodecError>> {
        match self.state {
            State::Header => {
                self.state = State::Rows;
                let header = Value::List(self.columns.iter().cloned().map(Value::from).collect());
                Some(self.pack(&header))
            }
            State::Rows => self.next_row(),
            State::Info => self.produce_info(),
            State::Done => None,
        }
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn next_row(&mut self) -> Option<Result<Vec<u8>, CodecError>> {
        if self.failure.is_some() {
            return self.produce_info();
        }
        match self.rows.as_mut().and_then(Iterator::next) {
            None => {
                self.finish_rows();
                self.produce_next()
            }
            Some(Err(e)) => {
                self.fail(&e);
                self.produce_info()
            }
            Some(Ok(row)) => {
                let frame = self
                    .row_value(&row)
                    .and_then(|value| self.pack(&value).map_err(Box::from));
                match frame {
                    Ok(frame) => {
                        self.rows_emitted += 1;
                        Some(Ok(frame))
                    }
                    Err(e) => {
                        self.fail(&*e);
                        self.produce_info()
                    }
                }
            }
        }
    }

    fn row_value(&self, row: &Row) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = match row.get(column) {
                Some(value) => convert(value)?.into(),
                None => Value::Null,
            };
            values.push(value);
        }
        Ok(Value::List(values))
    }

    fn produce_info(&mut self) -> Option<Result<Vec<u8>, CodecError>> {
        self.state = State::Done;
        self.rows = None;
        let info = self.info();
        Some(codec::encode(&info))
    }

    fn info(&mut self) -> Value {
        let mut info = Mapping::new();
        info.insert("time", self.started.elapsed().as_millis() as u64);
        info.insert("rows", self.rows_emitted);
        info.insert("bytes", self.bytes);
        info.extend(std::mem::take(&mut self.context));

        if let Some(stats) = self.result.as_ref().map(|r| r.statistics()) {
            if stats.contains_updates() {
                info.insert("updates", true);
                for (key, count) in [
                    ("nodes_created", stats.nodes_created),
                    ("nodes_deleted", stats.nodes_deleted),
                    ("rels_created", stats.relationships_created),
                    ("rels_deleted", stats.relationships_deleted),
                    ("props_set", stats.properties_set),
                ] {
                    if count > 0 {
                        info.insert(key, count);
                    }
                }
            }
        }

        if let Some(failure) = self.failure.take() {
            info.insert("error", failure.message);
            info.insert("exception", failure.trace);
        }
        info.into()
    }

    fn info_required(&self) -> bool {
        self.stats
            || self.failure.is_some()
            || self
                .result
                .as_ref()
                .is_some_and(|r| r.statistics().contains_updates())
    }

    fn finish_rows(&mut self) {
        self.rows = None;
        self.state = if self.info_required() {
            State::Info
        } else {
            State::Done
        };
    }

    fn fail(&mut self, error: &(dyn Error + 'static)) {
        debug!("result encoding stopped: {error}");
        self.failure = Some(Failure {
            message: error.to_string(),
            trace: error_chain(error),
        });
    }

    fn pack(&mut self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let frame = codec::encode(value)?;
        self.bytes += frame.len() as u64;
        Ok(frame)
    }
}

impl Iterator for ResultEncoder {
    type Item = Result<Vec<u8>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.produce_next()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        engine::{EngineError, QueryStatistics},
        graph::{GraphValue, Path, Scalar},
    };

    struct StubResult {
        columns: Result<Vec<String>, ()>,
        rows: Option<Vec<Result<Row, EngineError>>>,
        stats: QueryStatistics,
    }

    impl StubResult {
        fn new(columns: &[&str], rows: Vec<Result<Row, EngineError>>) -> Self {
            Self {
                columns: Ok(columns.iter().map(|c| c.to_string()).collect()),
                rows: Some(rows),
                stats: QueryStatistics::default(),
            }
        }

        fn boxed(self) -> Option<Box<dyn QueryResult>> {
            Some(Box::new(self))
        }
    }

    impl QueryResult for StubResult {
        fn columns(&self) -> Result<Vec<String>, EngineError> {
            self.columns
                .clone()
                .map_err(|_| EngineError::Failed("no columns".into()))
        }

        fn iterate(&mut self) -> Result<RowSource, EngineError> {
            let rows = self.rows.take().ok_or(EngineError::Consumed)?;
            Ok(Box::new(rows.into_iter()))
        }

        fn statistics(&self) -> QueryStatistics {
            self.stats
        }
    }

    fn row(entries: &[(&str, i64)]) -> Result<Row, EngineError> {
        Ok(entries
            .iter()
            .map(|(k, v)| (k.to_string(), GraphValue::Scalar(Scalar::Int(*v))))
            .collect::<HashMap<_, _>>())
    }

    fn drain(encoder: ResultEncoder) -> Vec<Value> {
        encoder
            .map(|frame| codec::decode(&frame.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn header_then_rows_without_info() {
        let result = StubResult::new(&["a", "b"], vec![row(&[("a", 1), ("b", 2)]), row(&[("a", 3)])]);
        let frames = drain(ResultEncoder::new(result.boxed(), false, Mapping::new()));

        assert_eq!(
            frames,
            vec![
                Value::List(vec![Value::from("a"), Value::from("b")]),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
                Value::List(vec![Value::Int(3), Value::Null]),
            ]
        );
    }

    #[test]
    fn has_more_tracks_the_last_frame() {
        let result = StubResult::new(&["a"], vec![row(&[("a", 1)])]);
        let mut encoder = ResultEncoder::new(result.boxed(), false, Mapping::new());

        assert!(encoder.has_more());
        encoder.produce_next().unwrap().unwrap();
        assert!(encoder.has_more());
        encoder.produce_next().unwrap().unwrap();
        assert!(!encoder.has_more());
        assert!(encoder.produce_next().is_none());
    }

    #[test]
    fn stats_adds_info_frame() {
        let result = StubResult::new(&["a"], vec![row(&[("a", 1)]), row(&[("a", 2)])]);
        let mut encoder = ResultEncoder::new(result.boxed(), true, Mapping::new());
        let mut frames = Vec::new();
        while encoder.has_more() {
            frames.push(encoder.produce_next().unwrap().unwrap());
        }
        let data_bytes: usize = frames[..3].iter().map(Vec::len).sum();
        let info = codec::decode(&frames[3]).unwrap();

        assert_eq!(frames.len(), 4);
        assert_eq!(info.get("rows"), Some(&Value::Int(2)));
        assert_eq!(info.get("bytes"), Some(&Value::Int(data_bytes as i64)));
        assert!(info.get("time").and_then(Value::as_i64).is_some());
        assert!(info.get("updates").is_none());
        assert!(info.get("error").is_none());
    }

    #[test]
    fn updates_force_info_with_positive_counters_only() {
        let mut result = StubResult::new(&[], vec![]);
        result.stats = QueryStatistics {
            nodes_created: 2,
            properties_set: 3,
            ..Default::default()
        };
        let frames = drain(ResultEncoder::new(result.boxed(), false, Mapping::new()));
        let info = &frames[1];

        assert_eq!(frames.len(), 2);
        assert_eq!(info.get("updates"), Some(&Value::Bool(true)));
        assert_eq!(info.get("nodes_created"), Some(&Value::Int(2)));
        assert_eq!(info.get("props_set"), Some(&Value::Int(3)));
        assert!(info.get("nodes_deleted").is_none());
        assert!(info.get("rels_created").is_none());
    }

    #[test]
    fn row_failure_stops_rows_and_reports() {
        let result = StubResult::new(
            &["a"],
            vec![
                row(&[("a", 1)]),
                Err(EngineError::NodeNotFound(9)),
                row(&[("a", 2)]),
            ],
        );
        let frames = drain(ResultEncoder::new(result.boxed(), false, Mapping::new()));
        let info = &frames[2];

        assert_eq!(frames.len(), 3);
        assert_eq!(info.get("rows"), Some(&Value::Int(1)));
        assert_eq!(info.get("error"), Some(&Value::from("node 9 not found")));
        assert!(info.get("exception").and_then(Value::as_str).is_some());
    }

    #[test]
    fn unconvertible_value_stops_rows_and_forces_info() {
        let broken = HashMap::from([(
            "a".to_string(),
            GraphValue::Path(Path::new(vec![], vec![])),
        )]);
        let result = StubResult::new(&["a"], vec![row(&[("a", 1)]), Ok(broken), row(&[("a", 2)])]);
        let frames = drain(ResultEncoder::new(result.boxed(), false, Mapping::new()));

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Value::List(vec![Value::from("a")]));
        assert_eq!(frames[1], Value::List(vec![Value::Int(1)]));
        assert_eq!(frames[2].get("rows"), Some(&Value::Int(1)));
        assert_eq!(
            frames[2].get("error"),
            Some(&Value::from("malformed path: 0 nodes for 0 relationships"))
        );
        assert!(
            frames[2]
                .get("exception")
                .and_then(Value::as_str)
                .is_some_and(|trace| trace.starts_with("MalformedPath"))
        );
    }

    #[test]
    fn column_failure_skips_header() {
        let mut result = StubResult::new(&[], vec![]);
        result.columns = Err(());
        let frames = drain(ResultEncoder::new(result.boxed(), false, Mapping::new()));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get("error"), Some(&Value::from("query failed: no columns")));
    }

    #[test]
    fn consumed_source_still_sends_header() {
        let mut result = StubResult::new(&["a"], vec![]);
        result.rows = None;
        let frames = drain(ResultEncoder::new(result.boxed(), false, Mapping::new()));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Value::List(vec![Value::from("a")]));
        assert_eq!(
            frames[1].get("error"),
            Some(&Value::from("row source already consumed"))
        );
    }

    #[test]
    fn no_result_and_no_stats_is_empty() {
        let mut encoder = ResultEncoder::new(None, false, Mapping::new());
        assert!(!encoder.has_more());
        assert!(encoder.produce_next().is_none());
    }

    #[test]
    fn context_overrides_counters() {
        let mut context = Mapping::new();
        context.insert("tx_id", 4i64);
        context.insert("rows", "overridden");
        let frames = drain(ResultEncoder::new(None, true, context));

        assert_eq!(
            frames,
            vec![Value::Map(vec![
                ("time".into(), frames[0].get("time").cloned().unwrap()),
                ("rows".into(), Value::from("overridden")),
                ("bytes".into(), Value::Int(0)),
                ("tx_id".into(), Value::Int(4)),
            ])]
        );
    }
}
