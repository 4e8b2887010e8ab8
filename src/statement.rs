//! Statements understood by the in-memory engine.
//!
//! This is a deliberately small pattern language, enough to create and read back nodes,
//! relationships and one-hop paths:
//!
//! ```text
//! create (a $props)-[r:KNOWS $props]->(b) return a, r, b
//! match p=(a)-[r:KNOWS]->(b) return p, b.name
//! start n=node(0) return n
//! start n return n.name
//! match (n) set n.name = $name
//! match (n) delete n
//! ```
//!
//! Keywords are case-insensitive. Parameters are referenced as `$name` and resolved at
//! execution time.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatementError {
    #[error("empty statement")]
    EmptyStatement,

    #[error("statement not supported: {0}")]
    Unsupported(String),

    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },

    #[error("relationship type required when creating a relationship")]
    MissingType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Param(String),
    Int(u64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dash,
    Arrow,
    Colon,
    Eq,
    Comma,
    Dot,
    Star,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Param(s) => write!(f, "'${s}'"),
            Token::Int(i) => write!(f, "'{i}'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Dash => write!(f, "'-'"),
            Token::Arrow => write!(f, "'->'"),
            Token::Colon => write!(f, "':'"),
            Token::Eq => write!(f, "'='"),
            Token::Comma => write!(f, "','"),
            Token::Dot => write!(f, "'.'"),
            Token::Star => write!(f, "'*'"),
        }
    }
}

fn tokenize(s: &str) -> Result<Vec<Token>, StatementError> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&c) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ':' => Token::Colon,
            '=' => Token::Eq,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '*' => Token::Star,
            '-' => {
                chars.next();
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::Arrow);
                } else {
                    tokens.push(Token::Dash);
                }
                continue;
            }
            '$' => {
                chars.next();
                tokens.push(Token::Param(take_word(&mut chars)));
                continue;
            }
            c if c.is_ascii_digit() => {
                let digits = take_word(&mut chars);
                let value = digits
                    .parse::<u64>()
                    .map_err(|_| StatementError::Unexpected {
                        expected: "a non-negative integer".into(),
                        found: format!("'{digits}'"),
                    })?;
                tokens.push(Token::Int(value));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                tokens.push(Token::Ident(take_word(&mut chars)));
                continue;
            }
            c => return Err(StatementError::UnexpectedCharacter(c)),
        };
        chars.next();
        tokens.push(token);
    }

    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePattern {
    pub var: String,
    pub props: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelPattern {
    pub var: Option<String>,
    pub rel_type: Option<String>,
    pub props: Option<String>,
}

/// A single node, or a one-hop outgoing pattern, optionally bound to a path variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub path: Option<String>,
    pub start: NodePattern,
    pub hop: Option<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelector {
    All,
    Id(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Var(String),
    Property { var: String, key: String },
}

impl Projection {
    pub fn var(&self) -> &str {
        match self {
            Projection::Var(var) | Projection::Property { var, .. } => var,
        }
    }

    /// Column name, which is the projection as written.
    pub fn column(&self) -> String {
        match self {
            Projection::Var(var) => var.clone(),
            Projection::Property { var, key } => format!("{var}.{key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Return(Vec<Projection>),
    Delete(Vec<String>),
    Set {
        var: String,
        key: String,
        param: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Create {
        pattern: Pattern,
        returns: Vec<Projection>,
    },
    Match {
        pattern: Pattern,
        selector: NodeSelector,
        action: Action,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn found(&self) -> String {
        self.peek()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "end of statement".into())
    }

    fn unexpected(&self, expected: &str) -> StatementError {
        StatementError::Unexpected {
            expected: expected.into(),
            found: self.found(),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), StatementError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn ident(&mut self) -> Result<String, StatementError> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn param(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Param(p)) => {
                let p = p.clone();
                self.pos += 1;
                Some(p)
            }
            _ => None,
        }
    }

    fn node(&mut self) -> Result<NodePattern, StatementError> {
        self.expect(Token::LParen)?;
        let var = self.ident()?;
        let props = self.param();
        self.expect(Token::RParen)?;
        Ok(NodePattern { var, props })
    }

    fn relationship(&mut self) -> Result<RelPattern, StatementError> {
        self.expect(Token::Dash)?;
        self.expect(Token::LBracket)?;
        let var = match self.peek() {
            Some(Token::Ident(_)) => Some(self.ident()?),
            _ => None,
        };
        let rel_type = if self.eat(&Token::Colon) {
            Some(self.ident()?)
        } else {
            None
        };
        let props = self.param();
        self.expect(Token::RBracket)?;
        self.expect(Token::Arrow)?;
        Ok(RelPattern {
            var,
            rel_type,
            props,
        })
    }

    fn pattern(&mut self) -> Result<Pattern, StatementError> {
        let path = match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(Token::Ident(_)), Some(Token::Eq)) => {
                let path = self.ident()?;
                self.expect(Token::Eq)?;
                Some(path)
            }
            _ => None,
        };
        let start = self.node()?;
        let hop = if self.peek() == Some(&Token::Dash) {
            let rel = self.relationship()?;
            Some((rel, self.node()?))
        } else {
            None
        };
        Ok(Pattern { path, start, hop })
    }

    fn projections(&mut self) -> Result<Vec<Projection>, StatementError> {
        let mut items = Vec::new();
        loop {
            let var = self.ident()?;
            if self.eat(&Token::Dot) {
                let key = self.ident()?;
                items.push(Projection::Property { var, key });
            } else {
                items.push(Projection::Var(var));
            }
            if !self.eat(&Token::Comma) {
                return Ok(items);
            }
        }
    }

    fn action(&mut self) -> Result<Action, StatementError> {
        if self.keyword("return") {
            return Ok(Action::Return(self.projections()?));
        }
        if self.keyword("delete") {
            let mut vars = vec![self.ident()?];
            while self.eat(&Token::Comma) {
                vars.push(self.ident()?);
            }
            return Ok(Action::Delete(vars));
        }
        if self.keyword("set") {
            let var = self.ident()?;
            self.expect(Token::Dot)?;
            let key = self.ident()?;
            self.expect(Token::Eq)?;
            let param = self
                .param()
                .ok_or_else(|| self.unexpected("a parameter"))?;
            return Ok(Action::Set { var, key, param });
        }
        Err(self.unexpected("'return', 'delete' or 'set'"))
    }

    fn selector(&mut self) -> Result<NodeSelector, StatementError> {
        if !self.eat(&Token::Eq) {
            return Ok(NodeSelector::All);
        }
        if !self.keyword("node") {
            return Err(self.unexpected("'node'"));
        }
        self.expect(Token::LParen)?;
        let selector = match self.next() {
            Some(Token::Star) => NodeSelector::All,
            Some(Token::Int(id)) => NodeSelector::Id(id),
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("a node id or '*'"));
            }
        };
        self.expect(Token::RParen)?;
        Ok(selector)
    }

    fn statement(&mut self, source: &str) -> Result<Statement, StatementError> {
        let statement = if self.keyword("create") {
            let pattern = self.pattern()?;
            if let Some((rel, _)) = &pattern.hop {
                if rel.rel_type.is_none() {
                    return Err(StatementError::MissingType);
                }
            }
            let returns = if self.keyword("return") {
                self.projections()?
            } else {
                Vec::new()
            };
            Statement::Create { pattern, returns }
        } else if self.keyword("start") {
            let var = self.ident()?;
            let selector = self.selector()?;
            let pattern = if self.keyword("match") {
                let pattern = self.pattern()?;
                if pattern.start.var != var {
                    return Err(StatementError::Unexpected {
                        expected: format!("pattern starting at '{var}'"),
                        found: format!("'{}'", pattern.start.var),
                    });
                }
                pattern
            } else {
                Pattern {
                    path: None,
                    start: NodePattern { var, props: None },
                    hop: None,
                }
            };
            let action = self.action()?;
            Statement::Match {
                pattern,
                selector,
                action,
            }
        } else if self.keyword("match") {
            let pattern = self.pattern()?;
            let action = self.action()?;
            Statement::Match {
                pattern,
                selector: NodeSelector::All,
                action,
            }
        } else {
            return Err(StatementError::Unsupported(source.to_string()));
        };

        if self.peek().is_some() {
            return Err(self.unexpected("end of statement"));
        }
        Ok(statement)
    }
}

impl TryFrom<&str> for Statement {
    type Error = StatementError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let source = value.trim();
        if source.is_empty() {
            return Err(StatementError::EmptyStatement);
        }
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        parser.statement(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(var: &str) -> NodePattern {
        NodePattern {
            var: var.into(),
            props: None,
        }
    }

    #[test]
    #[should_panic(expected = "Unsupported")]
    fn unsupported_statement() {
        let _: Statement = "get from somewhere".try_into().unwrap();
    }

    #[test]
    #[should_panic(expected = "EmptyStatement")]
    fn empty_statement() {
        let _: Statement = "   ".try_into().unwrap();
    }

    #[test]
    fn create_node_case_insensitive() {
        let statement: Statement = "CREATE (n) RETURN n".try_into().unwrap();

        assert_eq!(
            statement,
            Statement::Create {
                pattern: Pattern {
                    path: None,
                    start: node("n"),
                    hop: None
                },
                returns: vec![Projection::Var("n".into())],
            }
        );
    }

    #[test]
    fn create_relationship_with_params() {
        let statement: Statement = "create (a $a)-[r:KNOWS $since]->(b)".try_into().unwrap();

        let Statement::Create { pattern, returns } = statement else {
            panic!("expected create");
        };
        assert!(returns.is_empty());
        assert_eq!(pattern.start.props.as_deref(), Some("a"));
        let (rel, end) = pattern.hop.unwrap();
        assert_eq!(rel.var.as_deref(), Some("r"));
        assert_eq!(rel.rel_type.as_deref(), Some("KNOWS"));
        assert_eq!(rel.props.as_deref(), Some("since"));
        assert_eq!(end, node("b"));
    }

    #[test]
    fn create_relationship_requires_type() {
        let res: Result<Statement, _> = "create (a)-[r]->(b)".try_into();
        assert!(matches!(res, Err(StatementError::MissingType)));
    }

    #[test]
    fn start_without_selector_matches_all() {
        let statement: Statement = "start n return n.name".try_into().unwrap();

        assert_eq!(
            statement,
            Statement::Match {
                pattern: Pattern {
                    path: None,
                    start: node("n"),
                    hop: None
                },
                selector: NodeSelector::All,
                action: Action::Return(vec![Projection::Property {
                    var: "n".into(),
                    key: "name".into()
                }]),
            }
        );
    }

    #[test]
    fn start_with_id_and_path() {
        let statement: Statement = "start n=node(0) match p=(n)-[r:KNOWS]->(m) return p, m"
            .try_into()
            .unwrap();

        let Statement::Match {
            pattern, selector, ..
        } = statement
        else {
            panic!("expected match");
        };
        assert_eq!(selector, NodeSelector::Id(0));
        assert_eq!(pattern.path.as_deref(), Some("p"));
        assert_eq!(pattern.start.var, "n");
        let (rel, end) = pattern.hop.unwrap();
        assert_eq!(rel.var.as_deref(), Some("r"));
        assert_eq!(end.var, "m");
    }

    #[test]
    fn start_match_must_begin_at_started_node() {
        let res: Result<Statement, _> = "start n=node(0) match (m)-[r]->(n) return r".try_into();
        assert!(matches!(res, Err(StatementError::Unexpected { .. })));
    }

    #[test]
    fn set_and_delete_actions() {
        let set: Statement = "match (n) set n.name = $name".try_into().unwrap();
        let delete: Statement = "start n=node(*) delete n".try_into().unwrap();

        assert!(matches!(
            delete,
            Statement::Match {
                selector: NodeSelector::All,
                action: Action::Delete(_),
                ..
            }
        ));
        assert_eq!(
            set,
            Statement::Match {
                pattern: Pattern {
                    path: None,
                    start: node("n"),
                    hop: None
                },
                selector: NodeSelector::All,
                action: Action::Set {
                    var: "n".into(),
                    key: "name".into(),
                    param: "name".into()
                },
            }
        );
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let res: Result<Statement, _> = "match (n) return n n".try_into();
        assert_eq!(
            res.unwrap_err().to_string(),
            "expected end of statement, found 'n'"
        );
    }

    #[test]
    fn unexpected_character() {
        let res: Result<Statement, _> = "match (n) return n;".try_into();
        assert!(matches!(res, Err(StatementError::UnexpectedCharacter(';'))));
    }

    #[test]
    fn projection_column_names() {
        assert_eq!(Projection::Var("n".into()).column(), "n");
        assert_eq!(
            Projection::Property {
                var: "n".into(),
                key: "name".into()
            }
            .column(),
            "n.name"
        );
    }
}
