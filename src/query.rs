//! Query descriptors and the prepared commands built from them.
//!
//! A [`Query`] is the passive description of one statement in a workload.
//! Right before execution it is turned into a [`Command`], which is the
//! only thing a [`CommandProcessor`] is allowed to touch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// How the statement text is sent to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Send the text verbatim.
    #[default]
    #[serde(alias = "Text")]
    Text,
    /// Treat the text as a procedure name and `CALL` it.
    #[serde(alias = "StoredProcedure")]
    StoredProcedure,
}

/// One statement of a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(alias = "Text", default)]
    text: String,

    /// `None` means "infer from the text", see [`Query::infer_reader`].
    #[serde(alias = "IsReader", default, skip_serializing_if = "Option::is_none")]
    is_reader: Option<bool>,

    #[serde(alias = "Type", default)]
    kind: CommandKind,

    /// Only meaningful for startup and cleanup statements, resolved at load time.
    #[serde(alias = "File", default, skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
}

impl Query {
    /// Create a plain-text query whose reader classification is inferred.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_reader: None,
            kind: CommandKind::Text,
            file: None,
        }
    }

    /// Create a stored procedure call.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::StoredProcedure,
            ..Self::new(name)
        }
    }

    /// Override the inferred reader classification.
    pub fn reader(mut self, is_reader: bool) -> Self {
        self.is_reader = Some(is_reader);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// The explicit classification, if one was configured.
    pub fn explicit_reader(&self) -> Option<bool> {
        self.is_reader
    }

    /// Whether the statement returns rows that should be counted.
    pub fn is_reader(&self) -> bool {
        self.is_reader
            .unwrap_or_else(|| Self::infer_reader(&self.text))
    }

    /// Reader inference rule: the text starts with `SELECT` or `EXECUTE `.
    ///
    /// The match is case-sensitive and looks at the raw text, so leading
    /// whitespace or `select` make the statement a non-reader. Use `EXECUTE `
    /// for procedures that return rows and `EXEC` for ones that only write.
    pub fn infer_reader(text: &str) -> bool {
        text.starts_with("SELECT") || text.starts_with("EXECUTE ")
    }

    /// Replace `file` with the contents it points to.
    pub(crate) fn resolve_file(&mut self, label: &str) -> crate::error::DriverResult<()> {
        let Some(path) = self.file.take() else {
            return Ok(());
        };
        if !self.text.trim().is_empty() {
            return Err(crate::error::DriverError::config(format!(
                "cannot set both text and file in {label} query"
            )));
        }
        self.text = std::fs::read_to_string(&path).map_err(|e| {
            crate::error::DriverError::config(format!(
                "cannot read {label} query from {}: {e}",
                path.display()
            ))
        })?;
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Dynamic value type for command bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Placeholder syntax used when rendering stored procedure calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1, $2, ...` (PostgreSQL)
    Dollar,
    /// `?, ?, ...` (MySQL, SQLite)
    Question,
}

/// A statement ready to be sent over a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    params: Vec<Value>,
}

impl Command {
    pub fn from_query(query: &Query) -> Self {
        Self {
            text: query.text.clone(),
            kind: query.kind,
            params: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Rewrite the statement text.
    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = text.into();
        self
    }

    /// Bind the next positional parameter.
    pub fn bind<T: Into<Value>>(&mut self, value: T) -> &mut Self {
        self.params.push(value.into());
        self
    }

    /// Render the SQL actually sent to the server.
    pub fn sql(&self, placeholder: Placeholder) -> String {
        match self.kind {
            CommandKind::Text => self.text.clone(),
            CommandKind::StoredProcedure if self.text.contains('(') => {
                format!("CALL {}", self.text)
            }
            CommandKind::StoredProcedure => {
                let args: Vec<String> = (1..=self.params.len())
                    .map(|i| match placeholder {
                        Placeholder::Dollar => format!("${i}"),
                        Placeholder::Question => "?".to_string(),
                    })
                    .collect();
                format!("CALL {}({})", self.text, args.join(", "))
            }
        }
    }
}

/// Hook that binds parameters onto a command right before it executes.
///
/// Implementations must be cheap; they run on the worker that is holding a
/// pooled connection.
pub trait CommandProcessor: Send + Sync {
    fn process(&self, query: &Query, command: &mut Command);
}

impl<F> CommandProcessor for F
where
    F: Fn(&Query, &mut Command) + Send + Sync,
{
    fn process(&self, query: &Query, command: &mut Command) {
        self(query, command)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_infer_reader_prefixes() {
        assert!(Query::infer_reader("SELECT 1"));
        assert!(Query::infer_reader("SELECT*FROM t"));
        assert!(Query::infer_reader("EXECUTE dbo.report"));
        assert!(!Query::infer_reader("EXECUTEdbo.report"));
        assert!(!Query::infer_reader("EXEC dbo.load"));
        assert!(!Query::infer_reader("select 1"));
        assert!(!Query::infer_reader(" SELECT 1"));
        assert!(!Query::infer_reader("BULK INSERT t FROM 'a.csv'"));
    }

    #[test]
    fn test_prefixes_outside_the_rule_are_not_readers() {
        assert!(!Query::infer_reader("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!Query::infer_reader("MERGE INTO t USING s ON 1=1"));
    }

    #[test]
    fn test_explicit_classification_wins() {
        assert!(!Query::new("SELECT 1").reader(false).is_reader());
        assert!(Query::new("WITH x AS (SELECT 1) SELECT * FROM x").reader(true).is_reader());
        assert_eq!(Query::new("SELECT 1").explicit_reader(), None);
    }

    #[test]
    fn test_command_sql_for_text() {
        let mut cmd = Command::from_query(&Query::new("SELECT $1"));
        cmd.bind(7);
        assert_eq!(cmd.sql(Placeholder::Dollar), "SELECT $1");
        assert_eq!(cmd.params(), &[Value::Int(7)]);
    }

    #[test]
    fn test_command_sql_for_procedure() {
        let mut cmd = Command::from_query(&Query::procedure("refresh_stats"));
        assert_eq!(cmd.sql(Placeholder::Question), "CALL refresh_stats()");

        cmd.bind("orders").bind(Option::<i64>::None);
        assert_eq!(cmd.sql(Placeholder::Dollar), "CALL refresh_stats($1, $2)");
        assert_eq!(cmd.sql(Placeholder::Question), "CALL refresh_stats(?, ?)");
        assert_eq!(cmd.params()[1], Value::Null);

        let explicit = Command::from_query(&Query::procedure("refresh_stats('orders')"));
        assert_eq!(explicit.sql(Placeholder::Dollar), "CALL refresh_stats('orders')");
    }

    #[test]
    fn test_closure_processor() {
        let processor = |query: &Query, cmd: &mut Command| {
            cmd.bind(query.text().len() as i64);
        };
        let query = Query::new("SELECT $1");
        let mut cmd = Command::from_query(&query);
        CommandProcessor::process(&processor, &query, &mut cmd);
        assert_eq!(cmd.params(), &[Value::Int(9)]);
    }

    #[test]
    fn test_query_serializes_without_unset_fields() {
        let json = serde_json::to_string(&Query::new("SELECT 1")).unwrap();
        assert_eq!(json, r#"{"text":"SELECT 1","kind":"text"}"#);

        let parsed: Query =
            serde_json::from_str(r#"{"Text":"EXEC p","IsReader":true,"Type":"StoredProcedure"}"#)
                .unwrap();
        assert_eq!(parsed.kind(), CommandKind::StoredProcedure);
        assert!(parsed.is_reader());
    }
}
