//! Built-in tools.

use async_trait::async_trait;
use rusqlite::{types::ValueRef, Connection, OpenFlags};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use orchestra_core::{traits::Tool, types::ToolOutput, Error, Result};

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T> {
    serde_json::from_value(args.clone()).map_err(|e| Error::validation(format!("invalid arguments: {}", e)))
}

// =============================================================================
// Calculator Tool
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// Arithmetic expression using digits, + - * / ( ) . and spaces.
    pub expression: String,
}

const MAX_NESTING: usize = 64;

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.' | ' ')
}

/// Recursive-descent evaluator over the whitelisted grammar.
struct Expr<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Expr<'a> {
    fn eval(src: &'a str) -> std::result::Result<f64, String> {
        let mut p = Expr {
            src: src.as_bytes(),
            pos: 0,
            depth: 0,
        };
        let value = p.sum()?;
        p.skip_ws();
        if p.pos != p.src.len() {
            return Err(format!("unexpected '{}' at {}", p.src[p.pos] as char, p.pos));
        }
        Ok(value)
    }

    fn skip_ws(&mut self) {
        while self.src.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn sum(&mut self) -> std::result::Result<f64, String> {
        let mut acc = self.product()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.product()?;
            acc = if op == b'+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn product(&mut self) -> std::result::Result<f64, String> {
        let mut acc = self.unary()?;
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == b'/' {
                if rhs == 0.0 {
                    return Err("division by zero".into());
                }
                acc /= rhs;
            } else {
                acc *= rhs;
            }
        }
        Ok(acc)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err("expression nested too deeply".into());
        }
        let value = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                self.unary().map(|v| -v)
            }
            Some(b'+') => {
                self.pos += 1;
                self.unary()
            }
            Some(b'(') => {
                self.pos += 1;
                let inner = self.sum()?;
                if self.peek() != Some(b')') {
                    return Err("missing ')'".into());
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(format!("unexpected '{}'", c as char)),
            None => Err("unexpected end of expression".into()),
        };
        self.depth -= 1;
        value
    }

    fn number(&mut self) -> std::result::Result<f64, String> {
        let start = self.pos;
        while matches!(self.src.get(self.pos), Some(c) if c.is_ascii_digit() || *c == b'.') {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).map_err(|e| e.to_string())?;
        text.parse::<f64>().map_err(|_| format!("invalid number '{}'", text))
    }
}

/// Evaluates arithmetic expressions. Anything outside `[0-9+\-*/(). ]` is
/// refused before parsing.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression, e.g. (12.5 + 7) * 3"
    }

    fn parameters(&self) -> Value {
        schema_of::<CalculatorArgs>()
    }

    fn validate_params(&self, args: &Value) -> Result<()> {
        let parsed: CalculatorArgs = parse_args(args)?;
        if let Some(bad) = parsed.expression.chars().find(|c| !is_allowed_char(*c)) {
            return Err(Error::validation(format!(
                "calculator rejects character '{}'",
                bad
            )));
        }
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        self.validate_params(&args)?;
        let parsed: CalculatorArgs = parse_args(&args)?;
        match Expr::eval(&parsed.expression) {
            Ok(result) => Ok(ToolOutput::text(format!("{} = {}", parsed.expression.trim(), result))),
            Err(e) => Ok(ToolOutput::error(format!("Could not evaluate: {}", e))),
        }
    }
}

// =============================================================================
// Read-only SQL Tool
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SqlQueryArgs {
    /// A single read-only SELECT statement.
    pub query: String,
}

pub const MAX_SQL_ROWS: usize = 200;

const FORBIDDEN_SQL: &[&str] = &[
    "drop", "delete", "insert", "update", "alter", "create", "truncate", "grant", "revoke",
];

/// Reject anything that is not a read-only query.
pub fn check_read_only_sql(query: &str) -> Result<()> {
    let forbidden = query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find(|word| FORBIDDEN_SQL.iter().any(|k| word.eq_ignore_ascii_case(k)));
    if let Some(word) = forbidden {
        return Err(Error::validation(format!(
            "SQL keyword '{}' is not allowed",
            word.to_uppercase()
        )));
    }
    let head = query.trim_start().to_ascii_lowercase();
    if !(head.starts_with("select") || head.starts_with("with")) {
        return Err(Error::validation("only SELECT queries are allowed"));
    }
    Ok(())
}

fn sql_value(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(format!("<{} bytes>", b.len())),
    }
}

/// Runs guarded SELECT statements against a tenant dataset opened read-only.
pub struct SqlQueryTool {
    conn: Arc<Mutex<Connection>>,
}

impl SqlQueryTool {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| Error::storage(format!("open dataset {}: {}", path, e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL SELECT against the tenant dataset and return rows as JSON"
    }

    fn parameters(&self) -> Value {
        schema_of::<SqlQueryArgs>()
    }

    fn validate_params(&self, args: &Value) -> Result<()> {
        let parsed: SqlQueryArgs = parse_args(args)?;
        check_read_only_sql(&parsed.query)
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        self.validate_params(&args)?;
        let parsed: SqlQueryArgs = parse_args(&args)?;
        let conn = self.conn.clone();

        let rows = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<Value>, String> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&parsed.query).map_err(|e| e.to_string())?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query([]).map_err(|e| e.to_string())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| e.to_string())? {
                if out.len() >= MAX_SQL_ROWS {
                    break;
                }
                let mut obj = Map::new();
                for (i, col) in columns.iter().enumerate() {
                    let v = row.get_ref(i).map_err(|e| e.to_string())?;
                    obj.insert(col.clone(), sql_value(v));
                }
                out.push(Value::Object(obj));
            }
            Ok(out)
        })
        .await
        .map_err(|e| Error::internal(format!("sql task failed: {}", e)))?;

        match rows {
            Ok(rows) => Ok(ToolOutput::json(&json!({ "row_count": rows.len(), "rows": rows }))),
            Err(e) => Ok(ToolOutput::error(format!("Query failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calculator_evaluates() {
        let out = CalculatorTool
            .execute(json!({"expression": "(12.5 + 7.5) * 3 - -1"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("(12.5 + 7.5) * 3 - -1 = 61"));
    }

    #[tokio::test]
    async fn test_calculator_rejects_foreign_characters() {
        let err = CalculatorTool
            .validate_params(&json!({"expression": "__import__('os')"}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(CalculatorTool
            .validate_params(&json!({"expression": "2^8"}))
            .is_err());
    }

    #[tokio::test]
    async fn test_calculator_reports_math_errors() {
        let out = CalculatorTool.execute(json!({"expression": "1/0"})).await.unwrap();
        assert!(!out.is_ok());
        let out = CalculatorTool.execute(json!({"expression": "(1+2"})).await.unwrap();
        assert!(!out.is_ok());
    }

    #[test]
    fn test_sql_guard() {
        assert!(check_read_only_sql("SELECT 1").is_ok());
        assert!(check_read_only_sql("SELECT 1; DROP TABLE t").is_err());
        assert!(check_read_only_sql("delete from t").is_err());
        assert!(check_read_only_sql("PRAGMA table_info(t)").is_err());
        assert!(check_read_only_sql("select updated_at from t").is_ok());
    }

    #[tokio::test]
    async fn test_sql_tool_reads_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE leads (name TEXT, employees INTEGER);
                 INSERT INTO leads VALUES ('Acme', 120), ('Globex', 40);",
            )
            .unwrap();
        }

        let tool = SqlQueryTool::open(path.to_str().unwrap()).unwrap();
        let out = tool
            .execute(json!({"query": "SELECT name FROM leads WHERE employees > 100"}))
            .await
            .unwrap();
        assert!(out.is_ok());
        let body: Value = serde_json::from_str(out.content()).unwrap();
        assert_eq!(body, json!({"row_count": 1, "rows": [{"name": "Acme"}]}));
    }
}
