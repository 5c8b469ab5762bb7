//! Quoting and literal rules per target database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use rowstage_core::{CellValue, TableRef};

use crate::error::EngineError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql,
    Sqlite,
    #[serde(rename = "sqlserver", alias = "mssql")]
    SqlServer,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::SqlServer => "sqlserver",
        }
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            Self::Postgres => &Postgres,
            Self::MySql => &MySql,
            Self::Sqlite => &Sqlite,
            Self::SqlServer => &SqlServer,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            other => Err(EngineError::Config(format!("unknown dialect: {other}"))),
        }
    }
}

/// What the compiler needs to know about a target database.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn quote_identifier(&self, name: &str) -> String;

    /// Encode `value` as a literal that reads back as exactly that value.
    fn quote_literal(&self, value: &CellValue) -> Result<String, EngineError>;

    /// Whether `INSERT ... RETURNING` is available.
    fn supports_returning(&self) -> bool;

    fn qualify_table(&self, table: &TableRef) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for Postgres {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn quote_identifier(&self, name: &str) -> String {
        double_quoted(name)
    }

    fn quote_literal(&self, value: &CellValue) -> Result<String, EngineError> {
        Ok(match value {
            CellValue::Null => "NULL".into(),
            CellValue::Boolean(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Integer(n) => n.to_string(),
            CellValue::Float(f) if f.is_nan() => "'NaN'::float8".into(),
            CellValue::Float(f) if f.is_infinite() => {
                String::from(if *f > 0.0 { "'Infinity'::float8" } else { "'-Infinity'::float8" })
            }
            CellValue::Float(f) => float_literal(*f),
            CellValue::Decimal(d) => decimal_literal(self, value, d)?,
            CellValue::Text(s) => {
                if s.contains('\0') {
                    return Err(unsupported(self, value, "text contains a NUL character"));
                }
                single_quoted(s)
            }
            CellValue::Date(d) => format!("DATE '{}'", d.format(DATE_FORMAT)),
            CellValue::Time(t) => format!("TIME '{}'", t.format(TIME_FORMAT)),
            CellValue::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format(TIMESTAMP_FORMAT)),
            CellValue::TimestampTz(ts) => {
                format!("TIMESTAMPTZ '{}+00:00'", ts.naive_utc().format(TIMESTAMP_FORMAT))
            }
            CellValue::Uuid(u) => format!("'{u}'::uuid"),
            CellValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            CellValue::Json(v) => format!("{}::jsonb", single_quoted(&v.to_string())),
            CellValue::Array(items) if items.is_empty() => "'{}'".into(),
            CellValue::Array(items) => {
                let elements = items
                    .iter()
                    .map(|item| self.quote_literal(item))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("ARRAY[{}]", elements.join(", "))
            }
        })
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn qualify_table(&self, table: &TableRef) -> String {
        match &table.namespace.schema {
            Some(schema) => format!("{}.{}", double_quoted(schema), double_quoted(&table.table)),
            None => double_quoted(&table.table),
        }
    }
}

impl Dialect for MySql {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_literal(&self, value: &CellValue) -> Result<String, EngineError> {
        Ok(match value {
            CellValue::Null => "NULL".into(),
            CellValue::Boolean(b) => String::from(if *b { "1" } else { "0" }),
            CellValue::Integer(n) => n.to_string(),
            CellValue::Float(f) => finite_float(self, value, *f)?,
            CellValue::Decimal(d) => decimal_literal(self, value, d)?,
            CellValue::Text(s) => mysql_string(s),
            CellValue::Date(d) => format!("DATE '{}'", d.format(DATE_FORMAT)),
            CellValue::Time(t) => format!("TIME '{}'", t.format(TIME_FORMAT)),
            CellValue::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format(TIMESTAMP_FORMAT)),
            CellValue::TimestampTz(ts) => {
                format!("TIMESTAMP '{}'", ts.naive_utc().format(TIMESTAMP_FORMAT))
            }
            CellValue::Uuid(u) => format!("'{u}'"),
            CellValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
            CellValue::Json(_) | CellValue::Array(_) => {
                format!("CAST({} AS JSON)", mysql_string(&value.to_json().to_string()))
            }
        })
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn qualify_table(&self, table: &TableRef) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(&table.namespace.database),
            self.quote_identifier(&table.table)
        )
    }
}

impl Dialect for Sqlite {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn quote_identifier(&self, name: &str) -> String {
        double_quoted(name)
    }

    fn quote_literal(&self, value: &CellValue) -> Result<String, EngineError> {
        Ok(match value {
            CellValue::Null => "NULL".into(),
            CellValue::Boolean(b) => String::from(if *b { "1" } else { "0" }),
            CellValue::Integer(n) => n.to_string(),
            CellValue::Float(f) => finite_float(self, value, *f)?,
            CellValue::Decimal(d) => decimal_literal(self, value, d)?,
            CellValue::Text(s) => single_quoted(s),
            CellValue::Date(d) => single_quoted(&d.format(DATE_FORMAT).to_string()),
            CellValue::Time(t) => single_quoted(&t.format(TIME_FORMAT).to_string()),
            CellValue::Timestamp(ts) => single_quoted(&ts.format(TIMESTAMP_FORMAT).to_string()),
            CellValue::TimestampTz(ts) => {
                single_quoted(&format!("{}+00:00", ts.naive_utc().format(TIMESTAMP_FORMAT)))
            }
            CellValue::Uuid(u) => single_quoted(&u.to_string()),
            CellValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
            CellValue::Json(_) | CellValue::Array(_) => {
                format!("json({})", single_quoted(&value.to_json().to_string()))
            }
        })
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn qualify_table(&self, table: &TableRef) -> String {
        match &table.namespace.schema {
            Some(schema) => format!("{}.{}", double_quoted(schema), double_quoted(&table.table)),
            None => double_quoted(&table.table),
        }
    }
}

impl Dialect for SqlServer {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn quote_literal(&self, value: &CellValue) -> Result<String, EngineError> {
        Ok(match value {
            CellValue::Null => "NULL".into(),
            CellValue::Boolean(b) => String::from(if *b { "1" } else { "0" }),
            CellValue::Integer(n) => n.to_string(),
            CellValue::Float(f) => finite_float(self, value, *f)?,
            CellValue::Decimal(d) => decimal_literal(self, value, d)?,
            CellValue::Text(s) => national(s),
            CellValue::Date(d) => format!("CAST('{}' AS DATE)", d.format(DATE_FORMAT)),
            CellValue::Time(t) => format!("CAST('{}' AS TIME)", t.format(TIME_FORMAT)),
            CellValue::Timestamp(ts) => {
                format!("CAST('{}' AS DATETIME2)", ts.format(TIMESTAMP_FORMAT))
            }
            CellValue::TimestampTz(ts) => format!(
                "CAST('{} +00:00' AS DATETIMEOFFSET)",
                ts.naive_utc().format(TIMESTAMP_FORMAT)
            ),
            CellValue::Uuid(u) => format!("CAST('{u}' AS UNIQUEIDENTIFIER)"),
            CellValue::Bytes(b) => format!("0x{}", hex::encode_upper(b)),
            CellValue::Json(_) | CellValue::Array(_) => national(&value.to_json().to_string()),
        })
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn qualify_table(&self, table: &TableRef) -> String {
        match &table.namespace.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&table.table)
            ),
            None => self.quote_identifier(&table.table),
        }
    }
}

fn double_quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn national(value: &str) -> String {
    format!("N{}", single_quoted(value))
}

/// MySQL treats backslash as an escape inside strings by default.
fn mysql_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\'', "''")
        .replace('\0', "\\0");
    format!("'{escaped}'")
}

/// Shortest representation that parses back to the same `f64`.
fn float_literal(value: f64) -> String {
    format!("{value:?}")
}

fn finite_float(dialect: &dyn Dialect, value: &CellValue, f: f64) -> Result<String, EngineError> {
    if !f.is_finite() {
        return Err(unsupported(dialect, value, "non-finite floats have no literal form"));
    }
    Ok(float_literal(f))
}

fn decimal_literal(dialect: &dyn Dialect, value: &CellValue, raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    if !looks_like_numeric_literal(trimmed) {
        return Err(unsupported(dialect, value, format!("{raw:?} is not a decimal number")));
    }
    Ok(trimmed.to_string())
}

fn looks_like_numeric_literal(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut index = 0usize;
    if bytes.first().is_some_and(|b| matches!(b, b'+' | b'-')) {
        index += 1;
    }

    let mut digits = 0usize;
    while index < bytes.len() && bytes[index].is_ascii_digit() {
        digits += 1;
        index += 1;
    }
    if index < bytes.len() && bytes[index] == b'.' {
        index += 1;
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            digits += 1;
            index += 1;
        }
    }
    if digits == 0 {
        return false;
    }

    if index < bytes.len() && matches!(bytes[index], b'e' | b'E') {
        index += 1;
        if index < bytes.len() && matches!(bytes[index], b'+' | b'-') {
            index += 1;
        }
        let start = index;
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            index += 1;
        }
        if index == start {
            return false;
        }
    }
    index == bytes.len()
}

fn unsupported(dialect: &dyn Dialect, value: &CellValue, reason: impl Into<String>) -> EngineError {
    EngineError::UnsupportedValue {
        dialect: dialect.name(),
        kind: value.kind_name(),
        reason: reason.into(),
    }
}
