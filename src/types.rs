use clap::ValueEnum;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Values that can be bound as statement parameters or read back from a row.
///
/// The same enum is used by every native driver so the wrappers never have
/// to branch on driver types:
/// ```rust
/// use grid_middleware::prelude::*;
/// use rust_decimal::Decimal;
///
/// let params = vec![
///     RowValues::Int(42),
///     RowValues::Decimal(Decimal::new(1000, 2)),
///     RowValues::Text("Account Topup".into()),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Exact decimal value (currency amounts)
    Decimal(Decimal),
    /// Text/string value
    Text(String),
    /// NULL value
    Null,
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowValues::Int(value) => Some(*value),
            RowValues::Decimal(value) if value.fract().is_zero() => value.to_i64(),
            RowValues::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            RowValues::Int(value) => Some(*value as f64),
            RowValues::Decimal(value) => value.to_f64(),
            RowValues::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            RowValues::Decimal(value) => Some(*value),
            RowValues::Int(value) => Some(Decimal::from(*value)),
            RowValues::Float(value) => Decimal::try_from(*value).ok(),
            RowValues::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text rendering of scalar values; `None` for NULL and blobs.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            RowValues::Text(value) => Some(value.clone()),
            RowValues::Int(value) => Some(value.to_string()),
            RowValues::Float(value) => Some(value.to_string()),
            RowValues::Decimal(value) => Some(value.to_string()),
            RowValues::Null | RowValues::Blob(_) => None,
        }
    }
}

/// How the client attaches to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
pub enum ConnectMode {
    /// In-process (direct) connection
    Direct,
    /// Client/server connection over the network
    ClientServer,
}

/// SQL flavour spoken by the attached database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
pub enum Dialect {
    /// The scale-out grid database the sample was written for
    TimesTen,
    /// The bundled `SQLite` backend
    Sqlite,
}

impl Dialect {
    /// Introspection query whose second column is `"1"` on a grid database.
    #[must_use]
    pub fn grid_check_sql(self) -> &'static str {
        match self {
            Dialect::TimesTen => "call ttConfiguration('TTGridEnable')",
            Dialect::Sqlite => "SELECT 'TTGridEnable', '0'",
        }
    }

    /// Query returning the ID of the element the session is attached to.
    #[must_use]
    pub fn element_id_sql(self) -> &'static str {
        match self {
            Dialect::TimesTen => "SELECT elementid# FROM DUAL",
            Dialect::Sqlite => "SELECT 0",
        }
    }
}
