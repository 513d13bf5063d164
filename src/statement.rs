//! Prepared statements owned by a [`GridConnection`].
//!
//! Statements live in the connection's registry keyed by [`StatementRole`]
//! and are reached through a short-lived [`StatementRef`] borrow, so a
//! statement can never outlive or escape its connection.

use std::fmt;

use rust_decimal::Decimal;
use tracing::debug;

use crate::connection::GridConnection;
use crate::error::GridError;
use crate::native::{NativeExecution, NativeStatementId};
use crate::result_set::{ResultSet, ResultSetRef};
use crate::types::{Dialect, RowValues};

/// Every statement the sample transactions prepare.
///
/// The ordering of the variants is the order in which `reprepare_all`
/// walks the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatementRole {
    ElementId,
    CountCustomers,
    CountAccounts,
    ClearHistoryDelete,
    ClearHistoryTruncate,
    Authorize,
    Query,
    TopupQuery,
    TopupUpdate,
    TopupInsert,
    ChargeQuery,
    ChargeUpdate,
    ChargeInsert,
    Purge,
    /// Caller-defined statement; the number keeps custom roles distinct
    Custom(u16),
}

impl fmt::Display for StatementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementId => f.write_str("getElementId"),
            Self::CountCustomers => f.write_str("getCountsCust"),
            Self::CountAccounts => f.write_str("getCountsAcct"),
            Self::ClearHistoryDelete => f.write_str("clearHistoryDelete"),
            Self::ClearHistoryTruncate => f.write_str("clearHistoryTruncate"),
            Self::Authorize => f.write_str("authorize"),
            Self::Query => f.write_str("query"),
            Self::TopupQuery => f.write_str("topupQuery"),
            Self::TopupUpdate => f.write_str("topupUpdate"),
            Self::TopupInsert => f.write_str("topupInsert"),
            Self::ChargeQuery => f.write_str("chargeQuery"),
            Self::ChargeUpdate => f.write_str("chargeUpdate"),
            Self::ChargeInsert => f.write_str("chargeInsert"),
            Self::Purge => f.write_str("purge"),
            Self::Custom(n) => write!(f, "custom{n}"),
        }
    }
}

impl StatementRole {
    /// SQL text for this role in the given dialect.
    ///
    /// `Custom` roles have no built-in text and return `None`.
    #[must_use]
    pub fn sql(self, dialect: Dialect) -> Option<&'static str> {
        let text = match dialect {
            Dialect::TimesTen => match self {
                Self::ElementId => dialect.element_id_sql(),
                Self::CountCustomers => "SELECT MIN(cust_id), MAX(cust_id), COUNT(*) FROM customers",
                Self::CountAccounts => {
                    "SELECT MIN(account_id), MAX(account_id), COUNT(*) FROM accounts"
                }
                Self::ClearHistoryDelete => {
                    "DELETE /*+ TT_TblLock(1) TT_RowLock(0) */ FROM transactions"
                }
                Self::ClearHistoryTruncate => "TRUNCATE TABLE transactions",
                Self::Authorize => {
                    "SELECT cust_id, phone FROM accounts WHERE account_id = :acc_id \
                     AND account_type = :acc_type AND status = :acc_status"
                }
                Self::Query => {
                    "SELECT c.cust_id, c.last_name, c.member_since, a.account_id, \
                     a.phone, s.status, a.current_balance \
                     FROM customers c, accounts a, account_status s \
                     WHERE c.cust_id = :cst_id AND c.cust_id = a.cust_id \
                     AND a.status = s.status"
                }
                Self::TopupQuery | Self::ChargeQuery => {
                    "SELECT current_balance, prev_balance FROM accounts WHERE account_id = :acc_id"
                }
                Self::TopupUpdate | Self::ChargeUpdate => {
                    "UPDATE accounts SET prev_balance = current_balance, \
                     current_balance = current_balance + :adj_amt WHERE account_id = :acc_id"
                }
                Self::TopupInsert => {
                    "INSERT INTO transactions (transaction_id, account_id, transaction_ts, \
                     description, optype, amount) VALUES (txn_seq.NEXTVAL, :acc_id, SYSDATE, \
                     :trx_desc, 'T', :adj_amt)"
                }
                Self::ChargeInsert => {
                    "INSERT INTO transactions (transaction_id, account_id, transaction_ts, \
                     description, optype, amount) VALUES (txn_seq.NEXTVAL, :acc_id, SYSDATE, \
                     :trx_desc, 'C', :adj_amt)"
                }
                Self::Purge => {
                    "DELETE FIRST 128 FROM transactions WHERE \
                     CAST(SYSDATE AS TIMESTAMP) - transaction_ts > NUMTODSINTERVAL(:age, 'SECOND')"
                }
                Self::Custom(_) => return None,
            },
            Dialect::Sqlite => match self {
                Self::ElementId => dialect.element_id_sql(),
                Self::CountCustomers => "SELECT MIN(cust_id), MAX(cust_id), COUNT(*) FROM customers",
                Self::CountAccounts => {
                    "SELECT MIN(account_id), MAX(account_id), COUNT(*) FROM accounts"
                }
                Self::ClearHistoryDelete | Self::ClearHistoryTruncate => "DELETE FROM transactions",
                Self::Authorize => {
                    "SELECT cust_id, phone FROM accounts WHERE account_id = ?1 \
                     AND account_type = ?2 AND status = ?3"
                }
                Self::Query => {
                    "SELECT c.cust_id, c.last_name, c.member_since, a.account_id, \
                     a.phone, s.status, a.current_balance \
                     FROM customers c, accounts a, account_status s \
                     WHERE c.cust_id = ?1 AND c.cust_id = a.cust_id \
                     AND a.status = s.status"
                }
                Self::TopupQuery | Self::ChargeQuery => {
                    "SELECT current_balance, prev_balance FROM accounts WHERE account_id = ?1"
                }
                Self::TopupUpdate | Self::ChargeUpdate => {
                    "UPDATE accounts SET prev_balance = current_balance, \
                     current_balance = ROUND(current_balance + ?1, 2) WHERE account_id = ?2"
                }
                Self::TopupInsert => {
                    "INSERT INTO transactions (account_id, transaction_ts, description, optype, amount) \
                     VALUES (?1, datetime('now'), ?2, 'T', ?3)"
                }
                Self::ChargeInsert => {
                    "INSERT INTO transactions (account_id, transaction_ts, description, optype, amount) \
                     VALUES (?1, datetime('now'), ?2, 'C', ?3)"
                }
                Self::Purge => {
                    "DELETE FROM transactions WHERE transaction_id IN (SELECT transaction_id \
                     FROM transactions WHERE transaction_ts < datetime('now', '-' || ?1 || ' seconds') \
                     LIMIT 128)"
                }
                Self::Custom(_) => return None,
            },
        };
        Some(text)
    }
}

/// State of one registered statement.
#[derive(Debug)]
pub(crate) struct Statement {
    pub(crate) role: StatementRole,
    pub(crate) sql: String,
    /// `None` after a failed reprepare until the next successful one
    pub(crate) native: Option<NativeStatementId>,
    pub(crate) params: Vec<RowValues>,
    pub(crate) result: Option<ResultSet>,
    pub(crate) update_count: Option<u64>,
    pub(crate) last_error: Option<GridError>,
}

impl Statement {
    pub(crate) fn new(role: StatementRole, sql: String, native: NativeStatementId) -> Self {
        Self {
            role,
            sql,
            native: Some(native),
            params: Vec::new(),
            result: None,
            update_count: None,
            last_error: None,
        }
    }
}

/// Mutable access to one statement of a connection.
pub struct StatementRef<'c> {
    pub(crate) conn: &'c mut GridConnection,
    pub(crate) role: StatementRole,
}

impl<'c> StatementRef<'c> {
    fn stmt(&self) -> Result<&Statement, GridError> {
        self.conn
            .statements
            .get(&self.role)
            .ok_or_else(|| GridError::State(format!("statement {} is not registered", self.role)))
    }

    fn stmt_mut(&mut self) -> Result<&mut Statement, GridError> {
        let role = self.role;
        self.conn
            .statements
            .get_mut(&role)
            .ok_or_else(|| GridError::State(format!("statement {role} is not registered")))
    }

    #[must_use]
    pub fn label(&self) -> StatementRole {
        self.role
    }

    /// SQL text the statement was prepared from.
    pub fn sql(&self) -> Result<&str, GridError> {
        Ok(self.stmt()?.sql.as_str())
    }

    /// Most recent error recorded on this statement.
    #[must_use]
    pub fn last_error(&self) -> Option<&GridError> {
        self.conn
            .statements
            .get(&self.role)
            .and_then(|s| s.last_error.as_ref())
    }

    /// Bind a parameter. `index` is 1-based, matching the placeholder order.
    ///
    /// # Errors
    /// `State` if the statement is not prepared; `Parameter` for index 0.
    pub fn set(&mut self, index: usize, value: RowValues) -> Result<(), GridError> {
        let stmt = self.stmt_mut()?;
        if stmt.native.is_none() {
            let err = GridError::State(format!("statement {} is not prepared", stmt.role));
            stmt.last_error = Some(err.clone());
            return Err(err);
        }
        if index == 0 {
            return Err(GridError::Parameter("parameter index starts at 1".into()));
        }
        if stmt.params.len() < index {
            stmt.params.resize(index, RowValues::Null);
        }
        stmt.params[index - 1] = value;
        Ok(())
    }

    pub fn set_int(&mut self, index: usize, value: i32) -> Result<(), GridError> {
        self.set(index, RowValues::Int(i64::from(value)))
    }

    pub fn set_long(&mut self, index: usize, value: i64) -> Result<(), GridError> {
        self.set(index, RowValues::Int(value))
    }

    pub fn set_string(&mut self, index: usize, value: &str) -> Result<(), GridError> {
        self.set(index, RowValues::Text(value.to_owned()))
    }

    pub fn set_decimal(&mut self, index: usize, value: Decimal) -> Result<(), GridError> {
        self.set(index, RowValues::Decimal(value))
    }

    /// Drop every bound parameter.
    pub fn clear_parameters(&mut self) -> Result<(), GridError> {
        self.stmt_mut()?.params.clear();
        Ok(())
    }

    /// Execute with the currently bound parameters.
    ///
    /// Returns `true` when the execution produced a result set, `false` when
    /// it produced an update count. Any previous result set is closed first.
    ///
    /// # Errors
    /// Native failures are classified: retryable and failover errors roll the
    /// connection back, fatal errors close it, and ordinary errors are
    /// recorded and returned as `Database`.
    pub async fn execute(&mut self) -> Result<bool, GridError> {
        self.close_result_set().await;
        let role = self.role;
        let conn = &mut *self.conn;
        let Some(native_conn) = conn.native.as_mut() else {
            return Err(conn.record(GridError::NotOpen));
        };
        let Some(stmt) = conn.statements.get_mut(&role) else {
            return Err(GridError::State(format!("statement {role} is not registered")));
        };
        let Some(handle) = stmt.native else {
            let err = GridError::State(format!("statement {role} is not prepared"));
            stmt.last_error = Some(err.clone());
            return Err(err);
        };
        stmt.update_count = None;
        stmt.last_error = None;

        match native_conn.execute(handle, &stmt.params).await {
            Ok(NativeExecution::Rows(cursor)) => {
                stmt.result = Some(ResultSet::new(cursor));
                Ok(true)
            }
            Ok(NativeExecution::UpdateCount(count)) => {
                stmt.update_count = Some(count);
                Ok(false)
            }
            Err(native) => {
                debug!(statement = %role, error = %native, "execute failed");
                let err = conn.absorb(native).await;
                if let Some(stmt) = conn.statements.get_mut(&role) {
                    stmt.last_error = Some(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Rows modified by the last execution, if it was DML.
    #[must_use]
    pub fn update_count(&self) -> Option<u64> {
        self.conn
            .statements
            .get(&self.role)
            .and_then(|s| s.update_count)
    }

    #[must_use]
    pub fn has_result_set(&self) -> bool {
        self.conn
            .statements
            .get(&self.role)
            .is_some_and(|s| s.result.is_some())
    }

    /// Borrow the live result set.
    ///
    /// # Errors
    /// `NoResults` if the last execution did not produce one.
    pub fn result_set(self) -> Result<ResultSetRef<'c>, GridError> {
        if !self.has_result_set() {
            return Err(GridError::NoResults);
        }
        Ok(ResultSetRef {
            conn: self.conn,
            role: self.role,
        })
    }

    /// Close the live result set, if any. Native errors are ignored.
    pub async fn close_result_set(&mut self) {
        self.conn.close_result_set(self.role).await;
    }
}
