use async_trait::async_trait;

use super::{Transaction, TxnKind, TxnOutput, TxnStatus, rollback_on_failure};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

/// Account type the authorization check accepts (prepaid).
pub const ACCOUNT_TYPE_PREPAID: &str = "P";
/// Account status the authorization check accepts (active).
pub const ACCOUNT_STATUS_ACTIVE: i32 = 10;

/// Check an account is an active prepaid account and return its
/// customer and phone number.
#[derive(Debug, Default)]
pub struct Authorize {
    status: TxnStatus,
    account_id: Option<i64>,
}

impl Authorize {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Parameter` if `account_id` is below 1.
    pub fn set_account_id(&mut self, account_id: i64) -> Result<(), GridError> {
        if account_id < 1 {
            return Err(GridError::Parameter(format!("invalid account id {account_id}")));
        }
        self.account_id = Some(account_id);
        Ok(())
    }

    async fn round(&self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let account_id = self.account_id.ok_or(GridError::NoInput("account id"))?;
        let mut stmt = conn.statement(StatementRole::Authorize)?;
        stmt.set_long(1, account_id)?;
        stmt.set_string(2, ACCOUNT_TYPE_PREPAID)?;
        stmt.set_int(3, ACCOUNT_STATUS_ACTIVE)?;
        if !stmt.execute().await? {
            return Err(GridError::NoResults);
        }
        Ok(TxnOutput::Rows(StatementRole::Authorize))
    }
}

#[async_trait]
impl Transaction for Authorize {
    fn kind(&self) -> TxnKind {
        TxnKind::Authorize
    }

    fn roles(&self) -> Vec<StatementRole> {
        vec![StatementRole::Authorize]
    }

    fn status(&self) -> &TxnStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut TxnStatus {
        &mut self.status
    }

    fn returns_rows(&self) -> bool {
        true
    }

    async fn run(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let result = self.round(conn).await;
        if let Err(e) = &result {
            rollback_on_failure(conn, e).await;
        }
        result
    }
}
