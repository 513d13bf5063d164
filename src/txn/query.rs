use async_trait::async_trait;

use super::{Transaction, TxnKind, TxnOutput, TxnStatus, rollback_on_failure};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

/// Customer details joined with every account the customer holds.
#[derive(Debug, Default)]
pub struct Query {
    status: TxnStatus,
    cust_id: Option<i64>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Parameter` if `cust_id` is below 1.
    pub fn set_cust_id(&mut self, cust_id: i64) -> Result<(), GridError> {
        if cust_id < 1 {
            return Err(GridError::Parameter(format!("invalid customer id {cust_id}")));
        }
        self.cust_id = Some(cust_id);
        Ok(())
    }

    async fn round(&self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let cust_id = self.cust_id.ok_or(GridError::NoInput("customer id"))?;
        let mut stmt = conn.statement(StatementRole::Query)?;
        stmt.set_long(1, cust_id)?;
        if !stmt.execute().await? {
            return Err(GridError::NoResults);
        }
        Ok(TxnOutput::Rows(StatementRole::Query))
    }
}

#[async_trait]
impl Transaction for Query {
    fn kind(&self) -> TxnKind {
        TxnKind::Query
    }

    fn roles(&self) -> Vec<StatementRole> {
        vec![StatementRole::Query]
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
