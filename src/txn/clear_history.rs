use async_trait::async_trait;

use super::{Transaction, TxnKind, TxnOutput, TxnStatus, rollback_on_failure};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

/// Empty the transaction history table before a run.
///
/// With `use_truncate` the table is truncated, otherwise it is deleted
/// under a table lock. Either way the round ends with a commit.
#[derive(Debug, Default)]
pub struct ClearHistory {
    status: TxnStatus,
    use_truncate: bool,
}

impl ClearHistory {
    #[must_use]
    pub fn new(use_truncate: bool) -> Self {
        Self {
            status: TxnStatus::default(),
            use_truncate,
        }
    }

    fn role(&self) -> StatementRole {
        if self.use_truncate {
            StatementRole::ClearHistoryTruncate
        } else {
            StatementRole::ClearHistoryDelete
        }
    }

    async fn round(&self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let mut stmt = conn.statement(self.role())?;
        stmt.execute().await?;
        let rows = stmt.update_count().unwrap_or(0);
        conn.commit().await?;
        Ok(TxnOutput::Done { rows })
    }
}

#[async_trait]
impl Transaction for ClearHistory {
    fn kind(&self) -> TxnKind {
        TxnKind::ClearHistory
    }

    fn roles(&self) -> Vec<StatementRole> {
        vec![self.role()]
    }

    fn status(&self) -> &TxnStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut TxnStatus {
        &mut self.status
    }

    async fn run(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let result = self.round(conn).await;
        if let Err(e) = &result {
            rollback_on_failure(conn, e).await;
        }
        result
    }
}
