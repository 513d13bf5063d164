use async_trait::async_trait;

use super::{Transaction, TxnKind, TxnOutput, TxnStatus, rollback_on_failure};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

/// Default age, in seconds, past which history rows are purged.
pub const DEFAULT_PURGE_AGE_SECS: i64 = 30;

/// Delete a bounded batch of history rows older than the configured age.
#[derive(Debug)]
pub struct Purge {
    status: TxnStatus,
    age_secs: i64,
}

impl Default for Purge {
    fn default() -> Self {
        Self {
            status: TxnStatus::default(),
            age_secs: DEFAULT_PURGE_AGE_SECS,
        }
    }
}

impl Purge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Parameter` if `age_secs` is not positive.
    pub fn set_age(&mut self, age_secs: i64) -> Result<(), GridError> {
        if age_secs <= 0 {
            return Err(GridError::Parameter(format!("invalid purge age {age_secs}")));
        }
        self.age_secs = age_secs;
        Ok(())
    }

    #[must_use]
    pub fn age(&self) -> i64 {
        self.age_secs
    }

    async fn round(&self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let mut stmt = conn.statement(StatementRole::Purge)?;
        stmt.set_long(1, self.age_secs)?;
        stmt.execute().await?;
        let rows = stmt.update_count().unwrap_or(0);
        conn.commit().await?;
        Ok(TxnOutput::Done { rows })
    }
}

#[async_trait]
impl Transaction for Purge {
    fn kind(&self) -> TxnKind {
        TxnKind::Purge
    }

    fn roles(&self) -> Vec<StatementRole> {
        vec![StatementRole::Purge]
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
