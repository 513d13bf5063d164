use async_trait::async_trait;
use serde::Serialize;

use super::{Transaction, TxnKind, TxnOutput, TxnStatus, rollback_on_failure};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

/// Key ranges and row counts of the customer and account tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub min_cust_id: i64,
    pub max_cust_id: i64,
    pub num_customers: i64,
    pub min_account_id: i64,
    pub max_account_id: i64,
    pub num_accounts: i64,
}

impl TableCounts {
    /// Random inputs are drawn from the key ranges, so both ranges must be
    /// dense: `max - min + 1 == count`, `min >= 1` and `max > min`.
    ///
    /// # Errors
    /// `Data` describing the first inconsistency found.
    pub fn validate(&self) -> Result<(), GridError> {
        check_range(
            "customers",
            self.min_cust_id,
            self.max_cust_id,
            self.num_customers,
        )?;
        check_range(
            "accounts",
            self.min_account_id,
            self.max_account_id,
            self.num_accounts,
        )
    }
}

fn check_range(table: &str, min: i64, max: i64, count: i64) -> Result<(), GridError> {
    if min < 1 || max <= min || max - min + 1 != count {
        return Err(GridError::Data(format!(
            "{table}: min {min}, max {max}, count {count}"
        )));
    }
    Ok(())
}

/// Read the key ranges the workload draws random inputs from.
#[derive(Debug, Default)]
pub struct GetCounts {
    status: TxnStatus,
    counts: Option<TableCounts>,
}

impl GetCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts from the last successful round.
    #[must_use]
    pub fn counts(&self) -> Option<TableCounts> {
        self.counts
    }

    async fn round(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let (min_cust_id, max_cust_id, num_customers) =
            read_range(conn, StatementRole::CountCustomers).await?;
        let (min_account_id, max_account_id, num_accounts) =
            read_range(conn, StatementRole::CountAccounts).await?;
        conn.commit().await?;
        let counts = TableCounts {
            min_cust_id,
            max_cust_id,
            num_customers,
            min_account_id,
            max_account_id,
            num_accounts,
        };
        counts.validate()?;
        self.counts = Some(counts);
        Ok(TxnOutput::Done { rows: 0 })
    }
}

async fn read_range(
    conn: &mut GridConnection,
    role: StatementRole,
) -> Result<(i64, i64, i64), GridError> {
    let mut stmt = conn.statement(role)?;
    if !stmt.execute().await? {
        return Err(GridError::NoResults);
    }
    let mut rs = stmt.result_set()?;
    if !rs.next().await? {
        rs.close().await;
        return Err(GridError::NoResults);
    }
    let values = (rs.get_long(0), rs.get_long(1), rs.get_long(2));
    rs.close().await;
    match values {
        (Ok(min), Ok(max), Ok(count)) => Ok((min, max, count)),
        // MIN/MAX of an empty table are NULL
        _ => Err(GridError::NoResults),
    }
}

#[async_trait]
impl Transaction for GetCounts {
    fn kind(&self) -> TxnKind {
        TxnKind::GetCounts
    }

    fn roles(&self) -> Vec<StatementRole> {
        vec![StatementRole::CountCustomers, StatementRole::CountAccounts]
    }

    fn status(&self) -> &TxnStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut TxnStatus {
        &mut self.status
    }

    async fn run(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        self.counts = None;
        let result = self.round(conn).await;
        if let Err(e) = &result {
            rollback_on_failure(conn, e).await;
        }
        result
    }
}
