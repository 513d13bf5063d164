use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::{
    Transaction, TxnKind, TxnOutput, TxnStatus, execute_single_row, rollback_on_failure,
};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

/// Direction of a balance adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    /// Add the amount (a topup)
    Credit,
    /// Subtract the amount (a charge)
    Debit,
}

impl BalanceOp {
    fn roles(self) -> [StatementRole; 3] {
        match self {
            BalanceOp::Credit => [
                StatementRole::TopupQuery,
                StatementRole::TopupUpdate,
                StatementRole::TopupInsert,
            ],
            BalanceOp::Debit => [
                StatementRole::ChargeQuery,
                StatementRole::ChargeUpdate,
                StatementRole::ChargeInsert,
            ],
        }
    }

    fn description(self) -> &'static str {
        match self {
            BalanceOp::Credit => "Account Topup",
            BalanceOp::Debit => "Account Charge",
        }
    }

    fn signed(self, amount: Decimal) -> Decimal {
        match self {
            BalanceOp::Credit => amount,
            BalanceOp::Debit => -amount,
        }
    }
}

/// Read the balance, adjust it and write an audit row, all in one
/// native transaction. Each DML step must touch exactly one row.
#[derive(Debug)]
struct BalanceAdjust {
    op: BalanceOp,
    status: TxnStatus,
    account_id: Option<i64>,
    amount: Option<Decimal>,
    balance: Option<(Decimal, Decimal)>,
}

impl BalanceAdjust {
    fn new(op: BalanceOp) -> Self {
        Self {
            op,
            status: TxnStatus::default(),
            account_id: None,
            amount: None,
            balance: None,
        }
    }

    fn set_account_id(&mut self, account_id: i64) -> Result<(), GridError> {
        if account_id < 1 {
            return Err(GridError::Parameter(format!("invalid account id {account_id}")));
        }
        self.account_id = Some(account_id);
        Ok(())
    }

    fn set_amount(&mut self, amount: Decimal) -> Result<(), GridError> {
        if amount <= Decimal::ZERO {
            return Err(GridError::Parameter(format!("invalid amount {amount}")));
        }
        self.amount = Some(amount);
        Ok(())
    }

    async fn round(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        let account_id = self.account_id.ok_or(GridError::NoInput("account id"))?;
        let amount = self.amount.ok_or(GridError::NoInput("amount"))?;
        let adjustment = self.op.signed(amount);
        let [query, update, insert] = self.op.roles();

        {
            let mut stmt = conn.statement(query)?;
            stmt.set_long(1, account_id)?;
        }
        {
            let mut stmt = conn.statement(update)?;
            stmt.set_decimal(1, adjustment)?;
            stmt.set_long(2, account_id)?;
        }
        {
            let mut stmt = conn.statement(insert)?;
            stmt.set_long(1, account_id)?;
            stmt.set_string(2, self.op.description())?;
            stmt.set_decimal(3, adjustment)?;
        }

        let mut stmt = conn.statement(query)?;
        if !stmt.execute().await? {
            return Err(GridError::NoResults);
        }
        let mut rs = stmt.result_set()?;
        if !rs.next().await? {
            rs.close().await;
            return Err(GridError::NoResults);
        }
        let current = rs.get_decimal(0);
        let previous = rs.get_decimal(1);
        rs.close().await;
        let balance = (current?, previous?);
        debug!(
            account_id,
            current = %balance.0,
            previous = %balance.1,
            adjustment = %adjustment,
            "balance read"
        );
        self.balance = Some(balance);

        execute_single_row(conn, update).await?;
        execute_single_row(conn, insert).await?;
        conn.commit().await?;
        Ok(TxnOutput::Done { rows: 1 })
    }

    async fn run(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        self.balance = None;
        let result = self.round(conn).await;
        if let Err(e) = &result {
            rollback_on_failure(conn, e).await;
        }
        result
    }
}

/// Credit an account.
#[derive(Debug)]
pub struct Topup(BalanceAdjust);

impl Default for Topup {
    fn default() -> Self {
        Self(BalanceAdjust::new(BalanceOp::Credit))
    }
}

impl Topup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Parameter` if `account_id` is below 1.
    pub fn set_account_id(&mut self, account_id: i64) -> Result<(), GridError> {
        self.0.set_account_id(account_id)
    }

    /// # Errors
    /// `Parameter` unless `amount` is positive.
    pub fn set_amount(&mut self, amount: Decimal) -> Result<(), GridError> {
        self.0.set_amount(amount)
    }

    /// Current and previous balance read by the last round.
    #[must_use]
    pub fn balance_before(&self) -> Option<(Decimal, Decimal)> {
        self.0.balance
    }
}

/// Debit an account.
#[derive(Debug)]
pub struct Charge(BalanceAdjust);

impl Default for Charge {
    fn default() -> Self {
        Self(BalanceAdjust::new(BalanceOp::Debit))
    }
}

impl Charge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Parameter` if `account_id` is below 1.
    pub fn set_account_id(&mut self, account_id: i64) -> Result<(), GridError> {
        self.0.set_account_id(account_id)
    }

    /// Amount to debit.
    ///
    /// # Errors
    /// `Parameter` unless `amount` is positive.
    pub fn set_amount(&mut self, amount: Decimal) -> Result<(), GridError> {
        self.0.set_amount(amount)
    }

    #[must_use]
    pub fn balance_before(&self) -> Option<(Decimal, Decimal)> {
        self.0.balance
    }
}

macro_rules! balance_transaction {
    ($ty:ident, $kind:expr) => {
        #[async_trait]
        impl Transaction for $ty {
            fn kind(&self) -> TxnKind {
                $kind
            }

            fn roles(&self) -> Vec<StatementRole> {
                self.0.op.roles().to_vec()
            }

            fn status(&self) -> &TxnStatus {
                &self.0.status
            }

            fn status_mut(&mut self) -> &mut TxnStatus {
                &mut self.0.status
            }

            async fn run(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
                self.0.run(conn).await
            }
        }
    };
}

balance_transaction!(Topup, TxnKind::Topup);
balance_transaction!(Charge, TxnKind::Charge);
