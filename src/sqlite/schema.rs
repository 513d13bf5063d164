use rusqlite::params;
use tokio::task::spawn_blocking;
use tracing::info;

use crate::error::NativeError;
use crate::txn::{ACCOUNT_STATUS_ACTIVE, ACCOUNT_TYPE_PREPAID};

use super::connection::map_sqlite_error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS account_status (
    status      INTEGER PRIMARY KEY,
    description TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS customers (
    cust_id      INTEGER PRIMARY KEY,
    region       TEXT NOT NULL,
    first_name   TEXT NOT NULL,
    last_name    TEXT NOT NULL,
    member_since TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS accounts (
    account_id      INTEGER PRIMARY KEY,
    phone           TEXT NOT NULL,
    account_type    TEXT NOT NULL,
    status          INTEGER NOT NULL REFERENCES account_status(status),
    current_balance REAL NOT NULL,
    prev_balance    REAL NOT NULL,
    date_created    TEXT NOT NULL,
    cust_id         INTEGER NOT NULL REFERENCES customers(cust_id)
);
CREATE TABLE IF NOT EXISTS transactions (
    transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id     INTEGER NOT NULL,
    transaction_ts TEXT NOT NULL,
    description    TEXT,
    optype         TEXT NOT NULL,
    amount         REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS accounts_cust ON accounts(cust_id);
CREATE INDEX IF NOT EXISTS transactions_ts ON transactions(transaction_ts);
";

const STATUSES: &[(i32, &str)] = &[
    (10, "Active - Account is in use"),
    (20, "Pending - Account is being provisioned"),
    (30, "Suspended - Account is temporarily suspended"),
    (40, "Terminated - Account is closed"),
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Jones", "Taylor", "Brown", "Williams", "Wilson", "Johnson", "Davies",
];
const FIRST_NAMES: &[&str] = &[
    "Alex", "Sam", "Jordan", "Casey", "Robin", "Morgan", "Jamie", "Taylor",
];

/// Size of the generated sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedOptions {
    pub customers: u32,
    pub accounts_per_customer: u32,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            customers: 1000,
            accounts_per_customer: 2,
        }
    }
}

/// Create the sample tables in `db_path` and fill them if they are empty.
///
/// Customer and account IDs are dense from 1, which the key range checks
/// of the workload rely on. Every fourth account is not an active prepaid
/// account, so authorization finds no row for it.
///
/// # Errors
/// Any `SQLite` error, mapped onto the native error triple.
pub async fn create_sample_database(db_path: &str, seed: SeedOptions) -> Result<(), NativeError> {
    let path = db_path.to_owned();
    let inserted = spawn_blocking(move || {
        let mut conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |r| r.get(0))?;
        if existing > 0 {
            return Ok(0);
        }
        let tx = conn.transaction()?;
        {
            let mut status = tx.prepare("INSERT INTO account_status (status, description) VALUES (?1, ?2)")?;
            for (code, description) in STATUSES {
                status.execute(params![code, description])?;
            }
            let mut customer = tx.prepare(
                "INSERT INTO customers (cust_id, region, first_name, last_name, member_since) \
                 VALUES (?1, ?2, ?3, ?4, date('now', '-' || ?5 || ' days'))",
            )?;
            let mut account = tx.prepare(
                "INSERT INTO accounts (account_id, phone, account_type, status, current_balance, \
                 prev_balance, date_created, cust_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, datetime('now'), ?6)",
            )?;
            let mut account_id: i64 = 0;
            for cust in 1..=i64::from(seed.customers) {
                let idx = usize::try_from(cust).unwrap_or(0);
                customer.execute(params![
                    cust,
                    if cust % 2 == 0 { "E" } else { "W" },
                    FIRST_NAMES[idx % FIRST_NAMES.len()],
                    LAST_NAMES[(idx / FIRST_NAMES.len()) % LAST_NAMES.len()],
                    cust % 3650,
                ])?;
                for _ in 0..seed.accounts_per_customer {
                    account_id += 1;
                    let (account_type, status) = if account_id % 4 == 0 {
                        ("T", 20)
                    } else {
                        (ACCOUNT_TYPE_PREPAID, ACCOUNT_STATUS_ACTIVE)
                    };
                    account.execute(params![
                        account_id,
                        format!("555{account_id:07}"),
                        account_type,
                        status,
                        50.0_f64,
                        cust,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok::<_, rusqlite::Error>(u64::from(seed.customers))
    })
    .await
    .map_err(|e| NativeError::with_code(0, format!("sqlite spawn_blocking join error: {e}")))?
    .map_err(map_sqlite_error)?;
    if inserted > 0 {
        info!(
            path = db_path,
            customers = seed.customers,
            accounts = u64::from(seed.customers) * u64::from(seed.accounts_per_customer),
            "sample database seeded"
        );
    }
    Ok(())
}
