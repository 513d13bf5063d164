use rust_decimal::Decimal;
use tracing::debug;

use crate::connection::GridConnection;
use crate::error::GridError;
use crate::native::NativeCursorId;
use crate::statement::StatementRole;
use crate::types::RowValues;

/// Cursor state held by the statement that produced it.
#[derive(Debug)]
pub(crate) struct ResultSet {
    pub(crate) cursor: NativeCursorId,
    pub(crate) row: Option<Vec<RowValues>>,
    pub(crate) position: u64,
    pub(crate) last_error: Option<GridError>,
}

impl ResultSet {
    pub(crate) fn new(cursor: NativeCursorId) -> Self {
        Self {
            cursor,
            row: None,
            position: 0,
            last_error: None,
        }
    }
}

/// Borrowed view of a statement's live result set.
///
/// Columns are addressed by 0-based index.
pub struct ResultSetRef<'c> {
    pub(crate) conn: &'c mut GridConnection,
    pub(crate) role: StatementRole,
}

impl ResultSetRef<'_> {
    fn state(&self) -> Result<&ResultSet, GridError> {
        self.conn
            .statements
            .get(&self.role)
            .and_then(|s| s.result.as_ref())
            .ok_or_else(|| GridError::State(format!("result set of {} is closed", self.role)))
    }

    /// Advance to the next row; `false` once the cursor is exhausted.
    ///
    /// # Errors
    /// Native failures are classified the same way as statement execution.
    pub async fn next(&mut self) -> Result<bool, GridError> {
        let role = self.role;
        let cursor = self.state()?.cursor;
        let conn = &mut *self.conn;
        let Some(native) = conn.native.as_mut() else {
            return Err(conn.record(GridError::NotOpen));
        };
        match native.fetch_next(cursor).await {
            Ok(row) => {
                let rs = conn
                    .statements
                    .get_mut(&role)
                    .and_then(|s| s.result.as_mut())
                    .ok_or_else(|| GridError::State(format!("result set of {role} is closed")))?;
                let more = row.is_some();
                if more {
                    rs.position += 1;
                }
                rs.row = row;
                rs.last_error = None;
                Ok(more)
            }
            Err(native) => {
                debug!(statement = %role, error = %native, "fetch failed");
                let err = conn.absorb(native).await;
                if let Some(rs) = conn
                    .statements
                    .get_mut(&role)
                    .and_then(|s| s.result.as_mut())
                {
                    rs.last_error = Some(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Number of rows fetched so far.
    pub fn position(&self) -> Result<u64, GridError> {
        Ok(self.state()?.position)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&GridError> {
        self.state().ok().and_then(|rs| rs.last_error.as_ref())
    }

    fn column(&self, index: usize) -> Result<&RowValues, GridError> {
        let row = self
            .state()?
            .row
            .as_ref()
            .ok_or_else(|| GridError::State("no current row".into()))?;
        row.get(index)
            .ok_or_else(|| GridError::Data(format!("column {index} out of range ({})", row.len())))
    }

    fn convert<T>(
        &self,
        index: usize,
        kind: &str,
        f: impl FnOnce(&RowValues) -> Option<T>,
    ) -> Result<T, GridError> {
        let value = self.column(index)?;
        f(value).ok_or_else(|| GridError::Data(format!("column {index} is not {kind}: {value:?}")))
    }

    pub fn get_int(&self, index: usize) -> Result<i32, GridError> {
        self.convert(index, "an integer", |v| {
            v.as_int().and_then(|n| i32::try_from(n).ok())
        })
    }

    pub fn get_long(&self, index: usize) -> Result<i64, GridError> {
        self.convert(index, "an integer", RowValues::as_int)
    }

    pub fn get_double(&self, index: usize) -> Result<f64, GridError> {
        self.convert(index, "a number", RowValues::as_float)
    }

    pub fn get_decimal(&self, index: usize) -> Result<Decimal, GridError> {
        self.convert(index, "a decimal", RowValues::as_decimal)
    }

    /// Text of the column; `None` for SQL NULL.
    pub fn get_string(&self, index: usize) -> Result<Option<String>, GridError> {
        let value = self.column(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_text()
            .map(Some)
            .ok_or_else(|| GridError::Data(format!("column {index} is not text: {value:?}")))
    }

    /// Whole current row.
    pub fn row(&self) -> Result<&[RowValues], GridError> {
        self.state()?
            .row
            .as_deref()
            .ok_or_else(|| GridError::State("no current row".into()))
    }

    /// Close the cursor. Native errors are ignored.
    pub async fn close(self) {
        self.conn.close_result_set(self.role).await;
    }
}
