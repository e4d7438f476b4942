//! Tabular `result-set` payload of Kea statistics commands

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Column holding the subnet a row belongs to
pub const SUBNET_ID_COLUMN: &str = "subnet-id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultSetError {
    #[error("result set has no {0} column")]
    MissingColumn(String),
}

/// `{"columns": [...], "rows": [[...], ...]}` as sent by Kea
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

/// A row that passed validation, with cells addressable by column name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow<'a> {
    cells: HashMap<&'a str, i64>,
}

impl ResultRow<'_> {
    pub fn get(&self, column: &str) -> Option<i64> {
        self.cells.get(column).copied()
    }
}

impl ResultSet {
    /// Rows whose cells match the declared columns
    ///
    /// The set must declare every column of `required`; the first one
    /// missing is reported. Rows with a different number of cells than
    /// columns, or with non-integer cells, are skipped.
    pub fn rows_with_columns(
        &self,
        required: &[&str],
    ) -> Result<Vec<ResultRow<'_>>, ResultSetError> {
        if let Some(missing) = required
            .iter()
            .find(|column| !self.columns.iter().any(|c| c == *column))
        {
            return Err(ResultSetError::MissingColumn(missing.to_string()));
        }

        let mut rows = Vec::with_capacity(self.rows.len());
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                warn!(
                    "skipping row {idx}: {} values for {} columns",
                    row.len(),
                    self.columns.len()
                );
                continue;
            }

            let cells: Option<HashMap<&str, i64>> = self
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| value.as_i64().map(|v| (column.as_str(), v)))
                .collect();

            match cells {
                Some(cells) => rows.push(ResultRow { cells }),
                None => warn!("skipping row {idx}: non-integer value"),
            }
        }
        Ok(rows)
    }
}
