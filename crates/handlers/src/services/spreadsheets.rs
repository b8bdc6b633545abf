//! Spreadsheets API trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{Result, ServiceError};

/// Shared spreadsheets used as operator worklists.
#[async_trait]
pub trait SpreadsheetsApi: Send + Sync {
    /// Appends `row` to the sheet named `sheet`. Not idempotent.
    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemorySpreadsheetsState {
    sheets: HashMap<String, Vec<Vec<String>>>,
    fail_on_append: bool,
}

/// In-memory spreadsheets for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpreadsheets {
    state: Arc<Mutex<InMemorySpreadsheetsState>>,
}

impl InMemorySpreadsheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append fail until reset.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.state().fail_on_append = fail;
    }

    /// Rows appended to `sheet`, oldest first.
    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        self.state().sheets.get(sheet).cloned().unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, InMemorySpreadsheetsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SpreadsheetsApi for InMemorySpreadsheets {
    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<()> {
        let mut state = self.state();
        if state.fail_on_append {
            return Err(ServiceError::Unavailable("spreadsheets unavailable".to_string()));
        }
        state.sheets.entry(sheet.to_string()).or_default().push(row);
        Ok(())
    }
}
