//! Receipts service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, Money, TicketId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Request for one receipt; `idempotency_key` makes retries safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceiptRequest {
    pub ticket_id: TicketId,
    pub price: Money,
    /// Lets the service recognise a repeated request.
    pub idempotency_key: IdempotencyKey,
}

/// A receipt as issued by the receipts service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceiptResponse {
    pub receipt_number: String,
    pub issued_at: DateTime<Utc>,
}

/// Issues receipts for sold tickets.
#[async_trait]
pub trait ReceiptsService: Send + Sync {
    async fn issue_receipt(&self, request: IssueReceiptRequest) -> Result<IssueReceiptResponse>;
}

#[derive(Debug, Default)]
struct InMemoryReceiptsState {
    issued: Vec<IssueReceiptRequest>,
    by_key: HashMap<IdempotencyKey, IssueReceiptResponse>,
    fail_on_issue: bool,
}

/// In-memory receipts service. Honors idempotency keys like the real one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReceiptsService {
    state: Arc<Mutex<InMemoryReceiptsState>>,
}

impl InMemoryReceiptsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every call with a retryable error.
    pub fn set_fail_on_issue(&self, fail: bool) {
        self.state().fail_on_issue = fail;
    }

    /// Requests that created a receipt, in order.
    pub fn issued(&self) -> Vec<IssueReceiptRequest> {
        self.state().issued.clone()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryReceiptsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReceiptsService for InMemoryReceiptsService {
    async fn issue_receipt(&self, request: IssueReceiptRequest) -> Result<IssueReceiptResponse> {
        let mut state = self.state();

        if state.fail_on_issue {
            return Err(ServiceError::Unavailable("receipts service unavailable".to_string()));
        }
        if let Some(existing) = state.by_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let response = IssueReceiptResponse {
            receipt_number: format!("RCPT-{:04}", state.issued.len() + 1),
            issued_at: Utc::now(),
        };
        state
            .by_key
            .insert(request.idempotency_key.clone(), response.clone());
        state.issued.push(request);

        Ok(response)
    }
}
