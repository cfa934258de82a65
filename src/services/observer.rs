// Context observers
//
// Observers are notified about every dispatch: the first attempt, each
// retry with the reason that caused it, and the variant that finally
// completed the call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

use crate::error::DispatchError;
use crate::models::{OperationVariant, Signature};

pub trait ContextObserver: Send + Sync {
    fn will_call(&self, variant: &OperationVariant);

    /// `reason` is the retry reason given by the previously attempted variant
    fn will_retry(&self, variant: &OperationVariant, reason: &str);

    fn did_call(&self, variant: &OperationVariant, retries: u32);

    /// Called when a started call ends with an error
    fn did_fail(&self, _operation: &str, _error: &DispatchError) {}
}

/// Logs dispatch progress through tracing
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ContextObserver for LoggingObserver {
    fn will_call(&self, variant: &OperationVariant) {
        tracing::info!("calling {}({})", variant.operation, variant.signature);
    }

    fn will_retry(&self, variant: &OperationVariant, reason: &str) {
        tracing::info!(
            "retry {}({}), reason: {}",
            variant.operation,
            variant.signature,
            reason
        );
    }

    fn did_call(&self, variant: &OperationVariant, retries: u32) {
        if retries == 0 {
            tracing::debug!("called {}({})", variant.operation, variant.signature);
        } else {
            tracing::debug!(
                "called {}({}) with {} retries",
                variant.operation,
                variant.signature,
                retries
            );
        }
    }

    fn did_fail(&self, operation: &str, error: &DispatchError) {
        tracing::warn!("operation {} failed: {}", operation, error);
    }
}

/// One completed call as seen by `CollectingObserver`
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub operation: String,
    pub variant: String,
    pub signature: Signature,
    pub retries: u32,
    /// Abandoned variants and the reason each gave, in attempt order
    pub tried: Vec<(String, String)>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CollectingState {
    history: Vec<CallRecord>,
    /// Label of the variant being attempted per nesting level
    current: Vec<String>,
    tried: Vec<Vec<(String, String)>>,
}

/// Keeps a history of completed calls, useful for tests and inspection
///
/// Nested calls are tracked as a stack, so one observer instance should
/// watch one caller at a time. See `OperationContext::with_observer`.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    state: Mutex<CollectingState>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<CallRecord> {
        self.state
            .lock()
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }
}

impl ContextObserver for CollectingObserver {
    fn will_call(&self, variant: &OperationVariant) {
        if let Ok(mut state) = self.state.lock() {
            state.current.push(variant.label());
            state.tried.push(Vec::new());
        }
    }

    fn will_retry(&self, variant: &OperationVariant, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            let previous = state.current.pop().unwrap_or_default();
            if let Some(tried) = state.tried.last_mut() {
                tried.push((previous, reason.to_string()));
            }
            state.current.push(variant.label());
        }
    }

    fn did_call(&self, variant: &OperationVariant, retries: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.current.pop();
            let tried = state.tried.pop().unwrap_or_default();
            state.history.push(CallRecord {
                operation: variant.operation.clone(),
                variant: variant.label(),
                signature: variant.signature.clone(),
                retries,
                tried,
                completed_at: Utc::now(),
            });
        }
    }

    fn did_fail(&self, _operation: &str, _error: &DispatchError) {
        if let Ok(mut state) = self.state.lock() {
            state.current.pop();
            state.tried.pop();
        }
    }
}
