//! Mock invoker for testing.
//!
//! [`MockInvoker`] is a queue-based fake tool boundary: tests control
//! exactly what each dispatch returns, without real tools. Every dispatch
//! records its `(tool_name, params)` pair for later assertion.
//!
//! # Usage
//!
//! ```rust
//! use serde_json::json;
//! use turnflow::invoker::ToolInvoker;
//! use turnflow::test_helpers::MockInvoker;
//!
//! # async fn example() {
//! let mock = MockInvoker::new();
//! mock.queue_ok(json!({"contents": "..."}));
//!
//! let out = mock.invoke("get_code", &json!({})).await.unwrap();
//! assert_eq!(mock.recorded().lock().unwrap().len(), 1);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::EngineError;
use crate::invoker::{InvokeFuture, ToolInvoker};

enum MockOutcome {
    Ok(Value),
    HttpErr { status: u16, message: String },
    NetworkErr { message: String },
    InvocationErr { message: String },
    /// Never resolves; exercises timeout and cancellation paths.
    Hang,
}

/// A queue-based mock tool boundary for unit and integration tests.
///
/// Push outcomes with the `queue_*` methods; each dispatch pops from the
/// front.
///
/// # Panics
///
/// [`invoke`](ToolInvoker::invoke) panics if the queue is empty.
#[derive(Default)]
pub struct MockInvoker {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    recorded: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockInvoker {
    /// An empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful result.
    pub fn queue_ok(&self, value: Value) {
        self.outcomes.lock().unwrap().push_back(MockOutcome::Ok(value));
    }

    /// Queues an HTTP failure with the given status.
    pub fn queue_err_status(&self, status: u16, message: impl Into<String>) {
        self.outcomes.lock().unwrap().push_back(MockOutcome::HttpErr {
            status,
            message: message.into(),
        });
    }

    /// Queues a transport-level network failure.
    pub fn queue_err_network(&self, message: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(MockOutcome::NetworkErr {
                message: message.into(),
            });
    }

    /// Queues a permanent invocation failure.
    pub fn queue_err_invocation(&self, message: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(MockOutcome::InvocationErr {
                message: message.into(),
            });
    }

    /// Queues a dispatch that never resolves.
    pub fn queue_hang(&self) {
        self.outcomes.lock().unwrap().push_back(MockOutcome::Hang);
    }

    /// Shared view of every `(tool_name, params)` dispatched so far. Clone
    /// the `Arc` before handing the mock to a manager.
    pub fn recorded(&self) -> Arc<Mutex<Vec<(String, Value)>>> {
        Arc::clone(&self.recorded)
    }
}

impl ToolInvoker for MockInvoker {
    fn invoke<'a>(&'a self, tool_name: &'a str, params: &'a Value) -> InvokeFuture<'a> {
        self.recorded
            .lock()
            .unwrap()
            .push((tool_name.to_string(), params.clone()));
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockInvoker queue is empty");
        Box::pin(async move {
            match outcome {
                MockOutcome::Ok(value) => Ok(value),
                MockOutcome::HttpErr { status, message } => Err(EngineError::Http {
                    status: http::StatusCode::from_u16(status).ok(),
                    message,
                }),
                MockOutcome::NetworkErr { message } => Err(EngineError::Network { message }),
                MockOutcome::InvocationErr { message } => {
                    Err(EngineError::Invocation { message })
                }
                MockOutcome::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_outcomes_pop_in_order() {
        let mock = MockInvoker::new();
        mock.queue_ok(json!(1));
        mock.queue_err_network("down");

        assert_eq!(mock.invoke("t", &json!({})).await.unwrap(), json!(1));
        assert!(mock.invoke("t", &json!({})).await.is_err());
        assert_eq!(mock.recorded().lock().unwrap().len(), 2);
    }
}
