//! Tool execution: registry, at-most-once dispatch, retry, timeout.
//!
//! [`ExecutionRegistry`] is the arena every call moves through: three
//! disjoint collections keyed by [`CallKey`], with movement strictly
//! `pending -> executing -> completed` and no eviction from `completed`
//! for the life of the conversation. Keying by identity rather than
//! position is what makes at-most-once execution and idempotent replay
//! hold even under duplicate or out-of-order notifications.
//!
//! [`ExecutionManager`] is the only component permitted to move calls
//! between collections. It validates, dispatches through the
//! [`ToolInvoker`] boundary under a deadline, retries transient failures,
//! and buffers [`TurnEvent`]s for the caller to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;

use crate::call::{CallKey, Mode, PlanStep, PlanStepStatus, ToolCall, ToolResult};
use crate::config::{EngineConfig, TurnEvent};
use crate::error::EngineError;
use crate::invoker::ToolInvoker;
use crate::policy::CapabilityPolicy;

// ── Registry ──────────────────────────────────────────────────────────────

/// Key-addressed call arena. A key exists in at most one collection at any
/// instant.
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    pending: HashMap<CallKey, ToolCall>,
    executing: HashMap<CallKey, ToolCall>,
    completed: HashMap<CallKey, ToolResult>,
    completed_this_turn: usize,
}

impl ExecutionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls parsed but not yet dispatched.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of calls dispatched and awaiting an outcome.
    pub fn executing_count(&self) -> usize {
        self.executing.len()
    }

    /// `|pending| + |executing|` — the state machine's recompute input.
    pub fn in_flight(&self) -> usize {
        self.pending.len() + self.executing.len()
    }

    /// Calls completed since the last [`begin_turn`](Self::begin_turn).
    pub fn completed_this_turn(&self) -> usize {
        self.completed_this_turn
    }

    /// Whether `key` exists in any collection.
    pub fn contains(&self, key: &CallKey) -> bool {
        self.pending.contains_key(key)
            || self.executing.contains_key(key)
            || self.completed.contains_key(key)
    }

    /// The stored terminal result for `key`, if it completed.
    pub fn result(&self, key: &CallKey) -> Option<&ToolResult> {
        self.completed.get(key)
    }

    /// Whether `key` is currently executing.
    pub fn is_executing(&self, key: &CallKey) -> bool {
        self.executing.contains_key(key)
    }

    /// Resets the per-turn completion counter.
    pub fn begin_turn(&mut self) {
        self.completed_this_turn = 0;
    }

    /// Admits a call into `pending` unless its key exists anywhere already.
    /// Returns whether the call was admitted.
    pub fn admit(&mut self, call: ToolCall) -> bool {
        let key = call.key();
        if self.contains(&key) {
            return false;
        }
        self.pending.insert(key, call);
        true
    }

    /// Moves `key` from `pending` to `executing`. Must happen before the
    /// dispatch it covers, closing the validate/dispatch race window.
    fn mark_executing(&mut self, key: &CallKey) {
        if let Some(call) = self.pending.remove(key) {
            self.executing.insert(key.clone(), call);
        }
    }

    /// Moves `key` out of `executing` (or `pending`, for validation
    /// failures) into `completed` and stores the terminal result.
    fn record_completed(&mut self, key: CallKey, result: ToolResult) {
        self.executing.remove(&key);
        self.pending.remove(&key);
        self.completed.insert(key, result);
        self.completed_this_turn += 1;
    }
}

// ── Manager ───────────────────────────────────────────────────────────────

/// Handle for cancelling in-flight execution. Clonable; cancellation is
/// "stop waiting", not "undo" — calls that reached `executing` stay there.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Wakes any in-flight dispatch with [`EngineError::Cancelled`].
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// What preflight decided for one call.
enum Preflight {
    /// Already completed; replay the stored result without dispatching.
    Replay(ToolResult),
    /// Already executing; never run the same semantic call twice at once.
    Duplicate,
    /// Validation failed; the failed result is already recorded.
    Rejected(ToolResult),
    /// Validated and moved to `executing`; dispatch may proceed.
    Dispatch,
}

/// Validates, dispatches, retries, and records tool calls.
pub struct ExecutionManager {
    registry: ExecutionRegistry,
    policy: CapabilityPolicy,
    invoker: Arc<dyn ToolInvoker>,
    config: EngineConfig,
    events: Vec<TurnEvent>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExecutionManager {
    /// Creates a manager over `invoker` with the given policy and config.
    pub fn new(invoker: Arc<dyn ToolInvoker>, policy: CapabilityPolicy, config: EngineConfig) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            registry: ExecutionRegistry::new(),
            policy,
            invoker,
            config,
            events: Vec::new(),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Read access to the registry (for the state machine's recompute).
    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// The capability policy, for registering discovered tools.
    pub fn policy_mut(&mut self) -> &mut CapabilityPolicy {
        &mut self.policy
    }

    /// A handle that cancels any in-flight dispatch.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Clears a previous cancellation and the per-turn counters.
    pub fn begin_turn(&mut self) {
        self.cancel_tx.send_replace(false);
        self.registry.begin_turn();
    }

    /// Drains the buffered events in emission order.
    pub fn drain_events(&mut self) -> Vec<TurnEvent> {
        std::mem::take(&mut self.events)
    }

    /// Executes one call with at-most-once semantics.
    ///
    /// Replays the stored result if the key already completed. Rejects with
    /// [`EngineError::DuplicateCall`] if the key is mid-execution. A
    /// validation failure is recorded as a failed result and returned `Ok`
    /// — it is terminal, never retried. Cancellation mid-dispatch returns
    /// [`EngineError::Cancelled`] and leaves the call in `executing` with
    /// nothing recorded. Exactly one dispatch attempt is made; use
    /// [`execute_serial_with_retry`](Self::execute_serial_with_retry) for
    /// retry semantics.
    pub async fn execute(&mut self, call: ToolCall, mode: Mode) -> Result<ToolResult, EngineError> {
        let key = call.key();
        match self.preflight(&call, &key, mode) {
            Preflight::Replay(result) => return Ok(result),
            Preflight::Duplicate => {
                return Err(EngineError::DuplicateCall {
                    key: key.to_string(),
                });
            }
            Preflight::Rejected(result) => return Ok(result),
            Preflight::Dispatch => {}
        }

        let attempt_start = Instant::now();
        self.events.push(TurnEvent::ToolExecutionStart {
            tool_name: call.tool_name.clone(),
            attempt: 1,
        });
        let outcome = self.dispatch(&call).await;

        // Cancellation is "stop waiting", not "undo": the call stays in
        // `executing` and nothing is recorded. A forged failure in
        // `completed` would poison every future replay of this key.
        if matches!(outcome, Err(EngineError::Cancelled)) {
            self.events.push(TurnEvent::TurnCancelled);
            return Err(EngineError::Cancelled);
        }

        let result = self.finish_attempt(&call, attempt_start, outcome);
        self.registry.record_completed(key, result.clone());
        Ok(result)
    }

    /// Executes `calls` strictly one at a time, in order — a later call may
    /// depend on the effects of an earlier one. Each dispatch runs under
    /// [`EngineConfig::tool_timeout`]; transient failures retry up to
    /// [`EngineConfig::max_retries`] times with no backoff. A failing call
    /// never aborts its siblings. A call whose key is already executing is
    /// dropped from the batch without producing a result.
    ///
    /// `plan_steps`, when supplied, is aligned positionally with `calls`
    /// and receives `pending -> in-progress -> completed|failed` status
    /// transitions as a side channel.
    pub async fn execute_serial_with_retry(
        &mut self,
        calls: Vec<ToolCall>,
        mode: Mode,
        mut plan_steps: Option<&mut [PlanStep]>,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());

        for (index, call) in calls.into_iter().enumerate() {
            if self.is_cancelled() {
                self.events.push(TurnEvent::TurnCancelled);
                break;
            }
            // Duplicate-while-executing is dropped, not surfaced: it must
            // never appear in the batch results or the model-visible
            // summary.
            let key = call.key();
            if self.registry.is_executing(&key) {
                self.events.push(TurnEvent::CallDeduplicated { key });
                continue;
            }

            if let Some(steps) = plan_steps.as_deref_mut() {
                if let Some(step) = steps.get_mut(index) {
                    step.status = PlanStepStatus::InProgress;
                }
            }

            let result = match self.preflight(&call, &key, mode) {
                Preflight::Replay(result) => result,
                Preflight::Duplicate => continue,
                Preflight::Rejected(result) => result,
                Preflight::Dispatch => match self.dispatch_with_retry(&call).await {
                    Some(result) => {
                        self.registry.record_completed(key, result.clone());
                        result
                    }
                    // Cancelled mid-dispatch: the call stays in `executing`,
                    // nothing is recorded, and the batch stops.
                    None => {
                        self.events.push(TurnEvent::TurnCancelled);
                        break;
                    }
                },
            };

            if let Some(steps) = plan_steps.as_deref_mut() {
                if let Some(step) = steps.get_mut(index) {
                    step.status = if result.success {
                        PlanStepStatus::Completed
                    } else {
                        PlanStepStatus::Failed
                    };
                }
            }
            results.push(result);
        }

        results
    }

    /// Builds the bounded text digest fed back to the model for the next
    /// turn. Successes are serialized and truncated to the configured
    /// budget; failures carry the error text verbatim. A call with no
    /// recorded result is skipped and logged — it indicates an invariant
    /// violation upstream.
    pub fn results_summary(&self, calls: &[ToolCall]) -> String {
        let mut summary = String::from("Tool results:\n");
        for call in calls {
            let key = call.key();
            let Some(result) = self.registry.result(&key) else {
                tracing::warn!(tool = %call.tool_name, %key, "call has no recorded result");
                continue;
            };
            if result.success {
                let serialized = result
                    .result
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default();
                let rendered = truncate_to(&serialized, self.config.summary_char_budget);
                summary.push_str(&format!("- {}: {}\n", call.tool_name, rendered));
            } else {
                let error = result.error.as_deref().unwrap_or("unknown error");
                summary.push_str(&format!("- {}: ERROR: {}\n", call.tool_name, error));
            }
        }
        summary
    }

    // ── Internal phases ───────────────────────────────────────────────────

    /// Steps 1–4 of single-call execution: replay, duplicate rejection,
    /// validation, and the atomic `pending -> executing` move.
    fn preflight(&mut self, call: &ToolCall, key: &CallKey, mode: Mode) -> Preflight {
        if let Some(result) = self.registry.result(key) {
            self.events.push(TurnEvent::CallReplayedFromCache { key: key.clone() });
            return Preflight::Replay(result.clone());
        }
        if self.registry.is_executing(key) {
            return Preflight::Duplicate;
        }

        if let Err(err) = self.policy.validate_call(call, mode) {
            let reason = match &err {
                EngineError::Validation { reason, .. } => reason.clone(),
                other => other.to_string(),
            };
            tracing::debug!(tool = %call.tool_name, %reason, "call failed validation");
            self.events.push(TurnEvent::ValidationFailed {
                tool_name: call.tool_name.clone(),
                reason: reason.clone(),
            });
            let result = ToolResult::failed(&call.tool_name, reason);
            self.registry.record_completed(key.clone(), result.clone());
            return Preflight::Rejected(result);
        }

        self.registry.admit(call.clone());
        self.registry.mark_executing(key);
        Preflight::Dispatch
    }

    /// One cancel-aware, deadline-bound dispatch through the invoker.
    async fn dispatch(&self, call: &ToolCall) -> Result<Value, EngineError> {
        let mut cancel = self.cancel_rx.clone();
        let deadline = self.config.tool_timeout;
        tokio::select! {
            _ = cancel.wait_for(|cancelled| *cancelled) => Err(EngineError::Cancelled),
            outcome = tokio::time::timeout(deadline, self.invoker.invoke(&call.tool_name, &call.params)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout {
                        elapsed_ms: deadline.as_millis() as u64,
                    }),
                }
            }
        }
    }

    /// Attempt loop: dispatch, retry transient failures up to the limit.
    /// Returns `None` only for cancellation.
    async fn dispatch_with_retry(&mut self, call: &ToolCall) -> Option<ToolResult> {
        let max_attempts = 1 + self.config.max_retries;
        let mut attempt = 1;
        loop {
            let attempt_start = Instant::now();
            self.events.push(TurnEvent::ToolExecutionStart {
                tool_name: call.tool_name.clone(),
                attempt,
            });
            let outcome = self.dispatch(call).await;

            if matches!(outcome, Err(EngineError::Cancelled)) {
                return None;
            }
            let retry = matches!(&outcome, Err(err) if err.is_transient())
                && attempt < max_attempts;
            let result = self.finish_attempt(call, attempt_start, outcome);
            if !retry {
                return Some(result);
            }
            tracing::debug!(
                tool = %call.tool_name,
                attempt,
                "transient failure, retrying"
            );
            attempt += 1;
        }
    }

    /// Converts a dispatch outcome into a [`ToolResult`] and emits the end
    /// event.
    fn finish_attempt(
        &mut self,
        call: &ToolCall,
        started: Instant,
        outcome: Result<Value, EngineError>,
    ) -> ToolResult {
        let result = match outcome {
            Ok(value) => ToolResult::ok(&call.tool_name, value),
            Err(err) => ToolResult::failed(&call.tool_name, err.to_string()),
        };
        self.events.push(TurnEvent::ToolExecutionEnd {
            tool_name: call.tool_name.clone(),
            success: result.success,
            duration: started.elapsed(),
        });
        result
    }
}

fn truncate_to(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let kept: String = text.chars().take(budget).collect();
    format!("{kept}… [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockInvoker;
    use serde_json::json;
    use std::time::Duration;

    fn manager(invoker: MockInvoker) -> ExecutionManager {
        let config = EngineConfig {
            tool_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        ExecutionManager::new(Arc::new(invoker), CapabilityPolicy::with_builtins(), config)
    }

    #[tokio::test]
    async fn test_execute_success_moves_to_completed() {
        let invoker = MockInvoker::new();
        invoker.queue_ok(json!({"contents": "fn main() {}"}));
        let mut mgr = manager(invoker);

        let call = ToolCall::new("get_code", json!({}), "");
        let result = mgr.execute(call.clone(), Mode::Act).await.unwrap();
        assert!(result.success);
        assert_eq!(mgr.registry().in_flight(), 0);
        assert_eq!(mgr.registry().completed_this_turn(), 1);
        assert!(mgr.registry().result(&call.key()).is_some());
    }

    #[tokio::test]
    async fn test_execute_replays_without_second_dispatch() {
        let invoker = MockInvoker::new();
        invoker.queue_ok(json!("first"));
        let recorded = invoker.recorded();
        let mut mgr = manager(invoker);

        let call = ToolCall::new("get_code", json!({"path": "a.rs"}), "");
        let first = mgr.execute(call.clone(), Mode::Act).await.unwrap();
        let second = mgr.execute(call, Mode::Act).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_recorded_not_dispatched() {
        let invoker = MockInvoker::new();
        let recorded = invoker.recorded();
        let mut mgr = manager(invoker);

        let call = ToolCall::new("modify_code", json!({}), "");
        let result = mgr.execute(call.clone(), Mode::Act).await.unwrap();
        assert!(!result.success);
        assert!(recorded.lock().unwrap().is_empty());
        // Terminal: a replay returns the same failure without dispatching.
        let replay = mgr.execute(call, Mode::Act).await.unwrap();
        assert_eq!(result, replay);
    }

    #[tokio::test]
    async fn test_policy_block_in_plan_mode() {
        let invoker = MockInvoker::new();
        let mut mgr = manager(invoker);

        let call = ToolCall::new("modify_code", json!({"code": "x"}), "");
        let result = mgr.execute(call, Mode::Plan).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("plan mode"));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let invoker = MockInvoker::new();
        invoker.queue_err_status(500, "upstream exploded");
        invoker.queue_ok(json!("recovered"));
        let recorded = invoker.recorded();
        let mut mgr = manager(invoker);

        let call = ToolCall::new("get_code", json!({}), "");
        let results = mgr
            .execute_serial_with_retry(vec![call], Mode::Act, None)
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(recorded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_double_timeout_yields_terminal_failure_after_two_attempts() {
        let invoker = MockInvoker::new();
        invoker.queue_hang();
        invoker.queue_hang();
        let recorded = invoker.recorded();
        let config = EngineConfig {
            tool_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let mut mgr =
            ExecutionManager::new(Arc::new(invoker), CapabilityPolicy::with_builtins(), config);

        let call = ToolCall::new("get_code", json!({}), "");
        let results = mgr
            .execute_serial_with_retry(vec![call], Mode::Act, None)
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.as_ref().unwrap().contains("timed out"));
        assert_eq!(recorded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let invoker = MockInvoker::new();
        invoker.queue_err_status(404, "no such document");
        let recorded = invoker.recorded();
        let mut mgr = manager(invoker);

        let call = ToolCall::new("get_code", json!({}), "");
        let results = mgr
            .execute_serial_with_retry(vec![call], Mode::Act, None)
            .await;
        assert!(!results[0].success);
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_call_does_not_abort_siblings() {
        let invoker = MockInvoker::new();
        invoker.queue_err_status(400, "bad params");
        invoker.queue_ok(json!("second fine"));
        let mut mgr = manager(invoker);

        let calls = vec![
            ToolCall::new("get_code", json!({"path": "a"}), ""),
            ToolCall::new("get_code", json!({"path": "b"}), ""),
        ];
        let results = mgr.execute_serial_with_retry(calls, Mode::Act, None).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_serial_ordering() {
        let invoker = MockInvoker::new();
        invoker.queue_ok(json!("a"));
        invoker.queue_ok(json!("b"));
        let recorded = invoker.recorded();
        let mut mgr = manager(invoker);

        let calls = vec![
            ToolCall::new("get_code", json!({"path": "a"}), ""),
            ToolCall::new("get_code", json!({"path": "b"}), ""),
        ];
        mgr.execute_serial_with_retry(calls, Mode::Act, None).await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].1, json!({"path": "a"}));
        assert_eq!(recorded[1].1, json!({"path": "b"}));
    }

    #[tokio::test]
    async fn test_plan_step_side_channel() {
        let invoker = MockInvoker::new();
        invoker.queue_ok(json!("ok"));
        invoker.queue_err_status(403, "forbidden");
        let mut mgr = manager(invoker);

        let mut steps = vec![
            PlanStep {
                id: "p-1".into(),
                number: 1,
                description: "read".into(),
                status: PlanStepStatus::Pending,
            },
            PlanStep {
                id: "p-2".into(),
                number: 2,
                description: "fetch".into(),
                status: PlanStepStatus::Pending,
            },
        ];
        let calls = vec![
            ToolCall::new("get_code", json!({"path": "a"}), ""),
            ToolCall::new("web_fetch", json!({"url": "u"}), ""),
        ];
        mgr.execute_serial_with_retry(calls, Mode::Act, Some(&mut steps))
            .await;
        assert_eq!(steps[0].status, PlanStepStatus::Completed);
        assert_eq!(steps[1].status, PlanStepStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_batch_without_forging_completion() {
        let invoker = MockInvoker::new();
        invoker.queue_hang();
        let config = EngineConfig {
            tool_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let mut mgr =
            ExecutionManager::new(Arc::new(invoker), CapabilityPolicy::with_builtins(), config);

        let handle = mgr.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let call = ToolCall::new("get_code", json!({}), "");
        let key = call.key();
        let results = mgr
            .execute_serial_with_retry(vec![call], Mode::Act, None)
            .await;
        assert!(results.is_empty());
        assert!(mgr.registry().is_executing(&key));
        assert!(mgr.registry().result(&key).is_none());
    }

    #[tokio::test]
    async fn test_execute_cancel_never_records_a_completion() {
        let invoker = MockInvoker::new();
        invoker.queue_hang();
        let config = EngineConfig {
            tool_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let mut mgr =
            ExecutionManager::new(Arc::new(invoker), CapabilityPolicy::with_builtins(), config);

        let handle = mgr.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let call = ToolCall::new("get_code", json!({}), "");
        let key = call.key();
        let err = mgr.execute(call.clone(), Mode::Act).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));

        // The key must not be poisoned: nothing in `completed`, the call
        // still in `executing`, and the per-turn counter untouched.
        assert!(mgr.registry().result(&key).is_none());
        assert!(mgr.registry().is_executing(&key));
        assert_eq!(mgr.registry().completed_this_turn(), 0);

        // A replay while the key is still executing is rejected as a
        // duplicate rather than answered with a forged failure.
        mgr.begin_turn();
        let err = mgr.execute(call, Mode::Act).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateCall { .. }));
    }

    #[tokio::test]
    async fn test_batch_skips_call_stuck_in_executing() {
        let invoker = MockInvoker::new();
        invoker.queue_hang();
        invoker.queue_ok(json!("sibling fine"));
        let config = EngineConfig {
            tool_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let mut mgr =
            ExecutionManager::new(Arc::new(invoker), CapabilityPolicy::with_builtins(), config);

        // Strand a key in `executing` by cancelling its dispatch.
        let stuck = ToolCall::new("get_code", json!({"path": "a"}), "");
        let handle = mgr.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let _ = mgr.execute(stuck.clone(), Mode::Act).await;
        assert!(mgr.registry().is_executing(&stuck.key()));

        // A later batch re-emitting the stuck call drops it silently; the
        // sibling still runs and no fabricated failure reaches the results.
        mgr.begin_turn();
        let sibling = ToolCall::new("get_code", json!({"path": "b"}), "");
        let results = mgr
            .execute_serial_with_retry(vec![stuck.clone(), sibling], Mode::Act, None)
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let events = mgr.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::CallDeduplicated { key } if *key == stuck.key())));
    }

    #[tokio::test]
    async fn test_results_summary_truncates_and_reports_errors() {
        let invoker = MockInvoker::new();
        invoker.queue_ok(json!("x".repeat(100)));
        invoker.queue_err_status(404, "missing");
        let config = EngineConfig {
            summary_char_budget: 40,
            ..Default::default()
        };
        let mut mgr =
            ExecutionManager::new(Arc::new(invoker), CapabilityPolicy::with_builtins(), config);

        let calls = vec![
            ToolCall::new("get_code", json!({"path": "a"}), ""),
            ToolCall::new("get_code", json!({"path": "b"}), ""),
        ];
        mgr.execute_serial_with_retry(calls.clone(), Mode::Act, None)
            .await;
        let summary = mgr.results_summary(&calls);
        assert!(summary.contains("… [truncated]"));
        assert!(summary.contains("ERROR: "));
        assert!(summary.contains("missing"));
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let invoker = MockInvoker::new();
        invoker.queue_ok(json!("ok"));
        let mut mgr = manager(invoker);

        let call = ToolCall::new("get_code", json!({}), "");
        mgr.execute(call, Mode::Act).await.unwrap();
        let events = mgr.drain_events();
        assert!(matches!(
            events[0],
            TurnEvent::ToolExecutionStart { attempt: 1, .. }
        ));
        assert!(matches!(
            events[1],
            TurnEvent::ToolExecutionEnd { success: true, .. }
        ));
        assert!(mgr.drain_events().is_empty());
    }
}
