//! # turnflow
//!
//! Streaming tool-call orchestration for LLM-driven agents.
//!
//! `turnflow` turns a model's free-form streamed text into validated,
//! deduplicated, retried invocations of external capabilities ("tools"),
//! tracks a strict conversational state machine across turns, and decides
//! when to resume the model with tool results versus surface a final
//! answer. Tools themselves and the network transport stay outside: tools
//! sit behind the [`ToolInvoker`] boundary, and text arrives through the
//! caller-fed chunk stream.
//!
//! # Architecture
//!
//! ```text
//!   chunks ──▶ ConversationStateMachine ──▶ Orchestrator
//!                                              │
//!                          ┌───────────────────┼─────────────────┐
//!                          ▼                   ▼                 ▼
//!                    parse (4 wire      CapabilityPolicy   ExecutionManager
//!                     encodings)         (plan/act gate)    (dedup, retry,
//!                                                           timeout)
//!                                                                │
//!                                                                ▼
//!                                                       dyn ToolInvoker
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use turnflow::{invoker_fn, CapabilityPolicy, EngineConfig, Mode, Orchestrator, TurnOutcome};
//!
//! # async fn example() {
//! let invoker = invoker_fn(|tool: String, _params: Value| async move {
//!     Ok(json!({ "invoked": tool }))
//! });
//! let mut engine = Orchestrator::new(
//!     Arc::new(invoker),
//!     CapabilityPolicy::with_builtins(),
//!     EngineConfig::default(),
//! );
//!
//! let turn = engine
//!     .process_turn(r#"Reading. {"tool":"get_code","params":{}}"#, Mode::Act)
//!     .await;
//! match turn.outcome {
//!     TurnOutcome::StartContinuation { .. } => { /* resume the model */ }
//!     TurnOutcome::Done => { /* surface turn.display_text */ }
//! }
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`call`] | Calls, call identity, results, plans |
//! | [`config`] | [`EngineConfig`] and per-turn output types |
//! | [`error`] | Unified [`EngineError`] with transience classification |
//! | [`exec`] | Execution registry and manager (dedup, retry, timeout) |
//! | [`invoker`] | The [`ToolInvoker`] boundary |
//! | [`orchestrator`] | The per-turn control loop |
//! | [`parse`] | Tool-call extraction across the wire encodings |
//! | [`policy`] | Plan/act capability gate |
//! | [`state`] | Conversation state machine |
//! | [`test_helpers`] | Queue-based [`MockInvoker`](test_helpers::MockInvoker) |

#![warn(missing_docs)]

pub mod call;
pub mod config;
pub mod error;
pub mod exec;
pub mod invoker;
pub mod orchestrator;
pub mod parse;
pub mod policy;
pub mod state;
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types nearly every program touches are re-exported at the
// crate root. Everything else lives in its submodule.

pub use call::{CallKey, Mode, Plan, PlanStep, PlanStepStatus, ToolCall, ToolResult};
pub use config::{ContinuationReason, EngineConfig, ProcessedTurn, TurnEvent, TurnOutcome};
pub use error::EngineError;
pub use exec::{CancelHandle, ExecutionManager, ExecutionRegistry};
pub use invoker::{invoker_fn, ToolInvoker};
pub use orchestrator::Orchestrator;
pub use policy::{CapabilityPolicy, ToolSpec};
pub use state::{ConversationState, ConversationStateMachine};
