//! The per-turn control loop.
//!
//! [`Orchestrator`] consumes one finished model turn and drives everything
//! else: the idempotence gate, mode-specific parsing, deduplication,
//! display-text extraction, serial execution, and the decision between
//! ending the interaction and requesting a continuation turn seeded with
//! tool results. This is the mechanism by which one user request becomes a
//! multi-turn tool-use loop without new user input.
//!
//! # Turn lifecycle
//!
//! ```rust,no_run
//! # async fn example() {
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use turnflow::call::Mode;
//! use turnflow::config::EngineConfig;
//! use turnflow::invoker::invoker_fn;
//! use turnflow::orchestrator::Orchestrator;
//! use turnflow::policy::CapabilityPolicy;
//!
//! let invoker = invoker_fn(|_tool: String, _params: Value| async move {
//!     Ok(json!({"ok": true}))
//! });
//! let mut engine = Orchestrator::new(
//!     Arc::new(invoker),
//!     CapabilityPolicy::with_builtins(),
//!     EngineConfig::default(),
//! );
//!
//! engine.begin_stream();
//! engine.push_chunk("Reading code.\n");
//! engine.push_chunk(r#"{"tool":"get_code","params":{}}"#);
//! let _processed = engine.finish_stream(Mode::Act).await;
//! # }
//! ```

use std::sync::Arc;

use crate::call::{Mode, Plan, ProcessedHashes, ToolCall};
use crate::config::{ContinuationReason, EngineConfig, ProcessedTurn, TurnEvent, TurnOutcome};
use crate::exec::{CancelHandle, ExecutionManager};
use crate::invoker::ToolInvoker;
use crate::parse::{self, ContractParse, NextAction};
use crate::policy::CapabilityPolicy;
use crate::state::{ConversationState, ConversationStateMachine};

/// Placeholder shown when a turn produced a plan but no prose.
const PLAN_PLACEHOLDER: &str = "A plan was created; review and execute.";

/// Shown when the correction budget is exhausted.
const CORRECTIONS_EXHAUSTED: &str =
    "The response could not be interpreted after repeated format corrections.";

/// What the mode-specific parse phase produced.
struct ParsedTurn {
    display_text: String,
    calls: Vec<ToolCall>,
    plan_update: Option<Plan>,
    /// Set when the turn must resolve immediately (contract correction or
    /// exhausted correction budget).
    short_circuit: Option<TurnOutcome>,
}

/// Top-level engine: one instance per conversation.
pub struct Orchestrator {
    manager: ExecutionManager,
    state: ConversationStateMachine,
    processed: ProcessedHashes,
    active_plan: Option<Plan>,
    corrections_used: u32,
    config: EngineConfig,
}

impl Orchestrator {
    /// Creates an engine dispatching through `invoker` under `policy`.
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        policy: CapabilityPolicy,
        config: EngineConfig,
    ) -> Self {
        Self {
            manager: ExecutionManager::new(invoker, policy, config.clone()),
            state: ConversationStateMachine::new(),
            processed: ProcessedHashes::new(),
            active_plan: None,
            corrections_used: 0,
            config,
        }
    }

    /// The current conversation state.
    pub fn state(&self) -> ConversationState {
        self.state.state()
    }

    /// The plan stored by the most recent plan-mode turn, if any.
    pub fn active_plan(&self) -> Option<&Plan> {
        self.active_plan.as_ref()
    }

    /// The execution manager, for direct batch execution against the
    /// active plan's steps.
    pub fn manager_mut(&mut self) -> &mut ExecutionManager {
        &mut self.manager
    }

    /// A handle that cancels the active turn: any in-flight dispatch wakes
    /// with a cancellation error, the state machine resets to `Idle`, and
    /// no in-flight call is marked completed.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.manager.cancel_handle()
    }

    // ── Streaming surface ─────────────────────────────────────────────────

    /// Begins accumulating a new turn.
    pub fn begin_stream(&mut self) {
        self.state.start_streaming();
    }

    /// Appends one streamed chunk.
    pub fn push_chunk(&mut self, text: &str) {
        self.state.add_chunk(text);
    }

    /// Ends the stream and processes the assembled turn.
    pub async fn finish_stream(&mut self, mode: Mode) -> ProcessedTurn {
        let text = self.state.buffer().to_string();
        self.process_turn(&text, mode).await
    }

    // ── Turn processing ───────────────────────────────────────────────────

    /// Processes one fully-assembled model turn.
    pub async fn process_turn(&mut self, text: &str, mode: Mode) -> ProcessedTurn {
        // Idempotence gate: the hash is recorded before any side effects so
        // a duplicate "stream ended" notification for the same content is a
        // no-op.
        if !self.processed.record(text) {
            tracing::debug!("turn content already processed, skipping");
            self.state.end_streaming(
                self.manager.registry().in_flight(),
                self.manager.registry().completed_this_turn(),
            );
            return ProcessedTurn::done_with_events(
                String::new(),
                vec![TurnEvent::TurnAlreadyProcessed],
            );
        }

        self.manager.begin_turn();
        let mut events = Vec::new();

        let parsed = match mode {
            Mode::Plan => self.parse_plan_turn(text, &mut events),
            Mode::Act => self.parse_act_turn(text, &mut events),
        };

        if let Some(plan) = &parsed.plan_update {
            self.active_plan = Some(plan.clone());
        }

        if let Some(outcome) = parsed.short_circuit {
            self.finish_state();
            return ProcessedTurn {
                display_text: parsed.display_text,
                events,
                plan_update: parsed.plan_update,
                outcome,
            };
        }

        // Dedup against the whole registry. Keys already completed are
        // replayed from cache; keys still in flight are dropped.
        let mut new_calls = Vec::new();
        let mut cached_calls = Vec::new();
        for call in parsed.calls {
            let key = call.key();
            if self.manager.registry().result(&key).is_some() {
                events.push(TurnEvent::CallReplayedFromCache { key });
                cached_calls.push(call);
            } else if self.manager.registry().is_executing(&key) {
                events.push(TurnEvent::CallDeduplicated { key });
            } else {
                new_calls.push(call);
            }
        }

        let mut display_text = parsed.display_text;
        if display_text.is_empty() && parsed.plan_update.is_some() {
            display_text = PLAN_PLACEHOLDER.to_string();
        }

        let outcome = if !new_calls.is_empty() {
            self.state.transition_to(ConversationState::ToolDetected);
            self.state.transition_to(ConversationState::ToolExecuting);

            let executed = self.manager
                .execute_serial_with_retry(new_calls.clone(), mode, None)
                .await;
            events.extend(self.manager.drain_events());

            if self.manager.is_cancelled() {
                self.state.force_idle();
                return ProcessedTurn {
                    display_text,
                    events,
                    plan_update: parsed.plan_update,
                    outcome: TurnOutcome::Done,
                };
            }

            // Summarize everything this turn touched, cached replays
            // included, so the continuation sees a complete picture.
            let mut summarized = new_calls;
            summarized.truncate(executed.len());
            summarized.extend(cached_calls);
            TurnOutcome::StartContinuation {
                context: self.manager.results_summary(&summarized),
                reason: ContinuationReason::ToolResults,
            }
        } else if !cached_calls.is_empty() {
            // The model re-emitted calls that already completed. Feed the
            // cached results back to nudge it toward a final answer.
            TurnOutcome::StartContinuation {
                context: self.manager.results_summary(&cached_calls),
                reason: ContinuationReason::CachedResults,
            }
        } else {
            TurnOutcome::Done
        };

        self.finish_state();
        if matches!(outcome, TurnOutcome::StartContinuation { .. }) {
            self.state.transition_to(ConversationState::AwaitingFollowup);
        }

        ProcessedTurn {
            display_text,
            events,
            plan_update: parsed.plan_update,
            outcome,
        }
    }

    /// Plan mode: look for a plan payload, then scan the legacy encodings
    /// for investigation tool calls. Policy blocks anything mutating.
    fn parse_plan_turn(&mut self, text: &str, events: &mut Vec<TurnEvent>) -> ParsedTurn {
        let plan_update = parse::parse_plan(text);
        if let Some(plan) = &plan_update {
            events.push(TurnEvent::PlanStored {
                plan_id: plan.id.clone(),
                steps: plan.steps.len(),
            });
        }
        ParsedTurn {
            display_text: parse::strip_tool_calls(text),
            calls: parse::extract_calls(text),
            plan_update,
            short_circuit: None,
        }
    }

    /// Act mode: strict contract first; `NotStructured` falls back to the
    /// legacy free-text encodings, `Invalid` escalates into a corrective
    /// continuation.
    fn parse_act_turn(&mut self, text: &str, events: &mut Vec<TurnEvent>) -> ParsedTurn {
        match parse::classify_contract(text) {
            ContractParse::Valid(response) => {
                // A valid turn restores the correction budget: the cap
                // bounds consecutive violations, not a whole conversation.
                self.corrections_used = 0;
                ParsedTurn {
                    display_text: response.comment,
                    calls: match response.next_action {
                        NextAction::Tool => response.tool_call.into_iter().collect(),
                        NextAction::Final => Vec::new(),
                    },
                    plan_update: None,
                    short_circuit: None,
                }
            }
            ContractParse::Invalid { reason } => {
                events.push(TurnEvent::ContractViolated {
                    reason: reason.clone(),
                });
                self.corrections_used += 1;
                if self.corrections_used > self.config.max_corrections {
                    tracing::warn!(
                        used = self.corrections_used,
                        "correction budget exhausted, ending turn"
                    );
                    return ParsedTurn {
                        display_text: CORRECTIONS_EXHAUSTED.to_string(),
                        calls: Vec::new(),
                        plan_update: None,
                        short_circuit: Some(TurnOutcome::Done),
                    };
                }
                ParsedTurn {
                    display_text: String::new(),
                    calls: Vec::new(),
                    plan_update: None,
                    short_circuit: Some(TurnOutcome::StartContinuation {
                        context: correction_instruction(&reason),
                        reason: ContinuationReason::ContractCorrection,
                    }),
                }
            }
            ContractParse::NotStructured => ParsedTurn {
                display_text: parse::strip_tool_calls(text),
                calls: parse::extract_calls(text),
                plan_update: None,
                short_circuit: None,
            },
        }
    }

    /// Recomputes the conversation state from registry cardinalities.
    fn finish_state(&mut self) {
        self.state.end_streaming(
            self.manager.registry().in_flight(),
            self.manager.registry().completed_this_turn(),
        );
    }
}

fn correction_instruction(reason: &str) -> String {
    format!(
        "Your previous response violated the required response format ({reason}). \
         Resend it as a single JSON object of the form \
         {{\"comment\": string, \"next_action\": \"tool\" | \"final\", \
         \"tool_call\": {{\"tool\": string, \"params\": object}}}} \
         with no text outside the object. Include \"tool_call\" only when \
         \"next_action\" is \"tool\"."
    )
}
