//! Engine configuration and per-turn output types.

use std::time::Duration;

use crate::call::{CallKey, Plan};

/// Tuning knobs for the engine. Start from `Default` and override fields.
///
/// ```rust
/// use turnflow::config::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig {
///     tool_timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-dispatch deadline. Exceeding it is a transient failure.
    pub tool_timeout: Duration,
    /// Retries for transient failures (total attempts = 1 + retries).
    /// There is deliberately no backoff delay between attempts.
    pub max_retries: u32,
    /// Character budget for each successful result in the summary fed
    /// back to the model; longer results are truncated with a marker.
    pub summary_char_budget: usize,
    /// Contract-violation corrections allowed per conversation before the
    /// turn resolves as done instead of looping.
    pub max_corrections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            max_retries: 1,
            summary_char_budget: 2_000,
            max_corrections: 3,
        }
    }
}

/// Why a continuation turn is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationReason {
    /// New calls executed; the summary carries their results.
    ToolResults,
    /// The model re-emitted already-completed calls; the summary carries
    /// the cached results to nudge it toward a final answer.
    CachedResults,
    /// The turn violated the strict contract; the context carries a
    /// corrective instruction. Counts as a zero-progress step upstream.
    ContractCorrection,
}

/// Terminal decision for one processed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The interaction ends here; the display text is the final answer.
    Done,
    /// Invoke the model again with `context` injected into the next turn.
    StartContinuation {
        /// Result summary or corrective instruction for the next turn.
        context: String,
        /// What prompted the continuation.
        reason: ContinuationReason,
    },
}

/// Observable events emitted while processing a turn, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The turn's content hash was already processed; everything skipped.
    TurnAlreadyProcessed,
    /// A parsed call was dropped as a duplicate of a pending/executing one.
    CallDeduplicated {
        /// Identity of the dropped call.
        key: CallKey,
    },
    /// A call was answered from the completed registry without dispatch.
    CallReplayedFromCache {
        /// Identity of the replayed call.
        key: CallKey,
    },
    /// A dispatch attempt is starting.
    ToolExecutionStart {
        /// The tool being invoked.
        tool_name: String,
        /// 1-based attempt number (2 = first retry).
        attempt: u32,
    },
    /// A dispatch attempt finished.
    ToolExecutionEnd {
        /// The tool that was invoked.
        tool_name: String,
        /// Whether this attempt succeeded.
        success: bool,
        /// Wall-clock time the attempt took.
        duration: Duration,
    },
    /// Pre-dispatch validation rejected a call; recorded as a failed
    /// result, never retried.
    ValidationFailed {
        /// The tool the call named.
        tool_name: String,
        /// Why validation rejected it.
        reason: String,
    },
    /// The turn violated the strict response contract.
    ContractViolated {
        /// Which part of the contract was violated.
        reason: String,
    },
    /// A plan payload was parsed and stored.
    PlanStored {
        /// The stored plan's id.
        plan_id: String,
        /// How many steps survived the cap.
        steps: usize,
    },
    /// The turn was cancelled mid-execution.
    TurnCancelled,
}

/// Everything the presentation boundary receives for one processed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTurn {
    /// Natural-language portion with call encodings stripped.
    pub display_text: String,
    /// Ordered events observed while processing.
    pub events: Vec<TurnEvent>,
    /// A newly stored or replaced plan, if the turn carried one.
    pub plan_update: Option<Plan>,
    /// Whether to finish or continue the loop.
    pub outcome: TurnOutcome,
}

impl ProcessedTurn {
    /// A no-op "done" turn (e.g. duplicate notification).
    pub(crate) fn done_with_events(display_text: String, events: Vec<TurnEvent>) -> Self {
        Self {
            display_text,
            events,
            plan_update: None,
            outcome: TurnOutcome::Done,
        }
    }
}
