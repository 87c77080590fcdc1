//! Conversation state machine.
//!
//! A small explicit automaton tracking where the engine is within a turn.
//! Transitions are strict: anything not in the table is rejected and
//! ignored (logged at debug level), except that every state may move to
//! `Error`, and `Error` recovers only to `Idle`.
//!
//! `end_streaming` deliberately does *not* pick a next state imperatively.
//! It recomputes the target purely from execution-registry cardinalities
//! and walks there through legal transitions. This self-healing recompute
//! tolerates out-of-order "tool finished" notifications without getting
//! stuck.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Where the engine is within the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationState {
    /// Nothing in flight.
    Idle,
    /// Chunks are accumulating.
    Streaming,
    /// The finished turn carried tool calls not yet dispatched.
    ToolDetected,
    /// At least one call is pending or executing.
    ToolExecuting,
    /// All calls finished this turn; results await consumption.
    ResultsReady,
    /// A continuation turn has been requested; waiting on the model.
    AwaitingFollowup,
    /// A turn-level failure; recovers only to `Idle`.
    Error,
}

impl ConversationState {
    fn allows(self, next: ConversationState) -> bool {
        use ConversationState::*;
        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Streaming)
                | (Streaming, ToolDetected)
                | (Streaming, Idle)
                | (ToolDetected, ToolExecuting)
                | (ToolExecuting, ResultsReady)
                | (ToolExecuting, ToolExecuting)
                | (ResultsReady, AwaitingFollowup)
                | (ResultsReady, Idle)
                | (ResultsReady, Streaming)
                | (AwaitingFollowup, Idle)
                | (AwaitingFollowup, Streaming)
                | (Error, Idle)
        )
    }
}

/// The automaton plus the streaming accumulation buffer.
#[derive(Debug)]
pub struct ConversationStateMachine {
    state: ConversationState,
    buffer: String,
    last_chunk_at: Option<Instant>,
}

impl Default for ConversationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStateMachine {
    /// A machine at `Idle` with an empty buffer.
    pub fn new() -> Self {
        Self {
            state: ConversationState::Idle,
            buffer: String::new(),
            last_chunk_at: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// The accumulated chunk text for the turn in progress.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// When the last chunk arrived. Consumed by an external stall detector;
    /// not used internally.
    pub fn last_chunk_at(&self) -> Option<Instant> {
        self.last_chunk_at
    }

    /// Attempts `self.state -> next`. Returns whether the transition was
    /// accepted; rejected transitions leave the state unchanged.
    pub fn transition_to(&mut self, next: ConversationState) -> bool {
        if self.state == next && next != ConversationState::ToolExecuting {
            return true;
        }
        if self.state.allows(next) {
            self.state = next;
            true
        } else {
            tracing::debug!(from = ?self.state, to = ?next, "rejected state transition");
            false
        }
    }

    /// Begins accumulation for a new turn: clears the buffer, stamps the
    /// chunk timestamp, and moves to `Streaming`.
    pub fn start_streaming(&mut self) {
        self.buffer.clear();
        self.last_chunk_at = Some(Instant::now());
        self.transition_to(ConversationState::Streaming);
    }

    /// Appends a chunk and refreshes the stall timestamp.
    pub fn add_chunk(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.last_chunk_at = Some(Instant::now());
    }

    /// Ends accumulation by *recomputing* the state from registry
    /// cardinalities rather than picking a successor imperatively.
    ///
    /// `in_flight` is `|pending| + |executing|`; `completed_this_turn` is
    /// the number of calls completed during the current turn.
    /// `AwaitingFollowup` is left untouched.
    pub fn end_streaming(&mut self, in_flight: usize, completed_this_turn: usize) {
        if self.state == ConversationState::AwaitingFollowup {
            return;
        }
        let target = if in_flight > 0 {
            ConversationState::ToolExecuting
        } else if completed_this_turn > 0 {
            ConversationState::ResultsReady
        } else {
            ConversationState::Idle
        };
        self.walk_to(target);
    }

    /// Cancellation reset: back to `Idle` with a clean buffer, bypassing
    /// the table. In-flight registry entries are not touched here.
    pub fn force_idle(&mut self) {
        tracing::debug!(from = ?self.state, "forcing state machine to idle");
        self.state = ConversationState::Idle;
        self.buffer.clear();
        self.last_chunk_at = None;
    }

    /// Walks from the current state to `target` through legal transitions.
    fn walk_to(&mut self, target: ConversationState) {
        use ConversationState::*;
        while self.state != target {
            let hop = match (self.state, target) {
                (Error, _) => Idle,
                (Idle, _) => Streaming,
                (Streaming, Idle) => Idle,
                (Streaming, _) => ToolDetected,
                (ToolDetected, _) => ToolExecuting,
                (ToolExecuting, _) => ResultsReady,
                (ResultsReady, Idle) => Idle,
                (ResultsReady, _) => Streaming,
                (AwaitingFollowup, _) => return,
            };
            if !self.transition_to(hop) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut sm = ConversationStateMachine::new();
        assert!(sm.transition_to(Streaming));
        assert!(sm.transition_to(ToolDetected));
        assert!(sm.transition_to(ToolExecuting));
        assert!(sm.transition_to(ToolExecuting)); // self-loop allowed
        assert!(sm.transition_to(ResultsReady));
        assert!(sm.transition_to(AwaitingFollowup));
        assert!(sm.transition_to(Streaming));
    }

    #[test]
    fn test_unlisted_transition_rejected_and_ignored() {
        let mut sm = ConversationStateMachine::new();
        assert!(!sm.transition_to(ToolExecuting));
        assert_eq!(sm.state(), Idle);

        sm.transition_to(Streaming);
        assert!(!sm.transition_to(ResultsReady));
        assert_eq!(sm.state(), Streaming);
    }

    #[test]
    fn test_any_state_may_error_and_error_recovers_only_to_idle() {
        let mut sm = ConversationStateMachine::new();
        sm.transition_to(Streaming);
        sm.transition_to(ToolDetected);
        assert!(sm.transition_to(Error));
        assert!(!sm.transition_to(Streaming));
        assert_eq!(sm.state(), Error);
        assert!(sm.transition_to(Idle));
    }

    #[test]
    fn test_start_streaming_clears_buffer() {
        let mut sm = ConversationStateMachine::new();
        sm.start_streaming();
        sm.add_chunk("hello ");
        sm.add_chunk("world");
        assert_eq!(sm.buffer(), "hello world");
        assert!(sm.last_chunk_at().is_some());

        sm.end_streaming(0, 0);
        sm.start_streaming();
        assert_eq!(sm.buffer(), "");
    }

    #[test]
    fn test_end_streaming_recomputes_tool_executing() {
        let mut sm = ConversationStateMachine::new();
        sm.start_streaming();
        sm.end_streaming(2, 0);
        assert_eq!(sm.state(), ToolExecuting);
    }

    #[test]
    fn test_end_streaming_recomputes_results_ready() {
        let mut sm = ConversationStateMachine::new();
        sm.start_streaming();
        sm.transition_to(ToolDetected);
        sm.transition_to(ToolExecuting);
        sm.end_streaming(0, 3);
        assert_eq!(sm.state(), ResultsReady);
    }

    #[test]
    fn test_end_streaming_recomputes_idle() {
        let mut sm = ConversationStateMachine::new();
        sm.start_streaming();
        sm.end_streaming(0, 0);
        assert_eq!(sm.state(), Idle);
    }

    #[test]
    fn test_end_streaming_leaves_awaiting_followup() {
        let mut sm = ConversationStateMachine::new();
        sm.transition_to(Streaming);
        sm.transition_to(ToolDetected);
        sm.transition_to(ToolExecuting);
        sm.transition_to(ResultsReady);
        sm.transition_to(AwaitingFollowup);
        sm.end_streaming(0, 1);
        assert_eq!(sm.state(), AwaitingFollowup);
    }

    #[test]
    fn test_never_tool_executing_with_empty_registry() {
        // The recompute can only land on ToolExecuting when in_flight > 0.
        let mut sm = ConversationStateMachine::new();
        sm.start_streaming();
        sm.end_streaming(0, 0);
        assert_ne!(sm.state(), ToolExecuting);
        sm.start_streaming();
        sm.end_streaming(0, 5);
        assert_ne!(sm.state(), ToolExecuting);
    }

    #[test]
    fn test_force_idle_from_anywhere() {
        let mut sm = ConversationStateMachine::new();
        sm.start_streaming();
        sm.add_chunk("partial");
        sm.transition_to(ToolDetected);
        sm.transition_to(ToolExecuting);
        sm.force_idle();
        assert_eq!(sm.state(), Idle);
        assert_eq!(sm.buffer(), "");
    }

    #[test]
    fn test_recompute_walks_legal_chain_from_out_of_order_notification() {
        // A late completion notification arriving while Idle.
        let mut sm = ConversationStateMachine::new();
        sm.end_streaming(1, 0);
        assert_eq!(sm.state(), ToolExecuting);
        sm.end_streaming(0, 1);
        assert_eq!(sm.state(), ResultsReady);
        sm.end_streaming(0, 0);
        assert_eq!(sm.state(), Idle);
    }
}
