//! Conversation state machine
//!
//! Transitions are strictly table-defined: an event not listed for the
//! current state is logged and dropped, never improvised. Interruption is
//! first-class from every active state, and Error recovers on the next
//! wake instead of wedging the loop.

use tracing::{debug, info, warn};

/// Conversation states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantState {
    /// Waiting for a wake signal
    Idle,
    /// Capturing the user's utterance
    Listening,
    /// Waiting for the final transcript
    Recognizing,
    /// Waiting for the reply stream to start
    Thinking,
    /// Playing the reply
    Speaking,
    /// A component failed; recoverable
    Error,
    /// Terminal
    Shutdown,
}

/// Events that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantEvent {
    /// Sustained voice energy while idle (or barge-in while speaking)
    WakeDetected,
    /// The voice-activity gate ended the capture
    SilenceDetected,
    /// The final transcript is available
    TranscriptReady,
    /// The recognition session failed
    RecognitionFailed,
    /// The first reply audio is about to play
    ReplyStarted,
    /// The chat collaborator failed
    ChatFailed,
    /// The reply has been fully played
    SpeechFinished,
    /// The synthesis pipeline failed
    SynthesisFailed,
    /// The user interrupted the current activity
    Interrupt,
    /// Stop the assistant
    ShutdownRequested,
}

/// Look up the defined transition for a state/event pair.
#[must_use]
pub const fn transition(
    state: AssistantState,
    event: AssistantEvent,
) -> Option<AssistantState> {
    use AssistantEvent as E;
    use AssistantState as S;
    match (state, event) {
        (S::Idle | S::Error, E::WakeDetected) => Some(S::Listening),

        (S::Listening, E::SilenceDetected) => Some(S::Recognizing),
        // The service can settle the transcript before the local gate trips.
        (S::Listening | S::Recognizing, E::TranscriptReady) => Some(S::Thinking),
        (S::Listening | S::Recognizing, E::RecognitionFailed) => Some(S::Error),

        (S::Thinking, E::ReplyStarted) => Some(S::Speaking),
        (S::Thinking, E::ChatFailed) => Some(S::Error),

        (S::Speaking, E::SpeechFinished) => Some(S::Idle),
        (S::Speaking, E::SynthesisFailed) => Some(S::Error),
        // Barge-in: a wake while speaking goes straight back to listening.
        (S::Speaking, E::WakeDetected) => Some(S::Listening),

        (
            S::Listening | S::Recognizing | S::Thinking | S::Speaking,
            E::Interrupt,
        ) => Some(S::Idle),

        (
            S::Idle | S::Listening | S::Recognizing | S::Thinking | S::Speaking | S::Error,
            E::ShutdownRequested,
        ) => Some(S::Shutdown),

        _ => None,
    }
}

/// Tracks the current state and applies the transition table
#[derive(Debug)]
pub struct StateMachine {
    state: AssistantState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Start in [`AssistantState::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AssistantState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AssistantState {
        self.state
    }

    /// Apply one event. Returns the (from, to) pair when the transition is
    /// defined; undefined events are dropped with a log line.
    pub fn handle(&mut self, event: AssistantEvent) -> Option<(AssistantState, AssistantState)> {
        match transition(self.state, event) {
            Some(next) => {
                let from = self.state;
                self.state = next;
                info!(?from, to = ?next, ?event, "state transition");
                Some((from, next))
            }
            None => {
                if self.state == AssistantState::Shutdown {
                    debug!(?event, "event after shutdown ignored");
                } else {
                    warn!(state = ?self.state, ?event, "undefined transition dropped");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AssistantEvent as E;
    use AssistantState as S;

    #[test]
    fn happy_path_round_trip() {
        let mut machine = StateMachine::new();
        for (event, expected) in [
            (E::WakeDetected, S::Listening),
            (E::SilenceDetected, S::Recognizing),
            (E::TranscriptReady, S::Thinking),
            (E::ReplyStarted, S::Speaking),
            (E::SpeechFinished, S::Idle),
        ] {
            assert!(machine.handle(event).is_some());
            assert_eq!(machine.state(), expected);
        }
    }

    #[test]
    fn undefined_events_are_dropped_without_changing_state() {
        let mut machine = StateMachine::new();
        assert!(machine.handle(E::SpeechFinished).is_none());
        assert!(machine.handle(E::TranscriptReady).is_none());
        assert_eq!(machine.state(), S::Idle);
    }

    #[test]
    fn interrupt_returns_to_idle_from_every_active_state() {
        for active in [S::Listening, S::Recognizing, S::Thinking, S::Speaking] {
            assert_eq!(transition(active, E::Interrupt), Some(S::Idle));
        }
        assert_eq!(transition(S::Idle, E::Interrupt), None);
        assert_eq!(transition(S::Error, E::Interrupt), None);
    }

    #[test]
    fn failures_reach_error_and_wake_recovers() {
        let mut machine = StateMachine::new();
        machine.handle(E::WakeDetected);
        machine.handle(E::SilenceDetected);
        machine.handle(E::RecognitionFailed);
        assert_eq!(machine.state(), S::Error);
        machine.handle(E::WakeDetected);
        assert_eq!(machine.state(), S::Listening);
    }

    #[test]
    fn wake_while_speaking_barges_in() {
        assert_eq!(transition(S::Speaking, E::WakeDetected), Some(S::Listening));
    }

    #[test]
    fn shutdown_is_terminal() {
        let mut machine = StateMachine::new();
        machine.handle(E::ShutdownRequested);
        assert_eq!(machine.state(), S::Shutdown);
        for event in [
            E::WakeDetected,
            E::SilenceDetected,
            E::TranscriptReady,
            E::Interrupt,
            E::ShutdownRequested,
        ] {
            assert!(machine.handle(event).is_none());
            assert_eq!(machine.state(), S::Shutdown);
        }
    }

    #[test]
    fn transcript_can_settle_before_the_local_gate() {
        assert_eq!(transition(S::Listening, E::TranscriptReady), Some(S::Thinking));
    }
}
