//! Event numbers used by the synthesis wire protocol
//!
//! Upstream messages carry a 4-byte big-endian event number after the
//! header when the event flag is set. Connection-scoped events are followed
//! by a connection-id block, session-scoped events by a session-id block.

/// Synthesis protocol event numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Event {
    /// Client requests a new logical connection
    StartConnection = 1,
    /// Client tears the connection down
    FinishConnection = 2,
    /// Server acknowledges the connection
    ConnectionStarted = 50,
    /// Server rejected the connection
    ConnectionFailed = 51,
    /// Server acknowledges teardown
    ConnectionFinished = 52,
    /// Client opens a synthesis session
    StartSession = 100,
    /// Client abandons a session, discarding pending audio
    CancelSession = 101,
    /// Client marks the session's input complete
    FinishSession = 102,
    /// Server acknowledges the session
    SessionStarted = 150,
    /// Server confirms cancellation
    SessionCanceled = 151,
    /// Server delivered all audio for the session
    SessionFinished = 152,
    /// Server aborted the session
    SessionFailed = 153,
    /// Client submits text to synthesize
    TaskRequest = 200,
    /// Server begins a sentence
    SentenceStart = 350,
    /// Server finished a sentence
    SentenceEnd = 351,
    /// Server delivered a synthesis result payload
    TtsResponse = 352,
}

impl Event {
    /// Map a wire event number back to a typed event.
    #[must_use]
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::StartConnection),
            2 => Some(Self::FinishConnection),
            50 => Some(Self::ConnectionStarted),
            51 => Some(Self::ConnectionFailed),
            52 => Some(Self::ConnectionFinished),
            100 => Some(Self::StartSession),
            101 => Some(Self::CancelSession),
            102 => Some(Self::FinishSession),
            150 => Some(Self::SessionStarted),
            151 => Some(Self::SessionCanceled),
            152 => Some(Self::SessionFinished),
            153 => Some(Self::SessionFailed),
            200 => Some(Self::TaskRequest),
            350 => Some(Self::SentenceStart),
            351 => Some(Self::SentenceEnd),
            352 => Some(Self::TtsResponse),
            _ => None,
        }
    }

    /// Whether a session-id block follows this event number on the wire.
    #[must_use]
    pub const fn carries_session_id(self) -> bool {
        matches!(
            self,
            Self::StartSession
                | Self::CancelSession
                | Self::FinishSession
                | Self::TaskRequest
                | Self::SessionStarted
                | Self::SessionCanceled
                | Self::SessionFinished
                | Self::SessionFailed
                | Self::SentenceStart
                | Self::SentenceEnd
                | Self::TtsResponse
        )
    }

    /// Whether a connection-id block follows this event number on the wire.
    #[must_use]
    pub const fn carries_connection_id(self) -> bool {
        matches!(
            self,
            Self::ConnectionStarted | Self::ConnectionFailed | Self::ConnectionFinished
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        for value in [1, 2, 50, 51, 52, 100, 101, 102, 150, 151, 152, 153, 200, 350, 351, 352] {
            let event = Event::from_wire(value).unwrap();
            assert_eq!(event as u32, value);
        }
        assert!(Event::from_wire(999).is_none());
    }

    #[test]
    fn id_block_scope() {
        assert!(Event::StartSession.carries_session_id());
        assert!(Event::TtsResponse.carries_session_id());
        assert!(!Event::StartSession.carries_connection_id());
        assert!(Event::ConnectionStarted.carries_connection_id());
        assert!(!Event::ConnectionStarted.carries_session_id());
        assert!(!Event::StartConnection.carries_session_id());
        assert!(!Event::StartConnection.carries_connection_id());
    }
}
