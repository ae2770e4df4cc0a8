//! Capture state machine transitions.
//!
//! ```text
//!            Start            BeginRetrieve        Retrieved (last)
//!   Idle ───────────▶ Armed ───────────────▶ Exposing ──────────────▶ Idle
//!    ▲                  ▲  │                  │ │
//!    │                  │  │ End              │ │ Retrieved (more) / NoFrame
//!    │                  │  ▼                  │ └───────────────▶ Armed
//!    │   Stop (any)     │ FrameReady ◀────────┘ End
//!    └──────────────────┤
//!                       │ Abort (Armed / Exposing)
//!                    Aborted ── Start ──▶ Armed
//! ```
//!
//! The table is a pure function so every edge can be tested without a device.

use std::fmt;

/// Where a capture sequence currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// No capture in progress.
    Idle,
    /// Capture started; waiting for the caller to retrieve a frame.
    Armed,
    /// A retrieval is blocked waiting for the exposure.
    Exposing,
    /// The exposure was ended early; the frame can be read immediately.
    FrameReady,
    /// The exposure was aborted; only Stop or a fresh Start are valid.
    Aborted,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CaptureState::Idle => "idle",
            CaptureState::Armed => "armed",
            CaptureState::Exposing => "exposing",
            CaptureState::FrameReady => "frame_ready",
            CaptureState::Aborted => "aborted",
        };
        write!(f, "{}", label)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// `CaptureStart`
    Start,
    /// `GetVideoFrame` begins waiting
    BeginRetrieve,
    /// `GetVideoFrameExt` begins waiting; capture start is optional
    BeginExternalWait,
    /// A frame was transferred
    Retrieved {
        /// Whether the frame budget allows another frame
        more_expected: bool,
    },
    /// The retrieval ended without a frame (timeout or transfer error)
    NoFrame,
    /// `CaptureAbort`
    Abort,
    /// `CaptureEnd`
    End,
    /// `CaptureStop`
    Stop,
}

/// The event has no edge from the given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the event arrived in
    pub state: CaptureState,
    /// Rejected event
    pub event: CaptureEvent,
}

/// Next state for `event` arriving in `state`.
pub fn next_state(
    state: CaptureState,
    event: CaptureEvent,
) -> Result<CaptureState, InvalidTransition> {
    use CaptureEvent as E;
    use CaptureState as S;

    let next = match (state, event) {
        (_, E::Stop) => S::Idle,

        (S::Idle | S::Aborted, E::Start) => S::Armed,

        (S::Armed, E::BeginRetrieve) => S::Exposing,
        (S::Idle | S::Armed, E::BeginExternalWait) => S::Exposing,
        (S::FrameReady, E::BeginRetrieve | E::BeginExternalWait) => S::FrameReady,

        (S::Exposing | S::FrameReady, E::Retrieved { more_expected: true }) => S::Armed,
        (S::Exposing | S::FrameReady, E::Retrieved { more_expected: false }) => S::Idle,
        (S::Exposing, E::NoFrame) => S::Armed,
        (S::FrameReady, E::NoFrame) => S::FrameReady,

        (S::Armed | S::Exposing, E::Abort) => S::Aborted,
        (S::Armed | S::Exposing, E::End) => S::FrameReady,

        (state, event) => return Err(InvalidTransition { state, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use CaptureEvent as E;
    use CaptureState as S;

    #[test]
    fn test_normal_path() {
        let mut state = S::Idle;
        for event in [
            E::Start,
            E::BeginRetrieve,
            E::Retrieved { more_expected: true },
            E::BeginRetrieve,
            E::Retrieved {
                more_expected: false,
            },
        ] {
            state = next_state(state, event).unwrap();
        }
        assert_eq!(state, S::Idle);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        assert_eq!(
            next_state(S::Armed, E::Start),
            Err(InvalidTransition {
                state: S::Armed,
                event: E::Start
            })
        );
    }

    #[test]
    fn test_retrieve_requires_armed() {
        assert!(next_state(S::Idle, E::BeginRetrieve).is_err());
        assert!(next_state(S::Aborted, E::BeginRetrieve).is_err());
        assert!(next_state(S::Exposing, E::BeginRetrieve).is_err());
        assert_eq!(next_state(S::FrameReady, E::BeginRetrieve), Ok(S::FrameReady));
    }

    #[test]
    fn test_timeout_restores_armed() {
        assert_eq!(next_state(S::Exposing, E::NoFrame), Ok(S::Armed));
    }

    #[test]
    fn test_abort_and_end_need_active_exposure() {
        assert_eq!(next_state(S::Exposing, E::Abort), Ok(S::Aborted));
        assert_eq!(next_state(S::Armed, E::End), Ok(S::FrameReady));
        assert!(next_state(S::Idle, E::Abort).is_err());
        assert!(next_state(S::Idle, E::End).is_err());
        assert!(next_state(S::FrameReady, E::Abort).is_err());
    }

    #[test]
    fn test_stop_is_valid_everywhere() {
        for state in [S::Idle, S::Armed, S::Exposing, S::FrameReady, S::Aborted] {
            assert_eq!(next_state(state, E::Stop), Ok(S::Idle));
        }
    }

    #[test]
    fn test_external_wait_without_start() {
        assert_eq!(next_state(S::Idle, E::BeginExternalWait), Ok(S::Exposing));
        assert_eq!(next_state(S::Aborted, E::Start), Ok(S::Armed));
    }
}
