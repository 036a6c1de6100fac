//! Cycle state machine.
//!
//! One sample cycle walks the states below. Every transition is driven by an
//! explicit [`CycleEvent`] through [`CycleState::next`]; a timed-out capture
//! acknowledgment is a first-class branch, not a fallthrough.
//!
//! ```text
//!          Run               Acknowledged          Captured
//! Idle ──────────> AwaitCaptureAck ──────> Capturing ──────> AwaitWeigh
//!  ▲                     │                                      ▲   │
//!  │                     │ TimedOut                     Skipped │   │ Measured
//!  │                     ▼                                      │   ▼
//!  │               AbortedCycle ────────────────────────────────┘ Recording
//!  │                                                                │
//!  └─────────────────────────────── Recorded ───────────────────────┘
//! ```
//!
//! An aborted capture still weighs, homes, and records the sample. `LinkLost`
//! jumps from any in-cycle state straight to `Recording`, so whatever the cycle
//! gathered before the serial link broke is still recorded.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    /// Waiting for the operator
    Idle,
    /// `C` sent, waiting for `AT_CAPTURE`
    AwaitCaptureAck,
    /// Settling, warming up, and grabbing the frame
    Capturing,
    /// `W` sent, collecting measurements
    AwaitWeigh,
    /// Homing and handing the record to the sink
    Recording,
    /// The sample never reached the camera
    AbortedCycle,
}

/// Something that happened during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// Operator asked for a cycle
    Run,
    /// Expected acknowledgment arrived
    Acknowledged,
    /// Expected acknowledgment did not arrive in time
    TimedOut,
    /// Capture step finished, with or without a frame
    Captured,
    /// Capture step skipped after an aborted move
    Skipped,
    /// Measurement collection returned
    Measured,
    /// Record emitted
    Recorded,
    /// The serial link broke mid-cycle
    LinkLost,
}

impl CycleState {
    /// Transition function. `None` means the event is not valid in this state.
    pub fn next(self, event: CycleEvent) -> Option<CycleState> {
        use CycleEvent as E;
        use CycleState as S;

        match (self, event) {
            (S::Idle, E::Run) => Some(S::AwaitCaptureAck),
            (S::AwaitCaptureAck, E::Acknowledged) => Some(S::Capturing),
            (S::AwaitCaptureAck, E::TimedOut) => Some(S::AbortedCycle),
            (S::Capturing, E::Captured) => Some(S::AwaitWeigh),
            (S::AbortedCycle, E::Skipped) => Some(S::AwaitWeigh),
            (S::AwaitWeigh, E::Measured) => Some(S::Recording),
            (S::Recording, E::Recorded) => Some(S::Idle),
            (S::Idle, E::LinkLost) => None,
            (_, E::LinkLost) => Some(S::Recording),
            _ => None,
        }
    }

    /// Checked transition: an event the state does not accept is a sequencing bug.
    pub fn apply(self, event: CycleEvent) -> AppResult<CycleState> {
        self.next(event).ok_or_else(|| {
            DaqError::Sequence(format!("event {:?} is not valid in state {}", event, self))
        })
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleState::Idle => write!(f, "Idle"),
            CycleState::AwaitCaptureAck => write!(f, "AwaitCaptureAck"),
            CycleState::Capturing => write!(f, "Capturing"),
            CycleState::AwaitWeigh => write!(f, "AwaitWeigh"),
            CycleState::Recording => write!(f, "Recording"),
            CycleState::AbortedCycle => write!(f, "AbortedCycle"),
        }
    }
}

/// Outcome of a recorded cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every step succeeded
    Completed,
    /// Capture failed, a measurement field is missing, or homing timed out
    Degraded,
    /// `AT_CAPTURE` never arrived; no image was taken
    CaptureAborted,
    /// The serial link broke mid-cycle; the run ends after this record
    LinkLost,
}

impl CycleStatus {
    /// Label used in the CSV log.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::Degraded => "degraded",
            CycleStatus::CaptureAborted => "capture_aborted",
            CycleStatus::LinkLost => "link_lost",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(events: &[CycleEvent]) -> Option<CycleState> {
        events
            .iter()
            .try_fold(CycleState::Idle, |state, event| state.next(*event))
    }

    #[test]
    fn happy_path_returns_to_idle() {
        use CycleEvent::*;
        assert_eq!(
            walk(&[Run, Acknowledged, Captured, Measured, Recorded]),
            Some(CycleState::Idle)
        );
    }

    #[test]
    fn capture_timeout_still_weighs_and_records() {
        use CycleEvent::*;
        assert_eq!(walk(&[Run, TimedOut]), Some(CycleState::AbortedCycle));
        assert_eq!(
            walk(&[Run, TimedOut, Skipped, Measured, Recorded]),
            Some(CycleState::Idle)
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert_eq!(CycleState::Idle.next(CycleEvent::Measured), None);
        assert_eq!(CycleState::AbortedCycle.next(CycleEvent::Captured), None);
        assert_eq!(CycleState::Capturing.next(CycleEvent::Skipped), None);
        assert_eq!(CycleState::Recording.next(CycleEvent::Run), None);
    }

    #[test]
    fn link_loss_goes_straight_to_recording() {
        use CycleEvent::*;
        for prefix in [
            &[Run][..],
            &[Run, Acknowledged],
            &[Run, TimedOut],
            &[Run, Acknowledged, Captured],
            &[Run, Acknowledged, Captured, Measured],
        ] {
            let state = walk(prefix).unwrap();
            assert_eq!(state.next(LinkLost), Some(CycleState::Recording), "from {state}");
        }
        assert_eq!(
            walk(&[Run, Acknowledged, LinkLost, Recorded]),
            Some(CycleState::Idle)
        );
        assert_eq!(CycleState::Idle.next(LinkLost), None);
    }

    #[test]
    fn checked_transition_reports_sequencing_bug() {
        assert_eq!(
            CycleState::AwaitCaptureAck
                .apply(CycleEvent::Acknowledged)
                .unwrap(),
            CycleState::Capturing
        );

        let err = CycleState::Capturing.apply(CycleEvent::Skipped).unwrap_err();
        assert!(matches!(err, DaqError::Sequence(_)));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Capturing"));
    }

    #[test]
    fn status_labels() {
        assert_eq!(CycleStatus::CaptureAborted.to_string(), "capture_aborted");
        assert_eq!(CycleStatus::Completed.as_str(), "completed");
        assert_eq!(CycleStatus::LinkLost.as_str(), "link_lost");
    }
}
