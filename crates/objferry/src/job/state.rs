use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a migration job.
///
/// ```text
/// INIT ─► MOVE ─► COMPLETE ─► RERUN ─► RERUN_MOVE ─► COMPLETE
///          │         │          ▲           │
///          ▼         ▼          │           ▼
///         STOP ──────┴──────────┘          STOP
///
/// MOVE / COMPLETE / STOP ─► REMOVE      (any precondition failure ─► ERROR)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Init,
    Move,
    Complete,
    Stop,
    Remove,
    Rerun,
    RerunMove,
    Error,
}

impl JobState {
    pub fn code(self) -> i64 {
        match self {
            JobState::Init => 0,
            JobState::Move => 1,
            JobState::Complete => 2,
            JobState::Stop => 3,
            JobState::Remove => 4,
            JobState::Rerun => 5,
            JobState::RerunMove => 6,
            JobState::Error => 10,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => JobState::Init,
            1 => JobState::Move,
            2 => JobState::Complete,
            3 => JobState::Stop,
            4 => JobState::Remove,
            5 => JobState::Rerun,
            6 => JobState::RerunMove,
            10 => JobState::Error,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Init => "INIT",
            JobState::Move => "MOVE",
            JobState::Complete => "COMPLETE",
            JobState::Stop => "STOP",
            JobState::Remove => "REMOVE",
            JobState::Rerun => "RERUN",
            JobState::RerunMove => "RERUN_MOVE",
            JobState::Error => "ERROR",
        }
    }

    /// True while a process is (or was, if it died) working on the job.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Init | JobState::Move | JobState::Rerun | JobState::RerunMove
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Remove | JobState::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// ERROR is reachable from every non-terminal state.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Error) => true,
            (Init, Move) => true,
            (Move, Complete) | (Move, Stop) | (Move, Remove) => true,
            (Complete, Remove) | (Stop, Remove) => true,
            (Complete, Rerun) | (Stop, Rerun) => true,
            (Rerun, RerunMove) | (Rerun, Stop) => true,
            (RerunMove, Complete) | (RerunMove, Stop) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
