//! Session phase state machine.
//!
//! ```text
//!                ┌──────────────┐
//!                │ Initializing │ (initial)
//!                └──────┬───────┘
//!     RestoredSession   │   NoSession
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!  ┌───────────────┐  SessionEnded  ┌───────────┐
//!  │ Authenticated │ ─────────────► │ Anonymous │
//!  │               │ ◄───────────── │           │
//!  └───────────────┘ SessionStarted └───────────┘
//! ```
//!
//! Initializing is left exactly once, when the first session fetch completes.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Initializing)

    Initializing => {
        RestoredSession => Authenticated,
        NoSession => Anonymous
    },
    Anonymous => {
        SessionStarted => Authenticated,
        SessionEnded => Anonymous
    },
    Authenticated => {
        SessionStarted => Authenticated,
        SessionEnded => Anonymous
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Where the process stands with respect to authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// The first session fetch has not completed.
    Initializing,
    Anonymous,
    Authenticated,
}

impl SessionPhase {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionPhase::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Initializing => "initializing",
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Initializing => SessionPhase::Initializing,
            SessionMachineState::Anonymous => SessionPhase::Anonymous,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
        }
    }
}
