//! Session synchronizer for the starter app.
//!
//! [`SessionSynchronizer`] keeps a read-only mirror of the backend session,
//! fed by the backend's auth-change events, and exposes the explicit auth
//! operations (sign in, sign up, sign out, OAuth, password reset, profile
//! rename). It never navigates: `SIGNED_IN` and `SIGNED_OUT` events carry a
//! [`NavigationIntent`] for the presentation layer to act on.

mod error;
mod phase;
mod synchronizer;

pub use error::{SessionError, SessionResult};
pub use phase::{SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase};
pub use synchronizer::{
    AuthRedirects, NavigationIntent, SessionEvent, SessionSnapshot, SessionSynchronizer, SignUpOutcome,
};
