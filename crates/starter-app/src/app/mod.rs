//! Application wiring.

mod demo;
mod init;
mod state;

pub use demo::{offline_backend, DEMO_EMAIL, DEMO_PASSWORD};
pub use init::start_app;
pub use state::AppState;
