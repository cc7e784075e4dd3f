//! Application state shared by every command.

use crate::navigation::Navigator;
use data_access::{ItemAccess, ProfileAccess};
use session_sync::{SessionSnapshot, SessionSynchronizer};
use starter_config_and_utils::{Config, Paths};

pub struct AppState {
    pub config: Config,
    pub paths: Paths,
    pub sync: SessionSynchronizer,
    pub items: ItemAccess,
    pub profiles: ProfileAccess,
    pub navigator: Navigator,
    /// Running against the in-process backend
    pub offline: bool,
}

impl AppState {
    /// The session mirror as of now.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.sync.watch().borrow().clone()
    }
}
