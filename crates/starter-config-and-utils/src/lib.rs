//! Configuration, filesystem paths, and logging setup for the starter workspace.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_BACKEND_ANON_KEY, DEFAULT_BACKEND_URL, DEFAULT_LOG_LEVEL,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SITE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
