//! Client side of the managed backend: auth, tables and change feeds.
//!
//! The contract is the three traits in [`api`]. Two implementations ship:
//! - [`SupabaseClient`]: HTTP (GoTrue, PostgREST) plus Phoenix websockets
//! - [`InMemoryBackend`]: an in-process stand-in for tests and offline runs

pub mod api;
mod error;
mod feed;
mod memory;
mod query;
mod refresh;
mod supabase;
mod types;

pub use api::{AuthApi, Backend, ChangeFeedApi, TableApi};
pub use error::{BackendError, BackendResult, NOT_FOUND_CODE};
pub use feed::{ChangeEvent, ChangeHandler, ChangeKind, FeedSpec, FeedSubscription};
pub use memory::{BackendOp, InMemoryBackend, MailKind, SentMail};
pub use query::{Embed, Filter, Order, Query};
pub use refresh::RefreshConfig;
pub use supabase::{PhoenixMessage, SupabaseClient};
pub use types::{
    AuthChange, AuthChangeKind, OAuthProvider, OAuthRedirect, Session, SignUpResponse, User,
};
