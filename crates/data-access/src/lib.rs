//! Typed access to the starter's `profiles` and `items` tables.
//!
//! Every operation goes through a shared [`backend_client::Backend`]. Backend
//! failures surface unchanged as [`DataError::Backend`]; an absent row is
//! `Ok(None)` rather than an error.

mod error;
mod feed;
mod items;
mod models;
mod profiles;

pub use backend_client::FeedSubscription;
pub use error::{DataError, DataResult};
pub use feed::{DeletedRow, RowChange};
pub use items::ItemAccess;
pub use models::{
    Item, ItemInsert, ItemStatus, ItemUpdate, Profile, ProfileInsert, ProfileUpdate, ProfileWithItems,
    SubscriptionStatus, SubscriptionSummary,
};
pub use profiles::ProfileAccess;
