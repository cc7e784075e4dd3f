//! Access to the `profiles` table.

use crate::feed::{subscribe_rows, RowChange};
use crate::{
    DataError, DataResult, Profile, ProfileInsert, ProfileUpdate, ProfileWithItems, SubscriptionStatus,
    SubscriptionSummary,
};
use backend_client::{Backend, FeedSpec, FeedSubscription, Filter, Query, TableApi};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

const TABLE: &str = "profiles";
const CHANNEL: &str = "profile_changes";

#[derive(Clone)]
pub struct ProfileAccess {
    backend: Arc<dyn Backend>,
}

impl ProfileAccess {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn decode<T: DeserializeOwned>(row: serde_json::Value) -> DataResult<T> {
        serde_json::from_value(row).map_err(|e| DataError::decode(TABLE, e))
    }

    async fn fetch_one<T: DeserializeOwned>(&self, query: Query) -> DataResult<Option<T>> {
        match self.backend.select_single(TABLE, &query).await {
            Ok(row) => Self::decode(row).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The profile with `id`, or `None` when it does not exist.
    pub async fn get(&self, id: &str) -> DataResult<Option<Profile>> {
        let profile = self.fetch_one(Query::new().eq("id", id)).await?;
        if profile.is_none() {
            debug!(id, "Profile not found");
        }
        Ok(profile)
    }

    pub async fn create(&self, profile: &ProfileInsert) -> DataResult<Profile> {
        let row = serde_json::to_value(profile).map_err(|e| DataError::encode(TABLE, e))?;
        let created: Profile = Self::decode(self.backend.insert(TABLE, row).await?)?;
        info!(id = %created.id, "Profile created");
        Ok(created)
    }

    pub async fn update(&self, id: &str, patch: &ProfileUpdate) -> DataResult<Profile> {
        let patch = serde_json::to_value(patch).map_err(|e| DataError::encode(TABLE, e))?;
        let row = self
            .backend
            .update_single(TABLE, &Query::new().eq("id", id), patch)
            .await?;
        Self::decode(row)
    }

    /// Set the subscription status and the paid flag that goes with it.
    pub async fn update_subscription_status(&self, id: &str, status: SubscriptionStatus) -> DataResult<Profile> {
        let patch = ProfileUpdate {
            subscription_status: Some(status),
            is_paid: Some(status.is_paid()),
            ..Default::default()
        };
        let profile = self.update(id, &patch).await?;
        info!(id, status = %status, is_paid = profile.is_paid, "Subscription status updated");
        Ok(profile)
    }

    /// The profile with its items embedded in one round trip.
    pub async fn get_with_items(&self, id: &str) -> DataResult<Option<ProfileWithItems>> {
        self.fetch_one(Query::new().eq("id", id).embed("items", "user_id"))
            .await
    }

    /// Billing summary; a missing profile reports as free and unpaid.
    pub async fn check_subscription_status(&self, id: &str) -> DataResult<SubscriptionSummary> {
        Ok(self
            .get(id)
            .await?
            .map(|profile| SubscriptionSummary {
                is_paid: profile.is_paid,
                status: profile.subscription_status,
            })
            .unwrap_or_default())
    }

    /// Forward every change to the profile `id` to `callback`.
    pub async fn subscribe<F>(&self, id: &str, callback: F) -> DataResult<FeedSubscription>
    where
        F: Fn(RowChange<Profile>) + Send + Sync + 'static,
    {
        let spec = FeedSpec::new(CHANNEL, TABLE).with_filter(Filter::eq("id", id));
        subscribe_rows(&self.backend, spec, callback).await
    }
}
