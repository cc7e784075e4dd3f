//! Access to the `items` table.

use crate::feed::{subscribe_rows, RowChange};
use crate::{DataError, DataResult, Item, ItemInsert, ItemStatus, ItemUpdate};
use backend_client::{Backend, FeedSpec, FeedSubscription, Filter, Query, TableApi};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const TABLE: &str = "items";
const CHANNEL: &str = "items_changes";
const SEARCH_COLUMNS: [&str; 2] = ["title", "description"];

/// Stateless wrapper over the `items` table.
#[derive(Clone)]
pub struct ItemAccess {
    backend: Arc<dyn Backend>,
}

impl ItemAccess {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn decode(row: Value) -> DataResult<Item> {
        serde_json::from_value(row).map_err(|e| DataError::decode(TABLE, e))
    }

    fn decode_all(rows: Vec<Value>) -> DataResult<Vec<Item>> {
        rows.into_iter().map(Self::decode).collect()
    }

    fn owned_by(owner: &str) -> Query {
        Query::new().eq("user_id", owner)
    }

    /// Items owned by `owner`, newest first.
    pub async fn list(&self, owner: &str) -> DataResult<Vec<Item>> {
        let query = Self::owned_by(owner).order("created_at", false);
        Self::decode_all(self.backend.select(TABLE, &query).await?)
    }

    /// One item, or `None` if no such row is visible.
    pub async fn get(&self, id: &str) -> DataResult<Option<Item>> {
        match self.backend.select_single(TABLE, &Query::new().eq("id", id)).await {
            Ok(row) => Self::decode(row).map(Some),
            Err(e) if e.is_not_found() => {
                debug!(id, "Item not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create(&self, item: &ItemInsert) -> DataResult<Item> {
        let row = serde_json::to_value(item).map_err(|e| DataError::encode(TABLE, e))?;
        let created = Self::decode(self.backend.insert(TABLE, row).await?)?;
        debug!(id = %created.id, user_id = %created.user_id, "Item created");
        Ok(created)
    }

    /// Apply `patch` to one item and return it as stored.
    pub async fn update(&self, id: &str, patch: &ItemUpdate) -> DataResult<Item> {
        let patch = serde_json::to_value(patch).map_err(|e| DataError::encode(TABLE, e))?;
        let row = self
            .backend
            .update_single(TABLE, &Query::new().eq("id", id), patch)
            .await?;
        Self::decode(row)
    }

    pub async fn delete(&self, id: &str) -> DataResult<()> {
        self.backend.delete(TABLE, &Query::new().eq("id", id)).await?;
        debug!(id, "Item deleted");
        Ok(())
    }

    pub async fn update_status(&self, id: &str, status: ItemStatus) -> DataResult<Item> {
        self.update(id, &ItemUpdate::status(status)).await
    }

    /// Move an item to `archived`, whatever its current status.
    pub async fn archive(&self, id: &str) -> DataResult<Item> {
        self.update_status(id, ItemStatus::Archived).await
    }

    pub async fn list_by_status(&self, owner: &str, status: ItemStatus) -> DataResult<Vec<Item>> {
        let query = Self::owned_by(owner)
            .eq("status", status.as_str())
            .order("created_at", false);
        Self::decode_all(self.backend.select(TABLE, &query).await?)
    }

    /// Owner's items whose title or description contains `text`, ignoring case.
    ///
    /// An empty `text` returns every owned item. Rows the backend returns are
    /// re-checked for both ownership and the literal match.
    pub async fn search(&self, owner: &str, text: &str) -> DataResult<Vec<Item>> {
        if text.is_empty() {
            return self.list(owner).await;
        }

        let query = Self::owned_by(owner)
            .ilike_any(&SEARCH_COLUMNS, text)
            .order("created_at", false);
        let rows = Self::decode_all(self.backend.select(TABLE, &query).await?)?;

        let returned = rows.len();
        let items: Vec<Item> = rows
            .into_iter()
            .filter(|item| item.user_id == owner && item.mentions(text))
            .collect();
        if items.len() != returned {
            debug!(returned, kept = items.len(), "Discarded search rows outside owner scope or pattern");
        }
        Ok(items)
    }

    /// Set `status` on every item in `ids` with a single filtered update.
    ///
    /// Not atomic: rows the backend did update stay updated when the call
    /// reports [`DataError::PartialBulkUpdate`] for the rest.
    pub async fn bulk_update_status(&self, ids: &[String], status: ItemStatus) -> DataResult<Vec<Item>> {
        let requested: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let patch = serde_json::to_value(ItemUpdate::status(status))
            .map_err(|e| DataError::encode(TABLE, e))?;
        let query = Query::new().in_("id", requested.iter());
        let updated = Self::decode_all(self.backend.update(TABLE, &query, patch).await?)?;

        let touched: BTreeSet<&str> = updated.iter().map(|item| item.id.as_str()).collect();
        let missing: Vec<String> = requested
            .iter()
            .filter(|id| !touched.contains(*id))
            .map(|id| id.to_string())
            .collect();

        if !missing.is_empty() {
            warn!(
                status = %status,
                updated = touched.len(),
                missing = missing.len(),
                "Bulk status update reached only part of the requested items"
            );
            return Err(DataError::PartialBulkUpdate {
                updated: touched.iter().map(|id| id.to_string()).collect(),
                missing,
            });
        }

        Ok(updated)
    }

    /// Forward every change to `owner`'s items to `callback`.
    pub async fn subscribe<F>(&self, owner: &str, callback: F) -> DataResult<FeedSubscription>
    where
        F: Fn(RowChange<Item>) + Send + Sync + 'static,
    {
        let spec = FeedSpec::new(CHANNEL, TABLE).with_filter(Filter::eq("user_id", owner));
        subscribe_rows(&self.backend, spec, callback).await
    }
}
