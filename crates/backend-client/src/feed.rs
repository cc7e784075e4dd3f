//! Change-feed events and the subscription handle.

use crate::Filter;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Which row operation produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Parse the realtime service's `type` field.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// One row change, untyped.
///
/// `new` is present for inserts and updates; `old` for deletes and, when the
/// table publishes full old rows, for updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

/// Callback receiving change events on the subscription's task.
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// What a change feed listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    /// Channel name, unique per logical subscription
    pub channel: String,
    pub schema: String,
    pub table: String,
    /// Optional equality filter on the table
    pub filter: Option<Filter>,
}

impl FeedSpec {
    pub fn new(channel: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            schema: "public".to_string(),
            table: table.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// True when `event` belongs to this feed.
    ///
    /// Deletes are matched against the old row, everything else against the new one.
    /// An old row carrying only the primary key is accepted: the server scoped
    /// the subscription already and the filter column is not there to check.
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        match event.kind {
            ChangeKind::Delete => event
                .old
                .as_ref()
                .map_or(true, |old| !filter.applies_to(old) || filter.matches(old)),
            _ => event.new.as_ref().map_or(false, |new| filter.matches(new)),
        }
    }
}

/// Handle to a live change-feed subscription.
///
/// Forwarding stops when [`FeedSubscription::unsubscribe`] is awaited or the
/// handle is dropped, whichever comes first.
pub struct FeedSubscription {
    channel: String,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    /// Wrap a forwarding task that exits once `stop` fires.
    pub fn new(channel: impl Into<String>, stop: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            stop: Some(stop),
            task: Some(task),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// True while the forwarding task is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Stop forwarding and wait for the task to wind down.
    pub async fn unsubscribe(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(channel = %self.channel, "Change feed unsubscribed");
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: ChangeKind, new: Option<Value>, old: Option<Value>) -> ChangeEvent {
        ChangeEvent {
            kind,
            table: "items".to_string(),
            new,
            old,
        }
    }

    #[test]
    fn test_feed_spec_filters_by_table_and_row() {
        let spec = FeedSpec::new("items_changes", "items").with_filter(Filter::eq("user_id", "u1"));

        assert!(spec.accepts(&event(ChangeKind::Insert, Some(json!({"user_id": "u1"})), None)));
        assert!(!spec.accepts(&event(ChangeKind::Insert, Some(json!({"user_id": "u2"})), None)));
        assert!(spec.accepts(&event(ChangeKind::Delete, None, Some(json!({"user_id": "u1"})))));
        assert!(!spec.accepts(&event(ChangeKind::Delete, None, Some(json!({"id": "i1", "user_id": "u2"})))));

        let mut other_table = event(ChangeKind::Insert, Some(json!({"user_id": "u1"})), None);
        other_table.table = "profiles".to_string();
        assert!(!spec.accepts(&other_table));
    }

    #[test]
    fn test_key_only_delete_is_accepted() {
        let spec = FeedSpec::new("items_changes", "items").with_filter(Filter::eq("user_id", "u1"));

        assert!(spec.accepts(&event(ChangeKind::Delete, None, Some(json!({"id": "i1"})))));
        assert!(spec.accepts(&event(ChangeKind::Delete, None, None)));
        assert!(!spec.accepts(&event(ChangeKind::Update, Some(json!({"id": "i1"})), Some(json!({"id": "i1"})))));
    }

    #[test]
    fn test_change_kind_from_wire() {
        assert_eq!(ChangeKind::from_wire("UPDATE"), Some(ChangeKind::Update));
        assert_eq!(ChangeKind::from_wire("TRUNCATE"), None);
    }

    #[tokio::test]
    async fn test_drop_stops_task() {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = stop_rx.await;
            let _ = done_tx.send(());
        });

        let sub = FeedSubscription::new("c", stop_tx, task);
        assert_eq!(sub.channel(), "c");
        drop(sub);

        tokio::time::timeout(std::time::Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_waits_for_task() {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = stop_rx.await;
        });

        let sub = FeedSubscription::new("c", stop_tx, task);
        assert!(sub.is_active());
        sub.unsubscribe().await;
    }
}
