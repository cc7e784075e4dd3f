//! Typed change-feed forwarding.

use crate::{DataError, DataResult};
use backend_client::{
    Backend, ChangeEvent, ChangeFeedApi, ChangeHandler, ChangeKind, FeedSpec, FeedSubscription,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// A deleted row. The feed may carry only the primary key.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletedRow<T> {
    Row(T),
    Key(String),
}

/// One typed row change.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange<T> {
    Inserted(T),
    /// `old` is present only when the table publishes full old rows.
    Updated { old: Option<T>, new: T },
    Deleted(DeletedRow<T>),
}

impl<T: DeserializeOwned> RowChange<T> {
    /// Decode a raw change event.
    pub fn decode(event: ChangeEvent) -> DataResult<Self> {
        let table = event.table;
        let row = |value: serde_json::Value| -> DataResult<T> {
            serde_json::from_value(value).map_err(|e| DataError::decode(&table, e))
        };
        let missing = |what: &str| {
            DataError::decode(
                &table,
                serde::de::Error::custom(format!("change event without {} row", what)),
            )
        };

        match event.kind {
            ChangeKind::Insert => {
                let new = event.new.ok_or_else(|| missing("new"))?;
                Ok(RowChange::Inserted(row(new)?))
            }
            ChangeKind::Update => {
                let new = event.new.ok_or_else(|| missing("new"))?;
                let old = event.old.and_then(|old| serde_json::from_value(old).ok());
                Ok(RowChange::Updated { old, new: row(new)? })
            }
            ChangeKind::Delete => {
                let old = event.old.ok_or_else(|| missing("old"))?;
                let key = old.get("id").and_then(|id| id.as_str()).map(str::to_string);
                match (serde_json::from_value::<T>(old), key) {
                    (Ok(full), _) => Ok(RowChange::Deleted(DeletedRow::Row(full))),
                    (Err(_), Some(key)) => Ok(RowChange::Deleted(DeletedRow::Key(key))),
                    (Err(e), None) => Err(DataError::decode(&table, e)),
                }
            }
        }
    }
}

/// Subscribe `callback` to typed changes matching `spec`.
///
/// Every insert, update and delete is forwarded. Payloads that do not decode
/// are logged and skipped.
pub(crate) async fn subscribe_rows<T, F>(
    backend: &Arc<dyn Backend>,
    spec: FeedSpec,
    callback: F,
) -> DataResult<FeedSubscription>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(RowChange<T>) + Send + Sync + 'static,
{
    let channel = spec.channel.clone();
    let handler: ChangeHandler = Arc::new(move |event: ChangeEvent| {
        let kind = event.kind;
        match RowChange::<T>::decode(event) {
            Ok(change) => {
                debug!(channel = %channel, kind = ?kind, "Forwarding row change");
                callback(change);
            }
            Err(e) => warn!(channel = %channel, error = %e, "Skipping undecodable change payload"),
        }
    });

    Ok(backend.subscribe(spec, handler).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
        title: String,
    }

    fn event(kind: ChangeKind, new: Option<serde_json::Value>, old: Option<serde_json::Value>) -> ChangeEvent {
        ChangeEvent {
            kind,
            table: "items".to_string(),
            new,
            old,
        }
    }

    #[test]
    fn test_update_with_partial_old_row() {
        let change = RowChange::<Row>::decode(event(
            ChangeKind::Update,
            Some(json!({"id": "1", "title": "new"})),
            Some(json!({"id": "1"})),
        ))
        .unwrap();

        assert_eq!(
            change,
            RowChange::Updated {
                old: None,
                new: Row {
                    id: "1".into(),
                    title: "new".into()
                }
            }
        );
    }

    #[test]
    fn test_delete_with_key_only() {
        let change =
            RowChange::<Row>::decode(event(ChangeKind::Delete, None, Some(json!({"id": "1"})))).unwrap();
        assert_eq!(change, RowChange::Deleted(DeletedRow::Key("1".into())));
    }

    #[test]
    fn test_undecodable_insert_is_an_error() {
        let err = RowChange::<Row>::decode(event(ChangeKind::Insert, Some(json!({"id": 5})), None)).unwrap_err();
        assert!(matches!(err, DataError::Decode { .. }));
    }
}
