use backend_client::{AuthApi, Backend, BackendOp, InMemoryBackend};
use data_access::{DataError, DeletedRow, Item, ItemAccess, ItemInsert, ItemStatus, ItemUpdate, RowChange};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn setup() -> (Arc<InMemoryBackend>, ItemAccess) {
    let memory = Arc::new(InMemoryBackend::new());
    let backend: Arc<dyn Backend> = memory.clone();
    (memory, ItemAccess::new(backend))
}

fn seed_item(memory: &InMemoryBackend, owner: &str, title: &str, description: Option<&str>) -> String {
    let row = memory.seed(
        "items",
        json!({
            "user_id": owner,
            "title": title,
            "description": description,
            "status": "pending",
        }),
    );
    row["id"].as_str().unwrap().to_string()
}

async fn next_change<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for change")
        .expect("feed closed")
}

fn titles(items: &[Item]) -> Vec<&str> {
    items.iter().map(|item| item.title.as_str()).collect()
}

#[tokio::test]
async fn test_get_absent_item_is_none() {
    let (_, items) = setup();
    assert!(items.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_and_list_newest_first() {
    let (_, items) = setup();

    items.create(&ItemInsert::new("u1", "first")).await.unwrap();
    let second = items
        .create(&ItemInsert::new("u1", "second").description("details").status(ItemStatus::InProgress))
        .await
        .unwrap();
    items.create(&ItemInsert::new("u2", "not mine")).await.unwrap();

    assert_eq!(second.status, ItemStatus::InProgress);
    assert_eq!(second.description.as_deref(), Some("details"));

    let listed = items.list("u1").await.unwrap();
    assert_eq!(titles(&listed), vec!["second", "first"]);

    let fetched = items.get(&second.id).await.unwrap().unwrap();
    assert_eq!(fetched, second);
}

#[tokio::test]
async fn test_backend_errors_pass_through_with_code() {
    let (memory, items) = setup();
    memory.fail_next(BackendOp::Insert, Some("items"), 403, "42501", "permission denied for table items");

    let err = items.create(&ItemInsert::new("u1", "blocked")).await.unwrap_err();
    assert!(matches!(err, DataError::Backend(_)));
    assert_eq!(err.code(), Some("42501"));
    assert_eq!(err.to_string(), "permission denied for table items");
    assert!(memory.rows("items").is_empty());
}

#[tokio::test]
async fn test_update_missing_item_is_not_found() {
    let (_, items) = setup();
    let err = items
        .update(
            "missing",
            &ItemUpdate {
                title: Some("renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.backend().is_some_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn test_archive_from_every_status() {
    let (_, items) = setup();

    for status in ItemStatus::ALL {
        let item = items
            .create(&ItemInsert::new("u1", status.as_str()).status(status))
            .await
            .unwrap();
        let archived = items.archive(&item.id).await.unwrap();
        assert_eq!(archived.status, ItemStatus::Archived);
        assert!(archived.updated_at >= item.updated_at);
    }

    let archived = items.list_by_status("u1", ItemStatus::Archived).await.unwrap();
    assert_eq!(archived.len(), ItemStatus::ALL.len());
    assert!(items.list_by_status("u1", ItemStatus::Pending).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_moves_freely_and_delete_removes() {
    let (memory, items) = setup();
    let item = items.create(&ItemInsert::new("u1", "task")).await.unwrap();

    let done = items.update_status(&item.id, ItemStatus::Completed).await.unwrap();
    assert_eq!(done.status, ItemStatus::Completed);
    let reopened = items.update_status(&item.id, ItemStatus::Pending).await.unwrap();
    assert_eq!(reopened.status, ItemStatus::Pending);

    items.delete(&item.id).await.unwrap();
    assert!(items.get(&item.id).await.unwrap().is_none());
    assert!(memory.rows("items").is_empty());
}

#[tokio::test]
async fn test_search_is_scoped_and_case_insensitive() {
    let (memory, items) = setup();
    seed_item(&memory, "u1", "Quarterly REPORT", None);
    seed_item(&memory, "u1", "Groceries", Some("write the report outline"));
    seed_item(&memory, "u1", "Unrelated", None);
    seed_item(&memory, "u2", "Someone else's report", None);

    let found = items.search("u1", "report").await.unwrap();
    let mut found = titles(&found);
    found.sort();
    assert_eq!(found, vec!["Groceries", "Quarterly REPORT"]);
}

#[tokio::test]
async fn test_empty_search_lists_everything_owned() {
    let (memory, items) = setup();
    seed_item(&memory, "u1", "a", None);
    seed_item(&memory, "u1", "b", None);
    seed_item(&memory, "u2", "c", None);

    assert_eq!(items.search("u1", "").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_search_treats_pattern_characters_literally() {
    let (memory, items) = setup();
    seed_item(&memory, "u1", "100% done", None);
    seed_item(&memory, "u1", "1000 done", None);
    seed_item(&memory, "u1", "snake_case", None);
    seed_item(&memory, "u1", "snakeXcase", None);
    seed_item(&memory, "u1", "a,b (c)", None);

    assert_eq!(titles(&items.search("u1", "0%").await.unwrap()), vec!["100% done"]);
    assert_eq!(titles(&items.search("u1", "e_c").await.unwrap()), vec!["snake_case"]);
    assert_eq!(titles(&items.search("u1", ",b (").await.unwrap()), vec!["a,b (c)"]);
    assert!(items.search("u1", "*").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_update_all_found() {
    let (memory, items) = setup();
    let a = seed_item(&memory, "u1", "a", None);
    let b = seed_item(&memory, "u1", "b", None);

    let updated = items
        .bulk_update_status(&[a.clone(), b.clone(), a.clone()], ItemStatus::Completed)
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|item| item.status == ItemStatus::Completed));
}

#[tokio::test]
async fn test_bulk_update_with_no_ids_is_a_no_op() {
    let (memory, items) = setup();
    memory.fail_next(BackendOp::Update, Some("items"), 500, "XX000", "should not be called");

    assert!(items.bulk_update_status(&[], ItemStatus::Completed).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_update_reports_missing_ids() {
    let (memory, items) = setup();
    let a = seed_item(&memory, "u1", "a", None);

    let err = items
        .bulk_update_status(&[a.clone(), "ghost".to_string()], ItemStatus::InProgress)
        .await
        .unwrap_err();

    match err {
        DataError::PartialBulkUpdate { updated, missing } => {
            assert_eq!(updated, vec![a.clone()]);
            assert_eq!(missing, vec!["ghost".to_string()]);
        }
        other => panic!("expected partial bulk update, got {other:?}"),
    }
    assert_eq!(items.get(&a).await.unwrap().unwrap().status, ItemStatus::InProgress);
}

#[tokio::test]
async fn test_bulk_update_skips_rows_of_other_owners() {
    let (memory, items) = setup();
    memory.set_row_owner("items", "user_id");
    memory.set_enforce_ownership(true);

    let session = memory
        .sign_up("ada@example.com", "hunter22", json!({}))
        .await
        .unwrap()
        .session
        .unwrap();
    let me = session.user.id.clone();

    let mine = seed_item(&memory, &me, "mine", None);
    let theirs = seed_item(&memory, "someone-else", "theirs", None);

    let err = items
        .bulk_update_status(&[mine.clone(), theirs.clone()], ItemStatus::Completed)
        .await
        .unwrap_err();
    match err {
        DataError::PartialBulkUpdate { updated, missing } => {
            assert_eq!(updated, vec![mine.clone()]);
            assert_eq!(missing, vec![theirs.clone()]);
        }
        other => panic!("expected partial bulk update, got {other:?}"),
    }

    let rows = memory.rows("items");
    let status_of = |id: &str| {
        rows.iter()
            .find(|row| row["id"] == id)
            .map(|row| row["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status_of(&mine), "completed");
    assert_eq!(status_of(&theirs), "pending");
}

#[tokio::test]
async fn test_subscription_forwards_typed_changes() {
    let (_, items) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = items
        .subscribe("u1", move |change: RowChange<Item>| {
            let _ = tx.send(change);
        })
        .await
        .unwrap();
    assert_eq!(subscription.channel(), "items_changes");

    items.create(&ItemInsert::new("u2", "ignored")).await.unwrap();
    let created = items.create(&ItemInsert::new("u1", "watched")).await.unwrap();
    assert_eq!(next_change(&mut rx).await, RowChange::Inserted(created.clone()));

    let done = items.update_status(&created.id, ItemStatus::Completed).await.unwrap();
    assert_eq!(
        next_change(&mut rx).await,
        RowChange::Updated {
            old: Some(created.clone()),
            new: done.clone()
        }
    );

    items.delete(&created.id).await.unwrap();
    assert_eq!(next_change(&mut rx).await, RowChange::Deleted(DeletedRow::Row(done)));

    subscription.unsubscribe().await;
}

#[tokio::test]
async fn test_subscription_forwards_key_only_deletes() {
    let (memory, items) = setup();
    memory.set_key_only_deletes(true);
    let id = seed_item(&memory, "u1", "short lived", None);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = items
        .subscribe("u1", move |change: RowChange<Item>| {
            let _ = tx.send(change);
        })
        .await
        .unwrap();

    items.delete(&id).await.unwrap();
    assert_eq!(next_change(&mut rx).await, RowChange::Deleted(DeletedRow::Key(id)));

    subscription.unsubscribe().await;
}

#[tokio::test]
async fn test_bulk_update_without_enforcement_touches_foreign_rows() {
    let (memory, items) = setup();
    let a = seed_item(&memory, "u1", "a", None);
    let b = seed_item(&memory, "u2", "b", None);
    let c = seed_item(&memory, "u1", "c", None);

    let updated = items
        .bulk_update_status(&[a.clone(), b.clone(), c.clone()], ItemStatus::Archived)
        .await
        .unwrap();
    assert_eq!(updated.len(), 3);

    let foreign = items.get(&b).await.unwrap().unwrap();
    assert_eq!(foreign.user_id, "u2");
    assert_eq!(foreign.status, ItemStatus::Archived);
    for id in [&a, &c] {
        assert_eq!(items.get(id).await.unwrap().unwrap().status, ItemStatus::Archived);
    }
}
