use backend_client::{Backend, BackendOp, InMemoryBackend};
use data_access::{
    ItemAccess, ItemInsert, Profile, ProfileAccess, ProfileInsert, ProfileUpdate, RowChange, SubscriptionStatus,
    SubscriptionSummary,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn setup() -> (Arc<InMemoryBackend>, ProfileAccess, ItemAccess) {
    let memory = Arc::new(InMemoryBackend::new());
    let backend: Arc<dyn Backend> = memory.clone();
    (memory, ProfileAccess::new(backend.clone()), ItemAccess::new(backend))
}

async fn create_profile(profiles: &ProfileAccess, id: &str) -> Profile {
    profiles
        .create(&ProfileInsert::new_free(
            id,
            Some(format!("{id}@example.com")),
            Some(id.to_string()),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_new_profile_is_free() {
    let (_, profiles, _) = setup();
    let created = create_profile(&profiles, "u1").await;

    assert!(!created.is_paid);
    assert_eq!(created.subscription_status, SubscriptionStatus::Free);
    assert_eq!(profiles.get("u1").await.unwrap(), Some(created));
    assert_eq!(profiles.get("nobody").await.unwrap(), None);
}

#[tokio::test]
async fn test_duplicate_profile_surfaces_conflict_code() {
    let (_, profiles, _) = setup();
    create_profile(&profiles, "u1").await;

    let err = profiles
        .create(&ProfileInsert::new_free("u1", None, None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("23505"));
}

#[tokio::test]
async fn test_update_changes_only_given_fields() {
    let (_, profiles, _) = setup();
    let created = create_profile(&profiles, "u1").await;

    let updated = profiles
        .update(
            "u1",
            &ProfileUpdate {
                display_name: Some("Ada Lovelace".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.display_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(updated.email, created.email);
    assert_eq!(updated.subscription_status, SubscriptionStatus::Free);
}

#[tokio::test]
async fn test_subscription_status_keeps_paid_flag_in_step() {
    let (_, profiles, _) = setup();
    create_profile(&profiles, "u1").await;

    for status in SubscriptionStatus::ALL {
        let profile = profiles.update_subscription_status("u1", status).await.unwrap();
        assert_eq!(profile.subscription_status, status);
        assert_eq!(profile.is_paid, status == SubscriptionStatus::Paid);

        let summary = profiles.check_subscription_status("u1").await.unwrap();
        assert_eq!(
            summary,
            SubscriptionSummary {
                is_paid: status == SubscriptionStatus::Paid,
                status
            }
        );
    }
}

#[tokio::test]
async fn test_missing_profile_reports_free() {
    let (_, profiles, _) = setup();
    let summary = profiles.check_subscription_status("nobody").await.unwrap();
    assert_eq!(summary, SubscriptionSummary::default());
    assert!(!summary.is_paid);
}

#[tokio::test]
async fn test_check_subscription_status_propagates_backend_errors() {
    let (memory, profiles, _) = setup();
    memory.fail_next(BackendOp::Select, Some("profiles"), 503, "PGRST000", "database unavailable");

    let err = profiles.check_subscription_status("u1").await.unwrap_err();
    assert_eq!(err.code(), Some("PGRST000"));
}

#[tokio::test]
async fn test_profile_with_items_embeds_owned_items() {
    let (_, profiles, items) = setup();
    create_profile(&profiles, "u1").await;
    create_profile(&profiles, "u2").await;
    items.create(&ItemInsert::new("u1", "one")).await.unwrap();
    items.create(&ItemInsert::new("u1", "two")).await.unwrap();
    items.create(&ItemInsert::new("u2", "other")).await.unwrap();

    let loaded = profiles.get_with_items("u1").await.unwrap().unwrap();
    assert_eq!(loaded.profile.id, "u1");
    let mut titles: Vec<_> = loaded.items.iter().map(|item| item.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["one", "two"]);

    let other = profiles.get_with_items("u2").await.unwrap().unwrap();
    assert_eq!(other.items.len(), 1);

    assert!(profiles.get_with_items("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_profile_subscription_sees_only_its_row() {
    let (_, profiles, _) = setup();
    create_profile(&profiles, "u1").await;
    create_profile(&profiles, "u2").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = profiles
        .subscribe("u1", move |change: RowChange<Profile>| {
            let _ = tx.send(change);
        })
        .await
        .unwrap();
    assert_eq!(subscription.channel(), "profile_changes");

    profiles
        .update_subscription_status("u2", SubscriptionStatus::Paid)
        .await
        .unwrap();
    let paid = profiles
        .update_subscription_status("u1", SubscriptionStatus::Paid)
        .await
        .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for change")
        .expect("feed closed");
    match change {
        RowChange::Updated { old, new } => {
            assert_eq!(new, paid);
            assert_eq!(old.map(|p| p.subscription_status), Some(SubscriptionStatus::Free));
        }
        other => panic!("expected update, got {other:?}"),
    }

    subscription.unsubscribe().await;
}
