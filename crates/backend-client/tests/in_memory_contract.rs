use backend_client::{
    AuthApi, AuthChangeKind, BackendOp, ChangeEvent, ChangeFeedApi, ChangeKind, FeedSpec, Filter,
    InMemoryBackend, MailKind, OAuthProvider, Query, TableApi,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for change event")
        .expect("feed closed")
}

#[tokio::test]
async fn test_auth_operations_publish_changes() {
    let backend = InMemoryBackend::new();
    let mut events = backend.auth_events();

    let signed_up = backend
        .sign_up("ada@example.com", "hunter22", json!({"display_name": "Ada"}))
        .await
        .unwrap();
    let session = signed_up.session.unwrap();

    let change = events.recv().await.unwrap();
    assert_eq!(change.kind, AuthChangeKind::SignedIn);
    assert_eq!(change.session.as_ref(), Some(&session));

    backend.refresh_session().await.unwrap();
    assert_eq!(events.recv().await.unwrap().kind, AuthChangeKind::TokenRefreshed);

    backend.update_password("correct-horse").await.unwrap();
    assert_eq!(events.recv().await.unwrap().kind, AuthChangeKind::UserUpdated);

    backend.sign_out().await.unwrap();
    let change = events.recv().await.unwrap();
    assert_eq!(change.kind, AuthChangeKind::SignedOut);
    assert!(change.session.is_none());
    assert!(backend.get_session().await.unwrap().is_none());

    let err = backend
        .sign_in_with_password("ada@example.com", "hunter22")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("invalid_credentials"));
    backend
        .sign_in_with_password("ada@example.com", "correct-horse")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_sign_out_keeps_session() {
    let backend = InMemoryBackend::new();
    backend.sign_in_anonymously().await.unwrap();
    backend.fail_next(BackendOp::SignOut, None, 500, "unexpected_failure", "boom");

    let err = backend.sign_out().await.unwrap_err();
    assert_eq!(err.code(), Some("unexpected_failure"));
    assert!(backend.get_session().await.unwrap().is_some());
}

#[tokio::test]
async fn test_recovery_and_oauth_redirects() {
    let backend = InMemoryBackend::new().with_base_url("https://proj.example.co");

    backend
        .reset_password_for_email("ada@example.com", "http://localhost:3000/auth/reset-password")
        .await
        .unwrap();
    let mail = backend.sent_mail();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].kind, MailKind::Recovery);
    assert_eq!(
        mail[0].redirect_to.as_deref(),
        Some("http://localhost:3000/auth/reset-password")
    );

    let redirect = backend
        .oauth_redirect(OAuthProvider::Github, "http://localhost:3000/auth/callback")
        .await
        .unwrap();
    assert_eq!(redirect.url.host_str(), Some("proj.example.co"));
    assert!(redirect.url.as_str().contains("provider=github"));
}

#[tokio::test]
async fn test_change_feed_forwards_filtered_events_until_unsubscribed() {
    let backend = InMemoryBackend::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = backend
        .subscribe(
            FeedSpec::new("items_changes", "items").with_filter(Filter::eq("user_id", "u1")),
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        )
        .await
        .unwrap();

    backend.insert("items", json!({"user_id": "u2", "title": "other"})).await.unwrap();
    let mine = backend
        .insert("items", json!({"user_id": "u1", "title": "mine"}))
        .await
        .unwrap();

    let inserted = next_event(&mut rx).await;
    assert_eq!(inserted.kind, ChangeKind::Insert);
    assert_eq!(inserted.new.as_ref().unwrap()["title"], "mine");

    let id = mine["id"].as_str().unwrap().to_string();
    backend
        .update("items", &Query::new().eq("id", &id), json!({"status": "completed"}))
        .await
        .unwrap();
    let updated = next_event(&mut rx).await;
    assert_eq!(updated.kind, ChangeKind::Update);
    assert_eq!(updated.old.as_ref().unwrap()["title"], "mine");

    backend.delete("items", &Query::new().eq("id", &id)).await.unwrap();
    let deleted = next_event(&mut rx).await;
    assert_eq!(deleted.kind, ChangeKind::Delete);
    assert!(deleted.new.is_none());

    subscription.unsubscribe().await;
    backend.insert("items", json!({"user_id": "u1", "title": "late"})).await.unwrap();
    assert!(rx.recv().await.is_none());
}
