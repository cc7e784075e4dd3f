//! Seeded in-process backend for `--offline` runs.

use backend_client::{AuthApi, BackendResult, InMemoryBackend};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const DEMO_EMAIL: &str = "demo@example.com";
pub const DEMO_PASSWORD: &str = "demo-password";

const SAMPLE_ITEMS: [(&str, &str, &str); 4] = [
    ("Set up the project", "Clone the starter and configure the backend keys", "completed"),
    ("Design the landing page", "Hero, feature grid and call to action", "in_progress"),
    ("Write onboarding emails", "Welcome and verification templates", "pending"),
    ("Draft pricing tiers", "Free, trial and paid plans", "pending"),
];

/// An in-memory backend with row ownership enforced, a signed-in demo
/// account, its profile, and a few items.
pub async fn offline_backend() -> BackendResult<Arc<InMemoryBackend>> {
    let memory = Arc::new(InMemoryBackend::new());
    memory.set_row_owner("profiles", "id");
    memory.set_row_owner("items", "user_id");
    memory.set_enforce_ownership(true);

    let response = memory
        .sign_up(DEMO_EMAIL, DEMO_PASSWORD, json!({ "display_name": "Demo" }))
        .await?;
    let user_id = response.user.id;

    memory.seed(
        "profiles",
        json!({
            "id": user_id,
            "email": DEMO_EMAIL,
            "display_name": "Demo",
            "is_paid": false,
            "subscription_status": "trial",
        }),
    );
    for (title, description, status) in SAMPLE_ITEMS {
        memory.seed(
            "items",
            json!({
                "user_id": user_id,
                "title": title,
                "description": description,
                "status": status,
            }),
        );
    }

    info!(user_id = %user_id, items = SAMPLE_ITEMS.len(), "Offline backend seeded");
    Ok(memory)
}
