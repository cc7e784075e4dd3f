//! Dashboard summary: greeting, subscription chip, item counts, recent items.

use crate::app::AppState;
use backend_client::User;
use data_access::{DataResult, Item, ItemStatus, Profile, SubscriptionStatus};
use std::fmt::Write;

const RECENT_ITEMS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub display_name: String,
    pub subscription: SubscriptionStatus,
    pub is_paid: bool,
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    /// Newest first, at most six
    pub recent: Vec<Item>,
}

impl DashboardSummary {
    /// `items` must already be ordered newest first.
    pub fn build(user: &User, profile: Option<&Profile>, items: &[Item]) -> Self {
        let display_name = profile
            .and_then(|p| p.display_name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| {
                user.email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "there".to_string());

        let count = |status: ItemStatus| items.iter().filter(|item| item.status == status).count();

        Self {
            display_name,
            subscription: profile.map(|p| p.subscription_status).unwrap_or_default(),
            is_paid: profile.is_some_and(|p| p.is_paid),
            total: items.len(),
            completed: count(ItemStatus::Completed),
            in_progress: count(ItemStatus::InProgress),
            recent: items.iter().take(RECENT_ITEMS).cloned().collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let chip = if self.is_paid {
            format!("[{} ✓]", self.subscription)
        } else {
            format!("[{}]", self.subscription)
        };
        let _ = writeln!(out, "Welcome, {}! {}", self.display_name, chip);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Total: {}   Completed: {}   In progress: {}",
            self.total, self.completed, self.in_progress
        );

        if self.recent.is_empty() {
            let _ = writeln!(out, "\nNo items yet.");
            return out;
        }

        let _ = writeln!(out, "\nRecent items");
        for item in &self.recent {
            let _ = writeln!(
                out,
                "  {:<36}  {:<11}  {}",
                item.id,
                item.status.as_str().replace('_', " "),
                item.title
            );
            if let Some(description) = item.description.as_deref().filter(|d| !d.is_empty()) {
                let _ = writeln!(out, "  {:<36}  {:<11}  {}", "", "", description);
            }
        }
        out
    }
}

/// Fetch items and profile together and summarize them.
pub async fn load(app: &AppState, user: &User) -> DataResult<DashboardSummary> {
    let (items, profile) = tokio::try_join!(app.items.list(&user.id), app.profiles.get(&user.id))?;
    Ok(DashboardSummary::build(user, profile.as_ref(), &items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(email: Option<&str>) -> User {
        serde_json::from_value(json!({
            "id": "u1",
            "email": email,
        }))
        .unwrap()
    }

    fn item(n: usize, status: &str) -> Item {
        serde_json::from_value(json!({
            "id": format!("i{}", n),
            "user_id": "u1",
            "title": format!("Item {}", n),
            "status": status,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn profile(display_name: Option<&str>, status: &str, is_paid: bool) -> Profile {
        serde_json::from_value(json!({
            "id": "u1",
            "display_name": display_name,
            "is_paid": is_paid,
            "subscription_status": status,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_counts_and_recent_slice() {
        let items: Vec<Item> = (0..8)
            .map(|n| item(n, ["pending", "in_progress", "completed", "archived"][n % 4]))
            .collect();
        let summary = DashboardSummary::build(&user(Some("ada@example.com")), None, &items);

        assert_eq!(summary.total, 8);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.in_progress, 2);
        assert_eq!(summary.recent.len(), 6);
        assert_eq!(summary.recent[0].id, "i0");
    }

    #[test]
    fn test_greeting_prefers_display_name() {
        let with_profile = DashboardSummary::build(
            &user(Some("ada@example.com")),
            Some(&profile(Some("Ada"), "paid", true)),
            &[],
        );
        assert_eq!(with_profile.display_name, "Ada");
        assert_eq!(with_profile.subscription, SubscriptionStatus::Paid);
        assert!(with_profile.render().starts_with("Welcome, Ada! [paid ✓]"));

        let without = DashboardSummary::build(&user(Some("grace@example.com")), None, &[]);
        assert_eq!(without.display_name, "grace");
        assert_eq!(without.subscription, SubscriptionStatus::Free);
        assert!(without.render().contains("No items yet."));

        let anonymous = DashboardSummary::build(&user(None), None, &[]);
        assert_eq!(anonymous.display_name, "there");
    }

    #[test]
    fn test_render_lists_status_with_spaces() {
        let summary = DashboardSummary::build(&user(None), None, &[item(1, "in_progress")]);
        assert!(summary.render().contains("in progress"));
    }
}
