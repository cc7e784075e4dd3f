//! Routes and the navigation decisions made on auth events.

use session_sync::{NavigationIntent, SessionPhase, SessionSnapshot};
use std::fmt;

/// A page of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    SignIn,
    SignUp,
    Dashboard,
    AuthCallback,
    ResetPassword,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Landing => "/",
            Route::SignIn => "/signin",
            Route::SignUp => "/signup",
            Route::Dashboard => "/dashboard",
            Route::AuthCallback => "/auth/callback",
            Route::ResetPassword => "/auth/reset-password",
        }
    }

    pub fn requires_session(&self) -> bool {
        matches!(self, Route::Dashboard)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl From<NavigationIntent> for Route {
    fn from(intent: NavigationIntent) -> Self {
        match intent {
            NavigationIntent::Dashboard => Route::Dashboard,
            NavigationIntent::Landing => Route::Landing,
        }
    }
}

/// Owns the current route. The only place routes change.
#[derive(Debug)]
pub struct Navigator {
    current: Route,
    history: Vec<Route>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            current: Route::Landing,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Route {
        self.current
    }

    pub fn history(&self) -> &[Route] {
        &self.history
    }

    /// Where `route` actually lands given the session state.
    ///
    /// While the first session fetch is pending the request is left alone.
    pub fn resolve(route: Route, snapshot: &SessionSnapshot) -> Route {
        match snapshot.phase {
            SessionPhase::Initializing => route,
            SessionPhase::Anonymous if route.requires_session() => Route::SignIn,
            SessionPhase::Authenticated if route == Route::Landing => Route::Dashboard,
            _ => route,
        }
    }

    /// Go to `route`, subject to [`Navigator::resolve`].
    pub fn navigate(&mut self, route: Route, snapshot: &SessionSnapshot) -> Route {
        let target = Self::resolve(route, snapshot);
        if target != self.current {
            self.history.push(self.current);
            self.current = target;
        }
        target
    }

    /// Act on an intent published with an auth event.
    pub fn follow(&mut self, intent: NavigationIntent, snapshot: &SessionSnapshot) -> Route {
        self.navigate(Route::from(intent), snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(phase: SessionPhase) -> SessionSnapshot {
        SessionSnapshot { phase, session: None }
    }

    #[test]
    fn test_intents_map_to_routes() {
        assert_eq!(Route::from(NavigationIntent::Dashboard), Route::Dashboard);
        assert_eq!(Route::from(NavigationIntent::Landing), Route::Landing);
    }

    #[test]
    fn test_dashboard_needs_session() {
        assert_eq!(
            Navigator::resolve(Route::Dashboard, &snapshot(SessionPhase::Anonymous)),
            Route::SignIn
        );
        assert_eq!(
            Navigator::resolve(Route::Dashboard, &snapshot(SessionPhase::Authenticated)),
            Route::Dashboard
        );
        assert_eq!(
            Navigator::resolve(Route::Dashboard, &snapshot(SessionPhase::Initializing)),
            Route::Dashboard
        );
    }

    #[test]
    fn test_landing_forwards_signed_in_users() {
        assert_eq!(
            Navigator::resolve(Route::Landing, &snapshot(SessionPhase::Authenticated)),
            Route::Dashboard
        );
        assert_eq!(
            Navigator::resolve(Route::Landing, &snapshot(SessionPhase::Anonymous)),
            Route::Landing
        );
    }

    #[test]
    fn test_follow_records_history() {
        let mut navigator = Navigator::new();
        let signed_in = snapshot(SessionPhase::Authenticated);
        let signed_out = snapshot(SessionPhase::Anonymous);

        assert_eq!(navigator.follow(NavigationIntent::Dashboard, &signed_in), Route::Dashboard);
        assert_eq!(navigator.follow(NavigationIntent::Landing, &signed_out), Route::Landing);
        assert_eq!(navigator.follow(NavigationIntent::Landing, &signed_out), Route::Landing);

        assert_eq!(navigator.current(), Route::Landing);
        assert_eq!(navigator.history(), &[Route::Landing, Route::Dashboard]);
    }

    #[test]
    fn test_paths() {
        assert_eq!(Route::AuthCallback.to_string(), "/auth/callback");
        assert_eq!(Route::ResetPassword.path(), "/auth/reset-password");
    }
}
