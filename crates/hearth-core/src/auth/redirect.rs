//! Where navigation has to go for the current session.
//!
//! Routes are grouped by their first path segment. Everything under
//! `(auth)` is for signed-out users; everything else needs a session.

use tokio::sync::watch;

use super::session::SessionSnapshot;

/// First segment of the signed-out route group
pub const AUTH_GROUP: &str = "(auth)";

/// Landing route after a successful login
pub const HOME_ROUTE: &str = "/(tabs)/home";

/// Route for signed-out users
pub const LOGIN_ROUTE: &str = "/(auth)/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// Signed in but looking at a login/signup screen
    Home,
    /// Signed out but outside the auth screens
    Login,
}

impl Redirect {
    pub fn route(&self) -> &'static str {
        match self {
            Redirect::Home => HOME_ROUTE,
            Redirect::Login => LOGIN_ROUTE,
        }
    }
}

/// Decide whether the current location must change. Nothing is decided
/// while an authentication operation is in flight.
pub fn redirect_for<S: AsRef<str>>(session: &SessionSnapshot, segments: &[S]) -> Option<Redirect> {
    if session.is_loading_auth {
        return None;
    }

    let in_auth_group = segments.first().map(|s| s.as_ref() == AUTH_GROUP).unwrap_or(false);
    match (session.is_authenticated(), in_auth_group) {
        (true, true) => Some(Redirect::Home),
        (false, false) => Some(Redirect::Login),
        _ => None,
    }
}

/// Re-evaluates [`redirect_for`] whenever the session or the current route
/// changes.
pub struct RedirectWatcher {
    session: watch::Receiver<SessionSnapshot>,
    segments: Vec<String>,
}

impl RedirectWatcher {
    pub fn new(session: watch::Receiver<SessionSnapshot>, segments: Vec<String>) -> Self {
        Self { session, segments }
    }

    /// Redirect for the current state, without waiting.
    pub fn current(&mut self) -> Option<Redirect> {
        let snapshot = self.session.borrow_and_update().clone();
        redirect_for(&snapshot, self.segments.as_slice())
    }

    /// The user navigated. Following a redirect should be reported here too.
    pub fn set_segments(&mut self, segments: Vec<String>) -> Option<Redirect> {
        self.segments = segments;
        self.current()
    }

    /// Wait for the next session change and evaluate it. Returns `None`
    /// once the session manager is gone.
    pub async fn changed(&mut self) -> Option<Option<Redirect>> {
        self.session.changed().await.ok()?;
        Some(self.current())
    }
}

/// Split a route path into its segments: `"/(auth)/login"` becomes
/// `["(auth)", "login"]`.
pub fn route_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
