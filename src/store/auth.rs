//! Authentication store.
//!
//! Observed states: unknown (initial, `loading`), setup required,
//! unauthenticated and authenticated, with `loading` overlaid while an
//! operation runs. `init` and `logout` never surface an error.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{ErrorPolicy, StateCell};
use crate::api::{ApiClient, ApiError, User};

#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
    pub setup_required: bool,
}

impl AuthState {
    /// Nothing is known until `init` has run
    fn unknown() -> Self {
        Self {
            user: None,
            loading: true,
            error: None,
            setup_required: false,
        }
    }

    fn unauthenticated() -> Self {
        Self {
            user: None,
            loading: false,
            error: None,
            setup_required: false,
        }
    }

    fn authenticated(user: User) -> Self {
        Self {
            user: Some(user),
            loading: false,
            error: None,
            setup_required: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

pub struct AuthStore {
    api: Arc<ApiClient>,
    policy: Arc<ErrorPolicy>,
    state: StateCell<AuthState>,
}

impl AuthStore {
    pub fn new(api: Arc<ApiClient>, policy: Arc<ErrorPolicy>) -> Self {
        Self {
            api,
            policy,
            state: StateCell::new(AuthState::unknown()),
        }
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read(|s| s.is_authenticated())
    }

    /// Resolve the initial auth state. Any failure means "not logged in".
    pub async fn init(&self) {
        self.begin();

        let next = match self.resolve().await {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "Auth init fell back to unauthenticated");
                AuthState::unauthenticated()
            }
        };

        info!(
            authenticated = next.is_authenticated(),
            setup_required = next.setup_required,
            "Auth state resolved"
        );
        self.state.set(next);
    }

    async fn resolve(&self) -> Result<AuthState, ApiError> {
        let status = self.api.auth_status().await?;
        if status.setup_required {
            return Ok(AuthState {
                setup_required: true,
                ..AuthState::unauthenticated()
            });
        }

        // A stored token is kept even if the server rejects it
        if self.api.session().token().is_none() {
            return Ok(AuthState::unauthenticated());
        }

        let user = self.api.me().await?;
        Ok(AuthState::authenticated(user))
    }

    pub async fn login(&self, username: &str, password: &str) -> bool {
        self.begin();

        match self.api.login(username, password).await {
            Ok(response) => {
                info!(username = %response.user.username, "Logged in");
                self.state.set(AuthState::authenticated(response.user));
                true
            }
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    /// Create the first admin account, then log in with it.
    ///
    /// Not atomic: if setup succeeds and login fails, the login failure is
    /// what gets reported.
    pub async fn setup(&self, username: &str, password: &str) -> bool {
        self.begin();

        if let Err(e) = self.api.setup(username, password).await {
            self.fail(&e);
            return false;
        }
        info!(username = %username, "Initial admin account created");

        match self.api.login(username, password).await {
            Ok(response) => {
                self.state.set(AuthState::authenticated(response.user));
                true
            }
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    /// Always ends unauthenticated, whether or not the server was reachable
    pub async fn logout(&self) {
        if let Err(e) = self.api.logout().await {
            debug!(error = %e, "Server-side logout failed, clearing local session anyway");
        }
        self.api.session().clear();
        self.state.set(AuthState::unauthenticated());
        info!("Logged out");
    }

    pub fn clear_error(&self) {
        self.state.update(|s| s.error = None);
    }

    fn begin(&self) {
        self.state.update(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn fail(&self, err: &ApiError) {
        let message = self.policy.present(err);
        warn!(error = %err, "Auth operation failed");
        self.state.update(|s| {
            s.loading = false;
            s.error = Some(message);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockTransport, Reply};
    use crate::api::Method;
    use crate::session::{MemoryTokenStorage, SessionState};
    use serde_json::{json, Value};

    fn user_json(name: &str) -> Value {
        json!({
            "id": format!("id-{}", name),
            "username": name,
            "role": "admin",
            "created_at": "2024-05-01T10:00:00Z",
            "last_login_at": "2024-05-02T08:30:00Z"
        })
    }

    fn login_json(name: &str) -> Value {
        json!({
            "token": format!("token-{}", name),
            "expires_at": "2024-05-03T10:00:00Z",
            "user": user_json(name)
        })
    }

    fn store_with_token(
        mock: &Arc<MockTransport>,
        token: Option<&str>,
    ) -> (AuthStore, Arc<SessionState>) {
        let storage = match token {
            Some(t) => MemoryTokenStorage::with_token(t),
            None => MemoryTokenStorage::new(),
        };
        let session = Arc::new(SessionState::new(Arc::new(storage)));
        let api = Arc::new(ApiClient::new(mock.clone(), session.clone()));
        (AuthStore::new(api, Arc::new(ErrorPolicy::new())), session)
    }

    #[test]
    fn test_initial_state_is_loading() {
        let mock = Arc::new(MockTransport::new());
        let (store, _) = store_with_token(&mock, None);
        let state = store.snapshot();
        assert!(state.loading);
        assert!(state.user.is_none());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_init_setup_required_ignores_stored_token() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/auth/status", Reply::ok(json!({"setup_required": true})));
        let (store, _) = store_with_token(&mock, Some("stale"));

        store.init().await;

        let state = store.snapshot();
        assert!(state.setup_required);
        assert!(state.user.is_none());
        assert!(state.error.is_none());
        assert!(!state.loading);
        assert_eq!(mock.count(Method::Get, "/auth/me"), 0);
    }

    #[tokio::test]
    async fn test_init_with_valid_token() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/auth/status", Reply::ok(json!({"setup_required": false})));
        mock.on(Method::Get, "/auth/me", Reply::ok(user_json("alice")));
        let (store, _) = store_with_token(&mock, Some("good"));

        store.init().await;

        let state = store.snapshot();
        assert_eq!(state.user.unwrap().username, "alice");
        assert!(!state.setup_required);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_init_with_expired_token_is_silent() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/auth/status", Reply::ok(json!({"setup_required": false})));
        mock.on(Method::Get, "/auth/me", Reply::rejected(401, "invalid or expired token"));
        let (store, session) = store_with_token(&mock, Some("expired"));

        store.init().await;

        assert_eq!(store.snapshot(), AuthState::unauthenticated());
        // The stored token is not cleared
        assert_eq!(session.token(), Some("expired".to_string()));
    }

    #[tokio::test]
    async fn test_init_network_failure_is_silent() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/auth/status", Reply::Network("connection refused".into()));
        let (store, _) = store_with_token(&mock, Some("tok"));

        store.init().await;
        assert_eq!(store.snapshot(), AuthState::unauthenticated());
    }

    #[tokio::test]
    async fn test_init_without_token_skips_me() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/auth/status", Reply::ok(json!({"setup_required": false})));
        let (store, _) = store_with_token(&mock, None);

        store.init().await;

        assert_eq!(store.snapshot(), AuthState::unauthenticated());
        assert_eq!(mock.count(Method::Get, "/auth/me"), 0);
    }

    #[tokio::test]
    async fn test_login_success() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Post, "/auth/login", Reply::ok(login_json("bob")));
        let (store, session) = store_with_token(&mock, None);

        assert!(store.login("bob", "pw").await);

        let state = store.snapshot();
        assert_eq!(state.user.as_ref().unwrap().username, "bob");
        assert!(state.error.is_none());
        assert!(!state.loading);
        assert_eq!(session.token(), Some("token-bob".to_string()));
    }

    #[tokio::test]
    async fn test_login_failure_keeps_user() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Post, "/auth/login", Reply::ok(login_json("bob")));
        mock.on(
            Method::Post,
            "/auth/login",
            Reply::rejected(401, "invalid username or password"),
        );
        let (store, _) = store_with_token(&mock, None);
        assert!(store.login("bob", "pw").await);
        let before = store.snapshot().user;

        assert!(!store.login("bob", "wrong").await);

        let state = store.snapshot();
        assert_eq!(state.user, before);
        assert_eq!(
            state.error.as_deref(),
            Some("Invalid credentials or expired session.")
        );
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_rejections_normalized_by_status() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Post,
            "/auth/login",
            Reply::rejected(401, "Wrong credentials. Did you forget already? Impressive"),
        );
        mock.on(
            Method::Post,
            "/auth/setup",
            Reply::rejected(409, "Someone already claimed the throne. You're too slow"),
        );
        let (store, _) = store_with_token(&mock, None);

        assert!(!store.login("bob", "nope").await);
        assert_eq!(
            store.snapshot().error.as_deref(),
            Some("Invalid credentials or expired session.")
        );

        assert!(!store.setup("bob", "pw").await);
        assert_eq!(
            store.snapshot().error.as_deref(),
            Some("That conflicts with the current state on the server.")
        );
    }

    #[tokio::test]
    async fn test_setup_then_login() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Post,
            "/auth/setup",
            Reply::ok(json!({"success": true, "user": user_json("root")})),
        );
        mock.on(Method::Post, "/auth/login", Reply::ok(login_json("root")));
        let (store, session) = store_with_token(&mock, None);

        assert!(store.setup("root", "pw").await);

        let paths: Vec<String> = mock.calls().into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["/auth/setup", "/auth/login"]);
        let state = store.snapshot();
        assert_eq!(state.user.unwrap().username, "root");
        assert!(!state.setup_required);
        assert_eq!(session.token(), Some("token-root".to_string()));
    }

    #[tokio::test]
    async fn test_setup_ok_login_fails_reports_login_error() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Post, "/auth/setup", Reply::ok(json!({"success": true})));
        mock.on(Method::Post, "/auth/login", Reply::rejected(500, "session store unavailable"));
        let (store, _) = store_with_token(&mock, None);

        assert!(!store.setup("root", "pw").await);

        let state = store.snapshot();
        assert_eq!(state.error.as_deref(), Some("session store unavailable"));
        assert!(state.user.is_none());
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_setup_conflict_skips_login() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Post,
            "/auth/setup",
            Reply::rejected(409, "setup already completed"),
        );
        let (store, _) = store_with_token(&mock, None);

        assert!(!store.setup("root", "pw").await);
        assert_eq!(mock.count(Method::Post, "/auth/login"), 0);
        assert_eq!(
            store.snapshot().error.as_deref(),
            Some("That conflicts with the current state on the server.")
        );
    }

    #[tokio::test]
    async fn test_logout_always_clears() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Post, "/auth/login", Reply::ok(login_json("bob")));
        mock.on(Method::Post, "/auth/logout", Reply::Network("connection refused".into()));
        let (store, session) = store_with_token(&mock, None);
        assert!(store.login("bob", "pw").await);

        store.logout().await;

        let state = store.snapshot();
        assert!(state.user.is_none());
        assert!(state.error.is_none());
        assert!(!state.setup_required);
        assert!(!state.loading);
        assert_eq!(session.token(), None);
    }

    #[tokio::test]
    async fn test_clear_error_only_touches_error() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Post, "/auth/login", Reply::rejected(401, "HTTP 401"));
        let (store, _) = store_with_token(&mock, None);
        assert!(!store.login("x", "y").await);

        store.clear_error();
        let once = store.snapshot();
        store.clear_error();

        assert_eq!(store.snapshot(), once);
        assert!(once.error.is_none());
        assert!(!once.loading);
    }
}
