//! Generic store for a server-owned collection of resources.
//!
//! Reconciliation rules:
//! - `fetch` replaces the collection wholesale (`null` becomes empty)
//! - `create` appends the entity returned by the server
//! - `delete` removes the entry locally, without refetching
//!
//! On failure the collection is left untouched and a normalized error is
//! recorded. `loading` is false after every operation, whatever the outcome.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{ErrorPolicy, StateCell};
use crate::api::{ApiClient, ApiError};

/// A server resource the store can list, create and delete
#[async_trait]
pub trait Resource: Clone + Send + Sync + 'static {
    /// Payload accepted by `create`
    type Draft: Send + Sync;

    /// Name used in logs
    const KIND: &'static str;

    fn id(&self) -> &str;

    async fn list(api: &ApiClient) -> Result<Option<Vec<Self>>, ApiError>;
    async fn create(api: &ApiClient, draft: Self::Draft) -> Result<Self, ApiError>;
    async fn delete(api: &ApiClient, id: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState<R> {
    /// Server order for fetched entries, creation order after that
    pub items: Vec<R>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<R> Default for CollectionState<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

pub struct CollectionStore<R: Resource> {
    api: Arc<ApiClient>,
    policy: Arc<ErrorPolicy>,
    state: StateCell<CollectionState<R>>,
}

impl<R: Resource> CollectionStore<R> {
    pub fn new(api: Arc<ApiClient>, policy: Arc<ErrorPolicy>) -> Self {
        Self {
            api,
            policy,
            state: StateCell::new(CollectionState::default()),
        }
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn snapshot(&self) -> CollectionState<R> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectionState<R>> {
        self.state.subscribe()
    }

    /// Entry from the local collection
    pub fn get(&self, id: &str) -> Option<R> {
        self.state
            .read(|s| s.items.iter().find(|item| item.id() == id).cloned())
    }

    /// Replace the collection with the server's current list
    pub async fn fetch(&self) {
        self.begin();

        match R::list(&self.api).await {
            Ok(items) => {
                let items = items.unwrap_or_default();
                debug!(kind = R::KIND, count = items.len(), "Fetched collection");
                self.state.set(CollectionState {
                    items,
                    loading: false,
                    error: None,
                });
            }
            Err(e) => self.fail(None, &e),
        }
    }

    /// Create an entity and append it to the collection
    pub async fn create(&self, draft: R::Draft) -> Option<R> {
        self.begin();

        match R::create(&self.api, draft).await {
            Ok(created) => {
                debug!(kind = R::KIND, id = %created.id(), "Created resource");
                let appended = created.clone();
                self.state.update(move |s| {
                    s.items.push(appended);
                    s.loading = false;
                });
                Some(created)
            }
            Err(e) => {
                self.fail(None, &e);
                None
            }
        }
    }

    /// Delete an entity and drop it from the collection
    pub async fn delete(&self, id: &str) -> bool {
        self.begin();

        match R::delete(&self.api, id).await {
            Ok(()) => {
                debug!(kind = R::KIND, id = %id, "Deleted resource");
                self.state.update(|s| {
                    s.items.retain(|item| item.id() != id);
                    s.loading = false;
                });
                true
            }
            Err(e) => {
                self.fail(None, &e);
                false
            }
        }
    }

    pub fn clear_error(&self) {
        self.state.update(|s| s.error = None);
    }

    /// Mark an operation as in flight
    pub(crate) fn begin(&self) {
        self.state.update(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    /// Record a failed operation, optionally prefixed with what was attempted
    pub(crate) fn fail(&self, context: Option<&str>, err: &ApiError) {
        let presented = self.policy.present(err);
        let message = match context {
            Some(context) => format!("{}: {}", context, presented),
            None => presented,
        };
        warn!(kind = R::KIND, error = %err, "Store operation failed");
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
    use crate::session::SessionState;
    use serde::Deserialize;
    use serde_json::json;

    /// Minimal resource for exercising the generic reconciliation rules
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Widget {
        id: String,
        name: String,
    }

    #[async_trait]
    impl Resource for Widget {
        type Draft = String;
        const KIND: &'static str = "widget";

        fn id(&self) -> &str {
            &self.id
        }

        async fn list(api: &ApiClient) -> Result<Option<Vec<Self>>, ApiError> {
            api.get("/widgets").await
        }

        async fn create(api: &ApiClient, draft: String) -> Result<Self, ApiError> {
            api.post("/widgets", Some(&json!({ "name": draft }))).await
        }

        async fn delete(api: &ApiClient, id: &str) -> Result<(), ApiError> {
            api.delete(&format!("/widgets/{}", id)).await
        }
    }

    fn store(mock: Arc<MockTransport>) -> CollectionStore<Widget> {
        let api = Arc::new(ApiClient::new(mock, Arc::new(SessionState::in_memory())));
        CollectionStore::new(api, Arc::new(ErrorPolicy::new()))
    }

    fn widget(id: &str) -> Widget {
        Widget {
            id: id.into(),
            name: format!("w-{}", id),
        }
    }

    #[tokio::test]
    async fn test_fetch_replaces_in_order() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Get,
            "/widgets",
            Reply::ok(json!([{"id": "b", "name": "w-b"}, {"id": "a", "name": "w-a"}])),
        );
        let store = store(mock);

        store.fetch().await;
        let state = store.snapshot();
        assert_eq!(state.items, vec![widget("b"), widget("a")]);
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert_eq!(store.get("a"), Some(widget("a")));
        assert_eq!(store.get("zzz"), None);
    }

    #[tokio::test]
    async fn test_fetch_null_is_empty() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/widgets", Reply::ok(json!([{"id": "a", "name": "w-a"}])));
        mock.on(Method::Get, "/widgets", Reply::ok(serde_json::Value::Null));
        let store = store(mock);

        store.fetch().await;
        assert_eq!(store.snapshot().items.len(), 1);
        store.fetch().await;
        let state = store.snapshot();
        assert!(state.items.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_items() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/widgets", Reply::ok(json!([{"id": "a", "name": "w-a"}])));
        mock.on(Method::Post, "/widgets", Reply::rejected(500, "disk full"));
        let store = store(mock);
        store.fetch().await;

        assert!(store.create("x".into()).await.is_none());
        let state = store.snapshot();
        assert_eq!(state.items, vec![widget("a")]);
        assert_eq!(state.error.as_deref(), Some("disk full"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_next_operation_resets_error() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/widgets", Reply::rejected(500, "boom"));
        mock.on(Method::Get, "/widgets", Reply::ok(json!([])));
        let store = store(mock);

        store.fetch().await;
        assert!(store.snapshot().error.is_some());
        store.fetch().await;
        assert!(store.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_loading_visible_to_subscribers() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/widgets", Reply::ok(json!([])));
        let store = store(mock);
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.fetch().await;

        // Both the loading transition and the final state were published
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().loading);
    }
}
