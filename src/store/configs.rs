//! Config template store. Same reconciliation as the VM store, no lifecycle.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::collection::{CollectionState, CollectionStore, Resource};
use super::ErrorPolicy;
use crate::api::{ApiClient, ApiError, ConfigTemplate, CreateConfigRequest, VmConfig};

#[async_trait]
impl Resource for ConfigTemplate {
    type Draft = CreateConfigRequest;
    const KIND: &'static str = "config";

    fn id(&self) -> &str {
        &self.id
    }

    async fn list(api: &ApiClient) -> Result<Option<Vec<Self>>, ApiError> {
        api.list_configs().await
    }

    async fn create(api: &ApiClient, draft: CreateConfigRequest) -> Result<Self, ApiError> {
        api.create_config(&draft).await
    }

    async fn delete(api: &ApiClient, id: &str) -> Result<(), ApiError> {
        api.delete_config(id).await
    }
}

pub type ConfigState = CollectionState<ConfigTemplate>;

pub struct ConfigStore {
    inner: CollectionStore<ConfigTemplate>,
}

impl ConfigStore {
    pub fn new(api: Arc<ApiClient>, policy: Arc<ErrorPolicy>) -> Self {
        Self {
            inner: CollectionStore::new(api, policy),
        }
    }

    pub fn snapshot(&self) -> ConfigState {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConfigState> {
        self.inner.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<ConfigTemplate> {
        self.inner.get(id)
    }

    pub async fn fetch(&self) {
        self.inner.fetch().await
    }

    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        config: VmConfig,
    ) -> Option<ConfigTemplate> {
        let request = CreateConfigRequest {
            name: name.to_string(),
            description,
            config,
        };
        self.inner.create(request).await
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.inner.delete(id).await
    }

    pub fn clear_error(&self) {
        self.inner.clear_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockTransport, Reply};
    use crate::api::Method;
    use crate::session::SessionState;
    use serde_json::{json, Value};

    fn template_json(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "description": "small guest",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "config": {
                "name": name,
                "kernel_path": "/k",
                "root_drive": { "path": "/r" },
                "cpus": 1,
                "memory_mb": 128
            }
        })
    }

    fn store(mock: &Arc<MockTransport>) -> ConfigStore {
        let api = Arc::new(ApiClient::new(
            mock.clone(),
            Arc::new(SessionState::in_memory()),
        ));
        ConfigStore::new(api, Arc::new(ErrorPolicy::new()))
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/configs", Reply::ok(json!([template_json("c1", "tiny")])));
        mock.on(Method::Post, "/configs", Reply::ok(template_json("c2", "large")));
        mock.on(Method::Delete, "/configs/c1", Reply::ok(Value::Null));
        let store = store(&mock);

        store.fetch().await;
        assert_eq!(store.snapshot().items.len(), 1);

        let config = store.get("c1").unwrap().config;
        let created = store
            .create("large", Some("more memory".into()), config)
            .await
            .unwrap();
        assert_eq!(created.id, "c2");

        assert!(store.delete("c1").await);
        let names: Vec<String> = store
            .snapshot()
            .items
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["large"]);

        let post = &mock.calls()[1];
        assert_eq!(post.body.as_ref().unwrap()["description"], "more memory");
    }

    #[tokio::test]
    async fn test_errors_do_not_leak_between_stores() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/configs", Reply::rejected(500, "configuration not found"));
        let configs = store(&mock);
        let vms = crate::store::VmStore::new(
            configs.inner.api().clone(),
            Arc::new(ErrorPolicy::new()),
        );

        configs.fetch().await;
        assert_eq!(
            configs.snapshot().error.as_deref(),
            Some("That resource no longer exists.")
        );
        assert!(vms.snapshot().error.is_none());
    }

    #[test]
    fn test_blocking_fetch_null() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Get, "/configs", Reply::ok(Value::Null));
        let store = store(&mock);

        tokio_test::block_on(store.fetch());
        let state = store.snapshot();
        assert!(state.items.is_empty());
        assert!(state.error.is_none());
    }
}
