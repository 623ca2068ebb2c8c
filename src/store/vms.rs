//! VM store.
//!
//! A [`CollectionStore`] over [`Vm`] plus the lifecycle actions. Actions never
//! predict the resulting status: status transitions are driven by the server
//! and can still fail after the action call returned 2xx, so a successful
//! action is always followed by exactly one full `fetch`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::collection::{CollectionState, CollectionStore, Resource};
use super::ErrorPolicy;
use crate::api::{ApiClient, ApiError, CreateVmRequest, Vm, VmAction, VmConfig, VmMetrics};

#[async_trait]
impl Resource for Vm {
    type Draft = CreateVmRequest;
    const KIND: &'static str = "vm";

    fn id(&self) -> &str {
        &self.id
    }

    async fn list(api: &ApiClient) -> Result<Option<Vec<Self>>, ApiError> {
        api.list_vms().await
    }

    async fn create(api: &ApiClient, draft: CreateVmRequest) -> Result<Self, ApiError> {
        api.create_vm(&draft).await
    }

    async fn delete(api: &ApiClient, id: &str) -> Result<(), ApiError> {
        api.delete_vm(id).await
    }
}

pub type VmState = CollectionState<Vm>;

fn failure_context(action: VmAction) -> &'static str {
    match action {
        VmAction::Start => "Failed to start VM",
        VmAction::Stop => "Failed to stop VM",
        VmAction::Shutdown => "Failed to shut down VM",
    }
}

pub struct VmStore {
    inner: CollectionStore<Vm>,
}

impl VmStore {
    pub fn new(api: Arc<ApiClient>, policy: Arc<ErrorPolicy>) -> Self {
        Self {
            inner: CollectionStore::new(api, policy),
        }
    }

    pub fn snapshot(&self) -> VmState {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<VmState> {
        self.inner.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<Vm> {
        self.inner.get(id)
    }

    pub async fn fetch(&self) {
        self.inner.fetch().await
    }

    pub async fn create(&self, name: &str, config: VmConfig) -> Option<Vm> {
        let request = CreateVmRequest {
            name: name.to_string(),
            config,
        };
        self.inner.create(request).await
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.inner.delete(id).await
    }

    pub async fn start(&self, id: &str) -> bool {
        self.run_action(id, VmAction::Start).await
    }

    /// Hard stop
    pub async fn stop(&self, id: &str) -> bool {
        self.run_action(id, VmAction::Stop).await
    }

    /// Graceful guest shutdown
    pub async fn shutdown(&self, id: &str) -> bool {
        self.run_action(id, VmAction::Shutdown).await
    }

    pub fn clear_error(&self) {
        self.inner.clear_error()
    }

    /// Latest metrics for one VM. Does not touch store state.
    pub async fn metrics(&self, id: &str) -> Result<VmMetrics, ApiError> {
        self.inner.api().vm_metrics(id).await
    }

    async fn run_action(&self, id: &str, action: VmAction) -> bool {
        self.inner.begin();

        match self.inner.api().vm_action(id, action).await {
            Ok(response) => {
                info!(
                    vm_id = %id,
                    action = %action,
                    message = %response.message,
                    "VM action accepted"
                );
                // Read-after-write: the server is the only source of status
                self.inner.fetch().await;
                true
            }
            Err(e) => {
                self.inner.fail(Some(failure_context(action)), &e);
                false
            }
        }
    }
}
