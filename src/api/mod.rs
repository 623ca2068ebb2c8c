//! Typed client for the VM server REST API.
//!
//! One method per endpoint. The only stateful behavior lives in
//! [`ApiClient::login`] and [`ApiClient::logout`], which write the credential
//! into the session holder as a side effect of a successful call.

mod error;
#[cfg(test)]
pub(crate) mod mock;
pub mod models;
mod transport;

pub use error::ApiError;
pub use models::*;
pub use transport::{HttpTransport, Method, Transport, API_PREFIX};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::session::SessionState;

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionState>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionState>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.transport.request(Method::Get, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let body = body.map(serde_json::to_value).transpose()?;
        let value = self.transport.request(Method::Post, path, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.transport.request(Method::Delete, path, None).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------------

    pub async fn auth_status(&self) -> Result<AuthStatus, ApiError> {
        self.get("/auth/status").await
    }

    /// Create the first admin account
    pub async fn setup(&self, username: &str, password: &str) -> Result<SetupResponse, ApiError> {
        let body = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.post("/auth/setup", Some(&body)).await
    }

    /// Log in and store the returned token in the session holder
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = self.post("/auth/login", Some(&body)).await?;
        self.session.set_token(Some(response.token.clone()));
        Ok(response)
    }

    /// Invalidate the session server-side, then drop the local token
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.transport
            .request(Method::Post, "/auth/logout", None)
            .await?;
        self.session.clear();
        Ok(())
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    // ------------------------------------------------------------------------
    // VMs
    // ------------------------------------------------------------------------

    /// `None` when the server answers with `null`
    pub async fn list_vms(&self) -> Result<Option<Vec<Vm>>, ApiError> {
        self.get("/vms").await
    }

    pub async fn get_vm(&self, id: &str) -> Result<Vm, ApiError> {
        self.get(&format!("/vms/{}", id)).await
    }

    pub async fn create_vm(&self, request: &CreateVmRequest) -> Result<Vm, ApiError> {
        self.post("/vms", Some(request)).await
    }

    pub async fn delete_vm(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/vms/{}", id)).await
    }

    pub async fn vm_action(&self, id: &str, action: VmAction) -> Result<VmActionResponse, ApiError> {
        let path = format!("/vms/{}/{}", id, action.as_str());
        let value = self.transport.request(Method::Post, &path, None).await?;
        if value.is_null() {
            return Ok(VmActionResponse {
                success: true,
                message: String::new(),
                vm_id: id.to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    pub async fn start_vm(&self, id: &str) -> Result<VmActionResponse, ApiError> {
        self.vm_action(id, VmAction::Start).await
    }

    pub async fn stop_vm(&self, id: &str) -> Result<VmActionResponse, ApiError> {
        self.vm_action(id, VmAction::Stop).await
    }

    pub async fn shutdown_vm(&self, id: &str) -> Result<VmActionResponse, ApiError> {
        self.vm_action(id, VmAction::Shutdown).await
    }

    pub async fn vm_metrics(&self, id: &str) -> Result<VmMetrics, ApiError> {
        self.get(&format!("/vms/{}/metrics", id)).await
    }

    // ------------------------------------------------------------------------
    // Config templates
    // ------------------------------------------------------------------------

    pub async fn list_configs(&self) -> Result<Option<Vec<ConfigTemplate>>, ApiError> {
        self.get("/configs").await
    }

    pub async fn get_config(&self, id: &str) -> Result<ConfigTemplate, ApiError> {
        self.get(&format!("/configs/{}", id)).await
    }

    pub async fn create_config(
        &self,
        request: &CreateConfigRequest,
    ) -> Result<ConfigTemplate, ApiError> {
        self.post("/configs", Some(request)).await
    }

    pub async fn delete_config(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/configs/{}", id)).await
    }

    // ------------------------------------------------------------------------
    // System
    // ------------------------------------------------------------------------

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get("/health").await
    }

    pub async fn system_info(&self) -> Result<SystemInfo, ApiError> {
        self.get("/system/info").await
    }
}
