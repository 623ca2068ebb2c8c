pub mod api;
pub mod cli;
pub mod config;
pub mod session;
pub mod store;

use anyhow::Result;
use std::sync::Arc;

use crate::api::{ApiClient, HttpTransport, Transport};
use crate::config::Config;
use crate::session::{FileTokenStorage, SessionState, TokenStorage};
use crate::store::{AuthStore, ConfigStore, ErrorPolicy, VmStore};

/// Composition root: one session, one API client and one instance of each
/// store, shared by everything in the process.
pub struct Console {
    pub config: Config,
    pub session: Arc<SessionState>,
    pub api: Arc<ApiClient>,
    pub auth: AuthStore,
    pub vms: Arc<VmStore>,
    pub configs: Arc<ConfigStore>,
}

impl Console {
    pub fn new(config: Config, transport: Arc<dyn Transport>, session: Arc<SessionState>) -> Self {
        let policy = Arc::new(ErrorPolicy::from_config(&config.errors));
        let api = Arc::new(ApiClient::new(transport, session.clone()));

        Self {
            auth: AuthStore::new(api.clone(), policy.clone()),
            vms: Arc::new(VmStore::new(api.clone(), policy.clone())),
            configs: Arc::new(ConfigStore::new(api.clone(), policy)),
            config,
            session,
            api,
        }
    }

    /// Wire up the HTTP transport and the on-disk token store.
    ///
    /// A `token` passed in here seeds the session for this process only and
    /// is never written to disk.
    pub fn connect(config: Config, token: Option<String>) -> Result<Self> {
        let storage: Arc<dyn TokenStorage> = Arc::new(FileTokenStorage::new(
            &config.session.data_dir,
            &config.session.token_file,
        ));
        let session = Arc::new(match token {
            Some(token) => SessionState::preloaded(storage, token),
            None => SessionState::new(storage),
        });

        let transport = HttpTransport::new(
            &config.server.api_url,
            config.server.timeout(),
            session.clone(),
        )?;
        tracing::debug!(api_url = %config.server.api_url, "Console connected");

        Ok(Self::new(config, Arc::new(transport), session))
    }
}
