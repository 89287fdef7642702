use std::sync::{Arc, RwLock};

use scheduler_core::{
    AgentError, AgentResult, LoginResponse, RegistrationRequest, SystemInfo, ToolCapability,
    WorkerIdentity,
};
use secrecy::SecretString;
use tracing::{info, warn};

use super::CoordinatorClient;

/// Owns the login tokens and the registration call that yields the worker id.
pub struct SessionManager {
    client: Arc<CoordinatorClient>,
    identity: Arc<WorkerIdentity>,
    refresh_token: RwLock<Option<SecretString>>,
}

impl SessionManager {
    pub fn new(client: Arc<CoordinatorClient>, identity: Arc<WorkerIdentity>) -> Self {
        Self {
            client,
            identity,
            refresh_token: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> &Arc<WorkerIdentity> {
        &self.identity
    }

    pub fn client(&self) -> &Arc<CoordinatorClient> {
        &self.client
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.has_credentials()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub async fn login(&self, username: &str, password: &str) -> AgentResult<LoginResponse> {
        let login = self.client.login(username, password).await?;
        self.client
            .set_access_token(Some(SecretString::from(login.token.clone())));
        *self
            .refresh_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            login.refresh_token.clone().map(SecretString::from);
        Ok(login)
    }

    pub fn logout(&self) {
        self.client.set_access_token(None);
        *self
            .refresh_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        info!("Session cleared");
    }

    /// Register this machine and return the worker id. The first id assigned
    /// in this process is kept for its lifetime.
    pub async fn register(
        &self,
        capabilities: Vec<ToolCapability>,
        system_info: SystemInfo,
    ) -> AgentResult<String> {
        if !self.is_authenticated() {
            return Err(AgentError::NotAuthenticated);
        }

        let request = RegistrationRequest {
            machine_id: self.identity.machine_id().to_string(),
            hostname: system_info.hostname.clone(),
            capabilities,
            system_info,
        };
        let assigned = self.client.register(&request).await?;
        if assigned.trim().is_empty() {
            return Err(AgentError::Registration(
                "coordinator returned an empty worker id".to_string(),
            ));
        }

        if !self.identity.assign_worker_id(assigned.clone()) {
            if let Some(existing) = self.identity.worker_id() {
                if existing != assigned {
                    warn!(
                        "Coordinator assigned worker id {} but this process is already {}, keeping {}",
                        assigned, existing, existing
                    );
                }
                return Ok(existing.to_string());
            }
        }
        Ok(assigned)
    }
}
