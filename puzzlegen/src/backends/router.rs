//! Per-request backend selection.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backends::{BackendKind, ChatBackend, HttpBackend};
use crate::io::config::GeneratorConfig;

/// Readiness of one registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub model: String,
    pub ready: bool,
}

/// One backend per kind plus the active default.
pub struct BackendRouter {
    backends: BTreeMap<BackendKind, Arc<dyn ChatBackend>>,
    default: RwLock<BackendKind>,
}

impl BackendRouter {
    pub fn new(default: BackendKind) -> Self {
        Self {
            backends: BTreeMap::new(),
            default: RwLock::new(default),
        }
    }

    /// Register `backend` under its own kind, replacing any previous one.
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// HTTP backends for every configured endpoint.
    pub fn from_config(cfg: &GeneratorConfig) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.request_timeout_secs);
        let mut router = Self::new(cfg.default_backend);
        for (kind, endpoint) in cfg.backends.endpoints() {
            router = router.with_backend(Arc::new(HttpBackend::new(kind, endpoint, timeout)?));
        }
        Ok(router)
    }

    pub fn default_kind(&self) -> BackendKind {
        *self.default.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the backend used for requests that name none.
    pub fn set_default(&self, kind: BackendKind) -> Result<()> {
        if !self.backends.contains_key(&kind) {
            return Err(anyhow!("backend '{kind}' is not configured"));
        }
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = kind;
        Ok(())
    }

    /// Pick the backend for a request's provider field.
    ///
    /// Unknown or unconfigured names are logged and mapped to the default
    /// rather than rejected. Fails only when the default itself is missing.
    pub fn resolve(&self, provider: Option<&str>) -> Result<Arc<dyn ChatBackend>> {
        let default = self.default_kind();
        let requested = provider.map(str::trim).filter(|p| !p.is_empty());
        let kind = match requested {
            None => default,
            Some(name) => match BackendKind::parse(name) {
                Some(kind) if self.backends.contains_key(&kind) => kind,
                Some(kind) => {
                    warn!(provider = name, %kind, %default, "backend not configured, using default");
                    default
                }
                None => {
                    warn!(provider = name, %default, "unknown provider, using default");
                    default
                }
            },
        };
        debug!(backend = %kind, "resolved backend");
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| anyhow!("default backend '{default}' is not configured"))
    }

    pub fn kinds(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.backends.keys().copied()
    }

    /// Probe every registered backend, in kind order.
    pub async fn readiness(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for (kind, backend) in &self.backends {
            statuses.push(BackendStatus {
                kind: *kind,
                model: backend.model(),
                ready: backend.is_ready().await,
            });
        }
        statuses
    }
}
