use super::{EmbeddedKv, EtcdKv, KvStore, MemoryKv, etcd::DEFAULT_OP_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Result, TesseraError};

#[derive(Debug, Clone, Default)]
pub struct KvBuilder {
    backend: Option<String>,
    path: Option<String>,
    etcd_endpoints: Option<Vec<String>>,
    etcd_timeout: Option<Duration>,
}

impl KvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn etcd_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.etcd_endpoints = Some(endpoints);
        self
    }

    pub fn etcd_timeout(mut self, timeout: Duration) -> Self {
        self.etcd_timeout = Some(timeout);
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(TesseraError::Config(
                "metadata backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    fn resolve_path(&self) -> Result<String> {
        let path = self.path.as_deref().unwrap_or_default().trim();
        if path.is_empty() {
            return Err(TesseraError::Config(
                "path is required for embedded metadata backend".to_string(),
            ));
        }
        Ok(path.to_string())
    }

    fn resolve_endpoints(&self) -> Result<Vec<String>> {
        let endpoints: Vec<String> = self
            .etcd_endpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();

        if endpoints.is_empty() {
            return Err(TesseraError::Config(
                "etcd endpoints cannot be empty for etcd backend".to_string(),
            ));
        }
        Ok(endpoints)
    }

    pub async fn build(&self) -> Result<Arc<dyn KvStore>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "memory" => Ok(Arc::new(MemoryKv::new())),
            "badger" | "embedded" | "sqlite" => {
                let path = self.resolve_path()?;
                let kv = EmbeddedKv::open(path).await?;
                Ok(Arc::new(kv))
            }
            "etcd" => {
                let endpoints = self.resolve_endpoints()?;
                let timeout = self.etcd_timeout.unwrap_or(DEFAULT_OP_TIMEOUT);
                let kv = EtcdKv::connect(&endpoints, timeout).await?;
                Ok(Arc::new(kv))
            }
            other => Err(TesseraError::Config(format!(
                "unsupported metadata backend: {}",
                other
            ))),
        }
    }
}
