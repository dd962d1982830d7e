use super::{ObjectStatus, Shard};
use crate::{Result, TesseraError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Pipeline, Value};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const NAMESPACE_FULL: &str = "No space left on this namespace";
const NO_MORE_DATA: &str = "No more data";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub root_ca: Option<PathBuf>,
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default)]
    pub max_version: Option<String>,
}

/// 0-db data shard reached over the redis protocol.
///
/// The connection is multiplexed, so every request is a pipeline that
/// selects the namespace before running its command.
pub struct ZeroDbShard {
    address: String,
    namespace: Option<String>,
    password: Option<String>,
    connection: ConnectionManager,
}

impl ZeroDbShard {
    pub async fn connect(
        address: &str,
        namespace: Option<&str>,
        password: Option<&str>,
        tls: Option<&TlsConfig>,
    ) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TesseraError::Config(
                "shard address cannot be empty".to_string(),
            ));
        }

        let client = build_client(address, tls)?;
        let connection = client.get_connection_manager().await?;

        tracing::debug!("connected to shard. address={}", address);
        Ok(Self {
            address: address.to_string(),
            namespace: namespace
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string),
            password: password.filter(|pw| !pw.is_empty()).map(str::to_string),
            connection,
        })
    }

    fn request(&self) -> Pipeline {
        let mut pipe = redis::pipe();
        if let Some(namespace) = &self.namespace {
            let select = pipe.cmd("SELECT").arg(namespace);
            if let Some(password) = &self.password {
                select.arg(password);
            }
            select.ignore();
        }
        pipe
    }

    fn map_error(&self, err: redis::RedisError) -> TesseraError {
        if err.to_string().contains(NAMESPACE_FULL) {
            tracing::warn!(
                "shard namespace is full. shard={} namespace={}",
                self.address,
                self.namespace.as_deref().unwrap_or_default()
            );
            return TesseraError::NamespaceFull(self.address.clone());
        }
        err.into()
    }
}

fn build_client(address: &str, tls: Option<&TlsConfig>) -> Result<redis::Client> {
    let Some(tls) = tls.filter(|tls| tls.enabled) else {
        return redis::Client::open(format!("redis://{}/", address)).map_err(Into::into);
    };

    if tls.min_version.is_some() || tls.max_version.is_some() {
        tracing::warn!(
            "TLS version bounds are not configurable for shard connections. shard={}",
            address
        );
    }

    let url = match tls.server_name.as_deref().filter(|name| !name.is_empty()) {
        Some(_) => format!("rediss://{}/", address),
        None => {
            tracing::warn!(
                "TLS is enabled without a server name, skipping certificate verification. shard={}",
                address
            );
            format!("rediss://{}/#insecure", address)
        }
    };

    match &tls.root_ca {
        Some(path) => {
            let root_cert = std::fs::read(path)?;
            redis::Client::build_with_tls(
                url,
                redis::TlsCertificates {
                    client_tls: None,
                    root_cert: Some(root_cert),
                },
            )
            .map_err(Into::into)
        }
        None => redis::Client::open(url).map_err(Into::into),
    }
}

#[async_trait]
impl Shard for ZeroDbShard {
    fn identifier(&self) -> &str {
        &self.address
    }

    async fn put(&self, key: &[u8], data: &[u8]) -> Result<()> {
        let mut pipe = self.request();
        pipe.cmd("SET").arg(key).arg(data).ignore();
        let mut conn = self.connection.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut pipe = self.request();
        pipe.cmd("GET").arg(key);
        let mut conn = self.connection.clone();
        let (value,): (Option<Vec<u8>>,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_error(e))?;
        value.ok_or(TesseraError::NotFound)
    }

    async fn status(&self, key: &[u8]) -> Result<ObjectStatus> {
        let mut pipe = self.request();
        pipe.cmd("CHECK").arg(key);
        let mut conn = self.connection.clone();
        let (status,): (Option<i64>,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(match status {
            Some(1) => ObjectStatus::Ok,
            Some(0) => ObjectStatus::Corrupted,
            _ => ObjectStatus::Missing,
        })
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut pipe = self.request();
        pipe.cmd("DEL").arg(key).ignore();
        let mut conn = self.connection.clone();
        match pipe.query_async::<_, ()>(&mut conn).await {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().to_ascii_lowercase().contains("not found") => Ok(()),
            Err(err) => Err(self.map_error(err)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        let mut conn = self.connection.clone();

        loop {
            let mut pipe = self.request();
            let scan = pipe.cmd("SCAN");
            if let Some(cursor) = &cursor {
                scan.arg(cursor.as_slice());
            }

            let (reply,): (Value,) = match pipe.query_async(&mut conn).await {
                Ok(reply) => reply,
                Err(err) if err.to_string().contains(NO_MORE_DATA) => break,
                Err(err) => return Err(self.map_error(err)),
            };

            let (next, batch) = parse_scan_reply(reply)?;
            keys.extend(batch);
            cursor = Some(next);
        }

        Ok(keys)
    }
}

/// A scan reply is `[cursor, [[key, size, timestamp], ...]]`.
fn parse_scan_reply(reply: Value) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
    let malformed = || TesseraError::internal("REDIS", "malformed SCAN reply");

    let Value::Bulk(mut items) = reply else {
        return Err(malformed());
    };
    if items.len() != 2 {
        return Err(malformed());
    }
    let entries = items.pop().ok_or_else(malformed)?;
    let Some(Value::Data(cursor)) = items.pop() else {
        return Err(malformed());
    };
    let Value::Bulk(entries) = entries else {
        return Err(malformed());
    };

    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Value::Bulk(fields) => match fields.into_iter().next() {
                Some(Value::Data(key)) => keys.push(key),
                _ => return Err(malformed()),
            },
            Value::Data(key) => keys.push(key),
            _ => return Err(malformed()),
        }
    }
    Ok((cursor, keys))
}
