use super::{KvStore, ListFn, UpdateFn, namespace_prefix, namespaced_key};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, KvClient, SortOrder, SortTarget, Txn,
    TxnOp,
};
use std::future::Future;
use std::time::Duration;
use tessera_core::{Result, TesseraError};

pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Store on an etcd cluster; `update` commits through a transaction that
/// compares the key's modification revision.
pub struct EtcdKv {
    kv: KvClient,
    timeout: Duration,
}

impl EtcdKv {
    pub async fn connect(endpoints: &[String], timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(TesseraError::Config("no etcd endpoints given".to_string()));
        }
        let options = ConnectOptions::new()
            .with_connect_timeout(timeout)
            .with_timeout(timeout);
        let client = with_timeout(timeout, async {
            Client::connect(endpoints, Some(options))
                .await
                .map_err(etcd_error)
        })
        .await?;
        tracing::debug!("connected to etcd. endpoints={}", endpoints.join(","));
        Ok(Self {
            kv: client.kv_client(),
            timeout,
        })
    }

    fn kv(&self) -> KvClient {
        self.kv.clone()
    }
}

async fn with_timeout<T, F>(timeout: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| TesseraError::Timeout)?
}

fn etcd_error(err: etcd_client::Error) -> TesseraError {
    match &err {
        etcd_client::Error::GRpcStatus(status) => match format!("{:?}", status.code()).as_str() {
            "Unavailable" => TesseraError::Unavailable,
            "DeadlineExceeded" => TesseraError::Timeout,
            _ => TesseraError::internal("ETCD", err),
        },
        etcd_client::Error::TransportError(_) => TesseraError::Unavailable,
        _ => TesseraError::internal("ETCD", err),
    }
}

#[async_trait]
impl KvStore for EtcdKv {
    async fn set(&self, namespace: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        let mut kv = self.kv();
        let full_key = namespaced_key(namespace, key);
        with_timeout(self.timeout, async {
            kv.put(full_key, value.to_vec(), None)
                .await
                .map_err(etcd_error)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, namespace: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let mut kv = self.kv();
        let full_key = namespaced_key(namespace, key);
        let resp = with_timeout(self.timeout, async {
            kv.get(full_key, None).await.map_err(etcd_error)
        })
        .await?;
        resp.kvs()
            .first()
            .map(|entry| entry.value().to_vec())
            .ok_or(TesseraError::NotFound)
    }

    async fn delete(&self, namespace: &[u8], key: &[u8]) -> Result<()> {
        let mut kv = self.kv();
        let full_key = namespaced_key(namespace, key);
        with_timeout(self.timeout, async {
            kv.delete(full_key, None).await.map_err(etcd_error)?;
            Ok(())
        })
        .await
    }

    async fn update(
        &self,
        namespace: &[u8],
        key: &[u8],
        callback: &mut UpdateFn<'_>,
    ) -> Result<()> {
        let full_key = namespaced_key(namespace, key);
        let mut kv = self.kv();
        with_timeout(self.timeout, async {
            loop {
                let resp = kv.get(full_key.clone(), None).await.map_err(etcd_error)?;
                let (current, revision) = resp
                    .kvs()
                    .first()
                    .map(|entry| (entry.value().to_vec(), entry.mod_revision()))
                    .ok_or(TesseraError::NotFound)?;

                let updated = callback(&current)?;

                let txn = Txn::new()
                    .when([Compare::mod_revision(
                        full_key.clone(),
                        CompareOp::Equal,
                        revision,
                    )])
                    .and_then([TxnOp::put(full_key.clone(), updated, None)]);
                let txn_resp = kv.txn(txn).await.map_err(etcd_error)?;
                if txn_resp.succeeded() {
                    return Ok(());
                }
                tracing::debug!(
                    "etcd update conflict, retrying. key={} revision={}",
                    String::from_utf8_lossy(key),
                    revision
                );
            }
        })
        .await
    }

    async fn list_keys(&self, namespace: &[u8], callback: &mut ListFn<'_>) -> Result<()> {
        let prefix = namespace_prefix(namespace);
        let mut kv = self.kv();
        let options = GetOptions::new()
            .with_prefix()
            .with_keys_only()
            .with_sort(SortTarget::Key, SortOrder::Ascend);
        let resp = with_timeout(self.timeout, async {
            kv.get(prefix.clone(), Some(options))
                .await
                .map_err(etcd_error)
        })
        .await?;

        for entry in resp.kvs() {
            if let Some(key) = entry.key().strip_prefix(prefix.as_slice()) {
                callback(key)?;
            }
        }
        Ok(())
    }
}
