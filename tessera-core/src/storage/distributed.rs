use super::{CheckStatus, ChunkConfig, ChunkStorage, new_part_key};
use crate::datastor::{Cluster, ObjectStatus};
use crate::distribution::Distributor;
use crate::metatypes::Object;
use crate::task::{WorkerGroup, cancellable, default_job_count, send_or_cancel, spawn_feeder};
use crate::{Result, TesseraError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Spreads the parts of every chunk over distinct shards.
///
/// Replication and erasure coding only differ in the distributor used.
pub struct DistributedChunkStorage {
    cluster: Arc<Cluster>,
    distributor: Arc<dyn Distributor>,
    job_count: usize,
}

impl DistributedChunkStorage {
    /// `job_count` of 0 uses one worker per logical CPU.
    pub fn new(
        cluster: Arc<Cluster>,
        distributor: Arc<dyn Distributor>,
        job_count: usize,
    ) -> Result<Self> {
        let required = distributor.required_part_count();
        if cluster.listed_shard_count() < required {
            return Err(TesseraError::Config(format!(
                "cluster has {} shards, distribution requires {}",
                cluster.listed_shard_count(),
                required
            )));
        }
        let job_count = if job_count == 0 {
            default_job_count()
        } else {
            job_count
        };
        Ok(Self {
            cluster,
            distributor,
            job_count,
        })
    }

    fn validate_object_count(&self, config: &ChunkConfig) -> Result<usize> {
        let required = self.distributor.required_part_count();
        if config.objects.len() != required {
            return Err(TesseraError::UnexpectedShardsCount {
                expected: required,
                actual: config.objects.len(),
            });
        }
        Ok(required)
    }

    fn jobs_for(&self, tasks: usize) -> usize {
        self.job_count.min(tasks).max(1)
    }
}

#[async_trait]
impl ChunkStorage for DistributedChunkStorage {
    async fn write_chunk(&self, data: &[u8], cancel: &CancellationToken) -> Result<ChunkConfig> {
        let parts = self.distributor.encode(data)?;
        let part_count = parts.len();
        let jobs = self.jobs_for(part_count);

        let mut group = WorkerGroup::new(cancel);
        let inputs = spawn_feeder(&mut group, parts.into_iter().enumerate(), jobs);
        let shards = self
            .cluster
            .random_iterator(&HashSet::new())
            .into_channel(&mut group, jobs);
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, Object)>(jobs);

        for _ in 0..jobs {
            let inputs = inputs.clone();
            let shards = shards.clone();
            let result_tx = result_tx.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some((index, part)) = inputs.recv(&token).await {
                    let key = new_part_key(&part);
                    loop {
                        // an exhausted iterator leaves the part unwritten
                        let Some(shard) = shards.recv(&token).await else {
                            return Ok(());
                        };
                        match cancellable(&token, shard.put(&key, &part)).await {
                            Ok(()) => {
                                let object = Object {
                                    key,
                                    shard_id: shard.identifier().to_string(),
                                };
                                if !send_or_cancel(&result_tx, (index, object), &token).await {
                                    return Ok(());
                                }
                                break;
                            }
                            Err(TesseraError::Cancelled) => return Ok(()),
                            Err(err) => {
                                tracing::error!(
                                    "failed to write part to shard. shard={} part={} error={}",
                                    shard.identifier(),
                                    index,
                                    err
                                );
                            }
                        }
                    }
                }
                Ok(())
            });
        }
        drop(inputs);
        drop(shards);
        drop(result_tx);

        let mut objects: Vec<Option<Object>> = vec![None; part_count];
        let mut written = 0;
        while let Some((index, object)) = result_rx.recv().await {
            objects[index] = Some(object);
            written += 1;
        }
        group.wait().await?;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        if written < part_count {
            return Err(TesseraError::ShardsUnavailable);
        }

        let objects = objects
            .into_iter()
            .collect::<Option<Vec<Object>>>()
            .ok_or(TesseraError::ShardsUnavailable)?;
        Ok(ChunkConfig {
            size: data.len(),
            objects,
        })
    }

    async fn read_chunk(
        &self,
        config: &ChunkConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let part_count = self.validate_object_count(config)?;
        let min_parts = self.distributor.min_valid_parts();
        let jobs = self.jobs_for(part_count);

        let mut group = WorkerGroup::new(cancel);
        let objects = spawn_feeder(
            &mut group,
            config.objects.clone().into_iter().enumerate(),
            jobs,
        );
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, Vec<u8>)>(jobs);

        for _ in 0..jobs {
            let objects = objects.clone();
            let result_tx = result_tx.clone();
            let cluster = self.cluster.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some((index, object)) = objects.recv(&token).await {
                    let fetch = async {
                        let shard = cluster.get_shard(&object.shard_id).await?;
                        shard.get(&object.key).await
                    };
                    let data = match cancellable(&token, fetch).await {
                        Ok(data) => data,
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => {
                            tracing::error!(
                                "failed to read part from shard. shard={} part={} error={}",
                                object.shard_id,
                                index,
                                err
                            );
                            continue;
                        }
                    };
                    if !send_or_cancel(&result_tx, (index, data), &token).await {
                        return Ok(());
                    }
                }
                Ok(())
            });
        }
        drop(objects);
        drop(result_tx);

        let mut parts: Vec<Option<Vec<u8>>> = vec![None; part_count];
        let mut collected = 0;
        while collected < min_parts {
            let Some((index, data)) = result_rx.recv().await else {
                break;
            };
            parts[index] = Some(data);
            collected += 1;
        }
        group.stop();
        group.wait().await?;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        if collected < min_parts {
            return Err(TesseraError::ShardsUnavailable);
        }

        let data = self.distributor.decode(parts, config.size)?;
        if data.len() != config.size {
            return Err(TesseraError::InvalidDataSize {
                expected: config.size,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    async fn check_chunk(
        &self,
        config: &ChunkConfig,
        fast: bool,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus> {
        let part_count = self.validate_object_count(config)?;
        let min_parts = self.distributor.min_valid_parts();
        let wanted = if fast { min_parts } else { part_count };
        let jobs = self.jobs_for(wanted);

        let mut group = WorkerGroup::new(cancel);
        let requests = spawn_feeder(&mut group, 0..wanted, jobs);
        let ids = config
            .objects
            .iter()
            .map(|object| object.shard_id.clone())
            .collect();
        let shards = Arc::new(Mutex::new(self.cluster.lazy_iterator(ids)));
        let objects = Arc::new(config.objects.clone());
        let (result_tx, mut result_rx) = mpsc::channel::<()>(jobs);

        for _ in 0..jobs {
            let requests = requests.clone();
            let shards = shards.clone();
            let objects = objects.clone();
            let result_tx = result_tx.clone();
            let token = group.token();
            group.spawn(async move {
                // every request is answered by one valid object, or by running out of them
                while requests.recv(&token).await.is_some() {
                    loop {
                        let next = tokio::select! {
                            _ = token.cancelled() => return Ok(()),
                            next = async { shards.lock().await.next().await } => next,
                        };
                        let Some((index, shard)) = next else {
                            return Ok(());
                        };
                        let object = &objects[index];
                        match cancellable(&token, shard.status(&object.key)).await {
                            Ok(ObjectStatus::Ok) => {
                                if !send_or_cancel(&result_tx, (), &token).await {
                                    return Ok(());
                                }
                                break;
                            }
                            Ok(status) => {
                                tracing::debug!(
                                    "object is not valid. shard={} status={}",
                                    object.shard_id,
                                    status
                                );
                            }
                            Err(TesseraError::Cancelled) => return Ok(()),
                            Err(err) => {
                                tracing::error!(
                                    "failed to check object. shard={} error={}",
                                    object.shard_id,
                                    err
                                );
                            }
                        }
                    }
                }
                Ok(())
            });
        }
        drop(requests);
        drop(result_tx);

        let mut valid = 0;
        while result_rx.recv().await.is_some() {
            valid += 1;
        }
        group.wait().await?;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }

        Ok(if valid == part_count {
            CheckStatus::Optimal
        } else if valid >= min_parts {
            CheckStatus::Valid
        } else {
            CheckStatus::Invalid
        })
    }

    async fn repair_chunk(
        &self,
        config: &ChunkConfig,
        cancel: &CancellationToken,
    ) -> Result<ChunkConfig> {
        let data = self.read_chunk(config, cancel).await?;
        self.write_chunk(&data, cancel).await
    }

    async fn delete_chunk(&self, config: &ChunkConfig, cancel: &CancellationToken) -> Result<()> {
        if config.objects.is_empty() {
            return Err(TesseraError::UnexpectedShardsCount {
                expected: self.distributor.required_part_count(),
                actual: 0,
            });
        }
        let jobs = self.jobs_for(config.objects.len());

        let mut group = WorkerGroup::new(cancel);
        let objects = spawn_feeder(&mut group, config.objects.clone(), jobs);
        for _ in 0..jobs {
            let objects = objects.clone();
            let cluster = self.cluster.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some(object) = objects.recv(&token).await {
                    let shard = match cancellable(&token, cluster.get_shard(&object.shard_id)).await
                    {
                        Ok(shard) => shard,
                        Err(TesseraError::NotFound) => {
                            tracing::warn!(
                                "shard of deleted part is unknown. shard={}",
                                object.shard_id
                            );
                            continue;
                        }
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    };
                    match cancellable(&token, shard.delete(&object.key)).await {
                        Ok(()) => {}
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            });
        }
        drop(objects);
        group.wait().await?;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        Ok(())
    }
}
