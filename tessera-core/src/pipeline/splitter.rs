use super::{Pipeline, Reader, SingleObjectPipeline, Writer, owned_output};
use crate::hashing::HasherConstructor;
use crate::metatypes::Chunk;
use crate::processing::ProcessorConstructor;
use crate::storage::{CheckStatus, ChunkConfig, ChunkStorage};
use crate::task::{SharedReceiver, WorkerGroup, cancellable, send_or_cancel, spawn_feeder};
use crate::{Result, TesseraError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One block after hashing and processing; `size` is its unprocessed length.
struct ProcessedBlock {
    index: usize,
    size: usize,
    hash: Vec<u8>,
    data: Vec<u8>,
}

/// Stored bytes of one chunk, as read back from the storage.
struct StoredBlock {
    index: usize,
    hash: Vec<u8>,
    data: Vec<u8>,
}

/// Splits streams into `block_size` chunks and runs them through a pool of
/// processor workers feeding a twice as large pool of storage workers.
///
/// Chunks complete out of order; results are reassembled by block index.
pub struct AsyncSplitterPipeline {
    block_size: usize,
    job_count: usize,
    hasher: HasherConstructor,
    processor: ProcessorConstructor,
    storage: Arc<dyn ChunkStorage>,
    single: SingleObjectPipeline,
}

impl AsyncSplitterPipeline {
    pub fn new(
        block_size: usize,
        job_count: usize,
        hasher: HasherConstructor,
        processor: ProcessorConstructor,
        storage: Arc<dyn ChunkStorage>,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(TesseraError::Config(
                "block size must be positive".to_string(),
            ));
        }
        let job_count = if job_count == 0 {
            crate::task::default_job_count()
        } else {
            job_count
        };
        let single = SingleObjectPipeline::new(hasher.clone(), processor.clone(), storage.clone());
        Ok(Self {
            block_size,
            job_count,
            hasher,
            processor,
            storage,
            single,
        })
    }
}

#[async_trait]
impl Pipeline for AsyncSplitterPipeline {
    async fn write(
        &self,
        reader: &mut Reader<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        let jobs = self.job_count;
        let storage_jobs = jobs * 2;

        let mut group = WorkerGroup::new(cancel);
        let token = group.token();

        let (input_tx, input_rx) = mpsc::channel::<(usize, Vec<u8>)>(jobs);
        let input_rx = SharedReceiver::new(input_rx);
        let (data_tx, data_rx) = mpsc::channel::<ProcessedBlock>(jobs);
        let data_rx = SharedReceiver::new(data_rx);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<(usize, Chunk)>(storage_jobs);

        for _ in 0..jobs {
            let hasher = (self.hasher)()?;
            let mut processor = (self.processor)()?;
            let input_rx = input_rx.clone();
            let data_tx = data_tx.clone();
            let token = group.token();
            group.spawn(async move {
                let shared = processor.shared_write_buffer();
                while let Some((index, raw)) = input_rx.recv(&token).await {
                    let hash = hasher.hash(&raw);
                    let processed = {
                        let output = processor.write_process(&raw)?;
                        owned_output(output, &raw, shared)
                    };
                    let size = raw.len();
                    let block = ProcessedBlock {
                        index,
                        size,
                        hash,
                        data: processed.unwrap_or(raw),
                    };
                    if !send_or_cancel(&data_tx, block, &token).await {
                        return Ok(());
                    }
                }
                Ok(())
            });
        }

        for _ in 0..storage_jobs {
            let storage = self.storage.clone();
            let data_rx = data_rx.clone();
            let chunk_tx = chunk_tx.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some(block) = data_rx.recv(&token).await {
                    let config = match storage.write_chunk(&block.data, &token).await {
                        Ok(config) => config,
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    };
                    let chunk = Chunk {
                        size: block.size as i64,
                        stored_size: config.size as i64,
                        hash: block.hash,
                        objects: config.objects,
                    };
                    if !send_or_cancel(&chunk_tx, (block.index, chunk), &token).await {
                        return Ok(());
                    }
                }
                Ok(())
            });
        }
        drop(input_rx);
        drop(data_tx);
        drop(data_rx);
        drop(chunk_tx);

        let split = split_blocks(reader, self.block_size, input_tx, &token);
        let collect = async {
            let mut chunks: Vec<Option<Chunk>> = Vec::new();
            while let Some((index, chunk)) = chunk_rx.recv().await {
                if index >= chunks.len() {
                    chunks.resize(index + 1, None);
                }
                chunks[index] = Some(chunk);
            }
            chunks
        };
        let (block_count, chunks) = tokio::join!(split, collect);

        group.wait().await?;
        let block_count = block_count?;
        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }

        if chunks.len() != block_count {
            return Err(TesseraError::internal(
                "PIPELINE",
                "not all chunks were received",
            ));
        }
        chunks
            .into_iter()
            .collect::<Option<Vec<Chunk>>>()
            .ok_or_else(|| TesseraError::internal("PIPELINE", "not all chunks were received"))
    }

    async fn read(
        &self,
        chunks: &[Chunk],
        writer: &mut Writer<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if chunks.len() <= 1 {
            return self.single.read(chunks, writer, cancel).await;
        }

        let jobs = self.job_count.min(chunks.len());
        let storage_jobs = (jobs * 2).min(chunks.len());

        let mut group = WorkerGroup::new(cancel);
        let token = group.token();

        let chunk_rx = spawn_feeder(
            &mut group,
            chunks.to_vec().into_iter().enumerate(),
            storage_jobs,
        );
        let (stored_tx, stored_rx) = mpsc::channel::<StoredBlock>(jobs);
        let stored_rx = SharedReceiver::new(stored_rx);
        let (plain_tx, mut plain_rx) = mpsc::channel::<(usize, Vec<u8>)>(jobs);

        for _ in 0..storage_jobs {
            let storage = self.storage.clone();
            let chunk_rx = chunk_rx.clone();
            let stored_tx = stored_tx.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some((index, chunk)) = chunk_rx.recv(&token).await {
                    let data = match storage.read_chunk(&ChunkConfig::from(&chunk), &token).await {
                        Ok(data) => data,
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    };
                    let block = StoredBlock {
                        index,
                        hash: chunk.hash,
                        data,
                    };
                    if !send_or_cancel(&stored_tx, block, &token).await {
                        return Ok(());
                    }
                }
                Ok(())
            });
        }

        for _ in 0..jobs {
            let hasher = (self.hasher)()?;
            let mut processor = (self.processor)()?;
            let stored_rx = stored_rx.clone();
            let plain_tx = plain_tx.clone();
            let token = group.token();
            group.spawn(async move {
                let shared = processor.shared_read_buffer();
                while let Some(block) = stored_rx.recv(&token).await {
                    let plain = {
                        let output = processor.read_process(&block.data)?;
                        owned_output(output, &block.data, shared)
                    };
                    let plain = plain.unwrap_or(block.data);
                    if hasher.hash(&plain) != block.hash {
                        return Err(TesseraError::IntegrityMismatch { index: block.index });
                    }
                    if !send_or_cancel(&plain_tx, (block.index, plain), &token).await {
                        return Ok(());
                    }
                }
                Ok(())
            });
        }
        drop(chunk_rx);
        drop(stored_tx);
        drop(stored_rx);
        drop(plain_tx);

        let written = async {
            let mut next = 0;
            let mut pending = BTreeMap::new();
            while let Some((index, plain)) = plain_rx.recv().await {
                pending.insert(index, plain);
                while let Some(plain) = pending.remove(&next) {
                    cancellable(&token, async {
                        writer.write_all(&plain).await?;
                        Ok(())
                    })
                    .await?;
                    next += 1;
                }
            }
            cancellable(&token, async {
                writer.flush().await?;
                Ok(())
            })
            .await?;
            Ok::<usize, TesseraError>(next)
        };
        let written = match written.await {
            Ok(written) => written,
            Err(TesseraError::Cancelled) => 0,
            Err(err) => {
                group.fail(err);
                0
            }
        };

        group.wait().await?;
        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        if written != chunks.len() {
            return Err(TesseraError::internal(
                "PIPELINE",
                "not all chunks were received",
            ));
        }
        Ok(())
    }

    async fn check(
        &self,
        chunks: &[Chunk],
        fast: bool,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus> {
        if chunks.is_empty() {
            return Ok(CheckStatus::Optimal);
        }
        let jobs = (self.job_count * 2).min(chunks.len());

        let mut group = WorkerGroup::new(cancel);
        let chunk_rx = spawn_feeder(&mut group, chunks.to_vec(), jobs);
        let (status_tx, mut status_rx) = mpsc::channel::<CheckStatus>(jobs);

        for _ in 0..jobs {
            let storage = self.storage.clone();
            let chunk_rx = chunk_rx.clone();
            let status_tx = status_tx.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some(chunk) = chunk_rx.recv(&token).await {
                    let status = match storage
                        .check_chunk(&ChunkConfig::from(&chunk), fast, &token)
                        .await
                    {
                        Ok(status) => status,
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    };
                    if !send_or_cancel(&status_tx, status, &token).await {
                        return Ok(());
                    }
                }
                Ok(())
            });
        }
        drop(chunk_rx);
        drop(status_tx);

        let mut status = CheckStatus::Optimal;
        let mut checked = 0;
        while let Some(chunk_status) = status_rx.recv().await {
            status = status.min(chunk_status);
            checked += 1;
            if status == CheckStatus::Invalid {
                group.stop();
                break;
            }
        }
        group.wait().await?;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        if status != CheckStatus::Invalid && checked != chunks.len() {
            return Err(TesseraError::internal(
                "PIPELINE",
                "not all chunks were checked",
            ));
        }
        Ok(status)
    }

    async fn repair(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        self.single.repair(chunks, cancel).await
    }

    async fn delete(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let jobs = (self.job_count * 2).min(chunks.len());

        let mut group = WorkerGroup::new(cancel);
        let chunk_rx = spawn_feeder(&mut group, chunks.to_vec(), jobs);
        for _ in 0..jobs {
            let storage = self.storage.clone();
            let chunk_rx = chunk_rx.clone();
            let token = group.token();
            group.spawn(async move {
                while let Some(chunk) = chunk_rx.recv(&token).await {
                    match storage.delete_chunk(&ChunkConfig::from(&chunk), &token).await {
                        Ok(()) => {}
                        Err(TesseraError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            });
        }
        drop(chunk_rx);
        group.wait().await?;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        Ok(())
    }

    fn chunk_size(&self) -> usize {
        self.block_size
    }
}

/// Reads `reader` in `block_size` blocks; the last block may be short.
/// A read failure cancels the pipeline.
async fn split_blocks(
    reader: &mut Reader<'_>,
    block_size: usize,
    input_tx: mpsc::Sender<(usize, Vec<u8>)>,
    token: &CancellationToken,
) -> Result<usize> {
    let mut buf = vec![0u8; block_size];
    let mut index = 0;
    loop {
        let n = match cancellable(token, read_full(reader, &mut buf)).await {
            Ok(n) => n,
            Err(TesseraError::Cancelled) => return Err(TesseraError::Cancelled),
            Err(err) => {
                token.cancel();
                return Err(err);
            }
        };
        if n == 0 {
            break;
        }
        if !send_or_cancel(&input_tx, (index, buf[..n].to_vec()), token).await {
            return Err(TesseraError::Cancelled);
        }
        index += 1;
        if n < block_size {
            break;
        }
    }
    Ok(index)
}

/// Fills `buf` unless the reader ends first; returns the number of bytes read.
async fn read_full(reader: &mut Reader<'_>, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
