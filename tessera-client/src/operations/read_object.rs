use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tessera_core::{Chunk, Metadata, Pipeline, Result, TesseraError, Writer};
use tessera_meta::MetaStore;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ReadObjectOperation {
    pipeline: Arc<dyn Pipeline>,
    metastore: MetaStore,
}

/// Byte window `[offset, offset + length)` of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadByteRange {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ReadObjectOperationRequest {
    pub key: Vec<u8>,
    pub range: Option<ReadByteRange>,
}

impl ReadObjectOperation {
    pub fn new(pipeline: Arc<dyn Pipeline>, metastore: MetaStore) -> Self {
        Self {
            pipeline,
            metastore,
        }
    }

    /// Writes the object, or the requested window of it, to `writer` and
    /// returns the record it was read from.
    pub async fn run(
        &self,
        request: ReadObjectOperationRequest,
        writer: &mut Writer<'_>,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        let ReadObjectOperationRequest { key, range } = request;
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }

        let metadata = self.metastore.get_metadata(&key).await?;
        match range {
            None => self.pipeline.read(&metadata.chunks, writer, cancel).await?,
            Some(range) => {
                read_range(self.pipeline.as_ref(), &metadata, range, writer, cancel).await?
            }
        }
        Ok(metadata)
    }
}

/// Reads only the chunks overlapping `range`, trimming the bytes outside it.
pub(crate) async fn read_range(
    pipeline: &dyn Pipeline,
    metadata: &Metadata,
    range: ReadByteRange,
    writer: &mut Writer<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let size = u64::try_from(metadata.size).unwrap_or_default();
    let end = range
        .offset
        .checked_add(range.length)
        .filter(|end| *end <= size)
        .ok_or_else(|| {
            TesseraError::InvalidRequest(format!(
                "range {}+{} exceeds object size {}",
                range.offset, range.length, size
            ))
        })?;
    if range.length == 0 {
        return Ok(());
    }

    let (chunks, skip) = chunk_window(&metadata.chunks, range.offset, end);
    let mut ranged = RangeWriter {
        inner: writer,
        skip,
        remaining: range.length,
    };
    pipeline.read(chunks, &mut ranged, cancel).await
}

/// Chunks overlapping `[start, end)` and the offset of `start` within the first of them.
fn chunk_window(chunks: &[Chunk], start: u64, end: u64) -> (&[Chunk], u64) {
    let mut offset = 0u64;
    let mut first = None;
    let mut last = chunks.len();
    for (index, chunk) in chunks.iter().enumerate() {
        let chunk_end = offset + u64::try_from(chunk.size).unwrap_or_default();
        if first.is_none() && chunk_end > start {
            first = Some((index, start - offset));
        }
        if chunk_end >= end {
            last = index + 1;
            break;
        }
        offset = chunk_end;
    }
    match first {
        Some((index, skip)) => (&chunks[index..last], skip),
        None => (&[], 0),
    }
}

/// Drops the first `skip` bytes written to it and everything past `remaining`.
struct RangeWriter<'a, 'w> {
    inner: &'a mut Writer<'w>,
    skip: u64,
    remaining: u64,
}

impl AsyncWrite for RangeWriter<'_, '_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let len = buf.len() as u64;
        if this.remaining == 0 {
            return Poll::Ready(Ok(buf.len()));
        }
        if this.skip >= len {
            this.skip -= len;
            return Poll::Ready(Ok(buf.len()));
        }

        let start = this.skip as usize;
        let end = (this.skip + this.remaining).min(len) as usize;
        match Pin::new(&mut *this.inner).poll_write(cx, &buf[start..end]) {
            Poll::Ready(Ok(0)) => Poll::Ready(Ok(0)),
            Poll::Ready(Ok(n)) => {
                this.skip = 0;
                this.remaining -= n as u64;
                Poll::Ready(Ok(start + n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}
