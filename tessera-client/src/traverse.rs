use std::sync::Arc;
use tessera_core::{Metadata, Pipeline, Result, TesseraError, Writer};
use tessera_meta::MetaStore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Follows `next_key`; epochs grow from `from` to `to`.
    Forward,
    /// Follows `previous_key`; epochs shrink from `from` to `to`.
    Backward,
}

/// Walks a chain of linked records, yielding those whose creation epoch lies
/// within the inclusive epoch range.
///
/// Records before the range are skipped; the walk ends at the first record
/// past it. Not meant for concurrent use.
pub struct TraverseIterator {
    direction: Direction,
    next_key: Option<Vec<u8>>,
    from_epoch: Option<i64>,
    to_epoch: Option<i64>,
    current: Option<Metadata>,
    metastore: MetaStore,
    pipeline: Arc<dyn Pipeline>,
}

fn bounded(epoch: i64) -> Option<i64> {
    (epoch > 0).then_some(epoch)
}

impl TraverseIterator {
    pub(crate) fn forward(
        start_key: &[u8],
        from_epoch: i64,
        to_epoch: i64,
        metastore: MetaStore,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<Self> {
        Self::new(Direction::Forward, start_key, from_epoch, to_epoch, metastore, pipeline)
    }

    pub(crate) fn backward(
        start_key: &[u8],
        from_epoch: i64,
        to_epoch: i64,
        metastore: MetaStore,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<Self> {
        Self::new(Direction::Backward, start_key, from_epoch, to_epoch, metastore, pipeline)
    }

    fn new(
        direction: Direction,
        start_key: &[u8],
        from_epoch: i64,
        to_epoch: i64,
        metastore: MetaStore,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<Self> {
        if start_key.is_empty() {
            return Err(TesseraError::NilKey);
        }
        let (from_epoch, to_epoch) = (bounded(from_epoch), bounded(to_epoch));
        if let (Some(from), Some(to)) = (from_epoch, to_epoch) {
            let inverted = match direction {
                Direction::Forward => from > to,
                Direction::Backward => to > from,
            };
            if inverted {
                return Err(TesseraError::InvalidEpochRange);
            }
        }
        Ok(Self {
            direction,
            next_key: Some(start_key.to_vec()),
            from_epoch,
            to_epoch,
            current: None,
            metastore,
            pipeline,
        })
    }

    /// Moves to the next record in range; `false` once the walk is over.
    pub async fn next(&mut self) -> Result<bool> {
        while let Some(key) = self.next_key.take() {
            let metadata = match self.metastore.get_metadata(&key).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::error!(
                        "failed to fetch linked metadata. key={} error={}",
                        String::from_utf8_lossy(&key),
                        err
                    );
                    self.next_key = Some(key);
                    return Err(err);
                }
            };

            let epoch = metadata.creation_epoch;
            let past_end = match (self.direction, self.to_epoch) {
                (Direction::Forward, Some(to)) => epoch > to,
                (Direction::Backward, Some(to)) => epoch < to,
                (_, None) => false,
            };
            if past_end {
                self.current = None;
                return Ok(false);
            }

            self.next_key = match self.direction {
                Direction::Forward => metadata.next_key(),
                Direction::Backward => metadata.previous_key(),
            }
            .map(<[u8]>::to_vec);

            let before_start = match (self.direction, self.from_epoch) {
                (Direction::Forward, Some(from)) => epoch < from,
                (Direction::Backward, Some(from)) => epoch > from,
                (_, None) => false,
            };
            if before_start {
                continue;
            }

            self.current = Some(metadata);
            return Ok(true);
        }
        self.current = None;
        Ok(false)
    }

    /// Key the next call to `next` will fetch.
    pub fn peek_next_key(&self) -> Option<&[u8]> {
        self.next_key.as_deref()
    }

    pub fn metadata(&self) -> Result<&Metadata> {
        self.current.as_ref().ok_or_else(|| {
            TesseraError::InvalidRequest(
                "traverse iterator is not positioned on a record".to_string(),
            )
        })
    }

    /// Writes the data of the current record to `writer`.
    pub async fn read_data(&self, writer: &mut Writer<'_>) -> Result<()> {
        let metadata = self.metadata()?;
        self.pipeline
            .read(&metadata.chunks, writer, &CancellationToken::new())
            .await
    }
}
