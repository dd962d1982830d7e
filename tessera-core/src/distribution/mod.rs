mod erasure;

pub use erasure::ReedSolomonDistributor;

use crate::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Splits one chunk into `required_part_count()` parts and rebuilds it
/// from any `min_valid_parts()` of them.
pub trait Distributor: Send + Sync {
    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// `parts` is positional; missing parts are `None`.
    fn decode(&self, parts: Vec<Option<Vec<u8>>>, size: usize) -> Result<Vec<u8>>;

    fn required_part_count(&self) -> usize;

    fn min_valid_parts(&self) -> usize;
}

/// Replication is erasure coding with a single data part.
#[derive(Debug, Clone)]
pub struct ReplicationDistributor {
    factor: usize,
}

impl ReplicationDistributor {
    pub fn new(factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(TesseraError::Config(
                "replication factor must be at least 1".to_string(),
            ));
        }
        Ok(Self { factor })
    }
}

impl Distributor for ReplicationDistributor {
    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(vec![data.to_vec(); self.factor])
    }

    fn decode(&self, parts: Vec<Option<Vec<u8>>>, size: usize) -> Result<Vec<u8>> {
        let data = parts
            .into_iter()
            .flatten()
            .next()
            .ok_or(TesseraError::ShardsUnavailable)?;
        if data.len() != size {
            return Err(TesseraError::InvalidDataSize {
                expected: size,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    fn required_part_count(&self) -> usize {
        self.factor
    }

    fn min_valid_parts(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub data_shards: usize,
    #[serde(default)]
    pub parity_shards: usize,
}

impl DistributionConfig {
    pub fn is_random(&self) -> bool {
        self.data_shards == 0 && self.parity_shards == 0
    }

    pub fn required_shard_count(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// `None` when chunks go to a single random shard.
    pub fn distributor(&self) -> Result<Option<Arc<dyn Distributor>>> {
        match (self.data_shards, self.parity_shards) {
            (0, 0) => Ok(None),
            (0, parity) => Err(TesseraError::Config(format!(
                "parity shards ({}) configured without data shards",
                parity
            ))),
            (data, 0) => Ok(Some(Arc::new(ReplicationDistributor::new(data)?))),
            (data, parity) => Ok(Some(Arc::new(ReedSolomonDistributor::new(data, parity)?))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication() {
        let distributor = ReplicationDistributor::new(3).unwrap();
        assert_eq!(distributor.required_part_count(), 3);
        assert_eq!(distributor.min_valid_parts(), 1);

        let parts = distributor.encode(b"abc").unwrap();
        assert_eq!(parts, vec![b"abc".to_vec(); 3]);

        let decoded = distributor
            .decode(vec![None, None, Some(b"abc".to_vec())], 3)
            .unwrap();
        assert_eq!(decoded, b"abc");

        assert!(matches!(
            distributor.decode(vec![None, None, None], 3),
            Err(TesseraError::ShardsUnavailable)
        ));
        assert!(ReplicationDistributor::new(0).is_err());
    }

    #[test]
    fn test_distribution_config() {
        let random = DistributionConfig::default();
        assert!(random.is_random());
        assert!(random.distributor().unwrap().is_none());

        let replication = DistributionConfig {
            data_shards: 2,
            parity_shards: 0,
        };
        let distributor = replication.distributor().unwrap().unwrap();
        assert_eq!(distributor.required_part_count(), 2);
        assert_eq!(distributor.min_valid_parts(), 1);

        let erasure = DistributionConfig {
            data_shards: 10,
            parity_shards: 3,
        };
        let distributor = erasure.distributor().unwrap().unwrap();
        assert_eq!(distributor.required_part_count(), 13);
        assert_eq!(distributor.min_valid_parts(), 10);

        let invalid = DistributionConfig {
            data_shards: 0,
            parity_shards: 1,
        };
        assert!(invalid.distributor().is_err());
    }
}
