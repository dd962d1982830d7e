use super::{Shard, ShardConnector};
use crate::task::{SharedReceiver, WorkerGroup, spawn_feeder};
use crate::{Result, TesseraError};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shard handles keyed by id.
///
/// Listed shards take part in random placement. Unlisted shards are only
/// reachable by id and are dialed on first use through the connector.
pub struct Cluster {
    listed: Vec<Arc<dyn Shard>>,
    by_id: HashMap<String, Arc<dyn Shard>>,
    unlisted: Mutex<HashMap<String, Arc<dyn Shard>>>,
    connector: Option<Arc<dyn ShardConnector>>,
}

impl Cluster {
    pub fn new(shards: Vec<Arc<dyn Shard>>) -> Result<Self> {
        if shards.is_empty() {
            return Err(TesseraError::Config(
                "cluster requires at least one shard".to_string(),
            ));
        }

        let mut by_id = HashMap::with_capacity(shards.len());
        for shard in &shards {
            let id = shard.identifier().to_string();
            if by_id.insert(id.clone(), shard.clone()).is_some() {
                return Err(TesseraError::Config(format!("duplicate shard: {}", id)));
            }
        }

        Ok(Self {
            listed: shards,
            by_id,
            unlisted: Mutex::new(HashMap::new()),
            connector: None,
        })
    }

    pub fn with_connector(mut self, connector: Arc<dyn ShardConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn listed_shard_count(&self) -> usize {
        self.listed.len()
    }

    pub async fn get_shard(&self, id: &str) -> Result<Arc<dyn Shard>> {
        if let Some(shard) = self.by_id.get(id) {
            return Ok(shard.clone());
        }

        let Some(connector) = &self.connector else {
            return Err(TesseraError::NotFound);
        };

        let mut unlisted = self.unlisted.lock().await;
        if let Some(shard) = unlisted.get(id) {
            return Ok(shard.clone());
        }
        let shard = connector.connect(id).await?;
        tracing::debug!("connected unlisted shard. shard={}", id);
        unlisted.insert(id.to_string(), shard.clone());
        Ok(shard)
    }

    /// Every listed shard not in `exclude`, once each, in random order.
    pub fn random_iterator(&self, exclude: &HashSet<String>) -> ShardIterator {
        let mut shards: Vec<Arc<dyn Shard>> = self
            .listed
            .iter()
            .filter(|shard| !exclude.contains(shard.identifier()))
            .cloned()
            .collect();
        shards.shuffle(&mut rand::thread_rng());
        ShardIterator {
            shards: shards.into_iter(),
        }
    }

    /// Shards for `ids` in the given order, skipping ids that cannot be resolved.
    pub fn lazy_iterator(self: &Arc<Self>, ids: Vec<String>) -> LazyShardIterator {
        LazyShardIterator {
            cluster: self.clone(),
            ids: ids.into_iter().enumerate().collect(),
        }
    }
}

pub struct ShardIterator {
    shards: std::vec::IntoIter<Arc<dyn Shard>>,
}

impl ShardIterator {
    /// Moves the iterator behind a bounded channel fed by a worker of `group`;
    /// the feeder stops as soon as the group is cancelled.
    pub fn into_channel(self, group: &mut WorkerGroup, capacity: usize) -> SharedReceiver<Arc<dyn Shard>> {
        spawn_feeder(group, self.shards, capacity)
    }
}

impl Iterator for ShardIterator {
    type Item = Arc<dyn Shard>;

    fn next(&mut self) -> Option<Self::Item> {
        self.shards.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.shards.size_hint()
    }
}

pub struct LazyShardIterator {
    cluster: Arc<Cluster>,
    ids: VecDeque<(usize, String)>,
}

impl LazyShardIterator {
    /// Next resolvable shard together with its position in the id list.
    pub async fn next(&mut self) -> Option<(usize, Arc<dyn Shard>)> {
        while let Some((index, id)) = self.ids.pop_front() {
            match self.cluster.get_shard(&id).await {
                Ok(shard) => return Some((index, shard)),
                Err(err) => {
                    tracing::error!("skipping unresolvable shard. shard={} error={}", id, err);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastor::MemoryShard;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cluster_of(count: usize) -> Cluster {
        let shards = (0..count)
            .map(|i| Arc::new(MemoryShard::new(format!("shard-{}", i))) as Arc<dyn Shard>)
            .collect();
        Cluster::new(shards).unwrap()
    }

    #[test]
    fn test_random_iterator_yields_each_shard_once() {
        let cluster = cluster_of(8);
        let mut ids: Vec<String> = cluster
            .random_iterator(&HashSet::new())
            .map(|shard| shard.identifier().to_string())
            .collect();
        ids.sort();
        let mut expected: Vec<String> = (0..8).map(|i| format!("shard-{}", i)).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_random_iterator_excludes() {
        let cluster = cluster_of(4);
        let exclude: HashSet<String> = ["shard-1".to_string(), "shard-3".to_string()].into();
        let ids: HashSet<String> = cluster
            .random_iterator(&exclude)
            .map(|shard| shard.identifier().to_string())
            .collect();
        assert_eq!(ids, HashSet::from(["shard-0".to_string(), "shard-2".to_string()]));
    }

    #[test]
    fn test_cluster_rejects_invalid_listing() {
        assert!(Cluster::new(Vec::new()).is_err());
        let duplicate: Vec<Arc<dyn Shard>> = vec![
            Arc::new(MemoryShard::new("a")),
            Arc::new(MemoryShard::new("a")),
        ];
        assert!(Cluster::new(duplicate).is_err());
    }

    struct CountingConnector {
        dials: AtomicUsize,
    }

    #[async_trait]
    impl ShardConnector for CountingConnector {
        async fn connect(&self, id: &str) -> Result<Arc<dyn Shard>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if id.starts_with("bad") {
                return Err(TesseraError::Unavailable);
            }
            Ok(Arc::new(MemoryShard::new(id)))
        }
    }

    #[tokio::test]
    async fn test_get_shard_dials_unlisted_once() {
        let connector = Arc::new(CountingConnector {
            dials: AtomicUsize::new(0),
        });
        let cluster = cluster_of(2).with_connector(connector.clone());

        assert_eq!(cluster.get_shard("shard-0").await.unwrap().identifier(), "shard-0");
        assert_eq!(cluster.get_shard("extra").await.unwrap().identifier(), "extra");
        cluster.get_shard("extra").await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.listed_shard_count(), 2);

        let plain = cluster_of(1);
        assert!(plain.get_shard("extra").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_lazy_iterator_skips_failures() {
        let connector = Arc::new(CountingConnector {
            dials: AtomicUsize::new(0),
        });
        let cluster = Arc::new(cluster_of(2).with_connector(connector));
        let mut iter = cluster.lazy_iterator(vec![
            "shard-1".to_string(),
            "bad-1".to_string(),
            "shard-0".to_string(),
        ]);

        let (index, shard) = iter.next().await.unwrap();
        assert_eq!((index, shard.identifier()), (0, "shard-1"));
        let (index, shard) = iter.next().await.unwrap();
        assert_eq!((index, shard.identifier()), (2, "shard-0"));
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn test_random_channel_shared_by_workers() {
        let cluster = cluster_of(16);
        let parent = tokio_util::sync::CancellationToken::new();
        let mut group = WorkerGroup::new(&parent);
        let rx = cluster.random_iterator(&HashSet::new()).into_channel(&mut group, 2);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for _ in 0..4 {
            let rx = rx.clone();
            let token = group.token();
            let seen = seen.clone();
            group.spawn(async move {
                while let Some(shard) = rx.recv(&token).await {
                    seen.lock().unwrap().push(shard.identifier().to_string());
                }
                Ok(())
            });
        }
        group.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(seen.len(), 16);
        assert_eq!(unique.len(), 16);
    }
}
