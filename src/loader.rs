//! Deduplicating micro-batch loader.
//!
//! Every [`Loader::load`] issued while a batch is open joins that batch. The
//! batch opens when the first key lands in an empty buffer and closes once
//! [`BatchPolicy::window`] has elapsed, or as soon as
//! [`BatchPolicy::max_batch_size`] keys are waiting. A zero window closes the
//! batch at the next scheduler yield instead of after a timer.
//!
//! On close the buffer is swapped out whole, the key list is de-duplicated and
//! handed to the [`BatchFn`] exactly once. Nothing is cached: the next batch
//! asks upstream again, even for keys seen before.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};

use crate::error::{Error, Result};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Upstream call resolving many keys in one round-trip.
///
/// Implementations must return exactly one entry per key, in key order, with
/// `None` for keys unknown upstream.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static {
    async fn load(&self, keys: &[K]) -> Result<Vec<Option<V>>>;
}

/// When a pending batch closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub window: Duration,
    pub max_batch_size: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

type Reply<V> = oneshot::Sender<std::result::Result<Option<V>, Arc<Error>>>;

struct Pending<K, V> {
    waiters: Vec<(K, Reply<V>)>,
    /// Bumped every time the buffer is taken, so a stale timer never closes
    /// a younger batch.
    generation: u64,
}

impl<K, V> Pending<K, V> {
    fn take(&mut self) -> Vec<(K, Reply<V>)> {
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.waiters)
    }
}

struct Inner<K, V, F> {
    name: &'static str,
    fetch: F,
    policy: BatchPolicy,
    pending: Mutex<Pending<K, V>>,
}

/// Shared handle on a batch loader. Cloning is cheap.
pub struct Loader<K, V, F> {
    inner: Arc<Inner<K, V, F>>,
}

impl<K, V, F> Clone for Loader<K, V, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, F> Loader<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    F: BatchFn<K, V>,
{
    /// Create a new [`Loader`]. `name` labels logs and metrics.
    pub fn new(name: &'static str, fetch: F, policy: BatchPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                fetch,
                policy: BatchPolicy {
                    max_batch_size: policy.max_batch_size.max(1),
                    ..policy
                },
                pending: Mutex::new(Pending {
                    waiters: Vec::new(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Access the underlying fetch function.
    pub fn fetcher(&self) -> &F {
        &self.inner.fetch
    }

    /// Resolve one key, waiting for the batch it joins to complete.
    pub async fn load(&self, key: K) -> Result<Option<V>> {
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            pending.waiters.push((key, tx));

            if pending.waiters.len() >= self.inner.policy.max_batch_size {
                let waiters = pending.take();
                tokio::spawn(Arc::clone(&self.inner).dispatch(waiters));
            } else if pending.waiters.len() == 1 {
                let generation = pending.generation;
                tokio::spawn(Arc::clone(&self.inner).close_after_window(generation));
            }
        }

        rx.await.map_err(|_| Error::Canceled)?.map_err(Error::Batch)
    }

    /// Resolve several keys. Values line up with `keys`, duplicates included.
    pub async fn load_many(&self, keys: &[K]) -> Result<Vec<Option<V>>> {
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            let loader = self.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { loader.load(key).await }));
        }

        let mut values = Vec::with_capacity(handles.len());
        for handle in handles {
            values.push(handle.await.map_err(|_| Error::Canceled)??);
        }
        Ok(values)
    }
}

impl<K, V, F> Inner<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    F: BatchFn<K, V>,
{
    async fn close_after_window(self: Arc<Self>, generation: u64) {
        if self.policy.window.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.policy.window).await;
        }

        let waiters = {
            let mut pending = self.pending.lock().await;
            if pending.generation != generation || pending.waiters.is_empty() {
                return;
            }
            pending.take()
        };

        self.dispatch(waiters).await;
    }

    async fn dispatch(self: Arc<Self>, waiters: Vec<(K, Reply<V>)>) {
        let mut index = HashMap::with_capacity(waiters.len());
        let mut keys = Vec::with_capacity(waiters.len());
        for (key, _) in &waiters {
            if !index.contains_key(key) {
                index.insert(key.clone(), keys.len());
                keys.push(key.clone());
            }
        }

        tracing::debug!(
            loader = self.name,
            waiters = waiters.len(),
            keys = keys.len(),
            "dispatching batch"
        );
        metrics::histogram!("loader_batch_size", "loader" => self.name)
            .record(keys.len() as f64);

        let values = match self.fetch.load(&keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                let err = Error::BatchLength {
                    expected: keys.len(),
                    got: values.len(),
                };
                return fail(self.name, waiters, err);
            },
            Err(err) => return fail(self.name, waiters, err),
        };

        for (key, reply) in waiters {
            let value = index.get(&key).and_then(|i| values[*i].clone());
            // Receiver gone means the caller stopped waiting.
            let _ = reply.send(Ok(value));
        }
    }
}

fn fail<K, V>(name: &'static str, waiters: Vec<(K, Reply<V>)>, err: Error) {
    tracing::error!(loader = name, error = %err, "batch load failed");

    let err = Arc::new(err);
    for (_, reply) in waiters {
        let _ = reply.send(Err(Arc::clone(&err)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Records every batch it sees and answers `key * 10`, skipping keys
    /// listed as missing.
    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<Vec<u32>>>,
        missing: Vec<u32>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl BatchFn<u32, u32> for Recorder {
        async fn load(&self, keys: &[u32]) -> Result<Vec<Option<u32>>> {
            self.calls.lock().unwrap().push(keys.to_vec());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::GraphQl("upstream down".into()));
            }
            Ok(keys
                .iter()
                .map(|key| (!self.missing.contains(key)).then_some(key * 10))
                .collect())
        }
    }

    struct Short;

    #[async_trait]
    impl BatchFn<u32, u32> for Short {
        async fn load(&self, _keys: &[u32]) -> Result<Vec<Option<u32>>> {
            Ok(vec![])
        }
    }

    fn loader(fetch: Recorder) -> Loader<u32, u32, Recorder> {
        Loader::new("test", fetch, BatchPolicy::default())
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_batch() {
        let loader = loader(Recorder::default());

        let (a, b, c, d) = tokio::join!(
            loader.load(1),
            loader.load(2),
            loader.load(1),
            loader.load(3)
        );

        assert_eq!(a.unwrap(), Some(10));
        assert_eq!(b.unwrap(), Some(20));
        assert_eq!(c.unwrap(), Some(10));
        assert_eq!(d.unwrap(), Some(30));

        let calls = loader.fetcher().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_load_many_preserves_order() {
        let loader = loader(Recorder::default());

        let values = loader.load_many(&[1, 2, 1, 3]).await.unwrap();
        assert_eq!(values, vec![Some(10), Some(20), Some(10), Some(30)]);

        let calls = loader.fetcher().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let mut keys = calls[0].clone();
        keys.sort();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let loader = loader(Recorder {
            missing: vec![2],
            ..Default::default()
        });

        let values = loader.load_many(&[1, 2]).await.unwrap();
        assert_eq!(values, vec![Some(10), None]);
    }

    #[tokio::test]
    async fn test_no_cache_between_batches() {
        let loader = loader(Recorder::default());

        assert_eq!(loader.load(7).await.unwrap(), Some(70));
        assert_eq!(loader.load(7).await.unwrap(), Some(70));

        let calls = loader.fetcher().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![7], vec![7]]);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let loader = loader(Recorder {
            fail: AtomicBool::new(true),
            ..Default::default()
        });

        let (a, b) = tokio::join!(loader.load(1), loader.load(1));
        for result in [a, b] {
            match result {
                Err(Error::Batch(err)) => {
                    assert!(matches!(*err, Error::GraphQl(_)))
                },
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_length_fails_batch() {
        let loader = Loader::new("short", Short, BatchPolicy::default());

        match loader.load(1).await {
            Err(Error::Batch(err)) => assert!(matches!(
                *err,
                Error::BatchLength {
                    expected: 1,
                    got: 0
                }
            )),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_batch_closes_early() {
        let loader = Loader::new(
            "bounded",
            Recorder::default(),
            BatchPolicy {
                window: Duration::from_secs(60),
                max_batch_size: 2,
            },
        );

        let (a, b) = tokio::join!(loader.load(1), loader.load(2));
        assert_eq!(a.unwrap(), Some(10));
        assert_eq!(b.unwrap(), Some(20));

        let calls = loader.fetcher().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_zero_window_still_batches_ready_callers() {
        let loader = Loader::new(
            "yield",
            Recorder::default(),
            BatchPolicy {
                window: Duration::ZERO,
                max_batch_size: 100,
            },
        );

        let (a, b) = tokio::join!(loader.load(4), loader.load(5));
        assert_eq!(a.unwrap(), Some(40));
        assert_eq!(b.unwrap(), Some(50));

        let calls = loader.fetcher().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![4, 5]]);
    }
}
