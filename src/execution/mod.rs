//! Parallel execution of whole-table work with bounded concurrency.
//!
//! The pipeline itself is a strict sequence of stages; inside a stage, row-independent work
//! (the region filter, per-school rating evaluation) is split into chunks and run on a rayon
//! thread pool. The engine provides:
//!
//! - order-preserving chunked filter/map
//! - a throttle on concurrently executing chunks
//! - live metrics and observer hooks

mod observer;
mod semaphore;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;

use crate::error::{CensusError, CensusResult};
use crate::types::{DataSet, Value};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, LogExecutionObserver,
};

use semaphore::ChunkThrottle;

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionOptions {
    /// Number of worker threads. `None` uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Number of items (rows, schools) per chunk.
    pub chunk_size: usize,
    /// Upper bound on concurrently executing chunks, on top of `num_threads`.
    pub max_in_flight_chunks: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = available_parallelism();
        Self {
            num_threads: Some(n),
            chunk_size: 4_096,
            max_in_flight_chunks: n,
        }
    }
}

impl ExecutionOptions {
    /// Reject zero-sized chunks, zero in-flight chunks and zero threads.
    pub fn validate(&self) -> CensusResult<()> {
        let problem = if self.chunk_size == 0 {
            Some("chunk_size must be > 0")
        } else if self.max_in_flight_chunks == 0 {
            Some("max_in_flight_chunks must be > 0")
        } else if self.num_threads == Some(0) {
            Some("num_threads must be > 0 when set")
        } else {
            None
        };
        problem.map_or(Ok(()), |message| {
            Err(CensusError::Config {
                message: message.to_string(),
            })
        })
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A thread pool plus throttling and instrumentation for chunked table work.
pub struct ExecutionEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("threads", &self.pool.current_num_threads())
            .field("opts", &self.opts)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    pub fn new(opts: ExecutionOptions) -> CensusResult<Self> {
        opts.validate()?;
        let n_threads = opts.num_threads.unwrap_or_else(available_parallelism);

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("censo-worker-{i}"))
            .build()
            .map_err(|e| CensusError::Config {
                message: format!("failed to build thread pool: {e}"),
            })?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events.
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle to the live execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Keep the rows matching `predicate`, in their original order.
    pub fn filter_parallel<F>(&self, dataset: &DataSet, predicate: F) -> DataSet
    where
        F: Fn(&[Value]) -> bool + Send + Sync,
    {
        let rows = self.run_chunked("filter", &dataset.rows, |chunk| {
            chunk
                .iter()
                .filter(|row| predicate(row.as_slice()))
                .cloned()
                .collect()
        });
        DataSet::new(dataset.schema.clone(), rows)
    }

    /// Apply `f` to every item, returning outputs in input order.
    pub fn map_parallel<T, R, F>(&self, label: &'static str, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Send + Sync,
    {
        self.run_chunked(label, items, |chunk| chunk.iter().map(&f).collect())
    }

    fn run_chunked<T, R, F>(&self, label: &'static str, items: &[T], per_chunk: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&[T]) -> Vec<R> + Send + Sync,
    {
        self.pool.install(|| {
            let start = Instant::now();
            self.metrics.begin_run();
            self.emit(ExecutionEvent::RunStarted {
                label,
                items: items.len(),
            });

            let throttle = ChunkThrottle::new(self.opts.max_in_flight_chunks);
            let chunk_size = self.opts.chunk_size;

            let per_chunk_out: Vec<Vec<R>> = items
                .par_chunks(chunk_size)
                .enumerate()
                .map(|(i, chunk)| {
                    let permit = throttle.acquire();
                    if permit.waited > Duration::ZERO {
                        self.metrics.on_throttle_wait(permit.waited);
                        self.emit(ExecutionEvent::ThrottleWaited {
                            duration: permit.waited,
                        });
                    }

                    self.metrics.on_chunk_start();
                    self.emit(ExecutionEvent::ChunkStarted {
                        start: i * chunk_size,
                        len: chunk.len(),
                    });

                    let out = per_chunk(chunk);

                    self.metrics.on_items_processed(chunk.len());
                    self.emit(ExecutionEvent::ChunkFinished {
                        output_len: out.len(),
                    });
                    self.metrics.on_chunk_end();
                    drop(permit);
                    out
                })
                .collect();

            let out: Vec<R> = per_chunk_out.into_iter().flatten().collect();

            self.metrics.end_run(start.elapsed());
            self.emit(ExecutionEvent::RunFinished {
                label,
                elapsed: start.elapsed(),
                metrics: self.metrics.snapshot(),
            });
            out
        })
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{ExecutionEngine, ExecutionEvent, ExecutionObserver, ExecutionOptions};
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn dataset_of_n(n: i64) -> DataSet {
        let schema = Schema::new(vec![Field::new("CO_ENTIDADE", DataType::Int64)]);
        DataSet::new(schema, (0..n).map(|i| vec![Value::Int64(i)]).collect())
    }

    #[derive(Default)]
    struct ConcurrencyObserver {
        active_chunks: AtomicUsize,
        max_active_chunks: AtomicUsize,
    }

    impl ExecutionObserver for ConcurrencyObserver {
        fn on_event(&self, event: &ExecutionEvent) {
            match event {
                ExecutionEvent::ChunkStarted { .. } => {
                    let now = self.active_chunks.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = self.max_active_chunks.fetch_max(now, Ordering::SeqCst);
                }
                ExecutionEvent::ChunkFinished { .. } => {
                    let _ = self.active_chunks.fetch_sub(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn filter_parallel_preserves_row_order() {
        let ds = dataset_of_n(1_000);
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            chunk_size: 7,
            max_in_flight_chunks: 4,
        })
        .unwrap();

        let out = engine.filter_parallel(&ds, |row| matches!(row[0], Value::Int64(v) if v % 3 == 0));
        let expected: Vec<Vec<Value>> = (0..1_000)
            .filter(|v| v % 3 == 0)
            .map(|v| vec![Value::Int64(v)])
            .collect();
        assert_eq!(out.rows, expected);
        assert_eq!(out.schema, ds.schema);
    }

    #[test]
    fn map_parallel_preserves_order() {
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(3),
            chunk_size: 5,
            max_in_flight_chunks: 3,
        })
        .unwrap();
        let items: Vec<i64> = (0..97).collect();
        let out = engine.map_parallel("double", &items, |v| v * 2);
        assert_eq!(out, items.iter().map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn max_in_flight_chunks_throttles_chunk_concurrency() {
        let observer = Arc::new(ConcurrencyObserver::default());
        let obs_trait: Arc<dyn ExecutionObserver> = observer.clone();
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            chunk_size: 1,
            max_in_flight_chunks: 1,
        })
        .unwrap()
        .with_observer(obs_trait);

        let items: Vec<usize> = (0..50).collect();
        let out = engine.map_parallel("sleepy", &items, |v| {
            std::thread::sleep(Duration::from_millis(1));
            *v
        });

        assert_eq!(out.len(), items.len());
        assert_eq!(observer.max_active_chunks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metrics_are_available_after_run() {
        let ds = dataset_of_n(60);
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            chunk_size: 1,
            max_in_flight_chunks: 1,
        })
        .unwrap();
        let metrics = engine.metrics();

        let out = engine.filter_parallel(&ds, |_row| {
            std::thread::sleep(Duration::from_millis(2));
            true
        });
        assert_eq!(out.row_count(), ds.row_count());

        let snap = metrics.snapshot();
        assert_eq!(snap.items_processed, 60);
        assert_eq!(snap.chunks_started, 60);
        assert_eq!(snap.chunks_finished, 60);
        assert_eq!(snap.max_active_chunks, 1);
        assert!(snap.throttle_wait > Duration::ZERO);
        assert!(snap.elapsed.is_some());
    }

    #[test]
    fn invalid_options_are_config_errors() {
        let err = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(1),
            chunk_size: 0,
            max_in_flight_chunks: 1,
        })
        .unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }
}
