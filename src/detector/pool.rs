//! Sharded detector workers
//!
//! Readings are routed to a worker by a hash of their sensor id, so all
//! readings of one sensor are processed in arrival order by the same
//! detector, while different sensors proceed concurrently.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DetectorError, DetectorStats, DeviationDetector};
use crate::baseline::BaselineStore;
use crate::config::DetectorConfig;
use crate::types::{DeviationEvent, SensorReading};

/// What a worker hands downstream.
#[derive(Debug, Clone)]
pub enum DetectorOutput {
    Event(DeviationEvent),
    Rejected {
        reading: SensorReading,
        error: DetectorError,
        /// Variant whose baselines were in force when the reading was rejected
        variant_id: String,
    },
}

pub struct DetectorPool {
    senders: Vec<mpsc::Sender<SensorReading>>,
    workers: Vec<JoinHandle<DetectorStats>>,
}

impl DetectorPool {
    /// Spawn `config.workers` detector tasks writing to `output`.
    pub fn spawn(
        config: DetectorConfig,
        baselines: Arc<BaselineStore>,
        output: mpsc::Sender<DetectorOutput>,
    ) -> Self {
        let count = config.workers.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);

        for worker_id in 0..count {
            let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
            let detector = DeviationDetector::new(config.clone(), Arc::clone(&baselines));
            workers.push(tokio::spawn(run_worker(worker_id, detector, rx, output.clone())));
            senders.push(tx);
        }

        debug!(workers = count, "Detector pool started");
        Self { senders, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    fn shard_for(&self, sensor_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        sensor_id.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue a reading. Waits when the worker's queue is full.
    pub async fn submit(&self, reading: SensorReading) -> Result<(), DetectorError> {
        let shard = self.shard_for(&reading.sensor_id);
        let sensor_id = reading.sensor_id.clone();
        self.senders[shard]
            .send(reading)
            .await
            .map_err(|_| DetectorError::WorkerStopped(sensor_id))
    }

    /// Close the queues, let workers drain them, and return combined counters.
    pub async fn shutdown(self) -> DetectorStats {
        drop(self.senders);
        let mut total = DetectorStats::default();
        for worker in self.workers {
            match worker.await {
                Ok(stats) => total.merge(&stats),
                Err(e) => warn!(error = %e, "Detector worker panicked"),
            }
        }
        total
    }
}

async fn run_worker(
    worker_id: usize,
    mut detector: DeviationDetector,
    mut rx: mpsc::Receiver<SensorReading>,
    output: mpsc::Sender<DetectorOutput>,
) -> DetectorStats {
    while let Some(reading) = rx.recv().await {
        let out = match detector.process(&reading) {
            Ok(Some(event)) => DetectorOutput::Event(event),
            Ok(None) => continue,
            Err(error) => DetectorOutput::Rejected {
                variant_id: detector.baselines().variant_id(),
                reading,
                error,
            },
        };
        if output.send(out).await.is_err() {
            warn!(worker_id, "Detector output closed, stopping worker");
            break;
        }
    }
    debug!(worker_id, stats = ?detector.stats(), "Detector worker stopped");
    detector.stats().clone()
}
