//! Closed-loop monitoring: source -> detector pool -> controller.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{ReadingEvent, ReadingSource};
use crate::baseline::BaselineStore;
use crate::config::defaults::DETECTOR_OUTPUT_CAPACITY;
use crate::config::DetectorConfig;
use crate::detector::{DetectorOutput, DetectorPool, DetectorStats};
use crate::recalibration::{ControllerError, ControllerHandle, Disposition};

/// Counters for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub readings_read: u64,
    /// Lines the source could not parse
    pub readings_skipped: u64,
    pub detector: DetectorStats,
    pub events_forwarded: u64,
    pub cases_opened: u64,
    pub events_coalesced: u64,
    pub events_ignored: u64,
}

#[derive(Debug, Default)]
struct ForwardStats {
    forwarded: u64,
    opened: u64,
    coalesced: u64,
    ignored: u64,
}

/// Feeds one design's detector pool and forwards its output to the controller.
pub struct MonitoringLoop {
    detector: DetectorConfig,
    baselines: Arc<BaselineStore>,
    controller: ControllerHandle,
    cancel_token: CancellationToken,
}

impl MonitoringLoop {
    pub fn new(
        detector: DetectorConfig,
        baselines: Arc<BaselineStore>,
        controller: ControllerHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            detector,
            baselines,
            controller,
            cancel_token,
        }
    }

    /// Run until the source is exhausted or cancelled. Queued readings are
    /// drained through the detector before returning; open cases are not
    /// waited for.
    pub async fn run<S: ReadingSource + ?Sized>(self, source: &mut S) -> LoopStats {
        let (out_tx, out_rx) = mpsc::channel(DETECTOR_OUTPUT_CAPACITY);
        let pool = DetectorPool::spawn(self.detector.clone(), Arc::clone(&self.baselines), out_tx);
        let forwarder = tokio::spawn(forward(self.controller.clone(), out_rx));

        info!(
            source = source.source_name(),
            workers = pool.worker_count(),
            variant = %self.baselines.variant_id(),
            "Monitoring started"
        );

        let mut readings_read = 0u64;
        loop {
            let event = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                result = source.next_reading() => match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Source error, stopping");
                        break;
                    }
                }
            };

            let reading = match event {
                ReadingEvent::Reading(r) => r,
                ReadingEvent::Eof => {
                    info!(source = source.source_name(), "End of input");
                    break;
                }
            };
            readings_read += 1;

            if let Err(e) = pool.submit(reading).await {
                warn!(error = %e, "Detector pool stopped, ending loop");
                break;
            }
        }

        let detector = pool.shutdown().await;
        let forwarded = match forwarder.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Forwarder task failed");
                ForwardStats::default()
            }
        };

        let stats = LoopStats {
            readings_read,
            readings_skipped: source.skipped(),
            detector,
            events_forwarded: forwarded.forwarded,
            cases_opened: forwarded.opened,
            events_coalesced: forwarded.coalesced,
            events_ignored: forwarded.ignored,
        };
        info!(
            readings = stats.readings_read,
            rejected = stats.detector.rejected(),
            events = stats.events_forwarded,
            cases = stats.cases_opened,
            "Monitoring stopped"
        );
        stats
    }
}

async fn forward(controller: ControllerHandle, mut rx: mpsc::Receiver<DetectorOutput>) -> ForwardStats {
    let mut stats = ForwardStats::default();
    while let Some(output) = rx.recv().await {
        let result = match output {
            DetectorOutput::Event(event) => {
                stats.forwarded += 1;
                controller.submit_deviation(event).await.map(|disposition| {
                    match disposition {
                        Disposition::Opened(_) => stats.opened += 1,
                        Disposition::Coalesced(_) => stats.coalesced += 1,
                        Disposition::Ignored => stats.ignored += 1,
                    }
                })
            }
            DetectorOutput::Rejected {
                reading,
                error,
                variant_id,
            } => {
                debug!(sensor = %reading.sensor_id, metric = %reading.metric, "Forwarding rejected reading");
                controller
                    .report_rejected_reading(variant_id, reading.sensor_id, reading.metric, error.to_string())
                    .await
            }
        };
        if let Err(ControllerError::ChannelClosed) = result {
            warn!("Controller stopped, dropping detector output");
            break;
        }
    }
    stats
}
