//! Recalibration controller actor
//!
//! The controller owns the design registry and the case index. It opens at
//! most one case per variant, routes later events for that variant into the
//! open case, and promotes accepted candidates by publishing their baselines.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::workflow::{apply_input, CaseInput, CaseReport, CaseRun};
use super::{ControllerError, RecalibrationCase};
use crate::advisory::DesignAdvisor;
use crate::baseline::BaselineStore;
use crate::config::defaults::{CASE_ID_PREFIX, CONTROLLER_COMMAND_CAPACITY};
use crate::config::RecalibrationConfig;
use crate::sampling::SeedStream;
use crate::simulation::SimulationEngine;
use crate::types::{AuditRecord, CaseOutcome, DesignVariant, DeviationEvent, EscalationReason};

// ============================================================================
// Commands
// ============================================================================

type Reply<T> = oneshot::Sender<T>;

enum ControllerCommand {
    Register {
        variant: DesignVariant,
        baselines: Arc<BaselineStore>,
        reply: Reply<Result<(), ControllerError>>,
    },
    Deviation {
        event: DeviationEvent,
        reply: Reply<Disposition>,
    },
    ReadingRejected {
        variant_id: String,
        sensor_id: String,
        metric: String,
        reason: String,
    },
    GetCase {
        case_id: String,
        reply: Reply<Option<RecalibrationCase>>,
    },
    ListCases {
        reply: Reply<Vec<RecalibrationCase>>,
    },
    ActiveVariant {
        variant_id: String,
        reply: Reply<Option<DesignVariant>>,
    },
    CancelCase {
        case_id: String,
        reply: Reply<Result<bool, ControllerError>>,
    },
    WaitForCase {
        case_id: String,
        reply: Reply<Result<RecalibrationCase, ControllerError>>,
    },
    WaitIdle {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// What the controller did with a deviation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "case_id", rename_all = "snake_case")]
pub enum Disposition {
    /// Not sustained, Normal, or measured against a superseded design
    Ignored,
    Opened(String),
    /// Added to the open case for the same variant
    Coalesced(String),
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> ControllerCommand,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControllerError::ChannelClosed)?;
        response.await.map_err(|_| ControllerError::ChannelClosed)
    }

    /// Put a design under control. Its baselines are published through `baselines`.
    pub async fn register(
        &self,
        variant: DesignVariant,
        baselines: Arc<BaselineStore>,
    ) -> Result<(), ControllerError> {
        self.request(|reply| ControllerCommand::Register {
            variant,
            baselines,
            reply,
        })
        .await?
    }

    pub async fn submit_deviation(&self, event: DeviationEvent) -> Result<Disposition, ControllerError> {
        self.request(|reply| ControllerCommand::Deviation { event, reply })
            .await
    }

    /// Note a rejected reading in the open case for `variant_id`, if any.
    pub async fn report_rejected_reading(
        &self,
        variant_id: impl Into<String>,
        sensor_id: impl Into<String>,
        metric: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(), ControllerError> {
        self.tx
            .send(ControllerCommand::ReadingRejected {
                variant_id: variant_id.into(),
                sensor_id: sensor_id.into(),
                metric: metric.into(),
                reason: reason.into(),
            })
            .await
            .map_err(|_| ControllerError::ChannelClosed)
    }

    pub async fn get_case(&self, case_id: &str) -> Result<Option<RecalibrationCase>, ControllerError> {
        let case_id = case_id.to_string();
        self.request(|reply| ControllerCommand::GetCase { case_id, reply })
            .await
    }

    /// Every case, open and closed, ordered by id.
    pub async fn list_cases(&self) -> Result<Vec<RecalibrationCase>, ControllerError> {
        self.request(|reply| ControllerCommand::ListCases { reply }).await
    }

    /// Design currently in force for `variant_id` or any of its predecessors.
    pub async fn active_variant(&self, variant_id: &str) -> Result<Option<DesignVariant>, ControllerError> {
        let variant_id = variant_id.to_string();
        self.request(|reply| ControllerCommand::ActiveVariant { variant_id, reply })
            .await
    }

    /// Cancel an open case. Returns `false` if it had already closed.
    pub async fn cancel_case(&self, case_id: &str) -> Result<bool, ControllerError> {
        let case_id = case_id.to_string();
        self.request(|reply| ControllerCommand::CancelCase { case_id, reply })
            .await?
    }

    /// Resolve once the case is closed. A case closed by a simulation error
    /// resolves to that error.
    pub async fn wait_for_case(&self, case_id: &str) -> Result<RecalibrationCase, ControllerError> {
        let case_id = case_id.to_string();
        self.request(|reply| ControllerCommand::WaitForCase { case_id, reply })
            .await?
    }

    /// Resolve once no case is open.
    pub async fn wait_idle(&self) -> Result<(), ControllerError> {
        self.request(|reply| ControllerCommand::WaitIdle { reply }).await
    }

    /// Cancel open cases, wait for them to close, and stop the actor.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.request(|reply| ControllerCommand::Shutdown { reply }).await
    }
}

// ============================================================================
// Actor
// ============================================================================

struct TrackedDesign {
    variant: DesignVariant,
    baselines: Arc<BaselineStore>,
}

struct ActiveCase {
    case_id: String,
    inputs: mpsc::UnboundedSender<CaseInput>,
    snapshot: watch::Receiver<RecalibrationCase>,
    cancel: CancellationToken,
}

pub struct RecalibrationController {
    engine: SimulationEngine,
    advisor: Arc<dyn DesignAdvisor>,
    config: RecalibrationConfig,
    seeds: SeedStream,
    rx: mpsc::Receiver<ControllerCommand>,
    finished_tx: mpsc::UnboundedSender<CaseReport>,
    finished_rx: mpsc::UnboundedReceiver<CaseReport>,
    cancel: CancellationToken,
    /// Keyed by the id of the variant in force
    designs: HashMap<String, TrackedDesign>,
    /// Replaced variant id -> its successor
    superseded: HashMap<String, String>,
    /// Keyed by variant id
    active: HashMap<String, ActiveCase>,
    closed: BTreeMap<String, RecalibrationCase>,
    failures: HashMap<String, ControllerError>,
    waiters: HashMap<String, Vec<Reply<Result<RecalibrationCase, ControllerError>>>>,
    idle_waiters: Vec<Reply<()>>,
    cases_opened: u64,
}

impl RecalibrationController {
    pub fn new(
        engine: SimulationEngine,
        advisor: Arc<dyn DesignAdvisor>,
        config: RecalibrationConfig,
    ) -> (Self, ControllerHandle) {
        let (tx, rx) = mpsc::channel(CONTROLLER_COMMAND_CAPACITY);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let seeds = SeedStream::new(engine.config().seed);

        let actor = Self {
            engine,
            advisor,
            config,
            seeds,
            rx,
            finished_tx,
            finished_rx,
            cancel: CancellationToken::new(),
            designs: HashMap::new(),
            superseded: HashMap::new(),
            active: HashMap::new(),
            closed: BTreeMap::new(),
            failures: HashMap::new(),
            waiters: HashMap::new(),
            idle_waiters: Vec::new(),
            cases_opened: 0,
        };
        (actor, ControllerHandle { tx })
    }

    /// Create the controller and run it on the current runtime.
    pub fn spawn(
        engine: SimulationEngine,
        advisor: Arc<dyn DesignAdvisor>,
        config: RecalibrationConfig,
    ) -> ControllerHandle {
        let (actor, handle) = Self::new(engine, advisor, config);
        tokio::spawn(actor.run());
        handle
    }

    pub async fn run(mut self) {
        info!(advisor = self.advisor.name(), "Recalibration controller starting");
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(ControllerCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                Some(report) = self.finished_rx.recv() => self.finish(report),
            }
        }

        self.cancel.cancel();
        while !self.active.is_empty() {
            match self.finished_rx.recv().await {
                Some(report) => self.finish(report),
                None => break,
            }
        }
        info!(cases = self.closed.len(), "Recalibration controller stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::Register { variant, baselines, reply } => {
                let _ = reply.send(self.register(variant, baselines));
            }
            ControllerCommand::Deviation { event, reply } => {
                let _ = reply.send(self.on_deviation(event));
            }
            ControllerCommand::ReadingRejected {
                variant_id,
                sensor_id,
                metric,
                reason,
            } => match self.active.get(&variant_id) {
                Some(active) => {
                    let _ = active.inputs.send(CaseInput::Note(AuditRecord::ReadingRejected {
                        sensor_id,
                        metric,
                        reason,
                    }));
                }
                None => debug!(variant = %variant_id, %sensor_id, %metric, "Rejected reading outside any case"),
            },
            ControllerCommand::GetCase { case_id, reply } => {
                let _ = reply.send(self.find_case(&case_id));
            }
            ControllerCommand::ListCases { reply } => {
                let mut cases: Vec<RecalibrationCase> = self.closed.values().cloned().collect();
                cases.extend(self.active.values().map(|a| a.snapshot.borrow().clone()));
                cases.sort_by(|a, b| a.id().cmp(b.id()));
                let _ = reply.send(cases);
            }
            ControllerCommand::ActiveVariant { variant_id, reply } => {
                let current = self.resolve(&variant_id);
                let _ = reply.send(self.designs.get(&current).map(|d| d.variant.clone()));
            }
            ControllerCommand::CancelCase { case_id, reply } => {
                let _ = reply.send(self.cancel_case(&case_id));
            }
            ControllerCommand::WaitForCase { case_id, reply } => {
                if let Some(case) = self.closed.get(&case_id) {
                    let result = match self.failures.get(&case_id) {
                        Some(e) => Err(e.clone()),
                        None => Ok(case.clone()),
                    };
                    let _ = reply.send(result);
                } else if self.active.values().any(|a| a.case_id == case_id) {
                    self.waiters.entry(case_id).or_default().push(reply);
                } else {
                    let _ = reply.send(Err(ControllerError::UnknownCase(case_id)));
                }
            }
            ControllerCommand::WaitIdle { reply } => {
                if self.active.is_empty() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            ControllerCommand::Shutdown { .. } => {}
        }
    }

    fn register(&mut self, variant: DesignVariant, baselines: Arc<BaselineStore>) -> Result<(), ControllerError> {
        let id = variant.id().to_string();
        if self.designs.contains_key(&id) {
            return Err(ControllerError::DuplicateVariant(id));
        }
        info!(variant = %id, baseline_version = baselines.version(), "Design registered");
        self.designs.insert(id, TrackedDesign { variant, baselines });
        Ok(())
    }

    /// Follow the supersession chain to the variant in force.
    fn resolve(&self, variant_id: &str) -> String {
        let mut current = variant_id.to_string();
        for _ in 0..=self.superseded.len() {
            match self.superseded.get(&current) {
                Some(next) => current.clone_from(next),
                None => break,
            }
        }
        current
    }

    fn on_deviation(&mut self, event: DeviationEvent) -> Disposition {
        if !event.is_actionable() {
            debug!(sensor = %event.sensor_id, metric = %event.metric, level = %event.level, "Event not actionable");
            return Disposition::Ignored;
        }

        if let Some(active) = self.active.get(&event.variant_id) {
            let case_id = active.case_id.clone();
            debug!(case = %case_id, sensor = %event.sensor_id, metric = %event.metric, "Event coalesced");
            if active.inputs.send(CaseInput::Coalesce(event)).is_err() {
                warn!(case = %case_id, "Case input closed");
            }
            return Disposition::Coalesced(case_id);
        }

        let Some(tracked) = self.designs.get(&event.variant_id) else {
            debug!(variant = %event.variant_id, "Event for a superseded or unknown design");
            return Disposition::Ignored;
        };
        if event.baseline_version != tracked.baselines.version() {
            debug!(
                variant = %event.variant_id,
                event_version = event.baseline_version,
                current_version = tracked.baselines.version(),
                "Event measured against stale baselines"
            );
            return Disposition::Ignored;
        }

        self.cases_opened += 1;
        let case_id = format!("{CASE_ID_PREFIX}-{:06}", self.cases_opened);
        let variant_id = event.variant_id.clone();
        info!(
            case = %case_id,
            variant = %variant_id,
            sensor = %event.sensor_id,
            metric = %event.metric,
            level = %event.level,
            deviation_pct = event.deviation_percent,
            "Recalibration case opened"
        );

        let case = RecalibrationCase::open(case_id.clone(), event, tracked.variant.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(case.clone());
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();

        let run = CaseRun {
            case,
            engine: self.engine.clone(),
            advisor: Arc::clone(&self.advisor),
            config: self.config.clone(),
            seed: self.seeds.derive(self.cases_opened).seed(),
            cancel: cancel.clone(),
            snapshot: snapshot_tx,
            inputs: inputs_rx,
        };

        let finished = self.finished_tx.clone();
        let last_snapshot = snapshot_rx.clone();
        let task_case_id = case_id.clone();
        tokio::spawn(async move {
            let report = match tokio::spawn(run.run()).await {
                Ok(report) => report,
                Err(e) => {
                    let mut case = last_snapshot.borrow().clone();
                    case.abort(EscalationReason::TaskFailed, e.to_string());
                    CaseReport {
                        case,
                        error: Some(ControllerError::TaskFailed {
                            case_id: task_case_id,
                            detail: e.to_string(),
                        }),
                        inputs: None,
                    }
                }
            };
            let _ = finished.send(report);
        });

        self.active.insert(
            variant_id,
            ActiveCase {
                case_id: case_id.clone(),
                inputs: inputs_tx,
                snapshot: snapshot_rx,
                cancel,
            },
        );
        Disposition::Opened(case_id)
    }

    fn find_case(&self, case_id: &str) -> Option<RecalibrationCase> {
        self.closed.get(case_id).cloned().or_else(|| {
            self.active
                .values()
                .find(|a| a.case_id == case_id)
                .map(|a| a.snapshot.borrow().clone())
        })
    }

    fn cancel_case(&self, case_id: &str) -> Result<bool, ControllerError> {
        if let Some(active) = self.active.values().find(|a| a.case_id == case_id) {
            info!(case = %case_id, "Cancelling case");
            active.cancel.cancel();
            return Ok(true);
        }
        if self.closed.contains_key(case_id) {
            return Ok(false);
        }
        Err(ControllerError::UnknownCase(case_id.to_string()))
    }

    fn finish(&mut self, report: CaseReport) {
        let CaseReport { mut case, error, inputs } = report;
        if let Some(mut inputs) = inputs {
            while let Ok(input) = inputs.try_recv() {
                apply_input(&mut case, input);
            }
        }

        let case_id = case.id().to_string();
        let variant_id = case.original().id().to_string();
        self.active.remove(&variant_id);

        if case.outcome() == CaseOutcome::Accepted {
            if let Some(candidate) = case.candidate() {
                self.promote(&variant_id, candidate.clone());
            }
        }

        info!(
            case = %case_id,
            outcome = %case.outcome(),
            state = %case.state(),
            coalesced = case.coalesced().len(),
            "Recalibration case closed"
        );

        if let Some(e) = &error {
            self.failures.insert(case_id.clone(), e.clone());
        }
        if let Some(waiters) = self.waiters.remove(&case_id) {
            for waiter in waiters {
                let result = match &error {
                    Some(e) => Err(e.clone()),
                    None => Ok(case.clone()),
                };
                let _ = waiter.send(result);
            }
        }
        self.closed.insert(case_id, case);

        if self.active.is_empty() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Make `candidate` the design in force and swap the detector baselines.
    fn promote(&mut self, previous_id: &str, candidate: DesignVariant) {
        let Some(tracked) = self.designs.remove(previous_id) else {
            warn!(variant = %previous_id, "Accepted case for an unregistered design");
            return;
        };
        let snapshot = tracked.baselines.publish(&candidate);
        info!(
            from = %previous_id,
            to = %candidate.id(),
            baseline_version = snapshot.version,
            "Design promoted"
        );
        let candidate_id = candidate.id().to_string();
        self.superseded.insert(previous_id.to_string(), candidate_id.clone());
        self.designs.insert(
            candidate_id,
            TrackedDesign {
                variant: candidate,
                baselines: tracked.baselines,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::{AdvisoryError, AdvisoryProposal, AdvisoryRequest, RuleBasedAdvisor};
    use crate::config::{AdvisoryConfig, SimulationConfig};
    use crate::types::{AlertLevel, BuiltinFormula, ParameterRole, ParameterSpec, RecalibrationState};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn design() -> DesignVariant {
        DesignVariant::builder(
            "V1",
            Arc::new(BuiltinFormula::CapacityDemand {
                capacity: "capacity".to_string(),
                demand: "demand".to_string(),
            }),
        )
        .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa").with_role(ParameterRole::Resistance))
        .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa").with_role(ParameterRole::Load))
        .cost_estimate(1_000.0)
        .build()
        .unwrap()
    }

    fn event(variant_id: &str, observed: f64, version: u64) -> DeviationEvent {
        DeviationEvent {
            sensor_id: "S1".to_string(),
            metric: "capacity".to_string(),
            baseline: 150.0,
            observed,
            deviation_percent: (observed - 150.0) / 150.0 * 100.0,
            level: AlertLevel::Critical,
            sustained: true,
            timestamp: Utc::now(),
            rolling_mean: observed,
            consecutive_readings: 3,
            baseline_version: version,
            variant_id: variant_id.to_string(),
        }
    }

    fn engine() -> SimulationEngine {
        SimulationEngine::new(SimulationConfig {
            trials: 2_000,
            ..SimulationConfig::default()
        })
        .unwrap()
    }

    fn fast_config() -> RecalibrationConfig {
        RecalibrationConfig {
            advisory_timeout_ms: 50,
            advisory_retry_backoff_ms: 10,
            ..RecalibrationConfig::default()
        }
    }

    async fn start(advisor: Arc<dyn DesignAdvisor>) -> (ControllerHandle, Arc<BaselineStore>) {
        let handle = RecalibrationController::spawn(engine(), advisor, fast_config());
        let variant = design();
        let store = Arc::new(BaselineStore::new(&variant));
        handle.register(variant, Arc::clone(&store)).await.unwrap();
        (handle, store)
    }

    /// Never answers within the deadline; counts calls.
    struct Stalled {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl DesignAdvisor for Stalled {
        async fn propose(&self, _request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Err(AdvisoryError::Failure("unreachable".to_string()))
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_accepted_case_promotes_candidate() {
        let advisor = Arc::new(RuleBasedAdvisor::new(AdvisoryConfig::default().tiers));
        let (handle, store) = start(advisor).await;

        let disposition = handle.submit_deviation(event("V1", 118.0, 1)).await.unwrap();
        assert_eq!(disposition, Disposition::Opened("RC-000001".to_string()));

        let case = handle.wait_for_case("RC-000001").await.unwrap();
        assert_eq!(case.outcome(), CaseOutcome::Accepted);
        assert_eq!(case.state(), RecalibrationState::Monitoring);
        let (before, after) = (case.before().unwrap(), case.after().unwrap());
        assert_eq!(before.seed, after.seed);
        assert_eq!(before.trials, after.trials);
        assert!(after.probability_of_failure <= before.probability_of_failure);

        let active = handle.active_variant("V1").await.unwrap().unwrap();
        assert_eq!(active.id(), "V1-RC-000001");
        assert_eq!(store.version(), 2);
        assert_eq!(store.variant_id(), "V1-RC-000001");
        assert_eq!(store.load().get("capacity"), Some(118.0));

        // an event measured against the replaced design opens nothing
        let stale = handle.submit_deviation(event("V1", 110.0, 1)).await.unwrap();
        assert_eq!(stale, Disposition::Ignored);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_active_case_per_variant() {
        let advisor = Arc::new(Stalled {
            calls: AtomicU32::new(0),
            delay: Duration::from_secs(5),
        });
        let (handle, _store) = start(advisor).await;

        let first = handle.submit_deviation(event("V1", 118.0, 1)).await.unwrap();
        let second = handle.submit_deviation(event("V1", 112.0, 1)).await.unwrap();
        assert_eq!(first, Disposition::Opened("RC-000001".to_string()));
        assert_eq!(second, Disposition::Coalesced("RC-000001".to_string()));

        let case = handle.wait_for_case("RC-000001").await.unwrap();
        assert_eq!(case.coalesced().len(), 1);
        assert!(case
            .audit()
            .iter()
            .any(|e| matches!(e.record, AuditRecord::EventCoalesced { .. })));
        assert_eq!(handle.list_cases().await.unwrap().len(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_advisory_timeout_retried_once_then_escalated() {
        let advisor = Arc::new(Stalled {
            calls: AtomicU32::new(0),
            delay: Duration::from_secs(5),
        });
        let (handle, store) = start(Arc::clone(&advisor) as Arc<dyn DesignAdvisor>).await;

        handle.submit_deviation(event("V1", 118.0, 1)).await.unwrap();
        let case = handle.wait_for_case("RC-000001").await.unwrap();

        assert_eq!(advisor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(case.outcome(), CaseOutcome::Escalated);
        assert_eq!(case.escalation_reason(), Some(EscalationReason::AdvisoryTimeout));
        let failed_attempts = case
            .audit()
            .iter()
            .filter(|e| matches!(e.record, AuditRecord::AdvisoryAttemptFailed { .. }))
            .count();
        assert_eq!(failed_attempts, 2);
        assert!(case.escalation().is_some());
        assert_eq!(store.version(), 1);
        handle.shutdown().await.unwrap();
    }

    /// Answers with a stronger footing regardless of the field value.
    struct FixedPatch;

    #[async_trait]
    impl DesignAdvisor for FixedPatch {
        async fn propose(&self, request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisoryError> {
            let candidate = DesignVariant::builder("V1-wide", Arc::clone(request.variant.formula()))
                .parameter(ParameterSpec::normal("capacity", 200.0, 10.0, "kPa").with_role(ParameterRole::Resistance))
                .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa").with_role(ParameterRole::Load))
                .parent("V1")
                .build()
                .map_err(|e| AdvisoryError::InvalidProposal(e.to_string()))?;
            Ok(AdvisoryProposal {
                candidate,
                rationale: "Wider pad".to_string(),
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_unusable_field_value_escalates_naming_metric() {
        let (handle, store) = start(Arc::new(FixedPatch)).await;

        handle.submit_deviation(event("V1", 0.0, 1)).await.unwrap();
        let case = handle.wait_for_case("RC-000001").await.unwrap();

        assert_eq!(case.outcome(), CaseOutcome::Escalated);
        assert_eq!(case.escalation_reason(), Some(EscalationReason::SimulationFailed));
        let brief = case.escalation().unwrap();
        assert!(brief.detail.contains("'capacity'"), "{}", brief.detail);
        assert!(case.before().is_none());
        assert_eq!(store.version(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_escalates() {
        let advisor = Arc::new(Stalled {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(30),
        });
        let handle = RecalibrationController::spawn(
            engine(),
            advisor,
            RecalibrationConfig {
                advisory_timeout_ms: 10_000,
                ..RecalibrationConfig::default()
            },
        );
        let variant = design();
        handle
            .register(variant.clone(), Arc::new(BaselineStore::new(&variant)))
            .await
            .unwrap();

        handle.submit_deviation(event("V1", 118.0, 1)).await.unwrap();
        assert!(handle.cancel_case("RC-000001").await.unwrap());
        let case = handle.wait_for_case("RC-000001").await.unwrap();
        assert_eq!(case.outcome(), CaseOutcome::Escalated);
        assert_eq!(case.escalation_reason(), Some(EscalationReason::Cancelled));
        assert!(!handle.cancel_case("RC-000001").await.unwrap());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_actionable_and_unknown_events_ignored() {
        let advisor = Arc::new(RuleBasedAdvisor::new(AdvisoryConfig::default().tiers));
        let (handle, _store) = start(advisor).await;

        let mut pending = event("V1", 118.0, 1);
        pending.sustained = false;
        assert_eq!(handle.submit_deviation(pending).await.unwrap(), Disposition::Ignored);
        assert_eq!(
            handle.submit_deviation(event("V9", 118.0, 1)).await.unwrap(),
            Disposition::Ignored
        );
        assert!(handle.list_cases().await.unwrap().is_empty());
        assert!(matches!(
            handle.wait_for_case("RC-000042").await,
            Err(ControllerError::UnknownCase(_))
        ));
        handle.wait_idle().await.unwrap();
        handle.shutdown().await.unwrap();
        assert_eq!(
            handle.list_cases().await.unwrap_err(),
            ControllerError::ChannelClosed
        );
    }
}
