//! [`DecisionEngine`] – turns one sensor snapshot into one command.
//!
//! Each call to [`DecisionEngine::process`]:
//!
//! 1. **Record** – append a [`MetricsLogEntry`] for the snapshot.
//! 2. **Monitor** – classify the inertial sample, if any; an unstable verdict
//!    appends an [`AlertEntry`] (observational only, it does not change the
//!    decision).
//! 3. **Persist** – when an image store is attached, save the frame once.
//! 4. **Decide** – consult the [`LlmPolicy`], which falls back to the
//!    heuristic policy whenever the provider is absent or unusable.
//! 5. **Log** – append a [`CommandLogEntry`] and return the command.
//!
//! `process` takes `&self` and may run concurrently for independent
//! snapshots; each history store is locked separately.
//!
//! # Example
//!
//! ```rust
//! use carbrain_runtime::decision_engine::{DecisionEngine, EngineConfig};
//! use carbrain_types::{CommandKind, SensorSnapshot};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // No provider: DEMO mode, heuristic decisions.
//! let engine = DecisionEngine::new(EngineConfig::default(), None);
//! let snapshot = SensorSnapshot {
//!     session_id: 1,
//!     step: 1,
//!     timestamp: "2025-01-01T00:00:00".into(),
//!     distance_cm: 12.0,
//!     light_raw: 500,
//!     light_dark: false,
//!     inertial: None,
//!     image: None,
//! };
//! let command = engine.process(snapshot).await;
//! assert_eq!(command.kind, CommandKind::Backward);
//! assert_eq!(engine.commands().len(), 1);
//! # }
//! ```

use std::sync::Arc;

use carbrain_kernel::{AnomalyMonitor, AnomalyThresholds};
use carbrain_memory::{HistoryStore, ImageIndex, ImagePersistence, MetricsStats};
use carbrain_types::{
    AlertEntry, Command, CommandKind, CommandLogEntry, DEFAULT_DURATION_MS, EngineMode,
    LlmExchangeEntry, MetricsLogEntry, SensorSnapshot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::llm_driver::CompletionProvider;
use crate::llm_policy::{LlmPolicy, LlmPolicyConfig};
use crate::prompt::HISTORY_WINDOW;
use crate::system_prompt::SystemPrompt;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-store capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryCapacities {
    pub commands: usize,
    pub metrics: usize,
    pub exchanges: usize,
    pub alerts: usize,
}

impl Default for HistoryCapacities {
    fn default() -> Self {
        Self {
            commands: 1000,
            metrics: 1000,
            exchanges: 500,
            alerts: 200,
        }
    }
}

/// Configuration bundle for [`DecisionEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub llm: LlmPolicyConfig,
    pub capacities: HistoryCapacities,
    /// Command-log entries handed to the prompt compiler.
    pub history_window: usize,
    pub anomaly: AnomalyThresholds,
    /// Capacity of the image index when an image store is attached.
    pub image_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm: LlmPolicyConfig::default(),
            capacities: HistoryCapacities::default(),
            history_window: HISTORY_WINDOW,
            anomaly: AnomalyThresholds::default(),
            image_capacity: 100,
        }
    }
}

/// Snapshot of the engine's state for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub mode: EngineMode,
    /// Configured model; `None` in DEMO mode.
    pub model: Option<String>,
    pub commands_processed: usize,
    pub metrics_stored: usize,
    pub exchanges_stored: usize,
    pub alerts_stored: usize,
    /// `None` when no image store is attached.
    pub images_stored: Option<usize>,
    pub available_commands: Vec<CommandKind>,
    pub default_duration_ms: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// DecisionEngine
// ─────────────────────────────────────────────────────────────────────────────

/// The sensor-to-command core.  Share it behind an `Arc`.
pub struct DecisionEngine {
    commands: HistoryStore<CommandLogEntry>,
    metrics: HistoryStore<MetricsLogEntry>,
    exchanges: Arc<HistoryStore<LlmExchangeEntry>>,
    alerts: HistoryStore<AlertEntry>,
    images: Option<ImageIndex>,
    image_capacity: usize,
    monitor: AnomalyMonitor,
    system_prompt: Arc<SystemPrompt>,
    policy: LlmPolicy,
    history_window: usize,
}

impl DecisionEngine {
    /// Build an engine.  `provider = None` runs in DEMO mode.
    pub fn new(config: EngineConfig, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        let exchanges = Arc::new(HistoryStore::new(config.capacities.exchanges));
        let system_prompt = Arc::new(SystemPrompt::default());
        let policy = LlmPolicy::new(
            provider,
            config.llm,
            Arc::clone(&system_prompt),
            Arc::clone(&exchanges),
        );
        Self {
            commands: HistoryStore::new(config.capacities.commands),
            metrics: HistoryStore::new(config.capacities.metrics),
            exchanges,
            alerts: HistoryStore::new(config.capacities.alerts),
            images: None,
            image_capacity: config.image_capacity,
            monitor: AnomalyMonitor::new(config.anomaly),
            system_prompt,
            policy,
            history_window: config.history_window,
        }
    }

    /// Persist every available frame through `backend`.
    pub fn with_image_store(mut self, backend: Arc<dyn ImagePersistence>) -> Self {
        self.images = Some(ImageIndex::new(self.image_capacity, backend));
        self
    }

    /// Decide the next command for `snapshot`.  Never fails.
    #[instrument(skip_all, fields(session_id = snapshot.session_id, step = snapshot.step))]
    pub async fn process(&self, snapshot: SensorSnapshot) -> Command {
        self.metrics.append(MetricsLogEntry::from_snapshot(&snapshot));

        if let Some(sample) = &snapshot.inertial {
            let verdict = self.monitor.check(sample);
            if verdict.is_unstable() {
                let message = verdict.describe();
                warn!(%message, ax = sample.ax, ay = sample.ay, az = sample.az, "anomaly detected");
                self.alerts
                    .append(AlertEntry::new(&snapshot, message, verdict.details(sample)));
            }
        }

        self.persist_image(&snapshot);

        let recent = self.commands.recent(self.history_window);
        let command = self.policy.decide(&snapshot, &recent).await;

        self.commands
            .append(CommandLogEntry::new(snapshot.step, command));
        info!(
            command = %command.kind,
            duration_ms = command.duration_ms,
            mode = %self.policy.mode(),
            "command decided"
        );
        command
    }

    fn persist_image(&self, snapshot: &SensorSnapshot) {
        let Some(index) = &self.images else {
            return;
        };
        let Some(image) = snapshot.image.as_ref().filter(|img| img.has_payload()) else {
            return;
        };
        match index.persist(snapshot.session_id, snapshot.step, image) {
            Ok(entry) => debug!(reference = %entry.reference, "frame saved"),
            Err(e) => warn!(error = %e, "failed to save frame"),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn commands(&self) -> &HistoryStore<CommandLogEntry> {
        &self.commands
    }

    pub fn metrics(&self) -> &HistoryStore<MetricsLogEntry> {
        &self.metrics
    }

    pub fn exchanges(&self) -> &HistoryStore<LlmExchangeEntry> {
        &self.exchanges
    }

    pub fn alerts(&self) -> &HistoryStore<AlertEntry> {
        &self.alerts
    }

    pub fn images(&self) -> Option<&ImageIndex> {
        self.images.as_ref()
    }

    /// Live anomaly thresholds (read / replace / reset).
    pub fn anomaly_monitor(&self) -> &AnomalyMonitor {
        &self.monitor
    }

    /// Live system instruction (get / replace / reset).
    pub fn system_prompt(&self) -> &SystemPrompt {
        &self.system_prompt
    }

    pub fn mode(&self) -> EngineMode {
        self.policy.mode()
    }

    pub fn metrics_stats(&self) -> Option<MetricsStats> {
        self.metrics.inspect(|entries| MetricsStats::from_entries(entries))
    }

    pub fn status(&self) -> EngineStatus {
        let mode = self.mode();
        EngineStatus {
            mode,
            model: (mode == EngineMode::Llm).then(|| self.policy.config().model.clone()),
            commands_processed: self.commands.len(),
            metrics_stored: self.metrics.len(),
            exchanges_stored: self.exchanges.len(),
            alerts_stored: self.alerts.len(),
            images_stored: self.images.as_ref().map(ImageIndex::len),
            available_commands: CommandKind::ALL.to_vec(),
            default_duration_ms: DEFAULT_DURATION_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carbrain_memory::DirectoryImageStore;
    use carbrain_types::{ImageRef, InertialSample};

    use crate::heuristic;
    use crate::llm_driver::{Completion, CompletionRequest, LlmError};

    struct Fixed(&'static str);

    #[async_trait]
    impl CompletionProvider for Fixed {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
            Ok(Completion::text(self.0))
        }
    }

    fn snapshot(step: u64, distance_cm: f64) -> SensorSnapshot {
        SensorSnapshot {
            session_id: 1,
            step,
            timestamp: format!("t{step}"),
            distance_cm,
            light_raw: 500,
            light_dark: false,
            inertial: None,
            image: None,
        }
    }

    #[tokio::test]
    async fn demo_cycle_records_metrics_command_and_exchange() {
        let engine = DecisionEngine::new(EngineConfig::default(), None);
        let s = snapshot(4, 35.0);
        let command = engine.process(s.clone()).await;

        assert_eq!(command, heuristic::decide(&s));
        assert_eq!(engine.metrics().len(), 1);
        assert_eq!(engine.commands().latest().unwrap().command, CommandKind::Left);
        assert_eq!(engine.exchanges().latest().unwrap().mode, EngineMode::Demo);
        assert!(engine.alerts().is_empty());
    }

    #[tokio::test]
    async fn unstable_sample_appends_alert_without_changing_decision() {
        let engine = DecisionEngine::new(EngineConfig::default(), None);
        let mut s = snapshot(1, 300.0);
        s.inertial = Some(InertialSample::new(8.0, 0.0, 9.8, 6.0, 0.0, 0.0));
        let command = engine.process(s.clone()).await;

        assert_eq!(command, heuristic::decide(&s));
        let alert = engine.alerts().latest().unwrap();
        assert_eq!(alert.step, 1);
        assert!(alert.details.is_tilted_x);
        assert!(alert.message.contains("Instability"));
    }

    #[tokio::test]
    async fn stable_sample_appends_no_alert() {
        let engine = DecisionEngine::new(EngineConfig::default(), None);
        let mut s = snapshot(1, 300.0);
        s.inertial = Some(InertialSample::new(0.0, 0.0, 9.8, 0.0, 0.0, 0.0));
        engine.process(s).await;
        assert!(engine.alerts().is_empty());
    }

    #[tokio::test]
    async fn replaced_thresholds_take_effect() {
        let engine = DecisionEngine::new(EngineConfig::default(), None);
        let mut s = snapshot(1, 300.0);
        s.inertial = Some(InertialSample::new(3.0, 0.0, 9.8, 2.0, 0.0, 0.0));
        engine.process(s.clone()).await;
        assert!(engine.alerts().is_empty());

        engine.anomaly_monitor().set_thresholds(AnomalyThresholds {
            ax_max: 2.0,
            ay_max: 2.0,
            az_min: 5.0,
            gyro_max: 1.0,
        });
        engine.process(s).await;
        assert_eq!(engine.alerts().len(), 1);
    }

    #[tokio::test]
    async fn recent_commands_flow_into_the_next_prompt() {
        let provider: Arc<dyn CompletionProvider> =
            Arc::new(Fixed(r#"{"command":"RIGHT","duration_ms":700}"#));
        let engine = DecisionEngine::new(EngineConfig::default(), Some(provider));
        for step in 0..7 {
            assert_eq!(
                engine.process(snapshot(step, 300.0)).await,
                Command::new(CommandKind::Right, 700)
            );
        }
        let prompt = engine.exchanges().latest().unwrap().user_prompt.unwrap();
        assert!(prompt.contains("Step 5: RIGHT (700ms)"));
        assert!(!prompt.contains("Step 0: RIGHT"));
        assert_eq!(engine.commands().len(), 7);
    }

    #[tokio::test]
    async fn capacities_bound_every_store() {
        let config = EngineConfig {
            capacities: HistoryCapacities {
                commands: 3,
                metrics: 2,
                exchanges: 4,
                alerts: 1,
            },
            ..EngineConfig::default()
        };
        let engine = DecisionEngine::new(config, None);
        for step in 0..10 {
            let mut s = snapshot(step, 300.0);
            s.inertial = Some(InertialSample::new(0.0, 9.0, 1.0, 0.0, 9.0, 0.0));
            engine.process(s).await;
        }
        assert_eq!(engine.commands().len(), 3);
        assert_eq!(engine.metrics().len(), 2);
        assert_eq!(engine.exchanges().len(), 4);
        assert_eq!(engine.alerts().len(), 1);
        assert_eq!(engine.commands().latest().unwrap().step, 9);
    }

    #[tokio::test]
    async fn status_reports_mode_and_counts() {
        let engine = DecisionEngine::new(EngineConfig::default(), None);
        engine.process(snapshot(1, 300.0)).await;
        let status = engine.status();
        assert_eq!(status.mode, EngineMode::Demo);
        assert!(status.model.is_none());
        assert_eq!(status.commands_processed, 1);
        assert_eq!(status.available_commands.len(), 5);
        assert_eq!(status.images_stored, None);

        let provider: Arc<dyn CompletionProvider> = Arc::new(Fixed("{}"));
        let engine = DecisionEngine::new(EngineConfig::default(), Some(provider));
        let status = engine.status();
        assert_eq!(status.mode, EngineMode::Llm);
        assert_eq!(status.model.as_deref(), Some("google/gemini-2.0-flash-exp:free"));
    }

    #[tokio::test]
    async fn frames_are_persisted_and_evicted() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let backend = Arc::new(DirectoryImageStore::open(dir.path()).unwrap());
        let config = EngineConfig {
            image_capacity: 2,
            ..EngineConfig::default()
        };
        let engine = DecisionEngine::new(config, None).with_image_store(backend);
        for step in 0..3 {
            let mut s = snapshot(step, 300.0);
            s.image = Some(ImageRef {
                available: true,
                width: 2,
                height: 1,
                format: "GRAY8".to_string(),
                payload: Some(vec![1, 2]),
            });
            engine.process(s).await;
        }
        assert_eq!(engine.images().unwrap().len(), 2);
        assert!(!dir.path().join("session_1_step_0.gray").exists());
        assert!(dir.path().join("session_1_step_2.gray").exists());
        assert_eq!(engine.status().images_stored, Some(2));
    }

    #[tokio::test]
    async fn metrics_stats_cover_the_log() {
        let engine = DecisionEngine::new(EngineConfig::default(), None);
        assert!(engine.metrics_stats().is_none());
        engine.process(snapshot(1, 100.0)).await;
        engine.process(snapshot(2, 300.0)).await;
        let stats = engine.metrics_stats().unwrap();
        assert_eq!(stats.total_records, 2);
        assert!((stats.distance.avg - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn concurrent_cycles_all_complete() {
        let engine = Arc::new(DecisionEngine::new(EngineConfig::default(), None));
        let handles: Vec<_> = (0..16)
            .map(|step| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.process(snapshot(step, 300.0)).await })
            })
            .collect();
        for h in handles {
            let command = h.await.unwrap();
            assert_eq!(command.kind, CommandKind::Forward);
        }
        assert_eq!(engine.commands().len(), 16);
        assert_eq!(engine.metrics().len(), 16);
        assert_eq!(engine.exchanges().len(), 16);
    }
}
