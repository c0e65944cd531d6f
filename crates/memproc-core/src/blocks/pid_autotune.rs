//! PID Auto-Tuner (spec.md §4.16): relay-feedback identification
//! (Åström-Hägglund) deriving Ziegler-Nichols gains.
//!
//! `Initializing -> RelayTest -> AnalyzingData -> {Completed|Failed|Aborted}`
//! (spec.md §8 invariant "PID monotonic states": the status sequence is a
//! prefix of this list for the lifetime of one session). Transient state
//! lives in the Value Store (`TuningState`); only the terminal gains and
//! status persist to the relational session row.

use std::f64::consts::PI;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::{TuningState, ValueStoreGateway};

use super::support::read_final;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    RelayTest,
    AnalyzingData,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct PidTuneConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub setpoint_reference: SourceRef,
    pub process_variable_reference: SourceRef,
    pub output_reference: SourceRef,
    pub relay_amplitude_percent: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub hysteresis: f64,
    pub min_cycles: u32,
    pub max_cycles: u32,
    pub timeout_seconds: i64,
    pub safety_amplitude_limit_percent: f64,
    /// Rejects entering Initializing while true (parent PID in a cascade
    /// still running its own tune).
    pub parent_cascade_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub confidence: f64,
}

/// Persists the session's terminal outcome to its relational row. Split
/// out from the block so the relay-feedback math can be unit tested
/// without a database (spec.md §9: repositories sit at the I/O seam).
#[async_trait]
pub trait PidSessionRepository: Send + Sync {
    async fn mark_completed(&self, session_id: Uuid, gains: &PidGains) -> Result<(), MemprocError>;
    async fn mark_failed(&self, session_id: Uuid, reason: &str) -> Result<(), MemprocError>;
    async fn mark_aborted(&self, session_id: Uuid) -> Result<(), MemprocError>;
}

pub struct PidAutoTuneBlock {
    config: PidTuneConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    repository: Arc<dyn PidSessionRepository>,
    pub status: SessionStatus,
    started_at: Option<i64>,
}

impl PidAutoTuneBlock {
    pub fn new(
        config: PidTuneConfig,
        gateway: Arc<dyn ValueStoreGateway>,
        repository: Arc<dyn PidSessionRepository>,
    ) -> Self {
        Self {
            config,
            gateway,
            repository,
            status: SessionStatus::Initializing,
            started_at: None,
        }
    }

    /// Operator-invoked abort: forces terminal `Aborted` and cleans up
    /// transient state, from any non-terminal status.
    pub async fn abort(&mut self) -> Result<(), MemprocError> {
        if matches!(self.status, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted) {
            return Ok(());
        }
        self.gateway.delete_tuning_state(self.config.id).await?;
        self.status = SessionStatus::Aborted;
        self.repository.mark_aborted(self.config.id).await
    }

    async fn fail(&mut self, reason: String) -> Result<(), MemprocError> {
        self.gateway.delete_tuning_state(self.config.id).await?;
        self.status = SessionStatus::Failed;
        self.repository.mark_failed(self.config.id, &reason).await
    }

    async fn initialize(&mut self, now: i64) -> Result<(), MemprocError> {
        if self.config.parent_cascade_active {
            return self.fail("parent PID in cascade is still active".to_string()).await;
        }

        let setpoint_entry = read_final(self.gateway.as_ref(), &self.config.setpoint_reference)
            .await?
            .ok_or_else(|| MemprocError::Resolve("pid auto-tune: setpoint unresolved".to_string()))?;
        let setpoint = setpoint_entry.as_f64()?;

        let relay_high =
            self.config.output_min + self.config.relay_amplitude_percent / 100.0 * (self.config.output_max - self.config.output_min);
        let relay_low = self.config.output_min;

        let state = TuningState {
            setpoint,
            relay_high,
            relay_low,
            hysteresis: self.config.hysteresis,
            relay_active_high: true,
            pv_window: Vec::new(),
            peaks: Vec::new(),
            troughs: Vec::new(),
            consecutive_read_failures: 0,
            started_at: now,
        };
        self.gateway.set_tuning_state(self.config.id, &state).await?;
        self.started_at = Some(now);
        self.status = SessionStatus::RelayTest;
        Ok(())
    }

    async fn relay_test_tick(&mut self, now: i64) -> Result<(), MemprocError> {
        let mut state = self
            .gateway
            .get_tuning_state(self.config.id)
            .await?
            .ok_or_else(|| MemprocError::Resolve("pid auto-tune: transient state missing".to_string()))?;

        let started_at = self.started_at.unwrap_or(state.started_at);
        if now - started_at > self.config.timeout_seconds {
            return self.fail("relay test exceeded timeout".to_string()).await;
        }

        let pv_entry = read_final(self.gateway.as_ref(), &self.config.process_variable_reference).await?;
        let Some(pv_entry) = pv_entry else {
            state.consecutive_read_failures += 1;
            if state.consecutive_read_failures >= 10 {
                self.gateway.set_tuning_state(self.config.id, &state).await?;
                return self.fail("process variable read failed 10 consecutive times".to_string()).await;
            }
            self.gateway.set_tuning_state(self.config.id, &state).await?;
            return Ok(());
        };
        let Ok(pv) = pv_entry.as_f64() else {
            state.consecutive_read_failures += 1;
            if state.consecutive_read_failures >= 10 {
                self.gateway.set_tuning_state(self.config.id, &state).await?;
                return self.fail("process variable unparsable 10 consecutive times".to_string()).await;
            }
            self.gateway.set_tuning_state(self.config.id, &state).await?;
            return Ok(());
        };
        state.consecutive_read_failures = 0;

        // Toggle relay when PV crosses setpoint ± hysteresis.
        if state.relay_active_high && pv > state.setpoint + state.hysteresis {
            state.relay_active_high = false;
        } else if !state.relay_active_high && pv < state.setpoint - state.hysteresis {
            state.relay_active_high = true;
        }
        let relay_output = if state.relay_active_high { state.relay_high } else { state.relay_low };
        super::support::write_output(self.gateway.as_ref(), &self.config.output_reference, &relay_output.to_string(), now, None)
            .await?;

        state.pv_window.push(pv);
        if state.pv_window.len() > 3 {
            state.pv_window.remove(0);
        }
        if state.pv_window.len() == 3 {
            let (pv2, pv1, pv0) = (state.pv_window[0], state.pv_window[1], state.pv_window[2]);
            if pv1 > pv2 && pv1 > pv0 && pv1 > state.setpoint {
                let differs = state.peaks.last().map(|&(_, last)| (pv1 - last).abs() > state.hysteresis).unwrap_or(true);
                if differs {
                    state.peaks.push((now, pv1));
                }
            } else if pv1 < pv2 && pv1 < pv0 && pv1 < state.setpoint {
                let differs = state.troughs.last().map(|&(_, last)| (pv1 - last).abs() > state.hysteresis).unwrap_or(true);
                if differs {
                    state.troughs.push((now, pv1));
                }
            }
        }

        let cycle_count = state.peaks.len().min(state.troughs.len()) as u32;

        if !state.peaks.is_empty() && !state.troughs.is_empty() {
            let avg_peak = state.peaks.iter().map(|&(_, v)| v).sum::<f64>() / state.peaks.len() as f64;
            let avg_trough = state.troughs.iter().map(|&(_, v)| v).sum::<f64>() / state.troughs.len() as f64;
            let amplitude_percent = (avg_peak - avg_trough) / state.setpoint * 100.0;
            if amplitude_percent.abs() > self.config.safety_amplitude_limit_percent {
                self.gateway.set_tuning_state(self.config.id, &state).await?;
                return self
                    .fail(format!("relay amplitude {amplitude_percent:.1}% exceeded safety limit"))
                    .await;
            }
        }

        if cycle_count >= self.config.max_cycles && cycle_count < self.config.min_cycles {
            self.gateway.set_tuning_state(self.config.id, &state).await?;
            return self.fail("reached max_cycles without completing min_cycles".to_string()).await;
        }

        self.gateway.set_tuning_state(self.config.id, &state).await?;

        if cycle_count >= self.config.min_cycles {
            self.status = SessionStatus::AnalyzingData;
        }
        Ok(())
    }

    async fn analyze(&mut self) -> Result<(), MemprocError> {
        let state = self
            .gateway
            .get_tuning_state(self.config.id)
            .await?
            .ok_or_else(|| MemprocError::Resolve("pid auto-tune: transient state missing at analysis".to_string()))?;

        if state.peaks.len() < 2 || state.troughs.len() < 2 {
            return self.fail("insufficient peaks/troughs to analyze".to_string()).await;
        }

        let periods: Vec<f64> = state
            .peaks
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) as f64)
            .collect();
        let pu = periods.iter().sum::<f64>() / periods.len() as f64;

        let pairs = state.peaks.len().min(state.troughs.len());
        let a = (0..pairs).map(|i| state.peaks[i].1 - state.troughs[i].1).sum::<f64>() / pairs as f64;
        let d = state.relay_high - state.relay_low;

        if a.abs() <= f64::EPSILON || pu <= f64::EPSILON {
            return self.fail("degenerate oscillation, cannot derive gains".to_string()).await;
        }

        let ku = 4.0 * d / (PI * a);
        let kp = 0.6 * ku;
        let ki = 1.2 * ku / pu;
        let kd = 0.075 * ku * pu;

        let period_mean = pu;
        let period_variance = periods.iter().map(|p| (p - period_mean).powi(2)).sum::<f64>() / periods.len() as f64;
        let period_stddev = period_variance.sqrt();
        let confidence = (1.0 - period_stddev / period_mean).max(0.0);

        let gains = PidGains { kp, ki, kd, confidence };
        self.repository.mark_completed(self.config.id, &gains).await?;
        self.gateway.delete_tuning_state(self.config.id).await?;
        self.status = SessionStatus::Completed;
        Ok(())
    }
}

#[async_trait]
impl Block for PidAutoTuneBlock {
    fn id(&self) -> Uuid {
        self.config.id
    }
    fn interval_seconds(&self) -> u64 {
        self.config.interval_seconds.max(1)
    }
    fn is_disabled(&self) -> bool {
        self.config.is_disabled
    }

    async fn execute(&mut self, now: i64) -> Result<(), MemprocError> {
        match self.status {
            SessionStatus::Initializing => self.initialize(now).await,
            SessionStatus::RelayTest => self.relay_test_tick(now).await,
            SessionStatus::AnalyzingData => self.analyze().await,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRepository {
        completed: Mutex<Option<PidGains>>,
        failed: Mutex<Option<String>>,
    }

    #[async_trait]
    impl PidSessionRepository for RecordingRepository {
        async fn mark_completed(&self, _session_id: Uuid, gains: &PidGains) -> Result<(), MemprocError> {
            *self.completed.lock().unwrap() = Some(gains.clone());
            Ok(())
        }
        async fn mark_failed(&self, _session_id: Uuid, reason: &str) -> Result<(), MemprocError> {
            *self.failed.lock().unwrap() = Some(reason.to_string());
            Ok(())
        }
        async fn mark_aborted(&self, _session_id: Uuid) -> Result<(), MemprocError> {
            Ok(())
        }
    }

    fn config(id: Uuid, setpoint: Uuid, pv: Uuid, output: Uuid) -> PidTuneConfig {
        PidTuneConfig {
            id,
            is_disabled: false,
            interval_seconds: 1,
            setpoint_reference: SourceRef::Point(setpoint),
            process_variable_reference: SourceRef::Point(pv),
            output_reference: SourceRef::Point(output),
            relay_amplitude_percent: 20.0,
            output_min: 0.0,
            output_max: 100.0,
            hysteresis: 0.5,
            min_cycles: 3,
            max_cycles: 10,
            timeout_seconds: 600,
            safety_amplitude_limit_percent: 80.0,
            parent_cascade_active: false,
        }
    }

    #[tokio::test]
    async fn status_sequence_is_a_prefix_of_the_canonical_list() {
        let setpoint = Uuid::new_v4();
        let pv = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(setpoint, "50", 0);
        let repo = Arc::new(RecordingRepository::default());
        let mut block = PidAutoTuneBlock::new(config(Uuid::new_v4(), setpoint, pv, output), store.clone(), repo);

        assert_eq!(block.status, SessionStatus::Initializing);
        block.execute(0).await.unwrap();
        assert_eq!(block.status, SessionStatus::RelayTest);

        // Simulate a clean oscillation around the setpoint so peaks and
        // troughs are recorded on alternating relay phases.
        let wave = [50.0, 55.0, 60.0, 55.0, 50.0, 45.0, 40.0, 45.0, 50.0, 55.0, 60.0, 55.0, 50.0, 45.0, 40.0, 45.0, 50.0];
        for (t, &value) in wave.iter().enumerate() {
            store.seed_final(pv, value.to_string(), t as i64 + 1);
            block.execute(t as i64 + 1).await.unwrap();
            assert!(matches!(
                block.status,
                SessionStatus::RelayTest | SessionStatus::AnalyzingData | SessionStatus::Completed
            ));
            if block.status == SessionStatus::AnalyzingData {
                block.execute(t as i64 + 2).await.unwrap();
                break;
            }
        }
        assert!(matches!(block.status, SessionStatus::Completed | SessionStatus::AnalyzingData));
    }

    #[tokio::test]
    async fn parent_cascade_active_fails_fast_at_initialization() {
        let setpoint = Uuid::new_v4();
        let pv = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(setpoint, "50", 0);
        let mut cfg = config(Uuid::new_v4(), setpoint, pv, output);
        cfg.parent_cascade_active = true;
        let repo = Arc::new(RecordingRepository::default());
        let mut block = PidAutoTuneBlock::new(cfg, store.clone(), repo.clone());
        block.execute(0).await.unwrap();
        assert_eq!(block.status, SessionStatus::Failed);
        assert!(repo.failed.lock().unwrap().is_some());
    }
}
