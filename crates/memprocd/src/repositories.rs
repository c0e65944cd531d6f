//! Block configuration loaders: one query per block kind against its own
//! table (spec.md §3/§6), turning rows into the in-process config/state
//! structs `memproc-core` already knows how to run.
//!
//! Table names match the ones the Global Variable Service's reference
//! scan already depends on (`memproc_core::global_variable`), so a
//! rename's usage scan and a block's own load query never drift apart.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use memproc_core::blocks::average::{AverageBlock, AverageConfig, OutlierDetection};
use memproc_core::blocks::comparison::{
    AnalogCompareType, ComparisonBlock, ComparisonConfig, ComparisonGroup, GroupMode, OuterOperator,
};
use memproc_core::blocks::deadband::{DeadbandBlock, DeadbandConfig, DeadbandMode};
use memproc_core::blocks::formula::{FormulaBlock, FormulaConfig};
use memproc_core::blocks::if_block::{IfBlock, IfBranch, IfConfig, IfOutputKind};
use memproc_core::blocks::minmax::{FailoverMode, MinMaxBlock, MinMaxConfig, SelectorKind};
use memproc_core::blocks::pid_autotune::{PidAutoTuneBlock, PidSessionRepository, PidTuneConfig};
use memproc_core::blocks::rate_of_change::{RateComputation, RateOfChangeBlock, RateOfChangeConfig};
use memproc_core::blocks::statistical::{StatisticalBlock, StatisticalConfig, WindowKind};
use memproc_core::blocks::timeout::{TimeoutBlock, TimeoutConfig};
use memproc_core::blocks::totalizer::{TotalizerBlock, TotalizerConfig, TotalizerMode, TotalizerState};
use memproc_core::blocks::write_action::{WriteActionBlock, WriteActionConfig, WriteActionSource};
use memproc_core::error::MemprocError;
use memproc_core::reference::SourceRef;
use memproc_core::value_store::ValueStoreGateway;
use memproc_core::window::WindowBuffer;

fn parse_ref(raw: String) -> Result<SourceRef, MemprocError> {
    SourceRef::parse(&raw)
}

fn parse_ref_opt(raw: Option<String>) -> Result<Option<SourceRef>, MemprocError> {
    raw.map(parse_ref).transpose()
}

/// `inputs`/similar jsonb columns store an array of reference strings.
fn parse_ref_array(value: JsonValue) -> Result<Vec<SourceRef>, MemprocError> {
    let JsonValue::Array(items) = value else {
        return Err(MemprocError::Configuration("expected a json array of references".into()));
    };
    items
        .into_iter()
        .map(|v| match v {
            JsonValue::String(s) => parse_ref(s),
            other => Err(MemprocError::Configuration(format!("expected a reference string, got {other}"))),
        })
        .collect()
}

fn parse_f64_array(value: JsonValue) -> Result<Vec<f64>, MemprocError> {
    let JsonValue::Array(items) = value else {
        return Err(MemprocError::Configuration("expected a json array of numbers".into()));
    };
    items
        .into_iter()
        .map(|v| v.as_f64().ok_or_else(|| MemprocError::Configuration(format!("expected a number, got {v}"))))
        .collect()
}

/// `aliases`/`condition_aliases` columns store a json object mapping
/// alias name to reference string, in declaration order (a jsonb object
/// preserves insertion order as stored by Postgres' `jsonb_build_object`
/// at write time).
fn parse_alias_map(value: JsonValue) -> Result<Vec<(String, SourceRef)>, MemprocError> {
    let JsonValue::Object(map) = value else {
        return Err(MemprocError::Configuration("expected a json object of aliases".into()));
    };
    map.into_iter()
        .map(|(k, v)| match v {
            JsonValue::String(s) => Ok((k, parse_ref(s)?)),
            other => Err(MemprocError::Configuration(format!("expected a reference string, got {other}"))),
        })
        .collect()
}

pub async fn load_timeout_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<TimeoutBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, input_reference, output_reference, timeout_seconds
         FROM timeout_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let config = TimeoutConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                input_reference: parse_ref(row.try_get("input_reference")?)?,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                timeout_seconds: row.try_get("timeout_seconds")?,
            };
            Ok(TimeoutBlock::new(config, gateway.clone()))
        })
        .collect()
}

pub async fn load_totalizer_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<TotalizerBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, mode, input_reference, output_reference,
                decimal_places, reset_on_overflow, overflow_threshold, scheduled_reset_cron,
                manual_reset_enabled, accumulator, baseline_value, baseline_bool,
                last_sample_time, last_scheduled_reset
         FROM totalizer_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let mode = match row.try_get::<String, _>("mode")?.as_str() {
                "rate_integration" => TotalizerMode::RateIntegration,
                "event_count_rising" => TotalizerMode::EventCountRising,
                "event_count_falling" => TotalizerMode::EventCountFalling,
                "event_count_both" => TotalizerMode::EventCountBoth,
                other => return Err(MemprocError::Configuration(format!("unknown totalizer mode '{other}'"))),
            };
            let config = TotalizerConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                mode,
                input_reference: parse_ref(row.try_get("input_reference")?)?,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                decimal_places: row.try_get::<i32, _>("decimal_places")? as u32,
                reset_on_overflow: row.try_get("reset_on_overflow")?,
                overflow_threshold: row.try_get("overflow_threshold")?,
                scheduled_reset_cron: row.try_get("scheduled_reset_cron")?,
                manual_reset_enabled: row.try_get("manual_reset_enabled")?,
            };
            let state = TotalizerState {
                accumulator: row.try_get("accumulator")?,
                baseline_value: row.try_get("baseline_value")?,
                baseline_bool: row.try_get("baseline_bool")?,
                last_sample_time: row.try_get("last_sample_time")?,
                last_scheduled_reset: row.try_get("last_scheduled_reset")?,
            };
            TotalizerBlock::new(config, gateway.clone(), state)
        })
        .collect()
}

pub async fn load_formula_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
    cache: Arc<memproc_core::expression::ExpressionCache>,
) -> Result<Vec<FormulaBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, expression, aliases, decimal_places, output_reference
         FROM formula_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let config = FormulaConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                expression: row.try_get("expression")?,
                aliases: parse_alias_map(row.try_get("aliases")?)?,
                decimal_places: row.try_get::<i32, _>("decimal_places")? as u32,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
            };
            Ok(FormulaBlock::new(config, gateway.clone(), cache.clone()))
        })
        .collect()
}

pub async fn load_if_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
    cache: Arc<memproc_core::expression::ExpressionCache>,
) -> Result<Vec<IfBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, branches, default_value, output_kind,
                output_reference, condition_aliases
         FROM if_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let output_kind = match row.try_get::<String, _>("output_kind")?.as_str() {
                "digital_output" => IfOutputKind::DigitalOutput,
                "analog_output" => IfOutputKind::AnalogOutput,
                "global_variable_boolean" => IfOutputKind::GlobalVariableBoolean,
                "global_variable_analog" => IfOutputKind::GlobalVariableAnalog,
                other => return Err(MemprocError::Configuration(format!("unknown if-block output kind '{other}'"))),
            };
            let JsonValue::Array(raw_branches) = row.try_get::<JsonValue, _>("branches")? else {
                return Err(MemprocError::Configuration("if-block 'branches' must be a json array".into()));
            };
            let branches = raw_branches
                .into_iter()
                .map(|b| {
                    let obj = b.as_object().ok_or_else(|| MemprocError::Configuration("branch must be a json object".into()))?;
                    Ok(IfBranch {
                        condition: obj
                            .get("condition")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| MemprocError::Configuration("branch missing 'condition'".into()))?
                            .to_string(),
                        value: obj.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        hysteresis: obj.get("hysteresis").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    })
                })
                .collect::<Result<Vec<_>, MemprocError>>()?;
            let config = IfConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                branches,
                default_value: row.try_get("default_value")?,
                output_kind,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                condition_aliases: parse_alias_map(row.try_get("condition_aliases")?)?,
            };
            Ok(IfBlock::new(config, gateway.clone(), cache.clone()))
        })
        .collect()
}

pub async fn load_average_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<AverageBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, inputs, weights, ignore_stale, stale_timeout,
                minimum_inputs, outlier_detection, outlier_threshold, decimal_places, output_reference
         FROM average_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let outlier_detection = match row.try_get::<String, _>("outlier_detection")?.as_str() {
                "none" => OutlierDetection::None,
                "iqr" => OutlierDetection::Iqr,
                "z_score" => OutlierDetection::ZScore,
                "mad" => OutlierDetection::Mad,
                other => return Err(MemprocError::Configuration(format!("unknown outlier detection '{other}'"))),
            };
            let weights: Option<JsonValue> = row.try_get("weights")?;
            let config = AverageConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                inputs: parse_ref_array(row.try_get("inputs")?)?,
                weights: weights.map(parse_f64_array).transpose()?,
                ignore_stale: row.try_get("ignore_stale")?,
                stale_timeout: row.try_get("stale_timeout")?,
                minimum_inputs: row.try_get::<i32, _>("minimum_inputs")? as usize,
                outlier_detection,
                outlier_threshold: row.try_get("outlier_threshold")?,
                decimal_places: row.try_get::<i32, _>("decimal_places")? as u32,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
            };
            Ok(AverageBlock::new(config, gateway.clone()))
        })
        .collect()
}

pub async fn load_deadband_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<DeadbandBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, mode, deadband, deadband_percent, input_min,
                input_max, stability_time, input_reference, output_reference
         FROM deadband_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let mode = match row.try_get::<String, _>("mode")?.as_str() {
                "analog_absolute" => DeadbandMode::AnalogAbsolute {
                    deadband: row.try_get("deadband")?,
                },
                "analog_percentage" => DeadbandMode::AnalogPercentage {
                    deadband_percent: row.try_get("deadband_percent")?,
                    input_min: row.try_get("input_min")?,
                    input_max: row.try_get("input_max")?,
                },
                "digital" => DeadbandMode::Digital {
                    stability_time: row.try_get("stability_time")?,
                },
                other => return Err(MemprocError::Configuration(format!("unknown deadband mode '{other}'"))),
            };
            let config = DeadbandConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                mode,
                input_reference: parse_ref(row.try_get("input_reference")?)?,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
            };
            Ok(DeadbandBlock::new(config, gateway.clone()))
        })
        .collect()
}

pub async fn load_rate_of_change_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
    window: Arc<dyn WindowBuffer>,
) -> Result<Vec<RateOfChangeBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, input_reference, output_reference, window_size,
                computation, smoothing_alpha, alarm_output_reference, high_threshold, high_hysteresis,
                low_threshold, low_hysteresis
         FROM rate_of_change_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let computation = match row.try_get::<String, _>("computation")?.as_str() {
                "simple_two_point" => RateComputation::SimpleTwoPoint,
                "moving_average_of_differences" => RateComputation::MovingAverageOfDifferences,
                "linear_regression_slope" => RateComputation::LinearRegressionSlope,
                other => return Err(MemprocError::Configuration(format!("unknown rate computation '{other}'"))),
            };
            let config = RateOfChangeConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                input_reference: parse_ref(row.try_get("input_reference")?)?,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                window_size: row.try_get::<i32, _>("window_size")? as usize,
                computation,
                smoothing_alpha: row.try_get("smoothing_alpha")?,
                alarm_output_reference: parse_ref_opt(row.try_get("alarm_output_reference")?)?,
                high_threshold: row.try_get("high_threshold")?,
                high_hysteresis: row.try_get("high_hysteresis")?,
                low_threshold: row.try_get("low_threshold")?,
                low_hysteresis: row.try_get("low_hysteresis")?,
            };
            Ok(RateOfChangeBlock::new(config, gateway.clone(), window.clone()))
        })
        .collect()
}

pub async fn load_statistical_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
    window: Arc<dyn WindowBuffer>,
) -> Result<Vec<StatisticalBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, input_reference, window_size, window_kind, percentiles
         FROM statistical_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let window_kind = match row.try_get::<String, _>("window_kind")?.as_str() {
                "rolling" => WindowKind::Rolling,
                "tumbling" => WindowKind::Tumbling,
                other => return Err(MemprocError::Configuration(format!("unknown window kind '{other}'"))),
            };
            let config = StatisticalConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                input_reference: parse_ref(row.try_get("input_reference")?)?,
                window_size: row.try_get::<i32, _>("window_size")? as usize,
                window_kind,
                percentiles: parse_f64_array(row.try_get("percentiles")?)?,
            };
            Ok(StatisticalBlock::new(config, gateway.clone(), window.clone()))
        })
        .collect()
}

pub async fn load_write_action_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<WriteActionBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, source_kind, source_static_value, source_reference,
                output_reference, duration, max_execution_count, execution_count
         FROM write_action_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let source = match row.try_get::<String, _>("source_kind")?.as_str() {
                "static" => WriteActionSource::Static(row.try_get("source_static_value")?),
                "dynamic" => WriteActionSource::Dynamic(parse_ref(row.try_get("source_reference")?)?),
                other => return Err(MemprocError::Configuration(format!("unknown write-action source kind '{other}'"))),
            };
            let config = WriteActionConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                source,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                duration: row.try_get("duration")?,
                max_execution_count: row.try_get::<Option<i64>, _>("max_execution_count")?.map(|v| v as u64),
            };
            let execution_count = row.try_get::<i64, _>("execution_count")? as u64;
            Ok(WriteActionBlock::new(config, gateway.clone(), execution_count))
        })
        .collect()
}

pub async fn load_comparison_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<ComparisonBlock>, MemprocError> {
    let block_rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, outer_operator, invert_output, output_reference
         FROM comparison_blocks ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    let group_rows = sqlx::query(
        "SELECT block_id, inputs, mode, compare_type, threshold1, threshold2, threshold_hysteresis,
                required_votes, voting_hysteresis, digital_value
         FROM comparison_groups ORDER BY block_id, group_index",
    )
    .fetch_all(pool)
    .await?;

    let mut configs = Vec::with_capacity(block_rows.len());
    for row in block_rows {
        let id: Uuid = row.try_get("id")?;
        let outer_operator = match row.try_get::<String, _>("outer_operator")?.as_str() {
            "and" => OuterOperator::And,
            "or" => OuterOperator::Or,
            "xor" => OuterOperator::Xor,
            other => return Err(MemprocError::Configuration(format!("unknown outer operator '{other}'"))),
        };
        let mut groups = Vec::new();
        for group_row in &group_rows {
            let group_block_id: Uuid = group_row.try_get("block_id")?;
            if group_block_id != id {
                continue;
            }
            let mode = match group_row.try_get::<String, _>("mode")?.as_str() {
                "analog" => GroupMode::Analog,
                "digital" => GroupMode::Digital,
                other => return Err(MemprocError::Configuration(format!("unknown comparison group mode '{other}'"))),
            };
            let compare_type = match group_row.try_get::<String, _>("compare_type")?.as_str() {
                "higher" => AnalogCompareType::Higher,
                "lower" => AnalogCompareType::Lower,
                "equal" => AnalogCompareType::Equal,
                "not_equal" => AnalogCompareType::NotEqual,
                "between" => AnalogCompareType::Between,
                other => return Err(MemprocError::Configuration(format!("unknown compare type '{other}'"))),
            };
            groups.push(ComparisonGroup {
                inputs: parse_ref_array(group_row.try_get("inputs")?)?,
                mode,
                compare_type,
                threshold1: group_row.try_get("threshold1")?,
                threshold2: group_row.try_get("threshold2")?,
                threshold_hysteresis: group_row.try_get("threshold_hysteresis")?,
                required_votes: group_row.try_get::<i32, _>("required_votes")? as u32,
                voting_hysteresis: group_row.try_get::<i32, _>("voting_hysteresis")? as u32,
                digital_value: group_row.try_get("digital_value")?,
            });
        }
        let config = ComparisonConfig {
            id,
            is_disabled: row.try_get("is_disabled")?,
            interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
            groups,
            outer_operator,
            invert_output: row.try_get("invert_output")?,
            output_reference: parse_ref(row.try_get("output_reference")?)?,
        };
        configs.push(ComparisonBlock::new(config, gateway.clone()));
    }
    Ok(configs)
}

pub async fn load_minmax_blocks(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
) -> Result<Vec<MinMaxBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, inputs, kind, failover_mode, hold_duration,
                output_reference, selected_index_reference
         FROM minmax_blocks",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let kind = match row.try_get::<String, _>("kind")?.as_str() {
                "min" => SelectorKind::Min,
                "max" => SelectorKind::Max,
                other => return Err(MemprocError::Configuration(format!("unknown minmax kind '{other}'"))),
            };
            let failover_mode = match row.try_get::<String, _>("failover_mode")?.as_str() {
                "strict_selection" => FailoverMode::StrictSelection,
                "fallback_to_first_valid" => FailoverMode::FallbackToFirstValid,
                "use_last_valid" => FailoverMode::UseLastValid,
                other => return Err(MemprocError::Configuration(format!("unknown failover mode '{other}'"))),
            };
            let config = MinMaxConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                inputs: parse_ref_array(row.try_get("inputs")?)?,
                kind,
                failover_mode,
                hold_duration: row.try_get("hold_duration")?,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                selected_index_reference: parse_ref_opt(row.try_get("selected_index_reference")?)?,
            };
            Ok(MinMaxBlock::new(config, gateway.clone()))
        })
        .collect()
}

/// PID Auto-Tune sessions are request-scoped, not standing configuration:
/// a row only exists while an operator has an active or recently-finished
/// tuning run. Only non-terminal sessions are loaded so a restart resumes
/// in-flight tunes without re-running completed ones.
pub async fn load_pid_tuning_sessions(
    pool: &PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
    repository: Arc<dyn PidSessionRepository>,
) -> Result<Vec<PidAutoTuneBlock>, MemprocError> {
    let rows = sqlx::query(
        "SELECT id, is_disabled, interval_seconds, setpoint_reference, process_variable_reference,
                output_reference, relay_amplitude_percent, output_min, output_max, hysteresis,
                min_cycles, max_cycles, timeout_seconds, safety_amplitude_limit_percent,
                parent_cascade_active
         FROM pid_tuning_sessions
         WHERE status NOT IN ('completed', 'failed', 'aborted')",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let config = PidTuneConfig {
                id: row.try_get("id")?,
                is_disabled: row.try_get("is_disabled")?,
                interval_seconds: row.try_get::<i64, _>("interval_seconds")? as u64,
                setpoint_reference: parse_ref(row.try_get("setpoint_reference")?)?,
                process_variable_reference: parse_ref(row.try_get("process_variable_reference")?)?,
                output_reference: parse_ref(row.try_get("output_reference")?)?,
                relay_amplitude_percent: row.try_get("relay_amplitude_percent")?,
                output_min: row.try_get("output_min")?,
                output_max: row.try_get("output_max")?,
                hysteresis: row.try_get("hysteresis")?,
                min_cycles: row.try_get::<i32, _>("min_cycles")? as u32,
                max_cycles: row.try_get::<i32, _>("max_cycles")? as u32,
                timeout_seconds: row.try_get("timeout_seconds")?,
                safety_amplitude_limit_percent: row.try_get("safety_amplitude_limit_percent")?,
                parent_cascade_active: row.try_get("parent_cascade_active")?,
            };
            Ok(PidAutoTuneBlock::new(config, gateway.clone(), repository.clone()))
        })
        .collect()
}

/// Persists a PID tuning session's terminal outcome (spec.md §4.16).
pub struct SqlxPidSessionRepository {
    pool: PgPool,
}

impl SqlxPidSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PidSessionRepository for SqlxPidSessionRepository {
    async fn mark_completed(
        &self,
        session_id: Uuid,
        gains: &memproc_core::blocks::pid_autotune::PidGains,
    ) -> Result<(), MemprocError> {
        sqlx::query(
            "UPDATE pid_tuning_sessions
             SET status = 'completed', kp = $2, ki = $3, kd = $4, confidence = $5, completed_at = now()
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(gains.kp)
        .bind(gains.ki)
        .bind(gains.kd)
        .bind(gains.confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, session_id: Uuid, reason: &str) -> Result<(), MemprocError> {
        sqlx::query(
            "UPDATE pid_tuning_sessions SET status = 'failed', failure_reason = $2, completed_at = now()
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_aborted(&self, session_id: Uuid) -> Result<(), MemprocError> {
        sqlx::query("UPDATE pid_tuning_sessions SET status = 'aborted', completed_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
