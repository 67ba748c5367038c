//! Scenario file loading (C1): turns a scenario document — YAML or JSON, the
//! same untyped shape either way — into validated `Scenario` values.
//!
//! Parsing is two-pass. The document is first parsed into an untyped
//! `serde_json::Value` so keys can be looked up case-insensitively and
//! unknown keys merely logged rather than rejected; it is then projected
//! into the typed model in `scenario.rs`, threading a `ValidationContext`
//! field-path stack through so a failure names exactly which step and field
//! was wrong.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config_validation::ValidationContext;
use crate::load_profile::LoadProfile;
use crate::scenario::{ConfigValue, ExecutionMode, Scenario, ScenarioSettings, Step, StepType};
use crate::utils::parse_duration_or_seconds;

/// Errors raised while loading a scenario document. Scenario errors are
/// always raised at load time, never once a run is underway.
#[derive(Error, Debug)]
pub enum ScenarioLoadError {
    #[error("failed to read scenario file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("scenario document contains no scenarios")]
    Empty,

    #[error("scenario document: {0}")]
    Malformed(String),

    #[error("step '{step}' in scenario '{scenario}': {reason}")]
    InvalidStep {
        scenario: String,
        step: String,
        reason: String,
    },

    #[error("scenario '{scenario}': {reason}")]
    InvalidScenario { scenario: String, reason: String },
}

/// Loads a scenario document from disk. Returns every named scenario found;
/// a duplicate name within the document has the later definition win, with
/// a warning logged for the one it replaced.
pub fn load_file(path: &Path) -> Result<HashMap<String, Scenario>, ScenarioLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ScenarioLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_str(&contents)
}

/// Loads a scenario document from a string. YAML is a superset of JSON, so
/// both encodings are accepted through the same parser (§9's equivalent
/// encodings note).
pub fn load_str(contents: &str) -> Result<HashMap<String, Scenario>, ScenarioLoadError> {
    let raw: Value = serde_yaml::from_str(contents)?;
    let entries = extract_scenario_entries(&raw)?;
    let global_thresholds = extract_global_thresholds(&raw);

    let mut scenarios = HashMap::new();
    for entry in entries {
        let mut ctx = ValidationContext::new();
        let scenario = project_scenario(&entry, &global_thresholds, &mut ctx)?;
        if let Some(previous) = scenarios.insert(scenario.name.clone(), scenario) {
            warn!(
                scenario = %previous.name,
                "duplicate scenario name in document; later definition wins"
            );
        }
    }

    if scenarios.is_empty() {
        return Err(ScenarioLoadError::Empty);
    }
    Ok(scenarios)
}

/// Accepts three equivalent top-level shapes: `{"testScenarios": [...]}` (the
/// canonical wire key; `"scenarios"` is also accepted), a bare list of
/// scenario objects, or a single scenario object.
fn extract_scenario_entries(raw: &Value) -> Result<Vec<Value>, ScenarioLoadError> {
    match raw {
        Value::Object(map) => {
            if let Some(Value::Array(items)) = ci_get(map, "testScenarios").or_else(|| ci_get(map, "scenarios")) {
                Ok(items.clone())
            } else if map.contains_key("name") || map.contains_key("Name") {
                Ok(vec![raw.clone()])
            } else {
                Err(ScenarioLoadError::Malformed(
                    "expected a 'scenarios' array or a single scenario object".into(),
                ))
            }
        }
        Value::Array(items) => Ok(items.clone()),
        _ => Err(ScenarioLoadError::Malformed(
            "scenario document must be an object or array".into(),
        )),
    }
}

/// Fallback thresholds pulled from the document's top-level `globalSettings`
/// block, applied to any scenario whose own `settings` omit them.
#[derive(Debug, Clone, Copy, Default)]
struct GlobalThresholds {
    max_error_rate_percent: Option<f64>,
    expected_response_time_ms: Option<f64>,
}

/// `globalSettings.performanceThresholds` feeds the per-scenario fallback
/// defaults above. `defaultTimeout` and `defaultRetryCount` have no
/// operational hook in this engine: adapter timeouts are an ambient,
/// process-wide setting (`Config`, §6's `DEFAULT_HTTP_TIMEOUT`), and the
/// driver does not retry failed requests, so a retry count has nothing to
/// drive — both are logged and otherwise ignored, matching the "unknown
/// keys are ignored with a warning" rule for the fields that don't fit this
/// engine's model.
fn extract_global_thresholds(raw: &Value) -> GlobalThresholds {
    let Value::Object(map) = raw else {
        return GlobalThresholds::default();
    };
    let Some(Value::Object(global)) = ci_get(map, "globalSettings") else {
        return GlobalThresholds::default();
    };

    if ci_get(global, "defaultTimeout").is_some() || ci_get(global, "defaultRetryCount").is_some() {
        warn!(
            "globalSettings.defaultTimeout/defaultRetryCount are not applied by this engine; \
             use the process-wide DEFAULT_HTTP_TIMEOUT/DEFAULT_SQL_TIMEOUT settings instead"
        );
    }

    match ci_get(global, "performanceThresholds") {
        Some(Value::Object(thresholds)) => GlobalThresholds {
            max_error_rate_percent: ci_get(thresholds, "maxErrorRatePercent").and_then(Value::as_f64),
            expected_response_time_ms: ci_get(thresholds, "expectedResponseTimeMs").and_then(Value::as_f64),
        },
        _ => GlobalThresholds::default(),
    }
}

/// Case-insensitive key lookup — the wire format tolerates `camelCase`,
/// `PascalCase`, and `snake_case` interchangeably.
fn ci_get<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn ci_str<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    ci_get(map, key).and_then(Value::as_str)
}

fn json_to_config_value(v: &Value) -> ConfigValue {
    match v {
        Value::Null => ConfigValue::Null,
        Value::Bool(b) => ConfigValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ConfigValue::Integer(i)
            } else {
                ConfigValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => ConfigValue::String(s.clone()),
        Value::Array(items) => ConfigValue::List(items.iter().map(json_to_config_value).collect()),
        Value::Object(map) => ConfigValue::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_config_value(v)))
                .collect(),
        ),
    }
}

fn project_scenario(
    raw: &Value,
    global_thresholds: &GlobalThresholds,
    ctx: &mut ValidationContext,
) -> Result<Scenario, ScenarioLoadError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ScenarioLoadError::Malformed("scenario entry must be an object".into()))?;

    let name = ci_str(obj, "name")
        .ok_or_else(|| ScenarioLoadError::Malformed("scenario is missing required field 'name'".into()))?
        .to_string();
    ctx.enter(&name);

    let description = ci_str(obj, "description").map(str::to_string);

    let execution_mode = match ci_str(obj, "executionMode") {
        Some(raw_mode) => ExecutionMode::parse(raw_mode).ok_or_else(|| {
            ScenarioLoadError::InvalidScenario {
                scenario: name.clone(),
                reason: format!("unsupported executionMode '{}'", raw_mode),
            }
        })?,
        None => ExecutionMode::Sequential,
    };

    let steps_raw = ci_get(obj, "steps")
        .and_then(Value::as_array)
        .ok_or_else(|| ScenarioLoadError::InvalidScenario {
            scenario: name.clone(),
            reason: "scenario is missing required field 'steps'".into(),
        })?;

    let mut steps = Vec::with_capacity(steps_raw.len());
    for (idx, step_raw) in steps_raw.iter().enumerate() {
        ctx.enter(&format!("steps[{}]", idx));
        let step = project_step(step_raw, &name, ctx)?;
        ctx.exit();
        steps.push(step);
    }

    let load_profile = match ci_get(obj, "loadSimulation").or_else(|| ci_get(obj, "loadProfile")) {
        Some(profile_raw) => project_load_profile(profile_raw, &name)?,
        None => {
            return Err(ScenarioLoadError::InvalidScenario {
                scenario: name.clone(),
                reason: "scenario is missing required field 'loadSimulation'".into(),
            })
        }
    };

    let settings = project_settings(obj, global_thresholds);

    ctx.exit();

    let scenario = Scenario {
        name: name.clone(),
        description,
        steps,
        execution_mode,
        load_profile,
        settings,
    };

    scenario
        .validate()
        .map_err(|reason| ScenarioLoadError::InvalidScenario { scenario: name, reason })?;

    Ok(scenario)
}

fn project_settings(obj: &serde_json::Map<String, Value>, global_thresholds: &GlobalThresholds) -> ScenarioSettings {
    let defaults = ScenarioSettings::default();
    ScenarioSettings {
        duration_secs: ci_get(obj, "durationSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(defaults.duration_secs),
        ramp_up_secs: ci_get(obj, "rampUpSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(defaults.ramp_up_secs),
        concurrent_users: ci_get(obj, "concurrentUsers")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(defaults.concurrent_users),
        max_error_rate_percent: ci_get(obj, "maxErrorRatePercent")
            .and_then(Value::as_f64)
            .or(global_thresholds.max_error_rate_percent)
            .unwrap_or(defaults.max_error_rate_percent),
        expected_response_time_ms: ci_get(obj, "expectedResponseTimeMs")
            .and_then(Value::as_f64)
            .or(global_thresholds.expected_response_time_ms)
            .unwrap_or(defaults.expected_response_time_ms),
    }
}

fn project_step(
    raw: &Value,
    scenario_name: &str,
    ctx: &mut ValidationContext,
) -> Result<Step, ScenarioLoadError> {
    let obj = raw.as_object().ok_or_else(|| ScenarioLoadError::InvalidStep {
        scenario: scenario_name.to_string(),
        step: ctx.current_path(),
        reason: "step entry must be an object".into(),
    })?;

    let name = ci_str(obj, "name")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.current_path());

    let type_raw = ci_str(obj, "type").ok_or_else(|| ScenarioLoadError::InvalidStep {
        scenario: scenario_name.to_string(),
        step: name.clone(),
        reason: "step is missing required field 'type'".into(),
    })?;
    let step_type = StepType::parse(type_raw).ok_or_else(|| ScenarioLoadError::InvalidStep {
        scenario: scenario_name.to_string(),
        step: name.clone(),
        reason: format!("unsupported step type '{}'", type_raw),
    })?;

    let configuration: HashMap<String, ConfigValue> = match ci_get(obj, "configuration") {
        Some(Value::Object(cfg)) => cfg
            .iter()
            .map(|(k, v)| (k.clone(), json_to_config_value(v)))
            .collect(),
        Some(_) => {
            return Err(ScenarioLoadError::InvalidStep {
                scenario: scenario_name.to_string(),
                step: name,
                reason: "'configuration' must be a mapping".into(),
            })
        }
        None => HashMap::new(),
    };

    let weight = ci_get(obj, "weight")
        .and_then(Value::as_u64)
        .map(|w| w as u32)
        .unwrap_or(1);
    let enabled = ci_get(obj, "enabled").and_then(Value::as_bool).unwrap_or(true);
    let combined_with_previous = ci_get(obj, "combinedWithPrevious")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let step = Step {
        name: name.clone(),
        step_type,
        configuration,
        weight,
        enabled,
        combined_with_previous,
    };

    if step.enabled {
        step.validate().map_err(|reason| ScenarioLoadError::InvalidStep {
            scenario: scenario_name.to_string(),
            step: name,
            reason,
        })?;
    }

    Ok(step)
}

fn duration_field(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    scenario_name: &str,
) -> Result<std::time::Duration, ScenarioLoadError> {
    match ci_get(obj, key) {
        Some(Value::Number(n)) => Ok(std::time::Duration::from_secs(n.as_u64().unwrap_or(0))),
        Some(Value::String(s)) => parse_duration_or_seconds(s).map_err(|reason| {
            ScenarioLoadError::InvalidScenario {
                scenario: scenario_name.to_string(),
                reason: format!("field '{}': {}", key, reason),
            }
        }),
        Some(_) => Err(ScenarioLoadError::InvalidScenario {
            scenario: scenario_name.to_string(),
            reason: format!("field '{}' must be a number or duration string", key),
        }),
        None => Ok(std::time::Duration::ZERO),
    }
}

fn project_load_profile(raw: &Value, scenario_name: &str) -> Result<LoadProfile, ScenarioLoadError> {
    let obj = raw.as_object().ok_or_else(|| ScenarioLoadError::InvalidScenario {
        scenario: scenario_name.to_string(),
        reason: "'loadSimulation' must be an object".into(),
    })?;

    let type_raw = ci_str(obj, "type").ok_or_else(|| ScenarioLoadError::InvalidScenario {
        scenario: scenario_name.to_string(),
        reason: "'loadSimulation' is missing required field 'type'".into(),
    })?;
    let type_name = LoadProfile::type_name(type_raw).ok_or_else(|| ScenarioLoadError::InvalidScenario {
        scenario: scenario_name.to_string(),
        reason: format!("unsupported load profile type '{}'", type_raw),
    })?;

    let duration = duration_field(obj, "durationSeconds", scenario_name)?;
    let ramp_up = duration_field(obj, "rampUpSeconds", scenario_name)?;

    let f64_field = |key: &str, default: f64| ci_get(obj, key).and_then(Value::as_f64).unwrap_or(default);
    let usize_field = |key: &str, default: usize| {
        ci_get(obj, key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    };

    let profile = match type_name {
        "ConstantRate" => LoadProfile::ConstantRate {
            rps: f64_field("rps", 1.0),
            duration,
            ramp_up,
        },
        "RampUp" => LoadProfile::RampUp {
            start_rps: f64_field("startRps", 0.0),
            end_rps: f64_field("endRps", 1.0),
            duration,
        },
        "Spike" => LoadProfile::Spike {
            base_rps: f64_field("baseRps", 1.0),
            spike_rps: f64_field("spikeRps", 1.0),
            spike_duration: duration_field(obj, "spikeDurationSeconds", scenario_name)?,
            duration,
        },
        "Stress" => LoadProfile::Stress {
            max_concurrency: usize_field("maxConcurrency", 1),
            duration,
        },
        "Soak" => LoadProfile::Soak {
            rps: f64_field("rps", 1.0),
            duration,
        },
        other => {
            return Err(ScenarioLoadError::InvalidScenario {
                scenario: scenario_name.to_string(),
                reason: format!("unrecognized canonical load profile name '{}'", other),
            })
        }
    };

    profile
        .validate()
        .map_err(|reason| ScenarioLoadError::InvalidScenario {
            scenario: scenario_name.to_string(),
            reason,
        })?;

    Ok(profile)
}
