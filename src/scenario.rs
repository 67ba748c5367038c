//! The scenario data model: the validated, in-memory shape a loaded scenario
//! file (see `loader.rs`) is projected into. Tagged variants are used
//! throughout in place of inheritance, per the source's design notes.

use std::collections::HashMap;
use std::time::Duration;

use crate::config_validation::{HttpMethodValidator, RangeValidator, UrlValidator};
use crate::load_profile::LoadProfile;

/// How workers distribute their attention across a scenario's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Each worker is pinned to one step; all steps progress concurrently.
    Parallel,
    /// A worker walks the step list in order, restarting at step 0.
    Sequential,
    /// Steps are bucketed by type; buckets run in sequence, Parallel within.
    Grouped,
    /// A worker draws a step per iteration with probability proportional to weight.
    Weighted,
}

impl ExecutionMode {
    /// Tolerant, case-insensitive parse accepting the synonyms used on the wire.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parallel" => Some(Self::Parallel),
            "sequential" => Some(Self::Sequential),
            "grouped" => Some(Self::Grouped),
            "weighted" => Some(Self::Weighted),
            _ => None,
        }
    }
}

/// HTTP methods a HttpApi step may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

/// The kind of work a step performs. Unknown step types fail at load time
/// with `InvalidSpec`, never at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    HttpApi,
    SqlProcedure,
    SqlQuery,
    Wait,
    DatabaseConnection,
    CustomScript,
    FileOperation,
}

impl StepType {
    /// Tolerant parse, accepting the synonyms enumerated in the loader's design note.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "httpapi" | "http" | "api" => Some(Self::HttpApi),
            "sqlprocedure" | "sqlproc" => Some(Self::SqlProcedure),
            "sqlquery" | "sql" => Some(Self::SqlQuery),
            "wait" | "delay" | "sleep" => Some(Self::Wait),
            "databaseconnection" | "dbconnection" | "dbconnect" => Some(Self::DatabaseConnection),
            "customscript" | "script" => Some(Self::CustomScript),
            "fileoperation" | "file" => Some(Self::FileOperation),
            _ => None,
        }
    }
}

/// A free-form configuration value — the wire shape before step-type
/// projection. `Step::configuration` below is the validated, per-key typed
/// view steps are actually executed from; the source's design notes
/// discourage keeping the raw mapping around once validation has run, so
/// accessors here always return a concrete type, never the mapping itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Mapping(HashMap<String, ConfigValue>),
    List(Vec<ConfigValue>),
    Null,
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            ConfigValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&HashMap<String, ConfigValue>> {
        match self {
            ConfigValue::Mapping(m) => Some(m),
            _ => None,
        }
    }
}

/// A single unit of work within a scenario.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub step_type: StepType,
    pub configuration: HashMap<String, ConfigValue>,
    pub weight: u32,
    pub enabled: bool,
    pub combined_with_previous: bool,
}

impl Step {
    fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(ConfigValue::as_str)
    }

    /// HttpApi convenience accessor: the parsed method, if this is an HttpApi step.
    pub fn http_method(&self) -> Option<HttpMethod> {
        self.config_str("method").and_then(HttpMethod::parse)
    }

    /// HttpApi convenience accessor: the target URL.
    pub fn url(&self) -> Option<&str> {
        self.config_str("url")
    }

    pub fn connection_string(&self) -> Option<&str> {
        self.config_str("connectionString")
    }

    pub fn procedure_name(&self) -> Option<&str> {
        self.config_str("procedureName")
    }

    pub fn query(&self) -> Option<&str> {
        self.config_str("query")
    }

    /// Wait-step duration in milliseconds, plus optional +/- jitter.
    pub fn wait_duration_ms(&self) -> Option<i64> {
        self.configuration.get("durationMs").and_then(ConfigValue::as_i64)
    }

    pub fn wait_jitter_ms(&self) -> i64 {
        self.configuration
            .get("randomVariationMs")
            .and_then(ConfigValue::as_i64)
            .unwrap_or(0)
    }

    /// Validates this step's per-type invariants (§3). Called by the loader
    /// after projection; a violation becomes `InvalidSpec(step, reason)`.
    pub fn validate(&self) -> Result<(), String> {
        match self.step_type {
            StepType::HttpApi => {
                let method = self
                    .config_str("method")
                    .ok_or_else(|| "HttpApi step requires configuration.method".to_string())?;
                HttpMethodValidator::validate(method).map_err(|e| e.to_string())?;
                if HttpMethod::parse(method).is_none() {
                    return Err(format!("HttpApi step has unsupported method '{}'", method));
                }
                let url = self
                    .config_str("url")
                    .ok_or_else(|| "HttpApi step requires configuration.url".to_string())?;
                UrlValidator::validate(url).map_err(|e| e.to_string())?;
            }
            StepType::SqlProcedure => {
                if self.connection_string().is_none() {
                    return Err("SqlProcedure step requires configuration.connectionString".into());
                }
                if self.procedure_name().is_none() {
                    return Err("SqlProcedure step requires configuration.procedureName".into());
                }
            }
            StepType::SqlQuery => {
                if self.connection_string().is_none() {
                    return Err("SqlQuery step requires configuration.connectionString".into());
                }
                if self.query().is_none() {
                    return Err("SqlQuery step requires configuration.query".into());
                }
            }
            StepType::Wait => match self.wait_duration_ms() {
                Some(ms) if ms >= 0 => {}
                Some(ms) => return Err(format!("Wait step durationMs must be non-negative, got {}", ms)),
                None => return Err("Wait step requires configuration.durationMs".into()),
            },
            StepType::DatabaseConnection | StepType::CustomScript | StepType::FileOperation => {}
        }
        RangeValidator::validate_positive_u64(self.weight as u64, "weight").map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Scenario-wide tunables that feed the status/impact rules (§4.5.1).
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub duration_secs: u64,
    pub ramp_up_secs: u64,
    pub concurrent_users: usize,
    pub max_error_rate_percent: f64,
    pub expected_response_time_ms: f64,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            ramp_up_secs: 0,
            concurrent_users: 10,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 500.0,
        }
    }
}

/// A named, validated workload description.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Step>,
    pub execution_mode: ExecutionMode,
    pub load_profile: LoadProfile,
    pub settings: ScenarioSettings,
}

impl Scenario {
    /// Runs the §3 invariants. The loader calls this after projection;
    /// callers constructing a `Scenario` directly (tests, programmatic use)
    /// should call it too before handing the value to the orchestrator.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("scenario '{}' has no steps", self.name));
        }
        for step in &self.steps {
            if step.enabled {
                step.validate()
                    .map_err(|reason| format!("step '{}': {}", step.name, reason))?;
            }
        }
        if self.execution_mode == ExecutionMode::Weighted {
            let total_weight: u64 = self
                .steps
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.weight as u64)
                .sum();
            if total_weight == 0 {
                return Err(format!(
                    "scenario '{}' uses Weighted mode but total step weight is 0",
                    self.name
                ));
            }
        }
        self.load_profile
            .validate()
            .map_err(|reason| format!("scenario '{}': {}", self.name, reason))?;
        Ok(())
    }

    pub fn enabled_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.enabled)
    }

    /// Scenario-relative duration, independent of the load profile's own
    /// notion of duration (the two are reconciled by the orchestrator, §4.5).
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.settings.duration_secs)
    }

    pub fn ramp_up(&self) -> Duration {
        Duration::from_secs(self.settings.ramp_up_secs)
    }
}
