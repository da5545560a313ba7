/// Typed task configuration
///
/// Task configuration arrives as a loose key/value map. It is parsed once per
/// task into a `TaskConfig` variant keyed by task type, so the runner never
/// performs scattered stringly-typed lookups.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::workflow::types::{TaskType, WorkflowTask};

/// Strongly typed configuration, one variant per task type
#[derive(Debug, Clone, PartialEq)]
pub enum TaskConfig {
    HttpCall(HttpCallConfig),
    Delay(DelayConfig),
    Condition(ConditionConfig),
    Transform(TransformConfig),
    Notification(NotificationConfig),
    Forecast(ForecastConfig),
    Optimization(OptimizationConfig),
}

/// Expected config: { "url": "https://...", "method": "POST", "headers": {...}, "body": ... }
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCallConfig {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Expected config: { "duration": "30s" }
#[derive(Debug, Clone, PartialEq)]
pub struct DelayConfig {
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionConfig {
    /// Kept for display only; no expression language is evaluated
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    /// Remaining open-ended settings
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub channel: String,
    pub message: String,
    pub recipients: Vec<String>,
}

/// Request for POST /forecast
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub series_id: String,
    pub horizon: u32,
    pub model: String,
    pub granularity: String,
}

/// Request for POST /optimize; absent window bounds are filled at run time
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConfig {
    pub optimization_type: String,
    pub objective: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub horizon_hours: u32,
    pub time_step_minutes: u32,
    pub assets: Vec<Value>,
    pub import_prices: Option<Value>,
    pub export_prices: Option<Value>,
    pub load_forecast: Option<Value>,
    pub solar_forecast: Option<Value>,
    pub wind_forecast: Option<Value>,
    pub constraints: Option<Value>,
}

impl TaskConfig {
    /// Parse the loose config map of `task` into its typed form
    ///
    /// Returns a human-readable message when a required key is missing or
    /// has the wrong shape.
    pub fn parse(task: &WorkflowTask) -> Result<Self, String> {
        let cfg = &task.config;
        match task.task_type {
            TaskType::HttpCall => {
                let url = required_str(cfg, "url").ok_or_else(|| {
                    format!("task '{}' (HttpCall) requires a 'url' configuration key", task.id)
                })?;
                let method = optional_str(cfg, "method").unwrap_or("GET").to_uppercase();
                let headers = cfg
                    .get("headers")
                    .and_then(|h| h.as_object())
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| header_value(v).map(|v| (k.clone(), v)))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Self::HttpCall(HttpCallConfig {
                    url: url.to_string(),
                    method,
                    headers,
                    body: cfg.get("body").filter(|b| !b.is_null()).cloned(),
                }))
            }
            TaskType::Delay => {
                let raw = cfg.get("duration").filter(|v| !v.is_null()).ok_or_else(|| {
                    format!("task '{}' (Delay) requires a 'duration' configuration key", task.id)
                })?;
                let duration = parse_duration(raw).map_err(|e| {
                    format!("task '{}' (Delay) has an invalid duration: {}", task.id, e)
                })?;
                Ok(Self::Delay(DelayConfig { duration }))
            }
            TaskType::Condition => Ok(Self::Condition(ConditionConfig {
                expression: optional_str(cfg, "expression").map(str::to_string),
            })),
            TaskType::Transform => Ok(Self::Transform(TransformConfig { options: cfg.clone() })),
            TaskType::Notification => Ok(Self::Notification(NotificationConfig {
                channel: optional_str(cfg, "channel").unwrap_or("log").to_string(),
                message: optional_str(cfg, "message")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Task '{}' reached", task.name)),
                recipients: string_list(cfg.get("recipients")),
            })),
            TaskType::Forecast => Ok(Self::Forecast(ForecastConfig {
                series_id: optional_str(cfg, "series_id").unwrap_or("default").to_string(),
                horizon: optional_u32(cfg, "horizon").unwrap_or(24),
                model: optional_str(cfg, "model").unwrap_or("auto").to_string(),
                granularity: optional_str(cfg, "granularity").unwrap_or("hourly").to_string(),
            })),
            TaskType::Optimization => Ok(Self::Optimization(OptimizationConfig {
                optimization_type: optional_str(cfg, "optimization_type")
                    .unwrap_or("battery_dispatch")
                    .to_string(),
                objective: optional_str(cfg, "objective").unwrap_or("minimize_cost").to_string(),
                start_time: optional_str(cfg, "start_time").map(str::to_string),
                end_time: optional_str(cfg, "end_time").map(str::to_string),
                horizon_hours: optional_u32(cfg, "horizon_hours").unwrap_or(24),
                time_step_minutes: optional_u32(cfg, "time_step_minutes").unwrap_or(60),
                assets: cfg
                    .get("assets")
                    .and_then(|a| a.as_array())
                    .cloned()
                    .unwrap_or_default(),
                import_prices: non_null(cfg, "import_prices"),
                export_prices: non_null(cfg, "export_prices"),
                load_forecast: non_null(cfg, "load_forecast"),
                solar_forecast: non_null(cfg, "solar_forecast"),
                wind_forecast: non_null(cfg, "wind_forecast"),
                constraints: non_null(cfg, "constraints"),
            })),
        }
    }
}

/// Parse a duration given as seconds (number), "500ms" / "2s" / "5m" / "1h",
/// or "HH:MM:SS"
pub fn parse_duration(value: &Value) -> Result<Duration, String> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64().ok_or_else(|| format!("'{n}' is not a number of seconds"))?;
            if secs < 0.0 || !secs.is_finite() {
                return Err(format!("'{n}' must be a non-negative number of seconds"));
            }
            seconds_to_duration(secs, &n.to_string())
        }
        Value::String(s) => parse_duration_str(s),
        other => Err(format!("'{other}' is not a duration")),
    }
}

fn parse_duration_str(raw: &str) -> Result<Duration, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("duration is empty".to_string());
    }

    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(format!("'{raw}' is not in HH:MM:SS form"));
        }
        let hours: u64 = parts[0].parse().map_err(|_| format!("bad hours in '{raw}'"))?;
        let minutes: u64 = parts[1].parse().map_err(|_| format!("bad minutes in '{raw}'"))?;
        let seconds: f64 = parts[2].parse().map_err(|_| format!("bad seconds in '{raw}'"))?;
        if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
            return Err(format!("'{raw}' is out of range"));
        }
        let whole = hours
            .checked_mul(3600)
            .and_then(|secs| secs.checked_add(minutes * 60))
            .ok_or_else(|| format!("'{raw}' is too large"))?;
        return Duration::from_secs(whole)
            .checked_add(Duration::from_secs_f64(seconds))
            .ok_or_else(|| format!("'{raw}' is too large"));
    }

    let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, "s"),
    };
    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' does not start with a number"))?;
    if amount < 0.0 || !amount.is_finite() {
        return Err(format!("'{raw}' must be non-negative"));
    }
    let secs = match unit {
        "ms" => amount / 1000.0,
        "s" | "sec" | "secs" => amount,
        "m" | "min" | "mins" => amount * 60.0,
        "h" | "hr" | "hrs" => amount * 3600.0,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    seconds_to_duration(secs, raw)
}

fn seconds_to_duration(secs: f64, raw: &str) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{raw}' is not a usable duration: {e}"))
}

fn required_str<'a>(cfg: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    optional_str(cfg, key).filter(|s| !s.trim().is_empty())
}

fn optional_str<'a>(cfg: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    cfg.get(key).and_then(|v| v.as_str())
}

fn optional_u32(cfg: &HashMap<String, Value>, key: &str) -> Option<u32> {
    cfg.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .and_then(|n| u32::try_from(n).ok())
}

fn non_null(cfg: &HashMap<String, Value>, key: &str) -> Option<Value> {
    cfg.get(key).filter(|v| !v.is_null()).cloned()
}

fn header_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => {
            items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
