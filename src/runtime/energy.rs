/// Forecast and optimization service payloads
///
/// Builds the JSON request bodies for the forecast (`POST /forecast`) and
/// optimization (`POST /optimize`) services from typed task configuration,
/// and extracts the job identity from their responses.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::workflow::task_config::{ForecastConfig, OptimizationConfig};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForecastRequest {
    pub series_id: String,
    pub horizon: u32,
    pub model: String,
    pub granularity: String,
}

impl From<&ForecastConfig> for ForecastRequest {
    fn from(cfg: &ForecastConfig) -> Self {
        Self {
            series_id: cfg.series_id.clone(),
            horizon: cfg.horizon,
            model: cfg.model.clone(),
            granularity: cfg.granularity.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub forecast_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OptimizationRequest {
    pub optimization_type: String,
    pub objective: String,
    pub start_time: String,
    pub end_time: String,
    pub time_step_minutes: u32,
    pub assets: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_prices: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_prices: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_forecast: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar_forecast: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_forecast: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
}

impl OptimizationRequest {
    /// Build the request, anchoring an absent window at `now`
    ///
    /// A `battery_dispatch` run with no assets falls back to `demo_assets`.
    /// Fails when the horizon pushes the window end past the calendar range.
    pub fn build(cfg: &OptimizationConfig, now: DateTime<Utc>) -> Result<Self, String> {
        let start_time = cfg.start_time.clone().unwrap_or_else(|| iso(now));
        let end_time = match &cfg.end_time {
            Some(end_time) => end_time.clone(),
            None => ChronoDuration::try_hours(i64::from(cfg.horizon_hours))
                .and_then(|horizon| now.checked_add_signed(horizon))
                .map(iso)
                .ok_or_else(|| format!("horizon of {} hours is out of range", cfg.horizon_hours))?,
        };

        let assets = if cfg.assets.is_empty() && cfg.optimization_type == "battery_dispatch" {
            tracing::debug!("🔋 No assets configured, using demo battery and solar assets");
            demo_assets()
        } else {
            cfg.assets.clone()
        };

        Ok(Self {
            optimization_type: cfg.optimization_type.clone(),
            objective: cfg.objective.clone(),
            start_time,
            end_time,
            time_step_minutes: cfg.time_step_minutes,
            assets,
            import_prices: cfg.import_prices.clone(),
            export_prices: cfg.export_prices.clone(),
            load_forecast: cfg.load_forecast.clone(),
            solar_forecast: cfg.solar_forecast.clone(),
            wind_forecast: cfg.wind_forecast.clone(),
            constraints: cfg.constraints.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationResponse {
    pub optimization_id: String,
    pub status: String,
}

/// Demo site used when a battery dispatch request carries no assets
///
/// - Battery: 100 kWh capacity, 50 kW charge/discharge, 95% round-trip
///   efficiency, state of charge held between 10% and 90%, starting at 50%.
/// - Solar: 40 kWp array.
pub fn demo_assets() -> Vec<Value> {
    vec![
        json!({
            "asset_id": "demo-battery-1",
            "asset_type": "battery",
            "name": "Demo Battery",
            "capacity_kwh": 100.0,
            "max_charge_kw": 50.0,
            "max_discharge_kw": 50.0,
            "round_trip_efficiency": 0.95,
            "min_soc": 0.1,
            "max_soc": 0.9,
            "initial_soc": 0.5
        }),
        json!({
            "asset_id": "demo-solar-1",
            "asset_type": "solar",
            "name": "Demo Solar Array",
            "capacity_kw": 40.0
        }),
    ]
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
