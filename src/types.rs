use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in graph space (the strategy's own coordinate system, independent
/// of any viewport transform).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphPoint {
    pub x: f32,
    pub y: f32,
}

impl GraphPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A point in screen space (pixels, as delivered by pointer events).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A scalar block parameter. The storage layer enforces no schema; blocks
/// self-describe their parameter shapes and invalid combinations surface at
/// execution time through run failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Flag(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

/// Open string-keyed parameter map. A `BTreeMap` keeps re-serialization
/// deterministic.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Listing entry for a stored strategy graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_demo: bool,
}

/// Payload for creating a new stored graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGraph {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: serde_json::Value,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Partial update for a stored graph. `None` fields are left untouched by
/// the backend; a typical auto-save only carries `nodes` and `outputs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Execution configuration for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            timeframe: "1d".to_string(),
            start_date: "2020-01-01".to_string(),
            end_date: "2024-01-01".to_string(),
            initial_capital: 100_000.0,
            seed: None,
            priority: None,
            max_workers: None,
        }
    }
}

/// Payload for submitting a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub graph_id: String,
    pub config: RunConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable metrics snapshot owned by a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_return: f64,
    pub trade_count: u32,
    pub win_rate: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

/// Snapshot of a backtest run as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub graph_id: String,
    pub status: RunStatus,
    /// Percentage in [0, 100], monotonically non-decreasing while running.
    pub progress: f64,
    pub config: RunConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RunMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
