pub mod canvas;
pub mod error;
pub mod graph;
pub mod navigator;
pub mod params;
pub mod persist;
pub mod registry;
pub mod runs;
pub mod service;
pub mod types;
pub mod workbench;

pub use canvas::{
    CanvasController, CanvasEvent, Interaction, Viewport, MAX_SCALE, MIN_SCALE, NODE_HEIGHT,
    NODE_WIDTH,
};
pub use error::{CorrelationCode, StrategyError};
pub use graph::{ConnectOutcome, Node, StrategyGraph, TEMPLATE_ID_PREFIX, USER_CREATED_TAG};
pub use navigator::Navigator;
pub use params::{IndicatorParams, Params, StopLossParams, ThresholdParams};
pub use persist::{PersistenceController, SaveOutcome, DEBOUNCE_DELAY};
pub use registry::{BlockCategory, BlockType};
pub use runs::{
    classify_failure, FailureCategory, RunEvent, RunOrchestrator, Submission, OBSERVATION_WINDOW,
    POLL_INTERVAL,
};
pub use service::http::{BackendConfig, HttpBacktestService};
pub use service::scripted::{ScriptedBacktestService, ScriptedStep};
pub use service::BacktestService;
pub use workbench::Workbench;
pub use types::{
    GraphPoint, GraphSummary, GraphUpdate, NewGraph, NewRun, ParamMap, ParamValue, Run, RunConfig,
    RunMetrics, RunStatus, ScreenPoint,
};
