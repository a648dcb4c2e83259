use async_trait::async_trait;

use crate::error::StrategyError;
use crate::graph::StrategyGraph;
use crate::types::{GraphSummary, GraphUpdate, NewGraph, NewRun, Run};

pub mod http;
pub mod scripted;

/// Contract with the backtest backend. Templates are compiled into the
/// client and never appear behind this trait; every graph the service knows
/// about is a user graph.
#[async_trait]
pub trait BacktestService: Send + Sync {
    async fn list_graphs(&self) -> Result<Vec<GraphSummary>, StrategyError>;

    async fn create_graph(&self, graph: NewGraph) -> Result<StrategyGraph, StrategyError>;

    /// Full graph including its node list.
    async fn get_graph(&self, id: &str) -> Result<StrategyGraph, StrategyError>;

    /// Partial update; the backend bumps the version on every accepted
    /// write and returns the full updated graph.
    async fn update_graph(
        &self,
        id: &str,
        update: GraphUpdate,
    ) -> Result<StrategyGraph, StrategyError>;

    async fn delete_graph(&self, id: &str) -> Result<(), StrategyError>;

    async fn create_run(&self, run: NewRun) -> Result<Run, StrategyError>;

    async fn get_run(&self, id: &str) -> Result<Run, StrategyError>;

    /// Free-text notes, editable at any point in the run's lifecycle
    /// without affecting its status.
    async fn patch_run_notes(&self, id: &str, notes: &str) -> Result<Run, StrategyError>;

    /// Run summaries, newest first.
    async fn list_runs(&self, limit: Option<usize>) -> Result<Vec<Run>, StrategyError>;

    fn name(&self) -> &'static str;
}
