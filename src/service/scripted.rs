use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StrategyError;
use crate::graph::{Node, StrategyGraph};
use crate::service::BacktestService;
use crate::types::{
    GraphSummary, GraphUpdate, NewGraph, NewRun, Run, RunMetrics, RunStatus,
};

/// One snapshot a scripted run reports on its next poll.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub status: RunStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub metrics: Option<RunMetrics>,
}

impl ScriptedStep {
    pub fn running(progress: f64) -> Self {
        Self {
            status: RunStatus::Running,
            progress,
            error: None,
            metrics: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            progress: 100.0,
            error: None,
            metrics: Some(RunMetrics {
                total_return: 0.185,
                trade_count: 42,
                win_rate: 0.57,
                sharpe: 1.31,
                max_drawdown: 0.094,
            }),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            progress: 0.0,
            error: Some(message.into()),
            metrics: None,
        }
    }
}

#[derive(Default)]
struct ScriptedState {
    graphs: HashMap<String, StrategyGraph>,
    graph_order: Vec<String>,
    runs: HashMap<String, Run>,
    run_order: Vec<String>,
    scripts: HashMap<String, VecDeque<ScriptedStep>>,
    pending_scripts: VecDeque<Vec<ScriptedStep>>,
    poll_counts: HashMap<String, usize>,
    fail_updates: usize,
    fail_polls: usize,
    next_graph: u64,
    next_run: u64,
}

/// In-memory stand-in for the backtest backend. Runs advance through a
/// scripted sequence of snapshots, one per poll; tests can inject write and
/// poll failures and inspect how often each run was polled.
#[derive(Default)]
pub struct ScriptedBacktestService {
    state: Mutex<ScriptedState>,
}

impl ScriptedBacktestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status sequence the next created run will walk through.
    /// Without a script, runs report running at 50% once and then complete.
    pub fn script_next_run(&self, steps: Vec<ScriptedStep>) {
        self.state
            .lock()
            .expect("scripted state poisoned")
            .pending_scripts
            .push_back(steps);
    }

    /// Make the next `update_graph` call fail, as a flaky backend would.
    pub fn fail_next_update(&self) {
        self.state.lock().expect("scripted state poisoned").fail_updates += 1;
    }

    /// Make the next `get_run` call fail with a transient error.
    pub fn fail_next_poll(&self) {
        self.state.lock().expect("scripted state poisoned").fail_polls += 1;
    }

    /// How many times `get_run` has been called for this run id.
    pub fn poll_count(&self, run_id: &str) -> usize {
        self.state
            .lock()
            .expect("scripted state poisoned")
            .poll_counts
            .get(run_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn stored_graph(&self, id: &str) -> Option<StrategyGraph> {
        self.state
            .lock()
            .expect("scripted state poisoned")
            .graphs
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl BacktestService for ScriptedBacktestService {
    async fn list_graphs(&self) -> Result<Vec<GraphSummary>, StrategyError> {
        let state = self.state.lock().expect("scripted state poisoned");
        Ok(state
            .graph_order
            .iter()
            .filter_map(|id| state.graphs.get(id))
            .map(|graph| GraphSummary {
                id: graph.id.clone(),
                name: graph.name.clone(),
                description: graph.description.clone(),
                version: graph.version,
                tags: graph.tags.clone(),
                is_demo: false,
            })
            .collect())
    }

    async fn create_graph(&self, graph: NewGraph) -> Result<StrategyGraph, StrategyError> {
        let nodes: Vec<Node> = serde_json::from_value(graph.nodes)?;
        let mut state = self.state.lock().expect("scripted state poisoned");
        state.next_graph += 1;
        let id = format!("g{}", state.next_graph);

        let mut stored = StrategyGraph::new(id.clone(), graph.name);
        stored.description = graph.description;
        stored.nodes = nodes;
        stored.outputs = graph.outputs;
        stored.tags = graph.tags;

        state.graphs.insert(id.clone(), stored.clone());
        state.graph_order.push(id);
        Ok(stored)
    }

    async fn get_graph(&self, id: &str) -> Result<StrategyGraph, StrategyError> {
        self.state
            .lock()
            .expect("scripted state poisoned")
            .graphs
            .get(id)
            .cloned()
            .ok_or_else(|| StrategyError::UnknownGraph(id.to_string()))
    }

    async fn update_graph(
        &self,
        id: &str,
        update: GraphUpdate,
    ) -> Result<StrategyGraph, StrategyError> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        if state.fail_updates > 0 {
            state.fail_updates -= 1;
            return Err(StrategyError::Backend(
                "503 Service Unavailable: write store offline".to_string(),
            ));
        }
        let graph = state
            .graphs
            .get_mut(id)
            .ok_or_else(|| StrategyError::UnknownGraph(id.to_string()))?;

        if let Some(name) = update.name {
            graph.name = name;
        }
        if let Some(description) = update.description {
            graph.description = description;
        }
        if let Some(nodes) = update.nodes {
            graph.nodes = serde_json::from_value(nodes)?;
        }
        if let Some(outputs) = update.outputs {
            graph.outputs = outputs;
        }
        if let Some(tags) = update.tags {
            graph.tags = tags;
        }
        graph.version += 1;
        Ok(graph.clone())
    }

    async fn delete_graph(&self, id: &str) -> Result<(), StrategyError> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        if state.graphs.remove(id).is_none() {
            return Err(StrategyError::UnknownGraph(id.to_string()));
        }
        state.graph_order.retain(|stored| stored != id);
        Ok(())
    }

    async fn create_run(&self, run: NewRun) -> Result<Run, StrategyError> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        if !state.graphs.contains_key(&run.graph_id) {
            return Err(StrategyError::UnknownGraph(run.graph_id));
        }
        state.next_run += 1;
        let id = format!("r{}", state.next_run);

        let script = state.pending_scripts.pop_front().unwrap_or_else(|| {
            vec![ScriptedStep::running(50.0), ScriptedStep::completed()]
        });
        state.scripts.insert(id.clone(), script.into());

        let record = Run {
            id: id.clone(),
            graph_id: run.graph_id,
            status: RunStatus::Queued,
            progress: 0.0,
            config: run.config,
            metrics: None,
            error: None,
            notes: None,
            created_at: Utc::now(),
        };
        state.runs.insert(id.clone(), record.clone());
        state.run_order.push(id);
        Ok(record)
    }

    async fn get_run(&self, id: &str) -> Result<Run, StrategyError> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        *state.poll_counts.entry(id.to_string()).or_insert(0) += 1;
        if state.fail_polls > 0 {
            state.fail_polls -= 1;
            return Err(StrategyError::Backend(
                "504 Gateway Timeout: status store unreachable".to_string(),
            ));
        }
        let step = state.scripts.get_mut(id).and_then(VecDeque::pop_front);
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StrategyError::UnknownRun(id.to_string()))?;
        if let Some(step) = step {
            run.status = step.status;
            run.progress = step.progress;
            run.error = step.error;
            run.metrics = step.metrics;
        }
        Ok(run.clone())
    }

    async fn patch_run_notes(&self, id: &str, notes: &str) -> Result<Run, StrategyError> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StrategyError::UnknownRun(id.to_string()))?;
        run.notes = Some(notes.to_string());
        Ok(run.clone())
    }

    async fn list_runs(&self, limit: Option<usize>) -> Result<Vec<Run>, StrategyError> {
        let state = self.state.lock().expect("scripted state poisoned");
        let runs = state
            .run_order
            .iter()
            .rev()
            .filter_map(|id| state.runs.get(id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(runs)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunConfig;

    fn payload() -> NewGraph {
        NewGraph {
            name: "scratch".to_string(),
            description: String::new(),
            nodes: serde_json::json!([]),
            outputs: vec![],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn graphs_round_trip_with_version_bumps() {
        let service = ScriptedBacktestService::new();
        let created = service.create_graph(payload()).await.unwrap();
        assert_eq!(created.version, 1);

        let updated = service
            .update_graph(
                &created.id,
                GraphUpdate {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "renamed");

        service.delete_graph(&created.id).await.unwrap();
        assert!(service.list_graphs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_walk_their_script() {
        let service = ScriptedBacktestService::new();
        let graph = service.create_graph(payload()).await.unwrap();
        service.script_next_run(vec![
            ScriptedStep::running(30.0),
            ScriptedStep::failed("No OHLCV data for symbol"),
        ]);

        let run = service
            .create_run(NewRun {
                graph_id: graph.id,
                config: RunConfig::default(),
            })
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        let first = service.get_run(&run.id).await.unwrap();
        assert_eq!(first.status, RunStatus::Running);
        assert_eq!(first.progress, 30.0);

        let second = service.get_run(&run.id).await.unwrap();
        assert_eq!(second.status, RunStatus::Failed);
        assert_eq!(second.error.as_deref(), Some("No OHLCV data for symbol"));
        assert_eq!(service.poll_count(&run.id), 2);
    }

    #[tokio::test]
    async fn notes_do_not_affect_status() {
        let service = ScriptedBacktestService::new();
        let graph = service.create_graph(payload()).await.unwrap();
        let run = service
            .create_run(NewRun {
                graph_id: graph.id,
                config: RunConfig::default(),
            })
            .await
            .unwrap();

        let patched = service
            .patch_run_notes(&run.id, "promising variant")
            .await
            .unwrap();
        assert_eq!(patched.notes.as_deref(), Some("promising variant"));
        assert_eq!(patched.status, RunStatus::Queued);
    }
}
