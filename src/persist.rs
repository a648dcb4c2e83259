use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CorrelationCode, StrategyError};
use crate::graph::StrategyGraph;
use crate::service::BacktestService;
use crate::types::GraphUpdate;

pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

/// Debounce state. Modeled explicitly so "exactly one write reflects the
/// latest state" is an invariant of the machine rather than an emergent
/// property of timer bookkeeping: every `schedule_save` supersedes the armed
/// timer, and the armed state remembers which graph it was armed for so a
/// timer can never fire against a graph that replaced it in the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Debounce {
    Idle,
    Armed { graph_id: String, deadline: Instant },
}

/// Result of driving the controller's clock forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing armed, or the deadline has not passed.
    Pending,
    /// One write fired and succeeded; carries the new version.
    Saved(u64),
    /// The write failed; the timer was re-armed and the dirty flag is
    /// untouched. Auto-save failures are retried, not surfaced.
    RetryScheduled(CorrelationCode),
}

/// Debounced auto-save of the graph model, plus the explicit manual-save
/// path. Only ever reads the model; the single writer of stored state.
pub struct PersistenceController {
    service: Arc<dyn BacktestService>,
    delay: Duration,
    state: Debounce,
}

impl PersistenceController {
    pub fn new(service: Arc<dyn BacktestService>) -> Self {
        Self::with_delay(service, DEBOUNCE_DELAY)
    }

    pub fn with_delay(service: Arc<dyn BacktestService>, delay: Duration) -> Self {
        Self {
            service,
            delay,
            state: Debounce::Idle,
        }
    }

    /// Arm (or re-arm) the debounce timer. Template graphs are never
    /// persisted by the editor; rejected before any backend contact.
    pub fn schedule_save(
        &mut self,
        graph: &StrategyGraph,
        now: Instant,
    ) -> Result<(), StrategyError> {
        if graph.is_demo {
            return Err(StrategyError::TemplateReadOnly);
        }
        self.state = Debounce::Armed {
            graph_id: graph.id.clone(),
            deadline: now + self.delay,
        };
        Ok(())
    }

    /// When the armed timer expires, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            Debounce::Armed { deadline, .. } => Some(*deadline),
            Debounce::Idle => None,
        }
    }

    /// Drop any armed timer without writing. Called when the active graph
    /// changes, after the outgoing graph has been flushed.
    pub fn disarm(&mut self) {
        self.state = Debounce::Idle;
    }

    /// Drive the machine: fire at most one write if the armed deadline has
    /// passed and the timer was armed for the graph the caller is holding.
    /// A timer armed for a graph that is no longer active is dropped, never
    /// fired, so a graph switch can never write under the wrong id. The
    /// caller owns both the clock and the exclusive borrow of the graph,
    /// which keeps the supersede rule deterministic: a `schedule_save`
    /// before the deadline re-arms, and no write can overlap another.
    pub async fn tick(&mut self, graph: &mut StrategyGraph, now: Instant) -> SaveOutcome {
        match &self.state {
            Debounce::Armed { graph_id, deadline } if now >= *deadline => {
                if *graph_id != graph.id || graph.is_demo {
                    tracing::warn!(
                        armed = %graph_id,
                        active = %graph.id,
                        "stale save timer dropped"
                    );
                    self.state = Debounce::Idle;
                    return SaveOutcome::Pending;
                }
            }
            _ => return SaveOutcome::Pending,
        }
        self.state = Debounce::Idle;

        match self.write(graph).await {
            Ok(version) => {
                graph.mark_clean(version);
                tracing::info!(graph = %graph.id, version, "auto-saved");
                SaveOutcome::Saved(version)
            }
            Err(err) => {
                let correlation = CorrelationCode::generate();
                tracing::warn!(
                    graph = %graph.id,
                    %correlation,
                    error = %err,
                    "auto-save failed, will retry"
                );
                self.state = Debounce::Armed {
                    graph_id: graph.id.clone(),
                    deadline: now + self.delay,
                };
                SaveOutcome::RetryScheduled(correlation)
            }
        }
    }

    /// Immediate write, canceling any pending debounced one. A failure here
    /// is user-initiated and therefore user-visible, with a correlation
    /// code for support escalation.
    pub async fn save_now(&mut self, graph: &mut StrategyGraph) -> Result<u64, StrategyError> {
        if graph.is_demo {
            return Err(StrategyError::TemplateReadOnly);
        }
        self.state = Debounce::Idle;

        match self.write(graph).await {
            Ok(version) => {
                graph.mark_clean(version);
                tracing::info!(graph = %graph.id, version, "saved");
                Ok(version)
            }
            Err(err) => {
                let correlation = CorrelationCode::generate();
                tracing::warn!(graph = %graph.id, %correlation, error = %err, "manual save failed");
                Err(StrategyError::SaveFailed {
                    correlation,
                    message: err.to_string(),
                })
            }
        }
    }

    async fn write(&self, graph: &StrategyGraph) -> Result<u64, StrategyError> {
        let update = GraphUpdate {
            nodes: Some(graph.serialize_nodes()),
            outputs: Some(graph.outputs.clone()),
            ..Default::default()
        };
        let stored = self.service.update_graph(&graph.id, update).await?;
        Ok(stored.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::scripted::ScriptedBacktestService;
    use crate::types::{GraphPoint, NewGraph, ParamValue};

    async fn stored_graph(service: &ScriptedBacktestService) -> StrategyGraph {
        service
            .create_graph(NewGraph {
                name: "wip".to_string(),
                description: String::new(),
                nodes: serde_json::json!([]),
                outputs: vec![],
                tags: vec![],
            })
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn repeated_schedules_collapse_into_one_write() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;
        let t0 = Instant::now();

        for i in 0..5 {
            graph.add_node("feature.sma", GraphPoint::new(i as f32 * 50.0, 0.0));
            controller.schedule_save(&graph, t0).unwrap();
        }

        // Inside the window: nothing fires.
        assert_eq!(controller.tick(&mut graph, t0 + Duration::from_secs(1)).await, SaveOutcome::Pending);

        // Past the window: exactly one write, reflecting the latest state.
        let outcome = controller.tick(&mut graph, t0 + DEBOUNCE_DELAY).await;
        assert_eq!(outcome, SaveOutcome::Saved(2));
        assert!(!graph.is_dirty());
        let stored = service.stored_graph(&graph.id).unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.nodes.len(), 5);

        // And nothing more afterwards.
        let outcome = controller.tick(&mut graph, t0 + Duration::from_secs(60)).await;
        assert_eq!(outcome, SaveOutcome::Pending);
        assert_eq!(service.stored_graph(&graph.id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn a_new_schedule_restarts_the_window() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;
        let t0 = Instant::now();

        graph.add_node("feature.rsi", GraphPoint::default());
        controller.schedule_save(&graph, t0).unwrap();
        // 1.5s later another change re-arms; the original deadline no
        // longer fires.
        let t1 = t0 + Duration::from_millis(1500);
        graph.set_param("n1", "period", ParamValue::Number(9.0));
        controller.schedule_save(&graph, t1).unwrap();

        assert_eq!(controller.tick(&mut graph, t0 + DEBOUNCE_DELAY).await, SaveOutcome::Pending);
        assert!(matches!(
            controller.tick(&mut graph, t1 + DEBOUNCE_DELAY).await,
            SaveOutcome::Saved(_)
        ));
    }

    #[tokio::test]
    async fn save_now_cancels_the_armed_timer() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;
        let t0 = Instant::now();

        graph.add_node("feature.rsi", GraphPoint::default());
        controller.schedule_save(&graph, t0).unwrap();
        let version = controller.save_now(&mut graph).await.unwrap();
        assert_eq!(version, 2);

        // The debounced write was canceled, not queued behind.
        assert_eq!(controller.tick(&mut graph, t0 + Duration::from_secs(10)).await, SaveOutcome::Pending);
        assert_eq!(service.stored_graph(&graph.id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn templates_are_rejected_without_backend_contact() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = StrategyGraph::new("demo-rsi", "RSI template");
        graph.is_demo = true;

        let err = controller.schedule_save(&graph, Instant::now()).unwrap_err();
        assert!(matches!(err, StrategyError::TemplateReadOnly));

        let err = controller.save_now(&mut graph).await.unwrap_err();
        assert!(matches!(err, StrategyError::TemplateReadOnly));
        // The template id never reached the store.
        assert!(service.stored_graph("demo-rsi").is_none());
    }

    #[tokio::test]
    async fn armed_timer_never_fires_for_a_different_graph() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;
        let t0 = Instant::now();

        graph.add_node("feature.rsi", GraphPoint::default());
        controller.schedule_save(&graph, t0).unwrap();

        // The editor switches to a template before the window elapses. The
        // timer armed for the user graph must be dropped, not fired against
        // the template id.
        let mut template = StrategyGraph::new("demo-rsi", "RSI template");
        template.is_demo = true;
        let outcome = controller.tick(&mut template, t0 + DEBOUNCE_DELAY).await;
        assert_eq!(outcome, SaveOutcome::Pending);
        assert!(controller.next_deadline().is_none());
        assert!(service.stored_graph("demo-rsi").is_none());
        assert_eq!(service.stored_graph(&graph.id).unwrap().version, 1);

        // Same for a switch between two user graphs.
        controller.schedule_save(&graph, t0).unwrap();
        let mut other = stored_graph(&service).await;
        let outcome = controller.tick(&mut other, t0 + DEBOUNCE_DELAY).await;
        assert_eq!(outcome, SaveOutcome::Pending);
        assert_eq!(service.stored_graph(&other.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn disarm_drops_the_pending_write() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;
        let t0 = Instant::now();

        graph.add_node("feature.rsi", GraphPoint::default());
        controller.schedule_save(&graph, t0).unwrap();
        controller.disarm();

        assert!(controller.next_deadline().is_none());
        let outcome = controller.tick(&mut graph, t0 + DEBOUNCE_DELAY).await;
        assert_eq!(outcome, SaveOutcome::Pending);
        assert_eq!(service.stored_graph(&graph.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn manual_save_failure_keeps_dirty_and_carries_a_code() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;

        graph.add_node("feature.rsi", GraphPoint::default());
        service.fail_next_update();

        let err = controller.save_now(&mut graph).await.unwrap_err();
        assert!(err.correlation().is_some());
        assert!(graph.is_dirty());
    }

    #[tokio::test]
    async fn auto_save_failure_rearms_and_retries() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut controller = PersistenceController::new(service.clone());
        let mut graph = stored_graph(&service).await;
        let t0 = Instant::now();

        graph.add_node("feature.rsi", GraphPoint::default());
        controller.schedule_save(&graph, t0).unwrap();
        service.fail_next_update();

        let outcome = controller.tick(&mut graph, t0 + DEBOUNCE_DELAY).await;
        assert!(matches!(outcome, SaveOutcome::RetryScheduled(_)));
        assert!(graph.is_dirty());

        // The retry fires one debounce window later and succeeds.
        let retry_at = t0 + DEBOUNCE_DELAY + DEBOUNCE_DELAY;
        let outcome = controller.tick(&mut graph, retry_at).await;
        assert!(matches!(outcome, SaveOutcome::Saved(_)));
        assert!(!graph.is_dirty());
    }
}
