use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CorrelationCode, StrategyError};
use crate::graph::StrategyGraph;
use crate::service::BacktestService;
use crate::types::{NewRun, Run, RunConfig, RunMetrics, RunStatus};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Maximum time a run is observed. After this the client stops polling
/// without marking the run failed; the backend may still finish it.
pub const OBSERVATION_WINDOW: Duration = Duration::from_secs(300);

/// User-facing classification of a backend execution failure. The raw
/// message is always preserved alongside for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    MissingDataSource,
    UnresolvedFeature,
    NoFeatureBlocks,
    InvalidBlockConfig,
    Unknown,
}

impl FailureCategory {
    pub fn user_message(self) -> &'static str {
        match self {
            FailureCategory::MissingDataSource => {
                "No market data is available for the requested symbol and date range."
            }
            FailureCategory::UnresolvedFeature => {
                "A signal block references a feature that is not connected to it."
            }
            FailureCategory::NoFeatureBlocks => {
                "The strategy has no feature blocks wired between data and signals."
            }
            FailureCategory::InvalidBlockConfig => {
                "A block has an invalid configuration; check its parameters."
            }
            FailureCategory::Unknown => {
                "The backtest failed for an unexpected reason."
            }
        }
    }
}

static FAILURE_PATTERNS: Lazy<Vec<(Regex, FailureCategory)>> = Lazy::new(|| {
    let pattern = |expr: &str| Regex::new(expr).expect("failure pattern compiles");
    vec![
        (
            pattern(r"(?i)no\s+ohlcv\s+data|missing\s+data\s+source|no\s+data\s+for\s+symbol"),
            FailureCategory::MissingDataSource,
        ),
        (
            pattern(r"(?i)unresolved\s+feature|unknown\s+feature\s+reference"),
            FailureCategory::UnresolvedFeature,
        ),
        (
            pattern(r"(?i)no\s+feature\s+blocks?\s+(connected|found)"),
            FailureCategory::NoFeatureBlocks,
        ),
        (
            pattern(r"(?i)invalid\s+(block\s+)?(configuration|parameter)"),
            FailureCategory::InvalidBlockConfig,
        ),
    ]
});

/// Match the raw backend message into a category, falling back to
/// [`FailureCategory::Unknown`] for anything unrecognized.
pub fn classify_failure(raw: &str) -> FailureCategory {
    FAILURE_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(raw))
        .map(|(_, category)| *category)
        .unwrap_or(FailureCategory::Unknown)
}

/// Structured event log of a submission's lifecycle, delivered over an
/// unbounded channel so interaction stays responsive while runs execute.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A template was cloned into an independent user graph before
    /// submission.
    GraphMaterialized {
        template_id: String,
        graph_id: String,
    },
    Submitted {
        run_id: String,
        graph_id: String,
    },
    Progress {
        run_id: String,
        progress: f64,
    },
    Completed {
        run_id: String,
        metrics: Option<RunMetrics>,
    },
    Failed {
        run_id: String,
        category: FailureCategory,
        raw: String,
        correlation: CorrelationCode,
    },
    /// The observation window elapsed; polling stopped without a verdict.
    ObservationTimedOut {
        run_id: String,
    },
}

/// Result of a successful submission.
#[derive(Debug)]
pub struct Submission {
    pub run: Run,
    /// The user graph created when a template was submitted, for the caller
    /// to adopt as the active graph.
    pub materialized: Option<StrategyGraph>,
}

/// Submits graphs for execution and tracks each run to a terminal state.
/// The only writer of run status on the client side; one watcher task per
/// run id, keyed in a map so concurrent runs can never be confused and
/// disposal is explicit.
pub struct RunOrchestrator {
    service: Arc<dyn BacktestService>,
    events: mpsc::UnboundedSender<RunEvent>,
    watchers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    poll_interval: Duration,
    observation_window: Duration,
}

impl RunOrchestrator {
    pub fn new(service: Arc<dyn BacktestService>) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        Self::with_timing(service, POLL_INTERVAL, OBSERVATION_WINDOW)
    }

    pub fn with_timing(
        service: Arc<dyn BacktestService>,
        poll_interval: Duration,
        observation_window: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                service,
                events,
                watchers: Arc::new(Mutex::new(HashMap::new())),
                poll_interval,
                observation_window,
            },
            receiver,
        )
    }

    /// Submit a graph for backtest execution. Templates are first cloned
    /// into an independent user graph and the run is bound to the clone's
    /// id; the template itself is never executed against mutable state.
    pub async fn submit(
        &self,
        graph: &StrategyGraph,
        config: RunConfig,
    ) -> Result<Submission, StrategyError> {
        match self.submit_inner(graph, config).await {
            Ok(submission) => Ok(submission),
            Err(err) => {
                let correlation = CorrelationCode::generate();
                tracing::error!(
                    graph = %graph.id,
                    %correlation,
                    error = %err,
                    "submission failed"
                );
                Err(StrategyError::Submission {
                    correlation,
                    message: err.to_string(),
                })
            }
        }
    }

    async fn submit_inner(
        &self,
        graph: &StrategyGraph,
        config: RunConfig,
    ) -> Result<Submission, StrategyError> {
        let (graph_id, materialized) = if graph.is_demo {
            let created = self.service.create_graph(graph.materialize_copy()).await?;
            tracing::info!(template = %graph.id, clone = %created.id, "materialized template");
            let _ = self.events.send(RunEvent::GraphMaterialized {
                template_id: graph.id.clone(),
                graph_id: created.id.clone(),
            });
            (created.id.clone(), Some(created))
        } else {
            (graph.id.clone(), None)
        };

        let run = self
            .service
            .create_run(NewRun {
                graph_id: graph_id.clone(),
                config,
            })
            .await?;
        tracing::info!(run = %run.id, graph = %graph_id, "run submitted");
        let _ = self.events.send(RunEvent::Submitted {
            run_id: run.id.clone(),
            graph_id,
        });

        self.watch(&run);
        Ok(Submission { run, materialized })
    }

    /// Start the polling watcher for a run, unless one is already active
    /// for this id. Watchers for different runs are independent; a new
    /// submission never cancels an earlier loop.
    fn watch(&self, run: &Run) {
        let mut watchers = self.watchers.lock().expect("watcher map poisoned");
        if watchers.contains_key(&run.id) {
            return;
        }

        let run_id = run.id.clone();
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        let registry = Arc::clone(&self.watchers);
        let interval = self.poll_interval;
        let window = self.observation_window;
        let initial_progress = run.progress;

        let handle = tokio::spawn(async move {
            poll_until_terminal(
                service,
                events,
                run_id.clone(),
                initial_progress,
                interval,
                window,
            )
            .await;
            registry
                .lock()
                .expect("watcher map poisoned")
                .remove(&run_id);
        });
        watchers.insert(run.id.clone(), handle);
    }

    /// Run ids with an active polling loop.
    pub fn active_watchers(&self) -> Vec<String> {
        self.watchers
            .lock()
            .expect("watcher map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Stop observing one run. The run itself keeps executing server-side.
    pub fn stop(&self, run_id: &str) {
        if let Some(handle) = self
            .watchers
            .lock()
            .expect("watcher map poisoned")
            .remove(run_id)
        {
            handle.abort();
            tracing::debug!(run = run_id, "watcher stopped");
        }
    }

    /// Stop every watcher. Called when the editor view is torn down so no
    /// polling task can outlive its owner.
    pub fn shutdown(&self) {
        let mut watchers = self.watchers.lock().expect("watcher map poisoned");
        for (run_id, handle) in watchers.drain() {
            handle.abort();
            tracing::debug!(run = %run_id, "watcher stopped at shutdown");
        }
    }

    /// Wait for a run's watcher to finish (terminal state or timeout).
    pub async fn join(&self, run_id: &str) {
        let handle = self
            .watchers
            .lock()
            .expect("watcher map poisoned")
            .remove(run_id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Attach free-text notes to a run; allowed in any lifecycle state and
    /// never affects status.
    pub async fn annotate(&self, run_id: &str, notes: &str) -> Result<Run, StrategyError> {
        self.service.patch_run_notes(run_id, notes).await
    }
}

impl Drop for RunOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_until_terminal(
    service: Arc<dyn BacktestService>,
    events: mpsc::UnboundedSender<RunEvent>,
    run_id: String,
    initial_progress: f64,
    interval: Duration,
    window: Duration,
) {
    let started = tokio::time::Instant::now();
    // High-water mark; a backend reporting a lower value emits nothing.
    let mut progress = initial_progress;

    loop {
        tokio::time::sleep(interval).await;
        if started.elapsed() >= window {
            tracing::warn!(run = %run_id, "observation window elapsed, polling stopped");
            let _ = events.send(RunEvent::ObservationTimedOut {
                run_id: run_id.clone(),
            });
            return;
        }

        let run = match service.get_run(&run_id).await {
            Ok(run) => run,
            Err(err) => {
                // Transient; retried on the next tick, never terminates
                // the watcher early.
                tracing::warn!(run = %run_id, error = %err, "poll failed, retrying");
                continue;
            }
        };

        if run.progress > progress {
            progress = run.progress;
            let _ = events.send(RunEvent::Progress {
                run_id: run_id.clone(),
                progress,
            });
        }

        match run.status {
            RunStatus::Completed => {
                tracing::info!(run = %run_id, "run completed");
                let _ = events.send(RunEvent::Completed {
                    run_id: run_id.clone(),
                    metrics: run.metrics,
                });
                return;
            }
            RunStatus::Failed => {
                let raw = run.error.unwrap_or_default();
                let category = classify_failure(&raw);
                let correlation = CorrelationCode::generate();
                tracing::error!(
                    run = %run_id,
                    %correlation,
                    ?category,
                    raw = %raw,
                    "run failed"
                );
                let _ = events.send(RunEvent::Failed {
                    run_id: run_id.clone(),
                    category,
                    raw,
                    correlation,
                });
                return;
            }
            RunStatus::Queued | RunStatus::Running => {}
        }
    }
}
