use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::StrategyError;
use crate::graph::{StrategyGraph, TEMPLATE_ID_PREFIX};
use crate::service::BacktestService;
use crate::types::{GraphPoint, GraphSummary, Run};

/// Templates shipped with the client. Immutable, identified by the reserved
/// `demo-` id namespace, never persisted by the editor.
static TEMPLATES: Lazy<Vec<StrategyGraph>> = Lazy::new(|| {
    vec![rsi_mean_reversion(), sma_crossover()]
});

fn rsi_mean_reversion() -> StrategyGraph {
    let mut graph = StrategyGraph::new("demo-rsi-reversion", "RSI Mean Reversion");
    graph.description =
        "Buy oversold, sell overbought on a 14-period RSI with a protective stop.".to_string();

    let data = graph.add_node("data.ohlcv", GraphPoint::new(40.0, 160.0)).id.clone();
    let rsi = graph.add_node("feature.rsi", GraphPoint::new(260.0, 160.0)).id.clone();
    let signal = graph
        .add_node("signal.threshold", GraphPoint::new(480.0, 160.0))
        .id
        .clone();
    let sizing = graph
        .add_node("sizing.fixed_fraction", GraphPoint::new(700.0, 80.0))
        .id
        .clone();
    let stop = graph.add_node("risk.stop_loss", GraphPoint::new(700.0, 240.0)).id.clone();
    let exec = graph
        .add_node("execution.market", GraphPoint::new(920.0, 160.0))
        .id
        .clone();

    graph.connect(&data, &rsi);
    graph.connect(&rsi, &signal);
    graph.connect(&signal, &sizing);
    graph.connect(&signal, &stop);
    graph.connect(&sizing, &exec);
    graph.connect(&stop, &exec);
    graph.set_output(&exec);

    finish_template(graph)
}

fn sma_crossover() -> StrategyGraph {
    let mut graph = StrategyGraph::new("demo-sma-crossover", "SMA Crossover");
    graph.description = "Classic fast/slow moving-average crossover.".to_string();

    let data = graph.add_node("data.ohlcv", GraphPoint::new(40.0, 160.0)).id.clone();
    let fast = graph.add_node("feature.sma", GraphPoint::new(260.0, 80.0)).id.clone();
    let slow = graph.add_node("feature.sma", GraphPoint::new(260.0, 240.0)).id.clone();
    graph.set_param(&fast, "period", 10.0);
    graph.set_param(&slow, "period", 50.0);

    let signal = graph
        .add_node("signal.crossover", GraphPoint::new(480.0, 160.0))
        .id
        .clone();
    let sizing = graph
        .add_node("sizing.fixed_fraction", GraphPoint::new(700.0, 160.0))
        .id
        .clone();
    let exec = graph
        .add_node("execution.market", GraphPoint::new(920.0, 160.0))
        .id
        .clone();

    graph.connect(&data, &fast);
    graph.connect(&data, &slow);
    graph.connect(&fast, &signal);
    graph.connect(&slow, &signal);
    graph.connect(&signal, &sizing);
    graph.connect(&sizing, &exec);
    graph.set_output(&exec);

    finish_template(graph)
}

fn finish_template(mut graph: StrategyGraph) -> StrategyGraph {
    graph.tags = vec!["template".to_string()];
    graph.is_demo = true;
    graph.mark_clean(1);
    graph
}

/// Lists template and user graphs plus recent runs, and drives selection
/// into the rest of the workbench. Read-mostly.
pub struct Navigator {
    service: Arc<dyn BacktestService>,
    selected: Option<String>,
}

impl Navigator {
    pub fn new(service: Arc<dyn BacktestService>) -> Self {
        Self {
            service,
            selected: None,
        }
    }

    pub fn templates() -> &'static [StrategyGraph] {
        &TEMPLATES
    }

    pub fn is_template_id(id: &str) -> bool {
        id.starts_with(TEMPLATE_ID_PREFIX)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn select(&mut self, id: impl Into<String>) {
        self.selected = Some(id.into());
    }

    /// Template summaries followed by the user graphs the backend knows
    /// about (the backend never stores templates).
    pub async fn list_graphs(&self) -> Result<Vec<GraphSummary>, StrategyError> {
        let mut listing: Vec<GraphSummary> = TEMPLATES
            .iter()
            .map(|graph| GraphSummary {
                id: graph.id.clone(),
                name: graph.name.clone(),
                description: graph.description.clone(),
                version: graph.version,
                tags: graph.tags.clone(),
                is_demo: true,
            })
            .collect();
        listing.extend(self.service.list_graphs().await?);
        Ok(listing)
    }

    /// Resolve a graph for editing: template ids locally, user ids through
    /// the backend. Marks it as the current selection.
    pub async fn load(&mut self, id: &str) -> Result<StrategyGraph, StrategyError> {
        let graph = if Self::is_template_id(id) {
            TEMPLATES
                .iter()
                .find(|template| template.id == id)
                .cloned()
                .ok_or_else(|| StrategyError::UnknownGraph(id.to_string()))?
        } else {
            self.service.get_graph(id).await?
        };
        self.selected = Some(graph.id.clone());
        Ok(graph)
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>, StrategyError> {
        self.service.list_runs(Some(limit)).await
    }

    /// Delete a user graph. Clears the selection when it pointed at the
    /// deleted graph, so no component keeps referencing it.
    pub async fn delete_graph(&mut self, id: &str) -> Result<(), StrategyError> {
        if Self::is_template_id(id) {
            return Err(StrategyError::TemplateReadOnly);
        }
        self.service.delete_graph(id).await?;
        tracing::info!(graph = id, "graph deleted");
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::scripted::ScriptedBacktestService;
    use crate::types::NewGraph;

    #[test]
    fn templates_are_read_only_and_namespaced() {
        for template in Navigator::templates() {
            assert!(template.is_demo);
            assert!(Navigator::is_template_id(&template.id));
            assert!(!template.nodes.is_empty());
            assert!(!template.outputs.is_empty());
            assert!(!template.is_dirty());
        }
    }

    #[test]
    fn template_wiring_is_acyclic_and_complete() {
        let rsi = &Navigator::templates()[0];
        // Every non-source node has at least one input.
        for node in &rsi.nodes {
            if node.block_type != "data.ohlcv" {
                assert!(!node.inputs.is_empty(), "{} unwired", node.id);
            }
        }
    }

    #[tokio::test]
    async fn listing_merges_templates_and_user_graphs() {
        let service = Arc::new(ScriptedBacktestService::new());
        service
            .create_graph(NewGraph {
                name: "mine".to_string(),
                description: String::new(),
                nodes: serde_json::json!([]),
                outputs: vec![],
                tags: vec![],
            })
            .await
            .unwrap();

        let navigator = Navigator::new(service.clone());
        let listing = navigator.list_graphs().await.unwrap();
        assert_eq!(listing.len(), Navigator::templates().len() + 1);
        assert!(listing.first().unwrap().is_demo);
        assert!(!listing.last().unwrap().is_demo);
    }

    #[tokio::test]
    async fn load_resolves_templates_locally() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut navigator = Navigator::new(service.clone());

        let graph = navigator.load("demo-sma-crossover").await.unwrap();
        assert!(graph.is_demo);
        assert_eq!(navigator.selected(), Some("demo-sma-crossover"));
    }

    #[tokio::test]
    async fn deleting_the_selected_graph_clears_selection() {
        let service = Arc::new(ScriptedBacktestService::new());
        let created = service
            .create_graph(NewGraph {
                name: "scratch".to_string(),
                description: String::new(),
                nodes: serde_json::json!([]),
                outputs: vec![],
                tags: vec![],
            })
            .await
            .unwrap();

        let mut navigator = Navigator::new(service.clone());
        navigator.select(created.id.clone());
        navigator.delete_graph(&created.id).await.unwrap();
        assert_eq!(navigator.selected(), None);
    }

    #[tokio::test]
    async fn templates_cannot_be_deleted() {
        let service = Arc::new(ScriptedBacktestService::new());
        let mut navigator = Navigator::new(service);
        let err = navigator.delete_graph("demo-rsi-reversion").await.unwrap_err();
        assert!(matches!(err, StrategyError::TemplateReadOnly));
    }
}
