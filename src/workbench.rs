use std::sync::Arc;
use std::time::Instant;

use crate::canvas::{CanvasController, CanvasEvent};
use crate::error::StrategyError;
use crate::graph::{ConnectOutcome, StrategyGraph};
use crate::persist::{PersistenceController, SaveOutcome};
use crate::service::BacktestService;
use crate::types::{GraphPoint, ParamValue, ScreenPoint};

/// Composition root for the editor: owns the active graph, the canvas, and
/// the persistence controller. Every edit path funnels through here so the
/// template policy and the auto-save scheduling live in one place.
pub struct Workbench {
    graph: Option<StrategyGraph>,
    canvas: CanvasController,
    persistence: PersistenceController,
}

impl Workbench {
    pub fn new(service: Arc<dyn BacktestService>) -> Self {
        Self {
            graph: None,
            canvas: CanvasController::new(),
            persistence: PersistenceController::new(service),
        }
    }

    /// Make a graph the active one. Unsaved edits on the outgoing graph are
    /// flushed first and its save timer dropped, so nothing armed for the
    /// previous graph can fire once the new one is active. Viewport and
    /// interaction state are reset unconditionally, so no drag or connection
    /// draw can leak from the previous graph. Run watchers are not tied to
    /// this selection.
    pub async fn open_graph(&mut self, graph: StrategyGraph) {
        self.flush_outgoing().await;
        tracing::info!(graph = %graph.id, "opened graph");
        self.graph = Some(graph);
        self.canvas.reset();
    }

    pub async fn close_graph(&mut self) {
        self.flush_outgoing().await;
        self.graph = None;
        self.canvas.reset();
    }

    /// Write the outgoing graph's unsaved edits before it is replaced. A
    /// failure here is logged with its correlation code rather than blocking
    /// the switch.
    async fn flush_outgoing(&mut self) {
        if let Some(graph) = self.graph.as_mut() {
            if graph.is_dirty() && !graph.is_demo {
                if let Err(err) = self.persistence.save_now(graph).await {
                    tracing::warn!(
                        graph = %graph.id,
                        error = %err,
                        "unsaved edits lost at graph switch"
                    );
                }
            }
        }
        self.persistence.disarm();
    }

    pub fn active(&self) -> Option<&StrategyGraph> {
        self.graph.as_ref()
    }

    pub fn canvas(&self) -> &CanvasController {
        &self.canvas
    }

    fn editable(&mut self) -> Result<&mut StrategyGraph, StrategyError> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| StrategyError::UnknownGraph("no active graph".to_string()))?;
        if graph.is_demo {
            return Err(StrategyError::TemplateReadOnly);
        }
        Ok(graph)
    }

    pub fn add_block(
        &mut self,
        block_type_id: &str,
        position: GraphPoint,
    ) -> Result<String, StrategyError> {
        let graph = self.editable()?;
        let id = graph.add_node(block_type_id, position).id.clone();
        self.autosave();
        Ok(id)
    }

    pub fn remove_block(&mut self, node_id: &str) -> Result<(), StrategyError> {
        self.editable()?.remove_node(node_id);
        self.autosave();
        Ok(())
    }

    pub fn set_block_param(
        &mut self,
        node_id: &str,
        key: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), StrategyError> {
        self.editable()?.set_param(node_id, key, value);
        self.autosave();
        Ok(())
    }

    pub fn disconnect(&mut self, node_id: &str, input_id: &str) -> Result<(), StrategyError> {
        self.editable()?.disconnect(node_id, input_id);
        self.autosave();
        Ok(())
    }

    pub fn toggle_output(&mut self, node_id: &str) -> Result<(), StrategyError> {
        let graph = self.editable()?;
        if graph.outputs.iter().any(|output| output == node_id) {
            graph.clear_output(node_id);
        } else {
            graph.set_output(node_id);
        }
        self.autosave();
        Ok(())
    }

    pub fn pointer_down(&mut self, screen: ScreenPoint) -> CanvasEvent {
        let Some(graph) = self.graph.as_mut() else {
            return CanvasEvent::None;
        };
        let event = self.canvas.pointer_down(graph, screen);
        self.react(&event);
        event
    }

    pub fn pointer_move(&mut self, screen: ScreenPoint) -> CanvasEvent {
        let Some(graph) = self.graph.as_mut() else {
            return CanvasEvent::None;
        };
        let event = self.canvas.pointer_move(graph, screen);
        self.react(&event);
        event
    }

    pub fn pointer_up(&mut self) -> CanvasEvent {
        self.canvas.pointer_up()
    }

    pub fn wheel(&mut self, cursor: ScreenPoint, steps: f32) {
        self.canvas.wheel(cursor, steps);
    }

    pub fn cancel_interaction(&mut self) -> CanvasEvent {
        self.canvas.cancel()
    }

    /// Schedule a debounced save for canvas events that mutated the model.
    fn react(&mut self, event: &CanvasEvent) {
        let mutated = matches!(
            event,
            CanvasEvent::NodeMoved(_)
                | CanvasEvent::ConnectionCompleted {
                    outcome: ConnectOutcome::Connected,
                    ..
                }
        );
        if mutated {
            self.autosave();
        }
    }

    fn autosave(&mut self) {
        if let Some(graph) = &self.graph {
            // Canvas events only mutate non-template graphs, and direct
            // edits go through `editable`, so this cannot be rejected.
            if let Err(err) = self.persistence.schedule_save(graph, Instant::now()) {
                tracing::warn!(graph = %graph.id, error = %err, "auto-save not scheduled");
            }
        }
    }

    /// Drive the debounce clock; typically called from the event loop.
    pub async fn tick_saves(&mut self, now: Instant) -> SaveOutcome {
        match self.graph.as_mut() {
            Some(graph) => self.persistence.tick(graph, now).await,
            None => SaveOutcome::Pending,
        }
    }

    pub fn next_save_deadline(&self) -> Option<Instant> {
        self.persistence.next_deadline()
    }

    /// Explicit user-initiated save.
    pub async fn save_now(&mut self) -> Result<u64, StrategyError> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| StrategyError::UnknownGraph("no active graph".to_string()))?;
        self.persistence.save_now(graph).await
    }
}
