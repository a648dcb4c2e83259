use crate::graph::{ConnectOutcome, StrategyGraph};
use crate::types::{GraphPoint, ScreenPoint};

pub const NODE_WIDTH: f32 = 160.0;
pub const NODE_HEIGHT: f32 = 90.0;
/// Hot-zone radius (graph units) around a node's connector.
pub const CONNECTOR_RADIUS: f32 = 12.0;

pub const MIN_SCALE: f32 = 0.3;
pub const MAX_SCALE: f32 = 3.0;

/// Pan offset plus zoom scale. Ephemeral; never persisted, reset whenever
/// the active graph changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub pan_x: f32,
    pub pan_y: f32,
    pub scale: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            scale: 1.0,
        }
    }
}

impl Viewport {
    /// `graph = (screen - pan) / scale`
    pub fn to_graph(&self, point: ScreenPoint) -> GraphPoint {
        GraphPoint::new(
            (point.x - self.pan_x) / self.scale,
            (point.y - self.pan_y) / self.scale,
        )
    }

    /// `screen = graph * scale + pan`, the exact inverse of [`to_graph`].
    ///
    /// [`to_graph`]: Viewport::to_graph
    pub fn to_screen(&self, point: GraphPoint) -> ScreenPoint {
        ScreenPoint::new(
            point.x * self.scale + self.pan_x,
            point.y * self.scale + self.pan_y,
        )
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    /// Rescale anchored at `cursor`: the graph point currently under the
    /// cursor stays under it after the change (solve for the new pan with
    /// the graph point and screen point held fixed).
    pub fn zoom_at(&mut self, cursor: ScreenPoint, factor: f32) {
        let anchor = self.to_graph(cursor);
        self.scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        self.pan_x = cursor.x - anchor.x * self.scale;
        self.pan_y = cursor.y - anchor.y * self.scale;
    }
}

/// The three mutually exclusive pointer interactions, plus idle. Exactly one
/// is active at a time; starting a new one implicitly cancels an in-progress
/// connection draw.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Idle,
    Panning {
        last: ScreenPoint,
    },
    DraggingNode {
        node_id: String,
        /// Graph-space offset between the pointer and the node's position at
        /// grab time, so the grab point is preserved throughout the drag.
        grab: GraphPoint,
    },
    DrawingConnection {
        anchor: String,
        cursor: GraphPoint,
    },
}

/// What a pointer event did, for the owner to react to (schedule a save,
/// show a notice). Pure UI state; nothing here can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    None,
    NodeMoved(String),
    ConnectionStarted(String),
    ConnectionCompleted {
        from: String,
        to: String,
        outcome: ConnectOutcome,
    },
    ConnectionCancelled,
    /// Node drag or connection refused because the graph is a template.
    EditRefused,
}

/// Translates pointer and wheel input into viewport and node-position
/// changes. Owns the viewport and the transient interaction state.
#[derive(Debug, Default)]
pub struct CanvasController {
    pub viewport: Viewport,
    interaction: Interaction,
}

impl Default for Interaction {
    fn default() -> Self {
        Interaction::Idle
    }
}

impl CanvasController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    /// Restore the default viewport and drop any in-flight interaction.
    /// Invoked unconditionally when the active graph changes.
    pub fn reset(&mut self) {
        self.viewport = Viewport::default();
        self.interaction = Interaction::Idle;
    }

    pub fn pointer_down(&mut self, graph: &mut StrategyGraph, screen: ScreenPoint) -> CanvasEvent {
        let point = self.viewport.to_graph(screen);

        if let Interaction::DrawingConnection { anchor, .. } = &self.interaction {
            let anchor = anchor.clone();
            self.interaction = Interaction::Idle;
            return match connector_at(graph, point) {
                Some(target) if target != anchor => {
                    let outcome = graph.connect(&anchor, &target);
                    CanvasEvent::ConnectionCompleted {
                        from: anchor,
                        to: target,
                        outcome,
                    }
                }
                // Empty canvas, the anchor itself, or a plain node body all
                // abort without mutating the graph.
                _ => CanvasEvent::ConnectionCancelled,
            };
        }

        if let Some(node_id) = connector_at(graph, point) {
            if graph.is_demo {
                tracing::debug!(graph = %graph.id, "connection refused on template");
                return CanvasEvent::EditRefused;
            }
            self.interaction = Interaction::DrawingConnection {
                anchor: node_id.clone(),
                cursor: point,
            };
            return CanvasEvent::ConnectionStarted(node_id);
        }

        if let Some(node_id) = node_at(graph, point) {
            if graph.is_demo {
                tracing::debug!(graph = %graph.id, "drag refused on template");
                return CanvasEvent::EditRefused;
            }
            let node = graph.node(&node_id).expect("hit-tested node exists");
            self.interaction = Interaction::DraggingNode {
                node_id,
                grab: GraphPoint::new(point.x - node.position.x, point.y - node.position.y),
            };
            return CanvasEvent::None;
        }

        self.interaction = Interaction::Panning { last: screen };
        CanvasEvent::None
    }

    pub fn pointer_move(&mut self, graph: &mut StrategyGraph, screen: ScreenPoint) -> CanvasEvent {
        match &mut self.interaction {
            Interaction::Idle => CanvasEvent::None,
            Interaction::Panning { last } => {
                let (dx, dy) = (screen.x - last.x, screen.y - last.y);
                *last = screen;
                self.viewport.pan_by(dx, dy);
                CanvasEvent::None
            }
            Interaction::DraggingNode { node_id, grab } => {
                let point = self.viewport.to_graph(screen);
                let id = node_id.clone();
                let position = GraphPoint::new(point.x - grab.x, point.y - grab.y);
                graph.move_node(&id, position);
                CanvasEvent::NodeMoved(id)
            }
            Interaction::DrawingConnection { cursor, .. } => {
                *cursor = self.viewport.to_graph(screen);
                CanvasEvent::None
            }
        }
    }

    pub fn pointer_up(&mut self) -> CanvasEvent {
        match self.interaction {
            // A connection draw spans two clicks; release keeps it alive.
            Interaction::DrawingConnection { .. } => CanvasEvent::None,
            _ => {
                self.interaction = Interaction::Idle;
                CanvasEvent::None
            }
        }
    }

    /// Wheel input; positive `steps` zoom in, anchored at the cursor.
    pub fn wheel(&mut self, cursor: ScreenPoint, steps: f32) {
        self.viewport.zoom_at(cursor, 1.1f32.powf(steps));
    }

    /// Abort whatever interaction is in progress without touching the graph.
    pub fn cancel(&mut self) -> CanvasEvent {
        let was_drawing = matches!(self.interaction, Interaction::DrawingConnection { .. });
        self.interaction = Interaction::Idle;
        if was_drawing {
            CanvasEvent::ConnectionCancelled
        } else {
            CanvasEvent::None
        }
    }
}

/// Topmost node whose body contains the graph-space point. Later nodes draw
/// on top, so iterate in reverse.
fn node_at(graph: &StrategyGraph, point: GraphPoint) -> Option<String> {
    graph.nodes.iter().rev().find_map(|node| {
        let p = node.position;
        let inside = point.x >= p.x
            && point.x <= p.x + NODE_WIDTH
            && point.y >= p.y
            && point.y <= p.y + NODE_HEIGHT;
        inside.then(|| node.id.clone())
    })
}

/// Node whose connector hot zone (right-edge midpoint) contains the point.
fn connector_at(graph: &StrategyGraph, point: GraphPoint) -> Option<String> {
    graph.nodes.iter().rev().find_map(|node| {
        let cx = node.position.x + NODE_WIDTH;
        let cy = node.position.y + NODE_HEIGHT / 2.0;
        let (dx, dy) = (point.x - cx, point.y - cy);
        (dx * dx + dy * dy <= CONNECTOR_RADIUS * CONNECTOR_RADIUS).then(|| node.id.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_two_nodes() -> (StrategyGraph, String, String) {
        let mut g = StrategyGraph::new("g1", "canvas test");
        let a = g.add_node("feature.rsi", GraphPoint::new(0.0, 0.0)).id.clone();
        let b = g
            .add_node("signal.threshold", GraphPoint::new(400.0, 0.0))
            .id
            .clone();
        (g, a, b)
    }

    fn connector(node_pos: GraphPoint) -> GraphPoint {
        GraphPoint::new(node_pos.x + NODE_WIDTH, node_pos.y + NODE_HEIGHT / 2.0)
    }

    #[test]
    fn screen_graph_round_trip_is_identity() {
        let cases = [
            (0.0, 0.0, 1.0),
            (120.5, -44.25, 0.3),
            (-300.0, 950.0, 3.0),
            (17.0, 23.0, 0.77),
        ];
        for (pan_x, pan_y, scale) in cases {
            let viewport = Viewport { pan_x, pan_y, scale };
            let screen = ScreenPoint::new(123.4, -56.7);
            let back = viewport.to_screen(viewport.to_graph(screen));
            assert!((back.x - screen.x).abs() < 1e-3, "x at scale {scale}");
            assert!((back.y - screen.y).abs() < 1e-3, "y at scale {scale}");
        }
    }

    #[test]
    fn zoom_keeps_anchor_point_fixed() {
        let mut viewport = Viewport {
            pan_x: 40.0,
            pan_y: -10.0,
            scale: 1.0,
        };
        let cursor = ScreenPoint::new(250.0, 180.0);
        let before = viewport.to_graph(cursor);

        viewport.zoom_at(cursor, 1.5);
        let after = viewport.to_graph(cursor);
        assert!((before.x - after.x).abs() < 1e-3);
        assert!((before.y - after.y).abs() < 1e-3);

        // And again zooming out past the original scale.
        viewport.zoom_at(cursor, 0.25);
        let after = viewport.to_graph(cursor);
        assert!((before.x - after.x).abs() < 1e-3);
        assert!((before.y - after.y).abs() < 1e-3);
    }

    #[test]
    fn zoom_respects_scale_bounds() {
        let mut viewport = Viewport::default();
        let cursor = ScreenPoint::new(0.0, 0.0);
        for _ in 0..50 {
            viewport.zoom_at(cursor, 2.0);
        }
        assert_eq!(viewport.scale, MAX_SCALE);
        for _ in 0..50 {
            viewport.zoom_at(cursor, 0.5);
        }
        assert_eq!(viewport.scale, MIN_SCALE);
    }

    #[test]
    fn drag_preserves_grab_point() {
        let (mut g, a, _) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();

        // Grab 10,10 inside the node, drag to 500,300.
        canvas.pointer_down(&mut g, ScreenPoint::new(10.0, 10.0));
        assert!(matches!(canvas.interaction(), Interaction::DraggingNode { .. }));

        canvas.pointer_move(&mut g, ScreenPoint::new(500.0, 300.0));
        let pos = g.node(&a).unwrap().position;
        assert_eq!(pos, GraphPoint::new(490.0, 290.0));

        canvas.pointer_up();
        assert_eq!(canvas.interaction(), &Interaction::Idle);
    }

    #[test]
    fn drag_accounts_for_viewport_transform() {
        let (mut g, a, _) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();
        canvas.viewport = Viewport {
            pan_x: 100.0,
            pan_y: 50.0,
            scale: 2.0,
        };

        // Screen (120, 70) is graph (10, 10), inside node a.
        canvas.pointer_down(&mut g, ScreenPoint::new(120.0, 70.0));
        canvas.pointer_move(&mut g, ScreenPoint::new(220.0, 170.0));
        // Pointer moved 100 screen px = 50 graph units on each axis.
        assert_eq!(g.node(&a).unwrap().position, GraphPoint::new(50.0, 50.0));
    }

    #[test]
    fn empty_canvas_click_pans() {
        let (mut g, a, _) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();

        canvas.pointer_down(&mut g, ScreenPoint::new(900.0, 900.0));
        canvas.pointer_move(&mut g, ScreenPoint::new(910.0, 880.0));
        assert_eq!(canvas.viewport.pan_x, 10.0);
        assert_eq!(canvas.viewport.pan_y, -20.0);
        assert_eq!(canvas.viewport.scale, 1.0);
        // Panning never moves nodes.
        assert_eq!(g.node(&a).unwrap().position, GraphPoint::new(0.0, 0.0));
    }

    #[test]
    fn connection_draw_completes_on_second_connector() {
        let (mut g, a, b) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();

        let start = connector(GraphPoint::new(0.0, 0.0));
        let event = canvas.pointer_down(&mut g, ScreenPoint::new(start.x, start.y));
        assert_eq!(event, CanvasEvent::ConnectionStarted(a.clone()));

        let end = connector(GraphPoint::new(400.0, 0.0));
        let event = canvas.pointer_down(&mut g, ScreenPoint::new(end.x, end.y));
        assert_eq!(
            event,
            CanvasEvent::ConnectionCompleted {
                from: a.clone(),
                to: b.clone(),
                outcome: ConnectOutcome::Connected,
            }
        );
        assert_eq!(canvas.interaction(), &Interaction::Idle);
        assert!(g.node(&b).unwrap().inputs.contains(&a));
    }

    #[test]
    fn connection_draw_aborts_on_empty_canvas() {
        let (mut g, _, b) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();

        let start = connector(GraphPoint::new(0.0, 0.0));
        canvas.pointer_down(&mut g, ScreenPoint::new(start.x, start.y));
        let event = canvas.pointer_down(&mut g, ScreenPoint::new(900.0, 900.0));
        assert_eq!(event, CanvasEvent::ConnectionCancelled);
        assert!(g.node(&b).unwrap().inputs.is_empty());
    }

    #[test]
    fn clicking_node_body_aborts_connection_draw() {
        let (mut g, _, b) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();

        let start = connector(GraphPoint::new(0.0, 0.0));
        canvas.pointer_down(&mut g, ScreenPoint::new(start.x, start.y));
        // Click node b's body (not its connector): draw aborts, no edge.
        let event = canvas.pointer_down(&mut g, ScreenPoint::new(410.0, 10.0));
        assert_eq!(event, CanvasEvent::ConnectionCancelled);
        assert!(g.node(&b).unwrap().inputs.is_empty());
    }

    #[test]
    fn template_refuses_drag_and_connect() {
        let (mut g, _, _) = graph_with_two_nodes();
        g.is_demo = true;
        let mut canvas = CanvasController::new();

        let event = canvas.pointer_down(&mut g, ScreenPoint::new(10.0, 10.0));
        assert_eq!(event, CanvasEvent::EditRefused);
        assert_eq!(canvas.interaction(), &Interaction::Idle);

        let start = connector(GraphPoint::new(0.0, 0.0));
        let event = canvas.pointer_down(&mut g, ScreenPoint::new(start.x, start.y));
        assert_eq!(event, CanvasEvent::EditRefused);
    }

    #[test]
    fn reset_restores_defaults() {
        let (mut g, _, _) = graph_with_two_nodes();
        let mut canvas = CanvasController::new();
        canvas.wheel(ScreenPoint::new(100.0, 100.0), 3.0);
        canvas.pointer_down(&mut g, ScreenPoint::new(900.0, 900.0));

        canvas.reset();
        assert_eq!(canvas.viewport, Viewport::default());
        assert_eq!(canvas.interaction(), &Interaction::Idle);
    }
}
