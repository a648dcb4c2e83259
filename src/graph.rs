use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::registry;
use crate::types::{GraphPoint, NewGraph, ParamMap, ParamValue};

/// Id prefix reserved for templates compiled into the client.
pub const TEMPLATE_ID_PREFIX: &str = "demo-";

/// Tag attached to graphs materialized from a template.
pub const USER_CREATED_TAG: &str = "user-created";

/// A placed block instance inside one strategy graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub params: ParamMap,
    pub position: GraphPoint,
    /// Upstream dependencies. Order is insignificant for execution but is
    /// preserved for deterministic re-serialization.
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// Outcome of a connection attempt. Rejections are invariant enforcement,
/// not errors: callers may surface them as a notice but never as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    SelfLoop,
    WouldCycle,
    AlreadyConnected,
    ReadOnly,
    UnknownNode,
}

impl ConnectOutcome {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectOutcome::Connected)
    }
}

/// The strategy: a named, versioned collection of nodes plus the declared
/// set of output nodes. Single source of truth consulted by persistence and
/// the run orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyGraph {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_demo: bool,
    /// Changed since the last successful persisted write.
    #[serde(skip)]
    dirty: bool,
}

impl StrategyGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            outputs: Vec::new(),
            version: 1,
            tags: Vec::new(),
            is_demo: false,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Called by the persistence controller after a successful write.
    pub fn mark_clean(&mut self, version: u64) {
        self.version = version;
        self.dirty = false;
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    /// Fresh node id, unique against everything currently in the graph and
    /// stable across load/save cycles (always exceeds existing suffixes).
    fn fresh_node_id(&self) -> String {
        let max = self
            .nodes
            .iter()
            .filter_map(|node| node.id.strip_prefix('n'))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("n{}", max + 1)
    }

    /// Place a new block instance with its registry defaults. Never fails;
    /// an unregistered block type id is a programming bug.
    pub fn add_node(&mut self, block_type_id: &str, position: GraphPoint) -> &Node {
        let params = registry::default_params(block_type_id)
            .unwrap_or_else(|| panic!("unregistered block type: {block_type_id}"));
        let id = self.fresh_node_id();
        tracing::debug!(graph = %self.id, node = %id, block = block_type_id, "add node");
        self.nodes.push(Node {
            id,
            block_type: block_type_id.to_string(),
            params,
            position,
            inputs: Vec::new(),
        });
        self.dirty = true;
        self.nodes.last().expect("node just pushed")
    }

    /// Remove a node and every reference to it, so no dangling input or
    /// output ids can exist in the persisted model even transiently.
    pub fn remove_node(&mut self, node_id: &str) {
        let before = self.nodes.len();
        self.nodes.retain(|node| node.id != node_id);
        if self.nodes.len() == before {
            return;
        }
        for node in &mut self.nodes {
            node.inputs.retain(|input| input != node_id);
        }
        self.outputs.retain(|output| output != node_id);
        self.dirty = true;
        tracing::debug!(graph = %self.id, node = node_id, "remove node");
    }

    /// Pure parameter mutation; no schema validation. Invalid combinations
    /// surface at execution time through run failure.
    pub fn set_param(&mut self, node_id: &str, key: &str, value: impl Into<ParamValue>) {
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == node_id) {
            node.params.insert(key.to_string(), value.into());
            self.dirty = true;
        }
    }

    /// Add `from` to `to`'s input set, refusing self-loops, duplicate edges,
    /// anything that would make a node transitively reach itself, and any
    /// mutation of a template.
    pub fn connect(&mut self, from: &str, to: &str) -> ConnectOutcome {
        if self.is_demo {
            return ConnectOutcome::ReadOnly;
        }
        if from == to {
            return ConnectOutcome::SelfLoop;
        }
        if self.node(from).is_none() || self.node(to).is_none() {
            return ConnectOutcome::UnknownNode;
        }
        let target = self.node(to).expect("checked above");
        if target.inputs.iter().any(|input| input == from) {
            return ConnectOutcome::AlreadyConnected;
        }
        if self.reaches(from, to) {
            return ConnectOutcome::WouldCycle;
        }
        let target = self.node_mut(to).expect("checked above");
        target.inputs.push(from.to_string());
        self.dirty = true;
        tracing::debug!(graph = %self.id, from, to, "connect");
        ConnectOutcome::Connected
    }

    /// Remove one input edge.
    pub fn disconnect(&mut self, node_id: &str, input_id: &str) {
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == node_id) {
            let before = node.inputs.len();
            node.inputs.retain(|input| input != input_id);
            if node.inputs.len() != before {
                self.dirty = true;
            }
        }
    }

    /// True when `target` is reachable from `start` by walking input edges.
    /// Iterative DFS with a visited set; pure function of the current edge
    /// set, bounded by the node count.
    fn reaches(&self, start: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.node(current) {
                stack.extend(node.inputs.iter().map(String::as_str));
            }
        }
        false
    }

    /// Position update. Dirty for persistence, but not a structural change.
    pub fn move_node(&mut self, node_id: &str, position: GraphPoint) {
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == node_id) {
            node.position = position;
            self.dirty = true;
        }
    }

    /// Declare a node as one of the graph's terminal outputs.
    pub fn set_output(&mut self, node_id: &str) {
        if self.node(node_id).is_some() && !self.outputs.iter().any(|output| output == node_id) {
            self.outputs.push(node_id.to_string());
            self.dirty = true;
        }
    }

    pub fn clear_output(&mut self, node_id: &str) {
        let before = self.outputs.len();
        self.outputs.retain(|output| output != node_id);
        if self.outputs.len() != before {
            self.dirty = true;
        }
    }

    /// Node list in original insertion order, used both for persistence
    /// payloads and for execution submission.
    pub fn serialize_nodes(&self) -> serde_json::Value {
        serde_json::to_value(&self.nodes).expect("node list is always serializable")
    }

    /// Payload for the independent user copy a template submission creates.
    /// The template itself is never executed against mutable state.
    pub fn materialize_copy(&self) -> NewGraph {
        let mut tags = self.tags.clone();
        if !tags.iter().any(|tag| tag == USER_CREATED_TAG) {
            tags.push(USER_CREATED_TAG.to_string());
        }
        NewGraph {
            name: format!("{} (copy)", self.name),
            description: self.description.clone(),
            nodes: self.serialize_nodes(),
            outputs: self.outputs.clone(),
            tags,
        }
    }
}
