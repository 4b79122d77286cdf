use serde::{Deserialize, Serialize};

use super::ids::{EdgeId, IdAllocator, NodeId};
use super::view::Point;

/// Fractional anchor of a node box that sits on its position: center-top.
pub const DEFAULT_NODE_ORIGIN: [f32; 2] = [0.5, 0.0];
/// Width and height of a node box in canvas units.
pub const NODE_SIZE: (f32, f32) = (150.0, 40.0);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Input,
    Default,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub position: Point,
    pub label: String,
    pub origin: [f32; 2],
    #[serde(default)]
    pub selected: bool,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, position: Point, label: impl Into<String>) -> Self {
        Self { id, kind, position, label: label.into(), origin: DEFAULT_NODE_ORIGIN, selected: false }
    }

    /// Top-left corner of the node box once the origin offset is applied.
    pub fn top_left(&self) -> Point {
        Point::new(
            self.position.x - self.origin[0] * NODE_SIZE.0,
            self.position.y - self.origin[1] * NODE_SIZE.1,
        )
    }

    /// Where incoming edges attach: top edge, horizontally centered.
    pub fn target_anchor(&self) -> Point {
        let tl = self.top_left();
        Point::new(tl.x + NODE_SIZE.0 * 0.5, tl.y)
    }

    /// Where outgoing edges leave: bottom edge, horizontally centered.
    pub fn source_anchor(&self) -> Point {
        let tl = self.top_left();
        Point::new(tl.x + NODE_SIZE.0 * 0.5, tl.y + NODE_SIZE.1)
    }

    pub fn contains(&self, p: Point) -> bool {
        let tl = self.top_left();
        p.x >= tl.x && p.x <= tl.x + NODE_SIZE.0 && p.y >= tl.y && p.y <= tl.y + NODE_SIZE.1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub selected: bool,
}

/// Payload of an ordinary connect gesture that ended on a valid target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectParams {
    pub source: NodeId,
    pub target: NodeId,
}

/// Deltas reported by the canvas for nodes. Applied as-is.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeChange {
    Position { id: NodeId, position: Point },
    Select { id: NodeId, selected: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum EdgeChange {
    Select { id: EdgeId, selected: bool },
}

/// Nodes and edges of the diagram, kept in insertion order (which is also the
/// draw order). Nothing is ever removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphState {
    // Instantiate a new, empty graph
    pub fn new() -> Self {
        GraphState { nodes: Vec::new(), edges: Vec::new() }
    }

    /// Startup graph: a single input node `"0"` at (0, 50).
    pub fn initial() -> Self {
        let mut g = Self::new();
        g.add_node(Node::new(NodeId::from("0"), NodeKind::Input, Point::new(0.0, 50.0), "Node"));
        g
    }

    pub fn nodes(&self) -> &[Node] { &self.nodes }
    pub fn edges(&self) -> &[Edge] { &self.edges }
    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn edge_count(&self) -> usize { self.edges.len() }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool { self.node(id).is_some() }

    /// Ordinary connect path. Returns the new edge id, or `None` when an
    /// endpoint is missing or the same source/target pair is already linked.
    pub fn connect(&mut self, params: ConnectParams, ids: &mut IdAllocator) -> Option<EdgeId> {
        if !self.contains_node(&params.source) || !self.contains_node(&params.target) {
            return None;
        }
        let exists = self
            .edges
            .iter()
            .any(|e| e.source == params.source && e.target == params.target);
        if exists {
            return None;
        }
        let id = ids.next_edge_id();
        self.add_edge(Edge { id: id.clone(), source: params.source, target: params.target, selected: false });
        Some(id)
    }

    pub fn apply_node_changes(&mut self, changes: impl IntoIterator<Item = NodeChange>) {
        for change in changes {
            match change {
                NodeChange::Position { id, position } => {
                    if let Some(n) = self.nodes.iter_mut().find(|n| n.id == id) {
                        n.position = position;
                    }
                }
                NodeChange::Select { id, selected } => {
                    if let Some(n) = self.nodes.iter_mut().find(|n| n.id == id) {
                        n.selected = selected;
                    }
                }
            }
        }
    }

    pub fn apply_edge_changes(&mut self, changes: impl IntoIterator<Item = EdgeChange>) {
        for change in changes {
            match change {
                EdgeChange::Select { id, selected } => {
                    if let Some(e) = self.edges.iter_mut().find(|e| e.id == id) {
                        e.selected = selected;
                    }
                }
            }
        }
    }

    /// Topmost node whose box contains `p` (canvas space). Later nodes are
    /// drawn above earlier ones, so they win overlaps.
    pub fn node_at(&self, p: Point) -> Option<&Node> {
        self.nodes.iter().rev().find(|n| n.contains(p))
    }

    /// Center of the bounding box of all nodes, if any.
    pub fn bounds_center(&self) -> Option<Point> {
        let first = self.nodes.first()?;
        let (mut min, mut max) = (first.top_left(), first.top_left());
        for n in &self.nodes {
            let tl = n.top_left();
            min.x = min.x.min(tl.x);
            min.y = min.y.min(tl.y);
            max.x = max.x.max(tl.x + NODE_SIZE.0);
            max.y = max.y.max(tl.y + NODE_SIZE.1);
        }
        Some(Point::new((min.x + max.x) * 0.5, (min.y + max.y) * 0.5))
    }
}
