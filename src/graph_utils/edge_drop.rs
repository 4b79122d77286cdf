use super::graph::{Edge, GraphState, Node, NodeKind};
use super::ids::{EdgeId, IdAllocator, NodeId};
use super::view::{PointerEvent, ViewTransform};

/// How a connection drag ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    /// True when the drag ended over a legitimate target handle or node.
    pub is_valid: bool,
    pub from_node: NodeId,
}

/// What a drop created, if anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DropOutcome {
    pub node: NodeId,
    pub edge: EdgeId,
}

/// Handle the end of a connection drag.
///
/// A valid termination is left to the ordinary connect path. Otherwise one id
/// is allocated and used for both a new node placed under the pointer and the
/// edge linking the origin node to it. Node and edge ids live in separate
/// collections, so sharing the value is fine.
pub fn on_connect_end(
    graph: &mut GraphState,
    ids: &mut IdAllocator,
    view: &ViewTransform,
    event: &PointerEvent,
    connection: &ConnectionState,
) -> Option<DropOutcome> {
    if connection.is_valid {
        return None;
    }
    let raw = ids.next_id();
    let node_id = NodeId::new(raw.as_str());
    let edge_id = EdgeId::new(raw.as_str());
    let position = view.event_to_canvas(event);

    graph.add_node(Node::new(node_id.clone(), NodeKind::Default, position, format!("Node {}", raw)));
    graph.add_edge(Edge {
        id: edge_id.clone(),
        source: connection.from_node.clone(),
        target: node_id.clone(),
        selected: false,
    });
    log::debug!("edge drop from {} created node {} at ({:.1}, {:.1})", connection.from_node, node_id, position.x, position.y);
    Some(DropOutcome { node: node_id, edge: edge_id })
}
