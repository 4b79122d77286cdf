pub mod edge_drop;
pub mod graph;
pub mod ids;
pub mod view;
