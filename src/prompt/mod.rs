pub mod error;
pub mod generation;
pub mod history;
pub mod pipeline;
pub mod store;
