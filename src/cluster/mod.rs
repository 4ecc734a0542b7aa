//! Coordinator and node processes.

pub mod bootstrap;
pub mod node;

pub use bootstrap::CoordinatorService;
pub use node::NodeService;
