pub mod attributes;
pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod state;

// Re-export commonly used types
pub use attributes::Attributes;
pub use edge::{Edge, EdgeOrigin, Subgraph};
pub use error::CoreError;
pub use graph::ReflexionGraph;
pub use id::{EdgeId, NodeId};
pub use node::{Domain, Node};
pub use state::{EdgeState, PropagationState, SpecifiedState};
