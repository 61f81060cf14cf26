//! Incremental reflexion analysis.
//!
//! An implementation graph is mapped onto an architecture graph. The engine
//! lifts every implementation dependency onto the architecture (counting
//! parallel contributions), compares the result against the specified
//! architecture edges, and keeps every edge's reflexion state current as
//! mappings and edges change, notifying subscribers of each transition.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod history;
pub mod observer;
pub mod propagator;
pub mod resolver;
pub mod shared;

pub use classifier::Classifier;
pub use config::{ImplicitRule, ReflexionConfig};
pub use engine::{
    EdgeSpec, EngineState, MutationReport, ReflexionEngine, ReflexionSummary, MAPPING_EDGE_KIND,
};
pub use error::{ElementId, MappingError, ReflexionError};
pub use event::{ChangeEvent, EdgeAction, EdgeRef, StateChange};
pub use history::{HistoryError, MappingCommand, MappingHistory};
pub use observer::{EventLog, ObserverRegistry, ReflexionObserver, SubscriptionId};
pub use propagator::{PropagatedEntry, PropagationKey, PropagationTable};
pub use resolver::{mapping_origin, project, resolve_mapping};
pub use shared::SharedEngine;
