//! Engine configuration.
//!
//! Hosts typically embed the configuration in their own settings file and
//! hand the JSON fragment to [`ReflexionConfig::from_json`]. Missing fields
//! fall back to [`ReflexionConfig::default`].

use serde::{Deserialize, Serialize};

use crate::error::ReflexionError;

/// When a propagated edge without an exactly matching specified edge still
/// counts as permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplicitRule {
    /// Every unmatched propagated edge is divergent.
    Disabled,
    /// A component may depend on itself.
    SameComponent,
    /// A component may depend on itself and on any enclosing component.
    #[default]
    Enclosing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflexionConfig {
    pub implicit_rule: ImplicitRule,
    /// Re-derive all projections and states after every mutation and fail
    /// the mutation on any disagreement. Costs a full pass per edit, so it is
    /// off unless a host or test opts in.
    pub verify_after_mutation: bool,
}

impl ReflexionConfig {
    pub fn from_json(json: &str) -> Result<Self, ReflexionError> {
        Ok(serde_json::from_str(json)?)
    }
}
