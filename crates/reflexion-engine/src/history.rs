//! Mapping edit history for undo/redo collaborators.
//!
//! [`MappingCommand`] is a reversible mapping edit. Each variant records the
//! mapping it replaced so its inverse can restore it. [`MappingHistory`]
//! executes edits through the engine and keeps linear undo and redo stacks.
//! The engine itself knows nothing about history.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use reflexion_core::NodeId;

use crate::engine::ReflexionEngine;
use crate::error::ReflexionError;

/// A reversible mapping edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MappingCommand {
    /// `node` was mapped onto `target`, replacing `previous` if any.
    Map {
        node: NodeId,
        previous: Option<NodeId>,
        target: NodeId,
    },
    /// The explicit mapping `node -> previous` was removed.
    Unmap { node: NodeId, previous: NodeId },
    /// Commands applied all-or-nothing.
    Batch {
        commands: Vec<MappingCommand>,
        description: String,
    },
}

impl MappingCommand {
    /// Returns the command that undoes this one. Batches are inverted in
    /// LIFO order.
    pub fn inverse(&self) -> MappingCommand {
        match self {
            MappingCommand::Map {
                node,
                previous: None,
                target,
            } => MappingCommand::Unmap {
                node: *node,
                previous: *target,
            },
            MappingCommand::Map {
                node,
                previous: Some(previous),
                target,
            } => MappingCommand::Map {
                node: *node,
                previous: Some(*target),
                target: *previous,
            },
            MappingCommand::Unmap { node, previous } => MappingCommand::Map {
                node: *node,
                previous: None,
                target: *previous,
            },
            MappingCommand::Batch {
                commands,
                description,
            } => MappingCommand::Batch {
                commands: commands.iter().rev().map(|c| c.inverse()).collect(),
                description: format!("undo: {}", description),
            },
        }
    }

    /// Applies the command to `engine`. A failing batch rolls back the
    /// commands it already applied before returning the error.
    pub fn apply(&self, engine: &mut ReflexionEngine) -> Result<(), ReflexionError> {
        match self {
            MappingCommand::Map { node, target, .. } => {
                engine.add_mapping(*node, *target)?;
            }
            MappingCommand::Unmap { node, .. } => {
                engine.remove_mapping(*node)?;
            }
            MappingCommand::Batch { commands, .. } => apply_all(commands, engine)?,
        }
        Ok(())
    }
}

fn apply_all(
    commands: &[MappingCommand],
    engine: &mut ReflexionEngine,
) -> Result<(), ReflexionError> {
    for (applied, command) in commands.iter().enumerate() {
        if let Err(err) = command.apply(engine) {
            rollback(&commands[..applied], engine);
            return Err(err);
        }
    }
    Ok(())
}

fn rollback(applied: &[MappingCommand], engine: &mut ReflexionEngine) {
    for command in applied.iter().rev() {
        if let Err(err) = command.inverse().apply(engine) {
            warn!(?command, error = %err, "failed to roll back mapping command");
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error(transparent)]
    Engine(#[from] ReflexionError),
}

/// Linear undo/redo over mapping edits.
///
/// Commands assume the engine's mappings are only edited through this
/// history; an edit made around it can make an inverse fail.
#[derive(Debug, Clone, Default)]
pub struct MappingHistory {
    undo: Vec<MappingCommand>,
    redo: Vec<MappingCommand>,
}

impl MappingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `node` onto `target` and records the edit. Re-mapping onto the
    /// current target records nothing.
    pub fn map(
        &mut self,
        engine: &mut ReflexionEngine,
        node: NodeId,
        target: NodeId,
    ) -> Result<(), HistoryError> {
        let previous = engine.graph().mapping_target(node);
        engine.add_mapping(node, target)?;
        if previous != Some(target) {
            self.record(MappingCommand::Map {
                node,
                previous,
                target,
            });
        }
        Ok(())
    }

    /// Removes the explicit mapping of `node` and records the edit.
    pub fn unmap(
        &mut self,
        engine: &mut ReflexionEngine,
        node: NodeId,
    ) -> Result<(), HistoryError> {
        let previous = engine.graph().mapping_target(node);
        engine.remove_mapping(node)?;
        if let Some(previous) = previous {
            self.record(MappingCommand::Unmap { node, previous });
        }
        Ok(())
    }

    /// Applies `edits` in order as one undoable step. `Some(target)` maps
    /// the node, `None` unmaps it. On failure the edits already applied are
    /// rolled back and nothing is recorded.
    pub fn batch(
        &mut self,
        engine: &mut ReflexionEngine,
        description: impl Into<String>,
        edits: &[(NodeId, Option<NodeId>)],
    ) -> Result<(), HistoryError> {
        let mut commands = Vec::with_capacity(edits.len());
        for &(node, target) in edits {
            let previous = engine.graph().mapping_target(node);
            let outcome = match (target, previous) {
                (Some(target), previous) => engine.add_mapping(node, target).map(|_| {
                    (previous != Some(target)).then_some(MappingCommand::Map {
                        node,
                        previous,
                        target,
                    })
                }),
                (None, previous) => engine.remove_mapping(node).map(|_| {
                    previous.map(|previous| MappingCommand::Unmap { node, previous })
                }),
            };
            match outcome {
                Ok(command) => commands.extend(command),
                Err(err) => {
                    rollback(&commands, engine);
                    return Err(err.into());
                }
            }
        }

        if !commands.is_empty() {
            self.record(MappingCommand::Batch {
                commands,
                description: description.into(),
            });
        }
        Ok(())
    }

    /// Pushes an already-applied command. Clears the redo stack.
    pub fn record(&mut self, command: MappingCommand) {
        self.undo.push(command);
        self.redo.clear();
    }

    /// Reverts the most recent command.
    pub fn undo(&mut self, engine: &mut ReflexionEngine) -> Result<MappingCommand, HistoryError> {
        let command = self.undo.pop().ok_or(HistoryError::NothingToUndo)?;
        if let Err(err) = command.inverse().apply(engine) {
            self.undo.push(command);
            return Err(err.into());
        }
        debug!(?command, "undid mapping command");
        self.redo.push(command.clone());
        Ok(command)
    }

    /// Re-applies the most recently undone command.
    pub fn redo(&mut self, engine: &mut ReflexionEngine) -> Result<MappingCommand, HistoryError> {
        let command = self.redo.pop().ok_or(HistoryError::NothingToRedo)?;
        if let Err(err) = command.apply(engine) {
            self.redo.push(command);
            return Err(err.into());
        }
        debug!(?command, "redid mapping command");
        self.undo.push(command.clone());
        Ok(command)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReflexionConfig;
    use crate::error::MappingError;
    use reflexion_core::{Domain, ReflexionGraph, Subgraph};

    struct Fixture {
        engine: ReflexionEngine,
        a: NodeId,
        b: NodeId,
        x: NodeId,
        y: NodeId,
    }

    fn fixture() -> Fixture {
        let mut graph = ReflexionGraph::new();
        let src = graph.add_node("src", Domain::Implementation, "Package", None).unwrap();
        let a = graph.add_node("a", Domain::Implementation, "Class", Some(src)).unwrap();
        let b = graph.add_node("b", Domain::Implementation, "Class", Some(src)).unwrap();
        let arch = graph.add_node("arch", Domain::Architecture, "Architecture", None).unwrap();
        let x = graph.add_node("x", Domain::Architecture, "Component", Some(arch)).unwrap();
        let y = graph.add_node("y", Domain::Architecture, "Component", Some(arch)).unwrap();
        graph.add_edge("call", a, b, "Call", Subgraph::Implementation).unwrap();

        let config = ReflexionConfig {
            verify_after_mutation: true,
            ..ReflexionConfig::default()
        };
        let mut engine = ReflexionEngine::new(graph, config);
        engine.initialize().unwrap();
        Fixture { engine, a, b, x, y }
    }

    #[test]
    fn inverse_of_map_and_unmap() {
        let (n, x, y) = (NodeId(1), NodeId(5), NodeId(6));
        let fresh = MappingCommand::Map { node: n, previous: None, target: x };
        assert_eq!(fresh.inverse(), MappingCommand::Unmap { node: n, previous: x });
        assert_eq!(fresh.inverse().inverse(), fresh);

        let remap = MappingCommand::Map { node: n, previous: Some(x), target: y };
        assert_eq!(
            remap.inverse(),
            MappingCommand::Map { node: n, previous: Some(y), target: x }
        );
    }

    #[test]
    fn batch_inverse_is_lifo() {
        let first = MappingCommand::Map { node: NodeId(1), previous: None, target: NodeId(5) };
        let second = MappingCommand::Unmap { node: NodeId(2), previous: NodeId(6) };
        let batch = MappingCommand::Batch {
            commands: vec![first.clone(), second.clone()],
            description: "regroup".into(),
        };
        match batch.inverse() {
            MappingCommand::Batch { commands, description } => {
                assert_eq!(commands, vec![second.inverse(), first.inverse()]);
                assert_eq!(description, "undo: regroup");
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn command_serializes_with_type_tag() {
        let cmd = MappingCommand::Unmap { node: NodeId(3), previous: NodeId(7) };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "Unmap");
        let back: MappingCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn undo_and_redo_restore_propagation() {
        let mut f = fixture();
        let mut history = MappingHistory::new();
        history.map(&mut f.engine, f.a, f.x).unwrap();
        history.map(&mut f.engine, f.b, f.y).unwrap();
        assert!(f.engine.propagated_edge(f.x, f.y, "Call").is_some());

        history.undo(&mut f.engine).unwrap();
        assert_eq!(f.engine.resolve(f.b), None);
        assert!(f.engine.propagation().is_empty());
        assert!(history.can_redo());

        history.redo(&mut f.engine).unwrap();
        assert!(f.engine.propagated_edge(f.x, f.y, "Call").is_some());
        assert!(!history.can_redo());
    }

    #[test]
    fn undo_of_remap_restores_previous_target() {
        let mut f = fixture();
        let mut history = MappingHistory::new();
        history.map(&mut f.engine, f.a, f.x).unwrap();
        history.map(&mut f.engine, f.a, f.y).unwrap();
        assert_eq!(f.engine.resolve(f.a), Some(f.y));

        history.undo(&mut f.engine).unwrap();
        assert_eq!(f.engine.resolve(f.a), Some(f.x));
        history.undo(&mut f.engine).unwrap();
        assert_eq!(f.engine.resolve(f.a), None);
        assert!(matches!(
            history.undo(&mut f.engine),
            Err(HistoryError::NothingToUndo)
        ));
    }

    #[test]
    fn undo_of_unmap_remaps() {
        let mut f = fixture();
        let mut history = MappingHistory::new();
        history.map(&mut f.engine, f.a, f.x).unwrap();
        history.unmap(&mut f.engine, f.a).unwrap();
        assert_eq!(f.engine.resolve(f.a), None);

        let undone = history.undo(&mut f.engine).unwrap();
        assert_eq!(undone, MappingCommand::Unmap { node: f.a, previous: f.x });
        assert_eq!(f.engine.resolve(f.a), Some(f.x));
    }

    #[test]
    fn new_record_clears_redo() {
        let mut f = fixture();
        let mut history = MappingHistory::new();
        history.map(&mut f.engine, f.a, f.x).unwrap();
        history.undo(&mut f.engine).unwrap();
        assert!(history.can_redo());

        history.map(&mut f.engine, f.b, f.y).unwrap();
        assert!(!history.can_redo());
        assert!(matches!(
            history.redo(&mut f.engine),
            Err(HistoryError::NothingToRedo)
        ));
    }

    #[test]
    fn batch_is_one_undo_step() {
        let mut f = fixture();
        let mut history = MappingHistory::new();
        history
            .batch(&mut f.engine, "map both", &[(f.a, Some(f.x)), (f.b, Some(f.y))])
            .unwrap();
        assert!(f.engine.propagated_edge(f.x, f.y, "Call").is_some());

        history.undo(&mut f.engine).unwrap();
        assert_eq!(f.engine.resolve(f.a), None);
        assert_eq!(f.engine.resolve(f.b), None);
        assert!(!history.can_undo());
    }

    #[test]
    fn failed_batch_rolls_back() {
        let mut f = fixture();
        let mut history = MappingHistory::new();
        let err = history
            .batch(&mut f.engine, "partial", &[(f.a, Some(f.x)), (f.b, None)])
            .unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Engine(ReflexionError::Mapping(MappingError::NotMapped { .. }))
        ));
        assert_eq!(f.engine.resolve(f.a), None);
        assert!(!history.can_undo());
        f.engine.verify().unwrap();
    }
}
