//! Change tracker: applies actions to the document and keeps undo/redo.
//!
//! Actions are applied as they arrive and collected into an open *packet*.
//! Completing the packet turns it into one undo step stamped with a fresh
//! [`ChangeId`]. If any action in a packet fails, everything the packet
//! already applied is reverted and the packet is dropped, so a batch
//! either lands whole or not at all.
//!
//! An *updateable* change (a drag, a brush stroke) is applied temporarily
//! and re-applied on every update; only its final state joins the packet.

use crate::action::Action;
use pixgraph_core::{ChangeId, ChangeInfo, ConcurrencyError, Document, DocumentError};

/// One undo (or redo) step.
#[derive(Debug, Clone)]
struct Step<A> {
    id: ChangeId,
    /// Actions that produce this step's state, in application order.
    forward: Vec<A>,
    /// Inverse of each forward action, in application order. Empty on the
    /// redo stack, where it is recomputed on redo.
    inverse: Vec<A>,
}

#[derive(Debug, Clone)]
struct Packet<A> {
    forward: Vec<A>,
    inverse: Vec<A>,
}

impl<A> Default for Packet<A> {
    fn default() -> Self {
        Self {
            forward: Vec::new(),
            inverse: Vec::new(),
        }
    }
}

/// A committed undo step, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub id: ChangeId,
    /// Whether the packet was folded into the previous step.
    pub merged: bool,
    /// Number of actions in the step.
    pub actions: usize,
}

#[derive(Debug)]
pub struct ChangeTracker<A> {
    undo_stack: Vec<Step<A>>,
    redo_stack: Vec<Step<A>>,
    max_depth: usize,
    packet: Option<Packet<A>>,
    /// The updateable change currently applied to the document: the last
    /// applied action and its inverse.
    updateable: Option<(A, A)>,
    /// Stamp of the state below the bottom of the undo stack.
    base: ChangeId,
}

impl<A: Action> ChangeTracker<A> {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::with_capacity(max_depth.min(256)),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
            packet: None,
            updateable: None,
            base: ChangeId::new(),
        }
    }

    /// Stamp of the document's current state.
    pub fn current_change_id(&self) -> ChangeId {
        self.undo_stack.last().map_or(self.base, |s| s.id)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn is_updateable_active(&self) -> bool {
        self.updateable.is_some()
    }

    /// Whether a packet holds applied but uncommitted actions.
    pub fn has_open_packet(&self) -> bool {
        self.packet.as_ref().is_some_and(|p| !p.forward.is_empty())
    }

    /// Label of the step `undo` would revert.
    pub fn undo_label(&self) -> Option<&'static str> {
        self.undo_stack.last()?.forward.last().map(A::label)
    }

    // ─── Applying ────────────────────────────────────────────────────────

    /// Apply `action` permanently as part of the open packet.
    pub fn make(&mut self, document: &mut Document, action: A) -> Result<Vec<ChangeInfo>, DocumentError> {
        if self.updateable.is_some() {
            return Err(ConcurrencyError::UpdateableChangeActive.into());
        }
        match action.apply(document) {
            Ok(applied) => {
                let packet = self.packet.get_or_insert_with(Packet::default);
                packet.forward.push(action);
                packet.inverse.push(applied.inverse);
                Ok(applied.changes)
            }
            Err(err) => {
                self.abort_packet(document)?;
                Err(err)
            }
        }
    }

    /// Apply `action` temporarily, replacing the previous temporary state.
    pub fn start_or_update(
        &mut self,
        document: &mut Document,
        action: A,
    ) -> Result<Vec<ChangeInfo>, DocumentError> {
        let mut changes = Vec::new();
        if let Some((_, inverse)) = self.updateable.take() {
            changes.extend(inverse.apply(document)?.changes);
        }
        match action.apply(document) {
            Ok(applied) => {
                changes.extend(applied.changes);
                self.updateable = Some((action, applied.inverse));
                Ok(changes)
            }
            Err(err) => {
                self.abort_packet(document)?;
                Err(err)
            }
        }
    }

    /// Make the current updateable change permanent in the open packet.
    pub fn end_updateable(&mut self) -> Result<(), DocumentError> {
        let (action, inverse) = self
            .updateable
            .take()
            .ok_or(ConcurrencyError::NoActiveChange)?;
        let packet = self.packet.get_or_insert_with(Packet::default);
        packet.forward.push(action);
        packet.inverse.push(inverse);
        Ok(())
    }

    /// Revert the updateable change without recording it.
    pub fn cancel_updateable(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, DocumentError> {
        let (_, inverse) = self
            .updateable
            .take()
            .ok_or(ConcurrencyError::NoActiveChange)?;
        Ok(inverse.apply(document)?.changes)
    }

    /// Close the open packet. An empty packet commits nothing.
    pub fn complete_packet(&mut self) -> Option<Commit> {
        let packet = self.packet.take()?;
        if packet.forward.is_empty() {
            return None;
        }
        let id = ChangeId::new();
        let actions = packet.forward.len();
        self.redo_stack.clear();

        if self.should_merge(&packet)
            && let Some(prev) = self.undo_stack.last_mut()
        {
            prev.forward.extend(packet.forward);
            prev.inverse.extend(packet.inverse);
            prev.id = id;
            log::debug!("merged change {id} into previous step");
            return Some(Commit {
                id,
                merged: true,
                actions: prev.forward.len(),
            });
        }

        self.undo_stack.push(Step {
            id,
            forward: packet.forward,
            inverse: packet.inverse,
        });
        if self.undo_stack.len() > self.max_depth {
            let dropped = self.undo_stack.remove(0);
            self.base = dropped.id;
        }
        log::debug!("committed change {id} ({actions} actions)");
        Some(Commit {
            id,
            merged: false,
            actions,
        })
    }

    /// A single-action packet merges into the previous step when every
    /// action there chains with the next and the last chains with it.
    fn should_merge(&self, packet: &Packet<A>) -> bool {
        let [action] = packet.forward.as_slice() else {
            return false;
        };
        let Some(prev) = self.undo_stack.last() else {
            return false;
        };
        let chained = prev.forward.windows(2).all(|w| w[0].is_mergeable_with(&w[1]));
        chained && prev.forward.last().is_some_and(|last| last.is_mergeable_with(action))
    }

    /// Revert everything the open packet applied and drop it.
    fn abort_packet(&mut self, document: &mut Document) -> Result<(), DocumentError> {
        let mut inverses = Vec::new();
        if let Some((_, inverse)) = self.updateable.take() {
            inverses.push(inverse);
        }
        if let Some(packet) = self.packet.take() {
            inverses.extend(packet.inverse.into_iter().rev());
        }
        if inverses.is_empty() {
            return Ok(());
        }
        log::warn!("batch rejected; reverting {} applied actions", inverses.len());
        for inverse in inverses {
            inverse
                .apply(document)
                .map_err(|err| DocumentError::CorruptedState(format!("rollback failed: {err}")))?;
        }
        Ok(())
    }

    // ─── Undo / redo ─────────────────────────────────────────────────────

    fn ensure_idle(&self) -> Result<(), DocumentError> {
        if self.updateable.is_some() {
            return Err(ConcurrencyError::UpdateableChangeActive.into());
        }
        if self.has_open_packet() {
            return Err(ConcurrencyError::ChangeBlockActive.into());
        }
        Ok(())
    }

    /// Revert the most recent step. `Ok(None)` when there is nothing to
    /// undo.
    pub fn undo(&mut self, document: &mut Document) -> Result<Option<(ChangeId, Vec<ChangeInfo>)>, DocumentError> {
        self.ensure_idle()?;
        let Some(step) = self.undo_stack.pop() else {
            return Ok(None);
        };
        match apply_all(document, step.inverse.iter().rev()) {
            Ok((mut redo, changes)) => {
                redo.reverse();
                log::debug!("undo {}", step.id);
                let id = step.id;
                self.redo_stack.push(Step {
                    id,
                    forward: redo,
                    inverse: Vec::new(),
                });
                Ok(Some((id, changes)))
            }
            Err(err) => {
                self.undo_stack.push(step);
                Err(err)
            }
        }
    }

    /// Re-apply the most recently undone step.
    pub fn redo(&mut self, document: &mut Document) -> Result<Option<(ChangeId, Vec<ChangeInfo>)>, DocumentError> {
        self.ensure_idle()?;
        let Some(step) = self.redo_stack.pop() else {
            return Ok(None);
        };
        match apply_all(document, step.forward.iter()) {
            Ok((inverse, changes)) => {
                log::debug!("redo {}", step.id);
                let id = step.id;
                self.undo_stack.push(Step {
                    id,
                    forward: step.forward,
                    inverse,
                });
                Ok(Some((id, changes)))
            }
            Err(err) => {
                self.redo_stack.push(step);
                Err(err)
            }
        }
    }

    /// Forget all recorded steps. The current stamp is kept so save state
    /// does not change.
    pub fn delete_recorded_changes(&mut self) -> Result<(), DocumentError> {
        self.ensure_idle()?;
        self.base = self.current_change_id();
        self.undo_stack.clear();
        self.redo_stack.clear();
        Ok(())
    }
}

/// Apply actions in order, collecting inverses. On failure the applied
/// prefix is reverted and the document is left as it was.
fn apply_all<'a, A, I>(document: &mut Document, actions: I) -> Result<(Vec<A>, Vec<ChangeInfo>), DocumentError>
where
    A: Action + 'a,
    I: Iterator<Item = &'a A>,
{
    let mut inverses = Vec::new();
    let mut changes = Vec::new();
    for action in actions {
        match action.apply(document) {
            Ok(applied) => {
                inverses.push(applied.inverse);
                changes.extend(applied.changes);
            }
            Err(err) => {
                for inverse in inverses.iter().rev() {
                    inverse
                        .apply(document)
                        .map_err(|e| DocumentError::CorruptedState(format!("rollback failed: {e}")))?;
                }
                return Err(err);
            }
        }
    }
    Ok((inverses, changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DocumentAction;
    use pixgraph_core::{EditorConfig, Node, NodeId, NodeKind, PropName, PropertyValue, VecD, props};
    use pretty_assertions::assert_eq;

    fn setup() -> (Document, ChangeTracker<DocumentAction>) {
        (Document::from_config(&EditorConfig::default()), ChangeTracker::new(100))
    }

    fn create_layer(doc: &mut Document, tracker: &mut ChangeTracker<DocumentAction>) -> NodeId {
        let node = Node::new(NodeKind::ImageLayer);
        let id = node.id;
        tracker
            .make(
                doc,
                DocumentAction::CreateNodes {
                    nodes: vec![node],
                    connections: vec![],
                },
            )
            .unwrap();
        tracker.complete_packet().unwrap();
        id
    }

    fn rename(id: NodeId, name: &str) -> DocumentAction {
        DocumentAction::RenameNode {
            node: id,
            name: name.into(),
        }
    }

    fn move_to(id: NodeId, x: f64) -> DocumentAction {
        DocumentAction::SetNodePositions {
            positions: vec![(id, VecD::new(x, 0.0))],
        }
    }

    #[test]
    fn undo_redo_single_step() {
        let (mut doc, mut tracker) = setup();
        let id = create_layer(&mut doc, &mut tracker);
        tracker.make(&mut doc, rename(id, "Sky")).unwrap();
        tracker.complete_packet().unwrap();

        tracker.undo(&mut doc).unwrap();
        assert_eq!(doc.graph.node(id).unwrap().name, "Layer");
        tracker.redo(&mut doc).unwrap();
        assert_eq!(doc.graph.node(id).unwrap().name, "Sky");
    }

    #[test]
    fn empty_packet_commits_nothing() {
        let (_, mut tracker) = setup();
        let before = tracker.current_change_id();
        assert_eq!(tracker.complete_packet(), None);
        assert_eq!(tracker.current_change_id(), before);
        assert!(!tracker.can_undo());
    }

    #[test]
    fn failed_action_rejects_whole_packet() {
        let (mut doc, mut tracker) = setup();
        let id = create_layer(&mut doc, &mut tracker);
        let stamp = tracker.current_change_id();
        let before = doc.snapshot();

        tracker.make(&mut doc, rename(id, "changed")).unwrap();
        let err = tracker.make(&mut doc, rename(NodeId::new(), "ghost"));
        assert!(err.is_err());
        assert_eq!(tracker.complete_packet(), None);
        assert_eq!(tracker.current_change_id(), stamp);
        assert_eq!(doc.snapshot(), before);
    }

    #[test]
    fn new_change_clears_redo() {
        let (mut doc, mut tracker) = setup();
        create_layer(&mut doc, &mut tracker);
        tracker.undo(&mut doc).unwrap();
        assert!(tracker.can_redo());
        create_layer(&mut doc, &mut tracker);
        assert!(!tracker.can_redo());
    }

    #[test]
    fn max_depth_trims_oldest() {
        let mut doc = Document::from_config(&EditorConfig::default());
        let mut tracker = ChangeTracker::new(3);
        let id = create_layer(&mut doc, &mut tracker);
        for i in 0..5 {
            tracker.make(&mut doc, rename(id, &format!("n{i}"))).unwrap();
            tracker.complete_packet();
        }
        assert_eq!(tracker.undo_depth(), 3);
        while tracker.undo(&mut doc).unwrap().is_some() {}
        assert_eq!(doc.graph.node(id).unwrap().name, "n1");
    }

    #[test]
    fn stamps_follow_undo_and_redo() {
        let (mut doc, mut tracker) = setup();
        let initial = tracker.current_change_id();
        create_layer(&mut doc, &mut tracker);
        let first = tracker.current_change_id();
        assert_ne!(first, initial);

        tracker.undo(&mut doc).unwrap();
        assert_eq!(tracker.current_change_id(), initial);
        tracker.redo(&mut doc).unwrap();
        assert_eq!(tracker.current_change_id(), first);

        tracker.delete_recorded_changes().unwrap();
        assert_eq!(tracker.current_change_id(), first);
        assert!(!tracker.can_undo());
    }

    #[test]
    fn updateable_change_commits_final_state_once() {
        let (mut doc, mut tracker) = setup();
        let id = create_layer(&mut doc, &mut tracker);
        let depth = tracker.undo_depth();

        for x in [1.0, 2.0, 3.0] {
            tracker.start_or_update(&mut doc, move_to(id, x)).unwrap();
        }
        assert!(matches!(
            tracker.make(&mut doc, rename(id, "x")),
            Err(DocumentError::Concurrency(ConcurrencyError::UpdateableChangeActive))
        ));
        assert!(matches!(
            tracker.undo(&mut doc),
            Err(DocumentError::Concurrency(ConcurrencyError::UpdateableChangeActive))
        ));

        tracker.end_updateable().unwrap();
        tracker.complete_packet().unwrap();
        assert_eq!(tracker.undo_depth(), depth + 1);
        assert_eq!(doc.graph.node(id).unwrap().position, VecD::new(3.0, 0.0));

        tracker.undo(&mut doc).unwrap();
        assert_eq!(doc.graph.node(id).unwrap().position, VecD::default());
    }

    #[test]
    fn cancelled_updateable_leaves_no_trace() {
        let (mut doc, mut tracker) = setup();
        let id = create_layer(&mut doc, &mut tracker);
        let before = doc.snapshot();
        tracker.start_or_update(&mut doc, move_to(id, 9.0)).unwrap();
        tracker.cancel_updateable(&mut doc).unwrap();
        assert_eq!(doc.snapshot(), before);
        assert_eq!(tracker.complete_packet(), None);
        assert!(matches!(
            tracker.end_updateable(),
            Err(DocumentError::Concurrency(ConcurrencyError::NoActiveChange))
        ));
    }

    #[test]
    fn mergeable_single_actions_fold_into_previous_step() {
        let (mut doc, mut tracker) = setup();
        let id = create_layer(&mut doc, &mut tracker);
        let opacity = PropName::intern(props::OPACITY);
        for v in [0.9, 0.8, 0.7] {
            tracker
                .make(
                    &mut doc,
                    DocumentAction::SetPropertyValue {
                        node: id,
                        name: opacity,
                        value: PropertyValue::Float(v),
                    },
                )
                .unwrap();
            tracker.complete_packet();
        }
        // Create + one merged opacity step.
        assert_eq!(tracker.undo_depth(), 2);
        tracker.undo(&mut doc).unwrap();
        assert_eq!(doc.graph.node(id).unwrap().opacity(), 1.0);
    }

    #[test]
    fn undo_refused_while_packet_open() {
        let (mut doc, mut tracker) = setup();
        let id = create_layer(&mut doc, &mut tracker);
        tracker.make(&mut doc, rename(id, "open")).unwrap();
        assert!(matches!(
            tracker.undo(&mut doc),
            Err(DocumentError::Concurrency(ConcurrencyError::ChangeBlockActive))
        ));
    }
}
