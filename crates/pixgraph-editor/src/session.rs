//! Document session: one open document and everything derived from it.
//!
//! The session owns the authoritative [`Document`] and is the only place
//! that mutates it. Every operation builds [`DocumentAction`]s, hands them
//! to the accumulator as a finished batch and then brings the derived
//! views up to date:
//!
//! - **Structure tree**: re-projected when a change touched nodes,
//!   connections or member properties.
//! - **Timeline**: patched from the change notifications, then re-sorted
//!   to follow the layer order.
//!
//! Observers drain [`DocumentEvent`]s after each call. Within one call the
//! events arrive as: history (`Committed`/`Undone`/`Redone`), then
//! `StructureChanged`, then `TimelineChanged`, then `SaveStateChanged`.

use crate::accumulator::{ActionAccumulator, Passthrough, Processed, Request};
use crate::action::{Action, DocumentAction};
use crate::tracker::ChangeTracker;
use pixgraph_core::{
    ChangeId, ChangeInfo, ConcurrencyError, Connection, Document, DocumentError, DocumentSnapshot,
    EditorConfig, FlipAxis, GraphError, KeyFrameData, KeyFrameId, KeyFramePayload, Member, Node,
    NodeGraph, NodeId, NodeKind, PropName, PropertyValue, RectI, ReferenceRegistry, ResizeAnchor,
    SizeI, StructureMember, StructureTree, SurfaceRef, Symmetry, Timeline, VecD, props,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

/// Notification for observers (views, renderers, autosave).
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    Committed { id: ChangeId, changes: Vec<ChangeInfo> },
    Undone { id: ChangeId, changes: Vec<ChangeInfo> },
    Redone { id: ChangeId, changes: Vec<ChangeInfo> },
    /// An interactive session changed the document; not yet committed.
    Updated { changes: Vec<ChangeInfo> },
    StructureChanged,
    TimelineChanged,
    SaveStateChanged { saved: bool },
    /// A file this node depends on changed on disk.
    ReferenceInvalidated { node: NodeId },
    Disposed,
}

/// Where a new or moved member goes in the layer tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// Topmost member of the root collection.
    Top,
    /// Directly above another member, in the same collection.
    Above(NodeId),
    /// Topmost child of a folder.
    Into(NodeId),
}

/// An input a layer chain runs through.
type Slot = (NodeId, PropName);

pub struct DocumentSession {
    config: EditorConfig,
    document: Document,
    tracker: ChangeTracker<DocumentAction>,
    accumulator: ActionAccumulator<DocumentAction>,
    structure: StructureTree,
    timeline: Timeline,
    events: VecDeque<DocumentEvent>,
    /// Changes applied since the last commit.
    uncommitted: Vec<ChangeInfo>,
    last_saved: Option<ChangeId>,
    last_autosaved: Option<ChangeId>,
}

impl DocumentSession {
    /// New empty document. It counts as unsaved until [`mark_saved`](Self::mark_saved).
    #[must_use]
    pub fn new(config: EditorConfig) -> Self {
        let document = Document::from_config(&config);
        Self::with_document(config, document)
    }

    /// Open a saved document. It starts out saved.
    pub fn open(config: EditorConfig, snapshot: DocumentSnapshot) -> Result<Self, DocumentError> {
        let document = Document::from_snapshot(snapshot)?;
        let mut session = Self::with_document(config, document);
        session.last_saved = Some(session.tracker.current_change_id());
        Ok(session)
    }

    fn with_document(config: EditorConfig, document: Document) -> Self {
        let mut structure = StructureTree::new();
        structure.update(&document.graph);
        let mut timeline = Timeline::new(&document.animation);
        timeline.rebuild(&document);
        timeline.sort_by_layers(&structure.all_layers());
        log::debug!(
            "session for document {} ({} nodes, {} members)",
            document.id(),
            document.graph.len(),
            structure.len()
        );
        Self {
            tracker: ChangeTracker::new(config.max_undo_depth),
            accumulator: ActionAccumulator::new(),
            config,
            document,
            structure,
            timeline,
            events: VecDeque::new(),
            uncommitted: Vec::new(),
            last_saved: None,
            last_autosaved: None,
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn structure(&self) -> &StructureTree {
        &self.structure
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Root members of the layer tree, topmost first.
    pub fn members(&self) -> &[Member] {
        self.structure.members()
    }

    pub fn is_disposed(&self) -> bool {
        self.document.is_disposed()
    }

    pub fn current_change_id(&self) -> ChangeId {
        self.tracker.current_change_id()
    }

    pub fn can_undo(&self) -> bool {
        self.tracker.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.tracker.can_redo()
    }

    pub fn undo_label(&self) -> Option<&'static str> {
        self.tracker.undo_label()
    }

    /// Whether an interactive session (drag, stroke) is in progress.
    pub fn is_session_active(&self) -> bool {
        self.tracker.is_updateable_active()
    }

    /// Evaluation order from the output node. Empty for a disposed
    /// document or one without an output.
    pub fn evaluation_order(&self) -> Result<Vec<NodeId>, DocumentError> {
        if self.document.is_disposed() {
            log::warn!("evaluation order requested for disposed document");
            return Ok(Vec::new());
        }
        match self.document.graph.output_node() {
            Some(output) => Ok(self.document.graph.evaluation_order(output)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Result<DocumentSnapshot, DocumentError> {
        self.document.ensure_alive()?;
        Ok(self.document.snapshot())
    }

    /// Immutable copy for render workers.
    pub fn render_snapshot(&self) -> Arc<Document> {
        Arc::new(self.document.clone())
    }

    pub fn drain_events(&mut self) -> Vec<DocumentEvent> {
        self.events.drain(..).collect()
    }

    // ─── Save state ──────────────────────────────────────────────────────

    pub fn is_saved(&self) -> bool {
        self.last_saved == Some(self.tracker.current_change_id())
    }

    pub fn is_autosaved(&self) -> bool {
        self.last_autosaved == Some(self.tracker.current_change_id())
    }

    pub fn mark_saved(&mut self) {
        let was_saved = self.is_saved();
        self.last_saved = Some(self.tracker.current_change_id());
        if !was_saved {
            self.events.push_back(DocumentEvent::SaveStateChanged { saved: true });
        }
    }

    pub fn mark_autosaved(&mut self) {
        self.last_autosaved = Some(self.tracker.current_change_id());
    }

    // ─── Layer tree ──────────────────────────────────────────────────────

    pub fn create_layer(&mut self, at: InsertAt) -> Result<NodeId, DocumentError> {
        self.insert_member(Node::new(NodeKind::ImageLayer), at)
    }

    pub fn create_vector_layer(&mut self, at: InsertAt) -> Result<NodeId, DocumentError> {
        self.insert_member(Node::new(NodeKind::VectorLayer), at)
    }

    pub fn create_folder(&mut self, at: InsertAt) -> Result<NodeId, DocumentError> {
        self.insert_member(Node::new(NodeKind::Folder), at)
    }

    fn insert_member(&mut self, node: Node, at: InsertAt) -> Result<NodeId, DocumentError> {
        self.ensure_mutable()?;
        let mut plan = Plan::new(&self.document);
        let slot = plan.slot(at)?;
        let id = plan.insert(node, slot)?;
        self.submit(plan.actions)?;
        Ok(id)
    }

    /// Delete nodes. Layers and folders leave the chain closed behind them
    /// and folders take their content along; pair nodes take their partner.
    pub fn delete_members(&mut self, ids: &[NodeId]) -> Result<(), DocumentError> {
        self.ensure_mutable()?;
        if let Some(missing) = ids.iter().find(|id| !self.document.graph.contains(**id)) {
            return Err(GraphError::NodeNotFound(*missing).into());
        }
        let mut plan = Plan::new(&self.document);
        for id in ids {
            plan.remove(*id, &self.structure)?;
        }
        self.submit(plan.actions)
    }

    pub fn move_member_above(&mut self, member: NodeId, target: NodeId) -> Result<(), DocumentError> {
        self.move_member(member, InsertAt::Above(target))
    }

    pub fn move_member(&mut self, member: NodeId, at: InsertAt) -> Result<(), DocumentError> {
        self.ensure_mutable()?;
        if !self.structure.contains(member) {
            return Err(invalid(format!("{member} is not a layer or folder in the tree")));
        }
        if matches!(at, InsertAt::Above(t) | InsertAt::Into(t) if t == member) {
            return Err(invalid("a member cannot be moved relative to itself"));
        }
        let mut plan = Plan::new(&self.document);
        plan.unlink(member)?;
        let slot = plan.slot(at)?;
        plan.link_into(member, slot)?;
        self.submit(plan.actions)
    }

    /// Replace several members with one image layer in the topmost one's
    /// place. The new layer gets a cel for every frame range the merged
    /// members had cels in.
    pub fn merge_members(&mut self, ids: &[NodeId]) -> Result<NodeId, DocumentError> {
        self.ensure_mutable()?;
        let order = self.structure.flatten();
        let mut members: Vec<(usize, NodeId)> = Vec::with_capacity(ids.len());
        for id in ids {
            let pos = order
                .iter()
                .position(|o| o == id)
                .ok_or_else(|| invalid(format!("{id} is not a layer or folder in the tree")))?;
            members.push((pos, *id));
        }
        members.sort_unstable();
        members.dedup();
        let [(_, top), ..] = members.as_slice() else {
            return Err(invalid("nothing to merge"));
        };
        if members.len() < 2 {
            return Err(invalid("merging needs at least two members"));
        }

        let name = self
            .structure
            .find(*top)
            .map(|m| m.name().to_string())
            .unwrap_or_default();
        let mut merged = Node::new(NodeKind::ImageLayer).named(name);
        let mut ranges: Vec<(i32, i32)> = members
            .iter()
            .filter_map(|(_, id)| self.document.graph.node(*id))
            .flat_map(|n| n.keyframes.iter().map(|k| (k.start, k.duration)))
            .collect();
        ranges.sort_unstable();
        ranges.dedup();
        for (start, duration) in ranges {
            merged.keyframes.push(KeyFrameData::new(
                start,
                duration,
                KeyFramePayload::Raster(SurfaceRef::full(self.document.size)),
            ));
        }

        let mut plan = Plan::new(&self.document);
        let slot = plan.slot(InsertAt::Above(*top))?;
        let id = plan.insert(merged, slot)?;
        for (_, member) in &members {
            plan.remove(*member, &self.structure)?;
        }
        self.submit(plan.actions)?;
        Ok(id)
    }

    pub fn set_member_visibility(&mut self, member: NodeId, visible: bool) -> Result<(), DocumentError> {
        self.set_property_value(member, props::IS_VISIBLE, PropertyValue::Bool(visible))
    }

    pub fn set_member_opacity(&mut self, member: NodeId, opacity: f64) -> Result<(), DocumentError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(invalid(format!("opacity {opacity} outside 0..=1")));
        }
        self.set_property_value(member, props::OPACITY, PropertyValue::Float(opacity))
    }

    /// View state only; not undoable.
    pub fn set_folder_expanded(&mut self, folder: NodeId, expanded: bool) -> bool {
        self.structure.set_expanded(folder, expanded)
    }

    // ─── Nodes and connections ───────────────────────────────────────────

    pub fn add_node(&mut self, kind: NodeKind, position: VecD) -> Result<NodeId, DocumentError> {
        let mut node = Node::new(kind);
        node.position = position;
        let id = node.id;
        self.submit(vec![DocumentAction::CreateNodes {
            nodes: vec![node],
            connections: Vec::new(),
        }])?;
        Ok(id)
    }

    /// Add a zone start/end pair.
    pub fn add_zone(&mut self, position: VecD) -> Result<(NodeId, NodeId), DocumentError> {
        let (mut start, mut end) = Node::new_zone_pair();
        start.position = position;
        end.position = VecD::new(position.x + 200.0, position.y);
        let ids = (start.id, end.id);
        self.submit(vec![DocumentAction::CreateNodes {
            nodes: vec![start, end],
            connections: Vec::new(),
        }])?;
        Ok(ids)
    }

    pub fn rename_node(&mut self, node: NodeId, name: impl Into<String>) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::RenameNode {
            node,
            name: name.into(),
        }])
    }

    pub fn set_property_value(
        &mut self,
        node: NodeId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetPropertyValue {
            node,
            name: PropName::intern(name),
            value,
        }])
    }

    pub fn move_nodes(&mut self, positions: Vec<(NodeId, VecD)>) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetNodePositions { positions }])
    }

    /// Connect, replacing whatever fed the input before.
    pub fn connect(&mut self, connection: Connection) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::Connect(connection)])
    }

    pub fn disconnect(&mut self, to: NodeId, input: &str) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::Disconnect {
            to,
            input: PropName::intern(input),
        }])
    }

    // ─── Canvas ──────────────────────────────────────────────────────────

    pub fn resize_canvas(&mut self, size: SizeI, anchor: ResizeAnchor) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::ResizeCanvas { size, anchor }])
    }

    pub fn resize_image(&mut self, size: SizeI) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::ResizeImage { size }])
    }

    pub fn flip(&mut self, axis: FlipAxis) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::Flip { axis }])
    }

    /// Rotate clockwise by `quarter_turns` (1 to 3).
    pub fn rotate(&mut self, quarter_turns: u8) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::Rotate { quarter_turns }])
    }

    pub fn set_selection(&mut self, selection: Option<RectI>) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetSelection(selection)])
    }

    pub fn set_symmetry(&mut self, symmetry: Symmetry) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetSymmetry(symmetry)])
    }

    // ─── Cels ────────────────────────────────────────────────────────────

    /// Add a cel to `node`. Image layers get a canvas-sized surface.
    pub fn create_cel(&mut self, node: NodeId, start: i32, duration: i32) -> Result<KeyFrameId, DocumentError> {
        let kind = &self
            .document
            .graph
            .node(node)
            .ok_or(GraphError::NodeNotFound(node))?
            .kind;
        let payload = match kind {
            NodeKind::ImageLayer => KeyFramePayload::Raster(SurfaceRef::full(self.document.size)),
            _ => KeyFramePayload::Empty,
        };
        let keyframe = KeyFrameData::new(start, duration, payload);
        let id = keyframe.id;
        self.submit(vec![DocumentAction::CreateCel {
            node,
            keyframe,
            index: None,
        }])?;
        Ok(id)
    }

    pub fn delete_cels(&mut self, ids: &[KeyFrameId]) -> Result<(), DocumentError> {
        self.submit(ids.iter().map(|id| DocumentAction::DeleteCel { id: *id }).collect())
    }

    /// Move cels by `delta` frames. Fails whole if any would start before 0.
    pub fn shift_cels(&mut self, ids: &[KeyFrameId], delta: i32) -> Result<(), DocumentError> {
        let mut actions = Vec::with_capacity(ids.len());
        for id in ids {
            let (_, kf) = self
                .document
                .find_keyframe(*id)
                .ok_or(DocumentError::KeyFrameNotFound(*id))?;
            actions.push(DocumentAction::SetCelTiming {
                id: *id,
                start: kf.start + delta,
                duration: kf.duration,
            });
        }
        self.submit(actions)
    }

    pub fn set_cel_length(&mut self, id: KeyFrameId, start: i32, duration: i32) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetCelTiming { id, start, duration }])
    }

    pub fn set_cel_visibility(&mut self, id: KeyFrameId, visible: bool) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetCelVisibility { id, visible }])
    }

    /// Timeline selection; not undoable.
    pub fn select_cel(&mut self, id: KeyFrameId, selected: bool) -> bool {
        self.timeline.set_selected(id, selected)
    }

    pub fn set_group_collapsed(&mut self, layer: NodeId, collapsed: bool) {
        self.timeline.set_collapsed(layer, collapsed);
    }

    // ─── Animation ───────────────────────────────────────────────────────

    pub fn set_frame_rate(&mut self, frame_rate: i32) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetFrameRate(frame_rate)])
    }

    pub fn set_onion_settings(&mut self, frames: i32, opacity: f64) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetOnionSettings { frames, opacity }])
    }

    pub fn set_default_end_frame(&mut self, frame: i32) -> Result<(), DocumentError> {
        self.submit(vec![DocumentAction::SetDefaultEndFrame(frame)])
    }

    pub fn set_active_frame(&mut self, frame: i32) -> Result<(), DocumentError> {
        self.request(Request::Passthrough(Passthrough::SetActiveFrame(frame)))
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<(), DocumentError> {
        self.request(Request::Passthrough(Passthrough::SetPlaying(playing)))
    }

    // ─── History ─────────────────────────────────────────────────────────

    /// Returns whether a step was undone.
    pub fn undo(&mut self) -> Result<bool, DocumentError> {
        let depth = self.tracker.undo_depth();
        self.request(Request::Undo)?;
        Ok(self.tracker.undo_depth() < depth)
    }

    /// Returns whether a step was redone.
    pub fn redo(&mut self) -> Result<bool, DocumentError> {
        let depth = self.tracker.redo_depth();
        self.request(Request::Redo)?;
        Ok(self.tracker.redo_depth() < depth)
    }

    pub fn clear_undo(&mut self) -> Result<(), DocumentError> {
        self.request(Request::DeleteRecordedChanges)
    }

    /// Group every following operation into one undo step until
    /// [`end_change_block`](Self::end_change_block).
    pub fn start_change_block(&mut self) -> Result<(), DocumentError> {
        self.document.ensure_alive()?;
        Ok(self.accumulator.start_change_block()?)
    }

    pub fn end_change_block(&mut self) -> Result<(), DocumentError> {
        self.document.ensure_alive()?;
        self.accumulator.end_change_block();
        self.flush()
    }

    // ─── Interactive sessions ────────────────────────────────────────────

    /// Start or update an interactive session with `action`'s target
    /// state. Each call replaces the previous one; other mutations are
    /// rejected until the session ends.
    pub fn update_session(&mut self, action: DocumentAction) -> Result<(), DocumentError> {
        self.request(Request::StartOrUpdate(action))
    }

    /// Commit the session's final state as one undo step.
    pub fn end_session(&mut self) -> Result<(), DocumentError> {
        self.document.ensure_alive()?;
        self.accumulator.enqueue_request(Request::EndUpdateable);
        if !self.accumulator.is_change_block_active() {
            self.accumulator.enqueue_request(Request::Boundary);
        }
        self.flush()
    }

    pub fn cancel_session(&mut self) -> Result<(), DocumentError> {
        self.request(Request::CancelUpdateable)
    }

    // ─── References and lifetime ─────────────────────────────────────────

    /// Raise [`DocumentEvent::ReferenceInvalidated`] for this document's
    /// nodes that depend on `path`. Returns how many were raised.
    pub fn invalidate_reference(&mut self, registry: &ReferenceRegistry, path: impl AsRef<Path>) -> usize {
        if self.document.is_disposed() {
            return 0;
        }
        let own = self.document.id();
        let mut raised = 0;
        for (document, node) in registry.dependents_of(path) {
            if document == own && self.document.graph.contains(node) {
                self.events.push_back(DocumentEvent::ReferenceInvalidated { node });
                raised += 1;
            }
        }
        raised
    }

    /// Close the document. Every later mutation fails with
    /// [`DocumentError::ResourceDisposed`] and queries come back empty.
    pub fn dispose(&mut self) {
        if self.document.is_disposed() {
            return;
        }
        self.document.dispose();
        self.tracker = ChangeTracker::new(self.config.max_undo_depth);
        self.accumulator = ActionAccumulator::new();
        self.structure = StructureTree::new();
        self.timeline = Timeline::new(&self.document.animation);
        self.uncommitted.clear();
        self.events.push_back(DocumentEvent::Disposed);
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    fn ensure_mutable(&self) -> Result<(), DocumentError> {
        self.document.ensure_alive()?;
        if self.tracker.is_updateable_active() {
            return Err(ConcurrencyError::UpdateableChangeActive.into());
        }
        Ok(())
    }

    /// Queue `actions` as one finished batch and run it.
    fn submit(&mut self, actions: Vec<DocumentAction>) -> Result<(), DocumentError> {
        self.ensure_mutable()?;
        self.accumulator.enqueue_and_finish(actions);
        self.flush()
    }

    fn request(&mut self, request: Request<DocumentAction>) -> Result<(), DocumentError> {
        self.document.ensure_alive()?;
        self.accumulator.enqueue_request(request);
        self.flush()
    }

    fn flush(&mut self) -> Result<(), DocumentError> {
        let was_saved = self.is_saved();
        let processed = match self.accumulator.execute(&mut self.tracker, &mut self.document) {
            Ok(processed) => processed,
            // Refused before anything was applied; an open block keeps its changes.
            Err(err @ DocumentError::Concurrency(_)) => return Err(err),
            Err(err) => {
                // The tracker reverted the batch; views may have seen part
                // of it through an earlier flush in the same block.
                log::debug!("batch rejected: {err}");
                self.uncommitted.clear();
                self.resync();
                return Err(err);
            }
        };

        let mut touched = Vec::new();
        for p in processed {
            match p {
                Processed::Applied(changes) => {
                    touched.extend(changes.iter().cloned());
                    self.record_uncommitted(changes);
                }
                Processed::Previewed(changes) => {
                    touched.extend(changes.iter().cloned());
                    self.record_uncommitted(changes.clone());
                    self.events.push_back(DocumentEvent::Updated { changes });
                }
                Processed::Committed(commit) => {
                    let changes = std::mem::take(&mut self.uncommitted);
                    self.events.push_back(DocumentEvent::Committed { id: commit.id, changes });
                }
                Processed::Undone { id, changes } => {
                    touched.extend(changes.iter().cloned());
                    self.events.push_back(DocumentEvent::Undone { id, changes });
                }
                Processed::Redone { id, changes } => {
                    touched.extend(changes.iter().cloned());
                    self.events.push_back(DocumentEvent::Redone { id, changes });
                }
                Processed::RecordedChangesDeleted => {}
                Processed::Passthrough(Passthrough::SetActiveFrame(frame)) => {
                    self.timeline.set_active_frame(frame);
                }
                Processed::Passthrough(Passthrough::SetPlaying(playing)) => {
                    self.timeline.set_playing(playing);
                }
            }
        }

        self.refresh_views(&touched);
        let saved = self.is_saved();
        if saved != was_saved {
            self.events.push_back(DocumentEvent::SaveStateChanged { saved });
        }
        Ok(())
    }

    fn record_uncommitted(&mut self, changes: Vec<ChangeInfo>) {
        for change in changes {
            if !self.uncommitted.contains(&change) {
                self.uncommitted.push(change);
            }
        }
    }

    fn refresh_views(&mut self, changes: &[ChangeInfo]) {
        let structure =
            changes.iter().any(ChangeInfo::affects_structure) && self.structure.update(&self.document.graph);
        let mut timeline = false;
        for change in changes.iter().filter(|c| c.affects_timeline()) {
            timeline |= self.timeline.apply_change(change, &self.document);
        }
        self.views_updated(structure, timeline);
    }

    /// Rebuild both views from scratch.
    fn resync(&mut self) {
        let structure = self.structure.update(&self.document.graph);
        let timeline = self.timeline.rebuild(&self.document);
        self.views_updated(structure, timeline);
    }

    fn views_updated(&mut self, structure: bool, mut timeline: bool) {
        if structure || timeline {
            timeline |= self.timeline.sort_by_layers(&self.structure.all_layers());
        }
        if structure {
            log::debug!("structure tree updated ({} members)", self.structure.len());
            self.events.push_back(DocumentEvent::StructureChanged);
        }
        if timeline {
            self.events.push_back(DocumentEvent::TimelineChanged);
        }
    }
}

fn invalid(msg: impl Into<String>) -> DocumentError {
    DocumentError::InvalidArgument(msg.into())
}

fn background() -> PropName {
    PropName::intern(props::BACKGROUND)
}

fn link(from: NodeId, (to, input): Slot) -> Connection {
    Connection {
        from,
        output: PropName::intern(props::OUTPUT),
        to,
        input,
    }
}

/// The chain input `member` feeds: the `Background` of the member above
/// it, its folder's `Content`, or the output's `Background`.
fn chain_slot(graph: &NodeGraph, member: NodeId) -> Option<Slot> {
    let content = PropName::intern(props::CONTENT);
    let background = background();
    graph
        .connections_from(member)
        .into_iter()
        .find(|c| {
            (c.input == background || c.input == content)
                && graph
                    .node(c.to)
                    .is_some_and(|n| n.kind.is_structure() || n.kind == NodeKind::Output)
        })
        .map(|c| (c.to, c.input))
}

fn collect_subtree(members: &[Member], out: &mut Vec<NodeId>) {
    for m in members {
        out.push(m.id());
        collect_subtree(m.children(), out);
    }
}

/// Actions planned against a scratch copy of the document, so each step
/// sees the effect of the ones before it and a bad plan fails before
/// anything is queued.
struct Plan {
    scratch: Document,
    actions: Vec<DocumentAction>,
}

impl Plan {
    fn new(document: &Document) -> Self {
        Self {
            scratch: document.clone(),
            actions: Vec::new(),
        }
    }

    fn push(&mut self, action: DocumentAction) -> Result<(), DocumentError> {
        action.apply(&mut self.scratch)?;
        self.actions.push(action);
        Ok(())
    }

    fn slot(&self, at: InsertAt) -> Result<Slot, DocumentError> {
        let graph = &self.scratch.graph;
        match at {
            InsertAt::Top => graph
                .output_node()
                .map(|o| (o, background()))
                .ok_or_else(|| invalid("document has no output node")),
            InsertAt::Above(target) => {
                if !graph.contains(target) {
                    return Err(GraphError::NodeNotFound(target).into());
                }
                chain_slot(graph, target).ok_or_else(|| invalid(format!("{target} is not in the layer chain")))
            }
            InsertAt::Into(folder) => match graph.node(folder) {
                Some(n) if n.kind.is_folder() => Ok((folder, PropName::intern(props::CONTENT))),
                Some(_) => Err(invalid(format!("{folder} is not a folder"))),
                None => Err(GraphError::NodeNotFound(folder).into()),
            },
        }
    }

    /// Add `node` at `slot`, on top of whatever fed the slot.
    fn insert(&mut self, node: Node, slot: Slot) -> Result<NodeId, DocumentError> {
        let id = node.id;
        let below = self.scratch.graph.connection_to(slot.0, slot.1).map(|c| c.from);
        let connections = below.map(|b| vec![link(b, (id, background()))]).unwrap_or_default();
        self.push(DocumentAction::CreateNodes {
            nodes: vec![node],
            connections,
        })?;
        self.push(DocumentAction::Connect(link(id, slot)))?;
        Ok(id)
    }

    /// Put an existing, unlinked member at `slot`.
    fn link_into(&mut self, member: NodeId, slot: Slot) -> Result<(), DocumentError> {
        if let Some(below) = self.scratch.graph.connection_to(slot.0, slot.1).map(|c| c.from) {
            self.push(DocumentAction::Connect(link(below, (member, background()))))?;
        }
        self.push(DocumentAction::Connect(link(member, slot)))
    }

    /// Take `member` out of its chain, joining the member below it to the
    /// slot it fed.
    fn unlink(&mut self, member: NodeId) -> Result<(), DocumentError> {
        let below = self
            .scratch
            .graph
            .connection_to(member, background())
            .map(|c| c.from);
        let slot = chain_slot(&self.scratch.graph, member);
        if let Some(slot) = slot {
            match below {
                Some(below) => self.push(DocumentAction::Connect(link(below, slot)))?,
                None => self.push(DocumentAction::Disconnect {
                    to: slot.0,
                    input: slot.1,
                })?,
            }
        }
        if below.is_some() {
            self.push(DocumentAction::Disconnect {
                to: member,
                input: background(),
            })?;
        }
        Ok(())
    }

    /// Delete `id`. Tree members are unlinked first and take their
    /// subtree along.
    fn remove(&mut self, id: NodeId, tree: &StructureTree) -> Result<(), DocumentError> {
        if !self.scratch.graph.contains(id) {
            // Already gone with a folder or pair removed earlier.
            return Ok(());
        }
        let mut doomed = vec![id];
        if let Some(member) = tree.find(id) {
            collect_subtree(member.children(), &mut doomed);
            self.unlink(id)?;
        }
        doomed.retain(|d| self.scratch.graph.contains(*d));
        self.push(DocumentAction::DeleteNodes { ids: doomed })
    }
}
