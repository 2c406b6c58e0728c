//! Animation settings and the timeline view over per-node cels.
//!
//! The document stores keyframes on their nodes; [`Timeline`] is the
//! grouped view the UI reads: one [`CelGroup`] per owning layer, ordered to
//! mirror the layer tree, with cached first/last frame aggregates.

use crate::change::ChangeInfo;
use crate::document::Document;
use crate::id::{KeyFrameId, NodeId};
use crate::node::{KeyFrameData, Node};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// Document-level animation settings (persisted, changed through actions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationData {
    pub frame_rate: i32,
    pub onion_frames: i32,
    /// Percentage, 0..=100.
    pub onion_opacity: f64,
    pub default_end_frame: i32,
    /// Whether `default_end_frame` was set explicitly rather than derived.
    pub default_end_frame_set: bool,
    pub fallback_to_layer_image: bool,
}

impl Default for AnimationData {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            onion_frames: 1,
            onion_opacity: 50.0,
            default_end_frame: 60,
            default_end_frame_set: false,
            fallback_to_layer_image: false,
        }
    }
}

impl AnimationData {
    /// Change the frame rate. The first change also moves the default end
    /// frame to one second of animation unless it was set explicitly.
    pub fn set_frame_rate(&mut self, frame_rate: i32) {
        self.frame_rate = frame_rate;
        if !self.default_end_frame_set {
            self.default_end_frame = frame_rate;
            self.default_end_frame_set = true;
        }
    }

    /// Negative values are ignored.
    pub fn set_default_end_frame(&mut self, frame: i32) {
        if frame < 0 {
            return;
        }
        self.default_end_frame = frame;
        self.default_end_frame_set = true;
    }
}

// ─── Timeline view ───────────────────────────────────────────────────────

/// A single cel as seen by the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Cel {
    pub id: KeyFrameId,
    pub layer: NodeId,
    pub start: i32,
    pub duration: i32,
    pub visible: bool,
    pub selected: bool,
}

impl Cel {
    pub fn new(id: KeyFrameId, layer: NodeId, start: i32, duration: i32) -> Self {
        Self {
            id,
            layer,
            start,
            duration,
            visible: true,
            selected: false,
        }
    }

    pub fn from_keyframe(layer: NodeId, keyframe: &KeyFrameData) -> Self {
        Self {
            id: keyframe.id,
            layer,
            start: keyframe.start,
            duration: keyframe.duration,
            visible: keyframe.visible,
            selected: false,
        }
    }

    pub fn end(&self) -> i32 {
        self.start + self.duration
    }
}

/// All cels of one layer. Exists only while it has at least one child.
#[derive(Debug, Clone, PartialEq)]
pub struct CelGroup {
    pub layer: NodeId,
    pub cels: Vec<Cel>,
    pub collapsed: bool,
}

impl CelGroup {
    /// `min(children.start)`.
    pub fn start(&self) -> i32 {
        self.cels.iter().map(|c| c.start).min().unwrap_or(0)
    }

    /// `max(children.start + duration) − start`.
    pub fn duration(&self) -> i32 {
        let end = self.cels.iter().map(Cel::end).max().unwrap_or(0);
        end - self.start()
    }

    pub fn end(&self) -> i32 {
        self.start() + self.duration()
    }

    /// A group is visible when any of its cels is.
    pub fn is_visible(&self) -> bool {
        self.cels.iter().any(|c| c.visible)
    }
}

/// Grouped, cached view of the document's cels.
#[derive(Debug, Default)]
pub struct Timeline {
    groups: Vec<CelGroup>,
    default_end_frame: i32,
    onion_frames: i32,
    active_frame: i32,
    playing: bool,
    cached_first_frame: Cell<Option<i32>>,
    cached_last_frame: Cell<Option<i32>>,
}

impl Timeline {
    pub fn new(data: &AnimationData) -> Self {
        Self {
            groups: Vec::new(),
            default_end_frame: data.default_end_frame,
            onion_frames: data.onion_frames,
            active_frame: 1,
            playing: false,
            cached_first_frame: Cell::new(None),
            cached_last_frame: Cell::new(None),
        }
    }

    fn invalidate(&self) {
        self.cached_first_frame.set(None);
        self.cached_last_frame.set(None);
    }

    pub fn groups(&self) -> &[CelGroup] {
        &self.groups
    }

    pub fn group(&self, layer: NodeId) -> Option<&CelGroup> {
        self.groups.iter().find(|g| g.layer == layer)
    }

    /// Refresh settings mirrored from the document.
    pub fn sync_settings(&mut self, data: &AnimationData) {
        if self.default_end_frame != data.default_end_frame {
            self.default_end_frame = data.default_end_frame;
            self.invalidate();
        }
        self.onion_frames = data.onion_frames;
    }

    // ─── Document sync ───────────────────────────────────────────────────

    /// Rebuild every group from the document's keyframes, keeping selection
    /// and collapse flags. Returns whether the groups changed.
    pub fn rebuild(&mut self, document: &Document) -> bool {
        let selected: HashSet<KeyFrameId> = self.selected_cels().into_iter().collect();
        let collapsed: HashSet<NodeId> = self
            .groups
            .iter()
            .filter(|g| g.collapsed)
            .map(|g| g.layer)
            .collect();
        let old = std::mem::take(&mut self.groups);
        for (node, kf) in document.keyframes() {
            let mut cel = Cel::from_keyframe(node, kf);
            cel.selected = selected.contains(&kf.id);
            self.add_cel(cel);
        }
        for group in &mut self.groups {
            group.collapsed = collapsed.contains(&group.layer);
        }
        self.sync_settings(&document.animation);
        self.invalidate();
        self.groups != old
    }

    /// Apply one change notification. Returns whether the view changed.
    pub fn apply_change(&mut self, change: &ChangeInfo, document: &Document) -> bool {
        match change {
            ChangeInfo::KeyFrameAdded { node, keyframe } => {
                let Some(owner) = document.graph.node(*node) else {
                    return false;
                };
                let Some(kf) = owner.keyframe(*keyframe) else {
                    return false;
                };
                self.add_cel(Cel::from_keyframe(*node, kf));
                self.order_cels(owner);
                true
            }
            ChangeInfo::KeyFrameRemoved { keyframe, .. } => self.remove_cel(*keyframe).is_some(),
            ChangeInfo::KeyFrameChanged { node, keyframe } => {
                let Some(kf) = document.graph.node(*node).and_then(|n| n.keyframe(*keyframe)) else {
                    return false;
                };
                let (start, duration, visible) = (kf.start, kf.duration, kf.visible);
                self.set_cel_length(*keyframe, start, duration) && self.set_visibility(*keyframe, visible)
            }
            ChangeInfo::NodeAdded(id) => {
                let Some(node) = document.graph.node(*id) else {
                    return false;
                };
                for kf in &node.keyframes {
                    self.add_cel(Cel::from_keyframe(*id, kf));
                }
                !node.keyframes.is_empty()
            }
            ChangeInfo::NodeRemoved(id) => self.remove_layer(*id),
            ChangeInfo::AnimationSettingsChanged => {
                self.sync_settings(&document.animation);
                true
            }
            _ => false,
        }
    }

    // ─── Mutation ────────────────────────────────────────────────────────

    /// Add a cel to its layer's group, creating the group if needed.
    pub fn add_cel(&mut self, cel: Cel) {
        if self.find_cel(cel.id).is_some() {
            return;
        }
        match self.groups.iter_mut().find(|g| g.layer == cel.layer) {
            Some(group) => group.cels.push(cel),
            None => self.groups.push(CelGroup {
                layer: cel.layer,
                cels: vec![cel],
                collapsed: false,
            }),
        }
        self.invalidate();
    }

    /// Put `node`'s cels back in the node's keyframe order. A restored
    /// keyframe lands at its old index in the document, not at the end.
    fn order_cels(&mut self, node: &Node) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.layer == node.id) {
            group
                .cels
                .sort_by_key(|c| node.keyframes.iter().position(|k| k.id == c.id));
        }
    }

    /// Remove a cel; its group goes away with its last child. Returns the
    /// removed cel.
    pub fn remove_cel(&mut self, id: KeyFrameId) -> Option<Cel> {
        let (gi, ci) = self.position(id)?;
        let cel = self.groups[gi].cels.remove(ci);
        if self.groups[gi].cels.is_empty() {
            self.groups.remove(gi);
        }
        self.invalidate();
        Some(cel)
    }

    /// Drop every cel owned by `layer`.
    pub fn remove_layer(&mut self, layer: NodeId) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g.layer != layer);
        let changed = before != self.groups.len();
        if changed {
            self.invalidate();
        }
        changed
    }

    pub fn set_cel_length(&mut self, id: KeyFrameId, start: i32, duration: i32) -> bool {
        let Some(cel) = self.find_cel_mut(id) else {
            return false;
        };
        cel.start = start;
        cel.duration = duration;
        self.invalidate();
        true
    }

    pub fn set_visibility(&mut self, id: KeyFrameId, visible: bool) -> bool {
        let Some(cel) = self.find_cel_mut(id) else {
            return false;
        };
        cel.visible = visible;
        self.invalidate();
        true
    }

    pub fn set_selected(&mut self, id: KeyFrameId, selected: bool) -> bool {
        match self.find_cel_mut(id) {
            Some(cel) => {
                cel.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn clear_selection(&mut self) {
        for cel in self.groups.iter_mut().flat_map(|g| g.cels.iter_mut()) {
            cel.selected = false;
        }
    }

    pub fn selected_cels(&self) -> Vec<KeyFrameId> {
        self.cels().filter(|c| c.selected).map(|c| c.id).collect()
    }

    pub fn set_collapsed(&mut self, layer: NodeId, collapsed: bool) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.layer == layer) {
            group.collapsed = collapsed;
        }
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    pub fn cels(&self) -> impl Iterator<Item = &Cel> {
        self.groups.iter().flat_map(|g| g.cels.iter())
    }

    fn position(&self, id: KeyFrameId) -> Option<(usize, usize)> {
        self.groups.iter().enumerate().find_map(|(gi, g)| {
            g.cels.iter().position(|c| c.id == id).map(|ci| (gi, ci))
        })
    }

    pub fn find_cel(&self, id: KeyFrameId) -> Option<&Cel> {
        self.position(id).map(|(gi, ci)| &self.groups[gi].cels[ci])
    }

    fn find_cel_mut(&mut self, id: KeyFrameId) -> Option<&mut Cel> {
        let (gi, ci) = self.position(id)?;
        Some(&mut self.groups[gi].cels[ci])
    }

    // ─── Aggregates ──────────────────────────────────────────────────────

    /// Earliest group start, or `1` with no groups. Cached.
    pub fn first_visible_frame(&self) -> i32 {
        if let Some(v) = self.cached_first_frame.get() {
            return v;
        }
        let v = self.groups.iter().map(CelGroup::start).min().unwrap_or(1);
        self.cached_first_frame.set(Some(v));
        v
    }

    /// Latest group end, or the default end frame with no groups. Cached.
    pub fn last_frame(&self) -> i32 {
        if let Some(v) = self.cached_last_frame.get() {
            return v;
        }
        let v = self
            .groups
            .iter()
            .map(CelGroup::end)
            .max()
            .unwrap_or(self.default_end_frame);
        self.cached_last_frame.set(Some(v));
        v
    }

    pub fn frames_count(&self) -> i32 {
        self.last_frame() - 1
    }

    /// Like [`first_visible_frame`](Self::first_visible_frame) but ignoring
    /// hidden groups.
    pub fn first_frame_of_visible(&self) -> i32 {
        self.groups
            .iter()
            .filter(|g| g.is_visible())
            .map(CelGroup::start)
            .min()
            .unwrap_or(1)
    }

    pub fn last_frame_of_visible(&self) -> i32 {
        self.groups
            .iter()
            .filter(|g| g.is_visible())
            .map(CelGroup::end)
            .max()
            .unwrap_or(self.default_end_frame)
    }

    pub fn visible_frames_count(&self) -> i32 {
        self.last_frame_of_visible() - self.first_frame_of_visible()
    }

    /// Active frame normalized to `0.0..=1.0` over the timeline.
    pub fn normalized_time(&self) -> f64 {
        let span = self.frames_count() - 1;
        if span <= 0 {
            return 0.0;
        }
        f64::from(self.active_frame - 1) / f64::from(span)
    }

    // ─── Playback state ──────────────────────────────────────────────────

    pub fn active_frame(&self) -> i32 {
        self.active_frame
    }

    /// Returns the previous frame.
    pub fn set_active_frame(&mut self, frame: i32) -> i32 {
        std::mem::replace(&mut self.active_frame, frame.max(1))
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Frames shown as onion skins around `active`: `(before, after)`, the
    /// nearest first. Frames below 1 are dropped.
    pub fn onion_window(&self, active: i32) -> (Vec<i32>, Vec<i32>) {
        let n = self.onion_frames.max(0);
        let before = (1..=n).map(|d| active - d).filter(|f| *f >= 1).collect();
        let after = (1..=n).map(|d| active + d).collect();
        (before, after)
    }

    /// Full frame range covered by the onion window around `active`.
    pub fn onion_range(&self, active: i32) -> RangeInclusive<i32> {
        let n = self.onion_frames.max(0);
        (active - n).max(1)..=active + n
    }

    // ─── Ordering ────────────────────────────────────────────────────────

    /// Reorder groups to mirror `layers` (the layer tree's flat list,
    /// topmost first) reversed, so the topmost layer's group comes last.
    /// Groups whose layer is not listed keep their relative order at the
    /// end. Returns `false` without touching anything when the order is
    /// already right.
    pub fn sort_by_layers(&mut self, layers: &[NodeId]) -> bool {
        if self.groups.len() < 2 {
            return false;
        }
        let mut desired: Vec<NodeId> = layers
            .iter()
            .rev()
            .filter(|l| self.groups.iter().any(|g| g.layer == **l))
            .copied()
            .collect();
        for g in &self.groups {
            if !desired.contains(&g.layer) {
                desired.push(g.layer);
            }
        }
        if self.groups.iter().map(|g| g.layer).eq(desired.iter().copied()) {
            return false;
        }
        let mut remaining = std::mem::take(&mut self.groups);
        for layer in desired {
            if let Some(pos) = remaining.iter().position(|g| g.layer == layer) {
                self.groups.push(remaining.remove(pos));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn timeline() -> Timeline {
        Timeline::new(&AnimationData::default())
    }

    #[test]
    fn group_aggregates_children() {
        let layer = NodeId::new();
        let mut t = timeline();
        t.add_cel(Cel::new(KeyFrameId::new(), layer, 2, 3));
        t.add_cel(Cel::new(KeyFrameId::new(), layer, 5, 1));

        let g = t.group(layer).unwrap();
        assert_eq!(g.start(), 2);
        assert_eq!(g.duration(), 4);
        assert_eq!(t.groups().len(), 1);
    }

    #[test]
    fn empty_timeline_uses_defaults() {
        let t = timeline();
        assert_eq!(t.first_visible_frame(), 1);
        assert_eq!(t.last_frame(), 60);
        assert_eq!(t.frames_count(), 59);
    }

    #[test]
    fn cache_is_invalidated_by_changes() {
        let layer = NodeId::new();
        let cel = KeyFrameId::new();
        let mut t = timeline();
        t.add_cel(Cel::new(cel, layer, 3, 2));
        assert_eq!(t.first_visible_frame(), 3);
        assert_eq!(t.last_frame(), 5);

        t.set_cel_length(cel, 1, 10);
        assert_eq!(t.first_visible_frame(), 1);
        assert_eq!(t.last_frame(), 11);

        t.remove_cel(cel);
        assert!(t.groups().is_empty());
        assert_eq!(t.last_frame(), 60);
    }

    #[test]
    fn group_disappears_with_last_cel() {
        let layer = NodeId::new();
        let (a, b) = (KeyFrameId::new(), KeyFrameId::new());
        let mut t = timeline();
        t.add_cel(Cel::new(a, layer, 1, 1));
        t.add_cel(Cel::new(b, layer, 2, 1));
        t.remove_cel(a);
        assert!(t.group(layer).is_some());
        t.remove_cel(b);
        assert!(t.group(layer).is_none());
    }

    #[test]
    fn visible_range_ignores_hidden_groups() {
        let (l1, l2) = (NodeId::new(), NodeId::new());
        let hidden = KeyFrameId::new();
        let mut t = timeline();
        t.add_cel(Cel::new(hidden, l1, 1, 20));
        t.add_cel(Cel::new(KeyFrameId::new(), l2, 5, 5));
        t.set_visibility(hidden, false);

        assert_eq!(t.first_visible_frame(), 1);
        assert_eq!(t.first_frame_of_visible(), 5);
        assert_eq!(t.last_frame_of_visible(), 10);
        assert_eq!(t.visible_frames_count(), 5);
    }

    #[test]
    fn sort_mirrors_reversed_layers() {
        let (top, mid, bottom) = (NodeId::new(), NodeId::new(), NodeId::new());
        let mut t = timeline();
        for layer in [top, mid, bottom] {
            t.add_cel(Cel::new(KeyFrameId::new(), layer, 1, 1));
        }
        assert!(t.sort_by_layers(&[top, mid, bottom]));
        let order: Vec<NodeId> = t.groups().iter().map(|g| g.layer).collect();
        assert_eq!(order, vec![bottom, mid, top]);

        // Already sorted: no work, no notification.
        assert!(!t.sort_by_layers(&[top, mid, bottom]));
    }

    #[test]
    fn sort_keeps_unlisted_groups_last() {
        let (a, b, orphan) = (NodeId::new(), NodeId::new(), NodeId::new());
        let mut t = timeline();
        for layer in [orphan, a, b] {
            t.add_cel(Cel::new(KeyFrameId::new(), layer, 1, 1));
        }
        t.sort_by_layers(&[a, b]);
        let order: Vec<NodeId> = t.groups().iter().map(|g| g.layer).collect();
        assert_eq!(order, vec![b, a, orphan]);
    }

    #[test]
    fn onion_window_clamps_at_first_frame() {
        let mut data = AnimationData::default();
        data.onion_frames = 2;
        let t = Timeline::new(&data);
        assert_eq!(t.onion_window(2), (vec![1], vec![3, 4]));
        assert_eq!(t.onion_range(2), 1..=4);
    }

    #[test]
    fn view_follows_document_changes() {
        use crate::config::EditorConfig;
        use crate::node::{KeyFramePayload, Node, NodeKind};

        let mut doc = Document::from_config(&EditorConfig::default());
        let mut layer = Node::new(NodeKind::ImageLayer);
        let kf = KeyFrameData::new(2, 3, KeyFramePayload::Empty);
        let kf_id = kf.id;
        layer.keyframes.push(kf);
        let layer_id = layer.id;
        doc.graph.add_node(layer).unwrap();

        let mut t = Timeline::new(&doc.animation);
        assert!(t.rebuild(&doc));
        assert_eq!(t.group(layer_id).unwrap().start(), 2);
        assert!(!t.rebuild(&doc));

        doc.keyframe_mut(kf_id).unwrap().duration = 10;
        let change = ChangeInfo::KeyFrameChanged {
            node: layer_id,
            keyframe: kf_id,
        };
        assert!(t.apply_change(&change, &doc));
        assert_eq!(t.last_frame(), 12);

        assert!(t.apply_change(&ChangeInfo::NodeRemoved(layer_id), &doc));
        assert!(t.groups().is_empty());
    }

    #[test]
    fn restored_keyframe_keeps_document_order() {
        use crate::config::EditorConfig;
        use crate::node::{KeyFramePayload, NodeKind};

        let mut doc = Document::from_config(&EditorConfig::default());
        let mut layer = Node::new(NodeKind::ImageLayer);
        for start in [1, 4, 8] {
            layer.keyframes.push(KeyFrameData::new(start, 2, KeyFramePayload::Empty));
        }
        let layer_id = layer.id;
        doc.graph.add_node(layer).unwrap();
        let mut t = Timeline::new(&doc.animation);
        t.rebuild(&doc);

        let node = doc.graph.node_mut(layer_id).unwrap();
        let middle = node.keyframes.remove(1);
        let middle_id = middle.id;
        t.apply_change(
            &ChangeInfo::KeyFrameRemoved {
                node: layer_id,
                keyframe: middle_id,
            },
            &doc,
        );
        doc.graph.node_mut(layer_id).unwrap().keyframes.insert(1, middle);
        assert!(t.apply_change(
            &ChangeInfo::KeyFrameAdded {
                node: layer_id,
                keyframe: middle_id,
            },
            &doc,
        ));

        let starts: Vec<i32> = t.group(layer_id).unwrap().cels.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![1, 4, 8]);
        let mut fresh = Timeline::new(&doc.animation);
        fresh.rebuild(&doc);
        assert_eq!(fresh.groups(), t.groups());
    }

    #[test]
    fn first_frame_rate_change_moves_default_end() {
        let mut data = AnimationData::default();
        data.set_frame_rate(24);
        assert_eq!(data.default_end_frame, 24);
        data.set_frame_rate(30);
        assert_eq!(data.default_end_frame, 24);

        let mut explicit = AnimationData::default();
        explicit.set_default_end_frame(100);
        explicit.set_frame_rate(12);
        assert_eq!(explicit.default_end_frame, 100);
        explicit.set_default_end_frame(-5);
        assert_eq!(explicit.default_end_frame, 100);
    }
}
