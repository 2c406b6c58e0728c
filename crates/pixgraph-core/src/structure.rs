//! The layer/folder tree projected from the node graph.
//!
//! Members are not stored anywhere else: a [`Member`] is a view of a
//! structure node, identified by the node's id. [`StructureTree::update`]
//! walks the graph upstream from the output node and reconciles the tree in
//! place, so subtrees the walk leaves alone keep their state (expansion,
//! identity) across updates.
//!
//! Ordering is topmost first. Siblings are found along the `Background`
//! chain; a connection into a folder's `Content` input enters the folder.

use crate::graph::NodeGraph;
use crate::id::{NodeId, PropName};
use crate::node::{Node, props};
use std::collections::{HashMap, HashSet};

/// Data every member shares, refreshed from its node on each update.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub id: NodeId,
    pub name: String,
    pub visible: bool,
    pub mask_visible: bool,
    pub opacity: f64,
}

impl MemberInfo {
    fn from_node(node: &Node) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            visible: node.is_visible(),
            mask_visible: node.mask_is_visible(),
            opacity: node.opacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerMember {
    pub info: MemberInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderMember {
    pub info: MemberInfo,
    pub children: Vec<Member>,
    pub is_expanded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Layer(LayerMember),
    Folder(FolderMember),
}

/// Behavior shared by every kind of structure member.
pub trait StructureMember {
    fn info(&self) -> &MemberInfo;

    fn id(&self) -> NodeId {
        self.info().id
    }

    fn name(&self) -> &str {
        &self.info().name
    }

    fn is_visible(&self) -> bool {
        self.info().visible
    }

    fn opacity(&self) -> f64 {
        self.info().opacity
    }
}

/// Members that carry a mask.
pub trait Masked: StructureMember {
    fn mask_is_visible(&self) -> bool {
        self.info().mask_visible
    }
}

impl StructureMember for LayerMember {
    fn info(&self) -> &MemberInfo {
        &self.info
    }
}

impl StructureMember for FolderMember {
    fn info(&self) -> &MemberInfo {
        &self.info
    }
}

impl StructureMember for Member {
    fn info(&self) -> &MemberInfo {
        match self {
            Self::Layer(l) => &l.info,
            Self::Folder(f) => &f.info,
        }
    }
}

impl Masked for LayerMember {}
impl Masked for FolderMember {}
impl Masked for Member {}

impl Member {
    fn from_node(node: &Node) -> Self {
        let info = MemberInfo::from_node(node);
        if node.kind.is_folder() {
            Self::Folder(FolderMember {
                info,
                children: Vec::new(),
                is_expanded: true,
            })
        } else {
            Self::Layer(LayerMember { info })
        }
    }

    fn info_mut(&mut self) -> &mut MemberInfo {
        match self {
            Self::Layer(l) => &mut l.info,
            Self::Folder(f) => &mut f.info,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }

    /// Child members; empty for layers.
    pub fn children(&self) -> &[Member] {
        match self {
            Self::Layer(_) => &[],
            Self::Folder(f) => &f.children,
        }
    }
}

// ─── Tree ────────────────────────────────────────────────────────────────

/// One structure node reached by the walk: where it belongs.
struct Placement {
    id: NodeId,
    parent: Option<NodeId>,
    index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StructureTree {
    root: Vec<Member>,
    /// Parent folder of every member (`None` for the root collection).
    locations: HashMap<NodeId, Option<NodeId>>,
}

impl StructureTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &[Member] {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.locations.contains_key(&id)
    }

    /// Parent folder of a member: `Some(None)` at the root, `None` if the
    /// member is not in the tree.
    pub fn parent_of(&self, id: NodeId) -> Option<Option<NodeId>> {
        self.locations.get(&id).copied()
    }

    pub fn find(&self, id: NodeId) -> Option<&Member> {
        fn search(list: &[Member], id: NodeId) -> Option<&Member> {
            list.iter().find_map(|m| {
                if m.id() == id {
                    Some(m)
                } else {
                    search(m.children(), id)
                }
            })
        }
        search(&self.root, id)
    }

    /// Every member id, depth first, topmost first.
    pub fn flatten(&self) -> Vec<NodeId> {
        fn walk(list: &[Member], out: &mut Vec<NodeId>) {
            for m in list {
                out.push(m.id());
                walk(m.children(), out);
            }
        }
        let mut out = Vec::with_capacity(self.len());
        walk(&self.root, &mut out);
        out
    }

    /// Layer ids only (no folders), topmost first.
    pub fn all_layers(&self) -> Vec<NodeId> {
        fn walk(list: &[Member], out: &mut Vec<NodeId>) {
            for m in list {
                match m {
                    Member::Layer(l) => out.push(l.info.id),
                    Member::Folder(f) => walk(&f.children, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    pub fn set_expanded(&mut self, folder: NodeId, expanded: bool) -> bool {
        match find_mut(&mut self.root, folder) {
            Some(Member::Folder(f)) => {
                f.is_expanded = expanded;
                true
            }
            _ => false,
        }
    }

    // ─── Update ──────────────────────────────────────────────────────────

    /// Reconcile the tree with `graph`. Returns whether anything changed.
    pub fn update(&mut self, graph: &NodeGraph) -> bool {
        let placements = Self::walk(graph);
        let reached: HashSet<NodeId> = placements.iter().map(|p| p.id).collect();
        let mut changed = false;

        // Prune unreached members; reachable descendants of pruned folders
        // are kept aside to be placed again.
        let mut detached: HashMap<NodeId, Member> = HashMap::new();
        changed |= prune(&mut self.root, &reached, &mut detached);
        self.locations.retain(|id, _| reached.contains(id));

        for p in &placements {
            changed |= self.place(p, graph, &mut detached);
        }

        for p in &placements {
            if let (Some(node), Some(member)) = (graph.node(p.id), find_mut(&mut self.root, p.id)) {
                let info = MemberInfo::from_node(node);
                if *member.info() != info {
                    *member.info_mut() = info;
                    changed = true;
                }
            }
        }

        if !detached.is_empty() {
            log::warn!("{} detached structure members were not placed", detached.len());
        }
        if changed {
            log::trace!("structure tree updated: {} members", self.len());
        }
        changed
    }

    /// Upstream walk from the output node recording where each structure
    /// node belongs.
    fn walk(graph: &NodeGraph) -> Vec<Placement> {
        let Some(output) = graph.output_node() else {
            return Vec::new();
        };
        let content = PropName::intern(props::CONTENT);
        // Enclosing folder of every visited node.
        let mut parent_of: HashMap<NodeId, Option<NodeId>> = HashMap::new();
        let mut folders: HashSet<NodeId> = HashSet::new();
        let mut next_index: HashMap<Option<NodeId>, usize> = HashMap::new();
        let mut placements = Vec::new();

        let walked = graph.traverse_backwards(output, |node, via| {
            let parent = match via {
                None => None,
                Some(conn) if conn.input == content && folders.contains(&conn.to) => Some(conn.to),
                Some(conn) => parent_of.get(&conn.to).copied().flatten(),
            };
            parent_of.insert(node.id, parent);
            if node.kind.is_folder() {
                folders.insert(node.id);
            }
            if node.kind.is_structure() {
                let slot = next_index.entry(parent).or_insert(0);
                placements.push(Placement {
                    id: node.id,
                    parent,
                    index: *slot,
                });
                *slot += 1;
            }
            true
        });
        if let Err(err) = walked {
            log::warn!("structure walk failed: {err}");
        }
        placements
    }

    /// Put one member at its recorded position, creating or moving it as
    /// needed.
    fn place(
        &mut self,
        p: &Placement,
        graph: &NodeGraph,
        detached: &mut HashMap<NodeId, Member>,
    ) -> bool {
        let current = self.locations.get(&p.id).copied();
        if current == Some(p.parent)
            && let Some(list) = self.collection_mut(p.parent)
            && list.get(p.index).is_some_and(|m| m.id() == p.id)
        {
            return false;
        }

        let member = match current {
            Some(old_parent) => self.collection_mut(old_parent).and_then(|list| {
                let pos = list.iter().position(|m| m.id() == p.id)?;
                Some(list.remove(pos))
            }),
            None => None,
        };
        let member = member
            .or_else(|| take_detached(detached, p.id))
            .or_else(|| graph.node(p.id).map(Member::from_node));
        let Some(member) = member else {
            return false;
        };

        let Some(list) = self.collection_mut(p.parent) else {
            log::warn!("parent of {} missing from structure tree", p.id);
            return false;
        };
        let at = p.index.min(list.len());
        list.insert(at, member);
        self.locations.insert(p.id, p.parent);
        true
    }

    fn collection_mut(&mut self, parent: Option<NodeId>) -> Option<&mut Vec<Member>> {
        match parent {
            None => Some(&mut self.root),
            Some(id) => match find_mut(&mut self.root, id)? {
                Member::Folder(f) => Some(&mut f.children),
                Member::Layer(_) => None,
            },
        }
    }
}

fn find_mut(list: &mut [Member], id: NodeId) -> Option<&mut Member> {
    for m in list.iter_mut() {
        if m.id() == id {
            return Some(m);
        }
        if let Member::Folder(f) = m
            && let Some(found) = find_mut(&mut f.children, id)
        {
            return Some(found);
        }
    }
    None
}

fn take_from(list: &mut Vec<Member>, id: NodeId) -> Option<Member> {
    if let Some(pos) = list.iter().position(|m| m.id() == id) {
        return Some(list.remove(pos));
    }
    list.iter_mut().find_map(|m| match m {
        Member::Folder(f) => take_from(&mut f.children, id),
        Member::Layer(_) => None,
    })
}

/// Take a member out of the detached pool, wherever it sits inside it.
fn take_detached(detached: &mut HashMap<NodeId, Member>, id: NodeId) -> Option<Member> {
    if let Some(member) = detached.remove(&id) {
        return Some(member);
    }
    detached.values_mut().find_map(|m| match m {
        Member::Folder(f) => take_from(&mut f.children, id),
        Member::Layer(_) => None,
    })
}

/// Remove unreached members from `list`, recursively. Reached members
/// found inside removed folders go to `detached`.
fn prune(
    list: &mut Vec<Member>,
    reached: &HashSet<NodeId>,
    detached: &mut HashMap<NodeId, Member>,
) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < list.len() {
        if reached.contains(&list[i].id()) {
            if let Member::Folder(f) = &mut list[i] {
                changed |= prune(&mut f.children, reached, detached);
            }
            i += 1;
            continue;
        }
        changed = true;
        let removed = list.remove(i);
        log::trace!("structure member {} pruned", removed.id());
        if let Member::Folder(f) = removed {
            rescue(f.children, reached, detached);
        }
    }
    changed
}

fn rescue(children: Vec<Member>, reached: &HashSet<NodeId>, detached: &mut HashMap<NodeId, Member>) {
    for mut child in children {
        if reached.contains(&child.id()) {
            if let Member::Folder(f) = &mut child {
                prune(&mut f.children, reached, detached);
            }
            detached.insert(child.id(), child);
        } else if let Member::Folder(f) = child {
            rescue(f.children, reached, detached);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Connection;
    use crate::node::{NodeKind, props};
    use crate::value::PropertyValue;
    use pretty_assertions::assert_eq;

    struct Fixture {
        graph: NodeGraph,
        output: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut graph = NodeGraph::new();
            let out = Node::new(NodeKind::Output);
            let output = out.id;
            graph.add_node(out).unwrap();
            Self { graph, output }
        }

        fn add(&mut self, kind: NodeKind, name: &str) -> NodeId {
            let node = Node::new(kind).named(name);
            let id = node.id;
            self.graph.add_node(node).unwrap();
            id
        }

        fn feed(&mut self, from: NodeId, to: NodeId, input: &str) {
            self.graph
                .connect(Connection::new(from, props::OUTPUT, to, input))
                .unwrap();
        }
    }

    fn names(list: &[Member]) -> Vec<String> {
        list.iter()
            .map(|m| match m {
                Member::Layer(l) => l.info.name.clone(),
                Member::Folder(f) => format!("{}[{}]", f.info.name, names(&f.children).join(",")),
            })
            .collect()
    }

    #[test]
    fn chain_of_layers_is_topmost_first() {
        let mut fx = Fixture::new();
        let top = fx.add(NodeKind::ImageLayer, "top");
        let bottom = fx.add(NodeKind::ImageLayer, "bottom");
        fx.feed(top, fx.output, props::BACKGROUND);
        fx.feed(bottom, top, props::BACKGROUND);

        let mut tree = StructureTree::new();
        assert!(tree.update(&fx.graph));
        assert_eq!(names(tree.members()), vec!["top", "bottom"]);
        assert_eq!(tree.all_layers(), vec![top, bottom]);
        assert!(!tree.update(&fx.graph));
    }

    #[test]
    fn content_input_enters_folder() {
        let mut fx = Fixture::new();
        let folder = fx.add(NodeKind::Folder, "f");
        let inner_a = fx.add(NodeKind::ImageLayer, "a");
        let inner_b = fx.add(NodeKind::ImageLayer, "b");
        let below = fx.add(NodeKind::ImageLayer, "below");
        fx.feed(folder, fx.output, props::BACKGROUND);
        fx.feed(below, folder, props::BACKGROUND);
        fx.feed(inner_a, folder, props::CONTENT);
        fx.feed(inner_b, inner_a, props::BACKGROUND);

        let mut tree = StructureTree::new();
        tree.update(&fx.graph);
        assert_eq!(names(tree.members()), vec!["f[a,b]", "below"]);
        assert_eq!(tree.parent_of(inner_a), Some(Some(folder)));
        assert_eq!(tree.parent_of(below), Some(None));
        assert_eq!(tree.flatten(), vec![folder, inner_a, inner_b, below]);
    }

    #[test]
    fn non_structure_nodes_pass_through() {
        let mut fx = Fixture::new();
        let filter = fx.add(NodeKind::Filter, "blur");
        let layer = fx.add(NodeKind::ImageLayer, "l");
        fx.feed(filter, fx.output, props::BACKGROUND);
        fx.feed(layer, filter, props::INPUT);

        let mut tree = StructureTree::new();
        tree.update(&fx.graph);
        assert_eq!(names(tree.members()), vec!["l"]);
        assert!(!tree.contains(filter));
    }

    #[test]
    fn unreachable_members_are_pruned() {
        let mut fx = Fixture::new();
        let a = fx.add(NodeKind::ImageLayer, "a");
        let b = fx.add(NodeKind::ImageLayer, "b");
        fx.feed(a, fx.output, props::BACKGROUND);
        fx.feed(b, a, props::BACKGROUND);
        let mut tree = StructureTree::new();
        tree.update(&fx.graph);

        fx.graph.disconnect(a, PropName::intern(props::BACKGROUND)).unwrap();
        assert!(tree.update(&fx.graph));
        assert_eq!(names(tree.members()), vec!["a"]);
        assert!(!tree.contains(b));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn reorder_moves_without_recreating() {
        let mut fx = Fixture::new();
        let folder = fx.add(NodeKind::Folder, "f");
        let layer = fx.add(NodeKind::ImageLayer, "l");
        fx.feed(folder, fx.output, props::BACKGROUND);
        fx.feed(layer, folder, props::BACKGROUND);
        let mut tree = StructureTree::new();
        tree.update(&fx.graph);
        tree.set_expanded(folder, false);

        // Swap: layer on top of the folder.
        fx.feed(layer, fx.output, props::BACKGROUND);
        fx.graph.disconnect(folder, PropName::intern(props::BACKGROUND)).unwrap();
        fx.feed(folder, layer, props::BACKGROUND);
        assert!(tree.update(&fx.graph));
        assert_eq!(names(tree.members()), vec!["l", "f[]"]);
        match tree.find(folder) {
            Some(Member::Folder(f)) => assert!(!f.is_expanded),
            other => panic!("expected folder, got {other:?}"),
        }
    }

    #[test]
    fn moving_into_folder_and_out_again() {
        let mut fx = Fixture::new();
        let folder = fx.add(NodeKind::Folder, "f");
        let layer = fx.add(NodeKind::ImageLayer, "l");
        fx.feed(folder, fx.output, props::BACKGROUND);
        fx.feed(layer, folder, props::BACKGROUND);
        let mut tree = StructureTree::new();
        tree.update(&fx.graph);

        fx.graph.disconnect(folder, PropName::intern(props::BACKGROUND)).unwrap();
        fx.feed(layer, folder, props::CONTENT);
        tree.update(&fx.graph);
        assert_eq!(names(tree.members()), vec!["f[l]"]);

        fx.graph.disconnect(folder, PropName::intern(props::CONTENT)).unwrap();
        fx.feed(layer, folder, props::BACKGROUND);
        tree.update(&fx.graph);
        assert_eq!(names(tree.members()), vec!["f[]", "l"]);
    }

    #[test]
    fn children_of_pruned_folder_survive_when_reached() {
        let mut fx = Fixture::new();
        let folder = fx.add(NodeKind::Folder, "f");
        let inner = fx.add(NodeKind::ImageLayer, "inner");
        fx.feed(folder, fx.output, props::BACKGROUND);
        fx.feed(inner, folder, props::CONTENT);
        let mut tree = StructureTree::new();
        tree.update(&fx.graph);

        // Folder unplugged, child wired straight into the output.
        fx.feed(inner, fx.output, props::BACKGROUND);
        assert!(tree.update(&fx.graph));
        assert_eq!(names(tree.members()), vec!["inner"]);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn info_refreshes_from_node() {
        let mut fx = Fixture::new();
        let layer = fx.add(NodeKind::ImageLayer, "l");
        fx.feed(layer, fx.output, props::BACKGROUND);
        let mut tree = StructureTree::new();
        tree.update(&fx.graph);

        let node = fx.graph.node_mut(layer).unwrap();
        node.input_mut(PropName::intern(props::IS_VISIBLE)).unwrap().value = PropertyValue::Bool(false);
        node.name = "renamed".into();
        assert!(tree.update(&fx.graph));
        let member = tree.find(layer).unwrap();
        assert!(!member.is_visible());
        assert!(member.mask_is_visible());
        assert_eq!(member.name(), "renamed");
    }

    #[test]
    fn no_output_means_empty_tree() {
        let mut graph = NodeGraph::new();
        graph.add_node(Node::new(NodeKind::ImageLayer)).unwrap();
        let mut tree = StructureTree::new();
        assert!(!tree.update(&graph));
        assert!(tree.is_empty());
    }
}
