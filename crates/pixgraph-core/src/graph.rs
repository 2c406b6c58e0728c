//! The document's node graph.
//!
//! A `StableDiGraph` of [`Node`] values. Edges run from the upstream node
//! (the one producing a value) to the downstream node (the one consuming
//! it) and carry the names of the output and input properties they join.
//! Every input has at most one incoming edge; outputs fan out freely.
//!
//! Evaluation starts from the designated output node and walks upstream.
//! Graphs built through [`NodeGraph::connect`] are kept acyclic, but graphs
//! restored from saved data are not re-validated, so evaluation detects
//! cycles itself and reports them instead of spinning.

use crate::error::GraphError;
use crate::id::{NodeId, PropName};
use crate::node::{InputProperty, Node, NodeKind};
use petgraph::Direction;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::{EdgeReference, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// Edge weight: which output feeds which input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub output: PropName,
    pub input: PropName,
}

/// A connection addressed by node ids, as stored in snapshots and undo data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub to: NodeId,
    pub input: PropName,
    pub from: NodeId,
    pub output: PropName,
}

impl Connection {
    pub fn new(from: NodeId, output: &str, to: NodeId, input: &str) -> Self {
        Self {
            from,
            output: PropName::intern(output),
            to,
            input: PropName::intern(input),
        }
    }

    pub fn touches(&self, id: NodeId) -> bool {
        self.from == id || self.to == id
    }
}

/// A node taken out of the graph together with every connection it had.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedNode {
    pub node: Node,
    pub connections: Vec<Connection>,
}

/// A connected input, resolved to the node feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upstream {
    pub input: PropName,
    pub node: NodeId,
    pub output: PropName,
}

#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    graph: StableDiGraph<Node, Link>,
    id_index: HashMap<NodeId, NodeIndex>,
    output: Option<NodeId>,
}

impl NodeGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from saved nodes and connections.
    ///
    /// Ids and property names are validated; cycles are not.
    pub fn from_parts(
        nodes: Vec<Node>,
        connections: &[Connection],
        output: Option<NodeId>,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            if graph.id_index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            let id = node.id;
            let idx = graph.graph.add_node(node);
            graph.id_index.insert(id, idx);
        }
        for node in graph.graph.node_weights() {
            if let Some(pair) = node.pair
                && !graph.id_index.contains_key(&pair)
            {
                return Err(GraphError::PairMismatch(node.id));
            }
        }
        for conn in connections {
            graph.restore_connection(*conn)?;
        }
        if let Some(out) = output
            && !graph.id_index.contains_key(&out)
        {
            return Err(GraphError::NodeNotFound(out));
        }
        graph.output = output;
        Ok(graph)
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    pub fn output_node(&self) -> Option<NodeId> {
        self.output
    }

    pub fn set_output_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.index_of(id)?;
        self.output = Some(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.id_index.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.id_index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.id_index
            .get(&id)
            .copied()
            .map(|idx| &mut self.graph[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.graph.node_weights_mut()
    }

    fn index_of(&self, id: NodeId) -> Result<NodeIndex, GraphError> {
        self.id_index
            .get(&id)
            .copied()
            .ok_or(GraphError::NodeNotFound(id))
    }

    // ─── Nodes ───────────────────────────────────────────────────────────

    /// Add a single node. The first `Output` node added becomes the
    /// evaluation root. Pair halves must be added together via
    /// [`add_nodes`](Self::add_nodes).
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if let Some(pair) = node.pair
            && !self.id_index.contains_key(&pair)
        {
            return Err(GraphError::PairMismatch(node.id));
        }
        self.insert_node(node)
    }

    /// Add several nodes at once; pair partners may arrive in the same call.
    /// Nothing is added if any node is rejected.
    pub fn add_nodes(&mut self, nodes: Vec<Node>) -> Result<(), GraphError> {
        let incoming: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        if incoming.len() != nodes.len() {
            let mut seen = HashSet::new();
            let dup = nodes.iter().find(|n| !seen.insert(n.id)).map(|n| n.id);
            return Err(GraphError::DuplicateNode(dup.unwrap_or_default()));
        }
        for node in &nodes {
            if self.id_index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            if let Some(pair) = node.pair
                && !incoming.contains(&pair)
                && !self.id_index.contains_key(&pair)
            {
                return Err(GraphError::PairMismatch(node.id));
            }
        }
        for node in nodes {
            self.insert_node(node)?;
        }
        Ok(())
    }

    fn insert_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.id_index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        let id = node.id;
        if self.output.is_none() && node.kind == NodeKind::Output {
            self.output = Some(id);
        }
        let idx = self.graph.add_node(node);
        self.id_index.insert(id, idx);
        Ok(())
    }

    /// Remove a node and every connection touching it. A node whose pair
    /// partner is still present must be removed through
    /// [`remove_nodes`](Self::remove_nodes).
    pub fn remove_node(&mut self, id: NodeId) -> Result<RemovedNode, GraphError> {
        let idx = self.index_of(id)?;
        if let Some(pair) = self.graph[idx].pair
            && self.id_index.contains_key(&pair)
        {
            return Err(GraphError::PairMismatch(id));
        }
        self.take_node(idx)
    }

    /// Remove nodes, expanding the set with pair partners. Returned in
    /// removal order.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> Result<Vec<RemovedNode>, GraphError> {
        let expanded = self.expand_pairs(ids)?;
        let mut removed = Vec::with_capacity(expanded.len());
        for id in expanded {
            let idx = self.index_of(id)?;
            removed.push(self.take_node(idx)?);
        }
        Ok(removed)
    }

    /// `ids` plus the pair partner of each, deduplicated, in first-seen order.
    pub fn expand_pairs(&self, ids: &[NodeId]) -> Result<Vec<NodeId>, GraphError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &id in ids {
            let node = self.node(id).ok_or(GraphError::NodeNotFound(id))?;
            if seen.insert(id) {
                out.push(id);
            }
            if let Some(pair) = node.pair
                && self.contains(pair)
                && seen.insert(pair)
            {
                out.push(pair);
            }
        }
        Ok(out)
    }

    fn take_node(&mut self, idx: NodeIndex) -> Result<RemovedNode, GraphError> {
        let id = self.graph[idx].id;
        let mut connections: Vec<Connection> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .chain(self.graph.edges_directed(idx, Direction::Outgoing))
            .map(|e| self.connection_of(e))
            .collect();
        // A self-loop shows up in both directions.
        connections.sort();
        connections.dedup();
        let node = self
            .graph
            .remove_node(idx)
            .ok_or(GraphError::NodeNotFound(id))?;
        self.id_index.remove(&node.id);
        if self.output == Some(node.id) {
            self.output = None;
        }
        Ok(RemovedNode { node, connections })
    }

    // ─── Connections ─────────────────────────────────────────────────────

    fn connection_of(&self, edge: EdgeReference<'_, Link>) -> Connection {
        let link = edge.weight();
        Connection {
            from: self.graph[edge.source()].id,
            output: link.output,
            to: self.graph[edge.target()].id,
            input: link.input,
        }
    }

    /// The edge feeding `to.input`, with its resolved connection.
    fn incoming_edge(&self, to: NodeId, input: PropName) -> Option<(EdgeIndex, Connection)> {
        let idx = *self.id_index.get(&to)?;
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .find(|e| e.weight().input == input)
            .map(|e| (e.id(), self.connection_of(e)))
    }

    fn check_endpoints(&self, conn: &Connection) -> Result<(), GraphError> {
        let from = self.node(conn.from).ok_or(GraphError::NodeNotFound(conn.from))?;
        let to = self.node(conn.to).ok_or(GraphError::NodeNotFound(conn.to))?;
        let output = from.output(conn.output).ok_or(GraphError::PropertyNotFound {
            node: conn.from,
            name: conn.output,
            kind: "output",
        })?;
        let input = to.input(conn.input).ok_or(GraphError::PropertyNotFound {
            node: conn.to,
            name: conn.input,
            kind: "input",
        })?;
        if !output.value_type.can_feed(input.value_type) {
            return Err(GraphError::IncompatibleTypes {
                output: output.value_type,
                input: input.value_type,
            });
        }
        Ok(())
    }

    fn link_unchecked(&mut self, conn: Connection) {
        let src = self.id_index[&conn.from];
        let dst = self.id_index[&conn.to];
        self.graph.add_edge(
            src,
            dst,
            Link {
                output: conn.output,
                input: conn.input,
            },
        );
    }

    /// Connect an output to an input, replacing whatever fed that input
    /// before. Returns the replaced connection.
    pub fn connect(&mut self, conn: Connection) -> Result<Option<Connection>, GraphError> {
        self.check_endpoints(&conn)?;
        let existing = self.incoming_edge(conn.to, conn.input);
        if let Some((_, old)) = existing
            && old == conn
        {
            return Err(GraphError::DuplicateConnection {
                from: conn.from,
                output: conn.output,
                to: conn.to,
                input: conn.input,
            });
        }
        if self.is_loop(conn.from, conn.to) {
            return Err(GraphError::WouldCreateCycle {
                from: conn.from,
                to: conn.to,
            });
        }
        let replaced = existing.map(|(edge, old)| {
            self.graph.remove_edge(edge);
            old
        });
        self.link_unchecked(conn);
        Ok(replaced)
    }

    /// Put back a connection captured earlier (undo, snapshots). Unlike
    /// [`connect`](Self::connect) it never replaces an existing connection
    /// and does not look for cycles: the connection already existed once.
    pub fn restore_connection(&mut self, conn: Connection) -> Result<(), GraphError> {
        self.check_endpoints(&conn)?;
        if self.incoming_edge(conn.to, conn.input).is_some() {
            return Err(GraphError::InputOccupied {
                node: conn.to,
                input: conn.input,
            });
        }
        self.link_unchecked(conn);
        Ok(())
    }

    /// Remove the connection feeding `to.input`.
    pub fn disconnect(&mut self, to: NodeId, input: PropName) -> Result<Connection, GraphError> {
        self.index_of(to)?;
        let (edge, conn) = self
            .incoming_edge(to, input)
            .ok_or(GraphError::NotConnected { node: to, input })?;
        self.graph.remove_edge(edge);
        Ok(conn)
    }

    pub fn connection_to(&self, to: NodeId, input: PropName) -> Option<Connection> {
        self.incoming_edge(to, input).map(|(_, conn)| conn)
    }

    /// Every connection, sorted for deterministic comparison.
    pub fn connections(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self
            .graph
            .edge_references()
            .map(|e| self.connection_of(e))
            .collect();
        all.sort();
        all
    }

    /// Connections whose output side is `from`.
    pub fn connections_from(&self, from: NodeId) -> Vec<Connection> {
        let Some(&idx) = self.id_index.get(&from) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| self.connection_of(e))
            .collect()
    }

    /// Connected inputs of `id`, in the node's input declaration order.
    pub fn upstream_of(&self, id: NodeId) -> SmallVec<[Upstream; 4]> {
        let Some(&idx) = self.id_index.get(&id) else {
            return SmallVec::new();
        };
        let node = &self.graph[idx];
        let mut found: SmallVec<[(usize, Upstream); 4]> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| {
                let link = e.weight();
                let pos = node.input_position(link.input).unwrap_or(usize::MAX);
                (
                    pos,
                    Upstream {
                        input: link.input,
                        node: self.graph[e.source()].id,
                        output: link.output,
                    },
                )
            })
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, up)| up).collect()
    }

    /// Whether connecting `from` (upstream) into `to` (downstream) would
    /// close a loop.
    pub fn is_loop(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        match (self.id_index.get(&from), self.id_index.get(&to)) {
            (Some(&src), Some(&dst)) => {
                petgraph::algo::has_path_connecting(&self.graph, dst, src, None)
            }
            _ => false,
        }
    }

    // ─── Evaluation ──────────────────────────────────────────────────────

    /// Nodes in an order where each appears after everything it depends on,
    /// ending with `output`.
    pub fn evaluation_order(&self, output: NodeId) -> Result<Vec<NodeId>, GraphError> {
        self.evaluation_order_filtered(output, |_, _| true)
    }

    /// Like [`evaluation_order`](Self::evaluation_order), ignoring connected
    /// inputs the filter rejects.
    ///
    /// Breadth-first worklist from the output node. A node is emitted once
    /// every connected upstream node has been emitted; otherwise its
    /// missing dependencies are queued and the node goes to the back of the
    /// queue. If the whole queue rotates without an emission or a newly
    /// queued node, nothing can ever become ready: that is a cycle.
    pub fn evaluation_order_filtered<F>(
        &self,
        output: NodeId,
        mut branch_filter: F,
    ) -> Result<Vec<NodeId>, GraphError>
    where
        F: FnMut(&Node, &InputProperty) -> bool,
    {
        let start = self.index_of(output)?;
        let mut order = Vec::new();
        let mut emitted: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);
        let mut queued: HashSet<NodeIndex> = HashSet::from([start]);
        let mut stall = 0usize;

        // A node stays in `queued` until it is emitted, so a node waiting on
        // itself never re-enters the queue twice.
        while let Some(idx) = queue.pop_front() {
            let node = &self.graph[idx];
            let mut ready = true;
            let mut progressed = false;

            for up in self.upstream_of(node.id) {
                let up_idx = self.id_index[&up.node];
                if emitted.contains(&up_idx) {
                    continue;
                }
                let Some(input) = node.input(up.input) else {
                    continue;
                };
                if !branch_filter(node, input) {
                    continue;
                }
                ready = false;
                if queued.insert(up_idx) {
                    queue.push_back(up_idx);
                    progressed = true;
                }
            }

            if ready {
                log::trace!("evaluate {:?} ({})", node.id, node.name);
                queued.remove(&idx);
                emitted.insert(idx);
                order.push(node.id);
                stall = 0;
                continue;
            }

            stall = if progressed { 0 } else { stall + 1 };
            queue.push_back(idx);
            if stall > queue.len() {
                let stalled = queue.iter().map(|i| self.graph[*i].id).collect();
                return Err(GraphError::Cycle { stalled });
            }
        }

        Ok(order)
    }

    /// Depth-first walk upstream from `start`, each node visited once, inputs
    /// in declaration order. The visitor gets the node and the connection
    /// through which it was reached; returning `false` stops the walk.
    pub fn traverse_backwards<F>(&self, start: NodeId, mut visit: F) -> Result<(), GraphError>
    where
        F: FnMut(&Node, Option<&Connection>) -> bool,
    {
        self.index_of(start)?;
        let mut seen = HashSet::from([start]);
        let mut stack: Vec<(NodeId, Option<Connection>)> = vec![(start, None)];
        while let Some((id, via)) = stack.pop() {
            if !visit(&self.graph[self.id_index[&id]], via.as_ref()) {
                break;
            }
            let ups = self.upstream_of(id);
            for up in ups.iter().rev() {
                if seen.insert(up.node) {
                    let conn = Connection {
                        from: up.node,
                        output: up.output,
                        to: id,
                        input: up.input,
                    };
                    stack.push((up.node, Some(conn)));
                }
            }
        }
        Ok(())
    }

    /// Breadth-first walk downstream from `start`, each node visited once.
    pub fn traverse_forwards<F>(&self, start: NodeId, mut visit: F) -> Result<(), GraphError>
    where
        F: FnMut(&Node) -> bool,
    {
        let start_idx = self.index_of(start)?;
        let mut seen = HashSet::from([start_idx]);
        let mut queue = VecDeque::from([start_idx]);
        while let Some(idx) = queue.pop_front() {
            if !visit(&self.graph[idx]) {
                break;
            }
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(())
    }

    /// Hash of the node's input signature (names and types).
    pub fn inputs_hash(node: &Node) -> u64 {
        let mut hasher = DefaultHasher::new();
        for input in &node.inputs {
            input.name.as_str().hash(&mut hasher);
            input.value_type.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Hash of the node's output signature (names and types).
    pub fn outputs_hash(node: &Node) -> u64 {
        let mut hasher = DefaultHasher::new();
        for output in &node.outputs {
            output.name.as_str().hash(&mut hasher);
            output.value_type.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::props;
    use pretty_assertions::assert_eq;

    fn layer(graph: &mut NodeGraph) -> NodeId {
        let node = Node::new(NodeKind::ImageLayer);
        let id = node.id;
        graph.add_node(node).unwrap();
        id
    }

    fn filter(graph: &mut NodeGraph) -> NodeId {
        let node = Node::new(NodeKind::Filter);
        let id = node.id;
        graph.add_node(node).unwrap();
        id
    }

    fn output(graph: &mut NodeGraph) -> NodeId {
        let node = Node::new(NodeKind::Output);
        let id = node.id;
        graph.add_node(node).unwrap();
        id
    }

    fn feed(from: NodeId, to: NodeId, input: &str) -> Connection {
        Connection::new(from, props::OUTPUT, to, input)
    }

    #[test]
    fn first_output_node_becomes_root() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        output(&mut g);
        assert_eq!(g.output_node(), Some(out));
    }

    #[test]
    fn order_puts_dependencies_first() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let a = layer(&mut g);
        g.connect(feed(a, out, props::BACKGROUND)).unwrap();
        assert_eq!(g.evaluation_order(out).unwrap(), vec![a, out]);

        g.disconnect(out, PropName::intern(props::BACKGROUND)).unwrap();
        assert_eq!(g.evaluation_order(out).unwrap(), vec![out]);
    }

    #[test]
    fn diamond_emits_shared_dependency_once() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let merge = Node::new(NodeKind::Merge);
        let m = merge.id;
        g.add_node(merge).unwrap();
        let a = Node::new(NodeKind::Filter);
        let a_id = a.id;
        g.add_node(a).unwrap();
        let b = layer(&mut g);
        let base = layer(&mut g);

        g.connect(feed(m, out, props::BACKGROUND)).unwrap();
        g.connect(feed(a_id, m, props::TOP)).unwrap();
        g.connect(feed(b, m, props::BOTTOM)).unwrap();
        g.connect(feed(base, a_id, props::INPUT)).unwrap();
        g.connect(feed(base, b, props::BACKGROUND)).unwrap();

        let order = g.evaluation_order(out).unwrap();
        assert_eq!(order.len(), 5);
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(base) < pos(a_id));
        assert!(pos(base) < pos(b));
        assert!(pos(a_id) < pos(m));
        assert!(pos(b) < pos(m));
        assert_eq!(*order.last().unwrap(), out);
    }

    #[test]
    fn connect_rejects_loops_and_duplicates() {
        let mut g = NodeGraph::new();
        let a = layer(&mut g);
        let b = layer(&mut g);
        g.connect(feed(a, b, props::BACKGROUND)).unwrap();

        assert_eq!(
            g.connect(feed(b, a, props::BACKGROUND)),
            Err(GraphError::WouldCreateCycle { from: b, to: a })
        );
        assert_eq!(
            g.connect(feed(a, a, props::BACKGROUND)),
            Err(GraphError::WouldCreateCycle { from: a, to: a })
        );
        assert!(matches!(
            g.connect(feed(a, b, props::BACKGROUND)),
            Err(GraphError::DuplicateConnection { .. })
        ));
    }

    #[test]
    fn restore_refuses_occupied_input_but_not_cycles() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let a = filter(&mut g);
        let b = filter(&mut g);
        g.connect(feed(a, out, props::BACKGROUND)).unwrap();
        g.connect(feed(b, a, props::INPUT)).unwrap();

        assert!(matches!(
            g.restore_connection(feed(b, out, props::BACKGROUND)),
            Err(GraphError::InputOccupied { .. })
        ));
        g.restore_connection(feed(a, b, props::INPUT)).unwrap();
        assert!(matches!(g.evaluation_order(out), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn connect_replaces_existing_input() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let a = layer(&mut g);
        let b = layer(&mut g);
        g.connect(feed(a, out, props::BACKGROUND)).unwrap();
        let replaced = g.connect(feed(b, out, props::BACKGROUND)).unwrap();
        assert_eq!(replaced, Some(feed(a, out, props::BACKGROUND)));
        assert_eq!(g.connections().len(), 1);
        assert_eq!(g.evaluation_order(out).unwrap(), vec![b, out]);
    }

    #[test]
    fn incompatible_types_are_rejected() {
        let mut g = NodeGraph::new();
        let math = Node::new(NodeKind::Math);
        let m = math.id;
        g.add_node(math).unwrap();
        let a = layer(&mut g);
        let err = g
            .connect(Connection::new(m, props::RESULT, a, props::BACKGROUND))
            .unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleTypes { .. }));
        // Float output into a float input is fine.
        g.connect(Connection::new(m, props::RESULT, a, props::OPACITY))
            .unwrap();
    }

    #[test]
    fn removing_node_cascades_connections() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let a = layer(&mut g);
        let b = layer(&mut g);
        g.connect(feed(a, b, props::BACKGROUND)).unwrap();
        g.connect(feed(b, out, props::BACKGROUND)).unwrap();

        let removed = g.remove_node(b).unwrap();
        assert_eq!(removed.connections.len(), 2);
        assert!(g.connections().is_empty());
        assert_eq!(g.evaluation_order(out).unwrap(), vec![out]);
    }

    #[test]
    fn cyclic_fixture_reports_error() {
        let out = Node::new(NodeKind::Output);
        let a = Node::new(NodeKind::ImageLayer);
        let b = Node::new(NodeKind::ImageLayer);
        let (o, a_id, b_id) = (out.id, a.id, b.id);
        let conns = [
            feed(a_id, o, props::BACKGROUND),
            feed(b_id, a_id, props::BACKGROUND),
            feed(a_id, b_id, props::BACKGROUND),
        ];
        let g = NodeGraph::from_parts(vec![out, a, b], &conns, Some(o)).unwrap();

        match g.evaluation_order(o) {
            Err(GraphError::Cycle { stalled }) => {
                assert!(stalled.contains(&a_id));
                assert!(stalled.contains(&b_id));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_fixture_reports_error() {
        let out = Node::new(NodeKind::Output);
        let a = Node::new(NodeKind::Folder);
        let (o, a_id) = (out.id, a.id);
        let conns = [
            feed(a_id, o, props::BACKGROUND),
            feed(a_id, a_id, props::CONTENT),
        ];
        let g = NodeGraph::from_parts(vec![out, a], &conns, Some(o)).unwrap();
        assert!(matches!(g.evaluation_order(o), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn unreachable_cycle_does_not_block_evaluation() {
        let out = Node::new(NodeKind::Output);
        let a = Node::new(NodeKind::ImageLayer);
        let b = Node::new(NodeKind::ImageLayer);
        let (o, a_id, b_id) = (out.id, a.id, b.id);
        let conns = [
            feed(b_id, a_id, props::BACKGROUND),
            feed(a_id, b_id, props::BACKGROUND),
        ];
        let g = NodeGraph::from_parts(vec![out, a, b], &conns, Some(o)).unwrap();
        assert_eq!(g.evaluation_order(o).unwrap(), vec![o]);
    }

    #[test]
    fn branch_filter_skips_inputs() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let folder = Node::new(NodeKind::Folder);
        let f = folder.id;
        g.add_node(folder).unwrap();
        let inner = layer(&mut g);
        g.connect(feed(f, out, props::BACKGROUND)).unwrap();
        g.connect(feed(inner, f, props::CONTENT)).unwrap();

        let content = PropName::intern(props::CONTENT);
        let order = g
            .evaluation_order_filtered(out, |_, input| input.name != content)
            .unwrap();
        assert_eq!(order, vec![f, out]);
    }

    #[test]
    fn pairs_are_added_and_removed_together() {
        let mut g = NodeGraph::new();
        let (start, end) = Node::new_zone_pair();
        let (s, e) = (start.id, end.id);

        assert_eq!(g.add_node(start.clone()), Err(GraphError::PairMismatch(s)));
        g.add_nodes(vec![start, end]).unwrap();
        assert_eq!(g.len(), 2);

        assert_eq!(g.remove_node(s).unwrap_err(), GraphError::PairMismatch(s));
        let removed = g.remove_nodes(&[e]).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(g.is_empty());
    }

    #[test]
    fn traversal_visits_each_node_once() {
        let mut g = NodeGraph::new();
        let out = output(&mut g);
        let merge = Node::new(NodeKind::Merge);
        let m = merge.id;
        g.add_node(merge).unwrap();
        let a = layer(&mut g);
        g.connect(feed(m, out, props::BACKGROUND)).unwrap();
        g.connect(feed(a, m, props::TOP)).unwrap();
        g.connect(feed(a, m, props::BOTTOM)).unwrap();

        let mut visited = Vec::new();
        g.traverse_backwards(out, |n, _| {
            visited.push(n.id);
            true
        })
        .unwrap();
        assert_eq!(visited, vec![out, m, a]);

        let mut downstream = Vec::new();
        g.traverse_forwards(a, |n| {
            downstream.push(n.id);
            true
        })
        .unwrap();
        assert_eq!(downstream, vec![a, m, out]);
    }

    #[test]
    fn signature_hashes_track_properties() {
        let a = Node::new(NodeKind::ImageLayer);
        let b = Node::new(NodeKind::ImageLayer);
        let f = Node::new(NodeKind::Folder);
        assert_eq!(NodeGraph::inputs_hash(&a), NodeGraph::inputs_hash(&b));
        assert_ne!(NodeGraph::inputs_hash(&a), NodeGraph::inputs_hash(&f));
        assert_eq!(NodeGraph::outputs_hash(&a), NodeGraph::outputs_hash(&f));
    }
}
