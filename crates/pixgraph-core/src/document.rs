//! The authoritative document: graph, animation settings, canvas metadata.

use crate::animation::AnimationData;
use crate::config::EditorConfig;
use crate::error::{DocumentError, GraphError, SerializationError};
use crate::graph::{Connection, NodeGraph};
use crate::id::{DocumentId, KeyFrameId, NodeId};
use crate::node::{KeyFrameData, Node, NodeKind};
use crate::value::{RectI, SizeI, SurfaceRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Symmetry guides shown by drawing tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Symmetry {
    pub horizontal: bool,
    pub vertical: bool,
    pub horizontal_axis: f64,
    pub vertical_axis: f64,
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    /// The node graph; the output node is created with the document.
    pub graph: NodeGraph,
    pub animation: AnimationData,
    /// Canvas size in pixels.
    pub size: SizeI,
    pub selection: Option<RectI>,
    pub symmetry: Symmetry,
    disposed: bool,
}

impl Document {
    /// New document with an output node and nothing else.
    #[must_use]
    pub fn new(size: SizeI, animation: AnimationData) -> Self {
        let mut graph = NodeGraph::new();
        if let Err(err) = graph.add_node(Node::new(NodeKind::Output)) {
            log::warn!("output node not created: {err}");
        }
        Self {
            id: DocumentId::new(),
            graph,
            animation,
            size,
            selection: None,
            symmetry: Symmetry::default(),
            disposed: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(config.default_document_size, config.animation_data())
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    // ─── Lifetime ────────────────────────────────────────────────────────

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the graph and everything it owns. Further mutations fail
    /// with [`DocumentError::ResourceDisposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        log::debug!("dispose document {} ({} nodes)", self.id, self.graph.len());
        self.graph = NodeGraph::new();
        self.selection = None;
        self.disposed = true;
    }

    pub fn ensure_alive(&self) -> Result<(), DocumentError> {
        if self.disposed {
            Err(DocumentError::ResourceDisposed)
        } else {
            Ok(())
        }
    }

    // ─── Keyframes ───────────────────────────────────────────────────────

    /// All keyframes with their owning node, in node order.
    pub fn keyframes(&self) -> impl Iterator<Item = (NodeId, &KeyFrameData)> {
        self.graph
            .nodes()
            .flat_map(|n| n.keyframes.iter().map(move |k| (n.id, k)))
    }

    pub fn find_keyframe(&self, id: KeyFrameId) -> Option<(NodeId, &KeyFrameData)> {
        self.keyframes().find(|(_, k)| k.id == id)
    }

    pub fn keyframe_owner(&self, id: KeyFrameId) -> Option<NodeId> {
        self.find_keyframe(id).map(|(node, _)| node)
    }

    pub fn keyframe_mut(&mut self, id: KeyFrameId) -> Option<&mut KeyFrameData> {
        self.graph.nodes_mut().find_map(|n| n.keyframe_mut(id))
    }

    /// Every raster surface the document owns.
    pub fn surfaces_mut(&mut self) -> impl Iterator<Item = &mut SurfaceRef> {
        self.graph.nodes_mut().flat_map(Node::surfaces_mut)
    }

    // ─── Snapshots ───────────────────────────────────────────────────────

    /// Deterministic copy of the persistent state.
    pub fn snapshot(&self) -> DocumentSnapshot {
        let mut nodes: Vec<Node> = self.graph.nodes().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        DocumentSnapshot {
            id: self.id,
            size: self.size,
            nodes,
            connections: self.graph.connections(),
            output: self.graph.output_node(),
            animation: self.animation.clone(),
            selection: self.selection,
            symmetry: self.symmetry,
        }
    }

    /// Rebuild a document from saved state. Unknown ids and invalid data
    /// are reported as [`DocumentError::CorruptedState`]; cycles are left
    /// for evaluation to report.
    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Result<Self, DocumentError> {
        let corrupted = |err: GraphError| DocumentError::CorruptedState(err.to_string());
        if !snapshot.size.is_valid() {
            return Err(DocumentError::CorruptedState(format!(
                "invalid canvas size {}x{}",
                snapshot.size.width, snapshot.size.height
            )));
        }

        let mut seen = HashSet::new();
        for node in &snapshot.nodes {
            for kf in &node.keyframes {
                if !seen.insert(kf.id) {
                    return Err(DocumentError::CorruptedState(format!(
                        "keyframe {} appears more than once",
                        kf.id
                    )));
                }
                if !KeyFrameData::is_valid_timing(kf.start, kf.duration) {
                    return Err(DocumentError::CorruptedState(format!(
                        "keyframe {} has invalid timing {}+{}",
                        kf.id, kf.start, kf.duration
                    )));
                }
            }
        }

        let graph = NodeGraph::from_parts(snapshot.nodes, &snapshot.connections, snapshot.output)
            .map_err(corrupted)?;
        Ok(Self {
            id: snapshot.id,
            graph,
            animation: snapshot.animation,
            size: snapshot.size,
            selection: snapshot.selection,
            symmetry: snapshot.symmetry,
            disposed: false,
        })
    }
}

/// Persistent document state in canonical order: nodes sorted by id,
/// connections sorted. Two equal documents produce equal snapshots and
/// equal bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub size: SizeI,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    pub output: Option<NodeId>,
    pub animation: AnimationData,
    pub selection: Option<RectI>,
    pub symmetry: Symmetry,
}

impl DocumentSnapshot {
    /// Compact MessagePack encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        rmp_serde::from_slice(bytes).map_err(|e| DocumentError::CorruptedState(e.to_string()))
    }

    /// Human-readable form for debugging and fixtures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(json).map_err(|e| DocumentError::CorruptedState(e.to_string()))
    }
}
