//! Reversible document actions.
//!
//! Every action applied to a document returns the action that takes the
//! document back to where it was, computed from the state it replaced (the
//! same `compute_inverse`-before-apply approach a command stack uses). The
//! change tracker never looks inside an action: it only applies them and
//! keeps their inverses.

use pixgraph_core::{
    AnimationData, ChangeInfo, Connection, Document, DocumentError, FlipAxis, GraphError,
    KeyFrameData, KeyFrameId, KeyFramePayload, Node, NodeId, PropName, PropertyValue, RectI,
    ResizeAnchor, SizeI, SurfaceRef, Symmetry, VecD,
};
use std::fmt;

/// Result of applying an action: how to undo it and what it touched.
#[derive(Debug, Clone)]
pub struct Applied<A> {
    pub inverse: A,
    pub changes: Vec<ChangeInfo>,
}

/// A document mutation the change tracker can apply and revert.
pub trait Action: Clone + fmt::Debug {
    /// Apply to `document`. On error the document must be unchanged.
    fn apply(&self, document: &mut Document) -> Result<Applied<Self>, DocumentError>;

    /// Whether `next`, committed right after `self`, may be folded into the
    /// same undo step.
    fn is_mergeable_with(&self, _next: &Self) -> bool {
        false
    }

    /// Short human-readable label for undo history.
    fn label(&self) -> &'static str {
        "edit"
    }
}

/// The concrete action set used by [`DocumentSession`](crate::DocumentSession).
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentAction {
    /// Add nodes, then restore the given connections. Connections never
    /// replace existing ones.
    CreateNodes {
        nodes: Vec<Node>,
        connections: Vec<Connection>,
    },
    /// Remove nodes (and their pair partners) with every connection.
    DeleteNodes { ids: Vec<NodeId> },
    Connect(Connection),
    Disconnect { to: NodeId, input: PropName },
    SetPropertyValue {
        node: NodeId,
        name: PropName,
        value: PropertyValue,
    },
    RenameNode { node: NodeId, name: String },
    SetNodePositions { positions: Vec<(NodeId, VecD)> },

    CreateCel {
        node: NodeId,
        keyframe: KeyFrameData,
        /// Position in the node's keyframe list; `None` appends.
        index: Option<usize>,
    },
    DeleteCel { id: KeyFrameId },
    SetCelTiming {
        id: KeyFrameId,
        start: i32,
        duration: i32,
    },
    SetCelVisibility { id: KeyFrameId, visible: bool },

    ResizeCanvas { size: SizeI, anchor: ResizeAnchor },
    ResizeImage { size: SizeI },
    Flip { axis: FlipAxis },
    /// Clockwise quarter turns, `1..=3`.
    Rotate { quarter_turns: u8 },
    /// Put canvas size, selection and every raster surface back.
    RestoreCanvas(CanvasState),

    SetFrameRate(i32),
    SetOnionSettings { frames: i32, opacity: f64 },
    SetDefaultEndFrame(i32),
    SetAnimationData(AnimationData),

    SetSelection(Option<RectI>),
    SetSymmetry(Symmetry),

    /// Several actions applied as one; all or nothing.
    Compound(Vec<DocumentAction>),
}

/// Everything a canvas transform can change.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasState {
    pub size: SizeI,
    pub selection: Option<RectI>,
    pub surfaces: Vec<(KeyFrameId, SurfaceRef)>,
}

impl CanvasState {
    fn capture(document: &Document) -> Self {
        let surfaces = document
            .keyframes()
            .filter_map(|(_, kf)| match kf.payload {
                KeyFramePayload::Raster(s) => Some((kf.id, s)),
                _ => None,
            })
            .collect();
        Self {
            size: document.size,
            selection: document.selection,
            surfaces,
        }
    }

    fn restore(&self, document: &mut Document) {
        document.size = self.size;
        document.selection = self.selection;
        for (id, surface) in &self.surfaces {
            if let Some(kf) = document.keyframe_mut(*id)
                && let KeyFramePayload::Raster(s) = &mut kf.payload
            {
                *s = *surface;
            }
        }
    }
}

fn invalid(msg: impl Into<String>) -> DocumentError {
    DocumentError::InvalidArgument(msg.into())
}

impl Action for DocumentAction {
    fn apply(&self, document: &mut Document) -> Result<Applied<Self>, DocumentError> {
        document.ensure_alive()?;
        match self {
            Self::CreateNodes { nodes, connections } => create_nodes(document, nodes, connections),
            Self::DeleteNodes { ids } => delete_nodes(document, ids),

            Self::Connect(conn) => {
                let replaced = document.graph.connect(*conn)?;
                let inverse = match replaced {
                    Some(old) => Self::Connect(old),
                    None => Self::Disconnect {
                        to: conn.to,
                        input: conn.input,
                    },
                };
                Ok(Applied {
                    inverse,
                    changes: vec![ChangeInfo::ConnectionChanged {
                        to: conn.to,
                        input: conn.input,
                    }],
                })
            }

            Self::Disconnect { to, input } => {
                let removed = document.graph.disconnect(*to, *input)?;
                Ok(Applied {
                    inverse: Self::Connect(removed),
                    changes: vec![ChangeInfo::ConnectionChanged {
                        to: *to,
                        input: *input,
                    }],
                })
            }

            Self::SetPropertyValue { node, name, value } => {
                let n = document
                    .graph
                    .node_mut(*node)
                    .ok_or(GraphError::NodeNotFound(*node))?;
                let input = n.input_mut(*name).ok_or(GraphError::PropertyNotFound {
                    node: *node,
                    name: *name,
                    kind: "input",
                })?;
                let converted = value.converted_to(input.value_type).ok_or_else(|| {
                    invalid(format!(
                        "{:?} value does not fit {:?} input `{name}`",
                        value.value_type(),
                        input.value_type
                    ))
                })?;
                let old = std::mem::replace(&mut input.value, converted);
                Ok(Applied {
                    inverse: Self::SetPropertyValue {
                        node: *node,
                        name: *name,
                        value: old,
                    },
                    changes: vec![ChangeInfo::PropertyValueChanged {
                        node: *node,
                        name: *name,
                    }],
                })
            }

            Self::RenameNode { node, name } => {
                let n = document
                    .graph
                    .node_mut(*node)
                    .ok_or(GraphError::NodeNotFound(*node))?;
                let old = std::mem::replace(&mut n.name, name.clone());
                Ok(Applied {
                    inverse: Self::RenameNode {
                        node: *node,
                        name: old,
                    },
                    changes: vec![ChangeInfo::NodeRenamed(*node)],
                })
            }

            Self::SetNodePositions { positions } => {
                for (id, _) in positions {
                    if !document.graph.contains(*id) {
                        return Err(GraphError::NodeNotFound(*id).into());
                    }
                }
                let mut old = Vec::with_capacity(positions.len());
                let mut changes = Vec::with_capacity(positions.len());
                for (id, pos) in positions {
                    if let Some(n) = document.graph.node_mut(*id) {
                        old.push((*id, std::mem::replace(&mut n.position, *pos)));
                        changes.push(ChangeInfo::NodeMoved(*id));
                    }
                }
                // Restore in reverse so repeated ids end up at their first value.
                old.reverse();
                Ok(Applied {
                    inverse: Self::SetNodePositions { positions: old },
                    changes,
                })
            }

            Self::CreateCel {
                node,
                keyframe,
                index,
            } => {
                if !KeyFrameData::is_valid_timing(keyframe.start, keyframe.duration) {
                    return Err(DocumentError::InvalidCelTiming {
                        start: keyframe.start,
                        duration: keyframe.duration,
                    });
                }
                if document.find_keyframe(keyframe.id).is_some() {
                    return Err(invalid(format!("keyframe {} already exists", keyframe.id)));
                }
                let n = document
                    .graph
                    .node_mut(*node)
                    .ok_or(GraphError::NodeNotFound(*node))?;
                let at = index.unwrap_or(n.keyframes.len()).min(n.keyframes.len());
                n.keyframes.insert(at, keyframe.clone());
                Ok(Applied {
                    inverse: Self::DeleteCel { id: keyframe.id },
                    changes: vec![ChangeInfo::KeyFrameAdded {
                        node: *node,
                        keyframe: keyframe.id,
                    }],
                })
            }

            Self::DeleteCel { id } => {
                let owner = document
                    .keyframe_owner(*id)
                    .ok_or(DocumentError::KeyFrameNotFound(*id))?;
                let n = document
                    .graph
                    .node_mut(owner)
                    .ok_or(GraphError::NodeNotFound(owner))?;
                let index = n
                    .keyframes
                    .iter()
                    .position(|k| k.id == *id)
                    .ok_or(DocumentError::KeyFrameNotFound(*id))?;
                let keyframe = n.keyframes.remove(index);
                Ok(Applied {
                    inverse: Self::CreateCel {
                        node: owner,
                        keyframe,
                        index: Some(index),
                    },
                    changes: vec![ChangeInfo::KeyFrameRemoved {
                        node: owner,
                        keyframe: *id,
                    }],
                })
            }

            Self::SetCelTiming {
                id,
                start,
                duration,
            } => {
                if !KeyFrameData::is_valid_timing(*start, *duration) {
                    return Err(DocumentError::InvalidCelTiming {
                        start: *start,
                        duration: *duration,
                    });
                }
                let owner = document
                    .keyframe_owner(*id)
                    .ok_or(DocumentError::KeyFrameNotFound(*id))?;
                let kf = document
                    .keyframe_mut(*id)
                    .ok_or(DocumentError::KeyFrameNotFound(*id))?;
                let inverse = Self::SetCelTiming {
                    id: *id,
                    start: kf.start,
                    duration: kf.duration,
                };
                kf.start = *start;
                kf.duration = *duration;
                Ok(Applied {
                    inverse,
                    changes: vec![ChangeInfo::KeyFrameChanged {
                        node: owner,
                        keyframe: *id,
                    }],
                })
            }

            Self::SetCelVisibility { id, visible } => {
                let owner = document
                    .keyframe_owner(*id)
                    .ok_or(DocumentError::KeyFrameNotFound(*id))?;
                let kf = document
                    .keyframe_mut(*id)
                    .ok_or(DocumentError::KeyFrameNotFound(*id))?;
                let old = std::mem::replace(&mut kf.visible, *visible);
                Ok(Applied {
                    inverse: Self::SetCelVisibility {
                        id: *id,
                        visible: old,
                    },
                    changes: vec![ChangeInfo::KeyFrameChanged {
                        node: owner,
                        keyframe: *id,
                    }],
                })
            }

            Self::ResizeCanvas { size, anchor } => {
                if !size.is_valid() {
                    return Err(invalid(format!("canvas size {}x{}", size.width, size.height)));
                }
                transform_canvas(document, |doc| {
                    let offset = anchor.content_offset(doc.size, *size);
                    for s in doc.surfaces_mut() {
                        s.offset.x += offset.x;
                        s.offset.y += offset.y;
                    }
                    doc.size = *size;
                    doc.selection = None;
                    vec![ChangeInfo::CanvasResized(*size)]
                })
            }

            Self::ResizeImage { size } => {
                if !size.is_valid() {
                    return Err(invalid(format!("image size {}x{}", size.width, size.height)));
                }
                transform_canvas(document, |doc| {
                    let old = doc.size;
                    for s in doc.surfaces_mut() {
                        s.scale(old, *size);
                    }
                    doc.size = *size;
                    doc.selection = None;
                    vec![ChangeInfo::CanvasResized(*size), ChangeInfo::ContentTransformed]
                })
            }

            Self::Flip { axis } => transform_canvas(document, |doc| {
                let canvas = doc.size;
                for s in doc.surfaces_mut() {
                    s.flip(*axis, canvas);
                }
                vec![ChangeInfo::ContentTransformed]
            }),

            Self::Rotate { quarter_turns } => {
                let turns = quarter_turns % 4;
                if turns == 0 {
                    return Err(invalid("rotation must be 1 to 3 quarter turns"));
                }
                transform_canvas(document, |doc| {
                    for _ in 0..turns {
                        let canvas = doc.size;
                        for s in doc.surfaces_mut() {
                            s.rotate_cw(canvas);
                        }
                        doc.size = canvas.transposed();
                    }
                    doc.selection = None;
                    let mut changes = vec![ChangeInfo::ContentTransformed];
                    if turns % 2 == 1 {
                        changes.insert(0, ChangeInfo::CanvasResized(doc.size));
                    }
                    changes
                })
            }

            Self::RestoreCanvas(state) => {
                let size_changed = document.size != state.size;
                transform_canvas(document, |doc| {
                    state.restore(doc);
                    let mut changes = vec![ChangeInfo::ContentTransformed];
                    if size_changed {
                        changes.insert(0, ChangeInfo::CanvasResized(state.size));
                    }
                    changes
                })
            }

            Self::SetFrameRate(rate) => {
                if *rate <= 0 {
                    return Err(invalid(format!("frame rate {rate}")));
                }
                edit_animation(document, |a| a.set_frame_rate(*rate))
            }

            Self::SetOnionSettings { frames, opacity } => {
                if *frames < 1 || !(0.0..=100.0).contains(opacity) {
                    return Err(invalid(format!("onion skin {frames} frames at {opacity}%")));
                }
                edit_animation(document, |a| {
                    a.onion_frames = *frames;
                    a.onion_opacity = *opacity;
                })
            }

            Self::SetDefaultEndFrame(frame) => {
                if *frame < 0 {
                    return Err(invalid(format!("default end frame {frame}")));
                }
                edit_animation(document, |a| a.set_default_end_frame(*frame))
            }

            Self::SetAnimationData(data) => edit_animation(document, |a| *a = data.clone()),

            Self::SetSelection(selection) => {
                let old = std::mem::replace(&mut document.selection, *selection);
                Ok(Applied {
                    inverse: Self::SetSelection(old),
                    changes: vec![ChangeInfo::SelectionChanged],
                })
            }

            Self::SetSymmetry(symmetry) => {
                let old = std::mem::replace(&mut document.symmetry, *symmetry);
                Ok(Applied {
                    inverse: Self::SetSymmetry(old),
                    changes: vec![ChangeInfo::SymmetryChanged],
                })
            }

            Self::Compound(actions) => {
                let mut inverses = Vec::with_capacity(actions.len());
                let mut changes = Vec::new();
                for action in actions {
                    match action.apply(document) {
                        Ok(applied) => {
                            inverses.push(applied.inverse);
                            changes.extend(applied.changes);
                        }
                        Err(err) => {
                            revert(document, inverses)?;
                            return Err(err);
                        }
                    }
                }
                inverses.reverse();
                Ok(Applied {
                    inverse: Self::Compound(inverses),
                    changes,
                })
            }
        }
    }

    fn is_mergeable_with(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::SetNodePositions { positions: a }, Self::SetNodePositions { positions: b }) => {
                a.len() == b.len() && a.iter().zip(b).all(|((x, _), (y, _))| x == y)
            }
            (
                Self::SetPropertyValue { node: a, name: na, .. },
                Self::SetPropertyValue { node: b, name: nb, .. },
            ) => a == b && na == nb,
            (Self::SetCelTiming { id: a, .. }, Self::SetCelTiming { id: b, .. }) => a == b,
            _ => false,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::CreateNodes { .. } => "create nodes",
            Self::DeleteNodes { .. } => "delete nodes",
            Self::Connect(_) => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::SetPropertyValue { .. } => "set property",
            Self::RenameNode { .. } => "rename",
            Self::SetNodePositions { .. } => "move nodes",
            Self::CreateCel { .. } => "create cel",
            Self::DeleteCel { .. } => "delete cel",
            Self::SetCelTiming { .. } => "change cel timing",
            Self::SetCelVisibility { .. } => "change cel visibility",
            Self::ResizeCanvas { .. } => "resize canvas",
            Self::ResizeImage { .. } => "resize image",
            Self::Flip { .. } => "flip",
            Self::Rotate { .. } => "rotate",
            Self::RestoreCanvas(_) => "restore canvas",
            Self::SetFrameRate(_)
            | Self::SetOnionSettings { .. }
            | Self::SetDefaultEndFrame(_)
            | Self::SetAnimationData(_) => "animation settings",
            Self::SetSelection(_) => "select",
            Self::SetSymmetry(_) => "symmetry",
            Self::Compound(_) => "edit",
        }
    }
}

/// Apply already-computed inverses, last first.
fn revert(document: &mut Document, inverses: Vec<DocumentAction>) -> Result<(), DocumentError> {
    for inverse in inverses.into_iter().rev() {
        inverse.apply(document).map_err(|err| {
            DocumentError::CorruptedState(format!("rollback failed: {err}"))
        })?;
    }
    Ok(())
}

fn create_nodes(
    document: &mut Document,
    nodes: &[Node],
    connections: &[Connection],
) -> Result<Applied<DocumentAction>, DocumentError> {
    let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
    document.graph.add_nodes(nodes.to_vec())?;
    let mut changes: Vec<ChangeInfo> = ids.iter().map(|id| ChangeInfo::NodeAdded(*id)).collect();
    for conn in connections {
        if let Err(err) = document.graph.restore_connection(*conn) {
            // Nodes were added in one batch; taking them out again drops
            // the connections made so far.
            document.graph.remove_nodes(&ids)?;
            return Err(err.into());
        }
        changes.push(ChangeInfo::ConnectionChanged {
            to: conn.to,
            input: conn.input,
        });
    }
    Ok(Applied {
        inverse: DocumentAction::DeleteNodes { ids },
        changes,
    })
}

fn delete_nodes(document: &mut Document, ids: &[NodeId]) -> Result<Applied<DocumentAction>, DocumentError> {
    let removed = document.graph.remove_nodes(ids)?;
    let mut nodes = Vec::with_capacity(removed.len());
    let mut connections: Vec<Connection> = Vec::new();
    let mut changes = Vec::new();
    for r in removed {
        for conn in r.connections {
            changes.push(ChangeInfo::ConnectionChanged {
                to: conn.to,
                input: conn.input,
            });
            connections.push(conn);
        }
        changes.push(ChangeInfo::NodeRemoved(r.node.id));
        nodes.push(r.node);
    }
    // Connections between two removed nodes were captured twice.
    connections.sort();
    connections.dedup();
    Ok(Applied {
        inverse: DocumentAction::CreateNodes { nodes, connections },
        changes,
    })
}

/// Run a canvas transform; the inverse restores the captured state.
fn transform_canvas<F>(document: &mut Document, f: F) -> Result<Applied<DocumentAction>, DocumentError>
where
    F: FnOnce(&mut Document) -> Vec<ChangeInfo>,
{
    let before = CanvasState::capture(document);
    let changes = f(document);
    Ok(Applied {
        inverse: DocumentAction::RestoreCanvas(before),
        changes,
    })
}

fn edit_animation<F>(document: &mut Document, f: F) -> Result<Applied<DocumentAction>, DocumentError>
where
    F: FnOnce(&mut AnimationData),
{
    let before = document.animation.clone();
    f(&mut document.animation);
    Ok(Applied {
        inverse: DocumentAction::SetAnimationData(before),
        changes: vec![ChangeInfo::AnimationSettingsChanged],
    })
}
