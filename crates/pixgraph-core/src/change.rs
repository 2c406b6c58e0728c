//! Change notifications produced when actions are applied.

use crate::id::{KeyFrameId, NodeId, PropName};
use crate::value::SizeI;

/// What one applied action changed. The projectors use these to decide
/// which derived views need refreshing.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeInfo {
    NodeAdded(NodeId),
    NodeRemoved(NodeId),
    NodeRenamed(NodeId),
    NodeMoved(NodeId),
    PropertyValueChanged { node: NodeId, name: PropName },
    ConnectionChanged { to: NodeId, input: PropName },
    KeyFrameAdded { node: NodeId, keyframe: KeyFrameId },
    KeyFrameRemoved { node: NodeId, keyframe: KeyFrameId },
    KeyFrameChanged { node: NodeId, keyframe: KeyFrameId },
    CanvasResized(SizeI),
    /// Raster content of the whole document changed (flip, rotate, scale).
    ContentTransformed,
    AnimationSettingsChanged,
    SelectionChanged,
    SymmetryChanged,
}

impl ChangeInfo {
    /// Whether the layer tree may need re-projection.
    pub fn affects_structure(&self) -> bool {
        matches!(
            self,
            Self::NodeAdded(_)
                | Self::NodeRemoved(_)
                | Self::NodeRenamed(_)
                | Self::PropertyValueChanged { .. }
                | Self::ConnectionChanged { .. }
        )
    }

    /// Whether the timeline view may need rebuilding.
    pub fn affects_timeline(&self) -> bool {
        matches!(
            self,
            Self::NodeAdded(_)
                | Self::NodeRemoved(_)
                | Self::ConnectionChanged { .. }
                | Self::KeyFrameAdded { .. }
                | Self::KeyFrameRemoved { .. }
                | Self::KeyFrameChanged { .. }
                | Self::AnimationSettingsChanged
        )
    }

    /// Node this change is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::NodeAdded(id) | Self::NodeRemoved(id) | Self::NodeRenamed(id) | Self::NodeMoved(id) => {
                Some(*id)
            }
            Self::PropertyValueChanged { node, .. }
            | Self::KeyFrameAdded { node, .. }
            | Self::KeyFrameRemoved { node, .. }
            | Self::KeyFrameChanged { node, .. } => Some(*node),
            Self::ConnectionChanged { to, .. } => Some(*to),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let id = NodeId::new();
        assert!(ChangeInfo::NodeAdded(id).affects_structure());
        assert!(ChangeInfo::NodeAdded(id).affects_timeline());
        assert!(!ChangeInfo::NodeMoved(id).affects_structure());
        assert!(!ChangeInfo::SelectionChanged.affects_timeline());
        assert_eq!(ChangeInfo::NodeMoved(id).node(), Some(id));
        assert_eq!(ChangeInfo::CanvasResized(SizeI::new(1, 1)).node(), None);
    }
}
