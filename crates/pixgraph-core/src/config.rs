//! Editor configuration, passed explicitly to each session.

use crate::animation::AnimationData;
use crate::value::SizeI;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Undo steps kept before the oldest is dropped. Default: **100**.
    pub max_undo_depth: usize,

    /// Frame rate of new documents. Default: **60**.
    pub frame_rate: i32,

    /// Last frame of an empty timeline. Default: **60**.
    pub default_end_frame: i32,

    /// Onion-skin frames on each side of the active frame. Default: **1**.
    pub onion_frames: i32,

    /// Onion-skin opacity in percent. Default: **50**.
    pub onion_opacity: f64,

    /// Canvas size of new documents. Default: **64×64**.
    pub default_document_size: SizeI,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_undo_depth: 100,
            frame_rate: 60,
            default_end_frame: 60,
            onion_frames: 1,
            onion_opacity: 50.0,
            default_document_size: SizeI::new(64, 64),
        }
    }
}

impl EditorConfig {
    /// Animation settings a new document starts with.
    pub fn animation_data(&self) -> AnimationData {
        AnimationData {
            frame_rate: self.frame_rate,
            onion_frames: self.onion_frames.max(1),
            onion_opacity: self.onion_opacity.clamp(0.0, 100.0),
            default_end_frame: self.default_end_frame,
            default_end_frame_set: false,
            fallback_to_layer_image: false,
        }
    }
}
