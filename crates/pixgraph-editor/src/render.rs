//! Rendering boundary.
//!
//! Pixels are produced by a [`FrameRenderer`] supplied by the host. The
//! editor only hands it an immutable document snapshot and the evaluation
//! order, so rendering can run on a worker thread while editing continues.

use pixgraph_core::{Document, NodeId, SizeI};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything a renderer needs to produce one frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub document: &'a Document,
    /// Nodes to evaluate, dependencies first, ending with the output.
    pub order: &'a [NodeId],
    pub frame: i32,
    pub size: SizeI,
}

pub trait FrameRenderer {
    type Frame;

    fn render(&mut self, ctx: &RenderContext<'_>) -> Self::Frame;
}

/// Cooperative cancellation flag shared between the caller and a render job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Render `frames` in order. The token is checked before each frame; a
/// cancelled job returns what it rendered so far.
///
/// A disposed document, one without an output node, or one whose graph
/// has a cycle renders nothing.
pub fn render_frames<R: FrameRenderer>(
    document: &Arc<Document>,
    renderer: &mut R,
    frames: RangeInclusive<i32>,
    size: SizeI,
    token: &CancellationToken,
) -> Vec<(i32, R::Frame)> {
    if document.is_disposed() {
        log::warn!("render requested for disposed document {}", document.id());
        return Vec::new();
    }
    let Some(output) = document.graph.output_node() else {
        return Vec::new();
    };
    let order = match document.graph.evaluation_order(output) {
        Ok(order) => order,
        Err(err) => {
            log::warn!("document {} not renderable: {err}", document.id());
            return Vec::new();
        }
    };

    let mut rendered = Vec::new();
    for frame in frames {
        if token.is_cancelled() {
            log::debug!("render cancelled before frame {frame}");
            break;
        }
        let ctx = RenderContext {
            document,
            order: &order,
            frame,
            size,
        };
        rendered.push((frame, renderer.render(&ctx)));
    }
    rendered
}
