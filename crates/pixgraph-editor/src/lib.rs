pub mod accumulator;
pub mod action;
pub mod render;
pub mod session;
pub mod tracker;

pub use accumulator::{ActionAccumulator, Passthrough, Processed, Request};
pub use action::{Action, Applied, CanvasState, DocumentAction};
pub use render::{CancellationToken, FrameRenderer, RenderContext, render_frames};
pub use session::{DocumentEvent, DocumentSession, InsertAt};
pub use tracker::{ChangeTracker, Commit};
