//! Render observation off the audio thread.
//!
//! ```text
//! Audio Thread → RenderTap → Ring Buffers → Dispatcher Task → RenderObserver
//!                                             ↑
//!                    device / sample-rate notices (unbounded channel)
//! ```
//!
//! - **RenderTap**: copies each rendered block into pre-allocated rings
//! - **Dispatcher**: tokio task that drains the rings and calls the observer
//! - **Bridge**: owns the single observer slot and the dispatcher handle
//!
//! The tap never blocks the audio thread. When the dispatcher falls behind,
//! whole blocks are dropped and counted instead.

mod bridge;
mod buffer;
mod tap;

pub use bridge::{RenderObserver, RenderObserverBridge};
pub use buffer::RenderedBuffer;
