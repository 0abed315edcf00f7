//! # audio-graph
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time audio output graph for media players.
//!
//! `audio-graph` keeps a linear chain of processing nodes between a player
//! and the output device, inserts and removes effects while audio is
//! playing, reconnects the player when the track format changes, follows
//! output device changes, and lets visualizers observe rendered audio
//! without touching the real-time path.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use audio_graph::{AudioGraph, AudioGraphState, AudioUnitType, FxSlot, UnitState};
//!
//! let mut graph = AudioGraph::builder()
//!     .state(AudioGraphState::load("audio-graph.json").unwrap_or_default())
//!     .on_event(|e| tracing::info!(?e, "graph event"))
//!     .build()?;
//!
//! graph.set_volume(0.7);
//! graph.set_unit_state(FxSlot::Reverb, UnitState::Active);
//!
//! // Effects can be added and removed while audio plays
//! let (_, index) = graph.add_audio_unit(AudioUnitType::new(0x6175_6678, 0x6c6d_7472))?;
//! graph.remove_audio_units(&[index])?;
//!
//! graph.persistent_state().save("audio-graph.json")?;
//! graph.tear_down().await;
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Control side**: [`AudioGraph`], [`GraphEngine`] and [`NodeChain`] stage
//!   every topology change and publish it with one commit
//! - **Audio Thread**: renders the committed chain and copies each block into
//!   a lock-free tap; it never allocates, locks or blocks
//! - **Tokio Runtime**: a dispatcher task drains the tap and calls the
//!   registered [`RenderObserver`]
//!
//! Mutations are not internally synchronized. Share the graph as a
//! [`SharedAudioGraph`] when more than one task changes it.

// unsafe_code lint is configured in Cargo.toml as "deny"; the CPAL stream wrapper opts out locally
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod audio_graph;
mod builder;
mod chain;
mod config;
pub mod device;
mod engine;
mod error;
mod event;
mod format;
mod node;
mod pipeline;
pub mod runtime;
mod state;
pub mod units;

pub use audio_graph::{
    spawn_device_change_listener, AudioGraph, PlayerGraph, RecorderGraph, SharedAudioGraph,
};
pub use builder::AudioGraphBuilder;
pub use chain::NodeChain;
pub use config::{GraphConfig, SoundProfilePolicy};
pub use device::{
    default_output_device_name, list_output_devices, AudioDevice, CpalDeviceCatalog,
    DeviceCatalog, MockDeviceCatalog,
};
pub use engine::{EngineState, GraphEngine};
pub use error::GraphError;
pub use event::{event_callback, EventCallback, GraphEvent};
pub use format::AudioFormat;
pub use node::{MixerProcessor, NodeId, NodeProcessor, Passthrough, PlayerProcessor, ProcessingNode};
pub use pipeline::{RenderObserver, RenderObserverBridge, RenderedBuffer};
pub use runtime::{
    AudioRuntime, CpalRuntime, Edge, Endpoint, MockRuntime, Notification, RenderCallbacks,
    RenderInfo, RenderSink,
};
pub use state::{AudioGraphState, HostedUnitSettings, SoundProfile, SoundProfiles, UnitSettings};
pub use units::{
    AudioUnitHost, AudioUnitType, EffectUnit, FxSlot, FxUnit, GenericUnitHost, HostedAudioUnit,
    MasterUnit, UnitState,
};
