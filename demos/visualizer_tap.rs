//! Visualizer tap example.
//!
//! Demonstrates observing rendered audio from a tokio task while effects are
//! switched on and off. Uses the mock runtime, so no audio hardware is needed.
//!
//! Run with: cargo run --example visualizer_tap

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audio_graph::{
    AudioFormat, AudioGraph, FxSlot, GraphEvent, MockDeviceCatalog, MockRuntime, RenderObserver,
    RenderedBuffer, UnitState,
};
use tracing_subscriber::EnvFilter;

/// Tracks the peak level and the number of frames seen.
struct PeakMeter {
    peak_bits: AtomicU32,
    frames: AtomicU64,
}

impl PeakMeter {
    fn new() -> Self {
        Self {
            peak_bits: AtomicU32::new(0),
            frames: AtomicU64::new(0),
        }
    }

    fn take_peak(&self) -> f32 {
        f32::from_bits(self.peak_bits.swap(0, Ordering::Relaxed))
    }
}

#[async_trait]
impl RenderObserver for PeakMeter {
    async fn rendered(&self, buffer: &RenderedBuffer) {
        let peak = buffer.peak();
        self.peak_bits
            .fetch_max(peak.to_bits(), Ordering::Relaxed);
        self.frames
            .fetch_add(u64::from(buffer.frame_count), Ordering::Relaxed);
    }

    async fn sample_rate_changed(&self, sample_rate: u32) {
        println!("  sample rate is now {sample_rate} Hz");
    }
}

/// One block of a 440 Hz sine, interleaved stereo.
fn sine_block(start_frame: u64, frames: usize, sample_rate: u32) -> Vec<f32> {
    let mut block = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = (start_frame + i as u64) as f32 / sample_rate as f32;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.8;
        block.push(sample);
        block.push(sample);
    }
    block
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Visualizer Tap Example");
    println!("======================");
    println!();

    let runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
    let mut graph = AudioGraph::builder()
        .runtime(runtime.clone())
        .devices(MockDeviceCatalog::new(["Built-in Output"]))
        .on_event(|event| {
            if let GraphEvent::RenderBuffersDropped { count } = event {
                println!("  visualizer fell behind, {count} blocks dropped");
            }
        })
        .build()?;

    let meter = Arc::new(PeakMeter::new());
    graph.register_render_observer(meter.clone()).await?;

    // Render from a plain thread, the way an audio callback would
    let audio = runtime.clone();
    let renderer = std::thread::spawn(move || {
        let mut frame = 0u64;
        for _ in 0..50 {
            let _ = audio.render(&sine_block(frame, 512, 48_000));
            frame += 512;
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    for step in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let volume = 1.0 - step as f32 * 0.2;
        graph.set_volume(volume);
        graph.set_unit_state(FxSlot::Reverb, UnitState::Active);
        println!(
            "volume {volume:.1}  peak {:.3}  frames {}",
            meter.take_peak(),
            meter.frames.load(Ordering::Relaxed)
        );
    }

    renderer
        .join()
        .map_err(|_| "render thread panicked")?;

    runtime.fire_sample_rate_change(44_100);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let observer: Arc<dyn RenderObserver> = meter.clone();
    graph.remove_render_observer(&observer).await;
    graph.tear_down().await;

    println!();
    println!(
        "Done: {} frames observed",
        meter.frames.load(Ordering::Relaxed)
    );
    Ok(())
}
