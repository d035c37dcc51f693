use std::sync::Arc;
use std::time::Instant;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::StartError;
use crate::gpu::GpuState;
use crate::runtime::{FrameInputs, RenderLoop, TickOutcome};
use crate::types::{AdapterProfile, RendererConfig};

/// Allocates GPU resources for `surface` and arms the render loop.
///
/// On error nothing is left running: every object created before the failure
/// has already been dropped. Calling `start` again after [`RendererHandle::stop`]
/// builds a fresh instance; nothing is shared with the stopped one.
pub fn start<W>(
    surface: Arc<W>,
    config: &RendererConfig,
    inputs: FrameInputs,
) -> Result<RendererHandle, StartError>
where
    W: HasDisplayHandle + HasWindowHandle + Send + Sync + 'static,
{
    let state = GpuState::new(surface, config)?;
    let adapter_profile = state.adapter_profile().clone();
    tracing::info!(
        adapter = %adapter_profile.name,
        backend = ?adapter_profile.backend,
        size = %config.target_size,
        "renderer started"
    );
    Ok(RendererHandle {
        render_loop: RenderLoop::new(state, inputs, config.target_size, config.target_fps),
        adapter_profile,
    })
}

/// A running renderer. Dropping it stops the loop.
pub struct RendererHandle {
    render_loop: RenderLoop<GpuState>,
    adapter_profile: AdapterProfile,
}

impl RendererHandle {
    /// Runs one render-loop iteration. Host calls this once per presented frame.
    pub fn frame(&mut self, now: Instant) -> TickOutcome {
        self.render_loop.tick(now)
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        self.render_loop.ready_for_frame(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.render_loop.next_deadline()
    }

    pub fn is_running(&self) -> bool {
        self.render_loop.is_running()
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.adapter_profile
    }

    /// Cancels the pending iteration and releases every GPU resource. Idempotent.
    pub fn stop(&mut self) {
        if self.render_loop.is_running() {
            tracing::info!("renderer stopping");
        }
        self.render_loop.stop();
    }
}
