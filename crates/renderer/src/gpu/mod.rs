//! GPU side of the renderer.
//!
//! - `context` owns the wgpu instance, device and fixed-size swapchain.
//! - `pipeline` holds the bind group layouts and links the compiled stages.
//! - `resources` owns the static quad and the source texture.
//! - `uniforms` mirrors the fragment stage's parameter block.
//! - `state` ties them together as the render loop's backend.

mod context;
mod pipeline;
mod resources;
mod state;
mod uniforms;

pub(crate) use state::GpuState;
pub use uniforms::DistortionUniforms;
