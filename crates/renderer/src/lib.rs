//! Real-time refractive-error preview renderer.
//!
//! A source picture is pushed through a radial (defocus) warp, an anisotropic
//! (astigmatic) warp and, for a non-trivial cylinder, a directional blur, all
//! evaluated per pixel in a fragment shader. The overall flow is:
//!
//! ```text
//!   host (seeright)
//!      │ publish_parameters / publish_source
//!      ▼
//!   FrameInputs ──snapshot──▶ RenderLoop::tick ──▶ upload ─▶ uniforms ─▶ draw
//!      ▲                              │
//!      │                              └─▶ FrameScheduler (next deadline)
//!   start(surface) ──▶ RendererHandle ──stop──▶ resources released
//! ```
//!
//! The same transform is available on the CPU in [`distortion`] and [`sampling`]
//! so its properties can be checked without a GPU.

mod compile;
pub mod distortion;
mod error;
mod gpu;
mod handle;
mod runtime;
pub mod sampling;
mod types;

pub use error::{ShaderStageKind, StartError, UploadError};
pub use gpu::DistortionUniforms;
pub use handle::{start, RendererHandle};
pub use runtime::{FrameInputs, FrameSnapshot, TickOutcome, IDLE_INTERVAL};
pub use types::{
    AdapterProfile, EyeOffset, GpuPowerPreference, PrescriptionParameters, RendererConfig,
    SourceImage, TargetSize, VsyncMode,
};
