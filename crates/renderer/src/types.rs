use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::DynamicImage;

/// Normalised shift of the optical centre, each component nominally in `[-0.5, 0.5]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeOffset {
    pub x: f32,
    pub y: f32,
}

impl EyeOffset {
    pub const CENTERED: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn as_array(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// Refractive error being previewed.
///
/// Replaced wholesale whenever any field changes. No field constrains another and
/// every value is accepted as-is: axis is optically meaningful modulo 180° but the
/// renderer never wraps or rejects it, relying on trigonometric periodicity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrescriptionParameters {
    /// Spherical power in diopters (negative = myopic).
    pub sphere: f32,
    /// Cylindrical power in diopters.
    pub cylinder: f32,
    /// Astigmatic axis in degrees.
    pub axis_degrees: f32,
    pub eye_offset: EyeOffset,
}

impl PrescriptionParameters {
    pub fn new(sphere: f32, cylinder: f32, axis_degrees: f32, eye_offset: EyeOffset) -> Self {
        Self {
            sphere,
            cylinder,
            axis_degrees,
            eye_offset,
        }
    }

    /// Parameters that leave the image untouched.
    pub fn emmetropic() -> Self {
        Self::new(0.0, 0.0, 0.0, EyeOffset::CENTERED)
    }

    pub fn axis_radians(&self) -> f32 {
        self.axis_degrees.to_radians()
    }
}

impl Default for PrescriptionParameters {
    /// Moderate myopia with a vertical axis, the preview's opening state.
    fn default() -> Self {
        Self::new(-2.0, 0.0, 90.0, EyeOffset::CENTERED)
    }
}

impl fmt::Display for PrescriptionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sph {:+.2} cyl {:+.2} axis {:.0} eye ({:+.2}, {:+.2})",
            self.sphere, self.cylinder, self.axis_degrees, self.eye_offset.x, self.eye_offset.y
        )
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Opaque, cheaply cloneable handle to a decoded frame supplied by the host.
///
/// Every new handle receives a fresh generation number so consumers can tell a
/// re-published frame from a clone of the one they already have.
#[derive(Clone)]
pub struct SourceImage {
    pixels: Arc<DynamicImage>,
    generation: u64,
}

impl SourceImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            pixels: Arc::new(image),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("generation", &self.generation)
            .finish()
    }
}

impl From<DynamicImage> for SourceImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Fixed pixel dimensions of the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// GPU adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

/// Presentation pacing for the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VsyncMode {
    /// One frame per display refresh.
    #[default]
    On,
    /// Prefer immediate presentation when the surface supports it.
    Off,
}

/// Immutable configuration passed to the renderer at start-up.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Render-target size in physical pixels; never changes for a renderer instance.
    pub target_size: TargetSize,
    pub power: GpuPowerPreference,
    pub vsync: VsyncMode,
    /// Optional frame-rate cap; `None` draws once per host presentation.
    pub target_fps: Option<f32>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            target_size: TargetSize::new(640, 480),
            power: GpuPowerPreference::default(),
            vsync: VsyncMode::default(),
            target_fps: None,
        }
    }
}

/// Description of the adapter chosen at start-up.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub max_texture_dimension_2d: u32,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}
