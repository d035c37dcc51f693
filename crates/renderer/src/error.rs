use std::fmt;

use thiserror::Error;

/// Shader stage named in a compile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStageKind::Vertex => f.write_str("vertex"),
            ShaderStageKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Reasons [`crate::start`] can fail. Every variant leaves nothing running.
#[derive(Debug, Error)]
pub enum StartError {
    /// No adapter, device or surface could be obtained for the host surface.
    #[error("GPU context unavailable: {0}")]
    Context(String),
    /// A shader stage was rejected; `log` carries the compiler diagnostics.
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStageKind, log: String },
    /// The stages compiled but could not be combined into a program.
    #[error("shader program failed to link: {0}")]
    Link(String),
}

impl StartError {
    pub(crate) fn context(err: anyhow::Error) -> Self {
        StartError::Context(format!("{err:#}"))
    }
}

/// Why a published source frame could not be copied to the GPU.
///
/// The render loop swallows these: the frame is still drawn with whatever the
/// source texture held before.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("source image has no pixels")]
    Empty,
    #[error("source image {width}x{height} exceeds the GPU texture limit of {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
}
