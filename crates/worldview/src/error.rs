/// Errors surfaced by the compositor to its host.
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    /// No usable GPU context, or the capability floor is not met.
    #[error("failed to initialise compositor: {0}")]
    Initialization(String),
    /// A caller-supplied argument was rejected; no state changed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The offscreen target, a chain stage, or a surface reconfigure failed.
    #[error("failed to create GPU resource: {0}")]
    ResourceCreation(String),
    #[error("compositor has been torn down")]
    TornDown,
}

/// Errors reported by a GPU backend.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("operation is not supported by this context")]
    Unsupported,
    #[error("GPU context has been released")]
    ContextLost,
    #[error("surface was lost or outdated and has been reconfigured")]
    SurfaceLost,
    #[error("surface timed out; frame skipped")]
    SkipFrame,
    #[error("GPU is out of memory")]
    OutOfMemory,
    #[error("{0}")]
    Resource(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl DriverError {
    /// Transient errors only cost the current frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::SurfaceLost | DriverError::SkipFrame)
    }
}
