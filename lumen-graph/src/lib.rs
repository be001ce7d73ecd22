mod access;
mod blackboard;
mod builder;
mod context;
mod desc;
mod graph;
mod headless;
mod report;
mod resources;
#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use access::{Access, BarrierBits, buffer_barrier, texture_barrier};
pub use blackboard::{RenderResourceBlackboard, RgBufferRef, RgTextureRef};
pub use builder::RenderPassBuilder;
pub use context::RenderPassContext;
pub use desc::{
    BufferDesc, BufferUsage, Extent, FrameExtents, ResolvedTextureDesc, TextureDesc,
    TextureFormat, TextureUsage,
};
pub use graph::{PassContext, RenderGraph, RenderGraphConfig};
pub use headless::{HeadlessBackend, HeadlessBuffer, HeadlessTexture};
pub use report::{
    DependencyEdge, DependencyKind, FrameReport, ResourceKind, ResourceLifetime, ScheduledPass,
    ValidationWarning,
};
pub use resources::{GpuBackend, PoolStats, RgHandle, RgResources};
#[cfg(feature = "wgpu")]
pub use wgpu_backend::{FormatInfo, WgpuBackend, WgpuBuffer, WgpuTexture, format_info};

#[derive(Debug, thiserror::Error)]
pub enum RenderGraphError {
    #[error("render graph contains a dependency cycle between passes: {passes}")]
    CyclicDependency { passes: String },

    #[error("descriptor mismatch for '{name}': declared as {existing}, redeclared as {requested}")]
    DescriptorMismatch {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("pass '{pass}' uses '{name}' before any pass declared it")]
    UnknownResource { pass: String, name: String },

    #[error("pass '{pass}' depends on unknown pass '{dependency}'")]
    UnknownDependency { pass: String, dependency: String },

    #[error("invalid handle {handle}")]
    InvalidHandle { handle: RgHandle },

    #[error("stale handle {handle}: slot is now at generation {current}")]
    StaleHandle { handle: RgHandle, current: u32 },

    #[error("handle {handle} refers to a released slot")]
    ReleasedHandle { handle: RgHandle },
}

pub type Result<T> = std::result::Result<T, RenderGraphError>;
