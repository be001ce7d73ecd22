use bitflags::bitflags;

/// Pixel formats a graph resource may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba16F,
    Rgba8,
    R32Ui,
    R32F,
    Depth32F,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba16F => 8,
            Self::Rgba8 | Self::R32Ui | Self::R32F | Self::Depth32F => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32F)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COLOR_ATTACH = 1 << 0;
        const DEPTH_ATTACH = 1 << 1;
        const SAMPLED = 1 << 2;
        const IMAGE = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const STORAGE = 1 << 0;
        const UNIFORM = 1 << 1;
        const INDIRECT = 1 << 2;
        const UPLOAD = 1 << 3;
        const READBACK = 1 << 4;
    }
}

/// How a texture's dimensions are derived each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extent {
    Explicit { width: u32, height: u32 },
    Window,
    Viewport,
    /// Framebuffer size divided by `divisor` (1 is full resolution).
    Framebuffer { divisor: u32 },
}

impl Extent {
    pub const FULL_FRAMEBUFFER: Extent = Extent::Framebuffer { divisor: 1 };

    pub fn resolve(&self, frame: &FrameExtents) -> (u32, u32) {
        let (width, height) = match *self {
            Extent::Explicit { width, height } => (width, height),
            Extent::Window => frame.window,
            Extent::Viewport => frame.viewport,
            Extent::Framebuffer { divisor } => {
                let divisor = divisor.max(1);
                (frame.framebuffer.0 / divisor, frame.framebuffer.1 / divisor)
            }
        };
        (width.max(1), height.max(1))
    }
}

/// Window, viewport and framebuffer sizes for the frame being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameExtents {
    pub window: (u32, u32),
    pub viewport: (u32, u32),
    pub framebuffer: (u32, u32),
}

impl FrameExtents {
    pub fn uniform(width: u32, height: u32) -> Self {
        Self {
            window: (width, height),
            viewport: (width, height),
            framebuffer: (width, height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub extent: Extent,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub layers: u32,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn new(extent: Extent, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            layers: 1,
            usage,
        }
    }

    pub fn explicit(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self::new(Extent::Explicit { width, height }, format, usage)
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    /// Redeclaration check. Explicit extents compare their dimensions, the
    /// relative kinds only compare the kind.
    pub fn is_compatible(&self, other: &TextureDesc) -> bool {
        self.format == other.format
            && self.usage == other.usage
            && self.mip_levels == other.mip_levels
            && self.layers == other.layers
            && self.extent == other.extent
    }

    pub fn resolve(&self, frame: &FrameExtents) -> ResolvedTextureDesc {
        let (width, height) = self.extent.resolve(frame);
        ResolvedTextureDesc {
            width,
            height,
            format: self.format,
            mip_levels: self.mip_levels.max(1),
            layers: self.layers.max(1),
            usage: self.usage,
        }
    }
}

/// A texture descriptor with its extent resolved against the current frame.
/// This is the key the pool and the alias pool match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedTextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub layers: u32,
    pub usage: TextureUsage,
}

impl ResolvedTextureDesc {
    pub fn byte_size(&self) -> u64 {
        let mut total = 0u64;
        for mip in 0..self.mip_levels {
            let width = (self.width >> mip).max(1) as u64;
            let height = (self.height >> mip).max(1) as u64;
            total += width * height * self.format.bytes_per_texel() as u64;
        }
        total * self.layers as u64
    }
}

impl std::fmt::Display for ResolvedTextureDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.format)?;
        if self.mip_levels > 1 {
            write!(f, " mips={}", self.mip_levels)?;
        }
        if self.layers > 1 {
            write!(f, " layers={}", self.layers)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self { size, usage }
    }

    pub fn storage(size: u64) -> Self {
        Self::new(size, BufferUsage::STORAGE | BufferUsage::UPLOAD)
    }
}

impl std::fmt::Display for BufferDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes {:?}", self.size, self.usage)
    }
}
