use crate::desc::{BufferUsage, TextureUsage};
use bitflags::bitflags;

bitflags! {
    /// How a pass touches a resource. Accesses declared for the same
    /// resource within one pass are merged with `|`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const COLOR_WRITE = 1 << 0;
        const DEPTH_WRITE = 1 << 1;
        const SAMPLED_READ = 1 << 2;
        const IMAGE_READ = 1 << 3;
        const IMAGE_WRITE = 1 << 4;
        const SSBO_READ = 1 << 5;
        const SSBO_WRITE = 1 << 6;
        const UBO_READ = 1 << 7;

        const WRITES = Self::COLOR_WRITE.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::IMAGE_WRITE.bits()
            | Self::SSBO_WRITE.bits();
        const TEXTURE = Self::COLOR_WRITE.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::SAMPLED_READ.bits()
            | Self::IMAGE_READ.bits()
            | Self::IMAGE_WRITE.bits();
        const BUFFER = Self::SSBO_READ.bits() | Self::SSBO_WRITE.bits() | Self::UBO_READ.bits();
    }
}

bitflags! {
    /// Memory barrier scopes issued before a pass executes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BarrierBits: u32 {
        const TEXTURE_FETCH = 1 << 0;
        const SHADER_IMAGE_ACCESS = 1 << 1;
        const FRAMEBUFFER = 1 << 2;
        const SHADER_STORAGE = 1 << 3;
        const UNIFORM = 1 << 4;
    }
}

impl Access {
    pub fn is_write(self) -> bool {
        self.intersects(Access::WRITES)
    }

    /// Texture usage capabilities this access needs.
    pub fn required_texture_usage(self) -> TextureUsage {
        let mut usage = TextureUsage::empty();
        if self.contains(Access::COLOR_WRITE) {
            usage |= TextureUsage::COLOR_ATTACH;
        }
        if self.contains(Access::DEPTH_WRITE) {
            usage |= TextureUsage::DEPTH_ATTACH;
        }
        if self.contains(Access::SAMPLED_READ) {
            usage |= TextureUsage::SAMPLED;
        }
        if self.intersects(Access::IMAGE_READ | Access::IMAGE_WRITE) {
            usage |= TextureUsage::IMAGE;
        }
        usage
    }

    pub fn required_buffer_usage(self) -> BufferUsage {
        let mut usage = BufferUsage::empty();
        if self.intersects(Access::SSBO_READ | Access::SSBO_WRITE) {
            usage |= BufferUsage::STORAGE;
        }
        if self.contains(Access::UBO_READ) {
            usage |= BufferUsage::UNIFORM;
        }
        usage
    }
}

/// Barrier needed between two consecutive accesses of the same texture.
pub fn texture_barrier(previous: Access, next: Access) -> BarrierBits {
    let mut bits = BarrierBits::empty();
    if !previous.is_write() || !next.intersects(Access::TEXTURE) {
        return bits;
    }
    if next.contains(Access::SAMPLED_READ) {
        bits |= BarrierBits::TEXTURE_FETCH;
    }
    if next.intersects(Access::IMAGE_READ | Access::IMAGE_WRITE) {
        bits |= BarrierBits::SHADER_IMAGE_ACCESS;
    }
    bits | BarrierBits::FRAMEBUFFER
}

/// Barrier needed between two consecutive accesses of the same buffer.
pub fn buffer_barrier(previous: Access, next: Access) -> BarrierBits {
    let mut bits = BarrierBits::empty();
    if !previous.contains(Access::SSBO_WRITE) {
        return bits;
    }
    if next.intersects(Access::SSBO_READ | Access::SSBO_WRITE) {
        bits |= BarrierBits::SHADER_STORAGE;
    }
    if next.contains(Access::UBO_READ) {
        bits |= BarrierBits::SHADER_STORAGE | BarrierBits::UNIFORM;
    }
    bits
}
