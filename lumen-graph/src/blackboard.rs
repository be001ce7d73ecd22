use crate::desc::{BufferDesc, TextureDesc};
use crate::resources::RgHandle;
use crate::{RenderGraphError, Result};
use std::collections::HashMap;

/// 1-based reference to a texture declared this frame. Zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RgTextureRef(pub u32);

/// 1-based reference to a buffer declared this frame. Zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RgBufferRef(pub u32);

impl RgTextureRef {
    pub const INVALID: RgTextureRef = RgTextureRef(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub(crate) fn slot(self) -> usize {
        self.0 as usize - 1
    }
}

impl RgBufferRef {
    pub const INVALID: RgBufferRef = RgBufferRef(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub(crate) fn slot(self) -> usize {
        self.0 as usize - 1
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TextureEntry {
    pub name: String,
    pub desc: TextureDesc,
    pub handle: RgHandle,
}

#[derive(Debug, Clone)]
pub(crate) struct BufferEntry {
    pub name: String,
    pub desc: BufferDesc,
    pub handle: RgHandle,
    pub external: bool,
}

/// Name to descriptor registry for one frame, and after scheduling, name to
/// pool handle.
#[derive(Debug, Default)]
pub struct RenderResourceBlackboard {
    texture_names: HashMap<String, RgTextureRef>,
    textures: Vec<TextureEntry>,
    buffer_names: HashMap<String, RgBufferRef>,
    buffers: Vec<BufferEntry>,
}

impl RenderResourceBlackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.texture_names.clear();
        self.textures.clear();
        self.buffer_names.clear();
        self.buffers.clear();
    }

    pub fn declare_texture(&mut self, name: &str, desc: TextureDesc) -> RgTextureRef {
        match self.try_declare_texture(name, desc) {
            Ok(texture) => texture,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn try_declare_texture(&mut self, name: &str, desc: TextureDesc) -> Result<RgTextureRef> {
        if let Some(&texture) = self.texture_names.get(name) {
            let existing = &self.textures[texture.slot()];
            if !existing.desc.is_compatible(&desc) {
                return Err(RenderGraphError::DescriptorMismatch {
                    name: name.to_string(),
                    existing: format!("{:?}", existing.desc),
                    requested: format!("{desc:?}"),
                });
            }
            return Ok(texture);
        }
        self.textures.push(TextureEntry {
            name: name.to_string(),
            desc,
            handle: RgHandle::INVALID,
        });
        let texture = RgTextureRef(self.textures.len() as u32);
        self.texture_names.insert(name.to_string(), texture);
        Ok(texture)
    }

    pub fn get_texture(&self, name: &str) -> RgTextureRef {
        self.texture_names
            .get(name)
            .copied()
            .unwrap_or(RgTextureRef::INVALID)
    }

    pub fn texture_desc(&self, texture: RgTextureRef) -> &TextureDesc {
        &self.texture_entry(texture).desc
    }

    pub fn texture_name(&self, texture: RgTextureRef) -> &str {
        &self.texture_entry(texture).name
    }

    /// Physical binding assigned by scheduling.
    pub fn texture_handle(&self, texture: RgTextureRef) -> RgHandle {
        let entry = self.texture_entry(texture);
        assert!(
            !entry.handle.is_invalid(),
            "texture '{}' has no physical binding yet",
            entry.name
        );
        entry.handle
    }

    pub fn try_texture_handle(&self, texture: RgTextureRef) -> Option<RgHandle> {
        let handle = self.texture_entry(texture).handle;
        (!handle.is_invalid()).then_some(handle)
    }

    pub fn set_texture_handle(&mut self, texture: RgTextureRef, handle: RgHandle) {
        let slot = self.checked_texture_slot(texture);
        self.textures[slot].handle = handle;
    }

    pub fn declare_buffer(&mut self, name: &str, desc: BufferDesc) -> RgBufferRef {
        match self.try_declare_buffer(name, desc) {
            Ok(buffer) => buffer,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn try_declare_buffer(&mut self, name: &str, desc: BufferDesc) -> Result<RgBufferRef> {
        if let Some(&buffer) = self.buffer_names.get(name) {
            let existing = &self.buffers[buffer.slot()];
            if existing.desc != desc {
                return Err(RenderGraphError::DescriptorMismatch {
                    name: name.to_string(),
                    existing: format!("{:?}", existing.desc),
                    requested: format!("{desc:?}"),
                });
            }
            return Ok(buffer);
        }
        self.buffers.push(BufferEntry {
            name: name.to_string(),
            desc,
            handle: RgHandle::INVALID,
            external: false,
        });
        let buffer = RgBufferRef(self.buffers.len() as u32);
        self.buffer_names.insert(name.to_string(), buffer);
        Ok(buffer)
    }

    /// Puts a buffer owned outside the graph into the namespace, already bound.
    pub fn bind_external_buffer(&mut self, name: &str, desc: BufferDesc, handle: RgHandle) -> RgBufferRef {
        let buffer = self.declare_buffer(name, desc);
        let entry = &mut self.buffers[buffer.slot()];
        entry.handle = handle;
        entry.external = true;
        buffer
    }

    pub fn is_external_buffer(&self, buffer: RgBufferRef) -> bool {
        self.buffer_entry(buffer).external
    }

    pub fn get_buffer(&self, name: &str) -> RgBufferRef {
        self.buffer_names
            .get(name)
            .copied()
            .unwrap_or(RgBufferRef::INVALID)
    }

    pub fn buffer_desc(&self, buffer: RgBufferRef) -> &BufferDesc {
        &self.buffer_entry(buffer).desc
    }

    pub fn buffer_name(&self, buffer: RgBufferRef) -> &str {
        &self.buffer_entry(buffer).name
    }

    pub fn buffer_handle(&self, buffer: RgBufferRef) -> RgHandle {
        let entry = self.buffer_entry(buffer);
        assert!(
            !entry.handle.is_invalid(),
            "buffer '{}' has no physical binding yet",
            entry.name
        );
        entry.handle
    }

    pub fn try_buffer_handle(&self, buffer: RgBufferRef) -> Option<RgHandle> {
        let handle = self.buffer_entry(buffer).handle;
        (!handle.is_invalid()).then_some(handle)
    }

    pub fn set_buffer_handle(&mut self, buffer: RgBufferRef, handle: RgHandle) {
        let slot = self.checked_buffer_slot(buffer);
        self.buffers[slot].handle = handle;
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn textures(&self) -> impl Iterator<Item = RgTextureRef> + '_ {
        (1..=self.textures.len() as u32).map(RgTextureRef)
    }

    pub fn buffers(&self) -> impl Iterator<Item = RgBufferRef> + '_ {
        (1..=self.buffers.len() as u32).map(RgBufferRef)
    }

    fn checked_texture_slot(&self, texture: RgTextureRef) -> usize {
        assert!(
            texture.is_valid() && texture.slot() < self.textures.len(),
            "invalid texture reference {texture:?}"
        );
        texture.slot()
    }

    fn checked_buffer_slot(&self, buffer: RgBufferRef) -> usize {
        assert!(
            buffer.is_valid() && buffer.slot() < self.buffers.len(),
            "invalid buffer reference {buffer:?}"
        );
        buffer.slot()
    }

    fn texture_entry(&self, texture: RgTextureRef) -> &TextureEntry {
        &self.textures[self.checked_texture_slot(texture)]
    }

    fn buffer_entry(&self, buffer: RgBufferRef) -> &BufferEntry {
        &self.buffers[self.checked_buffer_slot(buffer)]
    }
}
