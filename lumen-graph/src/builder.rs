use crate::access::Access;
use crate::blackboard::{RenderResourceBlackboard, RgBufferRef, RgTextureRef};
use crate::desc::{BufferDesc, TextureDesc};
use crate::RenderGraphError;
use crate::resources::RgHandle;

/// Resources a pass touches this frame, merged per resource.
#[derive(Debug, Default, Clone)]
pub(crate) struct PassUses {
    pub textures: Vec<(RgTextureRef, Access)>,
    pub buffers: Vec<(RgBufferRef, Access)>,
    pub after: Vec<String>,
}

impl PassUses {
    fn use_texture(&mut self, texture: RgTextureRef, access: Access) {
        match self.textures.iter_mut().find(|(existing, _)| *existing == texture) {
            Some((_, merged)) => *merged |= access,
            None => self.textures.push((texture, access)),
        }
    }

    fn use_buffer(&mut self, buffer: RgBufferRef, access: Access) {
        match self.buffers.iter_mut().find(|(existing, _)| *existing == buffer) {
            Some((_, merged)) => *merged |= access,
            None => self.buffers.push((buffer, access)),
        }
    }
}

/// Declaration surface handed to a pass's declare callback.
pub struct RenderPassBuilder<'a> {
    pass_name: &'a str,
    blackboard: &'a mut RenderResourceBlackboard,
    uses: &'a mut PassUses,
}

impl<'a> RenderPassBuilder<'a> {
    pub(crate) fn new(
        pass_name: &'a str,
        blackboard: &'a mut RenderResourceBlackboard,
        uses: &'a mut PassUses,
    ) -> Self {
        Self {
            pass_name,
            blackboard,
            uses,
        }
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn declare_texture(&mut self, name: impl AsRef<str>, desc: TextureDesc) -> RgTextureRef {
        self.blackboard.declare_texture(name.as_ref(), desc)
    }

    pub fn create_texture(&mut self, name: impl AsRef<str>, desc: TextureDesc, access: Access) -> RgTextureRef {
        let texture = self.blackboard.declare_texture(name.as_ref(), desc);
        self.uses.use_texture(texture, access);
        texture
    }

    pub fn read_texture(&mut self, name: impl AsRef<str>, access: Access) -> RgTextureRef {
        let texture = self.existing_texture(name.as_ref());
        self.uses.use_texture(texture, access);
        texture
    }

    pub fn write_texture(&mut self, name: impl AsRef<str>, access: Access) -> RgTextureRef {
        let name = name.as_ref();
        assert!(
            access.is_write(),
            "pass '{}' writes '{name}' with read-only access {access:?}",
            self.pass_name
        );
        let texture = self.existing_texture(name);
        self.uses.use_texture(texture, access);
        texture
    }

    pub fn declare_buffer(&mut self, name: impl AsRef<str>, desc: BufferDesc) -> RgBufferRef {
        self.blackboard.declare_buffer(name.as_ref(), desc)
    }

    pub fn create_buffer(&mut self, name: impl AsRef<str>, desc: BufferDesc, access: Access) -> RgBufferRef {
        let buffer = self.blackboard.declare_buffer(name.as_ref(), desc);
        self.uses.use_buffer(buffer, access);
        buffer
    }

    pub fn read_buffer(&mut self, name: impl AsRef<str>, access: Access) -> RgBufferRef {
        let buffer = self.existing_buffer(name.as_ref());
        self.uses.use_buffer(buffer, access);
        buffer
    }

    pub fn write_buffer(&mut self, name: impl AsRef<str>, access: Access) -> RgBufferRef {
        let name = name.as_ref();
        assert!(
            access.is_write(),
            "pass '{}' writes '{name}' with read-only access {access:?}",
            self.pass_name
        );
        let buffer = self.existing_buffer(name);
        self.uses.use_buffer(buffer, access);
        buffer
    }

    pub fn bind_external_buffer(
        &mut self,
        name: impl AsRef<str>,
        desc: BufferDesc,
        handle: RgHandle,
        access: Access,
    ) -> RgBufferRef {
        let buffer = self.blackboard.bind_external_buffer(name.as_ref(), desc, handle);
        self.uses.use_buffer(buffer, access);
        buffer
    }

    /// Orders this pass after `pass` even without a shared resource.
    pub fn depend_on(&mut self, pass: impl AsRef<str>) {
        let pass = pass.as_ref();
        if !self.uses.after.iter().any(|existing| existing == pass) {
            self.uses.after.push(pass.to_string());
        }
    }

    pub fn blackboard(&self) -> &RenderResourceBlackboard {
        self.blackboard
    }

    fn existing_texture(&self, name: &str) -> RgTextureRef {
        let texture = self.blackboard.get_texture(name);
        if !texture.is_valid() {
            panic!(
                "{}",
                RenderGraphError::UnknownResource {
                    pass: self.pass_name.to_string(),
                    name: name.to_string(),
                }
            );
        }
        texture
    }

    fn existing_buffer(&self, name: &str) -> RgBufferRef {
        let buffer = self.blackboard.get_buffer(name);
        if !buffer.is_valid() {
            panic!(
                "{}",
                RenderGraphError::UnknownResource {
                    pass: self.pass_name.to_string(),
                    name: name.to_string(),
                }
            );
        }
        buffer
    }
}
