use crate::access::BarrierBits;
use crate::desc::{BufferDesc, ResolvedTextureDesc};
use crate::{RenderGraphError, Result};

/// Physical object creation and synchronization for a graphics API.
pub trait GpuBackend {
    type Texture;
    type Buffer;

    fn create_texture(&mut self, label: &str, desc: &ResolvedTextureDesc) -> Self::Texture;
    fn destroy_texture(&mut self, texture: Self::Texture);
    fn create_buffer(&mut self, label: &str, desc: &BufferDesc) -> Self::Buffer;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    fn memory_barrier(&mut self, bits: BarrierBits);
}

/// Generation-checked index into an [`RgResources`] pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgHandle {
    pub index: u32,
    pub generation: u32,
}

impl RgHandle {
    pub const INVALID: RgHandle = RgHandle {
        index: u32::MAX,
        generation: 0,
    };

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

impl Default for RgHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for RgHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            write!(f, "#invalid")
        } else {
            write!(f, "#{}v{}", self.index, self.generation)
        }
    }
}

struct PoolEntry<T, D> {
    object: Option<T>,
    desc: D,
    label: String,
    generation: u32,
    alive: bool,
    external: bool,
    last_used_frame: u64,
}

struct SlotPool<T, D> {
    entries: Vec<PoolEntry<T, D>>,
    free: Vec<u32>,
}

impl<T, D: PartialEq + Clone> SlotPool<T, D> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn check(&self, handle: RgHandle) -> Result<&PoolEntry<T, D>> {
        let entry = self
            .entries
            .get(handle.index as usize)
            .ok_or(RenderGraphError::InvalidHandle { handle })?;
        if entry.generation != handle.generation {
            return Err(RenderGraphError::StaleHandle {
                handle,
                current: entry.generation,
            });
        }
        if !entry.alive || entry.object.is_none() {
            return Err(RenderGraphError::ReleasedHandle { handle });
        }
        Ok(entry)
    }

    fn acquire<B>(
        &mut self,
        backend: &mut B,
        label: &str,
        desc: &D,
        frame: u64,
        create: fn(&mut B, &str, &D) -> T,
        destroy: fn(&mut B, T),
    ) -> RgHandle {
        let matching = self.free.iter().position(|&index| {
            let entry = &self.entries[index as usize];
            entry.object.is_some() && entry.desc == *desc
        });

        let index = match matching {
            Some(position) => self.free.swap_remove(position),
            None => match self.free.pop() {
                Some(index) => {
                    let entry = &mut self.entries[index as usize];
                    if let Some(stale) = entry.object.take() {
                        destroy(backend, stale);
                    }
                    entry.object = Some(create(backend, label, desc));
                    entry.desc = desc.clone();
                    index
                }
                None => {
                    self.entries.push(PoolEntry {
                        object: Some(create(backend, label, desc)),
                        desc: desc.clone(),
                        label: String::new(),
                        generation: 0,
                        alive: false,
                        external: false,
                        last_used_frame: frame,
                    });
                    (self.entries.len() - 1) as u32
                }
            },
        };

        let entry = &mut self.entries[index as usize];
        entry.generation = entry.generation.wrapping_add(1).max(1);
        entry.alive = true;
        entry.external = false;
        entry.last_used_frame = frame;
        entry.label.clear();
        entry.label.push_str(label);
        RgHandle {
            index,
            generation: entry.generation,
        }
    }

    fn reuse(&mut self, handle: RgHandle, label: &str, frame: u64) -> Result<RgHandle> {
        self.check(handle)?;
        let entry = &mut self.entries[handle.index as usize];
        entry.generation = entry.generation.wrapping_add(1).max(1);
        entry.last_used_frame = frame;
        entry.label.clear();
        entry.label.push_str(label);
        Ok(RgHandle {
            index: handle.index,
            generation: entry.generation,
        })
    }

    fn touch(&mut self, handle: RgHandle, frame: u64) -> Result<()> {
        self.check(handle)?;
        self.entries[handle.index as usize].last_used_frame = frame;
        Ok(())
    }

    fn release(&mut self, handle: RgHandle) -> Result<()> {
        self.check(handle)?;
        let entry = &mut self.entries[handle.index as usize];
        entry.alive = false;
        if !entry.external {
            self.free.push(handle.index);
        }
        Ok(())
    }

    fn gc<B>(&mut self, backend: &mut B, frame: u64, keep_frames: u64, destroy: fn(&mut B, T)) -> usize {
        let mut destroyed = 0;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.external || entry.object.is_none() {
                continue;
            }
            if frame.saturating_sub(entry.last_used_frame) <= keep_frames {
                continue;
            }
            if let Some(object) = entry.object.take() {
                destroy(backend, object);
                destroyed += 1;
            }
            if entry.alive {
                entry.alive = false;
                self.free.push(index as u32);
            }
        }
        destroyed
    }

    fn stats(&self) -> PoolStats {
        let alive = self.entries.iter().filter(|entry| entry.alive).count();
        let resident = self.entries.iter().filter(|entry| entry.object.is_some()).count();
        PoolStats {
            entries: self.entries.len(),
            alive,
            resident,
            free: self.free.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub entries: usize,
    pub alive: usize,
    pub resident: usize,
    pub free: usize,
}

/// Pool of physical textures and buffers. Knows nothing about scheduling.
///
/// Released entries keep their GPU object so a later acquire with an equal
/// descriptor can take it back; objects are only destroyed by [`RgResources::gc`].
pub struct RgResources<B: GpuBackend> {
    textures: SlotPool<B::Texture, ResolvedTextureDesc>,
    buffers: SlotPool<B::Buffer, BufferDesc>,
    frame: u64,
}

impl<B: GpuBackend> RgResources<B> {
    pub fn new() -> Self {
        Self {
            textures: SlotPool::new(),
            buffers: SlotPool::new(),
            frame: 0,
        }
    }

    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn acquire_tex(&mut self, backend: &mut B, label: &str, desc: &ResolvedTextureDesc) -> RgHandle {
        let handle = self.textures.acquire(
            backend,
            label,
            desc,
            self.frame,
            B::create_texture,
            B::destroy_texture,
        );
        log::trace!("pool: texture '{label}' ({desc}) -> {handle}");
        handle
    }

    /// Hands an alive entry to a new logical resource. The returned handle
    /// has a new generation, so handles held from the previous owner go stale.
    pub fn reuse_tex(&mut self, handle: RgHandle, label: &str) -> RgHandle {
        match self.textures.reuse(handle, label, self.frame) {
            Ok(handle) => handle,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn touch_tex(&mut self, handle: RgHandle) {
        if let Err(error) = self.textures.touch(handle, self.frame) {
            panic!("{error}");
        }
    }

    pub fn tex(&self, handle: RgHandle) -> &B::Texture {
        match self.try_tex(handle) {
            Ok(texture) => texture,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn try_tex(&self, handle: RgHandle) -> Result<&B::Texture> {
        let entry = self.textures.check(handle)?;
        entry
            .object
            .as_ref()
            .ok_or(RenderGraphError::ReleasedHandle { handle })
    }

    pub fn tex_desc(&self, handle: RgHandle) -> Option<&ResolvedTextureDesc> {
        self.textures.check(handle).ok().map(|entry| &entry.desc)
    }

    pub fn is_tex_valid(&self, handle: RgHandle) -> bool {
        self.textures.check(handle).is_ok()
    }

    pub fn release_tex(&mut self, handle: RgHandle) {
        if let Err(error) = self.textures.release(handle) {
            panic!("{error}");
        }
    }

    pub fn acquire_buf(&mut self, backend: &mut B, label: &str, desc: &BufferDesc) -> RgHandle {
        let handle = self.buffers.acquire(
            backend,
            label,
            desc,
            self.frame,
            B::create_buffer,
            B::destroy_buffer,
        );
        log::trace!("pool: buffer '{label}' ({desc}) -> {handle}");
        handle
    }

    pub fn buf(&self, handle: RgHandle) -> &B::Buffer {
        match self.try_buf(handle) {
            Ok(buffer) => buffer,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn try_buf(&self, handle: RgHandle) -> Result<&B::Buffer> {
        let entry = self.buffers.check(handle)?;
        entry
            .object
            .as_ref()
            .ok_or(RenderGraphError::ReleasedHandle { handle })
    }

    pub fn buf_desc(&self, handle: RgHandle) -> Option<&BufferDesc> {
        self.buffers.check(handle).ok().map(|entry| &entry.desc)
    }

    pub fn is_buf_valid(&self, handle: RgHandle) -> bool {
        self.buffers.check(handle).is_ok()
    }

    pub fn release_buf(&mut self, handle: RgHandle) {
        if let Err(error) = self.buffers.release(handle) {
            panic!("{error}");
        }
    }

    /// Registers a buffer owned elsewhere. The pool hands out a handle for it
    /// but never releases, recycles or destroys it.
    pub fn import_buffer(&mut self, label: &str, buffer: B::Buffer, desc: BufferDesc) -> RgHandle {
        self.buffers.entries.push(PoolEntry {
            object: Some(buffer),
            desc,
            label: label.to_string(),
            generation: 1,
            alive: true,
            external: true,
            last_used_frame: self.frame,
        });
        RgHandle {
            index: (self.buffers.entries.len() - 1) as u32,
            generation: 1,
        }
    }

    /// Takes an imported buffer back out of the pool, invalidating its handle.
    pub fn forget_import(&mut self, handle: RgHandle) -> Option<B::Buffer> {
        self.buffers.check(handle).ok()?;
        let entry = &mut self.buffers.entries[handle.index as usize];
        if !entry.external {
            return None;
        }
        entry.alive = false;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        entry.object.take()
    }

    /// Destroys objects that have not been used for more than `keep_frames`
    /// frames, alive or not. Returns how many objects were destroyed.
    pub fn gc(&mut self, backend: &mut B, keep_frames: u64) -> usize {
        let textures = self.textures.gc(backend, self.frame, keep_frames, B::destroy_texture);
        let buffers = self.buffers.gc(backend, self.frame, keep_frames, B::destroy_buffer);
        if textures + buffers > 0 {
            log::info!(
                "pool gc at frame {}: destroyed {textures} textures and {buffers} buffers",
                self.frame
            );
        }
        textures + buffers
    }

    /// Destroys every pool-owned object. Imported buffers are left to their owners.
    pub fn clear(&mut self, backend: &mut B) {
        for entry in self.textures.entries.drain(..) {
            if let Some(texture) = entry.object {
                backend.destroy_texture(texture);
            }
        }
        for entry in self.buffers.entries.drain(..) {
            if let (Some(buffer), false) = (entry.object, entry.external) {
                backend.destroy_buffer(buffer);
            }
        }
        self.textures.free.clear();
        self.buffers.free.clear();
    }

    pub fn texture_stats(&self) -> PoolStats {
        self.textures.stats()
    }

    pub fn buffer_stats(&self) -> PoolStats {
        self.buffers.stats()
    }

    pub fn texture_label(&self, handle: RgHandle) -> Option<&str> {
        self.textures.check(handle).ok().map(|entry| entry.label.as_str())
    }
}

impl<B: GpuBackend> Default for RgResources<B> {
    fn default() -> Self {
        Self::new()
    }
}
