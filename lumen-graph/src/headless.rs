use crate::access::BarrierBits;
use crate::desc::{BufferDesc, ResolvedTextureDesc};
use crate::resources::GpuBackend;

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessTexture {
    pub id: u64,
    pub label: String,
    pub desc: ResolvedTextureDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessBuffer {
    pub id: u64,
    pub label: String,
    pub desc: BufferDesc,
}

/// Backend that allocates nothing and records everything. Used by tests and
/// by tooling that wants to inspect a frame without a device.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    textures_created: usize,
    textures_destroyed: usize,
    buffers_created: usize,
    buffers_destroyed: usize,
    barriers: Vec<BarrierBits>,
    log: Vec<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::trace!("headless: {line}");
        self.log.push(line);
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log)
    }

    pub fn barriers(&self) -> &[BarrierBits] {
        &self.barriers
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn textures_destroyed(&self) -> usize {
        self.textures_destroyed
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created
    }

    pub fn buffers_destroyed(&self) -> usize {
        self.buffers_destroyed
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl GpuBackend for HeadlessBackend {
    type Texture = HeadlessTexture;
    type Buffer = HeadlessBuffer;

    fn create_texture(&mut self, label: &str, desc: &ResolvedTextureDesc) -> HeadlessTexture {
        self.textures_created += 1;
        let id = self.next_id();
        self.record(format!("create texture {label} [{id}] {desc}"));
        HeadlessTexture {
            id,
            label: label.to_string(),
            desc: *desc,
        }
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        self.textures_destroyed += 1;
        self.record(format!("destroy texture {} [{}]", texture.label, texture.id));
    }

    fn create_buffer(&mut self, label: &str, desc: &BufferDesc) -> HeadlessBuffer {
        self.buffers_created += 1;
        let id = self.next_id();
        self.record(format!("create buffer {label} [{id}] {desc}"));
        HeadlessBuffer {
            id,
            label: label.to_string(),
            desc: *desc,
        }
    }

    fn destroy_buffer(&mut self, buffer: HeadlessBuffer) {
        self.buffers_destroyed += 1;
        self.record(format!("destroy buffer {} [{}]", buffer.label, buffer.id));
    }

    fn memory_barrier(&mut self, bits: BarrierBits) {
        self.barriers.push(bits);
        self.record(format!("barrier {bits:?}"));
    }
}
