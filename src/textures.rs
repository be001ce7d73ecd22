use crate::commands::FrameCommands;
use crate::material::{ColorSpace, INVALID_TEXTURE, TextureResolver};
use image::imageops::FilterType;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Layer of the material texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureIndex(pub u32);

impl TextureIndex {
    pub const PLACEHOLDER: TextureIndex = TextureIndex(0);
    pub const INVALID: TextureIndex = TextureIndex(INVALID_TEXTURE);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureState {
    /// Reserved, placeholder pixels until the decoded image is uploaded.
    Pending,
    Ready,
    Failed(String),
}

/// Destination for decoded texture layers.
pub trait LayerUploader {
    fn upload_layer(&mut self, layer: u32, size: u32, pixels: &[u8]);
}

impl<B: FrameCommands> LayerUploader for B {
    fn upload_layer(&mut self, layer: u32, size: u32, pixels: &[u8]) {
        self.upload_texture_layer(layer, size, pixels);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpReport {
    pub uploaded: usize,
    pub failed: usize,
}

struct Job {
    layer: u32,
    path: PathBuf,
    color_space: ColorSpace,
}

struct Decoded {
    layer: u32,
    pixels: Result<Vec<u8>, String>,
}

#[derive(Default)]
struct Queues {
    jobs: VecDeque<Job>,
    results: VecDeque<Decoded>,
    shutdown: bool,
}

struct Shared {
    queues: Mutex<Queues>,
    wake: Condvar,
}

struct TextureEntry {
    path: PathBuf,
    state: TextureState,
}

/// Streams images into the layers of one texture array. Decoding happens on
/// a worker thread, uploads happen in `pump` on the render thread.
pub struct TextureLoader {
    layer_size: u32,
    capacity: u32,
    entries: Vec<TextureEntry>,
    lookup: HashMap<(PathBuf, ColorSpace), TextureIndex>,
    placeholders: Vec<u32>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TextureLoader {
    /// `capacity` counts array layers, layer 0 included.
    pub fn new(layer_size: u32, capacity: u32) -> Self {
        let layer_size = layer_size.max(1);
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("texture-decode".to_string())
                .spawn(move || decode_worker(&shared, layer_size))
                .map_err(|error| log::error!("failed to spawn texture decode thread: {error}"))
                .ok()
        };
        Self {
            layer_size,
            capacity: capacity.max(1),
            entries: vec![TextureEntry {
                path: PathBuf::new(),
                state: TextureState::Ready,
            }],
            lookup: HashMap::new(),
            placeholders: vec![TextureIndex::PLACEHOLDER.0],
            shared,
            worker,
        }
    }

    pub fn layer_size(&self) -> u32 {
        self.layer_size
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Layers in use, the placeholder layer included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Layer for `path` in `color_space`, queueing a decode the first time it
    /// is asked for.
    pub fn get_or_create_2d(&mut self, path: impl AsRef<Path>, color_space: ColorSpace) -> TextureIndex {
        let path = path.as_ref().to_path_buf();
        if let Some(index) = self.lookup.get(&(path.clone(), color_space)) {
            return *index;
        }
        if self.entries.len() as u32 >= self.capacity {
            log::warn!(
                "texture table full ({} layers), '{}' will use the placeholder",
                self.capacity,
                path.display()
            );
            return TextureIndex::INVALID;
        }
        if self.worker.is_none() {
            self.entries.push(TextureEntry {
                path: path.clone(),
                state: TextureState::Failed("no decode thread".to_string()),
            });
            let index = TextureIndex(self.entries.len() as u32 - 1);
            self.lookup.insert((path, color_space), index);
            self.placeholders.push(index.0);
            return index;
        }

        let index = TextureIndex(self.entries.len() as u32);
        self.entries.push(TextureEntry {
            path: path.clone(),
            state: TextureState::Pending,
        });
        self.lookup.insert((path.clone(), color_space), index);
        self.placeholders.push(index.0);

        self.shared.queues.lock().jobs.push_back(Job {
            layer: index.0,
            path,
            color_space,
        });
        self.shared.wake.notify_one();
        log::debug!("queued texture layer {}", index.0);
        index
    }

    pub fn state(&self, index: TextureIndex) -> Option<&TextureState> {
        self.entries.get(index.0 as usize).map(|entry| &entry.state)
    }

    /// Number of reserved layers still waiting for their decoded image.
    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == TextureState::Pending)
            .count()
    }

    /// Uploads placeholder pixels for newly reserved layers, then at most
    /// `budget` decoded images.
    pub fn pump(&mut self, uploader: &mut impl LayerUploader, budget: usize) -> PumpReport {
        if !self.placeholders.is_empty() {
            let pixels = placeholder_pixels(self.layer_size);
            for layer in self.placeholders.drain(..) {
                uploader.upload_layer(layer, self.layer_size, &pixels);
            }
        }

        let finished: Vec<Decoded> = {
            let mut queues = self.shared.queues.lock();
            let count = budget.min(queues.results.len());
            queues.results.drain(..count).collect()
        };

        let mut report = PumpReport::default();
        for decoded in finished {
            let Some(entry) = self.entries.get_mut(decoded.layer as usize) else {
                continue;
            };
            match decoded.pixels {
                Ok(pixels) => {
                    uploader.upload_layer(decoded.layer, self.layer_size, &pixels);
                    entry.state = TextureState::Ready;
                    report.uploaded += 1;
                    log::info!("loaded texture '{}' into layer {}", entry.path.display(), decoded.layer);
                }
                Err(message) => {
                    log::warn!("failed to load texture '{}': {message}", entry.path.display());
                    entry.state = TextureState::Failed(message);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

impl TextureResolver for TextureLoader {
    fn resolve(&mut self, path: &str, color_space: ColorSpace) -> u32 {
        let index = self.get_or_create_2d(path, color_space);
        match self.state(index) {
            Some(TextureState::Failed(_)) | None => INVALID_TEXTURE,
            Some(_) => index.0,
        }
    }
}

impl Drop for TextureLoader {
    fn drop(&mut self) {
        self.shared.queues.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("texture decode thread panicked");
            }
        }
    }
}

fn decode_worker(shared: &Shared, layer_size: u32) {
    loop {
        let job = {
            let mut queues = shared.queues.lock();
            while queues.jobs.is_empty() && !queues.shutdown {
                shared.wake.wait(&mut queues);
            }
            if queues.shutdown {
                return;
            }
            queues.jobs.pop_front()
        };
        let Some(job) = job else {
            continue;
        };
        let pixels = decode(&job.path, job.color_space, layer_size).map_err(|error| error.to_string());
        shared.queues.lock().results.push_back(Decoded {
            layer: job.layer,
            pixels,
        });
    }
}

/// Decodes to RGBA8 at `size`x`size`. sRGB images are converted to linear
/// values so the array can be sampled without a format conversion.
pub fn decode(path: &Path, color_space: ColorSpace, size: u32) -> image::ImageResult<Vec<u8>> {
    let image = image::open(path)?.to_rgba8();
    let mut image = if image.dimensions() == (size, size) {
        image
    } else {
        image::imageops::resize(&image, size, size, FilterType::Triangle)
    };
    if color_space == ColorSpace::Srgb {
        for pixel in image.pixels_mut() {
            for channel in &mut pixel.0[..3] {
                *channel = srgb_to_linear_u8(*channel);
            }
        }
    }
    Ok(image.into_raw())
}

fn srgb_to_linear_u8(value: u8) -> u8 {
    let c = value as f32 / 255.0;
    let linear = if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    };
    (linear * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Grey and white checkerboard in 8x8 cells.
fn placeholder_pixels(size: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if ((x / 8) + (y / 8)) % 2 == 0 { 200 } else { 128 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}
