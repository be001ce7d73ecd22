use lumen_graph::RenderGraphConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowConfig {
    pub enabled: bool,
    /// Size of one cascade tile. The atlas is twice this in each direction.
    pub resolution: u32,
    pub cascade_count: u32,
    /// Blend between uniform (0) and logarithmic (1) cascade splits.
    pub split_lambda: f32,
    pub distance: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 1024,
            cascade_count: 4,
            split_lambda: 0.7,
            distance: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub intensity: f32,
    /// Blur radius in half-resolution texels.
    pub radius: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            intensity: 0.6,
            radius: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapConfig {
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for TonemapConfig {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionConfig {
    pub enabled: bool,
    pub outline_color: [f32; 4],
    /// Outline width in pixels.
    pub thickness: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outline_color: [1.0, 0.6, 0.1, 1.0],
            thickness: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickingConfig {
    pub enabled: bool,
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PassConfigs {
    pub shadow: ShadowConfig,
    pub bloom: BloomConfig,
    pub tonemap: TonemapConfig,
    pub selection: SelectionConfig,
    pub picking: PickingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    pub graph: RenderGraphConfig,
    /// Run pool gc every this many frames. Zero disables gc.
    pub gc_interval: u64,
    pub keep_frames: u64,
    /// Decoded textures uploaded per frame.
    pub texture_upload_budget: usize,
    pub texture_layer_size: u32,
    pub texture_capacity: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            graph: RenderGraphConfig::default(),
            gc_interval: 60,
            keep_frames: 3,
            texture_upload_budget: 2,
            texture_layer_size: 512,
            texture_capacity: 64,
        }
    }
}
