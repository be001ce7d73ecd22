pub mod bloom;
pub mod depth_prepass;
pub mod forward_mrt;
pub mod light_cluster;
pub mod pick;
pub mod selection;
pub mod shader_common;
pub mod shadow_csm;
pub mod tonemap;

pub use bloom::PostFilters;
pub use depth_prepass::DepthPrepass;
pub use forward_mrt::ForwardMrtPass;
pub use light_cluster::LightClusterPass;
pub use pick::PickPass;
pub use selection::SelectionPass;
pub use shader_common::{FrameUniform, PassUniform};
pub use shadow_csm::ShadowCsmPass;
pub use tonemap::TonemapPass;

use crate::commands::{Program, ProgramDesc};
use crate::pass_configs::PassConfigs;

/// Names of every resource the frame's passes exchange through the blackboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameResource {
    ShadowAtlas,
    DepthPre,
    LightGrid,
    HdrColor,
    HdrEmissive,
    BloomExtract,
    BloomBlurH,
    BloomBlur,
    LdrColor,
    PickIds,
    PickDepth,
    SceneInstances,
    SceneLights,
    MaterialHeaders,
    MaterialNodes,
}

impl FrameResource {
    pub const ALL: [FrameResource; 15] = [
        FrameResource::ShadowAtlas,
        FrameResource::DepthPre,
        FrameResource::LightGrid,
        FrameResource::HdrColor,
        FrameResource::HdrEmissive,
        FrameResource::BloomExtract,
        FrameResource::BloomBlurH,
        FrameResource::BloomBlur,
        FrameResource::LdrColor,
        FrameResource::PickIds,
        FrameResource::PickDepth,
        FrameResource::SceneInstances,
        FrameResource::SceneLights,
        FrameResource::MaterialHeaders,
        FrameResource::MaterialNodes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FrameResource::ShadowAtlas => "Shadow.CSMAtlas",
            FrameResource::DepthPre => "Depth.Pre",
            FrameResource::LightGrid => "Light.Grid",
            FrameResource::HdrColor => "HDR.Color",
            FrameResource::HdrEmissive => "HDR.Emissive",
            FrameResource::BloomExtract => "Bloom.Extract",
            FrameResource::BloomBlurH => "Bloom.BlurH",
            FrameResource::BloomBlur => "Bloom.Blur",
            FrameResource::LdrColor => "LDR.Color",
            FrameResource::PickIds => "Pick.Ids",
            FrameResource::PickDepth => "Pick.Depth",
            FrameResource::SceneInstances => "Scene.Instances",
            FrameResource::SceneLights => "Scene.Lights",
            FrameResource::MaterialHeaders => "Material.Headers",
            FrameResource::MaterialNodes => "Material.Nodes",
        }
    }
}

impl AsRef<str> for FrameResource {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

impl std::fmt::Display for FrameResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The graph's user data: everything execute callbacks need besides resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameData {
    pub uniform: FrameUniform,
    pub configs: PassConfigs,
    pub instance_count: u32,
    pub light_count: u32,
    /// Light culling tiles across and down.
    pub light_tiles: (u32, u32),
}

impl FrameData {
    pub fn uniform_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.uniform)
    }

    pub fn tile_count(&self) -> u32 {
        self.light_tiles.0 * self.light_tiles.1
    }
}

impl Program {
    pub fn desc(self) -> ProgramDesc {
        match self {
            Program::ShadowDepth => shadow_csm::PROGRAM,
            Program::DepthPrepass => depth_prepass::PROGRAM,
            Program::LightCluster => light_cluster::PROGRAM,
            Program::ForwardMrt => forward_mrt::PROGRAM,
            Program::PickIds => pick::PROGRAM,
            Program::BloomExtract => bloom::EXTRACT_PROGRAM,
            Program::BloomBlurH => bloom::BLUR_H_PROGRAM,
            Program::BloomBlurV => bloom::BLUR_V_PROGRAM,
            Program::Tonemap => tonemap::PROGRAM,
            Program::TonemapBloom => tonemap::BLOOM_PROGRAM,
            Program::SelectionOutline => selection::PROGRAM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn resource_names_are_unique() {
        let names: HashSet<&str> = FrameResource::ALL.iter().map(|resource| resource.name()).collect();
        assert_eq!(names.len(), FrameResource::ALL.len());
        assert_eq!(FrameResource::LightGrid.as_ref(), "Light.Grid");
    }

    #[test]
    fn every_program_names_its_entry_points() {
        for program in Program::ALL {
            let desc = program.desc();
            let source = desc.sources.concat();
            if program.is_compute() {
                let entry = desc.compute.unwrap();
                assert!(source.contains(&format!("fn {entry}(")), "{program:?}");
                assert!(desc.vertex.is_none() && desc.fragment.is_none());
            } else {
                let vertex = desc.vertex.unwrap();
                assert!(source.contains(&format!("fn {vertex}(")), "{program:?}");
                if let Some(fragment) = desc.fragment {
                    assert!(source.contains(&format!("fn {fragment}(")), "{program:?}");
                }
            }
        }
    }
}
