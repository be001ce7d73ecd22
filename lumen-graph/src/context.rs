use crate::desc::FrameExtents;
use nalgebra_glm as glm;

/// Read-only per-frame inputs handed to every execute callback.
#[derive(Debug, Clone)]
pub struct RenderPassContext {
    pub extents: FrameExtents,
    pub frame_index: u64,
    pub view: glm::Mat4,
    pub projection: glm::Mat4,
    pub view_projection: glm::Mat4,
    pub camera_position: glm::Vec3,
    pub camera_direction: glm::Vec3,
}

impl RenderPassContext {
    pub fn new(extents: FrameExtents, frame_index: u64) -> Self {
        Self {
            extents,
            frame_index,
            view: glm::Mat4::identity(),
            projection: glm::Mat4::identity(),
            view_projection: glm::Mat4::identity(),
            camera_position: glm::Vec3::zeros(),
            camera_direction: glm::vec3(0.0, 0.0, -1.0),
        }
    }

    pub fn with_camera(mut self, view: glm::Mat4, projection: glm::Mat4, position: glm::Vec3) -> Self {
        self.view = view;
        self.projection = projection;
        self.view_projection = projection * view;
        self.camera_position = position;
        let forward = glm::vec3(-view[(2, 0)], -view[(2, 1)], -view[(2, 2)]);
        self.camera_direction = if glm::length(&forward) > 0.0 {
            glm::normalize(&forward)
        } else {
            glm::vec3(0.0, 0.0, -1.0)
        };
        self
    }

    pub fn viewport_size(&self) -> (u32, u32) {
        self.extents.viewport
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.extents.viewport;
        width.max(1) as f32 / height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_direction_comes_from_view_matrix() {
        let eye = glm::vec3(0.0, 0.0, 5.0);
        let view = glm::look_at(&eye, &glm::vec3(0.0, 0.0, 0.0), &glm::vec3(0.0, 1.0, 0.0));
        let context = RenderPassContext::new(FrameExtents::uniform(800, 600), 3)
            .with_camera(view, glm::Mat4::identity(), eye);

        assert!((context.camera_direction - glm::vec3(0.0, 0.0, -1.0)).norm() < 1e-5);
        assert_eq!(context.view_projection, view);
        assert!((context.aspect_ratio() - 800.0 / 600.0).abs() < 1e-6);
    }
}
