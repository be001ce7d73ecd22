use crate::material::{ColorSpace, MaterialGraph, MaterialId, MaterialNode, MaterialSystem};
use crate::material::{SURFACE_BASE_COLOR, SURFACE_EMISSIVE, SURFACE_ROUGHNESS};
use nalgebra_glm as glm;

pub const MAX_LIGHTS: usize = 32;
pub const INSTANCE_FLAG_SELECTED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: glm::Vec3,
    pub rotation: glm::Quat,
    pub scale: glm::Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: glm::Vec3::zeros(),
            rotation: glm::Quat::identity(),
            scale: glm::vec3(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    pub fn at(translation: glm::Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn with_scale(mut self, scale: glm::Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, angle: f32, axis: &glm::Vec3) -> Self {
        self.rotation = glm::quat_angle_axis(angle, axis);
        self
    }

    pub fn matrix(&self) -> glm::Mat4 {
        glm::translation(&self.translation) * glm::quat_to_mat4(&self.rotation) * glm::scaling(&self.scale)
    }
}

/// Built-in procedural meshes, generated from the vertex index in the shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mesh {
    Cube,
    Plane,
}

impl Mesh {
    pub fn as_u32(self) -> u32 {
        match self {
            Mesh::Cube => 0,
            Mesh::Plane => 1,
        }
    }

    pub fn vertex_count(self) -> u32 {
        match self {
            Mesh::Cube => 36,
            Mesh::Plane => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Value written to the pick buffer. Zero means background.
    pub fn pick_id(self) -> u32 {
        self.0 + 1
    }

    pub fn from_pick_id(id: u32) -> Option<EntityId> {
        id.checked_sub(1).map(EntityId)
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub transform: Transform,
    pub mesh: Mesh,
    pub material: MaterialId,
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Directional {
        direction: glm::Vec3,
        color: glm::Vec3,
        intensity: f32,
    },
    Point {
        position: glm::Vec3,
        color: glm::Vec3,
        intensity: f32,
        radius: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: glm::Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn looking_at(position: glm::Vec3, target: glm::Vec3) -> Self {
        let direction = glm::normalize(&(target - position));
        Self {
            position,
            yaw: direction.z.atan2(direction.x),
            pitch: direction.y.clamp(-1.0, 1.0).asin(),
            fov: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }

    pub fn forward(&self) -> glm::Vec3 {
        glm::vec3(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
    }

    pub fn right(&self) -> glm::Vec3 {
        glm::normalize(&glm::cross(&self.forward(), &glm::Vec3::y()))
    }

    pub fn view(&self) -> glm::Mat4 {
        glm::look_at_rh(&self.position, &(self.position + self.forward()), &glm::Vec3::y())
    }

    pub fn projection(&self, aspect_ratio: f32) -> glm::Mat4 {
        glm::perspective_rh_zo(aspect_ratio, self.fov.to_radians(), self.near, self.far)
    }

    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        let limit = 89_f32.to_radians();
        self.yaw += yaw;
        self.pitch = (self.pitch + pitch).clamp(-limit, limit);
    }

    /// Moves along the camera's forward, right and world up axes.
    pub fn translate(&mut self, forward: f32, right: f32, up: f32) {
        self.position += self.forward() * forward + self.right() * right + glm::Vec3::y() * up;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRecord {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub material: u32,
    pub mesh: u32,
    pub id: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightRecord {
    /// xyz position for point lights or direction for directional ones, w 1 for point.
    pub position: [f32; 4],
    pub color: [f32; 4],
    /// x radius.
    pub params: [f32; 4],
}

impl From<&Light> for LightRecord {
    fn from(light: &Light) -> Self {
        match *light {
            Light::Directional {
                direction,
                color,
                intensity,
            } => {
                let direction = glm::normalize(&direction);
                Self {
                    position: [direction.x, direction.y, direction.z, 0.0],
                    color: [color.x, color.y, color.z, intensity],
                    params: [0.0; 4],
                }
            }
            Light::Point {
                position,
                color,
                intensity,
                radius,
            } => Self {
                position: [position.x, position.y, position.z, 1.0],
                color: [color.x, color.y, color.z, intensity],
                params: [radius, 0.0, 0.0, 0.0],
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct World {
    pub entities: Vec<Entity>,
    pub lights: Vec<Light>,
    pub camera: Camera,
    pub selection: Option<EntityId>,
}

impl World {
    pub fn new(camera: Camera) -> Self {
        Self {
            entities: Vec::new(),
            lights: Vec::new(),
            camera,
            selection: None,
        }
    }

    pub fn spawn(&mut self, name: impl Into<String>, transform: Transform, mesh: Mesh, material: MaterialId) -> EntityId {
        self.entities.push(Entity {
            name: name.into(),
            transform,
            mesh,
            material,
            visible: true,
        });
        EntityId(self.entities.len() as u32 - 1)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0 as usize)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id.0 as usize)
    }

    /// Selects the entity behind a pick id, or clears the selection for the
    /// background.
    pub fn select_pick_id(&mut self, id: u32) -> Option<EntityId> {
        self.selection = EntityId::from_pick_id(id).filter(|entity| self.entity(*entity).is_some());
        self.selection
    }

    /// Visible entities in entity order.
    pub fn renderables(&self) -> Vec<InstanceRecord> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, entity)| entity.visible)
            .map(|(index, entity)| {
                let id = EntityId(index as u32);
                let model = entity.transform.matrix();
                let normal = glm::transpose(&glm::inverse(&model));
                InstanceRecord {
                    model: model.into(),
                    normal: normal.into(),
                    material: entity.material.0,
                    mesh: entity.mesh.as_u32(),
                    id: id.pick_id(),
                    flags: if self.selection == Some(id) {
                        INSTANCE_FLAG_SELECTED
                    } else {
                        0
                    },
                }
            })
            .collect()
    }

    pub fn light_records(&self) -> Vec<LightRecord> {
        if self.lights.len() > MAX_LIGHTS {
            log::warn!("{} lights in the world, only {MAX_LIGHTS} are shaded", self.lights.len());
        }
        self.lights.iter().take(MAX_LIGHTS).map(LightRecord::from).collect()
    }

    /// First directional light, the one that casts shadows.
    pub fn sun(&self) -> Option<glm::Vec3> {
        self.lights.iter().find_map(|light| match light {
            Light::Directional { direction, .. } => Some(glm::normalize(direction)),
            Light::Point { .. } => None,
        })
    }

    /// A floor, a few cubes with different materials, a sun and two point lights.
    pub fn demo(materials: &mut MaterialSystem) -> Self {
        let floor = materials.create("floor", floor_material());
        let red = materials.create("red plastic", MaterialGraph::constant([0.8, 0.1, 0.1, 1.0], 0.0, 0.4));
        let gold = materials.create("gold", MaterialGraph::constant([1.0, 0.77, 0.34, 1.0], 1.0, 0.25));
        let lamp = materials.create("lamp", glowing_material([1.0, 0.6, 0.2]));
        let crate_material = materials.create("crate", textured_material("assets/textures/crate.png"));

        let mut world = World::new(Camera::looking_at(glm::vec3(0.0, 3.0, 8.0), glm::Vec3::zeros()));
        world.spawn(
            "Floor",
            Transform::default().with_scale(glm::vec3(10.0, 1.0, 10.0)),
            Mesh::Plane,
            floor,
        );
        world.spawn("Red Cube", Transform::at(glm::vec3(-2.0, 0.5, 0.0)), Mesh::Cube, red);
        world.spawn(
            "Gold Cube",
            Transform::at(glm::vec3(0.0, 0.75, 0.0))
                .with_scale(glm::vec3(1.5, 1.5, 1.5))
                .with_rotation(30_f32.to_radians(), &glm::Vec3::y()),
            Mesh::Cube,
            gold,
        );
        world.spawn(
            "Lamp",
            Transform::at(glm::vec3(2.0, 1.5, -1.0)).with_scale(glm::vec3(0.3, 0.3, 0.3)),
            Mesh::Cube,
            lamp,
        );
        world.spawn("Crate", Transform::at(glm::vec3(2.0, 0.5, 1.5)), Mesh::Cube, crate_material);

        world.lights.push(Light::Directional {
            direction: glm::vec3(-0.4, -1.0, -0.3),
            color: glm::vec3(1.0, 0.96, 0.9),
            intensity: 2.5,
        });
        world.lights.push(Light::Point {
            position: glm::vec3(2.0, 1.5, -1.0),
            color: glm::vec3(1.0, 0.6, 0.2),
            intensity: 6.0,
            radius: 6.0,
        });
        world.lights.push(Light::Point {
            position: glm::vec3(-3.0, 2.0, 2.0),
            color: glm::vec3(0.3, 0.5, 1.0),
            intensity: 4.0,
            radius: 5.0,
        });
        world
    }
}

/// Two-tone floor blended along the first texture coordinate.
fn floor_material() -> MaterialGraph {
    let mut graph = MaterialGraph::new();
    let output = graph.add(MaterialNode::SurfaceOutput);
    let uv = graph.add(MaterialNode::Uv0);
    let u = graph.add(MaterialNode::Swizzle { lanes: [0, 0, 0, 0] });
    let dark = graph.add(MaterialNode::ConstColor([0.25, 0.25, 0.28, 1.0]));
    let light = graph.add(MaterialNode::ConstColor([0.55, 0.55, 0.6, 1.0]));
    let blend = graph.add(MaterialNode::Lerp);
    graph.connect(uv, 0, u, 0);
    graph.connect(dark, 0, blend, 0);
    graph.connect(light, 0, blend, 1);
    graph.connect(u, 0, blend, 2);
    graph.connect(blend, 0, output, SURFACE_BASE_COLOR);
    graph.set_value(output, SURFACE_ROUGHNESS, [0.8; 4]);
    graph
}

fn glowing_material(color: [f32; 3]) -> MaterialGraph {
    let mut graph = MaterialGraph::constant([color[0], color[1], color[2], 1.0], 0.0, 0.6);
    if let Some(output) = graph.surface_outputs().first().copied() {
        let glow = graph.add(MaterialNode::ConstColor([color[0], color[1], color[2], 1.0]));
        let strength = graph.add(MaterialNode::ConstFloat(4.0));
        let emissive = graph.add(MaterialNode::Mul);
        graph.connect(glow, 0, emissive, 0);
        graph.connect(strength, 0, emissive, 1);
        graph.connect(emissive, 0, output, SURFACE_EMISSIVE);
    }
    graph
}

fn textured_material(path: &str) -> MaterialGraph {
    let mut graph = MaterialGraph::new();
    let output = graph.add(MaterialNode::SurfaceOutput);
    let albedo = graph.add(MaterialNode::TextureSample {
        path: path.to_string(),
        color_space: ColorSpace::Srgb,
    });
    graph.connect(albedo, 0, output, SURFACE_BASE_COLOR);
    graph.set_value(output, SURFACE_ROUGHNESS, [0.7; 4]);
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        let mut materials = MaterialSystem::new();
        World::demo(&mut materials)
    }

    #[test]
    fn records_match_gpu_layout() {
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 144);
        assert_eq!(std::mem::size_of::<LightRecord>(), 48);
    }

    #[test]
    fn renderables_follow_entity_order_and_skip_hidden() {
        let mut world = world();
        world.entities[1].visible = false;
        let ids: Vec<u32> = world.renderables().iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 3, 4, 5]);
    }

    #[test]
    fn selection_sets_the_instance_flag() {
        let mut world = world();
        assert_eq!(world.select_pick_id(3), Some(EntityId(2)));
        let flagged: Vec<u32> = world
            .renderables()
            .iter()
            .filter(|record| record.flags & INSTANCE_FLAG_SELECTED != 0)
            .map(|record| record.id)
            .collect();
        assert_eq!(flagged, vec![3]);

        assert_eq!(world.select_pick_id(0), None);
        assert_eq!(world.select_pick_id(99), None);
    }

    #[test]
    fn light_records_encode_kind_in_w() {
        let world = world();
        let records = world.light_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].position[3], 0.0);
        assert_eq!(records[1].position[3], 1.0);
        assert_eq!(records[1].params[0], 6.0);
        assert!(world.sun().is_some());
    }

    #[test]
    fn camera_looks_at_its_target() {
        let camera = Camera::looking_at(glm::vec3(0.0, 0.0, 5.0), glm::Vec3::zeros());
        assert!((camera.forward() - glm::vec3(0.0, 0.0, -1.0)).norm() < 1e-5);

        let mut camera = camera;
        camera.rotate(0.0, 10.0);
        assert!(camera.pitch <= 89_f32.to_radians());
    }

    #[test]
    fn demo_materials_compile() {
        let mut materials = MaterialSystem::new();
        World::demo(&mut materials);
        for index in 0..materials.len() as u32 {
            let id = MaterialId(index);
            assert_eq!(materials.error(id), None, "{:?}", materials.name(id));
            let program = crate::material::compile(&materials.snapshot(id).unwrap()).unwrap();
            assert!(!program.nodes.is_empty());
        }
    }
}
