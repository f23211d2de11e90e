// Scene data: the textured double quad and its uniforms

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::mem::offset_of;

use crate::backend::pipeline::VertexLayout;

/// Interleaved vertex: position, color, texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    const fn new(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position: Vec3::from_array(position),
            color: Vec3::from_array(color),
            uv: Vec2::from_array(uv),
        }
    }

    pub fn layout() -> VertexLayout {
        let attribute = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };

        VertexLayout {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
                attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
                attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
            ],
        }
    }
}

const RED: [f32; 3] = [1.0, 0.0, 0.0];
const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
const BLUE: [f32; 3] = [0.0, 0.0, 1.0];

/// Two quads: a diamond at z=0 and a square behind it at z=0.2
pub const MESH_VERTICES: [Vertex; 8] = [
    Vertex::new([0.0, 0.5, 0.0], RED, [0.0, 1.0]),
    Vertex::new([0.5, 0.0, 0.0], GREEN, [0.0, 0.0]),
    Vertex::new([0.0, -0.5, 0.0], BLUE, [1.0, 0.0]),
    Vertex::new([-0.5, 0.0, 0.0], RED, [1.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.2], RED, [0.0, 1.0]),
    Vertex::new([0.5, 0.5, 0.2], GREEN, [0.0, 0.0]),
    Vertex::new([0.5, -0.5, 0.2], BLUE, [1.0, 0.0]),
    Vertex::new([-0.5, -0.5, 0.2], RED, [1.0, 1.0]),
];

pub const MESH_INDICES: [u32; 12] = [0, 2, 1, 0, 3, 2, 4, 6, 5, 4, 7, 6];

/// Binding 0: camera matrices
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VpMatrices {
    pub view: Mat4,
    pub projection: Mat4,
}

/// Binding 1: per-object transform
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
}

impl Default for VpMatrices {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

impl Default for ObjectUniform {
    fn default() -> Self {
        Self { model: Mat4::IDENTITY }
    }
}

/// The mesh's transform, spinning about Z.
#[derive(Debug, Default)]
pub struct Model {
    transform: ObjectUniform,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate to the angle for `time` seconds since start.
    pub fn update(&mut self, time: f32) {
        self.transform.model = Mat4::from_rotation_z(time / std::f32::consts::PI);
    }

    pub fn uniform(&self) -> ObjectUniform {
        self.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.bindings[0].stride, 32);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(layout.attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_indices_reference_existing_vertices() {
        assert!(MESH_INDICES.iter().all(|&i| (i as usize) < MESH_VERTICES.len()));
        assert_eq!(MESH_INDICES.len() % 3, 0);
    }

    #[test]
    fn test_uniform_sizes_match_shader_blocks() {
        assert_eq!(std::mem::size_of::<VpMatrices>(), 128);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 64);
    }

    #[test]
    fn test_model_rotates_about_z() {
        let mut model = Model::new();
        model.update(std::f32::consts::PI * std::f32::consts::FRAC_PI_2);

        let x = model.uniform().model.transform_vector3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-5);
        let z = model.uniform().model.transform_vector3(Vec3::Z);
        assert!((z - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_model_starts_at_identity() {
        assert_eq!(Model::new().uniform().model, Mat4::IDENTITY);
    }
}
