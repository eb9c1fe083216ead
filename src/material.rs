use super::F;
use super::fbx::ObjectId;
use std::path::PathBuf;

/// Where a texture's pixels live.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    /// A file on disk, either referenced by the document or extracted from it.
    File(PathBuf),
    /// Media embedded in the document and kept in memory.
    Embedded { file_name: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub id: ObjectId,
    pub name: String,
    pub source: TextureSource,
    pub uv_offset: [F; 2],
    pub uv_scale: [F; 2],
}

/// Texture indices (into [`crate::Scene::textures`]) per material channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureSlots {
    pub diffuse: Option<usize>,
    pub normal: Option<usize>,
    pub specular: Option<usize>,
    pub ambient: Option<usize>,
    pub emissive: Option<usize>,
    pub opacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub id: ObjectId,
    pub name: String,
    pub diffuse_color: [F; 3],
    pub specular_color: [F; 3],
    pub ambient_color: [F; 3],
    pub emissive_color: [F; 3],
    pub shininess: F,
    pub opacity: F,
    pub textures: TextureSlots,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            diffuse_color: [1.; 3],
            specular_color: [1.; 3],
            ambient_color: [0.; 3],
            emissive_color: [0.; 3],
            shininess: 0.,
            opacity: 1.,
            textures: TextureSlots::default(),
        }
    }
}
