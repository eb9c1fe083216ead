//! Import of FBX scenes (binary and text) into a flat, index based scene graph:
//! triangulated meshes split per material, skeletons with rest poses, materials with
//! resolved textures and keyframed animation clips.

/// Float type used by every output buffer.
pub type F = f32;

/// Errors raised while importing.
pub mod error;

/// FBX parsing.
pub mod fbx;

/// Unified mesh representation.
pub mod mesh;

/// Materials and textures.
pub mod material;

/// Animation related structs
pub mod anim;

/// Euler order handling and handedness conversion of rotations.
pub mod quat;

pub mod util;

pub use error::{ImportError, Result};
pub use fbx::loader::load;
pub use fbx::{ImportOptions, import};
pub use material::{Material, Texture, TextureSource};
pub use mesh::{Mesh, Node, Scene, Skeleton};

/// Re-exported for materials.
pub use image;

/// Re-exported for transforms.
pub use glam;
