//! FBX import: raw node tree decoding and the stages that turn it into a [`crate::Scene`].

pub mod connections;
pub mod export;
pub mod parser;
pub mod record;
pub mod text;

/// Per-model transform properties.
pub mod transform;

/// Materials, textures and their media.
pub mod material;

/// Skin deformers, clusters and bone hierarchies.
pub mod skeleton;

/// Conversion of `Geometry` records into triangulated meshes.
pub mod to_mesh;

/// Conversion of animation stacks into clips.
pub mod to_anim;

/// Drives the import stages in dependency order.
pub mod loader;

pub use loader::{ImportOptions, import, import_document};
pub use record::{Data, Record};

/// Identifier of an object inside one document.
pub type ObjectId = i64;

/// FBX key times are stored in ticks.
pub const TICKS_PER_SECOND: f64 = 46_186_158_000.;

/// Oldest document version the importer understands.
pub const MIN_VERSION: i64 = 7000;

/// Records under `Objects`, by id.
pub type Objects<'a> = std::collections::HashMap<ObjectId, &'a Record>;

/// Indexes every record under `Objects` that carries an id.
pub fn index_objects(objects: &Record) -> Objects<'_> {
    objects
        .children
        .iter()
        .filter_map(|r| Some((r.id()?, r)))
        .collect()
}
