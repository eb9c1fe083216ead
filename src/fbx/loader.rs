use super::connections::ConnectionsGraph;
use super::material::{self, MaterialLibrary};
use super::record::Record;
use super::skeleton::{self, RawSkeleton};
use super::transform::{PendingTransform, TransformProperties};
use super::{MIN_VERSION, ObjectId, Objects, index_objects, parser, text, to_anim, to_mesh};
use crate::error::{ImportError, Result};
use crate::mesh::{InheritType, MeshInstance, Node, Scene, Transform};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Caller supplied knobs of one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Directory relative texture paths are resolved against, and where embedded
    /// textures are written.
    pub root_path: PathBuf,
    /// Write embedded textures under `root_path` once the import succeeds.
    pub write_textures: bool,
    /// Abort on the first malformed geometry, cluster or curve instead of skipping it.
    pub strict: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            write_textures: false,
            strict: cfg!(feature = "strict_fbx"),
        }
    }
}

impl ImportOptions {
    pub fn with_root_path(mut self, root_path: impl Into<PathBuf>) -> Self {
        self.root_path = root_path.into();
        self
    }
    pub fn with_write_textures(mut self, write_textures: bool) -> Self {
        self.write_textures = write_textures;
        self
    }
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Imports a binary or text document.
/// Input that is neither format, or older than [`MIN_VERSION`], yields an empty scene so the
/// caller can try another decoder. [`parser::parse`] and [`text::parse`] keep the typed error.
pub fn import(bytes: &[u8], opts: &ImportOptions) -> Result<Scene> {
    let doc = if parser::is_binary(bytes) {
        let version = parser::binary_version(bytes)?;
        if i64::from(version) < MIN_VERSION {
            log::warn!("binary version {version} is older than {MIN_VERSION}, nothing imported");
            return Ok(Scene::default());
        }
        parser::parse(bytes)?
    } else {
        let Ok(src) = std::str::from_utf8(bytes) else {
            log::warn!("neither binary FBX nor UTF-8 text, nothing imported");
            return Ok(Scene::default());
        };
        match text::parse(src) {
            Err(ImportError::UnsupportedFormat(reason)) => {
                log::warn!("{reason}, nothing imported");
                return Ok(Scene::default());
            }
            doc => doc?,
        }
    };
    import_document(&doc, opts)
}

/// Builds a scene out of an already parsed node tree.
/// Nothing outside the returned scene is touched unless textures are written.
pub fn import_document(doc: &Record, opts: &ImportOptions) -> Result<Scene> {
    let version = doc
        .child("FBXHeaderExtension")
        .and_then(|h| h.child("FBXVersion"))
        .and_then(|v| v.prop_i64(0));
    match version {
        Some(v) if v < MIN_VERSION => {
            log::warn!("document version {v} is older than {MIN_VERSION}, nothing imported");
            return Ok(Scene::default());
        }
        Some(v) => log::info!("importing FBX {v}"),
        None => log::debug!("document has no FBXVersion"),
    }

    let Some(objects) = doc.child("Objects") else {
        log::info!("document has no objects");
        return Ok(Scene::default());
    };
    let conns = doc
        .child("Connections")
        .map(ConnectionsGraph::build)
        .unwrap_or_default();

    let mut ctx = ImportContext::new(objects, conns, opts)?;
    ctx.import_geometries()?;
    ctx.import_models();
    ctx.finish()
}

/// A node waiting for its transform to be applied after parenting.
struct NodeBuilder {
    node: Node,
    pending: Option<TransformProperties>,
}

impl PendingTransform for NodeBuilder {
    fn pending(&mut self) -> &mut Option<TransformProperties> {
        &mut self.pending
    }
    fn set_transform(&mut self, t: Transform, inherit_type: Option<InheritType>) {
        self.node.transform = t;
        self.node.inherit_type = inherit_type.unwrap_or_default();
    }
}

/// Per import caches. Each is written once per id and only read afterwards.
struct ImportContext<'a> {
    opts: &'a ImportOptions,
    objects: &'a Record,
    index: Objects<'a>,
    conns: ConnectionsGraph,
    library: MaterialLibrary,
    skeletons: Vec<RawSkeleton>,
    /// geometry id -> index into `scene.meshes`
    geometries: HashMap<ObjectId, usize>,
    /// model id -> index into `nodes`
    models: HashMap<ObjectId, usize>,
    nodes: Vec<NodeBuilder>,
    scene: Scene,
}

impl<'a> ImportContext<'a> {
    fn new(objects: &'a Record, conns: ConnectionsGraph, opts: &'a ImportOptions) -> Result<Self> {
        let index = index_objects(objects);
        let library = material::resolve(objects, &index, &conns, &opts.root_path);
        let skeletons = skeleton::collect_raw(objects, &index, &conns, opts.strict)?;
        Ok(Self {
            opts,
            objects,
            index,
            conns,
            library,
            skeletons,
            geometries: HashMap::new(),
            models: HashMap::new(),
            nodes: vec![],
            scene: Scene::default(),
        })
    }

    fn record(&self, id: ObjectId, kind: &str) -> Option<&'a Record> {
        self.index.get(&id).copied().filter(|r| r.name == kind)
    }

    fn import_geometries(&mut self) -> Result<()> {
        for geom in self.objects.children_named("Geometry") {
            let Some(id) = geom.id() else { continue };
            if geom.subtype() != "Mesh" {
                log::debug!("skipping `{}` geometry `{}`", geom.subtype(), geom.object_name());
                continue;
            }
            let model = self
                .conns
                .parents(id)
                .iter()
                .find_map(|l| self.record(l.id, "Model"));
            let skin = self
                .conns
                .children(id)
                .iter()
                .find_map(|l| self.skeletons.iter().find(|s| s.id == l.id));

            match to_mesh::import_geometry(geom, skin, model) {
                Ok(mesh) => {
                    self.geometries.insert(id, self.scene.meshes.len());
                    self.scene.meshes.push(mesh);
                }
                Err(e) if self.opts.strict => return Err(e),
                Err(e) => log::warn!("skipping geometry `{}`: {e}", geom.object_name()),
            }
        }
        Ok(())
    }

    fn mesh_instance(&self, model_id: ObjectId) -> Option<MeshInstance> {
        let children = self.conns.children(model_id);
        let mesh = children
            .iter()
            .find_map(|l| self.geometries.get(&l.id).copied())?;
        let materials = children
            .iter()
            .filter(|l| self.record(l.id, "Material").is_some())
            .map(|l| self.library.material_ids.get(&l.id).copied())
            .collect();
        Some(MeshInstance {
            mesh,
            materials,
            ..Default::default()
        })
    }

    /// Model pass: creates nodes and binds bones, then parents and applies transforms.
    fn import_models(&mut self) {
        for model in self.objects.children_named("Model") {
            let Some(id) = model.id() else { continue };
            if self.conns.get(id).is_none() {
                log::debug!("skipping unconnected model `{}`", model.object_name());
                continue;
            }
            let mesh = match model.subtype() {
                "Light" | "Camera" | "NurbsCurve" => {
                    log::debug!("skipping {} `{}`", model.subtype(), model.object_name());
                    continue;
                }
                "Root" | "LimbNode" => {
                    let mut bound = false;
                    for rs in &mut self.skeletons {
                        bound |= rs.bind(model);
                    }
                    if !bound {
                        log::debug!("bone `{}` deforms no skin", model.object_name());
                    }
                    continue;
                }
                "Mesh" => {
                    let instance = self.mesh_instance(id);
                    if instance.is_none() {
                        log::debug!("mesh `{}` has no geometry", model.object_name());
                    }
                    instance
                }
                _ => None,
            };
            self.models.insert(id, self.nodes.len());
            self.nodes.push(NodeBuilder {
                node: Node {
                    id,
                    name: model.object_name().to_string(),
                    mesh,
                    ..Default::default()
                },
                pending: Some(TransformProperties::parse(model)),
            });
        }

        for i in 0..self.nodes.len() {
            let id = self.nodes[i].node.id;
            let parent = self
                .conns
                .parents(id)
                .iter()
                .find_map(|l| self.models.get(&l.id).copied())
                .filter(|&p| p != i);
            if let Some(p) = parent {
                self.nodes[i].node.parent = Some(p);
                self.nodes[p].node.children.push(i);
            }
        }
        for b in &mut self.nodes {
            b.apply_transform();
        }
    }

    fn finish(mut self) -> Result<Scene> {
        self.scene.nodes = self.nodes.into_iter().map(|b| b.node).collect();

        let poses = skeleton::parse_bind_poses(self.objects);
        skeleton::finalize(self.skeletons, &self.conns, &poses, &self.models, &mut self.scene);

        self.scene.animations = to_anim::import_animations(
            self.objects,
            &self.index,
            &self.conns,
            &self.scene,
            &self.models,
            self.opts.strict,
        )?;

        self.scene.materials = self.library.materials;
        self.scene.textures = self.library.textures;
        if self.opts.write_textures {
            material::commit_textures(&mut self.scene.textures, &self.opts.root_path);
        }

        let s = &self.scene;
        log::info!(
            "imported {} nodes, {} meshes, {} skeletons, {} materials, {} textures, {} animations",
            s.nodes.len(),
            s.meshes.len(),
            s.skeletons.len(),
            s.materials.len(),
            s.textures.len(),
            s.animations.len(),
        );
        Ok(self.scene)
    }
}

/// Reads and imports a file, resolving textures next to it.
pub fn load(path: impl AsRef<Path>) -> Result<Scene> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let root = path.parent().unwrap_or(Path::new("."));
    let opts = ImportOptions::default().with_root_path(root);
    import(&bytes, &opts)
}

#[cfg(test)]
use crate::fbx::record::Data;

#[cfg(test)]
fn object(kind: &str, id: i64, name: &str, class: &str, children: Vec<Record>) -> Record {
    Record::new(
        kind,
        vec![Data::I64(id), Data::String(format!("{kind}::{name}")), Data::str(class)],
        children,
    )
}

#[cfg(test)]
fn c(child: i64, parent: i64) -> Record {
    Record::new("C", vec![Data::str("OO"), Data::I64(child), Data::I64(parent)], vec![])
}

#[cfg(test)]
fn doc(version: i64, objects: Vec<Record>, conns: Vec<Record>) -> Record {
    Record::new(
        "",
        vec![],
        vec![
            Record::new(
                "FBXHeaderExtension",
                vec![],
                vec![Record::new("FBXVersion", vec![Data::I32(version as i32)], vec![])],
            ),
            Record::new("Objects", vec![], objects),
            Record::new("Connections", vec![], conns),
        ],
    )
}

#[test]
fn test_version_gate() {
    let model = || vec![object("Model", 1, "Root", "Null", vec![])];
    let opts = ImportOptions::default();
    let scene = import_document(&doc(6100, model(), vec![c(1, 0)]), &opts).unwrap();
    assert_eq!(scene, Scene::default());
    let scene = import_document(&doc(7400, model(), vec![c(1, 0)]), &opts).unwrap();
    assert_eq!(scene.nodes.len(), 1);
}

#[test]
fn test_model_kinds_and_parenting() {
    let objects = vec![
        object("Model", 1, "Root", "Null", vec![]),
        object("Model", 2, "Lamp", "Light", vec![]),
        object("Model", 3, "Child", "Null", vec![]),
        object("Model", 4, "Floating", "Null", vec![]),
        object("Model", 5, "Eye", "Camera", vec![]),
    ];
    let conns = vec![c(1, 0), c(2, 1), c(3, 1), c(5, 0)];
    let scene = import_document(&doc(7400, objects, conns), &ImportOptions::default()).unwrap();

    let names = scene.nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["Root", "Child"]);
    assert_eq!(scene.nodes[1].parent, Some(0));
    assert_eq!(scene.nodes[0].children, [1]);
    assert_eq!(scene.root_nodes().collect::<Vec<_>>(), [0]);
    assert_eq!(scene.transform_nodes().count(), 2);
}

#[test]
fn test_lenient_skips_bad_geometry() {
    let bad = object("Geometry", 10, "Broken", "Mesh", vec![]);
    let model = object("Model", 1, "Cube", "Mesh", vec![]);
    let d = doc(7400, vec![bad, model], vec![c(10, 1), c(1, 0)]);

    let strict = ImportOptions::default().with_strict(true);
    let err = import_document(&d, &strict).unwrap_err();
    assert!(matches!(err, ImportError::MalformedRecord { .. }), "{err}");

    let lenient = ImportOptions::default().with_strict(false);
    let scene = import_document(&d, &lenient).unwrap();
    assert!(scene.meshes.is_empty());
    assert_eq!(scene.nodes.len(), 1);
    assert_eq!(scene.nodes[0].mesh, None);
}

#[test]
fn test_garbage_imports_empty() {
    let opts = ImportOptions::default();
    assert_eq!(import(&[0xff, 0xfe, 0x00], &opts).unwrap(), Scene::default());
    assert_eq!(import(b"; nothing but a comment\n", &opts).unwrap(), Scene::default());

    // text that does look like FBX still reports where it broke
    let err = import(b"Objects: { Model: \"Model::A", &opts).unwrap_err();
    assert!(matches!(err, ImportError::Parse { .. }), "{err}");
}
