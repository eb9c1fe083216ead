use super::F;
use super::anim::Animation;
use super::fbx::ObjectId;
use super::material::{Material, Texture};

use glam::{Mat4, Quat, Vec3};

/// Decomposed local transform of a node or bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn to_mat(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn from_mat(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }
}

/// How a node inherits its parent's transform (FBX `InheritType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritType {
    /// Parent rotation then child scale, then parent scale (`eInheritRrSs`).
    #[default]
    RrSs,
    /// `eInheritRSrs`
    RSrs,
    /// Parent scale is ignored (`eInheritRrs`).
    Rrs,
}

impl InheritType {
    pub fn from_fbx(v: i64) -> Self {
        match v {
            0 => Self::RrSs,
            2 => Self::Rrs,
            _ => Self::RSrs,
        }
    }
}

/// Mesh data attached to a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshInstance {
    /// Index into [`Scene::meshes`].
    pub mesh: usize,
    /// Material slots, indexed by [`SubMesh::material_index`]. `None` where a slot
    /// referenced a material that could not be resolved.
    pub materials: Vec<Option<usize>>,
    /// Index into [`Scene::skeletons`].
    pub skeleton: Option<usize>,
    /// Bind pose matrix of the mesh, when the file supplies a non-identity one.
    pub pose_matrix: Option<Mat4>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub id: ObjectId,
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub transform: Transform,
    pub inherit_type: InheritType,
    /// `None` for transform-only nodes.
    pub mesh: Option<MeshInstance>,
}

/// Range of one material bucket inside a [`Mesh`]'s buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubMesh {
    pub material_index: usize,
    pub vertex_start: usize,
    pub vertex_count: usize,
    pub index_start: usize,
    pub index_count: usize,
}

/// Triangulated, de-indexed geometry with one vertex per triangle corner.
/// Buffers are ordered by material index so each [`SubMesh`] is contiguous.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Mesh {
    pub id: ObjectId,
    pub name: String,

    pub v: Vec<[F; 3]>,
    /// Empty if the geometry has no normal layer.
    pub n: Vec<[F; 3]>,
    /// Empty if the geometry has no UV layer.
    pub uv: Vec<[F; 2]>,
    pub indices: Vec<u32>,

    /// Material index of each vertex.
    pub material_indices: Vec<usize>,

    /// 1-1 relation between vertices and joint/idxs weights, empty without a skin.
    pub joint_idxs: Vec<[u16; 4]>,
    pub joint_weights: Vec<[F; 4]>,

    pub submeshes: Vec<SubMesh>,
}

impl Mesh {
    pub fn num_tris(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_skinned(&self) -> bool {
        !self.joint_idxs.is_empty()
    }

    /// Bakes a transform into positions and normals.
    pub fn transform(&mut self, m: Mat4) {
        for v in &mut self.v {
            *v = m.transform_point3(Vec3::from_array(*v)).to_array();
        }
        let normal_mat = glam::Mat3::from_mat4(m).inverse().transpose();
        for n in &mut self.n {
            *n = (normal_mat * Vec3::from_array(*n))
                .normalize_or_zero()
                .to_array();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bone {
    /// Id of the `LimbNode` model this bone was built from, or of its cluster when
    /// the model never appeared.
    pub id: ObjectId,
    pub name: String,
    /// Index of the parent bone in the same skeleton.
    pub parent: Option<usize>,
    pub transform: Transform,
    pub local_matrix: Mat4,
    /// Local matrix captured at import time.
    pub rest_pose: Mat4,
    pub world_matrix: Mat4,
    pub inverse_bind_matrix: Mat4,
    /// The cluster's `TransformLink`: bone to world at bind time.
    pub link_matrix: Mat4,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Skeleton {
    pub id: ObjectId,
    pub name: String,
    /// Stable order: the cluster order of the skin deformer. Skin weights index into this.
    pub bones: Vec<Bone>,
    /// Set when a mesh bound to this skeleton carries a non-identity bind pose.
    pub needs_initial_skin_matrix: bool,
}

impl Skeleton {
    pub fn bone_index(&self, id: ObjectId) -> Option<usize> {
        self.bones.iter().position(|b| b.id == id)
    }
}

/// Everything produced by one import, in file declaration order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Scene {
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub skeletons: Vec<Skeleton>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub animations: Vec<Animation>,
}

impl Scene {
    pub fn root_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].parent.is_none())
    }

    pub fn mesh_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.mesh.is_some())
    }

    pub fn transform_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.mesh.is_none())
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// World matrix of a node, composed through its parents.
    pub fn world_matrix(&self, node: usize) -> Mat4 {
        let n = &self.nodes[node];
        let local = n.transform.to_mat();
        match n.parent {
            Some(p) => self.world_matrix(p) * local,
            None => local,
        }
    }
}

#[test]
fn test_transform_roundtrip() {
    let t = Transform {
        translation: Vec3::new(1., 2., 3.),
        rotation: Quat::from_rotation_y(0.5),
        scale: Vec3::splat(2.),
    };
    let back = Transform::from_mat(t.to_mat());
    assert!(back.translation.abs_diff_eq(t.translation, 1e-5));
    assert!(back.rotation.abs_diff_eq(t.rotation, 1e-5));
    assert!(back.scale.abs_diff_eq(t.scale, 1e-5));
}

#[test]
fn test_mesh_transform_bakes_translation() {
    let mut m = Mesh {
        v: vec![[0., 0., 0.]],
        n: vec![[0., 1., 0.]],
        ..Default::default()
    };
    m.transform(Mat4::from_translation(Vec3::new(1., 0., 0.)));
    assert_eq!(m.v[0], [1., 0., 0.]);
    assert_eq!(m.n[0], [0., 1., 0.]);
}
