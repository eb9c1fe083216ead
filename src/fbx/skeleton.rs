use super::connections::ConnectionsGraph;
use super::record::Record;
use super::transform::{PendingTransform, TransformProperties};
use super::{ObjectId, Objects};
use crate::F;
use crate::error::{ImportError, Result};
use crate::mesh::{Bone, InheritType, Scene, Skeleton, Transform};
use crate::quat::mirror_x_mat;

use glam::Mat4;
use std::collections::{HashMap, HashSet};

/// Skin data of one `Cluster` deformer, before any bone model is known.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawBone {
    /// Id of the cluster.
    pub id: ObjectId,
    /// Id of the `LimbNode` model the cluster deforms with.
    pub model_id: Option<ObjectId>,
    pub name: String,
    pub indices: Vec<usize>,
    pub weights: Vec<F>,
    pub transform: Mat4,
    /// Bone to world at bind time.
    pub transform_link: Mat4,
}

#[derive(Debug, Clone, PartialEq)]
struct BoneSlot {
    bone: Bone,
    pending: Option<TransformProperties>,
}

impl PendingTransform for BoneSlot {
    fn pending(&mut self) -> &mut Option<TransformProperties> {
        &mut self.pending
    }
    fn set_transform(&mut self, t: Transform, _: Option<InheritType>) {
        self.bone.transform = t;
        self.bone.local_matrix = t.to_mat();
    }
}

/// A `Skin` deformer's clusters, with bones filled in as their models are visited.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSkeleton {
    pub id: ObjectId,
    pub name: String,
    pub raw_bones: Vec<RawBone>,
    /// Parallel to `raw_bones`, the weight table is keyed by the same index.
    bones: Vec<Option<BoneSlot>>,
}

/// 4x4 column major matrix property, mirrored into output space.
fn matrix(vals: &[f64]) -> Option<Mat4> {
    let m: [f64; 16] = vals.try_into().ok()?;
    Some(mirror_x_mat(Mat4::from_cols_array(&m.map(|v| v as f32))))
}

fn matrix_child(r: &Record, name: &str) -> Result<Mat4> {
    let Some(vals) = r.child_f64s(name) else {
        return Ok(Mat4::IDENTITY);
    };
    matrix(&vals).ok_or_else(|| {
        ImportError::malformed(
            r.prop_str(1).unwrap_or(r.name.as_str()),
            format!("{name} holds {} values, expected 16", vals.len()),
        )
    })
}

pub fn parse_cluster(cluster: &Record, index: &Objects, conns: &ConnectionsGraph) -> Result<RawBone> {
    let id = cluster
        .id()
        .ok_or_else(|| ImportError::malformed("Deformer", "cluster without id"))?;
    let full_name = cluster.prop_str(1).unwrap_or("Cluster");
    let indices = cluster
        .child_i64s("Indexes")
        .unwrap_or_default()
        .into_iter()
        .map(|i| usize::try_from(i).map_err(|_| ImportError::malformed(full_name, "negative vertex index")))
        .collect::<Result<Vec<_>>>()?;
    let weights = cluster
        .child_f64s("Weights")
        .unwrap_or_default()
        .into_iter()
        .map(|w| w as F)
        .collect::<Vec<_>>();
    if indices.len() != weights.len() {
        return Err(ImportError::malformed(
            full_name,
            format!("{} indexes but {} weights", indices.len(), weights.len()),
        ));
    }

    let model_id = conns
        .children(id)
        .iter()
        .find(|l| index.get(&l.id).is_some_and(|r| r.name == "Model"))
        .map(|l| l.id);

    Ok(RawBone {
        id,
        model_id,
        name: cluster.object_name().to_string(),
        indices,
        weights,
        transform: matrix_child(cluster, "Transform")?,
        transform_link: matrix_child(cluster, "TransformLink")?,
    })
}

/// Raw pass: one skeleton per `Skin` deformer, in declaration order.
/// A malformed cluster aborts when `strict`, otherwise it is dropped with a warning.
pub fn collect_raw(
    objects: &Record,
    index: &Objects,
    conns: &ConnectionsGraph,
    strict: bool,
) -> Result<Vec<RawSkeleton>> {
    let mut seen = HashSet::new();
    let mut out = vec![];
    for skin in objects.children_named("Deformer") {
        if skin.subtype() != "Skin" {
            continue;
        }
        let Some(id) = skin.id() else { continue };
        if !seen.insert(id) {
            continue;
        }
        let mut raw_bones = vec![];
        for link in conns.children(id) {
            let Some(cluster) = index.get(&link.id) else {
                continue;
            };
            if cluster.name != "Deformer" || cluster.subtype() != "Cluster" {
                continue;
            }
            match parse_cluster(cluster, index, conns) {
                Ok(rb) => raw_bones.push(rb),
                Err(e) if strict => return Err(e),
                Err(e) => log::warn!("skipping cluster: {e}"),
            }
        }
        out.push(RawSkeleton::new(id, skin.object_name(), raw_bones));
    }
    Ok(out)
}

impl RawSkeleton {
    pub fn new(id: ObjectId, name: &str, raw_bones: Vec<RawBone>) -> Self {
        Self {
            id,
            name: name.to_string(),
            bones: vec![None; raw_bones.len()],
            raw_bones,
        }
    }

    /// Bind pass: creates the bone for `model` if one of the clusters deforms with it.
    /// Returns whether the model is a bone of this skeleton.
    pub fn bind(&mut self, model: &Record) -> bool {
        let Some(id) = model.id() else { return false };
        let Some(i) = self.raw_bones.iter().position(|b| b.model_id == Some(id)) else {
            return false;
        };
        if self.bones[i].is_none() {
            self.bones[i] = Some(BoneSlot {
                bone: Bone {
                    id,
                    name: model.object_name().to_string(),
                    ..Default::default()
                },
                pending: Some(TransformProperties::parse(model)),
            });
        }
        true
    }

    #[cfg(test)]
    fn num_bound(&self) -> usize {
        self.bones.iter().filter(|b| b.is_some()).count()
    }
}

/// Bind matrices of every `BindPose`, keyed by the posed model's id.
pub fn parse_bind_poses(objects: &Record) -> HashMap<ObjectId, Mat4> {
    let mut out = HashMap::new();
    for pose in objects.children_named("Pose") {
        if pose.subtype() != "BindPose" {
            continue;
        }
        for pn in pose.children_named("PoseNode") {
            let node = pn.child("Node").and_then(|n| n.prop_i64(0));
            let m = pn.child_f64s("Matrix").and_then(|m| matrix(&m));
            match (node, m) {
                (Some(node), Some(m)) => {
                    out.entry(node).or_insert(m);
                }
                _ => log::debug!("skipping incomplete pose node in `{}`", pose.object_name()),
            }
        }
    }
    out
}

fn placeholder(rb: &RawBone) -> Bone {
    log::debug!("cluster `{}` has no bone model, using its bind transform", rb.name);
    Bone {
        id: rb.model_id.unwrap_or(rb.id),
        name: rb.name.clone(),
        transform: Transform::from_mat(rb.transform_link),
        local_matrix: rb.transform_link,
        ..Default::default()
    }
}

/// World matrix of bone `i`, walking bone parents and then the scene node the root bone hangs from.
fn bone_world(
    bones: &[Bone],
    i: usize,
    root_parent: impl Fn(ObjectId) -> Option<Mat4>,
) -> Mat4 {
    let mut m = bones[i].local_matrix;
    let mut curr = i;
    // bounded so a cyclic hierarchy cannot hang
    for _ in 0..bones.len() {
        match bones[curr].parent {
            Some(p) => {
                m = bones[p].local_matrix * m;
                curr = p;
            }
            None => break,
        }
    }
    root_parent(bones[curr].id).map_or(m, |w| w * m)
}

/// Finalize pass, run once every model exists and is parented. Pushes one [`Skeleton`] per raw
/// skeleton and binds it to the mesh nodes whose geometry the skin deforms.
pub fn finalize(
    raw: Vec<RawSkeleton>,
    conns: &ConnectionsGraph,
    poses: &HashMap<ObjectId, Mat4>,
    models: &HashMap<ObjectId, usize>,
    scene: &mut Scene,
) {
    for rs in raw {
        let si = scene.skeletons.len();
        let mut bones = rs
            .raw_bones
            .iter()
            .zip(rs.bones)
            .map(|(rb, slot)| {
                let Some(mut slot) = slot else {
                    return placeholder(rb);
                };
                slot.apply_transform();
                slot.bone
            })
            .collect::<Vec<_>>();

        for (b, rb) in bones.iter_mut().zip(&rs.raw_bones) {
            b.rest_pose = b.local_matrix;
            b.link_matrix = rb.transform_link;
            b.inverse_bind_matrix = if rb.transform_link.determinant().abs() > F::EPSILON {
                rb.transform_link.inverse()
            } else {
                Mat4::IDENTITY
            };
        }
        for i in 0..bones.len() {
            let id = bones[i].id;
            let parent = conns
                .parents(id)
                .iter()
                .find_map(|l| bones.iter().position(|b| b.id == l.id && b.id != id));
            bones[i].parent = parent;
        }
        let root_parent = |id: ObjectId| {
            conns
                .parents(id)
                .iter()
                .find_map(|l| models.get(&l.id))
                .map(|&n| scene.world_matrix(n))
        };
        let worlds = (0..bones.len())
            .map(|i| bone_world(&bones, i, &root_parent))
            .collect::<Vec<_>>();
        for (b, w) in bones.iter_mut().zip(worlds) {
            b.world_matrix = w;
        }

        // skin -> geometry -> mesh models
        let mut owners = vec![];
        for geom in conns.parents(rs.id) {
            for m in conns.parents(geom.id) {
                if let Some(&n) = models.get(&m.id)
                    && scene.nodes[n].mesh.is_some()
                    && !owners.contains(&(m.id, n))
                {
                    owners.push((m.id, n));
                }
            }
        }

        let mut needs_initial_skin_matrix = false;
        for &(model_id, n) in &owners {
            let Some(instance) = scene.nodes[n].mesh.as_mut() else {
                continue;
            };
            instance.skeleton = Some(si);
            if let Some(&pose) = poses.get(&model_id)
                && !pose.abs_diff_eq(Mat4::IDENTITY, 1e-6)
            {
                instance.pose_matrix = Some(pose);
                needs_initial_skin_matrix = true;
            }
        }
        if let Some(&(_, n)) = owners.first() {
            let mesh_name = &scene.nodes[n].name;
            for b in &mut bones {
                b.name = format!("{mesh_name}-{}", b.name);
            }
        }

        scene.skeletons.push(Skeleton {
            id: rs.id,
            name: rs.name,
            bones,
            needs_initial_skin_matrix,
        });
    }
}

#[cfg(test)]
use crate::fbx::index_objects;
#[cfg(test)]
use crate::fbx::record::Data;
#[cfg(test)]
use crate::mesh::{MeshInstance, Node};
#[cfg(test)]
use glam::Vec3;

#[cfg(test)]
fn object(kind: &str, id: i64, name: &str, sub: &str, children: Vec<Record>) -> Record {
    Record::new(
        kind,
        vec![Data::I64(id), Data::String(format!("{kind}::{name}")), Data::str(sub)],
        children,
    )
}

#[cfg(test)]
fn cluster(id: i64, name: &str, idx: Vec<i32>, w: Vec<f64>, link: Option<Mat4>) -> Record {
    let mut children = vec![
        Record::new("Indexes", vec![Data::I32Arr(idx)], vec![]),
        Record::new("Weights", vec![Data::F64Arr(w)], vec![]),
    ];
    if let Some(link) = link {
        let m = link.to_cols_array().map(|v| v as f64).to_vec();
        children.push(Record::new("TransformLink", vec![Data::F64Arr(m)], vec![]));
    }
    object("Deformer", id, name, "Cluster", children)
}

#[cfg(test)]
fn translation(v: f64) -> Record {
    Record::new(
        "Properties70",
        vec![],
        vec![Record::new(
            "P",
            vec![
                Data::str("Lcl Translation"),
                Data::str(""),
                Data::str(""),
                Data::str("A"),
                Data::F64(v),
                Data::F64(0.),
                Data::F64(0.),
            ],
            vec![],
        )],
    )
}

/// Mesh model 1 -> geometry 2 -> skin 3 -> clusters 4, 5, 6.
/// Clusters 4 and 5 deform with limb nodes 7 and 8 (8 child of 7), cluster 6 has no model.
#[cfg(test)]
fn document() -> (Record, ConnectionsGraph) {
    let objects = Record::new(
        "Objects",
        vec![],
        vec![
            object("Model", 1, "Body", "Mesh", vec![]),
            object("Geometry", 2, "Body", "Mesh", vec![]),
            object("Deformer", 3, "Skin", "Skin", vec![]),
            cluster(4, "Hips", vec![0, 1], vec![1., 0.5], None),
            cluster(5, "Spine", vec![1], vec![0.5], None),
            cluster(
                6,
                "Orphan",
                vec![],
                vec![],
                Some(Mat4::from_translation(Vec3::new(0., 2., 0.))),
            ),
            object("Model", 7, "Hips", "LimbNode", vec![translation(1.)]),
            object("Model", 8, "Spine", "LimbNode", vec![translation(0.)]),
            object(
                "Pose",
                9,
                "BindPose",
                "BindPose",
                vec![Record::new(
                    "PoseNode",
                    vec![],
                    vec![
                        Record::new("Node", vec![Data::I64(1)], vec![]),
                        Record::new(
                            "Matrix",
                            vec![Data::F64Arr(
                                Mat4::from_scale(Vec3::splat(2.))
                                    .to_cols_array()
                                    .map(|v| v as f64)
                                    .to_vec(),
                            )],
                            vec![],
                        ),
                    ],
                )],
            ),
        ],
    );
    let mut conns = ConnectionsGraph::default();
    conns.connect(2, 1, None);
    conns.connect(3, 2, None);
    for c in [4, 5, 6] {
        conns.connect(c, 3, None);
    }
    conns.connect(7, 4, None);
    conns.connect(8, 5, None);
    conns.connect(8, 7, None);
    (objects, conns)
}

#[test]
fn test_raw_pass() {
    let (objects, conns) = document();
    let index = index_objects(&objects);
    let raw = collect_raw(&objects, &index, &conns, true).unwrap();
    assert_eq!(raw.len(), 1);
    let rs = &raw[0];
    assert_eq!(rs.id, 3);
    assert_eq!(rs.raw_bones.len(), 3);
    assert_eq!(rs.raw_bones[0].model_id, Some(7));
    assert_eq!(rs.raw_bones[0].indices, [0, 1]);
    assert_eq!(rs.raw_bones[0].weights, [1., 0.5]);
    assert_eq!(rs.raw_bones[2].model_id, None);
    assert_eq!(rs.num_bound(), 0);
}

#[test]
fn test_mismatched_weights() {
    let objects = Record::new(
        "Objects",
        vec![],
        vec![
            object("Deformer", 3, "Skin", "Skin", vec![]),
            cluster(4, "Bad", vec![0, 1], vec![1.], None),
        ],
    );
    let index = index_objects(&objects);
    let mut conns = ConnectionsGraph::default();
    conns.connect(4, 3, None);
    assert!(matches!(
        collect_raw(&objects, &index, &conns, true),
        Err(ImportError::MalformedRecord { .. })
    ));
    let raw = collect_raw(&objects, &index, &conns, false).unwrap();
    assert!(raw[0].raw_bones.is_empty());
}

#[test]
fn test_bind_and_finalize() {
    let (objects, conns) = document();
    let index = index_objects(&objects);
    let mut raw = collect_raw(&objects, &index, &conns, true).unwrap();
    for m in objects.children_named("Model") {
        raw[0].bind(m);
    }
    // binding twice keeps the first bone
    assert!(raw[0].bind(index[&7]));
    assert_eq!(raw[0].num_bound(), 2);

    let mut scene = Scene::default();
    scene.nodes.push(Node {
        id: 1,
        name: "Body".into(),
        mesh: Some(MeshInstance::default()),
        ..Default::default()
    });
    let models = HashMap::from([(1, 0)]);
    let poses = parse_bind_poses(&objects);
    finalize(raw, &conns, &poses, &models, &mut scene);

    let sk = &scene.skeletons[0];
    assert_eq!(sk.bones.len(), 3);
    assert_eq!(sk.bones[0].name, "Body-Hips");
    assert_eq!(sk.bones[1].name, "Body-Spine");
    assert_eq!(sk.bones[1].parent, Some(0));
    assert_eq!(sk.bones[0].parent, None);
    // translation X is mirrored
    assert_eq!(sk.bones[0].local_matrix.w_axis.x, -1.);
    assert_eq!(sk.bones[0].rest_pose, sk.bones[0].local_matrix);
    assert_eq!(sk.bones[1].world_matrix.w_axis.x, -1.);
    // placeholder keeps its index and its bind transform
    assert_eq!(sk.bones[2].id, 6);
    assert_eq!(sk.bones[2].local_matrix.w_axis.y, 2.);
    assert_eq!(sk.bone_index(8), Some(1));

    assert!(sk.needs_initial_skin_matrix);
    let instance = scene.nodes[0].mesh.as_ref().unwrap();
    assert_eq!(instance.skeleton, Some(0));
    assert!(instance.pose_matrix.is_some());
}
