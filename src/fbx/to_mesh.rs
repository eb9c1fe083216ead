use super::record::Record;
use super::skeleton::RawSkeleton;
use crate::F;
use crate::error::{ImportError, Result};
use crate::mesh::{Mesh, SubMesh};
use crate::quat::{EulerOrder, compose_rotation, mirror_x_vec, radians};

use glam::{Mat4, Vec3};
use std::collections::{BTreeMap, HashMap};

/// Total weight under which a vertex counts as not influenced by any bone.
const WEIGHT_EPSILON: F = 1e-3;

/// Max bone influences kept per vertex.
const MAX_INFLUENCES: usize = 4;

/// How a layer's values are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefKind {
    #[default]
    Direct,
    IndexToDirect,
}

impl RefKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Direct" => Self::Direct,
            // older exporters spell it this way
            "IndexToDirect" | "Index" => Self::IndexToDirect,
            _ => return None,
        })
    }
}

/// Which element of the mesh a layer's values belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexMappingKind {
    /// One value per polygon corner.
    #[default]
    Wedge,
    /// One value per polygon.
    ByPolygon,
    /// 1-1 mapping with vertices
    ByVertices,
    /// A single value for the whole mesh.
    AllSame,
}

impl VertexMappingKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "ByPolygonVertex" => Self::Wedge,
            "ByPolygon" => Self::ByPolygon,
            "ByVertice" | "ByVertex" => Self::ByVertices,
            "AllSame" => Self::AllSame,
            _ => return None,
        })
    }
}

/// Values of one `LayerElement*` block together with its addressing rules.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VertexAttribute<const N: usize, T = F> {
    values: Vec<[T; N]>,
    indices: Vec<usize>,

    ref_kind: RefKind,
    map_kind: VertexMappingKind,
}

impl<T, const N: usize> VertexAttribute<N, T> {
    pub fn len(&self) -> usize {
        match self.ref_kind {
            RefKind::Direct => self.values.len(),
            RefKind::IndexToDirect => self.indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for polygon corner `wedge_idx` of polygon `poly_idx`, which references vertex `vi`.
    pub fn v(&self, wedge_idx: usize, poly_idx: usize, vi: usize) -> Option<[T; N]>
    where
        T: Copy,
    {
        let idx = match self.map_kind {
            VertexMappingKind::Wedge => wedge_idx,
            VertexMappingKind::ByPolygon => poly_idx,
            VertexMappingKind::ByVertices => vi,
            VertexMappingKind::AllSame => 0,
        };
        let idx = match self.ref_kind {
            RefKind::Direct => idx,
            RefKind::IndexToDirect => *self.indices.get(idx)?,
        };
        self.values.get(idx).copied()
    }
}

fn chunk<const N: usize, T: Copy + Default>(vals: &[T]) -> Vec<[T; N]> {
    vals.chunks_exact(N)
        .map(|c| {
            let mut out = [T::default(); N];
            out.copy_from_slice(c);
            out
        })
        .collect()
}

/// Reads the first `LayerElement<kind>` of a geometry.
/// An absent or unreadable layer yields `None`, an inconsistent one is an error.
fn parse_layer<const N: usize>(
    geom: &Record,
    layer_name: &str,
    values_name: &str,
    index_names: &[&str],
) -> Result<Option<VertexAttribute<N>>> {
    let Some(layer) = geom.child(layer_name) else {
        return Ok(None);
    };
    let mapping = layer.child_str("MappingInformationType").unwrap_or_default();
    let reference = layer.child_str("ReferenceInformationType").unwrap_or("Direct");
    let (Some(map_kind), Some(ref_kind)) = (
        VertexMappingKind::from_str(mapping),
        RefKind::from_str(reference),
    ) else {
        log::debug!("ignoring {layer_name} mapped {mapping:?} / {reference:?}");
        return Ok(None);
    };
    let Some(values) = layer.child_f64s(values_name) else {
        return Ok(None);
    };
    let malformed = |reason: String| ImportError::malformed(layer_name, reason);
    if values.len() % N != 0 {
        return Err(malformed(format!(
            "{values_name} holds {} values, not a multiple of {N}",
            values.len()
        )));
    }
    let values = values.into_iter().map(|v| v as F).collect::<Vec<_>>();

    let indices = match ref_kind {
        RefKind::Direct => vec![],
        RefKind::IndexToDirect => index_names
            .iter()
            .find_map(|n| layer.child_i64s(n))
            .ok_or_else(|| malformed(format!("IndexToDirect without {}", index_names[0])))?
            .into_iter()
            // unmapped corners are marked -1
            .map(|i| usize::try_from(i).unwrap_or(usize::MAX))
            .collect(),
    };

    Ok(Some(VertexAttribute {
        values: chunk(&values),
        indices,
        ref_kind,
        map_kind,
    }))
}

/// Material layer. Its `Materials` array holds the per element material index directly,
/// whatever reference type it declares.
fn parse_material_layer(geom: &Record) -> Option<VertexAttribute<1, usize>> {
    let layer = geom.child("LayerElementMaterial")?;
    let mapping = layer.child_str("MappingInformationType").unwrap_or_default();
    if mapping == "NoMappingInformation" {
        return Some(VertexAttribute {
            values: vec![[0]],
            map_kind: VertexMappingKind::AllSame,
            ..Default::default()
        });
    }
    let Some(map_kind) = VertexMappingKind::from_str(mapping) else {
        log::debug!("ignoring material layer mapped {mapping:?}");
        return None;
    };
    let values = layer
        .child_i64s("Materials")?
        .into_iter()
        .map(|m| [m.max(0) as usize])
        .collect();
    Some(VertexAttribute {
        values,
        indices: vec![],
        ref_kind: RefKind::Direct,
        map_kind,
    })
}

/// Keeps at most four influences. With more than four, the largest ones are selected by
/// insertion into a descending list. Missing slots are padded with zero weight on bone 0.
pub fn top_influences(influences: &[(usize, F)]) -> ([usize; 4], [F; 4]) {
    let mut idxs = [0; MAX_INFLUENCES];
    let mut weights = [0.; MAX_INFLUENCES];
    if influences.len() <= MAX_INFLUENCES {
        for (i, &(bone, w)) in influences.iter().enumerate() {
            idxs[i] = bone;
            weights[i] = w;
        }
        return (idxs, weights);
    }
    for &(bone, w) in influences {
        let (mut bone, mut w) = (bone, w);
        for j in 0..MAX_INFLUENCES {
            if w > weights[j] {
                std::mem::swap(&mut w, &mut weights[j]);
                std::mem::swap(&mut bone, &mut idxs[j]);
            }
        }
    }
    (idxs, weights)
}

/// Rescales the weights of one vertex to sum to 1. A vertex with (almost) no total weight is
/// bound fully to `no_influence`, a bone index past the skeleton's last bone.
pub fn normalize_weights(idxs: &mut [usize; 4], weights: &mut [F; 4], no_influence: usize) {
    let sum: F = weights.iter().sum();
    if sum > WEIGHT_EPSILON {
        weights.iter_mut().for_each(|w| *w /= sum);
        return;
    }
    let slot = weights
        .iter()
        .position(|&w| w < WEIGHT_EPSILON)
        .unwrap_or(MAX_INFLUENCES - 1);
    *weights = [0.; MAX_INFLUENCES];
    weights[slot] = 1.;
    idxs[slot] = no_influence;
}

/// Matrix of the model's `Geometric*` properties, which offset the geometry from the model
/// without affecting children. `None` when absent or identity.
pub fn geometric_transform(model: &Record) -> Option<Mat4> {
    let t = model.property_vec3("GeometricTranslation").map(mirror_x_vec);
    let r = model.property_vec3("GeometricRotation").map(radians);
    let s = model
        .property_vec3("GeometricScaling")
        .map(|[x, y, z]| Vec3::new(x as f32, y as f32, z as f32));
    let order = model
        .property_i64("RotationOrder")
        .map(EulerOrder::from_fbx)
        .unwrap_or_default();
    let m = Mat4::from_scale_rotation_translation(
        s.unwrap_or(Vec3::ONE),
        compose_rotation(None, r.unwrap_or(Vec3::ZERO), None, order),
        t.unwrap_or(Vec3::ZERO),
    );
    (m != Mat4::IDENTITY).then_some(m)
}

/// Output buffers of one material index.
#[derive(Debug, Default)]
struct Bucket {
    v: Vec<[F; 3]>,
    n: Vec<[F; 3]>,
    uv: Vec<[F; 2]>,
    joint_idxs: Vec<[usize; 4]>,
    joint_weights: Vec<[F; 4]>,
}

#[derive(Debug, Clone, Copy)]
struct Corner {
    v: [F; 3],
    n: Option<[F; 3]>,
    uv: Option<[F; 2]>,
    joints: Option<([usize; 4], [F; 4])>,
}

impl Bucket {
    fn push(&mut self, c: &Corner) {
        let [x, y, z] = c.v;
        self.v.push([-x, y, z]);
        if let Some([x, y, z]) = c.n {
            self.n.push([-x, y, z]);
        }
        if let Some(uv) = c.uv {
            self.uv.push(uv);
        }
        if let Some((idxs, weights)) = c.joints {
            self.joint_idxs.push(idxs);
            self.joint_weights.push(weights);
        }
    }

    /// Fan triangulation: `(0, i-1, i)` for every `i` in `2..len`.
    fn push_face(&mut self, face: &[Corner]) {
        for i in 2..face.len() {
            self.push(&face[0]);
            self.push(&face[i - 1]);
            self.push(&face[i]);
        }
    }
}

/// Reconstructs a triangulated mesh from a `Geometry` record.
/// `skeleton` supplies skin weights, `model` the owning model's geometric offset.
pub fn import_geometry(
    geom: &Record,
    skeleton: Option<&RawSkeleton>,
    model: Option<&Record>,
) -> Result<Mesh> {
    let name = geom.object_name().to_string();
    let malformed = |reason: &str| ImportError::malformed(geom.prop_str(1).unwrap_or("Geometry"), reason);

    let positions = geom
        .child_f64s("Vertices")
        .ok_or_else(|| malformed("missing Vertices"))?;
    if positions.len() % 3 != 0 {
        return Err(malformed("Vertices is not a list of 3d points"));
    }
    let positions = chunk::<3, F>(&positions.into_iter().map(|v| v as F).collect::<Vec<_>>());
    let indices = geom
        .child_i64s("PolygonVertexIndex")
        .ok_or_else(|| malformed("missing PolygonVertexIndex"))?;

    let normals = parse_layer::<3>(geom, "LayerElementNormal", "Normals", &["NormalsIndex", "NormalIndex"])?;
    let uvs = parse_layer::<2>(geom, "LayerElementUV", "UV", &["UVIndex"])?;
    let materials = parse_material_layer(geom);

    // vertex -> (bone, weight)
    let mut weight_table: HashMap<usize, Vec<(usize, F)>> = HashMap::new();
    if let Some(sk) = skeleton {
        for (bone, rb) in sk.raw_bones.iter().enumerate() {
            for (&vi, &w) in rb.indices.iter().zip(&rb.weights) {
                weight_table.entry(vi).or_default().push((bone, w));
            }
        }
    }

    let mut buckets: BTreeMap<usize, Bucket> = BTreeMap::new();
    let mut face = vec![];
    let mut poly_idx = 0;
    let mut material = 0;
    for (wedge, &raw) in indices.iter().enumerate() {
        // the last corner of each polygon is stored as its bitwise complement
        let (vi, end_of_face) = if raw < 0 { (raw ^ -1, true) } else { (raw, false) };
        let vi = vi as usize;
        let Some(&v) = positions.get(vi) else {
            return Err(malformed(&format!(
                "vertex index {vi} out of range of {} positions",
                positions.len()
            )));
        };

        if let Some(m) = &materials {
            material = m.v(wedge, poly_idx, vi).map_or(0, |[m]| m);
        }
        let joints = skeleton.map(|_| {
            top_influences(weight_table.get(&vi).map_or(&[][..], Vec::as_slice))
        });
        face.push(Corner {
            v,
            n: normals
                .as_ref()
                .map(|a| a.v(wedge, poly_idx, vi).unwrap_or_default()),
            uv: uvs.as_ref().map(|a| a.v(wedge, poly_idx, vi).unwrap_or_default()),
            joints,
        });

        if end_of_face {
            buckets.entry(material).or_default().push_face(&face);
            face.clear();
            poly_idx += 1;
        }
    }
    if !face.is_empty() {
        log::debug!("{name}: dropping unterminated polygon of {} corners", face.len());
    }

    let mut mesh = Mesh {
        id: geom.id().unwrap_or_default(),
        name,
        ..Default::default()
    };
    let no_influence = skeleton.map_or(0, |sk| sk.raw_bones.len());
    if no_influence > u16::MAX as usize {
        return Err(malformed("too many bones for 16 bit joint indices"));
    }
    for (material_index, b) in buckets {
        let vertex_start = mesh.v.len();
        let index_start = mesh.indices.len();
        let count = b.v.len();
        mesh.indices
            .extend((vertex_start..vertex_start + count).map(|i| i as u32));
        mesh.v.extend(b.v);
        mesh.n.extend(b.n);
        mesh.uv.extend(b.uv);
        mesh.material_indices
            .extend(std::iter::repeat_n(material_index, count));
        for (mut idxs, mut weights) in b.joint_idxs.into_iter().zip(b.joint_weights) {
            normalize_weights(&mut idxs, &mut weights, no_influence);
            mesh.joint_idxs.push(idxs.map(|i| i as u16));
            mesh.joint_weights.push(weights);
        }
        mesh.submeshes.push(SubMesh {
            material_index,
            vertex_start,
            vertex_count: count,
            index_start,
            index_count: count,
        });
    }

    if let Some(m) = model.and_then(geometric_transform) {
        mesh.transform(m);
    }
    Ok(mesh)
}

#[cfg(test)]
use crate::fbx::record::Data;
#[cfg(test)]
use crate::fbx::skeleton::RawBone;
#[cfg(test)]
use approx::assert_relative_eq;

#[cfg(test)]
fn geometry(vertices: &[f64], polys: &[i32], layers: Vec<Record>) -> Record {
    let mut children = vec![
        Record::new("Vertices", vec![Data::F64Arr(vertices.to_vec())], vec![]),
        Record::new("PolygonVertexIndex", vec![Data::I32Arr(polys.to_vec())], vec![]),
    ];
    children.extend(layers);
    Record::new(
        "Geometry",
        vec![Data::I64(1), Data::str("Geometry::G"), Data::str("Mesh")],
        children,
    )
}

#[cfg(test)]
fn layer(name: &str, mapping: &str, reference: &str, vals: Vec<Record>) -> Record {
    let mut children = vec![
        Record::new("MappingInformationType", vec![Data::str(mapping)], vec![]),
        Record::new("ReferenceInformationType", vec![Data::str(reference)], vec![]),
    ];
    children.extend(vals);
    Record::new(name, vec![Data::I32(0)], children)
}

#[cfg(test)]
fn arr(name: &str, d: Data) -> Record {
    Record::new(name, vec![d], vec![])
}

#[cfg(test)]
const SIX: [f64; 18] = [
    1., 0., 0., //
    2., 0., 0., //
    3., 1., 0., //
    4., 1., 1., //
    5., 0., 1., //
    6., 2., 2., //
];

#[test]
fn test_two_triangles() {
    let g = geometry(&SIX, &[0, 1, 3 ^ -1, 2, 3, 5 ^ -1], vec![]);
    let m = import_geometry(&g, None, None).unwrap();
    assert_eq!(m.num_tris(), 2);
    assert_eq!(m.v.len(), 6);
    assert_eq!(m.indices, [0, 1, 2, 3, 4, 5]);
    assert_eq!(m.v[0], [-1., 0., 0.]);
    assert_eq!(m.v[2], [-4., 1., 1.]);
    assert_eq!(m.v[5], [-6., 2., 2.]);
    assert!(m.n.is_empty() && m.uv.is_empty() && !m.is_skinned());
    assert_eq!(m.submeshes.len(), 1);
}

#[test]
fn test_fan_triangulation() {
    // one pentagon
    let g = geometry(&SIX, &[0, 1, 2, 3, 4 ^ -1], vec![]);
    let m = import_geometry(&g, None, None).unwrap();
    assert_eq!(m.num_tris(), 3);
    assert_eq!(m.v.len(), 3 * m.num_tris());
    // every triangle starts with the first corner
    for t in m.v.chunks(3) {
        assert_eq!(t[0], [-1., 0., 0.]);
    }
    assert_eq!(m.v[7], [-4., 1., 1.]);
}

#[test]
fn test_layers_and_material_buckets() {
    let normals = layer(
        "LayerElementNormal",
        "ByPolygon",
        "Direct",
        vec![arr("Normals", Data::F64Arr(vec![1., 0., 0., 0., 1., 0.]))],
    );
    let uvs = layer(
        "LayerElementUV",
        "ByPolygonVertex",
        "IndexToDirect",
        vec![
            arr("UV", Data::F64Arr(vec![0., 0., 1., 1.])),
            arr("UVIndex", Data::I32Arr(vec![0, 1, 0, 1, 0, 1])),
        ],
    );
    let mats = layer(
        "LayerElementMaterial",
        "ByPolygon",
        "IndexToDirect",
        vec![arr("Materials", Data::I32Arr(vec![1, 0]))],
    );
    let g = geometry(&SIX, &[0, 1, 3 ^ -1, 2, 3, 5 ^ -1], vec![normals, uvs, mats]);
    let m = import_geometry(&g, None, None).unwrap();

    // material 0 (second polygon) comes first
    assert_eq!(m.submeshes.len(), 2);
    assert_eq!(m.submeshes[0].material_index, 0);
    assert_eq!(m.submeshes[1].material_index, 1);
    assert_eq!(m.submeshes[1].index_start, 3);
    assert_eq!(m.material_indices, [0, 0, 0, 1, 1, 1]);
    assert_eq!(m.indices, [0, 1, 2, 3, 4, 5]);
    assert_eq!(m.v[0], [-3., 1., 0.]);

    assert_eq!(m.n.len(), m.v.len());
    assert_eq!(m.n[0], [-0., 1., 0.]);
    assert_eq!(m.n[3], [-1., 0., 0.]);
    // second polygon covers corners 3, 4, 5
    assert_eq!(m.uv[0], [1., 1.]);
    assert_eq!(m.uv[1], [0., 0.]);
    assert_eq!(m.uv[3], [0., 0.]);
}

#[test]
fn test_normals_index_alias() {
    let normals = layer(
        "LayerElementNormal",
        "ByVertice",
        "IndexToDirect",
        vec![
            arr("Normals", Data::F64Arr(vec![0., 0., 1.])),
            arr("NormalIndex", Data::I32Arr(vec![0; 6])),
        ],
    );
    let g = geometry(&SIX, &[0, 1, 3 ^ -1], vec![normals]);
    let m = import_geometry(&g, None, None).unwrap();
    assert_eq!(m.n, [[-0., 0., 1.]; 3]);
}

#[test]
fn test_no_mapping_information_material() {
    let mats = Record::new(
        "LayerElementMaterial",
        vec![],
        vec![arr("MappingInformationType", Data::str("NoMappingInformation"))],
    );
    let g = geometry(&SIX, &[0, 1, 3 ^ -1], vec![mats]);
    let m = import_geometry(&g, None, None).unwrap();
    assert_eq!(m.submeshes.len(), 1);
    assert_eq!(m.submeshes[0].material_index, 0);
}

#[test]
fn test_missing_required_children() {
    let g = Record::new(
        "Geometry",
        vec![Data::I64(1), Data::str("Geometry::G"), Data::str("Mesh")],
        vec![arr("PolygonVertexIndex", Data::I32Arr(vec![0, 1, -3]))],
    );
    assert!(matches!(
        import_geometry(&g, None, None),
        Err(ImportError::MalformedRecord { .. })
    ));
    let g = geometry(&SIX, &[0, 1, 9 ^ -1], vec![]);
    assert!(import_geometry(&g, None, None).is_err());
}

#[test]
fn test_padding_and_normalization() {
    let (mut idxs, mut weights) = top_influences(&[(2, 0.9)]);
    assert_eq!(idxs, [2, 0, 0, 0]);
    assert_eq!(weights, [0.9, 0., 0., 0.]);
    normalize_weights(&mut idxs, &mut weights, 5);
    assert_eq!(idxs, [2, 0, 0, 0]);
    assert_relative_eq!(weights[0], 1.);
    assert_eq!(&weights[1..], [0.; 3]);
}

#[test]
fn test_near_zero_weight() {
    let mut idxs = [3, 0, 0, 0];
    let mut weights = [1e-4, 0., 0., 0.];
    normalize_weights(&mut idxs, &mut weights, 7);
    assert_eq!(weights, [1., 0., 0., 0.]);
    assert_eq!(idxs, [7, 0, 0, 0]);
}

#[test]
fn test_keeps_largest_four() {
    let inf = [(0, 0.1), (1, 0.4), (2, 0.05), (3, 0.2), (4, 0.25)];
    let (idxs, weights) = top_influences(&inf);
    assert_eq!(idxs, [1, 4, 3, 0]);
    assert_eq!(weights, [0.4, 0.25, 0.2, 0.1]);
}

#[test]
fn test_skinned_weights_sum_to_one() {
    let bone = |id, indices: Vec<usize>, weights: Vec<F>| RawBone {
        id,
        indices,
        weights,
        ..Default::default()
    };
    let sk = RawSkeleton::new(
        10,
        "Skin",
        vec![
            bone(11, vec![0, 1, 3], vec![0.5, 0.3, 0.]),
            bone(12, vec![0, 1], vec![0.5, 0.3]),
        ],
    );
    let g = geometry(&SIX, &[0, 1, 3 ^ -1], vec![]);
    let m = import_geometry(&g, Some(&sk), None).unwrap();
    assert_eq!(m.joint_idxs.len(), m.v.len());
    assert_eq!(m.joint_idxs[0], [0, 1, 0, 0]);
    // vertex 3 has only a zero weight: bound to the no-influence bone
    assert_eq!(m.joint_idxs[2], [2, 0, 0, 0]);
    for w in &m.joint_weights {
        assert_relative_eq!(w.iter().sum::<F>(), 1., epsilon = 1e-4);
    }
    assert_relative_eq!(m.joint_weights[1][0], 0.5);
}

#[test]
fn test_geometric_translation_is_baked() {
    let model = Record::new(
        "Model",
        vec![Data::I64(2), Data::str("Model::M"), Data::str("Mesh")],
        vec![Record::new(
            "Properties70",
            vec![],
            vec![Record::new(
                "P",
                vec![
                    Data::str("GeometricTranslation"),
                    Data::str("Vector3D"),
                    Data::str("Vector"),
                    Data::str(""),
                    Data::F64(1.),
                    Data::F64(0.),
                    Data::F64(0.),
                ],
                vec![],
            )],
        )],
    );
    let g = geometry(&SIX, &[0, 1, 3 ^ -1], vec![]);
    let m = import_geometry(&g, None, Some(&model)).unwrap();
    assert_eq!(m.v[0], [-2., 0., 0.]);

    let plain = Record::new("Model", vec![Data::I64(3)], vec![]);
    assert_eq!(geometric_transform(&plain), None);
}
