use super::connections::ConnectionsGraph;
use super::record::Record;
use super::transform::TransformProperties;
use super::{ObjectId, Objects, TICKS_PER_SECOND};
use crate::F;
use crate::anim::{Animation, OutputProperty, Target};
use crate::error::{ImportError, Result};
use crate::mesh::{Scene, Transform};
use crate::quat::{compose_rotation, decompose_rotation};

use glam::Vec3;
use std::collections::HashMap;

/// Keys of one scalar channel. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimationCurve {
    pub id: ObjectId,
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

/// Groups the per-axis curves animating one attribute (`T`, `R`, `S` or `DeformPercent`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurveNode {
    pub id: ObjectId,
    pub attr: String,
    pub x: Option<AnimationCurve>,
    pub y: Option<AnimationCurve>,
    pub z: Option<AnimationCurve>,
    pub morph: Option<AnimationCurve>,
}

impl CurveNode {
    fn axes(&self) -> [Option<&AnimationCurve>; 3] {
        [self.x.as_ref(), self.y.as_ref(), self.z.as_ref()]
    }

    pub fn has_axes(&self) -> bool {
        self.axes().iter().any(Option::is_some)
    }
}

pub fn parse_curve(curve: &Record) -> Result<AnimationCurve> {
    let name = curve.prop_str(1).unwrap_or("AnimationCurve");
    let id = curve
        .id()
        .ok_or_else(|| ImportError::malformed(name, "curve without id"))?;
    let times = curve
        .child_i64s("KeyTime")
        .ok_or_else(|| ImportError::malformed(name, "missing KeyTime"))?;
    let values = curve
        .child_f64s("KeyValueFloat")
        .ok_or_else(|| ImportError::malformed(name, "missing KeyValueFloat"))?;
    if times.len() != values.len() {
        return Err(ImportError::malformed(
            name,
            format!("{} key times but {} values", times.len(), values.len()),
        ));
    }
    Ok(AnimationCurve {
        id,
        times: times.into_iter().map(|t| t as f64 / TICKS_PER_SECOND).collect(),
        values,
    })
}

/// Builds every `AnimationCurveNode` and files each `AnimationCurve` under it by the axis its
/// connection names (`d|X`, `d|Y`, `d|Z`, `d|DeformPercent`).
pub fn collect_curve_nodes(
    objects: &Record,
    conns: &ConnectionsGraph,
    strict: bool,
) -> Result<HashMap<ObjectId, CurveNode>> {
    let mut nodes = HashMap::new();
    for cn in objects.children_named("AnimationCurveNode") {
        let Some(id) = cn.id() else { continue };
        let attr = cn.object_name();
        if !matches!(attr, "T" | "R" | "S" | "DeformPercent") {
            log::debug!("ignoring curve node animating `{attr}`");
            continue;
        }
        nodes.insert(
            id,
            CurveNode {
                id,
                attr: attr.to_string(),
                ..Default::default()
            },
        );
    }

    for c in objects.children_named("AnimationCurve") {
        let curve = match parse_curve(c) {
            Ok(curve) => curve,
            Err(e) if strict => return Err(e),
            Err(e) => {
                log::warn!("skipping curve: {e}");
                continue;
            }
        };
        let Some((parent, label)) = conns
            .parents(curve.id)
            .iter()
            .find_map(|l| Some((l.id, l.relationship.as_deref()?)))
        else {
            continue;
        };
        let Some(node) = nodes.get_mut(&parent) else {
            continue;
        };
        let axis = label.strip_prefix("d|").unwrap_or(label);
        let slot = match axis {
            "X" => &mut node.x,
            "Y" => &mut node.y,
            "Z" => &mut node.z,
            "DeformPercent" => &mut node.morph,
            _ => {
                log::debug!("ignoring curve bound to `{label}`");
                continue;
            }
        };
        *slot = Some(curve);
    }
    Ok(nodes)
}

/// Most keys inserted into a single segment; wider segments are left as they are.
const MAX_UNWRAP_STEPS: f64 = 1024.;

/// Inserts evenly spaced keys wherever consecutive values (degrees) differ by more than 180,
/// so no interpolated segment spans more than half a turn.
/// Segments with non finite ends, or wider than [`MAX_UNWRAP_STEPS`] half turns, are kept.
pub fn unwrap_rotation(times: &mut Vec<f64>, values: &mut Vec<f64>) {
    let mut i = 1;
    while i < values.len().min(times.len()) {
        let (t0, v0) = (times[i - 1], values[i - 1]);
        let span = values[i] - v0;
        let steps = (span.abs() / 180.).ceil();
        if !(span.is_finite() && t0.is_finite() && times[i].is_finite()) {
            log::debug!("Not unwrapping rotation key {i} with non finite time or value");
        } else if steps > MAX_UNWRAP_STEPS {
            log::debug!("Not unwrapping rotation key {i} spanning {span} degrees");
        } else if steps > 1. {
            let n = steps as usize;
            let dt = (times[i] - t0) / steps;
            let dv = span / steps;
            times.splice(i..i, (1..n).map(|k| t0 + dt * k as f64));
            values.splice(i..i, (1..n).map(|k| v0 + dv * k as f64));
            i += n - 1;
        }
        i += 1;
    }
}

/// Sorted, de-duplicated union of the key times of all present axes.
pub fn union_times(axes: [Option<&AnimationCurve>; 3]) -> Vec<f64> {
    let mut times = axes
        .iter()
        .flatten()
        .flat_map(|c| c.times.iter().copied())
        .collect::<Vec<_>>();
    times.sort_by(f64::total_cmp);
    times.dedup();
    times
}

/// Samples all three axes at `times`. An axis without a key at a time holds its last value,
/// starting from `initial`.
pub fn sample_held(times: &[f64], axes: [Option<&AnimationCurve>; 3], initial: [f64; 3]) -> Vec<[f64; 3]> {
    let mut prev = initial;
    times
        .iter()
        .map(|&t| {
            for (axis, curve) in axes.iter().enumerate() {
                let Some(c) = curve else { continue };
                if let Some(k) = c.times.iter().position(|&ct| ct == t) {
                    prev[axis] = c.values[k];
                }
            }
            prev
        })
        .collect()
}

/// The curve nodes of one stack that animate the same model.
#[derive(Debug, Default)]
struct LayerCurve<'a> {
    model_id: ObjectId,
    t: Option<&'a CurveNode>,
    r: Option<&'a CurveNode>,
    s: Option<&'a CurveNode>,
}

/// Things an animated model id resolves to, with the local transform each starts from.
fn targets(model_id: ObjectId, scene: &Scene, models: &HashMap<ObjectId, usize>) -> Vec<(Target, Transform)> {
    if let Some(&n) = models.get(&model_id) {
        return vec![(Target::Node(n), scene.nodes[n].transform)];
    }
    // the same bone model may drive several skins
    let mut out = vec![];
    for (si, sk) in scene.skeletons.iter().enumerate() {
        for (bi, b) in sk.bones.iter().enumerate() {
            if b.id == model_id {
                out.push((Target::Bone { skeleton: si, bone: bi }, Transform::from_mat(b.rest_pose)));
            }
        }
    }
    out
}

fn to_f<const N: usize>(v: [f64; N]) -> [F; N] {
    v.map(|v| v as F)
}

fn add_tracks(
    anim: &mut Animation,
    lc: &LayerCurve,
    model: &Record,
    targets: &[(Target, Transform)],
) {
    let props = TransformProperties::parse(model);
    let order = props.euler_order;
    for &(target, initial) in targets {
        let times_f = |times: &[f64]| times.iter().map(|&t| t as F).collect::<Vec<_>>();

        if let Some(t) = lc.t.filter(|n| n.has_axes()) {
            let times = union_times(t.axes());
            let init = initial.translation.as_dvec3().to_array();
            // keys are mirrored after sampling, so the held value starts unmirrored
            let init = [-init[0], init[1], init[2]];
            let vals = sample_held(&times, t.axes(), init)
                .into_iter()
                .map(|[x, y, z]| to_f([-x, y, z]))
                .collect();
            anim.add_track(target, times_f(&times), OutputProperty::Translation(vals));
        }

        if let Some(r) = lc.r.filter(|n| n.has_axes()) {
            let unwrapped = r.axes().map(|c| {
                c.map(|c| {
                    let mut c = c.clone();
                    unwrap_rotation(&mut c.times, &mut c.values);
                    c.values.iter_mut().for_each(|v| *v = v.to_radians());
                    c
                })
            });
            let axes = [unwrapped[0].as_ref(), unwrapped[1].as_ref(), unwrapped[2].as_ref()];
            let times = union_times(axes);
            let init = decompose_rotation(initial.rotation, props.pre_rotation, props.post_rotation, order)
                .as_dvec3()
                .to_array();
            let vals = sample_held(&times, axes, init)
                .into_iter()
                .map(|e| {
                    let e = Vec3::new(e[0] as f32, e[1] as f32, e[2] as f32);
                    compose_rotation(props.pre_rotation, e, props.post_rotation, order).to_array()
                })
                .collect();
            anim.add_track(target, times_f(&times), OutputProperty::Rotation(vals));
        }

        if let Some(s) = lc.s.filter(|n| n.has_axes()) {
            let times = union_times(s.axes());
            let init = initial.scale.as_dvec3().to_array();
            let vals = sample_held(&times, s.axes(), init).into_iter().map(to_f).collect();
            anim.add_track(target, times_f(&times), OutputProperty::Scale(vals));
        }
    }
}

/// Reconstructs one clip per `AnimationStack`, in declaration order. Every layer of a stack
/// contributes; a stack whose targets cannot be resolved still yields an empty clip.
pub fn import_animations(
    objects: &Record,
    index: &Objects,
    conns: &ConnectionsGraph,
    scene: &Scene,
    models: &HashMap<ObjectId, usize>,
    strict: bool,
) -> Result<Vec<Animation>> {
    let curve_nodes = collect_curve_nodes(objects, conns, strict)?;
    let mut out = vec![];
    for stack in objects.children_named("AnimationStack") {
        let Some(stack_id) = stack.id() else { continue };
        let mut anim = Animation {
            name: stack.object_name().to_string(),
            ..Default::default()
        };

        let mut layer_curves: Vec<LayerCurve> = vec![];
        let layers = conns
            .children(stack_id)
            .iter()
            .filter(|l| index.get(&l.id).is_some_and(|r| r.name == "AnimationLayer"));
        for layer in layers {
            for link in conns.children(layer.id) {
                let Some(cn) = curve_nodes.get(&link.id) else {
                    continue;
                };
                if !cn.has_axes() {
                    continue;
                }
                // curve node -> model through a labeled (`Lcl Translation`, ...) connection
                let Some(model_id) = conns
                    .parents(cn.id)
                    .iter()
                    .filter(|l| l.relationship.is_some())
                    .map(|l| l.id)
                    .find(|id| index.get(id).is_some_and(|r| r.name == "Model"))
                else {
                    continue;
                };
                let lc = match layer_curves.iter().position(|lc| lc.model_id == model_id) {
                    Some(i) => &mut layer_curves[i],
                    None => {
                        layer_curves.push(LayerCurve {
                            model_id,
                            ..Default::default()
                        });
                        let last = layer_curves.len() - 1;
                        &mut layer_curves[last]
                    }
                };
                let slot = match cn.attr.as_str() {
                    "T" => &mut lc.t,
                    "R" => &mut lc.r,
                    "S" => &mut lc.s,
                    _ => {
                        log::debug!("skipping morph curves of model {model_id}");
                        continue;
                    }
                };
                if slot.is_some() {
                    log::debug!("model {model_id} animated by several `{}` curve nodes", cn.attr);
                    continue;
                }
                *slot = Some(cn);
            }
        }

        for lc in &layer_curves {
            let found = targets(lc.model_id, scene, models);
            if found.is_empty() {
                log::warn!("animation `{}` targets unknown model {}", anim.name, lc.model_id);
                continue;
            }
            let Some(model) = index.get(&lc.model_id) else {
                continue;
            };
            add_tracks(&mut anim, lc, model, &found);
        }
        out.push(anim);
    }
    Ok(out)
}

#[cfg(test)]
use crate::anim::Property;
#[cfg(test)]
use crate::fbx::index_objects;
#[cfg(test)]
use crate::fbx::record::Data;
#[cfg(test)]
use crate::mesh::Node;
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use glam::Quat;

#[cfg(test)]
fn curve(times: &[f64], values: &[f64]) -> AnimationCurve {
    AnimationCurve {
        id: 0,
        times: times.to_vec(),
        values: values.to_vec(),
    }
}

#[test]
fn test_wraparound_inserts_key() {
    let mut c = curve(&[0., 1.], &[170., -170.]);
    unwrap_rotation(&mut c.times, &mut c.values);
    assert_eq!(c.times.len(), 3);
    assert!(c.times[1] > 0. && c.times[1] < 1.);
    assert_eq!(c.times, [0., 0.5, 1.]);
    assert_eq!(c.values, [170., 0., -170.]);
}

#[test]
fn test_no_segment_spans_half_turn() {
    let mut c = curve(&[0., 1., 2., 3., 4.], &[0., 720., 700., -400., -400.]);
    unwrap_rotation(&mut c.times, &mut c.values);
    assert_eq!(c.times.len(), c.values.len());
    for w in c.values.windows(2) {
        assert!((w[1] - w[0]).abs() <= 180., "{:?}", c.values);
    }
    for w in c.times.windows(2) {
        assert!(w[1] > w[0]);
    }
    // small steps are left alone
    let mut c = curve(&[0., 1.], &[10., 20.]);
    unwrap_rotation(&mut c.times, &mut c.values);
    assert_eq!(c.values, [10., 20.]);
}

#[test]
fn test_unwrap_degenerate_values() {
    let mut c = curve(&[0., 1., 2.], &[0., f64::INFINITY, f64::NAN]);
    unwrap_rotation(&mut c.times, &mut c.values);
    assert_eq!(c.times, [0., 1., 2.]);

    let mut c = curve(&[0., 1.], &[0., 1e12]);
    unwrap_rotation(&mut c.times, &mut c.values);
    assert_eq!(c.times, [0., 1.]);

    // spans below the step limit are still split
    let mut c = curve(&[0., 1.], &[0., 1800.]);
    unwrap_rotation(&mut c.times, &mut c.values);
    assert_eq!(c.values.len(), 11);
    assert!(c.values.windows(2).all(|w| (w[1] - w[0]).abs() <= 180.));
}

#[test]
fn test_union_and_hold() {
    let x = curve(&[0., 2.], &[1., 3.]);
    let z = curve(&[1., 2.], &[5., 6.]);
    let axes = [Some(&x), None, Some(&z)];
    let times = union_times(axes);
    assert_eq!(times, [0., 1., 2.]);
    let vals = sample_held(&times, axes, [9., 8., 7.]);
    assert_eq!(vals, [[1., 8., 7.], [1., 8., 5.], [3., 8., 6.]]);
}

#[cfg(test)]
fn object(kind: &str, id: i64, name: &str, children: Vec<Record>) -> Record {
    Record::new(
        kind,
        vec![Data::I64(id), Data::String(format!("{kind}::{name}")), Data::str("")],
        children,
    )
}

#[cfg(test)]
fn anim_curve(id: i64, seconds: &[f64], values: &[f32]) -> Record {
    let ticks = seconds
        .iter()
        .map(|s| (s * TICKS_PER_SECOND) as i64)
        .collect();
    object(
        "AnimationCurve",
        id,
        "",
        vec![
            Record::new("KeyTime", vec![Data::I64Arr(ticks)], vec![]),
            Record::new("KeyValueFloat", vec![Data::F32Arr(values.to_vec())], vec![]),
        ],
    )
}

#[cfg(test)]
fn op(conns: &mut ConnectionsGraph, child: i64, parent: i64, label: &str) {
    conns.connect(child, parent, Some(label.to_string()));
}

/// Stack 1 -> layer 2 -> curve nodes T (3) and R (4) on model 10.
/// Stack 5 has a layer 6 whose curve node 7 drives the missing model 99.
#[cfg(test)]
fn document() -> (Record, ConnectionsGraph) {
    let objects = Record::new(
        "Objects",
        vec![],
        vec![
            object("Model", 10, "Cube", vec![]),
            object("AnimationStack", 1, "Take 001", vec![]),
            object("AnimationLayer", 2, "BaseLayer", vec![]),
            object("AnimationCurveNode", 3, "T", vec![]),
            object("AnimationCurveNode", 4, "R", vec![]),
            anim_curve(20, &[0., 1.], &[1., 2.]),
            anim_curve(21, &[0.5], &[4.]),
            anim_curve(22, &[0., 1.], &[170., -170.]),
            object("AnimationStack", 5, "Broken", vec![]),
            object("AnimationLayer", 6, "BaseLayer", vec![]),
            object("AnimationCurveNode", 7, "S", vec![]),
            anim_curve(23, &[0.], &[2.]),
        ],
    );
    let mut conns = ConnectionsGraph::default();
    conns.connect(2, 1, None);
    conns.connect(3, 2, None);
    conns.connect(4, 2, None);
    op(&mut conns, 3, 10, "Lcl Translation");
    op(&mut conns, 4, 10, "Lcl Rotation");
    op(&mut conns, 20, 3, "d|X");
    op(&mut conns, 21, 3, "d|Y");
    op(&mut conns, 22, 4, "d|Z");
    conns.connect(6, 5, None);
    conns.connect(7, 6, None);
    op(&mut conns, 7, 99, "Lcl Scaling");
    op(&mut conns, 23, 7, "d|X");
    (objects, conns)
}

#[test]
fn test_import_clip() {
    let (objects, conns) = document();
    let index = index_objects(&objects);
    let mut scene = Scene::default();
    scene.nodes.push(Node {
        id: 10,
        name: "Cube".into(),
        ..Default::default()
    });
    let models = HashMap::from([(10, 0)]);
    let anims = import_animations(&objects, &index, &conns, &scene, &models, true).unwrap();

    assert_eq!(anims.len(), 2);
    let clip = &anims[0];
    assert_eq!(clip.name, "Take 001");
    assert_eq!(clip.channels.len(), 2);

    let t = clip.sampler_for(Target::Node(0), Property::Translation).unwrap();
    assert_eq!(t.input.len(), 3);
    let OutputProperty::Translation(pos) = &t.output else {
        panic!("{:?}", t.output);
    };
    assert_relative_eq!(pos[0][0], -1.);
    // y holds the initial value until its key at 0.5s
    assert_eq!(pos[0][1], 0.);
    assert_eq!(pos[1][1], 4.);
    assert_eq!(pos[2], [-2., 4., 0.]);

    let r = clip.sampler_for(Target::Node(0), Property::Rotation).unwrap();
    assert_eq!(r.input.len(), 3);
    let OutputProperty::Rotation(rot) = &r.output else {
        panic!("{:?}", r.output);
    };
    let mid = Quat::from_array(rot[1]);
    assert!(mid.abs_diff_eq(Quat::IDENTITY, 1e-5), "{mid:?}");
    assert_relative_eq!(clip.duration(), 1.);

    // unresolved targets leave the clip empty but present
    assert_eq!(anims[1].name, "Broken");
    assert!(anims[1].channels.is_empty());
}

#[test]
fn test_bad_curve() {
    let objects = Record::new(
        "Objects",
        vec![],
        vec![object(
            "AnimationCurve",
            1,
            "",
            vec![Record::new("KeyTime", vec![Data::I64Arr(vec![0, 1])], vec![])],
        )],
    );
    let conns = ConnectionsGraph::default();
    assert!(collect_curve_nodes(&objects, &conns, true).is_err());
    assert!(collect_curve_nodes(&objects, &conns, false).unwrap().is_empty());
}
