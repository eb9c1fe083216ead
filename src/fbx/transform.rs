//! Per-model transform properties and their composition into a local transform.

use super::record::Record;
use crate::mesh::{InheritType, Transform};
use crate::quat::{EulerOrder, compose_rotation, mirror_x_vec, radians};
use glam::Vec3;

/// Authored transform of a model, read from its `Properties70`.
/// Rotations are in radians, translation is already mirrored into output space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransformProperties {
    pub euler_order: EulerOrder,
    pub inherit_type: Option<InheritType>,
    pub scaling: Option<Vec3>,
    pub pre_rotation: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub post_rotation: Option<Vec3>,
    pub translation: Option<Vec3>,
}

impl TransformProperties {
    pub fn parse(model: &Record) -> Self {
        let vec3 = |name| model.property_vec3(name);
        Self {
            euler_order: model
                .property_i64("RotationOrder")
                .map(EulerOrder::from_fbx)
                .unwrap_or_default(),
            inherit_type: model.property_i64("InheritType").map(InheritType::from_fbx),
            scaling: vec3("Lcl Scaling").map(|[x, y, z]| Vec3::new(x as f32, y as f32, z as f32)),
            pre_rotation: vec3("PreRotation").map(radians),
            rotation: vec3("Lcl Rotation").map(radians),
            post_rotation: vec3("PostRotation").map(radians),
            translation: vec3("Lcl Translation").map(mirror_x_vec),
        }
    }

    /// Final local transform: `pre * rotation * post^-1`, missing parts default to identity.
    pub fn to_transform(&self) -> Transform {
        Transform {
            translation: self.translation.unwrap_or(Vec3::ZERO),
            rotation: compose_rotation(
                self.pre_rotation,
                self.rotation.unwrap_or(Vec3::ZERO),
                self.post_rotation,
                self.euler_order,
            ),
            scale: self.scaling.unwrap_or(Vec3::ONE),
        }
    }
}

/// Something that carries transient transform properties until they are applied.
pub trait PendingTransform {
    fn pending(&mut self) -> &mut Option<TransformProperties>;
    fn set_transform(&mut self, t: Transform, inherit_type: Option<InheritType>);

    /// Applies and discards the pending properties.
    /// Returns false, and leaves the node alone, if they were already applied.
    fn apply_transform(&mut self) -> bool {
        let Some(props) = self.pending().take() else {
            return false;
        };
        self.set_transform(props.to_transform(), props.inherit_type);
        true
    }
}

#[cfg(test)]
use crate::fbx::record::Data;
#[cfg(test)]
use glam::Quat;

#[cfg(test)]
fn p(name: &str, vals: &[f64]) -> Record {
    let mut props = vec![
        Data::str(name),
        Data::str(name),
        Data::str(""),
        Data::str("A"),
    ];
    props.extend(vals.iter().map(|&v| Data::F64(v)));
    Record::new("P", props, vec![])
}

#[cfg(test)]
fn model(props: Vec<Record>) -> Record {
    Record::new(
        "Model",
        vec![Data::I64(1), Data::str("Model::M"), Data::str("Null")],
        vec![Record::new("Properties70", vec![], props)],
    )
}

#[cfg(test)]
#[derive(Default)]
struct Dummy {
    pending: Option<TransformProperties>,
    transform: Transform,
    sets: usize,
}

#[cfg(test)]
impl PendingTransform for Dummy {
    fn pending(&mut self) -> &mut Option<TransformProperties> {
        &mut self.pending
    }
    fn set_transform(&mut self, t: Transform, _: Option<InheritType>) {
        self.transform = t;
        self.sets += 1;
    }
}

#[test]
fn test_parse_negates_translation_x() {
    let m = model(vec![p("Lcl Translation", &[1., 2., 3.])]);
    let props = TransformProperties::parse(&m);
    assert_eq!(props.translation, Some(Vec3::new(-1., 2., 3.)));
    assert_eq!(props.rotation, None);
    assert_eq!(props.euler_order, EulerOrder::Xyz);
}

#[test]
fn test_rotation_in_radians() {
    let m = model(vec![p("Lcl Rotation", &[90., 0., 0.])]);
    let props = TransformProperties::parse(&m);
    let r = props.rotation.unwrap();
    assert!((r.x - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    let t = props.to_transform();
    // rotation about X is unchanged by the X mirror
    assert!(t.rotation.abs_diff_eq(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2), 1e-6));
}

#[test]
fn test_pre_rotation_composes_first() {
    let m = model(vec![
        p("PreRotation", &[0., 0., 90.]),
        p("Lcl Rotation", &[0., 0., -90.]),
    ]);
    let t = TransformProperties::parse(&m).to_transform();
    assert!(t.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6), "{:?}", t.rotation);
}

#[test]
fn test_apply_twice_is_noop() {
    let m = model(vec![p("Lcl Scaling", &[2., 2., 2.])]);
    let mut d = Dummy {
        pending: Some(TransformProperties::parse(&m)),
        ..Default::default()
    };
    assert!(d.apply_transform());
    assert_eq!(d.transform.scale, Vec3::splat(2.));
    assert!(!d.apply_transform());
    assert_eq!(d.sets, 1);
    assert_eq!(d.transform.scale, Vec3::splat(2.));
    assert!(d.pending.is_none());
}
