use super::F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationKind {
    #[default]
    Linear,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Translation,
    Rotation,
    Scale,
}

/// What a channel animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Index into [`crate::Scene::nodes`].
    Node(usize),
    /// Bone of a skeleton in [`crate::Scene::skeletons`].
    Bone { skeleton: usize, bone: usize },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum OutputProperty {
    #[default]
    None,
    Translation(Vec<[F; 3]>),
    /// Quaternions as `[x, y, z, w]`.
    Rotation(Vec<[F; 4]>),
    Scale(Vec<[F; 3]>),
}

impl OutputProperty {
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Translation(v) | Self::Scale(v) => v.len(),
            Self::Rotation(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Channel {
    pub target: Target,
    pub target_property: Property,
    /// Index into [`Animation::samplers`].
    pub sampler: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sampler {
    pub interpolation_kind: InterpolationKind,
    /// Key times in seconds, ascending.
    pub input: Vec<F>,
    /// One value per key time.
    pub output: OutputProperty,
}

/// A playable clip, one per animation stack.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Animation {
    pub name: String,
    pub channels: Vec<Channel>,
    pub samplers: Vec<Sampler>,
}

impl Animation {
    pub fn add_track(&mut self, target: Target, input: Vec<F>, output: OutputProperty) {
        let target_property = match output {
            OutputProperty::Translation(_) => Property::Translation,
            OutputProperty::Rotation(_) => Property::Rotation,
            OutputProperty::Scale(_) => Property::Scale,
            OutputProperty::None => return,
        };
        self.channels.push(Channel {
            target,
            target_property,
            sampler: self.samplers.len(),
        });
        self.samplers.push(Sampler {
            interpolation_kind: InterpolationKind::Linear,
            input,
            output,
        });
    }

    /// Sampler driving `property` of `target`, if any.
    pub fn sampler_for(&self, target: Target, property: Property) -> Option<&Sampler> {
        self.channels
            .iter()
            .find(|c| c.target == target && c.target_property == property)
            .map(|c| &self.samplers[c.sampler])
    }

    /// Length of the clip in seconds.
    pub fn duration(&self) -> F {
        self.samplers
            .iter()
            .filter_map(|s| s.input.last().copied())
            .fold(0., F::max)
    }
}
