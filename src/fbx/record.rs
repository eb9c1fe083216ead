use super::ObjectId;
use std::io::{self, Write};

/// A single typed property value of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    I16(i16),
    Bool(bool),
    I32(i32),
    I64(i64),

    F32(f32),
    F64(f64),

    String(String),
    Binary(Vec<u8>),

    I32Arr(Vec<i32>),
    I64Arr(Vec<i64>),
    F32Arr(Vec<f32>),
    F64Arr(Vec<f64>),
    BoolArr(Vec<bool>),
}

impl Data {
    pub fn str(s: &str) -> Self {
        Data::String(s.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Data::I16(v) => v as i64,
            Data::Bool(v) => v as i64,
            Data::I32(v) => v as i64,
            Data::I64(v) => v,
            // text documents may spell integers as floats
            Data::F32(v) if v.fract() == 0. => v as i64,
            Data::F64(v) if v.fract() == 0. => v as i64,
            _ => return None,
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Data::I16(v) => v as f64,
            Data::Bool(v) => v as u8 as f64,
            Data::I32(v) => v as f64,
            Data::I64(v) => v as f64,
            Data::F32(v) => v as f64,
            Data::F64(v) => v,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Binary(b) => Some(b),
            Data::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Any numeric array (or scalar) widened to `f64`.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        Some(match self {
            Data::F64Arr(v) => v.clone(),
            Data::F32Arr(v) => v.iter().map(|&v| v as f64).collect(),
            Data::I32Arr(v) => v.iter().map(|&v| v as f64).collect(),
            Data::I64Arr(v) => v.iter().map(|&v| v as f64).collect(),
            Data::BoolArr(v) => v.iter().map(|&v| v as u8 as f64).collect(),
            d => vec![d.as_f64()?],
        })
    }

    /// Any integer array (or scalar) widened to `i64`.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        Some(match self {
            Data::I32Arr(v) => v.iter().map(|&v| v as i64).collect(),
            Data::I64Arr(v) => v.clone(),
            Data::BoolArr(v) => v.iter().map(|&v| v as i64).collect(),
            // text documents store every array as whatever the numbers look like
            Data::F64Arr(v) => v.iter().map(|&v| v as i64).collect(),
            Data::F32Arr(v) => v.iter().map(|&v| v as i64).collect(),
            d => vec![d.as_i64()?],
        })
    }

    /// Number of elements, 1 for scalars.
    pub fn len(&self) -> usize {
        match self {
            Data::I32Arr(v) => v.len(),
            Data::I64Arr(v) => v.len(),
            Data::F32Arr(v) => v.len(),
            Data::F64Arr(v) => v.len(),
            Data::BoolArr(v) => v.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parsed node of the FBX document tree, before any domain interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub name: String,
    pub props: Vec<Data>,
    pub children: Vec<Record>,
}

impl Record {
    pub fn new(name: &str, props: Vec<Data>, children: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            props,
            children,
        }
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&Record> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name, in declaration order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn prop(&self, i: usize) -> Option<&Data> {
        self.props.get(i)
    }

    pub fn prop_str(&self, i: usize) -> Option<&str> {
        self.prop(i)?.as_str()
    }

    pub fn prop_i64(&self, i: usize) -> Option<i64> {
        self.prop(i)?.as_i64()
    }

    pub fn prop_f64(&self, i: usize) -> Option<f64> {
        self.prop(i)?.as_f64()
    }

    /// Object id, which every record under `Objects` carries as its first property.
    pub fn id(&self) -> Option<ObjectId> {
        self.prop_i64(0)
    }

    /// Object name with its `Class::` prefix removed.
    pub fn object_name(&self) -> &str {
        let full = self.prop_str(1).unwrap_or_default();
        match full.split_once("::") {
            Some((_, name)) => name,
            None => full,
        }
    }

    /// Object subtype, e.g. `Mesh` for geometries or `Skin` for deformers.
    pub fn subtype(&self) -> &str {
        self.prop_str(2).unwrap_or_default()
    }

    /// First property of the named child, as a numeric array.
    pub fn child_f64s(&self, name: &str) -> Option<Vec<f64>> {
        self.child(name)?.prop(0)?.to_f64_vec()
    }

    /// First property of the named child, as an integer array.
    pub fn child_i64s(&self, name: &str) -> Option<Vec<i64>> {
        self.child(name)?.prop(0)?.to_i64_vec()
    }

    pub fn child_str(&self, name: &str) -> Option<&str> {
        self.child(name)?.prop_str(0)
    }

    /// `P` entries of the `Properties70` block (or the older `Properties60`).
    pub fn properties(&self) -> impl Iterator<Item = &Record> {
        self.child("Properties70")
            .or_else(|| self.child("Properties60"))
            .into_iter()
            .flat_map(|p| p.children.iter())
            .filter(|p| p.name == "P" || p.name == "Property")
    }

    pub fn property(&self, name: &str) -> Option<&Record> {
        self.properties().find(|p| p.prop_str(0) == Some(name))
    }

    /// Value slot of a property entry. `Properties70` keeps values from index 4,
    /// `Properties60` from index 3.
    fn value_start(p: &Record) -> usize {
        if p.name == "Property" { 3 } else { 4 }
    }

    pub fn property_f64(&self, name: &str) -> Option<f64> {
        let p = self.property(name)?;
        p.prop_f64(Self::value_start(p))
    }

    pub fn property_i64(&self, name: &str) -> Option<i64> {
        let p = self.property(name)?;
        p.prop_i64(Self::value_start(p))
    }

    pub fn property_str(&self, name: &str) -> Option<&str> {
        let p = self.property(name)?;
        p.prop_str(Self::value_start(p))
    }

    /// Three component property, missing components default to 0.
    pub fn property_vec3(&self, name: &str) -> Option<[f64; 3]> {
        let p = self.property(name)?;
        let s = Self::value_start(p);
        Some(std::array::from_fn(|i| p.prop_f64(s + i).unwrap_or(0.)))
    }

    pub fn property_vec2(&self, name: &str) -> Option<[f64; 2]> {
        let p = self.property(name)?;
        let s = Self::value_start(p);
        Some(std::array::from_fn(|i| p.prop_f64(s + i).unwrap_or(0.)))
    }

    /// Constructs a graphviz representation of this tree, for viewing externally.
    pub fn to_graphviz(&self, mut dst: impl Write) -> io::Result<()> {
        fn visit(r: &Record, id: &mut usize, dst: &mut impl Write) -> io::Result<usize> {
            let own = *id;
            *id += 1;
            let label = r.name.replace('"', "\\\"");
            writeln!(dst, "\t{own} [label=\"{label}\"]")?;
            for c in &r.children {
                let c = visit(c, id, dst)?;
                writeln!(dst, "\t{own} -- {c}")?;
            }
            Ok(own)
        }
        writeln!(dst, "graph FBX {{")?;
        visit(self, &mut 0, &mut dst)?;
        writeln!(dst, "}}")?;
        Ok(())
    }
}

#[test]
fn test_properties70_lookup() {
    let model = Record::new(
        "Model",
        vec![Data::I64(7), Data::str("Model::Cube"), Data::str("Mesh")],
        vec![Record::new(
            "Properties70",
            vec![],
            vec![
                Record::new(
                    "P",
                    vec![
                        Data::str("Lcl Translation"),
                        Data::str("Lcl Translation"),
                        Data::str(""),
                        Data::str("A"),
                        Data::F64(1.),
                        Data::F64(2.),
                        Data::F64(3.),
                    ],
                    vec![],
                ),
                Record::new(
                    "P",
                    vec![
                        Data::str("RotationOrder"),
                        Data::str("enum"),
                        Data::str(""),
                        Data::str(""),
                        Data::I32(4),
                    ],
                    vec![],
                ),
            ],
        )],
    );
    assert_eq!(model.id(), Some(7));
    assert_eq!(model.object_name(), "Cube");
    assert_eq!(model.subtype(), "Mesh");
    assert_eq!(model.property_vec3("Lcl Translation"), Some([1., 2., 3.]));
    assert_eq!(model.property_i64("RotationOrder"), Some(4));
    assert_eq!(model.property_vec3("Lcl Scaling"), None);
}

#[test]
fn test_graphviz() {
    let root = Record::new("", vec![], vec![Record::new("Objects", vec![], vec![])]);
    let mut out = vec![];
    root.to_graphviz(&mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("graph FBX {"));
    assert!(out.contains("0 -- 1"));
}
