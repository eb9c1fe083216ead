use super::connections::ConnectionsGraph;
use super::record::{Data, Record};
use super::{ObjectId, Objects};
use crate::F;
use crate::error::ImportError;
use crate::material::{Material, Texture, TextureSlots, TextureSource};
use crate::util::{base_name, is_supported_image_data, is_supported_texture, resolve_relative};

use base64::{Engine, prelude::BASE64_STANDARD};
use std::collections::HashMap;
use std::path::Path;

/// Materials and textures of one document, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    pub textures: Vec<Texture>,
    pub materials: Vec<Material>,
    pub texture_ids: HashMap<ObjectId, usize>,
    pub material_ids: HashMap<ObjectId, usize>,
}

/// Material slot a texture connection label binds to.
fn slot_for_label<'a>(slots: &'a mut TextureSlots, label: &str) -> Option<&'a mut Option<usize>> {
    Some(match label {
        "DiffuseColor" | "Diffuse" => &mut slots.diffuse,
        "Bump" | "NormalMap" => &mut slots.normal,
        "SpecularColor" | "SpecularFactor" => &mut slots.specular,
        "AmbientColor" | "AmbientOcclusion" => &mut slots.ambient,
        "EmissiveColor" => &mut slots.emissive,
        "TransparentColor" => &mut slots.opacity,
        _ => return None,
    })
}

/// File name a `Video` or `Texture` record points at.
fn media_file_name(r: &Record) -> Option<&str> {
    ["RelativeFilename", "FileName", "Filename"]
        .into_iter()
        .filter_map(|n| r.child_str(n))
        .find(|n| !n.is_empty())
}

/// Bytes of a `Content` child. Binary documents store them raw, text documents as base64
/// strings which may be split over several values.
fn embedded_content(media: &Record) -> Option<Vec<u8>> {
    let content = media.child("Content")?;
    match content.prop(0)? {
        Data::Binary(data) => Some(data.clone()),
        Data::String(_) => {
            let encoded: String = content
                .props
                .iter()
                .filter_map(Data::as_str)
                .flat_map(|s| s.chars().filter(|c| !c.is_ascii_whitespace()))
                .collect();
            BASE64_STANDARD
                .decode(encoded)
                .map_err(|e| log::debug!("media `{}` has bad base64 content: {e}", media.object_name()))
                .ok()
        }
        _ => None,
    }
}

/// Resolves the pixels behind a `Video` (or a `Texture` without one).
/// Embedded content wins over the file name; referenced files must exist under `root`.
pub fn media_source(media: &Record, root: &Path) -> Option<TextureSource> {
    let Some(file_name) = media_file_name(media) else {
        log::debug!("media `{}` has no file name", media.object_name());
        return None;
    };

    if let Some(data) = embedded_content(media)
        && !data.is_empty()
    {
        if !is_supported_texture(file_name) && !is_supported_image_data(&data) {
            log::debug!("skipping embedded media {file_name:?}, unsupported format");
            return None;
        }
        return Some(TextureSource::Embedded {
            file_name: base_name(file_name),
            data,
        });
    }

    if !is_supported_texture(file_name) {
        log::debug!("skipping texture {file_name:?}, unsupported extension");
        return None;
    }
    let path = resolve_relative(root, file_name);
    if !path.is_file() {
        log::warn!("texture {} not found, slot left unset", path.display());
        return None;
    }
    Some(TextureSource::File(path))
}

pub fn parse_texture(
    texture: &Record,
    index: &Objects,
    conns: &ConnectionsGraph,
    root: &Path,
) -> Option<Texture> {
    let id = texture.id()?;
    let video = conns
        .children(id)
        .iter()
        .filter_map(|l| index.get(&l.id))
        .find(|r| r.name == "Video");
    let source = match video {
        Some(v) => media_source(v, root),
        None => media_source(texture, root),
    }?;

    let to_f = |[u, v]: [f64; 2]| [u as F, v as F];
    Some(Texture {
        id,
        name: texture.object_name().to_string(),
        source,
        uv_offset: texture
            .property_vec2("ModelUVTranslation")
            .map_or([0.; 2], to_f),
        uv_scale: texture.property_vec2("ModelUVScaling").map_or([1.; 2], to_f),
    })
}

/// First of the named color properties that is present.
fn color(material: &Record, names: &[&str]) -> Option<[F; 3]> {
    names
        .iter()
        .find_map(|n| material.property_vec3(n))
        .map(|c| c.map(|v| v as F))
}

pub fn parse_material(
    material: &Record,
    conns: &ConnectionsGraph,
    texture_ids: &HashMap<ObjectId, usize>,
) -> Option<Material> {
    let id = material.id()?;
    let default = Material::default();
    let scalar = |names: &[&str]| names.iter().find_map(|n| material.property_f64(n));

    let mut textures = TextureSlots::default();
    for link in conns.children(id) {
        let Some(&tex) = texture_ids.get(&link.id) else {
            continue;
        };
        let label = link.relationship.as_deref().unwrap_or_default();
        match slot_for_label(&mut textures, label) {
            Some(slot) => *slot = Some(tex),
            None => log::debug!("ignoring texture bound to `{label}`"),
        }
    }

    Some(Material {
        id,
        name: material.object_name().to_string(),
        diffuse_color: color(material, &["DiffuseColor", "Diffuse"]).unwrap_or(default.diffuse_color),
        specular_color: color(material, &["SpecularColor", "Specular"])
            .unwrap_or(default.specular_color),
        ambient_color: color(material, &["AmbientColor", "Ambient"]).unwrap_or(default.ambient_color),
        emissive_color: color(material, &["EmissiveColor", "Emissive"])
            .unwrap_or(default.emissive_color),
        shininess: scalar(&["Shininess", "ShininessExponent"]).map_or(default.shininess, |v| v as F),
        opacity: scalar(&["Opacity"]).map_or(default.opacity, |v| v as F),
        textures,
    })
}

/// Resolves every `Texture` and `Material` under `objects`.
pub fn resolve(
    objects: &Record,
    index: &Objects,
    conns: &ConnectionsGraph,
    root: &Path,
) -> MaterialLibrary {
    let mut lib = MaterialLibrary::default();
    for t in objects.children_named("Texture") {
        let Some(tex) = parse_texture(t, index, conns, root) else {
            continue;
        };
        lib.texture_ids.insert(tex.id, lib.textures.len());
        lib.textures.push(tex);
    }
    for m in objects.children_named("Material") {
        let Some(mat) = parse_material(m, conns, &lib.texture_ids) else {
            continue;
        };
        lib.material_ids.insert(mat.id, lib.materials.len());
        lib.materials.push(mat);
    }
    lib
}

/// Writes embedded textures under `root` and points them at the written files.
/// A texture that cannot be written stays embedded.
pub fn commit_textures(textures: &mut [Texture], root: &Path) {
    for t in textures {
        let TextureSource::Embedded { file_name, data } = &t.source else {
            continue;
        };
        let path = root.join(file_name);
        match std::fs::write(&path, data) {
            Ok(()) => t.source = TextureSource::File(path),
            Err(source) => {
                let err = ImportError::Resource { path, source };
                log::warn!("{err}, keeping texture `{}` in memory", t.name);
            }
        }
    }
}

#[cfg(test)]
use crate::fbx::index_objects;

#[cfg(test)]
fn p(name: &str, vals: &[f64]) -> Record {
    let mut props = vec![
        Data::str(name),
        Data::str("Color"),
        Data::str(""),
        Data::str("A"),
    ];
    props.extend(vals.iter().map(|&v| Data::F64(v)));
    Record::new("P", props, vec![])
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
fn embedded_texture(id: i64, name: &str) -> Record {
    object(
        "Texture",
        id,
        name,
        vec![
            Record::new("RelativeFilename", vec![Data::String(format!("{name}.png"))], vec![]),
            // PNG signature
            Record::new(
                "Content",
                vec![Data::Binary(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a])],
                vec![],
            ),
        ],
    )
}

#[cfg(test)]
fn op(conns: &mut ConnectionsGraph, child: i64, parent: i64, label: &str) {
    conns.connect(child, parent, Some(label.to_string()));
}

#[test]
fn test_bump_goes_to_normal_slot() {
    let objects = Record::new(
        "Objects",
        vec![],
        vec![
            embedded_texture(10, "albedo"),
            embedded_texture(11, "bumps"),
            object("Material", 20, "Mat", vec![]),
        ],
    );
    let index = index_objects(&objects);
    let mut conns = ConnectionsGraph::default();
    op(&mut conns, 10, 20, "DiffuseColor");
    op(&mut conns, 11, 20, "Bump");

    let lib = resolve(&objects, &index, &conns, Path::new("."));
    assert_eq!(lib.textures.len(), 2);
    let m = &lib.materials[0];
    assert_eq!(m.textures.normal, Some(lib.texture_ids[&11]));
    assert_eq!(m.textures.diffuse, Some(lib.texture_ids[&10]));
    assert_ne!(m.textures.diffuse, m.textures.normal);
}

#[test]
fn test_material_colors() {
    let m = object(
        "Material",
        1,
        "Red",
        vec![Record::new(
            "Properties70",
            vec![],
            vec![
                p("Diffuse", &[1., 0., 0.]),
                p("EmissiveColor", &[0., 0.5, 0.]),
                p("Opacity", &[0.25]),
                p("ShininessExponent", &[8.]),
            ],
        )],
    );
    let mat = parse_material(&m, &ConnectionsGraph::default(), &HashMap::new()).unwrap();
    assert_eq!(mat.name, "Red");
    assert_eq!(mat.diffuse_color, [1., 0., 0.]);
    assert_eq!(mat.emissive_color, [0., 0.5, 0.]);
    assert_eq!(mat.specular_color, [1.; 3]);
    assert_eq!(mat.opacity, 0.25);
    assert_eq!(mat.shininess, 8.);
}

#[test]
fn test_video_and_relative_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("wood.png"), b"not really a png").unwrap();

    let objects = Record::new(
        "Objects",
        vec![],
        vec![
            object(
                "Video",
                1,
                "wood",
                vec![Record::new("RelativeFilename", vec![Data::str("wood.png")], vec![])],
            ),
            object(
                "Texture",
                2,
                "wood",
                vec![Record::new(
                    "Properties70",
                    vec![],
                    vec![p("ModelUVScaling", &[2., 3.])],
                )],
            ),
            // no video and no such file on disk
            object(
                "Texture",
                3,
                "missing",
                vec![Record::new("FileName", vec![Data::str("C:\\tex\\gone.png")], vec![])],
            ),
            // extension no image decoder knows
            object(
                "Texture",
                4,
                "shader",
                vec![Record::new("FileName", vec![Data::str("shader.fx")], vec![])],
            ),
        ],
    );
    let index = index_objects(&objects);
    let mut conns = ConnectionsGraph::default();
    conns.connect(1, 2, None);

    let lib = resolve(&objects, &index, &conns, dir.path());
    assert_eq!(lib.textures.len(), 1);
    let t = &lib.textures[0];
    assert_eq!(t.id, 2);
    assert_eq!(t.source, TextureSource::File(dir.path().join("wood.png")));
    assert_eq!(t.uv_scale, [2., 3.]);
    assert_eq!(t.uv_offset, [0., 0.]);
}

#[test]
fn test_base64_content_from_text() {
    let src = r#"Objects:  {
    Video: 1, "Video::logo", "Clip" {
        RelativeFilename: "logo.png"
        Content: , "iVBORw0K",
            "Ggo="
    }
    Video: 2, "Video::broken", "Clip" {
        RelativeFilename: "broken.png"
        Content: , "not base64!"
    }
}
"#;
    let root = crate::fbx::text::parse(src).unwrap();
    let objects = root.child("Objects").unwrap();
    let dir = tempfile::tempdir().unwrap();

    let logo = media_source(&objects.children[0], dir.path()).unwrap();
    assert_eq!(
        logo,
        TextureSource::Embedded {
            file_name: "logo.png".into(),
            data: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
        }
    );
    // undecodable content falls back to a file that is not there
    assert_eq!(media_source(&objects.children[1], dir.path()), None);
}

#[test]
fn test_commit_textures() {
    let dir = tempfile::tempdir().unwrap();
    let objects = Record::new("Objects", vec![], vec![embedded_texture(5, "skin")]);
    let index = index_objects(&objects);
    let mut lib = resolve(&objects, &index, &ConnectionsGraph::default(), dir.path());
    assert!(matches!(lib.textures[0].source, TextureSource::Embedded { .. }));

    commit_textures(&mut lib.textures, dir.path());
    let written = dir.path().join("skin.png");
    assert_eq!(lib.textures[0].source, TextureSource::File(written.clone()));
    assert_eq!(std::fs::read(written).unwrap()[1..4], *b"PNG");

    // an unwritable destination keeps the bytes in memory
    let mut lib = resolve(&objects, &index, &ConnectionsGraph::default(), dir.path());
    commit_textures(&mut lib.textures, &dir.path().join("no/such/dir"));
    assert!(matches!(lib.textures[0].source, TextureSource::Embedded { .. }));
}
