use fbxscene::anim::{OutputProperty, Property, Target};
use fbxscene::fbx::export::write_binary;
use fbxscene::fbx::{self, Data, ImportOptions, Record, TICKS_PER_SECOND};
use fbxscene::{ImportError, Scene, TextureSource};

use approx::assert_relative_eq;
use glam::{Mat4, Vec3};
use std::io::Cursor;

fn object(kind: &str, id: i64, name: &str, class: &str, children: Vec<Record>) -> Record {
    Record::new(
        kind,
        vec![
            Data::I64(id),
            Data::String(format!("{kind}::{name}")),
            Data::str(class),
        ],
        children,
    )
}

fn leaf(name: &str, v: Data) -> Record {
    Record::new(name, vec![v], vec![])
}

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

fn props70(ps: Vec<Record>) -> Record {
    Record::new("Properties70", vec![], ps)
}

fn c(child: i64, parent: i64) -> Record {
    Record::new(
        "C",
        vec![Data::str("OO"), Data::I64(child), Data::I64(parent)],
        vec![],
    )
}

fn cp(child: i64, parent: i64, label: &str) -> Record {
    Record::new(
        "C",
        vec![
            Data::str("OP"),
            Data::I64(child),
            Data::I64(parent),
            Data::str(label),
        ],
        vec![],
    )
}

fn mat(m: Mat4) -> Data {
    Data::F64Arr(m.to_cols_array().map(|v| v as f64).to_vec())
}

fn curve(id: i64, seconds: &[f64], values: &[f32]) -> Record {
    let ticks = seconds
        .iter()
        .map(|s| (s * TICKS_PER_SECOND) as i64)
        .collect();
    object(
        "AnimationCurve",
        id,
        "",
        "",
        vec![
            leaf("KeyTime", Data::I64Arr(ticks)),
            leaf("KeyValueFloat", Data::F32Arr(values.to_vec())),
        ],
    )
}

/// A quad and a triangle on two materials, skinned to two bones, with one animation stack.
fn scene_document(version: i32) -> Record {
    let geometry = object(
        "Geometry",
        100,
        "Plane",
        "Mesh",
        vec![
            leaf(
                "Vertices",
                Data::F64Arr(vec![
                    0., 0., 0., //
                    1., 0., 0., //
                    1., 1., 0., //
                    0., 1., 0., //
                    2., 0., 0., //
                ]),
            ),
            leaf(
                "PolygonVertexIndex",
                Data::I32Arr(vec![0, 1, 2, -4, 1, 4, -3]),
            ),
            Record::new(
                "LayerElementNormal",
                vec![Data::I32(0)],
                vec![
                    leaf("MappingInformationType", Data::str("ByPolygonVertex")),
                    leaf("ReferenceInformationType", Data::str("Direct")),
                    leaf("Normals", Data::F64Arr([0., 0., 1.].repeat(7))),
                ],
            ),
            Record::new(
                "LayerElementMaterial",
                vec![Data::I32(0)],
                vec![
                    leaf("MappingInformationType", Data::str("ByPolygon")),
                    leaf("ReferenceInformationType", Data::str("IndexToDirect")),
                    leaf("Materials", Data::I32Arr(vec![1, 0])),
                ],
            ),
        ],
    );

    let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    let objects = vec![
        geometry,
        object(
            "Model",
            1,
            "Plane",
            "Mesh",
            vec![props70(vec![p("Lcl Translation", &[1., 2., 3.])])],
        ),
        object("Model", 2, "Hip", "LimbNode", vec![]),
        object(
            "Model",
            3,
            "Knee",
            "LimbNode",
            vec![props70(vec![p("Lcl Translation", &[0., 1., 0.])])],
        ),
        object(
            "Material",
            200,
            "Red",
            "",
            vec![props70(vec![p("DiffuseColor", &[1., 0., 0.])])],
        ),
        object("Material", 201, "Blue", "", vec![]),
        object(
            "Texture",
            300,
            "red",
            "",
            vec![
                leaf("RelativeFilename", Data::str("textures\\red.png")),
                leaf("Content", Data::Binary(png)),
            ],
        ),
        object("Deformer", 400, "Skin", "Skin", vec![]),
        object(
            "Deformer",
            401,
            "Hip",
            "Cluster",
            vec![
                leaf("Indexes", Data::I32Arr(vec![0, 1, 2, 3, 4])),
                leaf("Weights", Data::F64Arr(vec![1., 1., 1., 1., 0.5])),
                leaf("Transform", mat(Mat4::IDENTITY)),
                leaf("TransformLink", mat(Mat4::IDENTITY)),
            ],
        ),
        object(
            "Deformer",
            402,
            "Knee",
            "Cluster",
            vec![
                leaf("Indexes", Data::I32Arr(vec![4])),
                leaf("Weights", Data::F64Arr(vec![0.5])),
                leaf(
                    "TransformLink",
                    mat(Mat4::from_translation(Vec3::new(0., 1., 0.))),
                ),
            ],
        ),
        object(
            "Pose",
            500,
            "BIND",
            "BindPose",
            vec![Record::new(
                "PoseNode",
                vec![],
                vec![
                    leaf("Node", Data::I64(1)),
                    leaf("Matrix", mat(Mat4::from_translation(Vec3::new(0., 0., 5.)))),
                ],
            )],
        ),
        object("AnimationStack", 600, "Take 001", "", vec![]),
        object("AnimationLayer", 601, "BaseLayer", "", vec![]),
        object("AnimationCurveNode", 602, "T", "", vec![]),
        curve(603, &[0., 1.], &[0., 10.]),
        object("AnimationCurveNode", 604, "R", "", vec![]),
        curve(605, &[0., 1.], &[0., 90.]),
    ];

    let connections = vec![
        c(1, 0),
        c(100, 1),
        c(200, 1),
        c(201, 1),
        cp(300, 200, "DiffuseColor"),
        c(400, 100),
        c(401, 400),
        c(402, 400),
        c(2, 0),
        c(3, 2),
        c(2, 401),
        c(3, 402),
        c(601, 600),
        c(602, 601),
        c(604, 601),
        cp(602, 1, "Lcl Translation"),
        cp(604, 3, "Lcl Rotation"),
        cp(603, 602, "d|X"),
        cp(605, 604, "d|Z"),
    ];

    Record::new(
        "",
        vec![],
        vec![
            Record::new(
                "FBXHeaderExtension",
                vec![],
                vec![leaf("FBXVersion", Data::I32(version))],
            ),
            Record::new("Objects", vec![], objects),
            Record::new("Connections", vec![], connections),
        ],
    )
}

fn to_bytes(doc: &Record, version: u32) -> Vec<u8> {
    let mut out = Cursor::new(vec![]);
    write_binary(doc, version, &mut out).unwrap();
    out.into_inner()
}

fn import_binary(version: u32, opts: &ImportOptions) -> Scene {
    let bytes = to_bytes(&scene_document(version as i32), version);
    fbx::import(&bytes, opts).unwrap()
}

#[test]
fn test_full_scene() {
    let scene = import_binary(7500, &ImportOptions::default());

    // bones are not nodes
    assert_eq!(scene.nodes.len(), 1);
    let node = &scene.nodes[0];
    assert_eq!(node.name, "Plane");
    assert_eq!(node.transform.translation, Vec3::new(-1., 2., 3.));

    assert_eq!(scene.meshes.len(), 1);
    let m = &scene.meshes[0];
    // the triangle (material 0) comes before the quad (material 1)
    assert_eq!(m.num_tris(), 3);
    assert_eq!(m.v.len(), 9);
    assert_eq!(m.indices, (0..9).collect::<Vec<u32>>());
    assert_eq!(m.submeshes.len(), 2);
    assert_eq!(m.submeshes[0].material_index, 0);
    assert_eq!(m.submeshes[0].vertex_count, 3);
    assert_eq!(m.submeshes[1].material_index, 1);
    assert_eq!(m.submeshes[1].vertex_start, 3);
    assert_eq!(m.submeshes[1].vertex_count, 6);
    assert_eq!(m.v[0], [-1., 0., 0.]);
    assert_eq!(m.v[1], [-2., 0., 0.]);
    assert!(m.n.iter().all(|&n| n == [0., 0., 1.]));

    assert!(m.is_skinned());
    for w in &m.joint_weights {
        assert_relative_eq!(w.iter().sum::<f32>(), 1., epsilon = 1e-4);
    }
    // vertex 4 is shared half and half
    assert_eq!(m.joint_idxs[1], [0, 1, 0, 0]);
    assert_relative_eq!(m.joint_weights[1][0], 0.5);
    assert_relative_eq!(m.joint_weights[1][1], 0.5);

    let instance = node.mesh.as_ref().unwrap();
    assert_eq!(instance.mesh, 0);
    assert_eq!(instance.materials, [Some(0), Some(1)]);
    assert_eq!(instance.skeleton, Some(0));
    assert!(instance.pose_matrix.is_some());

    assert_eq!(scene.skeletons.len(), 1);
    let sk = &scene.skeletons[0];
    assert!(sk.needs_initial_skin_matrix);
    let names = sk.bones.iter().map(|b| b.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["Plane-Hip", "Plane-Knee"]);
    assert_eq!(sk.bones[0].parent, None);
    assert_eq!(sk.bones[1].parent, Some(0));
    assert_eq!(sk.bones[1].rest_pose, sk.bones[1].local_matrix);
    assert!(
        sk.bones[1]
            .world_matrix
            .w_axis
            .abs_diff_eq(glam::Vec4::new(0., 1., 0., 1.), 1e-6)
    );

    assert_eq!(scene.materials.len(), 2);
    assert_eq!(scene.materials[0].name, "Red");
    assert_eq!(scene.materials[0].diffuse_color, [1., 0., 0.]);
    assert_eq!(scene.materials[0].textures.diffuse, Some(0));
    assert_eq!(scene.materials[1].textures.diffuse, None);
    match &scene.textures[0].source {
        TextureSource::Embedded { file_name, data } => {
            assert_eq!(file_name, "red.png");
            assert_eq!(data.len(), 8);
        }
        s => panic!("{s:?}"),
    }

    assert_eq!(scene.animations.len(), 1);
    let clip = &scene.animations[0];
    assert_eq!(clip.name, "Take 001");
    assert_eq!(clip.channels.len(), 2);
    let t = clip
        .sampler_for(Target::Node(0), Property::Translation)
        .unwrap();
    assert_eq!(t.input, [0., 1.]);
    let OutputProperty::Translation(vals) = &t.output else {
        panic!("{:?}", t.output);
    };
    assert_eq!(vals[0], [0., 2., 3.]);
    assert_eq!(vals[1], [-10., 2., 3.]);

    let knee = Target::Bone {
        skeleton: 0,
        bone: 1,
    };
    let r = clip.sampler_for(knee, Property::Rotation).unwrap();
    assert_eq!(r.input.len(), 2);
    assert_relative_eq!(clip.duration(), 1.);
}

#[test]
fn test_header_widths_agree() {
    let opts = ImportOptions::default();
    assert_eq!(import_binary(7400, &opts), import_binary(7500, &opts));
}

#[test]
fn test_write_textures() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ImportOptions::default()
        .with_root_path(dir.path())
        .with_write_textures(true);
    let scene = import_binary(7400, &opts);
    let path = dir.path().join("red.png");
    assert_eq!(scene.textures[0].source, TextureSource::File(path.clone()));
    assert!(path.is_file());
}

#[test]
fn test_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plane.fbx");
    std::fs::write(&path, to_bytes(&scene_document(7400), 7400)).unwrap();
    let scene = fbxscene::load(&path).unwrap();
    assert_eq!(scene.meshes.len(), 1);
    assert!(!path.with_file_name("red.png").exists());
}

#[test]
fn test_old_versions_import_empty() {
    let bytes = to_bytes(&scene_document(6100), 6100);
    let scene = fbx::import(&bytes, &ImportOptions::default()).unwrap();
    assert_eq!(scene, Scene::default());
    // the parser on its own still decodes the node tree
    assert!(fbx::parser::parse(&bytes).unwrap().child("Objects").is_some());

    // a current binary header does not hide an old document version
    let bytes = to_bytes(&scene_document(6100), 7400);
    let scene = fbx::import(&bytes, &ImportOptions::default()).unwrap();
    assert_eq!(scene, Scene::default());

    let mut bytes = to_bytes(&scene_document(7400), 7400);
    bytes[0] = 0xff;
    assert_eq!(fbx::import(&bytes, &ImportOptions::default()).unwrap(), Scene::default());
}

#[test]
fn test_strict_and_lenient() {
    let mut doc = scene_document(7400);
    let objects = doc
        .children
        .iter_mut()
        .find(|r| r.name == "Objects")
        .unwrap();
    // a second geometry whose polygon points past its vertices
    objects.children.push(object(
        "Geometry",
        101,
        "Broken",
        "Mesh",
        vec![
            leaf("Vertices", Data::F64Arr(vec![0.; 9])),
            leaf("PolygonVertexIndex", Data::I32Arr(vec![0, 1, -8])),
        ],
    ));
    let bytes = to_bytes(&doc, 7400);

    let strict = ImportOptions::default().with_strict(true);
    let err = fbx::import(&bytes, &strict).unwrap_err();
    assert!(matches!(err, ImportError::MalformedRecord { .. }), "{err}");

    let lenient = ImportOptions::default().with_strict(false);
    let scene = fbx::import(&bytes, &lenient).unwrap();
    assert_eq!(scene.meshes.len(), 1);
    assert_eq!(scene.meshes[0].name, "Plane");
    assert_eq!(scene.animations.len(), 1);
}

#[test]
fn test_text_document() {
    let src = r#"; FBX 7.4.0 project file
FBXHeaderExtension:  {
    FBXVersion: 7400
}
Objects:  {
    Geometry: 10, "Geometry::Tri", "Mesh" {
        Vertices: *9 {
            a: 0,0,0,1,0,0,0,1,0
        }
        PolygonVertexIndex: *3 {
            a: 0,1,-3
        }
    }
    Model: 20, "Model::Tri", "Mesh" {
        Properties70:  {
            P: "Lcl Rotation", "Lcl Rotation", "", "A",0,0,90
            P: "Lcl Scaling", "Lcl Scaling", "", "A",2,2,2
        }
    }
    Model: 30, "Model::Helper", "Null" {
    }
}
Connections:  {
    C: "OO",20,0
    C: "OO",10,20
    C: "OO",30,20
}
"#;
    let scene = fbx::import(src.as_bytes(), &ImportOptions::default()).unwrap();
    assert_eq!(scene.meshes.len(), 1);
    assert_eq!(scene.meshes[0].v[1], [-1., 0., 0.]);
    assert_eq!(scene.mesh_nodes().count(), 1);

    let helper = scene.node_by_name("Helper").unwrap();
    assert_eq!(helper.parent, Some(0));
    assert_eq!(helper.mesh, None);

    let tri = &scene.nodes[0];
    assert_eq!(tri.transform.scale, Vec3::splat(2.));
    // mirrored rotation about z
    let expected = glam::Quat::from_rotation_z(-90f32.to_radians());
    assert!(tri.transform.rotation.abs_diff_eq(expected, 1e-5));
}
