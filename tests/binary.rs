use fbxscene::ImportError;
use fbxscene::fbx::export::write_binary;
use fbxscene::fbx::{Data, Record, parser};

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::{Cursor, Write};

const MAGIC: &[u8] = b"Kaydara FBX Binary  \x00\x1a\x00";

/// A 32 bit document holding one record `V` with a single `d` array property.
fn array_document(declared_len: u32, encoding: u32, payload: &[u8]) -> Vec<u8> {
    let mut prop = vec![b'd'];
    prop.extend(declared_len.to_le_bytes());
    prop.extend(encoding.to_le_bytes());
    prop.extend((payload.len() as u32).to_le_bytes());
    prop.extend(payload);

    let mut out = MAGIC.to_vec();
    out.extend(7400u32.to_le_bytes());
    let start = out.len();
    let name = b"V";
    let end = start + 13 + name.len() + prop.len();
    out.extend((end as u32).to_le_bytes());
    out.extend(1u32.to_le_bytes());
    out.extend((prop.len() as u32).to_le_bytes());
    out.push(name.len() as u8);
    out.extend(name);
    out.extend(prop);
    out.extend([0u8; 13]);
    out
}

fn zlib(vals: &[f64]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(vec![], Compression::default());
    for v in vals {
        enc.write_all(&v.to_le_bytes()).unwrap();
    }
    enc.finish().unwrap()
}

#[test]
fn test_compressed_array() {
    let vals = [1., -2.5, 3e10];
    let doc = parser::parse(&array_document(3, 1, &zlib(&vals))).unwrap();
    assert_eq!(doc.children.len(), 1);
    let v = &doc.children[0];
    assert_eq!(v.name, "V");
    assert_eq!(v.props, [Data::F64Arr(vals.to_vec())]);
}

#[test]
fn test_compressed_length_mismatch() {
    let err = parser::parse(&array_document(4, 1, &zlib(&[1., 2., 3.]))).unwrap_err();
    assert!(matches!(err, ImportError::Decompress(_)), "{err}");

    let err = parser::parse(&array_document(2, 1, b"definitely not zlib")).unwrap_err();
    assert!(matches!(err, ImportError::Decompress(_)), "{err}");
}

#[test]
fn test_raw_array_and_unknown_encoding() {
    let raw = [4f64, 5.]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect::<Vec<_>>();
    let doc = parser::parse(&array_document(2, 0, &raw)).unwrap();
    assert_eq!(doc.children[0].props, [Data::F64Arr(vec![4., 5.])]);

    let err = parser::parse(&array_document(2, 7, &raw)).unwrap_err();
    assert!(matches!(err, ImportError::UnsupportedFormat(_)), "{err}");
}

#[test]
fn test_truncated_and_bad_magic() {
    let bytes = array_document(2, 0, &[0; 16]);
    let err = parser::parse(&bytes[..bytes.len() - 20]).unwrap_err();
    assert!(matches!(err, ImportError::Parse { .. }), "{err}");

    let mut bytes = bytes;
    bytes[0] = b'k';
    let err = parser::parse(&bytes).unwrap_err();
    assert!(matches!(err, ImportError::UnsupportedFormat(_)), "{err}");
}

#[test]
fn test_namespaced_strings() {
    let doc = Record::new(
        "",
        vec![],
        vec![Record::new(
            "Model",
            vec![
                Data::I64(1 << 40),
                Data::str("Model::Cube"),
                Data::str("Mesh"),
            ],
            vec![Record::new("Version", vec![Data::I32(232)], vec![])],
        )],
    );
    let mut out = Cursor::new(vec![]);
    write_binary(&doc, 7500, &mut out).unwrap();
    let bytes = out.into_inner();
    // stored the way exporters store it
    assert!(bytes.windows(11).any(|w| w == b"Cube\x00\x01Model"));

    let back = parser::parse(&bytes).unwrap();
    let model = &back.children[0];
    assert_eq!(model.id(), Some(1 << 40));
    assert_eq!(model.prop_str(1), Some("Model::Cube"));
    assert_eq!(model.object_name(), "Cube");
    assert_eq!(model.child("Version").unwrap().prop_i64(0), Some(232));
}

#[test]
fn test_inflate_stops_at_declared_length() {
    // a megabyte of zeros behind an array that claims a single element
    let mut enc = ZlibEncoder::new(vec![], Compression::best());
    enc.write_all(&vec![0u8; 1 << 20]).unwrap();
    let bomb = enc.finish().unwrap();
    assert!(bomb.len() < 4096);

    let err = parser::parse(&array_document(1, 1, &bomb)).unwrap_err();
    assert!(matches!(err, ImportError::Decompress(_)), "{err}");

    let err = parser::parse(&array_document(1, 1, &zlib(&[1., 2., 3.]))).unwrap_err();
    assert!(matches!(err, ImportError::Decompress(_)), "{err}");
}

#[test]
fn test_oversized_property_length() {
    // 64 bit header words, property list length of u64::MAX
    let mut out = MAGIC.to_vec();
    out.extend(7500u32.to_le_bytes());
    let end = out.len() + 25 + 1 + 25;
    out.extend((end as u64).to_le_bytes());
    out.extend(0u64.to_le_bytes());
    out.extend(u64::MAX.to_le_bytes());
    out.push(1);
    out.push(b'V');
    out.extend([0u8; 25]);
    assert_eq!(out.len(), end);

    let err = parser::parse(&out).unwrap_err();
    assert!(matches!(err, ImportError::Parse { .. }), "{err}");
}

/// `depth` records named `N`, each the only child of the one before.
fn nested_document(depth: usize) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.extend(7400u32.to_le_bytes());
    let end = out.len() + depth * 14 + 13;
    for _ in 0..depth {
        out.extend((end as u32).to_le_bytes());
        out.extend(0u32.to_le_bytes());
        out.extend(0u32.to_le_bytes());
        out.push(1);
        out.push(b'N');
    }
    out.extend([0u8; 13]);
    assert_eq!(out.len(), end);
    out
}

#[test]
fn test_deeply_nested_records() {
    let doc = parser::parse(&nested_document(16)).unwrap();
    let mut depth = 0;
    let mut r = &doc;
    while let Some(c) = r.children.first() {
        assert_eq!(c.name, "N");
        r = c;
        depth += 1;
    }
    assert_eq!(depth, 16);

    let err = parser::parse(&nested_document(100_000)).unwrap_err();
    assert!(matches!(err, ImportError::Parse { .. }), "{err}");
}
