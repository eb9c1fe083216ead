use super::parser::{FIRST_64_BIT_VERSION, MAGIC};
use super::record::{Data, Record};
use std::io::{self, Seek, SeekFrom, Write};

/// Serializes a node tree into the binary encoding.
/// `root` is the nameless container returned by the parsers; its children are written as the
/// top level records. Arrays are written uncompressed.
pub fn write_binary(root: &Record, version: u32, mut w: impl Write + Seek) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&version.to_le_bytes())?;
    let is_64_bit = version >= FIRST_64_BIT_VERSION;
    for r in &root.children {
        write_record(r, is_64_bit, &mut w)?;
    }
    write_null_record(is_64_bit, &mut w)?;
    w.flush()
}

macro_rules! write_word {
    ($dst:expr, $ty: ty, $w: expr) => {{
        $dst.write_all(&($w as $ty).to_le_bytes())?;
        std::mem::size_of::<$ty>()
    }};
}

fn write_header_word(w: &mut impl Write, is_64_bit: bool, v: u64) -> io::Result<usize> {
    Ok(if is_64_bit {
        write_word!(w, u64, v)
    } else {
        write_word!(w, u32, v)
    })
}

fn write_null_record(is_64_bit: bool, w: &mut impl Write) -> io::Result<()> {
    let len = if is_64_bit { 8 * 3 + 1 } else { 4 * 3 + 1 };
    w.write_all(&vec![0u8; len])
}

fn write_data(dst: &mut impl Write, d: &Data) -> io::Result<usize> {
    macro_rules! write_arr {
        ($ty: ty, $arr: expr) => {{
            let mut n = write_word!(dst, u32, $arr.len());
            // encoding: raw
            n += write_word!(dst, u32, 0);
            n += write_word!(dst, u32, $arr.len() * std::mem::size_of::<$ty>());
            for v in $arr {
                n += write_word!(dst, $ty, *v);
            }
            n
        }};
    }
    let c = match d {
        Data::I16(_) => b'Y',
        Data::Bool(_) => b'C',
        Data::I32(_) => b'I',
        Data::I64(_) => b'L',
        Data::F32(_) => b'F',
        Data::F64(_) => b'D',
        Data::String(_) => b'S',
        Data::Binary(_) => b'R',
        Data::I32Arr(_) => b'i',
        Data::I64Arr(_) => b'l',
        Data::F32Arr(_) => b'f',
        Data::F64Arr(_) => b'd',
        Data::BoolArr(_) => b'b',
    };
    let mut n = write_word!(dst, u8, c);
    n += match d {
        Data::I16(v) => write_word!(dst, i16, *v),
        Data::Bool(v) => write_word!(dst, u8, *v),
        Data::I32(v) => write_word!(dst, i32, *v),
        Data::I64(v) => write_word!(dst, i64, *v),
        Data::F32(v) => write_word!(dst, f32, *v),
        Data::F64(v) => write_word!(dst, f64, *v),
        Data::String(s) => write_bytes(dst, &unflatten_namespace(s))?,
        Data::Binary(b) => write_bytes(dst, b)?,
        Data::I32Arr(arr) => write_arr!(i32, arr),
        Data::I64Arr(arr) => write_arr!(i64, arr),
        Data::F32Arr(arr) => write_arr!(f32, arr),
        Data::F64Arr(arr) => write_arr!(f64, arr),
        Data::BoolArr(arr) => write_arr!(u8, arr),
    };
    Ok(n)
}

fn write_bytes(dst: &mut impl Write, b: &[u8]) -> io::Result<usize> {
    let n = write_word!(dst, u32, b.len());
    dst.write_all(b)?;
    Ok(n + b.len())
}

/// Inverse of the decoder's namespace flattening: `Class::Name` becomes `Name\x00\x01Class`.
fn unflatten_namespace(s: &str) -> Vec<u8> {
    match s.split_once("::") {
        Some((class, name)) => [name.as_bytes(), b"\x00\x01", class.as_bytes()].concat(),
        None => s.as_bytes().to_vec(),
    }
}

fn write_record(r: &Record, is_64_bit: bool, w: &mut (impl Write + Seek)) -> io::Result<()> {
    if r.name.len() > u8::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("record name `{}` is too long", r.name),
        ));
    }
    let mut prop_len = 0;
    for d in &r.props {
        prop_len += write_data(&mut io::sink(), d)?;
    }

    const OFFSET_PLACEHOLDER: u64 = 0;
    let pos_to_write = w.stream_position()?;
    write_header_word(w, is_64_bit, OFFSET_PLACEHOLDER)?;
    write_header_word(w, is_64_bit, r.props.len() as u64)?;
    write_header_word(w, is_64_bit, prop_len as u64)?;
    write_word!(w, u8, r.name.len());
    w.write_all(r.name.as_bytes())?;

    for d in &r.props {
        write_data(w, d)?;
    }
    if !r.children.is_empty() {
        for c in &r.children {
            write_record(c, is_64_bit, w)?;
        }
        write_null_record(is_64_bit, w)?;
    }

    let end = w.stream_position()?;
    w.seek(SeekFrom::Start(pos_to_write))?;
    write_header_word(w, is_64_bit, end)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[cfg(test)]
use crate::fbx::parser;
#[cfg(test)]
use std::io::Cursor;

#[cfg(test)]
fn sample() -> Record {
    Record::new(
        "",
        vec![],
        vec![
            Record::new(
                "Objects",
                vec![],
                vec![Record::new(
                    "Geometry",
                    vec![Data::I64(5), Data::str("Geometry::Cube"), Data::str("Mesh")],
                    vec![
                        Record::new("Vertices", vec![Data::F64Arr(vec![0., 1., 2.])], vec![]),
                        Record::new(
                            "PolygonVertexIndex",
                            vec![Data::I32Arr(vec![0, 1, -3])],
                            vec![],
                        ),
                    ],
                )],
            ),
            Record::new(
                "Flags",
                vec![
                    Data::Bool(true),
                    Data::I16(-2),
                    Data::F32(0.5),
                    Data::Binary(vec![1, 2]),
                    Data::BoolArr(vec![true, false]),
                ],
                vec![],
            ),
        ],
    )
}

#[test]
fn test_roundtrip_both_header_widths() {
    for version in [7400, 7500] {
        let mut out = Cursor::new(vec![]);
        write_binary(&sample(), version, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(parser::binary_version(&bytes).unwrap(), version);
        let back = parser::parse(&bytes).unwrap();
        assert_eq!(back, sample(), "version {version}");
    }
}

#[test]
fn test_unflatten_namespace() {
    assert_eq!(unflatten_namespace("Model::Cube"), b"Cube\x00\x01Model");
    assert_eq!(unflatten_namespace("Cube"), b"Cube");
}
