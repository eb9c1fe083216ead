use super::record::{Data, Record};
use crate::error::{ImportError, Result};
use std::mem::size_of;

/// Magic binary length.
pub(crate) const MAGIC_LEN: usize = 23;
/// Magic binary.
pub(crate) const MAGIC: &[u8; MAGIC_LEN] = b"Kaydara FBX Binary  \x00\x1a\x00";
/// Only the leading text is validated, some exporters write different padding after it.
const MAGIC_TEXT_LEN: usize = 18;

/// From this version on offsets, counts and lengths in record headers are 64 bits wide.
pub(crate) const FIRST_64_BIT_VERSION: u32 = 7500;

/// Separator between an object's name and its class in binary strings.
const NAMESPACE_SEP: &str = "\x00\x01";

/// Deepest record nesting accepted from either format.
pub(crate) const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Key(String),
    Data(Data),
    ScopeStart,
    ScopeEnd,
}

/// Returns true if the bytes begin like a binary FBX document.
pub fn is_binary(src: &[u8]) -> bool {
    src.len() >= MAGIC_TEXT_LEN && src[..MAGIC_TEXT_LEN] == MAGIC[..MAGIC_TEXT_LEN]
}

/// Parses a binary FBX document into its node tree.
/// The returned root record is nameless and holds the top level records as children.
pub fn parse(src: &[u8]) -> Result<Record> {
    let tokens = tokenize_binary(src)?;
    parse_tokens(tokens)
}

/// Builds the record tree from a flat token stream.
pub fn parse_tokens(tokens: impl IntoIterator<Item = Token>) -> Result<Record> {
    let mut tokens = tokens.into_iter();
    let mut root = Record::default();
    root.children = parse_scope(&mut tokens, 0)?;
    Ok(root)
}

// parses the token stream until a scope end, returning the records of that scope.
fn parse_scope(tokens: &mut impl Iterator<Item = Token>, depth: usize) -> Result<Vec<Record>> {
    if depth > MAX_DEPTH {
        return Err(ImportError::parse(0, "records nested too deeply"));
    }
    let nested = depth > 0;
    let mut out: Vec<Record> = vec![];
    while let Some(t) = tokens.next() {
        match t {
            Token::Key(k) => out.push(Record {
                name: k,
                ..Default::default()
            }),
            Token::Data(d) => match out.last_mut() {
                Some(r) => r.props.push(d),
                None => return Err(ImportError::parse(0, "value without a record name")),
            },
            Token::ScopeStart => {
                let children = parse_scope(tokens, depth + 1)?;
                match out.last_mut() {
                    Some(r) => r.children.extend(children),
                    None => return Err(ImportError::parse(0, "scope without a record name")),
                }
            }
            Token::ScopeEnd if nested => return Ok(out),
            Token::ScopeEnd => return Err(ImportError::parse(0, "unbalanced scope end")),
        }
    }
    if nested {
        return Err(ImportError::parse(0, "unterminated scope"));
    }
    Ok(out)
}

/// Flattens `Name\x00\x01Class` into `Class::Name`.
pub(crate) fn flatten_namespace(s: &str) -> String {
    if !s.contains(NAMESPACE_SEP) {
        return s.to_string();
    }
    s.rsplit(NAMESPACE_SEP).collect::<Vec<_>>().join("::")
}

struct Reader<'a> {
    src: &'a [u8],
    pos: usize,
    is_64_bit: bool,
}

macro_rules! read_word {
    ($r: expr, $t: ty) => {{
        let bytes = $r.take(size_of::<$t>())?;
        let mut v = [0u8; size_of::<$t>()];
        v.copy_from_slice(bytes);
        <$t>::from_le_bytes(v)
    }};
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.src.len())
            .ok_or_else(|| {
                ImportError::parse(self.pos, format!("wanted {len} bytes past end of data"))
            })?;
        let out = &self.src[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Offset, count and length fields, whose width depends on the version.
    fn read_header_word(&mut self) -> Result<u64> {
        Ok(if self.is_64_bit {
            read_word!(self, u64)
        } else {
            read_word!(self, u32) as u64
        })
    }

    /// A header word used as an offset or length into the source.
    fn read_header_len(&mut self) -> Result<usize> {
        let at = self.pos;
        let v = self.read_header_word()?;
        usize::try_from(v).map_err(|_| ImportError::parse(at, format!("length {v} out of range")))
    }

    fn header_len(&self) -> usize {
        if self.is_64_bit {
            size_of::<u64>() * 3 + 1
        } else {
            size_of::<u32>() * 3 + 1
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let len = read_word!(self, u32) as usize;
        let buf = self.take(len)?;
        Ok(flatten_namespace(&String::from_utf8_lossy(buf)))
    }

    fn read_array<T, const N: usize>(&mut self, from_le: impl Fn([u8; N]) -> T) -> Result<Vec<T>> {
        let start = self.pos;
        let len = read_word!(self, u32) as usize;
        let enc = read_word!(self, u32);
        let comp_len = read_word!(self, u32) as usize;
        let data = self.take(comp_len)?;
        let byte_len = len.checked_mul(N).ok_or_else(|| {
            ImportError::parse(start, format!("array length {len} out of range"))
        })?;

        let inflated;
        let raw = match enc {
            0 => data,
            1 => {
                // never inflate past what the array declares
                let options = zune_inflate::DeflateOptions::default().set_limit(byte_len);
                let mut decoder = zune_inflate::DeflateDecoder::new_with_options(data, options);
                inflated = decoder
                    .decode_zlib()
                    .map_err(|e| ImportError::Decompress(format!("{e:?}")))?;
                &inflated[..]
            }
            e => {
                return Err(ImportError::UnsupportedFormat(format!(
                    "array encoding {e} at offset {start}"
                )));
            }
        };
        if raw.len() != byte_len {
            let err = format!(
                "array at offset {start} declares {len} elements but holds {} bytes",
                raw.len()
            );
            return Err(if enc == 1 {
                ImportError::Decompress(err)
            } else {
                ImportError::parse(start, err)
            });
        }
        Ok(raw
            .chunks_exact(N)
            .map(|c| {
                let mut v = [0u8; N];
                v.copy_from_slice(c);
                from_le(v)
            })
            .collect())
    }

    fn read_property(&mut self) -> Result<Data> {
        let at = self.pos;
        let kind = read_word!(self, u8);
        Ok(match kind {
            b'Y' => Data::I16(read_word!(self, i16)),
            b'C' => Data::Bool(read_word!(self, u8) != 0),
            b'I' => Data::I32(read_word!(self, i32)),
            b'F' => Data::F32(read_word!(self, f32)),
            b'D' => Data::F64(read_word!(self, f64)),
            b'L' => Data::I64(read_word!(self, i64)),

            b'f' => Data::F32Arr(self.read_array(f32::from_le_bytes)?),
            b'd' => Data::F64Arr(self.read_array(f64::from_le_bytes)?),
            b'l' => Data::I64Arr(self.read_array(i64::from_le_bytes)?),
            b'i' => Data::I32Arr(self.read_array(i32::from_le_bytes)?),
            b'b' | b'c' => Data::BoolArr(self.read_array(|[b]: [u8; 1]| b != 0)?),

            b'S' => Data::String(self.read_string()?),
            b'R' => {
                let len = read_word!(self, u32) as usize;
                Data::Binary(self.take(len)?.to_vec())
            }
            c => {
                return Err(ImportError::parse(
                    at,
                    format!("unknown property type {:?}", c as char),
                ));
            }
        })
    }

    // Reads one record and its nested records.
    // Returns false when it hit the null record terminating the current list.
    fn read_record(&mut self, output_tokens: &mut Vec<Token>, depth: usize) -> Result<bool> {
        let start = self.pos;
        let end_offset = self.read_header_len()?;
        let prop_count = self.read_header_word()?;
        let prop_len = self.read_header_len()?;
        let name_len = read_word!(self, u8) as usize;

        if end_offset == 0 {
            return Ok(false);
        }
        if end_offset < start || end_offset > self.src.len() {
            return Err(ImportError::parse(
                start,
                format!("record end offset {end_offset} out of bounds"),
            ));
        }

        if depth > MAX_DEPTH {
            return Err(ImportError::parse(start, "records nested too deeply"));
        }

        let name = String::from_utf8_lossy(self.take(name_len)?).into_owned();
        output_tokens.push(Token::Key(name));

        let props_start = self.pos;
        if props_start
            .checked_add(prop_len)
            .is_none_or(|props_end| props_end > end_offset)
        {
            return Err(ImportError::parse(start, "property list exceeds its record"));
        }
        for _ in 0..prop_count {
            let d = self.read_property()?;
            output_tokens.push(Token::Data(d));
        }
        if self.pos > end_offset {
            return Err(ImportError::parse(start, "properties exceed their record"));
        }

        if end_offset - self.pos >= self.header_len() {
            output_tokens.push(Token::ScopeStart);
            while end_offset.saturating_sub(self.pos) >= self.header_len() {
                if !self.read_record(output_tokens, depth + 1)? {
                    break;
                }
            }
            if self.pos > end_offset {
                return Err(ImportError::parse(start, "nested record exceeds its parent"));
            }
            output_tokens.push(Token::ScopeEnd);
        }

        // nested lists end with padding and a null record, skip whatever is left
        self.pos = end_offset;
        Ok(true)
    }
}

/// Reads the format version out of a binary document header.
pub fn binary_version(src: &[u8]) -> Result<u32> {
    if !is_binary(src) {
        return Err(ImportError::UnsupportedFormat(
            "missing binary FBX magic".to_string(),
        ));
    }
    let mut r = Reader {
        src,
        pos: MAGIC_LEN,
        is_64_bit: false,
    };
    Ok(read_word!(r, u32))
}

pub fn tokenize_binary(src: &[u8]) -> Result<Vec<Token>> {
    let version = binary_version(src)?;
    let mut r = Reader {
        src,
        pos: MAGIC_LEN + size_of::<u32>(),
        is_64_bit: version >= FIRST_64_BIT_VERSION,
    };

    let mut output_tokens = vec![];
    while r.src.len() - r.pos >= r.header_len() {
        if !r.read_record(&mut output_tokens, 0)? {
            break;
        }
    }

    Ok(output_tokens)
}

#[test]
fn test_flatten_namespace() {
    assert_eq!(flatten_namespace("Cube\x00\x01Model"), "Model::Cube");
    assert_eq!(flatten_namespace("Plain"), "Plain");
    assert_eq!(flatten_namespace("a\x00\x01b\x00\x01c"), "c::b::a");
    assert_eq!(flatten_namespace(""), "");
}

#[test]
fn test_parse_tokens() {
    let tokens = vec![
        Token::Key("Objects".into()),
        Token::ScopeStart,
        Token::Key("Model".into()),
        Token::Data(Data::I64(1)),
        Token::Data(Data::str("Model::A")),
        Token::Key("Model".into()),
        Token::Data(Data::I64(2)),
        Token::ScopeEnd,
        Token::Key("Connections".into()),
    ];
    let root = parse_tokens(tokens).unwrap();
    assert_eq!(root.children.len(), 2);
    let objects = &root.children[0];
    assert_eq!(objects.children.len(), 2);
    assert_eq!(objects.children[0].props.len(), 2);
    assert_eq!(objects.children[1].id(), Some(2));
}

#[test]
fn test_unbalanced_tokens() {
    assert!(parse_tokens(vec![Token::Data(Data::I32(0))]).is_err());
    assert!(parse_tokens(vec![Token::Key("A".into()), Token::ScopeStart]).is_err());
    assert!(parse_tokens(vec![Token::ScopeEnd]).is_err());
}

#[test]
fn test_rejects_bad_magic() {
    let mut bytes = b"Kaydara FBX Binery  \x00\x1a\x00".to_vec();
    bytes.extend_from_slice(&7400u32.to_le_bytes());
    assert!(matches!(parse(&bytes), Err(ImportError::UnsupportedFormat(_))));
}

#[test]
fn test_deep_token_nesting() {
    let mut tokens = vec![];
    for _ in 0..4 * MAX_DEPTH {
        tokens.push(Token::Key("N".into()));
        tokens.push(Token::ScopeStart);
    }
    tokens.extend(std::iter::repeat_n(Token::ScopeEnd, 4 * MAX_DEPTH));
    let err = parse_tokens(tokens).unwrap_err();
    assert!(matches!(err, ImportError::Parse { .. }), "{err}");

    let mut tokens = vec![];
    for _ in 0..8 {
        tokens.push(Token::Key("N".into()));
        tokens.push(Token::ScopeStart);
    }
    tokens.extend(std::iter::repeat_n(Token::ScopeEnd, 8));
    assert!(parse_tokens(tokens).is_ok());
}
