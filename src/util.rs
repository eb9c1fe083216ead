use std::path::{Path, PathBuf};

/// Whether a texture file name has a raster extension we can hand to an image decoder.
pub fn is_supported_texture(file_name: &str) -> bool {
    let Some(ext) = Path::new(&normalize_separators(file_name))
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
    else {
        return false;
    };
    image::ImageFormat::from_extension(ext).is_some()
}

/// Whether a blob of embedded media looks like an image we can decode.
pub fn is_supported_image_data(data: &[u8]) -> bool {
    image::guess_format(data).is_ok()
}

/// FBX files authored on Windows store `\` separated paths.
pub fn normalize_separators(p: &str) -> String {
    p.replace('\\', "/")
}

/// Last path component of a possibly Windows style path.
pub fn base_name(p: &str) -> String {
    let p = normalize_separators(p);
    match p.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => p,
    }
}

/// Resolves a document relative path against the document's directory.
pub fn resolve_relative(root: &Path, rel: &str) -> PathBuf {
    let rel = normalize_separators(rel);
    let rel = Path::new(&rel);
    if rel.is_absolute() {
        return rel.to_path_buf();
    }
    root.join(rel)
}

/// File formats supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// FBX Binary Format (.fbx)
    FBXBinary,
    /// FBX Text Format (.fbx)
    FBXText,
    /// Other unsupported formats
    Unknown,
}

/// Sniffs the encoding of an FBX document from its leading bytes.
pub fn detect_format(src: &[u8]) -> FileFormat {
    if crate::fbx::parser::is_binary(src) {
        return FileFormat::FBXBinary;
    }
    match std::str::from_utf8(&src[..src.len().min(1024)]) {
        Ok(s) if s.trim_start().starts_with(';') || s.contains(':') => FileFormat::FBXText,
        // a multi-byte char may straddle the cut
        Err(e) if e.valid_up_to() > 0 => FileFormat::FBXText,
        _ => FileFormat::Unknown,
    }
}

#[test]
fn test_supported_texture_extensions() {
    assert!(is_supported_texture("wood.png"));
    assert!(is_supported_texture("C:\\textures\\Wood.JPG"));
    assert!(is_supported_texture("brick.tga"));
    assert!(!is_supported_texture("shader.fx"));
    assert!(!is_supported_texture("noext"));
}

#[test]
fn test_paths() {
    assert_eq!(base_name("C:\\a\\b\\c.png"), "c.png");
    assert_eq!(base_name("c.png"), "c.png");
    assert_eq!(
        resolve_relative(Path::new("/root"), "tex\\c.png"),
        PathBuf::from("/root/tex/c.png")
    );
}

#[test]
fn test_detect_format() {
    let mut bin = crate::fbx::parser::MAGIC.to_vec();
    bin.extend_from_slice(&7400u32.to_le_bytes());
    assert_eq!(detect_format(&bin), FileFormat::FBXBinary);
    assert_eq!(detect_format(b"; FBX\nObjects: {\n}"), FileFormat::FBXText);
    assert_eq!(detect_format(&[0xff, 0xfe, 0x00]), FileFormat::Unknown);
}
