// ABOUTME: Artifact encodings: a tagged, lz4-compressed current schema and the plain-JSON legacy schema.
// ABOUTME: Decoding reads the schema tag first; writes go through an atomic temp-file rename.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Leading bytes of every current-schema artifact.
const MAGIC: &[u8; 4] = b"RSTO";

/// Version byte following the magic. Bump together with a decode branch.
pub const SCHEMA_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1;

/// Suffix of in-flight writes. Escaped artifact names never contain a bare
/// `%` followed by anything but a hex pair, so this cannot collide with a room.
pub const TMP_SUFFIX: &str = "%tmp";

/// Errors that can occur while encoding, decoding or writing artifacts.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decompression error: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u8),
}

/// Which encoding an artifact was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Untagged, uncompressed JSON from older releases.
    Legacy,
    /// Tagged lz4-compressed JSON at the given schema version.
    Compressed(u8),
}

impl Schema {
    /// Identify the schema from the artifact's leading bytes.
    pub fn detect(bytes: &[u8]) -> Schema {
        match bytes {
            [m0, m1, m2, m3, version, ..] if [*m0, *m1, *m2, *m3] == *MAGIC => {
                Schema::Compressed(*version)
            }
            _ => Schema::Legacy,
        }
    }

    pub fn is_legacy(self) -> bool {
        self == Schema::Legacy
    }
}

/// Encode in the current schema: header then lz4-compressed JSON.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(value)?;
    let compressed = lz4_flex::compress_prepend_size(&json);
    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.push(SCHEMA_VERSION);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Encode as plain JSON. Used for small artifacts that are never compressed
/// and for the legacy schema.
pub fn encode_plain<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode either schema, reporting which one was found.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, Schema), CodecError> {
    let schema = Schema::detect(bytes);
    let value = match schema {
        Schema::Legacy => serde_json::from_slice(bytes)?,
        Schema::Compressed(SCHEMA_VERSION) => {
            let json = lz4_flex::decompress_size_prepended(&bytes[HEADER_LEN..])?;
            serde_json::from_slice(&json)?
        }
        Schema::Compressed(other) => return Err(CodecError::UnsupportedSchema(other)),
    };
    Ok((value, schema))
}

/// Read and decode the artifact at `path`.
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<(T, Schema), CodecError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Write `bytes` to `path` atomically (write to a temp sibling, fsync, rename).
/// Creates the parent directory if it does not exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CodecError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(TMP_SUFFIX);
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample() -> BTreeMap<String, Vec<u32>> {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec![1, 2, 3]);
        map.insert("b".to_string(), (0..500).collect());
        map
    }

    #[test]
    fn current_encoding_is_tagged_and_decodes() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(Schema::detect(&bytes), Schema::Compressed(SCHEMA_VERSION));

        let (value, schema): (BTreeMap<String, Vec<u32>>, _) = decode(&bytes).unwrap();
        assert_eq!(value, sample());
        assert!(!schema.is_legacy());
    }

    #[test]
    fn plain_json_decodes_as_legacy() {
        let bytes = encode_plain(&sample()).unwrap();
        let (value, schema): (BTreeMap<String, Vec<u32>>, _) = decode(&bytes).unwrap();
        assert_eq!(value, sample());
        assert!(schema.is_legacy());
    }

    #[test]
    fn future_schema_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[MAGIC.len()] = SCHEMA_VERSION + 1;
        let result: Result<(BTreeMap<String, Vec<u32>>, Schema), _> = decode(&bytes);
        assert!(matches!(result, Err(CodecError::UnsupportedSchema(_))));
    }

    #[test]
    fn truncated_artifact_fails_to_decode() {
        let bytes = encode(&sample()).unwrap();
        let cut = &bytes[..bytes.len() / 2];
        let result: Result<(BTreeMap<String, Vec<u32>>, Schema), _> = decode(cut);
        assert!(result.is_err());
    }

    #[test]
    fn write_atomic_creates_parent_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("artifact");

        write_atomic(&path, b"payload").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert!(!dir.path().join("deep").join("artifact%tmp").exists());
    }
}
