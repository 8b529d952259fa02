// ABOUTME: Loads and saves the per-account metadata record that gates trust in the rest of the store.
// ABOUTME: Any read or decode problem is reported so the caller can discard the store and start over.

use roomstore_core::Metadata;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::layout::Layout;

/// Errors that can occur while reading or writing metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Read the metadata record. Returns `None` when no record has been written.
pub fn load_metadata(layout: &Layout) -> Result<Option<Metadata>, MetadataError> {
    let path = layout.metadata_file();
    if !path.exists() {
        return Ok(None);
    }

    let (mut metadata, _): (Metadata, _) = codec::read_artifact(&path)?;
    metadata.normalize();
    Ok(Some(metadata))
}

/// Replace the metadata record on disk.
pub fn save_metadata(layout: &Layout, metadata: &Metadata) -> Result<(), MetadataError> {
    let bytes = codec::encode_plain(metadata)?;
    codec::write_atomic(&layout.metadata_file(), &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomstore_core::Credentials;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn metadata_round_trip() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        let mut metadata = Metadata::new(&Credentials::new("@alice:hs", "secret"), 2);
        metadata.event_stream_token = Some("s100".to_string());

        save_metadata(&layout, &metadata).unwrap();
        let loaded = load_metadata(&layout).unwrap().expect("should find metadata");

        assert_eq!(loaded, metadata);
    }

    #[test]
    fn missing_metadata_is_none() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        assert!(load_metadata(&layout).unwrap().is_none());
    }

    #[test]
    fn garbage_metadata_is_an_error() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        layout.create_dir_tree().unwrap();
        fs::write(layout.metadata_file(), b"{\"user_id\": ").unwrap();

        assert!(load_metadata(&layout).is_err());
    }
}
