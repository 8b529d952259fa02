// ABOUTME: Filesystem layout for one account's store: metadata file plus one directory per artifact kind.
// ABOUTME: Handles directory creation, room discovery, artifact removal, wiping and disk accounting.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::TMP_SUFFIX;

const METADATA_FILE: &str = "metadata.json";

/// Errors that can occur during layout operations.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid artifact name: {0}")]
    InvalidName(String),
}

impl LayoutError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The kinds of per-room artifact, each stored in its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Messages,
    LegacyMessages,
    Tokens,
    State,
    LegacyState,
    Summaries,
}

impl ArtifactKind {
    /// Kinds whose directories exist in a fresh store. Legacy directories
    /// are only ever read (and emptied) by migration.
    pub const CURRENT: [ArtifactKind; 4] = [
        ArtifactKind::Messages,
        ArtifactKind::Tokens,
        ArtifactKind::State,
        ArtifactKind::Summaries,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Messages => "messages_lz4",
            ArtifactKind::LegacyMessages => "messages",
            ArtifactKind::Tokens => "tokens",
            ArtifactKind::State => "state_lz4",
            ArtifactKind::LegacyState => "state",
            ArtifactKind::Summaries => "summaries",
        }
    }

    /// The older-encoding sibling of a current kind, if it has one.
    pub fn legacy(self) -> Option<ArtifactKind> {
        match self {
            ArtifactKind::Messages => Some(ArtifactKind::LegacyMessages),
            ArtifactKind::State => Some(ArtifactKind::LegacyState),
            _ => None,
        }
    }
}

/// Paths for a single account's store: `<home>/<account>/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(home: &Path, user_id: &str) -> Self {
        Self {
            root: home.join(escape_name(user_id)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn artifact(&self, kind: ArtifactKind, room_id: &str) -> PathBuf {
        self.dir(kind).join(escape_name(room_id))
    }

    /// Create the root and every current artifact directory.
    pub fn create_dir_tree(&self) -> Result<(), LayoutError> {
        for kind in ArtifactKind::CURRENT {
            let dir = self.dir(kind);
            fs::create_dir_all(&dir).map_err(|e| LayoutError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Delete the whole account directory. Missing directories are fine.
    pub fn wipe(&self) -> Result<(), LayoutError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LayoutError::io(&self.root, e)),
        }
    }

    /// Room ids with an artifact of `kind`. A missing directory yields none;
    /// leftover temp files from interrupted writes are skipped.
    pub fn list_rooms(&self, kind: ArtifactKind) -> Result<Vec<String>, LayoutError> {
        let dir = self.dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut rooms = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| LayoutError::io(&dir, e))? {
            let entry = entry.map_err(|e| LayoutError::io(&dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(TMP_SUFFIX) {
                tracing::debug!("skipping interrupted write {}", entry.path().display());
                continue;
            }
            rooms.push(unescape_name(&name)?);
        }
        rooms.sort();
        Ok(rooms)
    }

    /// Remove one artifact. Returns whether a file was actually deleted.
    pub fn remove_artifact(&self, kind: ArtifactKind, room_id: &str) -> Result<bool, LayoutError> {
        let path = self.artifact(kind, room_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LayoutError::io(&path, e)),
        }
    }

    /// Remove an artifact in both its current and legacy encodings.
    pub fn remove_all_encodings(&self, kind: ArtifactKind, room_id: &str) -> Result<(), LayoutError> {
        self.remove_artifact(kind, room_id)?;
        if let Some(legacy) = kind.legacy() {
            self.remove_artifact(legacy, room_id)?;
        }
        Ok(())
    }

    /// Total bytes of every file under the account directory, or 0 if it
    /// cannot be walked.
    pub fn disk_usage(&self) -> u64 {
        match directory_size(&self.root) {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!("failed to measure {}: {}", self.root.display(), e);
                0
            }
        }
    }
}

fn directory_size(dir: &Path) -> io::Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += directory_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Make an id safe to use as a single path component.
pub fn escape_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_name`].
pub fn unescape_name(name: &str) -> Result<String, LayoutError> {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest
            .get(pos + 1..pos + 3)
            .ok_or_else(|| LayoutError::InvalidName(name.to_string()))?;
        match code {
            "25" => out.push('%'),
            "2F" => out.push('/'),
            "5C" => out.push('\\'),
            _ => return Err(LayoutError::InvalidName(name.to_string())),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_dir_tree_makes_current_dirs_only() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        layout.create_dir_tree().unwrap();

        for kind in ArtifactKind::CURRENT {
            assert!(layout.dir(kind).is_dir(), "{:?} should exist", kind);
        }
        assert!(!layout.dir(ArtifactKind::LegacyMessages).exists());
        assert!(!layout.dir(ArtifactKind::LegacyState).exists());
    }

    #[test]
    fn accounts_are_partitioned() {
        let dir = TempDir::new().unwrap();
        let alice = Layout::new(dir.path(), "@alice:hs");
        let bob = Layout::new(dir.path(), "@bob:hs");
        assert_ne!(alice.root(), bob.root());
        assert!(alice.root().starts_with(dir.path()));
    }

    #[test]
    fn list_rooms_round_trips_escaped_names() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        layout.create_dir_tree().unwrap();

        for room in ["!a:hs", "!odd/name%:hs", "!r:server.tmp"] {
            fs::write(layout.artifact(ArtifactKind::Tokens, room), b"\"t\"").unwrap();
        }
        fs::write(layout.dir(ArtifactKind::Tokens).join("!b:hs%tmp"), b"").unwrap();

        let rooms = layout.list_rooms(ArtifactKind::Tokens).unwrap();
        assert_eq!(
            rooms,
            vec![
                "!a:hs".to_string(),
                "!odd/name%:hs".to_string(),
                "!r:server.tmp".to_string()
            ]
        );
    }

    #[test]
    fn list_rooms_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        assert!(layout.list_rooms(ArtifactKind::LegacyMessages).unwrap().is_empty());
    }

    #[test]
    fn remove_all_encodings_deletes_both_files() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        layout.create_dir_tree().unwrap();
        fs::create_dir_all(layout.dir(ArtifactKind::LegacyMessages)).unwrap();
        fs::write(layout.artifact(ArtifactKind::Messages, "!r:hs"), b"new").unwrap();
        fs::write(layout.artifact(ArtifactKind::LegacyMessages, "!r:hs"), b"old").unwrap();

        layout.remove_all_encodings(ArtifactKind::Messages, "!r:hs").unwrap();

        assert!(!layout.artifact(ArtifactKind::Messages, "!r:hs").exists());
        assert!(!layout.artifact(ArtifactKind::LegacyMessages, "!r:hs").exists());
        assert!(!layout.remove_artifact(ArtifactKind::Messages, "!r:hs").unwrap());
    }

    #[test]
    fn disk_usage_sums_nested_files_and_wipe_resets_it() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path(), "@alice:hs");
        layout.create_dir_tree().unwrap();
        fs::write(layout.metadata_file(), vec![0u8; 10]).unwrap();
        fs::write(layout.artifact(ArtifactKind::State, "!r:hs"), vec![0u8; 32]).unwrap();

        assert_eq!(layout.disk_usage(), 42);

        layout.wipe().unwrap();
        assert!(!layout.root().exists());
        assert_eq!(layout.disk_usage(), 0);
        layout.wipe().unwrap();
    }

    #[test]
    fn unescape_rejects_bad_sequences() {
        assert!(unescape_name("bad%zz").is_err());
        assert!(unescape_name("trailing%2").is_err());
    }
}
