//! The `.current_session` pointer file kept next to the store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

pub const POINTER_FILE_NAME: &str = ".current_session";

#[derive(Debug, Clone)]
pub struct SessionPointer {
    path: PathBuf,
}

impl SessionPointer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Pointer file that sits beside the store at `db_path`.
    pub fn for_database(db_path: &Path) -> Self {
        let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(dir.join(POINTER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active session id, if any. An empty file counts as no session.
    pub fn read(&self) -> anyhow::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok(if id.is_empty() { None } else { Some(id.to_string()) })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    pub fn write(&self, session_id: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, session_id)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!("Session pointer set to {}", session_id);
        Ok(())
    }

    /// Remove the pointer. Returns whether one existed.
    pub fn clear(&self) -> anyhow::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_lives_beside_database() {
        let pointer = SessionPointer::for_database(Path::new("/proj/.agent/brain/memory.db"));
        assert_eq!(pointer.path(), Path::new("/proj/.agent/brain/.current_session"));
    }

    #[test]
    fn test_write_read_clear() {
        let dir = tempfile::tempdir().unwrap();
        let pointer = SessionPointer::for_database(&dir.path().join("brain").join("memory.db"));

        assert_eq!(pointer.read().unwrap(), None);
        pointer.write("abc-123").unwrap();
        assert_eq!(pointer.read().unwrap().as_deref(), Some("abc-123"));

        assert!(pointer.clear().unwrap());
        assert!(!pointer.clear().unwrap());
        assert_eq!(pointer.read().unwrap(), None);
    }

    #[test]
    fn test_blank_pointer_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let pointer = SessionPointer::new(dir.path().join(POINTER_FILE_NAME));
        std::fs::write(pointer.path(), "  \n").unwrap();
        assert_eq!(pointer.read().unwrap(), None);
    }
}
