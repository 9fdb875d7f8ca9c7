//! Script text buffers.
//!
//! A buffer is either in-memory or backed by a file on disk. External buffers
//! are reloaded by the change detector when the file's modification time
//! advances; the reloaded content is written back into the buffer.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identity of a text buffer, used as a map key instead of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_source_id() -> SourceId {
    SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
}

/// A script text buffer.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    id: SourceId,
    name: String,
    content: String,
    path: Option<PathBuf>,
}

/// Buffers are shared between the host, the watcher and the orchestrator.
pub type SharedText = Rc<RefCell<TextBuffer>>;

impl TextBuffer {
    /// Create a buffer that lives only in memory.
    pub fn in_memory(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: next_source_id(),
            name: name.into(),
            content: content.into(),
            path: None,
        }
    }

    /// Create a buffer backed by a file, reading its current content.
    pub fn external(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            id: next_source_id(),
            name,
            content,
            path: Some(path),
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Replace the in-memory content (an edit, or a write-back after reload).
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    pub fn is_external(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Point the buffer at a different file (or detach it from disk).
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    /// Modification time of the backing file.
    pub fn modified_time(&self) -> io::Result<SystemTime> {
        let path = self.path.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Text '{}' is not an external file", self.name),
            )
        })?;
        std::fs::metadata(path)?.modified()
    }

    /// Reload the content from the backing file.
    pub fn reload(&mut self) -> io::Result<()> {
        let path = self.path.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Text '{}' is not an external file", self.name),
            )
        })?;
        let content = std::fs::read_to_string(path)?;
        log::debug!("Reloaded text {}", path.display());
        self.content = content;
        Ok(())
    }

    pub fn into_shared(self) -> SharedText {
        Rc::new(RefCell::new(self))
    }
}

/// The host's collection of text buffers, keyed by identity.
#[derive(Debug, Default, Clone)]
pub struct TextLibrary {
    texts: BTreeMap<SourceId, SharedText>,
}

impl TextLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer and return its identity.
    pub fn insert(&mut self, text: TextBuffer) -> SourceId {
        let id = text.id();
        self.texts.insert(id, text.into_shared());
        id
    }

    pub fn get(&self, id: SourceId) -> Option<SharedText> {
        self.texts.get(&id).cloned()
    }

    pub fn remove(&mut self, id: SourceId) -> Option<SharedText> {
        self.texts.remove(&id)
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.texts.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.texts.keys().copied()
    }
}
