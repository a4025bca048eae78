//! Local side of a repository
//!
//! All paths handed to [`LocalFileSystem`] are relative to the repository's
//! local root, the same form change events carry.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a sibling `*.reposync-tmp` file that
//!   is renamed over the target, so a crash never leaves a half-written file.
//! - **Checksums**: SHA-256 over the file content, computed on the blocking
//!   pool so large files do not stall the runtime.
//! - **Conflict copies**: `name (conflicted copy YYYY-MM-DD xxxxxxxx).ext`.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reposync_core::domain::ContentHash;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Suffix of in-progress download files
pub const TEMP_SUFFIX: &str = ".reposync-tmp";

/// Marker found in the names of conflict copies
const CONFLICT_MARKER: &str = " (conflicted copy ";

/// Returns true for names the sync must never pick up as user files
pub fn is_temporary_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX) || name.contains(CONFLICT_MARKER)
}

/// Name for a copy that preserves a locally modified file
///
/// `report.docx` becomes `report (conflicted copy 2026-02-07 a1b2c3d4).docx`.
pub fn conflict_name(original_name: &str) -> String {
    let date = Utc::now().format("%Y-%m-%d");
    let short = &Uuid::new_v4().simple().to_string()[..8];

    match original_name.rfind('.').filter(|&dot| dot > 0) {
        Some(dot) => {
            let (stem, ext) = original_name.split_at(dot);
            format!("{stem}{CONFLICT_MARKER}{date} {short}){ext}")
        }
        None => format!("{original_name}{CONFLICT_MARKER}{date} {short})"),
    }
}

/// Metadata of a local file or folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Filesystem operations rooted at a repository's local folder
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a relative path
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Relative form of an absolute path below the root
    pub fn relative(&self, absolute: &Path) -> Option<PathBuf> {
        absolute.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }

    pub async fn read(&self, relative: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.absolute(relative)).await
    }

    /// Replace the file's content via temp file + rename
    #[instrument(skip(self, data), fields(path = %relative.display(), bytes = data.len()))]
    pub async fn write_atomic(&self, relative: &Path, data: &[u8]) -> std::io::Result<()> {
        let target = self.absolute(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = target.clone().into_os_string();
        tmp.push(TEMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        debug!("write complete");
        Ok(())
    }

    /// Remove a file or a folder with its content; missing paths are fine
    pub async fn delete(&self, relative: &Path) -> std::io::Result<()> {
        let target = self.absolute(relative);
        let result = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    pub async fn create_dir(&self, relative: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.absolute(relative)).await
    }

    /// Stat a path; `None` if it does not exist
    pub async fn stat(&self, relative: &Path) -> std::io::Result<Option<LocalEntry>> {
        let metadata = match tokio::fs::metadata(self.absolute(relative)).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(Some(LocalEntry {
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified,
        }))
    }

    /// Move a file or folder; parents of the destination are created
    pub async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        let target = self.absolute(to);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.absolute(from), target).await
    }

    /// Move a file aside to a conflict copy next to it
    ///
    /// Returns the relative path of the copy.
    pub async fn conflict_copy(&self, relative: &Path) -> std::io::Result<PathBuf> {
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no file name"))?;
        let copy = relative.with_file_name(conflict_name(&name));
        tokio::fs::rename(self.absolute(relative), self.absolute(&copy)).await?;
        debug!(original = %relative.display(), copy = %copy.display(), "Created conflict copy");
        Ok(copy)
    }

    /// SHA-256 of the file content
    pub async fn checksum(&self, relative: &Path) -> std::io::Result<ContentHash> {
        let path = self.absolute(relative);
        tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Entries of a folder as `(name, entry)` pairs, temporary files left out
    pub async fn list_dir(&self, relative: &Path) -> std::io::Result<Vec<(String, LocalEntry)>> {
        let mut dir = match tokio::fs::read_dir(self.absolute(relative)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_temporary_name(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            entries.push((
                name,
                LocalEntry {
                    is_dir: metadata.is_dir(),
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                },
            ));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

/// Streamed SHA-256 of a file
pub fn sha256_file(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(ContentHash::sha256_from_bytes(&hasher.finalize()))
}

/// SHA-256 of an in-memory buffer
pub fn sha256_bytes(data: &[u8]) -> ContentHash {
    ContentHash::sha256_from_bytes(&Sha256::digest(data))
}
