//! Per-run local workspace.
//!
//! A [`Workspace`] owns a uniquely named temporary directory. The directory is
//! removed when the value is dropped, on every exit path of the run, and a
//! directory that is already gone is not an error.

use std::io;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use pipeline::content::ensure_trailing_newline;
use pipeline::{RepoPath, RequestId};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Maximum number of entries included in a tree listing.
pub const MAX_TREE_ENTRIES: usize = 2_000;

/// Exclusive checkout directory for one pipeline run.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    checkout: PathBuf,
}

impl Workspace {
    /// Creates a fresh directory under `root` named after `request_id`.
    pub fn create(root: &Path, request_id: RequestId) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("auto-pr-bot-{}-", request_id.short()))
            .tempdir_in(root)?;
        let checkout = dir.path().join("repo");
        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir, checkout })
    }

    /// Where the repository is cloned. Does not exist until the clone runs.
    pub fn checkout(&self) -> &Path {
        &self.checkout
    }

    /// Root of the temporary directory.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Renders the checkout as an indented tree for the model.
    pub async fn tree(&self) -> io::Result<String> {
        let checkout = self.checkout.clone();
        tokio::task::spawn_blocking(move || list_tree(&checkout, MAX_TREE_ENTRIES))
            .await
            .map_err(io::Error::other)?
    }

    /// Reads a repository file as UTF-8.
    pub async fn read_file(&self, path: &RepoPath) -> io::Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(full).await
    }

    /// Writes `content` to `path`, creating parent directories and ending
    /// non-empty content with a newline.
    pub async fn write_file(&self, path: &RepoPath, content: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, ensure_trailing_newline(content)).await?;
        debug!(path = %path, bytes = content.len(), "file written");
        Ok(())
    }

    fn resolve(&self, path: &RepoPath) -> io::Result<PathBuf> {
        if !path.is_contained() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes the repository: {path}"),
            ));
        }
        Ok(self.checkout.join(path.as_str()))
    }
}

/// Lists `root` depth-first, two spaces of indent per level, directories
/// suffixed with `/`, `.git` skipped, entries sorted by name.
pub fn list_tree(root: &Path, max_entries: usize) -> io::Result<String> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut out = String::new();
    let mut listed = 0usize;
    let mut omitted = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable tree entry");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        if listed >= max_entries {
            omitted += 1;
            continue;
        }
        let indent = "  ".repeat(entry.depth() - 1);
        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        out.push_str(&indent);
        out.push_str(&name);
        if is_dir {
            out.push('/');
        }
        out.push('\n');
        listed += 1;
    }
    if omitted > 0 {
        out.push_str(&format!("... [{omitted} more entries omitted]\n"));
    }
    if listed == 0 && !root.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", root.display()),
        ));
    }
    Ok(out)
}
