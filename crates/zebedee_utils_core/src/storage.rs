use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use walkdir::WalkDir;

use crate::error::ZebedeeError;

/// Every filesystem touch made by collections, scans and moves.
///
/// `DiskStorage` is what the CLI runs against; `MemoryStorage` lets the
/// containment and move logic be exercised without a real tree.
pub trait Storage {
    fn exists(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write `bytes`, creating missing parent directories. Overwrites.
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Immediate subdirectories of `path`, sorted.
    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Every file below `root`, sorted. A file root yields just itself.
    fn walk_files(&self, root: &Path) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStorage;

impl Storage for DiskStorage {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        ensure_parent(path)?;
        fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries =
            fs::read_dir(path).with_context(|| format!("failed to read dir {}", path.display()))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read dir {}", path.display()))?;
            if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn walk_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(not_found(root));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))
}

fn not_found(path: &Path) -> anyhow::Error {
    ZebedeeError::NotFound {
        path: path.display().to_string(),
    }
    .into()
}

#[derive(Debug, Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryTree {
    fn add_dir_chain(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }
}

/// Path-keyed in-memory tree. Paths are compared component-wise, so use the
/// same (usually absolute) roots you would on disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tree: Mutex<MemoryTree>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_count(&self) -> usize {
        self.lock().map(|tree| tree.files.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryTree>> {
        self.tree
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &Path) -> bool {
        self.lock()
            .map(|tree| tree.files.contains_key(path) || tree.is_dir(path))
            .unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.lock()
            .map(|tree| tree.files.contains_key(path))
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.lock().map(|tree| tree.is_dir(path)).unwrap_or(false)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let tree = self.lock()?;
        tree.files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
            .with_context(|| format!("failed to read {}", path.display()))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tree = self.lock()?;
        if tree.is_dir(path) {
            return Err(anyhow!("cannot write over directory {}", path.display()));
        }
        if let Some(parent) = path.parent() {
            if tree.files.contains_key(parent) {
                return Err(anyhow!(
                    "cannot create directory over file {}",
                    parent.display()
                ));
            }
            tree.add_dir_chain(parent);
        }
        tree.files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut tree = self.lock()?;
        if tree.files.contains_key(path) {
            return Err(anyhow!("cannot create directory over file {}", path.display()));
        }
        tree.add_dir_chain(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut tree = self.lock()?;
        if !tree.is_dir(path) {
            return Err(not_found(path))
                .with_context(|| format!("failed to remove {}", path.display()));
        }
        tree.files.retain(|file, _| !file.starts_with(path));
        tree.dirs.retain(|dir| !dir.starts_with(path));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut tree = self.lock()?;
        tree.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
            .with_context(|| format!("failed to remove {}", path.display()))
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let tree = self.lock()?;
        if !tree.is_dir(path) {
            return Err(not_found(path))
                .with_context(|| format!("failed to read dir {}", path.display()));
        }
        Ok(tree
            .dirs
            .iter()
            .filter(|dir| dir.parent() == Some(path))
            .cloned()
            .collect())
    }

    fn walk_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let tree = self.lock()?;
        if tree.files.contains_key(root) {
            return Ok(vec![root.to_path_buf()]);
        }
        if !tree.is_dir(root) {
            return Err(not_found(root));
        }
        Ok(tree
            .files
            .keys()
            .filter(|file| file.starts_with(root))
            .cloned()
            .collect())
    }
}
