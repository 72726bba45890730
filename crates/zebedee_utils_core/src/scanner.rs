use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::collection::has_extension;
use crate::config::ToolConfig;
use crate::registry::CollectionRegistry;
use crate::rewrite::{contains_literal, count_literal};
use crate::runtime::StorePaths;
use crate::storage::Storage;
use crate::uri::{PAGE_FILE_NAMES, TaxonomyUri};

pub const PREVIOUS_VERSIONS_DIR: &str = "previous";

/// Decides which files count as content-description files for a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub extensions: Vec<String>,
    /// Directory names whose subtrees are ignored.
    pub skip_dirs: Vec<String>,
    /// When non-empty, only these file names are read.
    pub file_names: Vec<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::json_files()
    }
}

impl ScanFilter {
    /// Every `.json` file anywhere in the tree.
    pub fn json_files() -> Self {
        Self {
            extensions: vec!["json".to_string()],
            skip_dirs: Vec::new(),
            file_names: Vec::new(),
        }
    }

    /// Current page descriptions only: `data.json`/`data_cy.json`, not `previous/` versions.
    pub fn page_files() -> Self {
        Self {
            extensions: vec!["json".to_string()],
            skip_dirs: vec![PREVIOUS_VERSIONS_DIR.to_string()],
            file_names: PAGE_FILE_NAMES.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn for_moves(config: &ToolConfig) -> Self {
        Self {
            extensions: config.scan_extensions(),
            skip_dirs: config.scan.skip_dirs.clone(),
            file_names: Vec::new(),
        }
    }

    pub fn for_jobs(config: &ToolConfig) -> Self {
        let mut filter = Self::page_files();
        if !config.jobs.skip_dirs.is_empty() {
            filter.skip_dirs = config.jobs.skip_dirs.clone();
        }
        if !config.jobs.file_names.is_empty() {
            filter.file_names = config.jobs.file_names.clone();
        }
        filter
    }

    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        if !has_extension(path, &self.extensions) {
            return false;
        }
        if !self.file_names.is_empty() {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default();
            if !self.file_names.iter().any(|allowed| *allowed == name) {
                return false;
            }
        }
        if self.skip_dirs.is_empty() {
            return true;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parent_dirs = relative.parent().map(Path::components).into_iter().flatten();
        for component in parent_dirs {
            let segment = component.as_os_str().to_string_lossy();
            if self.skip_dirs.iter().any(|skip| *skip == segment) {
                return false;
            }
        }
        true
    }

    /// Files under `root` this filter accepts, sorted.
    pub fn content_files(&self, storage: &dyn Storage, root: &Path) -> Result<Vec<PathBuf>> {
        Ok(storage
            .walk_files(root)?
            .into_iter()
            .filter(|path| self.accepts(root, path))
            .collect())
    }
}

/// Absolute paths of every content file under `root` containing `needle`.
///
/// An empty result is not an error.
pub fn find_references(
    storage: &dyn Storage,
    root: &Path,
    needle: &str,
    filter: &ScanFilter,
) -> Result<BTreeSet<PathBuf>> {
    info!(needle, root = %root.display(), "scanning for uses of uri");
    let mut found = BTreeSet::new();
    let mut scanned = 0usize;
    for path in filter.content_files(storage, root)? {
        scanned += 1;
        let bytes = storage.read(&path)?;
        if contains_literal(&bytes, needle.as_bytes()) {
            debug!(path = %path.display(), "reference found");
            found.insert(path);
        }
    }
    info!(scanned, matches = found.len(), "reference scan complete");
    Ok(found)
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleReference {
    pub uri: TaxonomyUri,
    pub occurrences: usize,
    /// Collection that stages this page, if any.
    pub staged_in: Option<String>,
    /// Whether the staged copy no longer mentions the old uri.
    pub fixed_in_staging: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleReferenceReport {
    pub old_uri: TaxonomyUri,
    pub scanned_root: String,
    pub references: Vec<StaleReference>,
}

impl StaleReferenceReport {
    /// Pages still pointing at the old uri with no staged fix anywhere.
    pub fn unresolved(&self) -> impl Iterator<Item = &StaleReference> {
        self.references
            .iter()
            .filter(|reference| !reference.fixed_in_staging)
    }
}

/// Broken-link check after a move: which master pages still mention `old_uri`,
/// and whether some collection already stages a corrected copy.
pub fn stale_reference_report(
    storage: &dyn Storage,
    paths: &StorePaths,
    registry: &CollectionRegistry,
    old_uri: &TaxonomyUri,
    filter: &ScanFilter,
) -> Result<StaleReferenceReport> {
    let needle = old_uri.as_str();
    let mut references = Vec::new();
    for path in find_references(storage, &paths.master_dir, needle, filter)? {
        let uri = TaxonomyUri::from_store_path(&paths.master_dir, &path)?;
        let occurrences = count_literal(&storage.read(&path)?, needle.as_bytes());

        let mut staged_in = None;
        let mut fixed_in_staging = false;
        if let Some(collection) = registry.find_containing(storage, &uri) {
            staged_in = Some(collection.name().to_string());
            if let Some((_, staged)) = collection.read(storage, &uri)? {
                fixed_in_staging = !contains_literal(&staged, needle.as_bytes());
            }
        }

        references.push(StaleReference {
            uri,
            occurrences,
            staged_in,
            fixed_in_staging,
        });
    }

    Ok(StaleReferenceReport {
        old_uri: old_uri.clone(),
        scanned_root: paths.master_dir.to_string_lossy().replace('\\', "/"),
        references,
    })
}
