use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::ZebedeeError;

/// File names that describe the directory they live in.
pub const PAGE_FILE_NAMES: &[&str] = &["data.json", "data_cy.json"];

/// A rooted, slash-delimited taxonomy path such as `/economy/inflation`.
///
/// The same value addresses a page in master and in every collection bucket,
/// which is what makes containment checks possible without an index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaxonomyUri(String);

impl TaxonomyUri {
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().replace('\\', "/");
        if normalized.is_empty() {
            return Err(ZebedeeError::configuration("taxonomy uri cannot be empty").into());
        }

        let mut segments = Vec::new();
        for segment in normalized.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(ZebedeeError::configuration(format!(
                    "taxonomy uri may not contain relative segments: {value}"
                ))
                .into());
            }
            segments.push(segment);
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Derive the URI of a file stored under `root` (master or a bucket).
    pub fn from_store_path(root: &Path, path: &Path) -> Result<Self> {
        let relative = path.strip_prefix(root).with_context(|| {
            format!(
                "{} is not inside store root {}",
                path.display(),
                root.display()
            )
        })?;
        Self::from_relative_path(relative)
    }

    pub fn from_relative_path(relative: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                other => {
                    return Err(ZebedeeError::configuration(format!(
                        "unexpected path component {other:?} in {}",
                        relative.display()
                    ))
                    .into());
                }
            }
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// The URI without its leading slash, ready to be joined under a root.
    pub fn relative_path(&self) -> PathBuf {
        self.segments().collect()
    }

    pub fn resolve_under(&self, root: &Path) -> PathBuf {
        root.join(self.relative_path())
    }

    /// Append a relative path (e.g. a file's position inside a moved subtree).
    pub fn join(&self, relative: &Path) -> Result<Self> {
        let tail = Self::from_relative_path(relative)?;
        if tail.is_root() {
            return Ok(self.clone());
        }
        if self.is_root() {
            return Ok(tail);
        }
        Ok(Self(format!("{}{}", self.0, tail.0)))
    }

    /// True when `self` equals `other` or lies below it, on segment boundaries.
    pub fn starts_with(&self, other: &TaxonomyUri) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0
            .strip_prefix(&other.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// The `uri` field a page file is expected to carry.
    ///
    /// `data.json` and `data_cy.json` describe the directory they live in;
    /// any other file is its own page.
    pub fn page_uri(&self) -> TaxonomyUri {
        match self.file_name() {
            Some(name) if PAGE_FILE_NAMES.contains(&name) => {
                let parent = &self.0[..self.0.len() - name.len() - 1];
                if parent.is_empty() {
                    Self::root()
                } else {
                    Self(parent.to_string())
                }
            }
            _ => self.clone(),
        }
    }
}

impl fmt::Display for TaxonomyUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
