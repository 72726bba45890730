use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::collection::Collection;
use crate::error::ZebedeeError;
use crate::storage::Storage;
use crate::uri::TaxonomyUri;

/// Snapshot of every collection under the collections root.
///
/// Not live: reload to see collections created after the snapshot was taken.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: Vec<Collection>,
}

impl CollectionRegistry {
    /// Load every subdirectory that has a `<name>.json` beside it.
    ///
    /// Directories without a manifest are left over from an interrupted
    /// create; they are skipped rather than failing the load.
    pub fn load(storage: &dyn Storage, collections_dir: &Path) -> Result<Self> {
        info!(dir = %collections_dir.display(), "loading existing collections");
        let mut collections = Vec::new();
        for dir in storage.list_dirs(collections_dir)? {
            let Some(name) = dir.file_name().map(|name| name.to_string_lossy().into_owned())
            else {
                continue;
            };
            match Collection::load(storage, collections_dir, &name) {
                Ok(collection) => collections.push(collection),
                Err(err)
                    if matches!(
                        err.downcast_ref::<ZebedeeError>(),
                        Some(ZebedeeError::CollectionNotFound { .. })
                    ) =>
                {
                    warn!(collection = %name, "skipping collection directory without manifest");
                }
                Err(err) => return Err(err),
            }
        }
        info!(count = collections.len(), "collections loaded");
        Ok(Self { collections })
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.collections.iter().map(Collection::name).collect()
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Collection> {
        self.collections
            .iter()
            .find(|collection| collection.name() == name)
            .ok_or_else(|| {
                ZebedeeError::CollectionNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// First collection (in load order) staging a file at `uri`.
    pub fn find_containing(&self, storage: &dyn Storage, uri: &TaxonomyUri) -> Option<&Collection> {
        self.collections
            .iter()
            .find(|collection| collection.contains(storage, uri))
    }

    /// Like `find_containing`, ignoring the collection named `except`.
    pub fn blocking_collection(
        &self,
        storage: &dyn Storage,
        uri: &TaxonomyUri,
        except: &str,
    ) -> Option<&Collection> {
        self.collections
            .iter()
            .filter(|collection| collection.name() != except)
            .find(|collection| collection.contains(storage, uri))
    }
}
