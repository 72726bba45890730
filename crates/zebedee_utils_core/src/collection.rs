use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::ZebedeeError;
use crate::rewrite::UriRewrite;
use crate::storage::Storage;
use crate::uri::TaxonomyUri;

pub const MANIFEST_EXTENSION: &str = "json";
/// Only files with this extension get uri substitution when moved.
pub const REWRITTEN_EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    NotStarted,
    InProgress,
    Complete,
    Error,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
        }
    }
}

/// The three state directories inside a collection, in containment-check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    InProgress,
    Complete,
    Reviewed,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::InProgress, Bucket::Complete, Bucket::Reviewed];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::InProgress => "inprogress",
            Self::Complete => "complete",
            Self::Reviewed => "reviewed",
        }
    }
}

/// The manifest stored beside the collection directory as `<name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionManifest {
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub publish_complete: bool,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub collection_owner: String,
    #[serde(default)]
    pub timeseries_import_files: Vec<String>,
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub collection_type: String,
    #[serde(default)]
    pub teams: Vec<serde_json::Value>,
}

impl CollectionManifest {
    pub fn new(name: &str, owner: &str, collection_type: &str) -> Self {
        Self {
            approval_status: ApprovalStatus::NotStarted,
            publish_complete: false,
            is_encrypted: false,
            collection_owner: owner.to_string(),
            timeseries_import_files: Vec::new(),
            id: format!("{name}-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            collection_type: collection_type.to_string(),
            teams: Vec::new(),
        }
    }
}

/// Physical paths of one collection under the collections root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionLayout {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub in_progress: PathBuf,
    pub complete: PathBuf,
    pub reviewed: PathBuf,
}

impl CollectionLayout {
    pub fn new(collections_dir: &Path, name: &str) -> Self {
        let root = collections_dir.join(name);
        Self {
            manifest: collections_dir.join(format!("{name}.{MANIFEST_EXTENSION}")),
            in_progress: root.join(Bucket::InProgress.dir_name()),
            complete: root.join(Bucket::Complete.dir_name()),
            reviewed: root.join(Bucket::Reviewed.dir_name()),
            root,
        }
    }

    pub fn bucket_root(&self, bucket: Bucket) -> &Path {
        match bucket {
            Bucket::InProgress => &self.in_progress,
            Bucket::Complete => &self.complete,
            Bucket::Reviewed => &self.reviewed,
        }
    }

    pub fn bucket_path(&self, bucket: Bucket, uri: &TaxonomyUri) -> PathBuf {
        uri.resolve_under(self.bucket_root(bucket))
    }

    fn dirs(&self) -> [&Path; 4] {
        [
            self.root.as_path(),
            self.in_progress.as_path(),
            self.complete.as_path(),
            self.reviewed.as_path(),
        ]
    }
}

/// What `move_content` wrote (or would write) for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContent {
    pub bytes: Vec<u8>,
    pub rewritten: bool,
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub manifest: CollectionManifest,
    pub layout: CollectionLayout,
}

impl Collection {
    /// Create the three bucket directories and the manifest.
    ///
    /// Fails with `AlreadyExists` when the directory is already there. There is
    /// no cleanup if the manifest write fails after the directories exist.
    pub fn create(
        storage: &dyn Storage,
        collections_dir: &Path,
        name: &str,
        owner: &str,
        collection_type: &str,
    ) -> Result<Self> {
        validate_name(name)?;
        let layout = CollectionLayout::new(collections_dir, name);
        if storage.exists(&layout.root) {
            return Err(ZebedeeError::AlreadyExists {
                name: name.to_string(),
            }
            .into());
        }

        for dir in layout.dirs() {
            storage.create_dir_all(dir)?;
        }

        let manifest = CollectionManifest::new(name, owner, collection_type);
        let rendered =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize collection json")?;
        storage
            .write(&layout.manifest, &rendered)
            .with_context(|| format!("failed to write collection json for {name}"))?;

        info!(collection = name, id = %manifest.id, "collection created");
        Ok(Self { manifest, layout })
    }

    /// Read `<name>.json`. The caller decides what a missing manifest means.
    pub fn load(storage: &dyn Storage, collections_dir: &Path, name: &str) -> Result<Self> {
        let layout = CollectionLayout::new(collections_dir, name);
        if !storage.is_file(&layout.manifest) {
            return Err(ZebedeeError::CollectionNotFound {
                name: name.to_string(),
            }
            .into());
        }
        let bytes = storage.read(&layout.manifest)?;
        let manifest: CollectionManifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", layout.manifest.display()))?;
        Ok(Self { manifest, layout })
    }

    /// Remove the collection directory and its manifest.
    pub fn delete(storage: &dyn Storage, collections_dir: &Path, name: &str) -> Result<()> {
        validate_name(name)?;
        let layout = CollectionLayout::new(collections_dir, name);
        if !storage.exists(&layout.root) {
            return Err(ZebedeeError::CollectionNotFound {
                name: name.to_string(),
            }
            .into());
        }

        info!(collection = name, dir = %layout.root.display(), "deleting collection");
        storage.remove_dir_all(&layout.root)?;
        if storage.is_file(&layout.manifest) {
            storage.remove_file(&layout.manifest)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// First bucket holding a file at `uri`, checked in-progress, complete, reviewed.
    pub fn locate(&self, storage: &dyn Storage, uri: &TaxonomyUri) -> Option<Bucket> {
        let bucket = Bucket::ALL
            .into_iter()
            .find(|bucket| storage.is_file(&self.layout.bucket_path(*bucket, uri)))?;
        debug!(
            uri = %uri,
            collection = self.name(),
            bucket = bucket.dir_name(),
            "collection contains uri"
        );
        Some(bucket)
    }

    /// A file in any bucket means this collection owns `uri`.
    pub fn contains(&self, storage: &dyn Storage, uri: &TaxonomyUri) -> bool {
        self.locate(storage, uri).is_some()
    }

    pub fn read(&self, storage: &dyn Storage, uri: &TaxonomyUri) -> Result<Option<(Bucket, Vec<u8>)>> {
        match self.locate(storage, uri) {
            Some(bucket) => {
                let bytes = storage.read(&self.layout.bucket_path(bucket, uri))?;
                Ok(Some((bucket, bytes)))
            }
            None => Ok(None),
        }
    }

    /// Last write wins; an existing staged file is replaced silently.
    pub fn add_content(&self, storage: &dyn Storage, uri: &TaxonomyUri, bytes: &[u8]) -> Result<()> {
        self.write_to(storage, Bucket::InProgress, uri, bytes)
    }

    pub fn add_to_reviewed(
        &self,
        storage: &dyn Storage,
        uri: &TaxonomyUri,
        bytes: &[u8],
    ) -> Result<()> {
        self.write_to(storage, Bucket::Reviewed, uri, bytes)
    }

    pub fn write_to(
        &self,
        storage: &dyn Storage,
        bucket: Bucket,
        uri: &TaxonomyUri,
        bytes: &[u8],
    ) -> Result<()> {
        let target = self.layout.bucket_path(bucket, uri);
        storage
            .write(&target, bytes)
            .with_context(|| format!("failed to add {uri} to collection {}", self.name()))
    }

    /// Stage `source` at `destination` in the in-progress bucket.
    ///
    /// JSON files have every occurrence of the old URI replaced; anything
    /// else is written back byte for byte.
    pub fn move_content(
        &self,
        storage: &dyn Storage,
        source: &Path,
        destination: &TaxonomyUri,
        rewrite: &UriRewrite,
    ) -> Result<PreparedContent> {
        let target = self.layout.bucket_path(Bucket::InProgress, destination);
        let prepared = prepare_moved_content(storage, source, rewrite)?;
        storage
            .write(&target, &prepared.bytes)
            .with_context(|| format!("failed to move {} into {}", source.display(), self.name()))?;
        Ok(prepared)
    }

    pub fn staged_files(&self, storage: &dyn Storage) -> Result<BTreeMap<Bucket, Vec<TaxonomyUri>>> {
        let mut out = BTreeMap::new();
        for bucket in Bucket::ALL {
            let root = self.layout.bucket_root(bucket);
            let mut uris = Vec::new();
            if storage.is_dir(root) {
                for file in storage.walk_files(root)? {
                    uris.push(TaxonomyUri::from_store_path(root, &file)?);
                }
            }
            out.insert(bucket, uris);
        }
        Ok(out)
    }
}

/// The bytes `move_content` would stage for `source`, without writing them.
pub fn prepare_moved_content(
    storage: &dyn Storage,
    source: &Path,
    rewrite: &UriRewrite,
) -> Result<PreparedContent> {
    let bytes = storage.read(source)?;
    if !is_rewritten(source) {
        return Ok(PreparedContent {
            bytes,
            rewritten: false,
        });
    }
    Ok(match rewrite.apply(&bytes) {
        Some(fixed) => PreparedContent {
            bytes: fixed,
            rewritten: true,
        },
        None => PreparedContent {
            bytes,
            rewritten: false,
        },
    })
}

fn is_rewritten(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(REWRITTEN_EXTENSION))
}

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

pub fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Collection names become a directory and a file name under the collections root.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
    {
        return Err(ZebedeeError::configuration(format!("invalid collection name `{name}`")).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use super::{ApprovalStatus, Bucket, Collection, CollectionLayout, short_digest};
    use crate::error::error_kind;
    use crate::rewrite::UriRewrite;
    use crate::storage::{DiskStorage, MemoryStorage, Storage};
    use crate::uri::TaxonomyUri;

    fn uri(value: &str) -> TaxonomyUri {
        TaxonomyUri::parse(value).expect("uri")
    }

    #[test]
    fn create_writes_manifest_and_buckets() {
        let temp = tempdir().expect("tempdir");
        let collections = temp.path().join("collections");
        fs::create_dir_all(&collections).expect("create collections");

        let collection = Collection::create(
            &DiskStorage,
            &collections,
            "move1",
            "PUBLISHING_SUPPORT",
            "manual",
        )
        .expect("create");

        for bucket in Bucket::ALL {
            assert!(collection.layout.bucket_root(bucket).is_dir());
        }
        let raw = fs::read_to_string(collections.join("move1.json")).expect("manifest");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("parse manifest");
        assert_eq!(json["approvalStatus"], "NOT_STARTED");
        assert_eq!(json["collectionOwner"], "PUBLISHING_SUPPORT");
        assert_eq!(json["type"], "manual");
        assert_eq!(json["publishComplete"], false);
        assert_eq!(json["isEncrypted"], false);
        assert_eq!(json["timeseriesImportFiles"], serde_json::json!([]));
        assert_eq!(json["teams"], serde_json::json!([]));
        assert!(
            json["id"]
                .as_str()
                .expect("id")
                .starts_with("move1-")
        );

        let loaded = Collection::load(&DiskStorage, &collections, "move1").expect("load");
        assert_eq!(loaded.manifest, collection.manifest);
        assert_eq!(loaded.manifest.approval_status, ApprovalStatus::NotStarted);
    }

    #[test]
    fn create_refuses_existing_directory_and_leaves_it_alone() {
        let storage = MemoryStorage::new();
        let collections = PathBuf::from("/zeb/collections");
        let first = Collection::create(&storage, &collections, "move1", "owner", "manual")
            .expect("create");
        first
            .add_content(&storage, &uri("/econ/data.json"), b"staged")
            .expect("add");
        let manifest_before = storage.read(&first.layout.manifest).expect("manifest");

        let err = Collection::create(&storage, &collections, "move1", "someone", "manual")
            .expect_err("must fail");
        assert_eq!(error_kind(&err).expect("kind").kind(), "already_exists");
        assert_eq!(
            storage.read(&first.layout.manifest).expect("manifest"),
            manifest_before
        );
        assert!(first.contains(&storage, &uri("/econ/data.json")));
    }

    #[test]
    fn create_rejects_path_like_names() {
        let storage = MemoryStorage::new();
        for name in ["", "a/b", "..", " padded"] {
            let err = Collection::create(&storage, Path::new("/c"), name, "o", "manual")
                .expect_err("must fail");
            assert_eq!(error_kind(&err).expect("kind").kind(), "configuration");
        }
    }

    #[test]
    fn contains_checks_every_bucket() {
        let storage = MemoryStorage::new();
        let collections = PathBuf::from("/zeb/collections");
        let collection =
            Collection::create(&storage, &collections, "c1", "o", "manual").expect("create");
        let layout = CollectionLayout::new(&collections, "c1");

        let target = uri("/econ/page1/data.json");
        assert!(!collection.contains(&storage, &target));

        for bucket in Bucket::ALL {
            let path = layout.bucket_path(bucket, &target);
            storage.write(&path, b"{}").expect("write");
            assert_eq!(collection.locate(&storage, &target), Some(bucket));
            storage.remove_file(&path).expect("remove");
            assert!(!collection.contains(&storage, &target));
        }

        // a directory at the uri is not a staged file
        storage
            .create_dir_all(&layout.bucket_path(Bucket::Reviewed, &target))
            .expect("mkdir");
        assert!(!collection.contains(&storage, &target));
    }

    #[test]
    fn add_to_reviewed_overwrites_silently() {
        let storage = MemoryStorage::new();
        let collection = Collection::create(&storage, Path::new("/c"), "fix", "o", "manual")
            .expect("create");
        let page = uri("/a/b/data.json");
        collection
            .add_to_reviewed(&storage, &page, b"first")
            .expect("first");
        collection
            .add_to_reviewed(&storage, &page, b"second")
            .expect("second");

        let (bucket, bytes) = collection
            .read(&storage, &page)
            .expect("read")
            .expect("staged");
        assert_eq!(bucket, Bucket::Reviewed);
        assert_eq!(bytes, b"second".to_vec());
    }

    #[test]
    fn move_content_rewrites_json_and_copies_assets() {
        let storage = MemoryStorage::new();
        let master = PathBuf::from("/zeb/master");
        let json_source = master.join("econ/old-topic/data.json");
        let image_source = master.join("econ/old-topic/chart.png");
        let image_bytes = vec![0x89, b'P', b'N', b'G', b'/', b'e', b'c', b'o', b'n'];
        storage
            .write(&json_source, br#"{"uri":"/econ/old-topic"}"#)
            .expect("write json");
        storage.write(&image_source, &image_bytes).expect("write image");

        let collection = Collection::create(&storage, Path::new("/zeb/collections"), "move1", "o", "manual")
            .expect("create");
        let rewrite = UriRewrite::literal("/econ/old-topic", "/econ/new-topic");

        let json = collection
            .move_content(
                &storage,
                &json_source,
                &uri("/econ/new-topic/data.json"),
                &rewrite,
            )
            .expect("move json");
        assert!(json.rewritten);
        assert_eq!(json.bytes, br#"{"uri":"/econ/new-topic"}"#.to_vec());

        let image = collection
            .move_content(
                &storage,
                &image_source,
                &uri("/econ/new-topic/chart.png"),
                &UriRewrite::literal("/econ", "/elsewhere"),
            )
            .expect("move image");
        assert!(!image.rewritten);
        assert_eq!(image.bytes, image_bytes);
        assert_eq!(short_digest(&image.bytes), short_digest(&image_bytes));
        let staged_image = collection
            .layout
            .bucket_path(Bucket::InProgress, &uri("/econ/new-topic/chart.png"));
        assert_eq!(storage.read(&staged_image).expect("staged image"), image_bytes);

        // master is never touched
        assert!(storage.is_file(&json_source));
        assert!(storage.is_file(&image_source));
    }

    #[test]
    fn delete_removes_directory_and_manifest() {
        let storage = MemoryStorage::new();
        let collections = PathBuf::from("/zeb/collections");
        let collection = Collection::create(&storage, &collections, "gone", "o", "manual")
            .expect("create");
        Collection::delete(&storage, &collections, "gone").expect("delete");
        assert!(!storage.exists(&collection.layout.root));
        assert!(!storage.exists(&collection.layout.manifest));

        let err = Collection::delete(&storage, &collections, "gone").expect_err("must fail");
        assert_eq!(error_kind(&err).expect("kind").kind(), "collection_not_found");
    }

    #[test]
    fn staged_files_lists_each_bucket() {
        let storage = MemoryStorage::new();
        let collection = Collection::create(&storage, Path::new("/c"), "s", "o", "manual")
            .expect("create");
        collection
            .add_content(&storage, &uri("/x/data.json"), b"{}")
            .expect("add");
        collection
            .add_to_reviewed(&storage, &uri("/y/data.json"), b"{}")
            .expect("add");

        let staged = collection.staged_files(&storage).expect("staged");
        assert_eq!(staged[&Bucket::InProgress], vec![uri("/x/data.json")]);
        assert!(staged[&Bucket::Complete].is_empty());
        assert_eq!(staged[&Bucket::Reviewed], vec![uri("/y/data.json")]);
    }
}
