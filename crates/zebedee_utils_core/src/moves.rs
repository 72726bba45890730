//! Moving a published subtree to a new taxonomy location through a collection.
//!
//! Nothing in master is modified. The moved files land in the target
//! collection's in-progress bucket at their new URIs, and every other page
//! mentioning the old URI is staged there too, with the reference rewritten.
//!
//! Ordering: all conflict checks run against one registry snapshot before the
//! first write. Once writing starts there is no rollback; a failure part way
//! leaves the collection holding whatever was already staged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::collection::{
    Collection, CollectionLayout, CollectionManifest, PreparedContent, prepare_moved_content,
    short_digest, validate_name,
};
use crate::config::{BlockedPolicy, DEFAULT_COLLECTION_OWNER, DEFAULT_COLLECTION_TYPE, ToolConfig};
use crate::error::ZebedeeError;
use crate::registry::CollectionRegistry;
use crate::rewrite::{UriRewrite, count_literal};
use crate::runtime::StorePaths;
use crate::scanner::{ScanFilter, find_references};
use crate::storage::Storage;
use crate::uri::{PAGE_FILE_NAMES, TaxonomyUri};

#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub source: TaxonomyUri,
    pub destination: TaxonomyUri,
    pub collection: String,
    /// Create the collection instead of reusing an existing one.
    pub create_collection: bool,
}

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub blocked_policy: BlockedPolicy,
    pub dry_run: bool,
    /// Attach a unified diff to every fixed reference.
    pub preview_diffs: bool,
    pub scan: ScanFilter,
    pub owner: String,
    pub collection_type: String,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            blocked_policy: BlockedPolicy::Abort,
            dry_run: false,
            preview_diffs: false,
            scan: ScanFilter::json_files(),
            owner: DEFAULT_COLLECTION_OWNER.to_string(),
            collection_type: DEFAULT_COLLECTION_TYPE.to_string(),
        }
    }
}

impl MoveOptions {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            blocked_policy: config.blocked_policy(),
            scan: ScanFilter::for_moves(config),
            owner: config.collection_owner(),
            collection_type: config.collection_type(),
            ..Self::default()
        }
    }
}

/// One move, resolved against the store. Lives for a single invocation.
#[derive(Debug, Clone, Serialize)]
pub struct MovePlan {
    pub collection: String,
    pub source_path: PathBuf,
    pub source_uri: TaxonomyUri,
    pub destination_uri: TaxonomyUri,
    pub store_root: PathBuf,
    pub creates_collection: bool,
}

impl MovePlan {
    pub fn rewrite(&self) -> UriRewrite {
        UriRewrite::new(&self.source_uri, &self.destination_uri)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// A file of the moved subtree is staged elsewhere at its current uri.
    Source,
    /// Something is already staged elsewhere at the new uri.
    Destination,
    /// A page referencing the moved uri is staged elsewhere.
    Reference,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedFile {
    pub uri: TaxonomyUri,
    pub collection: String,
    pub reason: BlockReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovedFile {
    pub source_uri: TaxonomyUri,
    pub destination_uri: TaxonomyUri,
    pub bytes: u64,
    pub rewritten: bool,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixedFile {
    pub uri: TaxonomyUri,
    pub occurrences: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// A staged page whose `uri` field does not match where it now lives.
#[derive(Debug, Clone, Serialize)]
pub struct UriMismatch {
    pub file: TaxonomyUri,
    pub expected: TaxonomyUri,
    pub found: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveReport {
    pub plan: MovePlan,
    pub dry_run: bool,
    pub blocked_policy: BlockedPolicy,
    pub references_found: usize,
    pub moved: Vec<MovedFile>,
    pub fixed: Vec<FixedFile>,
    pub blocked: Vec<BlockedFile>,
    pub uri_mismatches: Vec<UriMismatch>,
}

#[derive(Debug, Clone)]
struct Relocation {
    source_path: PathBuf,
    source_uri: TaxonomyUri,
    destination_uri: TaxonomyUri,
}

/// Run a complete move: plan, discover, check, relocate, fix, report.
pub fn move_content(
    storage: &dyn Storage,
    paths: &StorePaths,
    request: &MoveRequest,
    options: &MoveOptions,
) -> Result<MoveReport> {
    let plan = plan_move(storage, paths, request)?;
    info!(
        collection = %plan.collection,
        from = %plan.source_uri,
        to = %plan.destination_uri,
        create = plan.creates_collection,
        dry_run = options.dry_run,
        "content move configuration"
    );

    let registry = CollectionRegistry::load(storage, &paths.collections_dir)?;
    let existing = if plan.creates_collection {
        None
    } else {
        Some(registry.get_by_name(&plan.collection)?.clone())
    };

    let references = find_references(
        storage,
        &paths.master_dir,
        plan.source_uri.as_str(),
        &options.scan,
    )?;
    let relocations = plan_relocations(storage, &plan)?;

    let blocked = check_conflicts(
        storage,
        &registry,
        &plan,
        &relocations,
        &references,
        options.blocked_policy,
    )?;
    let skipped: BTreeSet<TaxonomyUri> = blocked.iter().map(|file| file.uri.clone()).collect();

    let collection = match existing {
        Some(collection) => collection,
        None if options.dry_run => Collection {
            manifest: CollectionManifest::new(
                &plan.collection,
                &options.owner,
                &options.collection_type,
            ),
            layout: CollectionLayout::new(&paths.collections_dir, &plan.collection),
        },
        None => Collection::create(
            storage,
            &paths.collections_dir,
            &plan.collection,
            &options.owner,
            &options.collection_type,
        )?,
    };

    let (ledger, moved, uri_mismatches) =
        relocate_subtree(storage, &collection, &plan, &relocations, options)?;
    let fixed = fix_back_references(
        storage,
        &collection,
        &plan,
        &references,
        &ledger,
        &skipped,
        options,
    )?;

    info!(
        collection = %plan.collection,
        moved = moved.len(),
        fixed = fixed.len(),
        blocked = blocked.len(),
        uri_mismatches = uri_mismatches.len(),
        dry_run = options.dry_run,
        "content move complete"
    );

    Ok(MoveReport {
        plan,
        dry_run: options.dry_run,
        blocked_policy: options.blocked_policy,
        references_found: references.len(),
        moved,
        fixed,
        blocked,
        uri_mismatches,
    })
}

/// Validate the request against the store without reading any page content.
pub fn plan_move(
    storage: &dyn Storage,
    paths: &StorePaths,
    request: &MoveRequest,
) -> Result<MovePlan> {
    validate_name(&request.collection)?;
    if request.source.is_root() || request.destination.is_root() {
        return Err(ZebedeeError::configuration("cannot move to or from the store root").into());
    }
    if request.source == request.destination {
        return Err(ZebedeeError::configuration(format!(
            "source and destination are the same: {}",
            request.source
        ))
        .into());
    }
    if request.destination.starts_with(&request.source) {
        return Err(ZebedeeError::configuration(format!(
            "cannot move {} inside itself ({})",
            request.source, request.destination
        ))
        .into());
    }

    let source_path = request.source.resolve_under(&paths.master_dir);
    if !storage.exists(&source_path) {
        return Err(ZebedeeError::NotFound {
            path: source_path.display().to_string(),
        }
        .into());
    }

    if request.create_collection {
        let layout = CollectionLayout::new(&paths.collections_dir, &request.collection);
        if storage.exists(&layout.root) {
            return Err(ZebedeeError::AlreadyExists {
                name: request.collection.clone(),
            }
            .into());
        }
    }

    Ok(MovePlan {
        collection: request.collection.clone(),
        source_path,
        source_uri: request.source.clone(),
        destination_uri: request.destination.clone(),
        store_root: paths.master_dir.clone(),
        creates_collection: request.create_collection,
    })
}

fn plan_relocations(storage: &dyn Storage, plan: &MovePlan) -> Result<Vec<Relocation>> {
    let mut relocations = Vec::new();
    for source_path in storage.walk_files(&plan.source_path)? {
        let relative = source_path
            .strip_prefix(&plan.source_path)
            .with_context(|| format!("{} escaped the moved subtree", source_path.display()))?;
        relocations.push(Relocation {
            source_uri: TaxonomyUri::from_store_path(&plan.store_root, &source_path)?,
            destination_uri: plan.destination_uri.join(relative)?,
            source_path,
        });
    }
    Ok(relocations)
}

/// Every uri the move would touch, checked against every other collection.
///
/// Source and destination conflicts always abort. Reference conflicts abort
/// or are returned for skipping, per `policy`. Collection conflicts are all
/// gathered before returning so the error names the first one in path order.
///
/// A referencing page that sits at one of the destination uris would be
/// staged twice in this collection, so the move is refused outright.
fn check_conflicts(
    storage: &dyn Storage,
    registry: &CollectionRegistry,
    plan: &MovePlan,
    relocations: &[Relocation],
    references: &BTreeSet<PathBuf>,
    policy: BlockedPolicy,
) -> Result<Vec<BlockedFile>> {
    let mut fatal = Vec::new();
    let mut skippable = Vec::new();

    let mut check = |uri: &TaxonomyUri, reason: BlockReason| {
        if let Some(owner) = registry.blocking_collection(storage, uri, &plan.collection) {
            warn!(
                uri = %uri,
                collection = owner.name(),
                reason = ?reason,
                "uri is blocked by another collection"
            );
            let blocked = BlockedFile {
                uri: uri.clone(),
                collection: owner.name().to_string(),
                reason,
            };
            if reason == BlockReason::Reference && policy == BlockedPolicy::Skip {
                skippable.push(blocked);
            } else {
                fatal.push(blocked);
            }
        }
    };

    let moving: BTreeSet<&Path> = relocations
        .iter()
        .map(|relocation| relocation.source_path.as_path())
        .collect();
    let destinations: BTreeSet<&TaxonomyUri> = relocations
        .iter()
        .map(|relocation| &relocation.destination_uri)
        .collect();
    for relocation in relocations {
        check(&relocation.source_uri, BlockReason::Source);
        check(&relocation.destination_uri, BlockReason::Destination);
    }
    for path in references {
        if moving.contains(path.as_path()) {
            continue;
        }
        let uri = TaxonomyUri::from_store_path(&plan.store_root, path)?;
        if destinations.contains(&uri) {
            return Err(ZebedeeError::configuration(format!(
                "{uri} references {} and would be overwritten by the moved content at the same uri",
                plan.source_uri
            ))
            .into());
        }
        check(&uri, BlockReason::Reference);
    }

    if let Some(first) = fatal.into_iter().next() {
        return Err(ZebedeeError::Blocked {
            collection: first.collection,
            uri: first.uri.to_string(),
        })
        .context("content move aborted before any write");
    }
    Ok(skippable)
}

type Ledger = BTreeMap<PathBuf, TaxonomyUri>;

fn relocate_subtree(
    storage: &dyn Storage,
    collection: &Collection,
    plan: &MovePlan,
    relocations: &[Relocation],
    options: &MoveOptions,
) -> Result<(Ledger, Vec<MovedFile>, Vec<UriMismatch>)> {
    let rewrite = plan.rewrite();
    let mut ledger = Ledger::new();
    let mut moved = Vec::with_capacity(relocations.len());
    let mut mismatches = Vec::new();

    for relocation in relocations {
        let prepared = if options.dry_run {
            prepare_moved_content(storage, &relocation.source_path, &rewrite)?
        } else {
            collection.move_content(
                storage,
                &relocation.source_path,
                &relocation.destination_uri,
                &rewrite,
            )?
        };
        debug!(
            from = %relocation.source_uri,
            to = %relocation.destination_uri,
            rewritten = prepared.rewritten,
            "moved file"
        );

        if let Some(mismatch) = check_page_uri(&relocation.destination_uri, &prepared) {
            warn!(
                file = %mismatch.file,
                expected = %mismatch.expected,
                found = %mismatch.found,
                "staged page uri does not match its location"
            );
            mismatches.push(mismatch);
        }

        ledger.insert(
            relocation.source_path.clone(),
            relocation.destination_uri.clone(),
        );
        moved.push(MovedFile {
            source_uri: relocation.source_uri.clone(),
            destination_uri: relocation.destination_uri.clone(),
            bytes: prepared.bytes.len() as u64,
            rewritten: prepared.rewritten,
            digest: short_digest(&prepared.bytes),
        });
    }
    Ok((ledger, moved, mismatches))
}

fn fix_back_references(
    storage: &dyn Storage,
    collection: &Collection,
    plan: &MovePlan,
    references: &BTreeSet<PathBuf>,
    ledger: &Ledger,
    skipped: &BTreeSet<TaxonomyUri>,
    options: &MoveOptions,
) -> Result<Vec<FixedFile>> {
    let rewrite = plan.rewrite();
    let mut fixed = Vec::new();
    for path in references {
        if ledger.contains_key(path) {
            continue;
        }
        let uri = TaxonomyUri::from_store_path(&plan.store_root, path)?;
        if skipped.contains(&uri) {
            continue;
        }

        let original = storage.read(path)?;
        let Some(updated) = rewrite.apply(&original) else {
            continue;
        };
        if !options.dry_run {
            collection.add_content(storage, &uri, &updated)?;
        }
        debug!(uri = %uri, "fixed reference");

        fixed.push(FixedFile {
            occurrences: count_literal(&original, rewrite.from.as_bytes()),
            diff: options
                .preview_diffs
                .then(|| unified_diff(&uri, &original, &updated)),
            uri,
        });
    }
    Ok(fixed)
}

fn check_page_uri(file: &TaxonomyUri, prepared: &PreparedContent) -> Option<UriMismatch> {
    let name = file.file_name()?;
    if !PAGE_FILE_NAMES.contains(&name) {
        return None;
    }
    let page: serde_json::Value = serde_json::from_slice(&prepared.bytes).ok()?;
    let found = page.get("uri")?.as_str()?;
    let expected = file.page_uri();
    let matches = TaxonomyUri::parse(found).is_ok_and(|parsed| parsed == expected);
    if matches {
        return None;
    }
    Some(UriMismatch {
        file: file.clone(),
        expected,
        found: found.to_string(),
    })
}

pub fn unified_diff(uri: &TaxonomyUri, before: &[u8], after: &[u8]) -> String {
    let before = String::from_utf8_lossy(before);
    let after = String::from_utf8_lossy(after);
    TextDiff::from_lines(before.as_ref(), after.as_ref())
        .unified_diff()
        .context_radius(1)
        .header(&format!("master{uri}"), &format!("staged{uri}"))
        .to_string()
}
