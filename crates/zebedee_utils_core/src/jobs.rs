//! Bulk scan-and-process jobs over master content.
//!
//! A job decides per page whether it is interested (`test`) and what, if
//! anything, to change (`apply`). The runner owns everything else: walking,
//! blocking checks, staging and the write limit.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::{Bucket, Collection};
use crate::error::ZebedeeError;
use crate::registry::CollectionRegistry;
use crate::rewrite::{contains_literal, count_literal, replace_literal};
use crate::runtime::StorePaths;
use crate::scanner::ScanFilter;
use crate::storage::Storage;
use crate::uri::TaxonomyUri;

pub const UNKNOWN_PAGE_TYPE: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub job: String,
    /// Pages the job acted on.
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Individual text substitutions, for jobs that rewrite.
    pub replacements: usize,
}

pub trait ContentJob {
    fn name(&self) -> &str;

    /// Whether the job wants this page at all.
    fn test(&mut self, uri: &TaxonomyUri, bytes: &[u8]) -> bool;

    /// The page's new bytes, or `None` to leave it alone.
    fn apply(&mut self, uri: &TaxonomyUri, bytes: &[u8]) -> Option<Vec<u8>>;

    fn finalize(&self) -> JobSummary;

    /// Jobs that return new bytes need a collection to stage them in.
    fn writes(&self) -> bool {
        false
    }
}

/// The jobs the CLI can build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    CountPages {
        page_types: Vec<String>,
        contains: Option<String>,
    },
    ReplaceText {
        from: String,
        to: String,
        page_types: Vec<String>,
    },
}

impl JobSpec {
    pub fn build(&self) -> Result<Box<dyn ContentJob>> {
        match self {
            Self::CountPages {
                page_types,
                contains,
            } => Ok(Box::new(CountPages::new(page_types.clone(), contains.clone()))),
            Self::ReplaceText {
                from,
                to,
                page_types,
            } => {
                if from.is_empty() {
                    return Err(ZebedeeError::configuration("replace text cannot be empty").into());
                }
                if from == to {
                    return Err(ZebedeeError::configuration(format!(
                        "replacement is identical to the original text: {from}"
                    ))
                    .into());
                }
                Ok(Box::new(ReplaceText::new(
                    from.clone(),
                    to.clone(),
                    page_types.clone(),
                )))
            }
        }
    }
}

#[derive(Deserialize)]
struct PageType {
    #[serde(rename = "type")]
    value: Option<String>,
}

/// The page's `type` field; `None` when the file is not a JSON object.
pub fn page_type(bytes: &[u8]) -> Option<String> {
    let page: PageType = serde_json::from_slice(bytes).ok()?;
    Some(page.value.unwrap_or_else(|| UNKNOWN_PAGE_TYPE.to_string()))
}

fn type_selected(page_types: &[String], page_type: &str) -> bool {
    page_types.is_empty()
        || page_types
            .iter()
            .any(|wanted| wanted == "any" || wanted == page_type)
}

/// Counts pages per `type`, optionally only those containing some text.
#[derive(Debug, Default)]
pub struct CountPages {
    page_types: Vec<String>,
    contains: Option<String>,
    by_type: BTreeMap<String, usize>,
    current_type: Option<String>,
}

impl CountPages {
    pub fn new(page_types: Vec<String>, contains: Option<String>) -> Self {
        Self {
            page_types,
            contains: contains.filter(|text| !text.is_empty()),
            ..Self::default()
        }
    }
}

impl ContentJob for CountPages {
    fn name(&self) -> &str {
        "count"
    }

    fn test(&mut self, uri: &TaxonomyUri, bytes: &[u8]) -> bool {
        self.current_type = None;
        let Some(kind) = page_type(bytes) else {
            debug!(uri = %uri, "not a json page, ignored");
            return false;
        };
        if !type_selected(&self.page_types, &kind) {
            return false;
        }
        if let Some(text) = &self.contains {
            if !contains_literal(bytes, text.as_bytes()) {
                return false;
            }
        }
        self.current_type = Some(kind);
        true
    }

    fn apply(&mut self, _uri: &TaxonomyUri, _bytes: &[u8]) -> Option<Vec<u8>> {
        let kind = self
            .current_type
            .take()
            .unwrap_or_else(|| UNKNOWN_PAGE_TYPE.to_string());
        *self.by_type.entry(kind).or_default() += 1;
        None
    }

    fn finalize(&self) -> JobSummary {
        JobSummary {
            job: self.name().to_string(),
            total: self.by_type.values().sum(),
            by_type: self.by_type.clone(),
            replacements: 0,
        }
    }
}

/// Replaces every occurrence of one literal with another.
#[derive(Debug)]
pub struct ReplaceText {
    from: String,
    to: String,
    page_types: Vec<String>,
    by_type: BTreeMap<String, usize>,
    replacements: usize,
    current_type: Option<String>,
}

impl ReplaceText {
    pub fn new(from: String, to: String, page_types: Vec<String>) -> Self {
        Self {
            from,
            to,
            page_types,
            by_type: BTreeMap::new(),
            replacements: 0,
            current_type: None,
        }
    }
}

impl ContentJob for ReplaceText {
    fn name(&self) -> &str {
        "replace"
    }

    fn test(&mut self, _uri: &TaxonomyUri, bytes: &[u8]) -> bool {
        self.current_type = None;
        if !contains_literal(bytes, self.from.as_bytes()) {
            return false;
        }
        let Some(kind) = page_type(bytes) else {
            return false;
        };
        if !type_selected(&self.page_types, &kind) {
            return false;
        }
        self.current_type = Some(kind);
        true
    }

    fn apply(&mut self, _uri: &TaxonomyUri, bytes: &[u8]) -> Option<Vec<u8>> {
        let fixed = replace_literal(bytes, self.from.as_bytes(), self.to.as_bytes())?;
        self.replacements += count_literal(bytes, self.from.as_bytes());
        let kind = self
            .current_type
            .take()
            .unwrap_or_else(|| UNKNOWN_PAGE_TYPE.to_string());
        *self.by_type.entry(kind).or_default() += 1;
        Some(fixed)
    }

    fn finalize(&self) -> JobSummary {
        JobSummary {
            job: self.name().to_string(),
            total: self.by_type.values().sum(),
            by_type: self.by_type.clone(),
            replacements: self.replacements,
        }
    }

    fn writes(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedPage {
    pub uri: TaxonomyUri,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub summary: JobSummary,
    pub scanned: usize,
    pub selected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub written: Vec<TaxonomyUri>,
    pub blocked: Vec<BlockedPage>,
    pub limit_reached: bool,
}

/// Walk master and feed every accepted page through `job`.
///
/// Changed pages go to `target`'s reviewed bucket. Pages another collection
/// already stages are skipped and listed. Stops after `limit` writes.
pub fn run_job(
    storage: &dyn Storage,
    paths: &StorePaths,
    registry: &CollectionRegistry,
    job: &mut dyn ContentJob,
    target: Option<&Collection>,
    filter: &ScanFilter,
    limit: Option<usize>,
) -> Result<JobReport> {
    if job.writes() && target.is_none() {
        return Err(ZebedeeError::configuration(format!(
            "job `{}` changes content and needs a collection",
            job.name()
        ))
        .into());
    }
    info!(
        job = job.name(),
        collection = target.map(Collection::name),
        limit,
        "running content job"
    );

    let mut scanned = 0usize;
    let mut selected = 0usize;
    let mut written = Vec::new();
    let mut blocked = Vec::new();
    let mut limit_reached = false;

    for path in filter.content_files(storage, &paths.master_dir)? {
        if limit.is_some_and(|limit| written.len() >= limit) {
            limit_reached = true;
            break;
        }
        scanned += 1;
        let uri = TaxonomyUri::from_store_path(&paths.master_dir, &path)?;
        let bytes = storage.read(&path)?;
        if !job.test(&uri, &bytes) {
            continue;
        }
        selected += 1;

        if let Some(target) = target {
            if let Some(owner) = registry.blocking_collection(storage, &uri, target.name()) {
                warn!(uri = %uri, collection = owner.name(), "page is blocked, skipping");
                blocked.push(BlockedPage {
                    uri,
                    collection: owner.name().to_string(),
                });
                continue;
            }
        }

        let Some(updated) = job.apply(&uri, &bytes) else {
            continue;
        };
        if let Some(target) = target {
            target.write_to(storage, Bucket::Reviewed, &uri, &updated)?;
            info!(uri = %uri, "applying content fix");
            written.push(uri);
        }
    }

    let summary = job.finalize();
    info!(
        job = %summary.job,
        scanned,
        selected,
        written = written.len(),
        blocked = blocked.len(),
        "content job complete"
    );

    Ok(JobReport {
        summary,
        scanned,
        selected,
        collection: target.map(|collection| collection.name().to_string()),
        written,
        blocked,
        limit_reached,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{JobSpec, page_type, run_job};
    use crate::collection::{Bucket, Collection};
    use crate::error::error_kind;
    use crate::registry::CollectionRegistry;
    use crate::runtime::StorePaths;
    use crate::scanner::ScanFilter;
    use crate::storage::{MemoryStorage, Storage};
    use crate::uri::TaxonomyUri;

    const OLD_EMAIL: &str = "@ons.gsi.gov.uk";
    const NEW_EMAIL: &str = "@ons.gov.uk";

    fn store() -> (MemoryStorage, StorePaths) {
        let storage = MemoryStorage::new();
        let paths = StorePaths::at(Path::new("/zeb"));
        let pages = [
            ("ts/a/data.json", r#"{"type":"timeseries","contact":"x@ons.gsi.gov.uk"}"#),
            ("ts/b/data.json", r#"{"type":"timeseries","contact":"y@ons.gsi.gov.uk, z@ons.gsi.gov.uk"}"#),
            ("ts/c/data.json", r#"{"type":"timeseries","contact":"c@ons.gov.uk"}"#),
            ("bulletins/d/data.json", r#"{"type":"bulletin","contact":"d@ons.gsi.gov.uk"}"#),
            ("ts/a/previous/v1/data.json", r#"{"type":"timeseries","contact":"old@ons.gsi.gov.uk"}"#),
            ("ts/a/chart.json", r#"{"type":"chart"}"#),
        ];
        for (relative, body) in pages {
            storage
                .write(&paths.master_dir.join(relative), body.as_bytes())
                .expect("write page");
        }
        storage
            .create_dir_all(&paths.collections_dir)
            .expect("collections");
        (storage, paths)
    }

    fn replace_emails(page_types: &[&str]) -> JobSpec {
        JobSpec::ReplaceText {
            from: OLD_EMAIL.to_string(),
            to: NEW_EMAIL.to_string(),
            page_types: page_types.iter().map(|kind| kind.to_string()).collect(),
        }
    }

    #[test]
    fn count_pages_groups_by_type() {
        let (storage, paths) = store();
        let registry = CollectionRegistry::load(&storage, &paths.collections_dir).expect("load");
        let mut job = JobSpec::CountPages {
            page_types: Vec::new(),
            contains: None,
        }
        .build()
        .expect("build");

        let report = run_job(
            &storage,
            &paths,
            &registry,
            job.as_mut(),
            None,
            &ScanFilter::page_files(),
            None,
        )
        .expect("run");

        assert_eq!(report.scanned, 4);
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.by_type["timeseries"], 3);
        assert_eq!(report.summary.by_type["bulletin"], 1);
        assert!(report.written.is_empty());
    }

    #[test]
    fn count_pages_filters_by_type_and_text() {
        let (storage, paths) = store();
        let registry = CollectionRegistry::default();
        let mut job = JobSpec::CountPages {
            page_types: vec!["timeseries".to_string()],
            contains: Some(OLD_EMAIL.to_string()),
        }
        .build()
        .expect("build");

        let report = run_job(
            &storage,
            &paths,
            &registry,
            job.as_mut(),
            None,
            &ScanFilter::page_files(),
            None,
        )
        .expect("run");
        assert_eq!(report.selected, 2);
        assert_eq!(report.summary.total, 2);
    }

    #[test]
    fn replace_stages_changed_pages_in_reviewed() {
        let (storage, paths) = store();
        let fix = Collection::create(&storage, &paths.collections_dir, "fix", "o", "manual")
            .expect("create");
        let registry = CollectionRegistry::load(&storage, &paths.collections_dir).expect("load");
        let mut job = replace_emails(&["timeseries"]).build().expect("build");

        let report = run_job(
            &storage,
            &paths,
            &registry,
            job.as_mut(),
            Some(&fix),
            &ScanFilter::page_files(),
            None,
        )
        .expect("run");

        let written: Vec<&str> = report.written.iter().map(TaxonomyUri::as_str).collect();
        assert_eq!(written, vec!["/ts/a/data.json", "/ts/b/data.json"]);
        assert_eq!(report.summary.replacements, 3);
        assert_eq!(report.summary.by_type["timeseries"], 2);

        let (bucket, bytes) = fix
            .read(&storage, &TaxonomyUri::parse("/ts/b/data.json").expect("uri"))
            .expect("read")
            .expect("staged");
        assert_eq!(bucket, Bucket::Reviewed);
        let staged = String::from_utf8(bytes).expect("utf8");
        assert!(!staged.contains(OLD_EMAIL));
        assert!(staged.contains("y@ons.gov.uk, z@ons.gov.uk"));

        // master untouched, previous versions skipped
        let master = storage
            .read(&paths.master_dir.join("ts/b/data.json"))
            .expect("master");
        assert!(String::from_utf8_lossy(&master).contains(OLD_EMAIL));
        assert!(
            !fix.contains(
                &storage,
                &TaxonomyUri::parse("/ts/a/previous/v1/data.json").expect("uri")
            )
        );
    }

    #[test]
    fn replace_skips_blocked_pages_and_honours_limit() {
        let (storage, paths) = store();
        let other = Collection::create(&storage, &paths.collections_dir, "other", "o", "manual")
            .expect("other");
        other
            .add_content(
                &storage,
                &TaxonomyUri::parse("/bulletins/d/data.json").expect("uri"),
                b"{}",
            )
            .expect("stage");
        let fix = Collection::create(&storage, &paths.collections_dir, "fix", "o", "manual")
            .expect("create");
        let registry = CollectionRegistry::load(&storage, &paths.collections_dir).expect("load");

        let mut job = replace_emails(&[]).build().expect("build");
        let report = run_job(
            &storage,
            &paths,
            &registry,
            job.as_mut(),
            Some(&fix),
            &ScanFilter::page_files(),
            None,
        )
        .expect("run");
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].collection, "other");
        assert_eq!(report.written.len(), 2);

        let mut limited = replace_emails(&[]).build().expect("build");
        let report = run_job(
            &storage,
            &paths,
            &registry,
            limited.as_mut(),
            Some(&fix),
            &ScanFilter::page_files(),
            Some(1),
        )
        .expect("run");
        assert_eq!(report.written.len(), 1);
        assert!(report.limit_reached);
    }

    #[test]
    fn replace_requires_collection_and_distinct_text() {
        let (storage, paths) = store();
        let mut job = replace_emails(&[]).build().expect("build");
        let err = run_job(
            &storage,
            &paths,
            &CollectionRegistry::default(),
            job.as_mut(),
            None,
            &ScanFilter::page_files(),
            None,
        )
        .expect_err("needs collection");
        assert_eq!(error_kind(&err).expect("kind").kind(), "configuration");

        let same = JobSpec::ReplaceText {
            from: "a".to_string(),
            to: "a".to_string(),
            page_types: Vec::new(),
        };
        assert!(same.build().is_err());
    }

    #[test]
    fn page_type_defaults_when_field_missing() {
        assert_eq!(page_type(br#"{"type":"bulletin"}"#).as_deref(), Some("bulletin"));
        assert_eq!(page_type(b"{}").as_deref(), Some("unknown"));
        assert_eq!(page_type(b"not json"), None);
    }
}
