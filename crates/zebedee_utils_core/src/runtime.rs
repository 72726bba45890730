use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::ZebedeeError;
use crate::storage::Storage;

pub const MASTER_DIR: &str = "master";
pub const COLLECTIONS_DIR: &str = "collections";
pub const CONFIG_FILENAME: &str = ".zebedee-utils.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub zebedee_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

/// Where the content store and its collections live.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub zebedee_root: PathBuf,
    pub master_dir: PathBuf,
    pub collections_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl StorePaths {
    /// Layout rooted at `zebedee_root` with default config location.
    pub fn at(zebedee_root: &Path) -> Self {
        Self {
            zebedee_root: zebedee_root.to_path_buf(),
            master_dir: zebedee_root.join(MASTER_DIR),
            collections_dir: zebedee_root.join(COLLECTIONS_DIR),
            config_path: zebedee_root.join(CONFIG_FILENAME),
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "zebedee_root={} ({})\nmaster_dir={}\ncollections_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.zebedee_root),
            self.root_source.as_str(),
            normalize_for_display(&self.master_dir),
            normalize_for_display(&self.collections_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn resolve_paths(context: &ResolutionContext, overrides: &PathOverrides) -> Result<StorePaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<StorePaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (zebedee_root, root_source) = resolve_zebedee_root(context, overrides, &lookup_env);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("ZEBEDEE_UTILS_CONFIG")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (zebedee_root.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(StorePaths {
        master_dir: zebedee_root.join(MASTER_DIR),
        collections_dir: zebedee_root.join(COLLECTIONS_DIR),
        zebedee_root,
        config_path,
        root_source,
        config_source,
    })
}

/// Both `master/` and `collections/` must exist before anything touches the store.
pub fn ensure_store_ready(storage: &dyn Storage, paths: &StorePaths) -> Result<()> {
    let master_ok = storage.is_dir(&paths.master_dir);
    let collections_ok = storage.is_dir(&paths.collections_dir);
    if master_ok && collections_ok {
        return Ok(());
    }

    Err(ZebedeeError::configuration(format!(
        "zebedee root is not a content store: {}\n  - {}\n  - {}\nPass --zeb-root or set ZEBEDEE_ROOT",
        normalize_for_display(&paths.zebedee_root),
        if master_ok {
            "master/ (ok)"
        } else {
            "master/ (missing)"
        },
        if collections_ok {
            "collections/ (ok)"
        } else {
            "collections/ (missing)"
        },
    ))
    .into())
}

fn resolve_zebedee_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.zebedee_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = non_empty(lookup_env("ZEBEDEE_ROOT")) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    match detect_root_heuristic(&context.cwd) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn detect_root_heuristic(cwd: &Path) -> Option<PathBuf> {
    for candidate in cwd.ancestors() {
        if candidate.join(MASTER_DIR).is_dir() && candidate.join(COLLECTIONS_DIR).is_dir() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        PathOverrides, ResolutionContext, StorePaths, ValueSource, ensure_store_ready,
        resolve_paths_with_lookup,
    };
    use crate::error::error_kind;
    use crate::storage::DiskStorage;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            zebedee_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext { cwd: cwd.clone() };
        let env = HashMap::from([(
            "ZEBEDEE_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.zebedee_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.master_dir, from_flag.join("master"));
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn resolve_paths_uses_env_then_heuristic() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("zebedee");
        let nested = root.join("master").join("economy");
        fs::create_dir_all(&nested).expect("create master");
        fs::create_dir_all(root.join("collections")).expect("create collections");

        let context = ResolutionContext { cwd: nested.clone() };
        let env = HashMap::from([("ZEBEDEE_ROOT".to_string(), "relative-root".to_string())]);
        let from_env = resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
            env.get(key).cloned()
        })
        .expect("resolve env");
        assert_eq!(from_env.zebedee_root, nested.join("relative-root"));
        assert_eq!(from_env.root_source, ValueSource::Env);

        let detected = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve heuristic");
        assert_eq!(detected.zebedee_root, root);
        assert_eq!(detected.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn store_readiness_reports_missing_dirs() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("zebedee");
        fs::create_dir_all(root.join("master")).expect("create master");
        let paths = StorePaths::at(&root);

        let err = ensure_store_ready(&DiskStorage, &paths).expect_err("must fail");
        assert_eq!(error_kind(&err).expect("kind").kind(), "configuration");
        assert!(err.to_string().contains("collections/ (missing)"));

        fs::create_dir_all(&paths.collections_dir).expect("create collections");
        ensure_store_ready(&DiskStorage, &paths).expect("ready");
    }
}
