use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use zebedee_utils_core::collection::{Bucket, Collection};
use zebedee_utils_core::config::{BlockedPolicy, ToolConfig, load_config};
use zebedee_utils_core::jobs::{JobReport, JobSpec, run_job};
use zebedee_utils_core::moves::{MoveOptions, MoveReport, MoveRequest, move_content};
use zebedee_utils_core::registry::CollectionRegistry;
use zebedee_utils_core::runtime::{
    PathOverrides, ResolutionContext, StorePaths, ensure_store_ready, normalize_for_display,
    resolve_paths,
};
use zebedee_utils_core::scanner::{ScanFilter, stale_reference_report};
use zebedee_utils_core::storage::DiskStorage;
use zebedee_utils_core::uri::TaxonomyUri;

const DEFAULT_LOG_FILTER: &str = "zebedee_utils=info,zebedee_utils_core=info";

#[derive(Debug, Parser)]
#[command(
    name = "zebedee-utils",
    version,
    about = "Stage content moves and bulk fixes in a Zebedee content store"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Store root holding master/ and collections/")]
    zeb_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Back-references already staged by another collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BlockedPolicyArg {
    /// Fail the move before anything is written
    Abort,
    /// Leave those pages out and list them in the report
    Skip,
}

impl From<BlockedPolicyArg> for BlockedPolicy {
    fn from(value: BlockedPolicyArg) -> Self {
        match value {
            BlockedPolicyArg::Abort => BlockedPolicy::Abort,
            BlockedPolicyArg::Skip => BlockedPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    zeb_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            zeb_root: cli.zeb_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Stage a subtree under a new uri and fix every reference to it")]
    Move(MoveArgs),
    Collection(CollectionArgs),
    Links(LinksArgs),
    Job(JobArgs),
}

#[derive(Debug, Args)]
struct MoveArgs {
    #[arg(long, value_name = "NAME", help = "Collection to stage the move in")]
    collection: String,
    #[arg(long, value_name = "URI", help = "Current uri of the content")]
    src: String,
    #[arg(long, value_name = "URI", help = "New uri for the content")]
    dest: String,
    #[arg(long, help = "Create the collection instead of using an existing one")]
    create: bool,
    #[arg(long, help = "Report what would be staged without writing anything")]
    dry_run: bool,
    #[arg(
        long,
        value_enum,
        value_name = "POLICY",
        help = "What to do with pages staged by other collections"
    )]
    blocked_policy: Option<BlockedPolicyArg>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[arg(long, help = "Show a unified diff for every fixed reference")]
    diff: bool,
}

#[derive(Debug, Args)]
struct CollectionArgs {
    #[command(subcommand)]
    command: CollectionSubcommand,
}

#[derive(Debug, Subcommand)]
enum CollectionSubcommand {
    Create { name: String },
    Delete { name: String },
    List,
    Show { name: String },
}

#[derive(Debug, Args)]
struct LinksArgs {
    #[command(subcommand)]
    command: LinksSubcommand,
}

#[derive(Debug, Subcommand)]
enum LinksSubcommand {
    #[command(about = "List master pages still referencing a moved uri")]
    Stale {
        uri: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct JobArgs {
    #[command(subcommand)]
    command: JobSubcommand,
}

#[derive(Debug, Subcommand)]
enum JobSubcommand {
    #[command(about = "Count pages by type")]
    Count {
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<String>,
        #[arg(long, value_name = "TEXT")]
        contains: Option<String>,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Replace text in pages and stage them for review")]
    Replace {
        #[arg(long, value_name = "TEXT")]
        from: String,
        #[arg(long, value_name = "TEXT")]
        to: String,
        #[arg(long, value_name = "NAME")]
        collection: String,
        #[arg(long)]
        create: bool,
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<String>,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

struct Store {
    storage: DiskStorage,
    paths: StorePaths,
    config: ToolConfig,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Move(args)) => run_move(&runtime, args),
        Some(Commands::Collection(CollectionArgs { command })) => match command {
            CollectionSubcommand::Create { name } => run_collection_create(&runtime, &name),
            CollectionSubcommand::Delete { name } => run_collection_delete(&runtime, &name),
            CollectionSubcommand::List => run_collection_list(&runtime),
            CollectionSubcommand::Show { name } => run_collection_show(&runtime, &name),
        },
        Some(Commands::Links(LinksArgs { command })) => match command {
            LinksSubcommand::Stale { uri, json } => run_links_stale(&runtime, &uri, json),
        },
        Some(Commands::Job(JobArgs { command })) => match command {
            JobSubcommand::Count {
                types,
                contains,
                json,
            } => run_job_command(
                &runtime,
                JobSpec::CountPages {
                    page_types: types,
                    contains,
                },
                None,
                None,
                json,
            ),
            JobSubcommand::Replace {
                from,
                to,
                collection,
                create,
                types,
                limit,
                json,
            } => run_job_command(
                &runtime,
                JobSpec::ReplaceText {
                    from,
                    to,
                    page_types: types,
                },
                Some((collection, create)),
                limit,
                json,
            ),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run_move(runtime: &RuntimeOptions, args: MoveArgs) -> Result<()> {
    let store = open_store(runtime)?;
    let mut options = MoveOptions::from_config(&store.config);
    if let Some(policy) = args.blocked_policy {
        options.blocked_policy = policy.into();
    }
    options.dry_run = args.dry_run;
    options.preview_diffs = args.diff || args.dry_run;

    let request = MoveRequest {
        source: TaxonomyUri::parse(&args.src)?,
        destination: TaxonomyUri::parse(&args.dest)?,
        collection: args.collection,
        create_collection: args.create,
    };
    let report = move_content(&store.storage, &store.paths, &request, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_move_report(&report, args.diff);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn print_move_report(report: &MoveReport, show_diffs: bool) {
    let plan = &report.plan;
    println!("content move{}", if report.dry_run { " (dry run)" } else { "" });
    println!("collection: {}", plan.collection);
    println!("created_collection: {}", format_flag(plan.creates_collection));
    println!("source: {}", plan.source_uri);
    println!("destination: {}", plan.destination_uri);
    println!("blocked_policy: {}", report.blocked_policy.as_str());
    println!("references_found: {}", report.references_found);

    println!("moved.count: {}", report.moved.len());
    for file in &report.moved {
        println!(
            "moved: {} -> {} ({} bytes, {}, sha256:{})",
            file.source_uri,
            file.destination_uri,
            file.bytes,
            if file.rewritten { "rewritten" } else { "copied" },
            file.digest
        );
    }

    println!("fixed.count: {}", report.fixed.len());
    for file in &report.fixed {
        println!("fixed: {} ({} occurrences)", file.uri, file.occurrences);
        if show_diffs || report.dry_run {
            if let Some(diff) = &file.diff {
                print!("{diff}");
            }
        }
    }

    if report.blocked.is_empty() {
        println!("blocked: <none>");
    } else {
        for file in &report.blocked {
            println!("blocked: {} (collection {})", file.uri, file.collection);
        }
    }

    if !report.uri_mismatches.is_empty() {
        println!("warnings:");
        for mismatch in &report.uri_mismatches {
            println!(
                "  - {} declares uri {} but lives at {}",
                mismatch.file, mismatch.found, mismatch.expected
            );
        }
    }
}

fn run_collection_create(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    let store = open_store(runtime)?;
    let collection = Collection::create(
        &store.storage,
        &store.paths.collections_dir,
        name,
        &store.config.collection_owner(),
        &store.config.collection_type(),
    )?;

    println!("collection created");
    println!("name: {}", collection.name());
    println!("id: {}", collection.manifest.id);
    println!("owner: {}", collection.manifest.collection_owner);
    println!("manifest: {}", normalize_for_display(&collection.layout.manifest));
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn run_collection_delete(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    let store = open_store(runtime)?;
    Collection::delete(&store.storage, &store.paths.collections_dir, name)?;

    println!("collection deleted");
    println!("name: {name}");
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn run_collection_list(runtime: &RuntimeOptions) -> Result<()> {
    let store = open_store(runtime)?;
    let registry = CollectionRegistry::load(&store.storage, &store.paths.collections_dir)?;

    println!("collections");
    println!("collections_dir: {}", normalize_for_display(&store.paths.collections_dir));
    println!("count: {}", registry.len());
    for collection in registry.iter() {
        println!(
            "collection: {} ({})",
            collection.name(),
            collection.manifest.approval_status.as_str()
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn run_collection_show(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    let store = open_store(runtime)?;
    let collection = Collection::load(&store.storage, &store.paths.collections_dir, name)?;
    let staged = collection.staged_files(&store.storage)?;

    println!("collection");
    println!("name: {}", collection.name());
    println!("id: {}", collection.manifest.id);
    println!("type: {}", collection.manifest.collection_type);
    println!("owner: {}", collection.manifest.collection_owner);
    println!(
        "approval_status: {}",
        collection.manifest.approval_status.as_str()
    );
    for bucket in Bucket::ALL {
        let uris = staged.get(&bucket).map(Vec::as_slice).unwrap_or_default();
        println!("{}.count: {}", bucket.dir_name(), uris.len());
        for uri in uris {
            println!("{}: {uri}", bucket.dir_name());
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn run_links_stale(runtime: &RuntimeOptions, uri: &str, json: bool) -> Result<()> {
    let store = open_store(runtime)?;
    let old_uri = TaxonomyUri::parse(uri)?;
    let registry = CollectionRegistry::load(&store.storage, &store.paths.collections_dir)?;
    let report = stale_reference_report(
        &store.storage,
        &store.paths,
        &registry,
        &old_uri,
        &ScanFilter::for_moves(&store.config),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("stale links");
    println!("target: {}", report.old_uri);
    println!("references.count: {}", report.references.len());
    println!("unresolved.count: {}", report.unresolved().count());
    for reference in &report.references {
        let staging = match (&reference.staged_in, reference.fixed_in_staging) {
            (Some(collection), true) => format!("fixed in {collection}"),
            (Some(collection), false) => format!("staged in {collection}, still stale"),
            (None, _) => "unresolved".to_string(),
        };
        println!(
            "reference: {} ({} occurrences, {staging})",
            reference.uri, reference.occurrences
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn run_job_command(
    runtime: &RuntimeOptions,
    spec: JobSpec,
    collection: Option<(String, bool)>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let store = open_store(runtime)?;
    let mut job = spec.build()?;

    let target = match &collection {
        Some((name, true)) => Some(Collection::create(
            &store.storage,
            &store.paths.collections_dir,
            name,
            &store.config.collection_owner(),
            &store.config.collection_type(),
        )?),
        Some((name, false)) => Some(Collection::load(
            &store.storage,
            &store.paths.collections_dir,
            name,
        )?),
        None => None,
    };
    let registry = CollectionRegistry::load(&store.storage, &store.paths.collections_dir)?;
    let report = run_job(
        &store.storage,
        &store.paths,
        &registry,
        job.as_mut(),
        target.as_ref(),
        &ScanFilter::for_jobs(&store.config),
        limit.or(store.config.jobs.limit),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_job_report(&report);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", store.paths.diagnostics());
    }
    Ok(())
}

fn print_job_report(report: &JobReport) {
    println!("content job");
    println!("job: {}", report.summary.job);
    println!(
        "collection: {}",
        report.collection.as_deref().unwrap_or("<none>")
    );
    println!("scanned: {}", report.scanned);
    println!("selected: {}", report.selected);
    println!("total: {}", report.summary.total);
    for (page_type, count) in &report.summary.by_type {
        println!("by_type.{page_type}: {count}");
    }
    if report.summary.replacements > 0 {
        println!("replacements: {}", report.summary.replacements);
    }
    println!("written.count: {}", report.written.len());
    println!("limit_reached: {}", format_flag(report.limit_reached));
    if report.blocked.is_empty() {
        println!("blocked: <none>");
    } else {
        for page in &report.blocked {
            println!("blocked: {} (collection {})", page.uri, page.collection);
        }
    }
}

fn open_store(runtime: &RuntimeOptions) -> Result<Store> {
    let paths = resolve_runtime_paths(runtime)?;
    let storage = DiskStorage;
    ensure_store_ready(&storage, &paths)?;
    let config = load_config(&paths.config_path)?;
    Ok(Store {
        storage,
        paths,
        config,
    })
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<StorePaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        zebedee_root: runtime.zeb_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let store_env = initial.zebedee_root.join(".env");
    if store_env.exists() {
        let _ = dotenvy::from_path_override(&store_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
