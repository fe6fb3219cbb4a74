use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{LevelFilter, info};
use m2c_core::config::{
    DestinationCredentials, MigrationConfig, SourceCredentials, load_config,
};
use m2c_core::diagnostics::{DiagnosticSink, FileDiagnosticLog, MemoryDiagnostics};
use m2c_core::ledger::Ledger;
use m2c_core::page::PageIndex;
use m2c_core::pipeline::{ImageRunOptions, PageRunOptions, Pipeline, StaticRunReport};
use m2c_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, normalize_for_display,
    resolve_paths,
};
use m2c_core::source::{MediaWikiClient, MediaWikiClientConfig, fetch_all_pages};
use m2c_core::submit::{ConfluenceCli, SubmitOutcome};

#[derive(Debug, Parser)]
#[command(
    name = "m2c",
    version,
    about = "Migrate MediaWiki pages, categories and images into Confluence"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Diagnostic log file")]
    log_file: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Debug logging")]
    verbose: bool,
    #[arg(short, long, global = true, help = "Only warnings and errors")]
    quiet: bool,
    #[arg(long, global = true, help = "Print resolved runtime paths")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    log_file: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            log_file: cli.log_file.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the .m2c runtime layout and default config
    Init(InitArgs),
    /// Create one destination space per space rule
    #[command(name = "static-spaces")]
    StaticSpaces(UndoArgs),
    /// Attach each space rule's labels to its space
    #[command(name = "static-labels")]
    StaticLabels(UndoArgs),
    /// Turn remaining source categories into labels on the default space
    #[command(name = "migrate-categories")]
    MigrateCategories(UndoArgs),
    /// Transcode and submit source pages
    #[command(name = "migrate-pages")]
    MigratePages(MigratePagesArgs),
    /// Download embedded images and attach them to migrated pages
    #[command(name = "migrate-images")]
    MigrateImages(MigrateImagesArgs),
    /// Preview the destination markup for a local wikitext file
    Transcode(TranscodeArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct UndoArgs {
    #[arg(long, help = "Remove what the command would create")]
    undo: bool,
}

#[derive(Debug, Args)]
struct MigratePagesArgs {
    #[arg(long, help = "Remove previously migrated pages")]
    undo: bool,
    #[arg(long, value_name = "N", help = "Process at most N pages")]
    limit: Option<usize>,
    #[arg(long, help = "Skip Category: namespace pages")]
    no_category_pages: bool,
}

#[derive(Debug, Args)]
struct MigrateImagesArgs {
    #[arg(long, help = "Remove previously attached images")]
    undo: bool,
    #[arg(long, value_name = "N", help = "Process images of at most N pages")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct TranscodeArgs {
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    #[arg(long, help = "Page title (defaults to the file stem)")]
    title: Option<String>,
    #[arg(long, value_name = "KEY", help = "Space key instead of the classified one")]
    space: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::StaticSpaces(args)) => run_static_spaces(&runtime, args),
        Some(Commands::StaticLabels(args)) => run_static_labels(&runtime, args),
        Some(Commands::MigrateCategories(args)) => run_migrate_categories(&runtime, args),
        Some(Commands::MigratePages(args)) => run_migrate_pages(&runtime, args),
        Some(Commands::MigrateImages(args)) => run_migrate_images(&runtime, args),
        Some(Commands::Transcode(args)) => run_transcode(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if quiet {
        builder.filter_level(LevelFilter::Warn);
    } else if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;

    println!("Initialized m2c runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_runtime_diagnostics(runtime, &paths);
    Ok(())
}

/// Everything a destination-facing command needs, acquired before any work.
struct Session {
    paths: ResolvedPaths,
    config: MigrationConfig,
    submitter: ConfluenceCli,
    diagnostics: FileDiagnosticLog,
}

impl Session {
    fn open(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let config = load_config(&paths.config_path)?;
        let credentials = DestinationCredentials::from_env()?;
        let submitter = ConfluenceCli::new(&credentials, &config.destination_url())?;
        let diagnostics = FileDiagnosticLog::open(&paths.log_path)?;
        Ok(Self {
            paths,
            config,
            submitter,
            diagnostics,
        })
    }

    fn connect_source(&self) -> Result<MediaWikiClient> {
        let credentials = SourceCredentials::from_env()?;
        MediaWikiClient::connect(MediaWikiClientConfig::from_config(&self.config), &credentials)
    }

    fn open_ledger(&self) -> Result<Ledger> {
        Ledger::open(&self.paths.db_path)
    }
}

fn run_static_spaces(runtime: &RuntimeOptions, args: UndoArgs) -> Result<()> {
    let mut session = Session::open(runtime)?;
    let pipeline = Pipeline::new(&session.config);
    let report = pipeline.static_spaces(args.undo, &mut session.submitter, &mut session.diagnostics);

    println!("static spaces");
    print_static_report(&report);
    print_runtime_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_static_labels(runtime: &RuntimeOptions, args: UndoArgs) -> Result<()> {
    let mut session = Session::open(runtime)?;
    let pipeline = Pipeline::new(&session.config);
    let report = pipeline.static_labels(args.undo, &mut session.submitter, &mut session.diagnostics);

    println!("static labels");
    print_static_report(&report);
    print_runtime_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_migrate_categories(runtime: &RuntimeOptions, args: UndoArgs) -> Result<()> {
    let mut session = Session::open(runtime)?;
    let mut source = session.connect_source()?;
    let pipeline = Pipeline::new(&session.config);
    let report = pipeline.migrate_categories(
        args.undo,
        &mut source,
        &mut session.submitter,
        &mut session.diagnostics,
    )?;

    println!("migrate categories");
    println!("source_categories: {}", report.source_categories);
    println!("labels: {}", report.labels.len());
    println!(
        "outcome: {}",
        match &report.outcome {
            Some(SubmitOutcome::Success(_)) => "success",
            Some(SubmitOutcome::Duplicate(_)) => "already present",
            Some(SubmitOutcome::Failure(_)) => "failed",
            None => "nothing to submit",
        }
    );
    println!("source_requests: {}", source.request_count());
    print_runtime_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_migrate_pages(runtime: &RuntimeOptions, args: MigratePagesArgs) -> Result<()> {
    let mut session = Session::open(runtime)?;
    let ledger = session.open_ledger()?;
    let mut source = session.connect_source()?;

    let index = PageIndex::new(fetch_all_pages(&mut source, true)?);
    info!("indexed {} source pages", index.len());

    let pipeline = Pipeline::new(&session.config);
    let report = pipeline.migrate_pages(
        &index,
        PageRunOptions {
            undo: args.undo,
            limit: args.limit,
            include_categories: !args.no_category_pages,
        },
        &mut session.submitter,
        &ledger,
        &mut session.diagnostics,
    );

    println!("migrate pages{}", if args.undo { " (undo)" } else { "" });
    println!("indexed: {}", index.len());
    println!("considered: {}", report.considered);
    println!("created: {}", report.created);
    println!("renamed: {}", report.renamed);
    println!("redirects_dropped: {}", report.redirects_dropped);
    println!("removed: {}", report.removed);
    println!("failed: {}", report.failed);
    println!("diagnostics: {}", report.diagnostics);
    println!("ledger_entries: {}", ledger.count()?);
    println!(
        "diagnostic_log: {}",
        normalize_for_display(session.diagnostics.path())
    );
    print_runtime_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_migrate_images(runtime: &RuntimeOptions, args: MigrateImagesArgs) -> Result<()> {
    let mut session = Session::open(runtime)?;
    let ledger = session.open_ledger()?;
    let mut source = session.connect_source()?;

    let index = PageIndex::new(fetch_all_pages(&mut source, false)?);
    let pipeline = Pipeline::new(&session.config);
    let report = pipeline.migrate_images(
        &index,
        ImageRunOptions {
            undo: args.undo,
            limit: args.limit,
        },
        &mut source,
        &mut session.submitter,
        &ledger,
        &session.paths.images_dir,
        &mut session.diagnostics,
    );

    println!("migrate images{}", if args.undo { " (undo)" } else { "" });
    println!("pages: {}", report.pages);
    println!("images: {}", report.images);
    println!("attached: {}", report.attached);
    println!("removed: {}", report.removed);
    println!("download_failures: {}", report.download_failures);
    println!("failed: {}", report.failed);
    println!("images_dir: {}", normalize_for_display(&session.paths.images_dir));
    print_runtime_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_transcode(runtime: &RuntimeOptions, args: TranscodeArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let body = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let title = match args.title {
        Some(title) => title,
        None => title_from_file(&args.file)?,
    };

    let pipeline = Pipeline::new(&config);
    let mut diagnostics = MemoryDiagnostics::default();
    let preview = pipeline.transcode_preview(&title, &body, args.space.as_deref(), &mut diagnostics);

    println!("title: {}", preview.title);
    println!("space: {}", preview.space_key);
    println!("redirect: {}", preview.redirect);
    println!("labels: {}", preview.labels);
    println!("diagnostics: {}", diagnostics.recorded());
    for entry in diagnostics.entries() {
        println!("  - {}: {}", entry.kind(), entry.detail());
    }
    if !preview.redirect {
        println!();
        println!("{}", preview.body);
    }
    print_runtime_diagnostics(runtime, &paths);
    Ok(())
}

fn title_from_file(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("cannot derive a page title from {}", path.display()))?;
    Ok(stem.replace('_', " "))
}

fn print_static_report(report: &StaticRunReport) {
    println!("submitted: {}", report.submitted);
    println!("succeeded: {}", report.succeeded);
    println!("already_present: {}", report.already_present);
    println!("failed: {}", report.failed);
}

fn print_runtime_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        log_file: runtime.log_file.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}
