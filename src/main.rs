use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use formi::{
    cleanup_artifacts, BatchCoordinator, Config, ConfigBuilder, Discovery, ExecutionMode,
    FileResult, Operation, ToolRegistry,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "formi",
    version,
    author,
    about = "Compact and reformat source trees with the fastest installed tools",
    long_about = "Compact and reformat source trees with the fastest installed tools.\n\n\
    formi picks a formatter or minifier per file type (esbuild, biome, ruff, prettier, ...), \
    falls back to the next candidate when a tool is missing or fails, and replaces files \
    atomically.\n\n\
    USAGE EXAMPLES:\n  \
      # Minify a web project\n  \
      formi compact ./web\n\n  \
      # Preview reformatting without touching files\n  \
      formi reformat --dry-run ./src\n\n  \
      # Show which tools are installed\n  \
      formi tools --refresh\n\n  \
      # Remove leftover backups\n  \
      formi clean ./web"
)]
struct Cli {
    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for the tool availability cache
    #[arg(long, env = "FORMI_CACHE_DIR", value_name = "PATH", global = true)]
    cache_dir: Option<PathBuf>,

    /// Keep tool detection results in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Minify files
    Compact(ProcessArgs),

    /// Reformat files with a code formatter
    Reformat(ProcessArgs),

    /// List known tools and whether they are installed
    Tools {
        /// Discard cached results and probe again
        #[arg(long)]
        refresh: bool,
    },

    /// Remove backup, temporary and scratch files left by formi
    Clean {
        /// Directory to clean
        #[arg(default_value = ".", value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Files or directories to process
    #[arg(default_value = ".", value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Show what would happen without running tools or writing files
    #[arg(long)]
    dry_run: bool,

    /// Number of files processed concurrently
    #[arg(short, long, env = "FORMI_WORKERS")]
    workers: Option<usize>,

    /// Do not keep .formi_backup copies of replaced files
    #[arg(long, env = "FORMI_NO_BACKUP")]
    no_backup: bool,

    /// Additional glob pattern to skip (can be used multiple times)
    #[arg(short, long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Preferred tool for an extension (can be used multiple times)
    ///
    /// Example: formi reformat --prefer js=prettier ./src
    #[arg(long, value_name = "EXT=TOOL")]
    prefer: Vec<String>,

    /// Write a JSON report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    let builder = base_builder(&cli);

    match cli.command {
        Command::Compact(args) => process(builder, Operation::Compact, args),
        Command::Reformat(args) => process(builder, Operation::Reformat, args),
        Command::Tools { refresh } => tools(builder, refresh),
        Command::Clean { dir } => clean(&dir),
    }
}

fn base_builder(cli: &Cli) -> ConfigBuilder {
    let builder = Config::builder();
    if cli.no_cache {
        builder.no_cache()
    } else if let Some(dir) = &cli.cache_dir {
        builder.cache_dir(dir.clone())
    } else {
        builder
    }
}

fn process(builder: ConfigBuilder, operation: Operation, args: ProcessArgs) -> anyhow::Result<ExitCode> {
    let mut builder = builder.create_backup(!args.no_backup).exclude(args.exclude);

    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }

    for item in &args.prefer {
        let Some((ext, tool)) = item.split_once('=') else {
            bail!("Invalid --prefer value '{item}', expected EXT=TOOL");
        };
        builder = builder.prefer_tool(ext, tool);
    }

    let config = builder.build().context("Failed to build configuration")?;

    let mode = if args.dry_run {
        ExecutionMode::DryRun
    } else {
        ExecutionMode::Apply
    };

    let coordinator = BatchCoordinator::new(config).context("Failed to start formi")?;

    let files = Discovery::new(coordinator.config(), coordinator.catalog(), operation)
        .and_then(|discovery| discovery.collect(&args.paths))
        .context("Failed to collect files")?;

    let cwd = std::env::current_dir().unwrap_or_default();
    let quiet = args.quiet;
    let summary = coordinator
        .run_with_progress(&files, operation, mode, |result, done, total| {
            if !quiet {
                print_progress(result, done, total, &cwd);
            }
        })
        .context("Batch execution failed")?;

    summary.print_summary();

    if let Some(report) = &args.report {
        summary
            .write_report(report)
            .with_context(|| format!("Failed to write report to {}", report.display()))?;
    }

    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_progress(result: &FileResult, done: usize, total: usize, cwd: &Path) {
    let path = pathdiff::diff_paths(&result.path, cwd).unwrap_or_else(|| result.path.clone());

    if result.success {
        println!(
            "[{done}/{total}] ✓ {} ({}, {} → {} bytes)",
            path.display(),
            result.tool_used,
            result.original_size,
            result.final_size
        );
    } else {
        println!(
            "[{done}/{total}] ✗ {}: {}",
            path.display(),
            result.error.as_deref().unwrap_or("failed")
        );
    }
}

fn tools(builder: ConfigBuilder, refresh: bool) -> anyhow::Result<ExitCode> {
    let config = builder.build().context("Failed to build configuration")?;
    let registry = if refresh {
        ToolRegistry::fresh(&config)
    } else {
        ToolRegistry::new(&config)
    };

    let catalog = formi::CommandCatalog::builtin();
    let detected = registry.detect_all(catalog.tool_names());

    for (tool, available) in &detected {
        println!("{} {}", if *available { "✓" } else { "✗" }, tool);
    }

    let installed = detected.values().filter(|a| **a).count();
    println!("\n{installed}/{} tools available", detected.len());

    if let Some(path) = registry.cache_path() {
        println!("Cache: {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

fn clean(dir: &Path) -> anyhow::Result<ExitCode> {
    let removed = cleanup_artifacts(dir)
        .with_context(|| format!("Failed to clean {}", dir.display()))?;

    println!("Removed {removed} formi artifacts from {}", dir.display());
    Ok(ExitCode::SUCCESS)
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("formi=info"),
        1 => EnvFilter::new("formi=debug"),
        _ => EnvFilter::new("formi=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
