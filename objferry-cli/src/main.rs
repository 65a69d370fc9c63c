use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use objferry::config::validate_endpoint;
use objferry::{
    default_database_path, init_logging, load_endpoint_config, BackendKind, Database,
    EndpointConfig, FileSystemBackend, JobController, JobError, MetadataOptions, MoveOptions,
    ObjectBackend, PassReport,
};

/// Resumable object migration between filesystem trees and object stores
#[derive(Parser, Debug)]
#[command(name = "objferry", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Catalog database file
    #[arg(long, global = true, value_name = "PATH", env = "OBJFERRY_DB")]
    db: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a job and migrate everything under the source scope
    Move {
        #[command(flatten)]
        endpoints: Endpoints,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Verify both endpoints without creating a job
    Check {
        #[command(flatten)]
        endpoints: Endpoints,
    },
    /// Signal a running job and mark it stopped
    Stop {
        #[arg(long = "job", value_name = "ID")]
        job_id: i64,
    },
    /// Drop a job's catalog
    Remove {
        #[arg(long = "job", value_name = "ID")]
        job_id: i64,
    },
    /// Reconcile a finished or stopped job against the source and move changes
    Rerun {
        #[arg(long = "job", value_name = "ID")]
        job_id: i64,
        #[command(flatten)]
        endpoints: Endpoints,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Show job progress
    Status {
        #[arg(long = "job", value_name = "ID")]
        job_id: Option<i64>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct Endpoints {
    /// Source endpoint YAML
    #[arg(long, value_name = "YAML")]
    source: PathBuf,
    /// Target endpoint YAML
    #[arg(long, value_name = "YAML")]
    target: PathBuf,
}

#[derive(Args, Debug)]
struct Tuning {
    /// Worker threads
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=512))]
    threads: u16,
    /// Rows fetched from the catalog per dispatch page
    #[arg(long, default_value_t = 100)]
    batch_size: usize,
    /// Carry extended attributes
    #[arg(long)]
    xattr: bool,
    /// Carry permission bits
    #[arg(long)]
    perm: bool,
    /// Carry modification times
    #[arg(long)]
    time: bool,
}

impl Tuning {
    fn options(&self) -> MoveOptions {
        MoveOptions {
            threads: usize::from(self.threads),
            batch_size: self.batch_size.max(1),
            metadata: MetadataOptions {
                xattr: self.xattr,
                permissions: self.perm,
                timestamps: self.time,
            },
            ..MoveOptions::default()
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs).context("Failed to initialize logging")?;
    info!("Starting objferry v{}", env!("CARGO_PKG_VERSION"));

    let db = open_database(cli.db.as_deref())?;

    match cli.command {
        Command::Move { endpoints, tuning } => {
            let (source, target) = open_endpoints(&endpoints)?;
            let controller = controller(db, tuning.options())?;
            let report = controller.start_move(source, target)?;
            print_report(&report);
        }
        Command::Check { endpoints } => {
            let (source, target) = open_endpoints(&endpoints)?;
            JobController::new(db, MoveOptions::default())
                .check(source.as_ref(), target.as_ref())?;
            println!("Check passed: {} -> {}", source.display_point(), target.display_point());
        }
        Command::Stop { job_id } => {
            JobController::new(db, MoveOptions::default()).stop(job_id)?;
            println!("Job {} stopped", job_id);
        }
        Command::Remove { job_id } => {
            JobController::new(db, MoveOptions::default()).remove(job_id)?;
            println!("Job {} removed", job_id);
        }
        Command::Rerun {
            job_id,
            endpoints,
            tuning,
        } => {
            let (source, target) = open_endpoints(&endpoints)?;
            let controller = controller(db, tuning.options())?;
            let report = controller.rerun(job_id, source, target)?;
            print_report(&report);
        }
        Command::Status { job_id, json } => {
            let statuses = JobController::new(db, MoveOptions::default()).status(job_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else if statuses.is_empty() {
                println!("No jobs");
            } else {
                for status in &statuses {
                    print!("{}", status);
                }
            }
        }
    }
    Ok(())
}

fn open_database(path: Option<&Path>) -> Result<Database> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_database_path().context("Could not determine home directory")?,
    };
    Database::open(&path).with_context(|| format!("Failed to open catalog {}", path.display()))
}

/// Job controller whose shutdown flag is raised by SIGINT/SIGTERM.
fn controller(db: Database, options: MoveOptions) -> Result<JobController> {
    let controller = JobController::new(db, options);
    let shutdown_flag = controller.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight transfers...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;
    Ok(controller)
}

type EndpointPair = (Arc<dyn ObjectBackend>, Arc<dyn ObjectBackend>);

fn open_endpoints(endpoints: &Endpoints) -> Result<EndpointPair> {
    let source = open_endpoint(&endpoints.source, "source")?;
    let target = open_endpoint(&endpoints.target, "target")?;
    Ok((source, target))
}

fn open_endpoint(path: &Path, role: &str) -> Result<Arc<dyn ObjectBackend>> {
    let config = load_endpoint_config(path)
        .with_context(|| format!("Invalid {} endpoint {}", role, path.display()))?;
    build_backend(&config).with_context(|| format!("Cannot open {} endpoint", role))
}

fn build_backend(config: &EndpointConfig) -> Result<Arc<dyn ObjectBackend>> {
    validate_endpoint(config)?;
    match (config.kind, config.mountpoint.as_deref()) {
        (BackendKind::FileSystem, Some(mountpoint)) => Ok(Arc::new(FileSystemBackend::new(
            mountpoint,
            &config.prefix,
        ))),
        (BackendKind::FileSystem, None) => bail!("filesystem endpoint has no mountpoint"),
        (kind, _) => Err(JobError::Precondition(format!(
            "{} endpoints need an adapter linked through the library API",
            kind
        ))
        .into()),
    }
}

fn print_report(report: &PassReport) {
    println!(
        "Job {} pass {} finished: {}",
        report.job_id, report.pass_no, report.final_state
    );
    println!(
        "  scanned {} (inserted {}, reset {}, unchanged {}, pruned {})",
        report.scan.discovered,
        report.scan.inserted,
        report.scan.reset,
        report.scan.unchanged,
        report.scan.pruned
    );
    println!(
        "  moved {} ({}), deleted {}, failed {}",
        report.summary.moved,
        objferry::job::format_bytes(report.summary.moved_bytes),
        report.summary.deleted,
        report.summary.failed
    );
    if report.backlog > 0 {
        println!(
            "  {} catalog writes could not be recorded; run rerun --job {} to reconcile",
            report.backlog, report.job_id
        );
    }
}
