use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rd_processor::{Config, FlowKind, Session};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rd-process")]
#[command(about = "Filter award and proposal extracts to the faculty roster and tag fiscal periods")]
#[command(version)]
struct Cli {
    /// Faculty master file (xlsx, xls or delimited text)
    #[arg(long)]
    roster: PathBuf,

    /// Awards extract
    #[arg(long)]
    awards: Option<PathBuf>,

    /// Proposals extract
    #[arg(long)]
    proposals: Option<PathBuf>,

    /// Directory for Processed_*.xlsx
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// TOML file overriding column names and parsing policies
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the first processed rows of each flow
    #[arg(long)]
    preview: bool,
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let written = run(&cli)?;
    info!(files = written.len(), "done");
    Ok(())
}

/// Process every requested flow. A failing flow is logged and skipped;
/// the run fails only when the roster fails or no requested flow succeeds.
fn run(cli: &Cli) -> Result<Vec<PathBuf>> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut session = Session::with_config(&config);

    let roster_bytes = fs::read(&cli.roster)
        .with_context(|| format!("Failed to read roster {}", cli.roster.display()))?;
    session
        .load_roster(&roster_bytes)
        .with_context(|| format!("Failed to load roster {}", cli.roster.display()))?;

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("Failed to create {}", cli.out_dir.display()))?;

    let requested: Vec<(FlowKind, &Path)> = [
        (FlowKind::Awards, cli.awards.as_deref()),
        (FlowKind::Proposals, cli.proposals.as_deref()),
    ]
    .into_iter()
    .filter_map(|(kind, path)| path.map(|p| (kind, p)))
    .collect();

    if requested.is_empty() {
        warn!("nothing to process: pass --awards and/or --proposals");
        return Ok(Vec::new());
    }

    let mut written = Vec::new();
    for (kind, path) in &requested {
        match process_flow(&mut session, *kind, path, cli) {
            Ok(out) => {
                info!(flow = %kind, output = %out.display(), "written");
                written.push(out);
            }
            Err(e) => error!(flow = %kind, input = %path.display(), "{e:#}"),
        }
    }

    if written.is_empty() {
        bail!("every requested flow failed");
    }
    Ok(written)
}

fn process_flow(session: &mut Session, kind: FlowKind, path: &Path, cli: &Cli) -> Result<PathBuf> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let table = session.upload(kind, &bytes)?;

    if cli.preview {
        println!("Preview: processed {kind}\n{}", table.preview());
    }

    let out = cli.out_dir.join(table.file_name());
    let xlsx = table.to_xlsx()?;
    fs::write(&out, xlsx).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(out)
}
