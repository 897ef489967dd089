use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use header_hoist::config::HoistConfig;
use header_hoist::resolver::ResolveOptions;
use header_hoist::target::Target;
use header_hoist::workspace::{self, HeaderRoot};
use header_hoist::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log output format (level comes from RUST_LOG, default info)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Hoist shared headers into generic directories, layer by layer
    ///
    /// Expects freshly fetched per-target trees. Each layer's output directory
    /// (including any-<os>-any) is replaced, not scanned: files already there
    /// are discarded with a warning.
    Generate {
        /// Path to a hoist config TOML
        #[arg(long)]
        config: Option<PathBuf>,
        /// Header root (overrides headers.root)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Scan and vote, but leave the tree untouched
        #[arg(long)]
        dry_run: bool,
        /// Write a JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Collect the host target's headers into the header root
    Fetch {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        root: Option<PathBuf>,
        /// Target full name (detected from the host when omitted)
        #[arg(long)]
        target: Option<String>,
    },
    /// Print the ordered layer plan
    Plan {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print GraphViz dot instead of a linear plan
        #[arg(long)]
        dot: bool,
    },
    /// Print the fully-resolved config TOML (after extends/imports)
    Resolve {
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);
    match args.cmd {
        Command::Generate {
            config,
            root,
            dry_run,
            report,
        } => cmd_generate(config.as_deref(), root.as_deref(), dry_run, report.as_deref()),
        Command::Fetch {
            config,
            root,
            target,
        } => cmd_fetch(config.as_deref(), root.as_deref(), target.as_deref()),
        Command::Plan { config, dot } => cmd_plan(config.as_deref(), dot),
        Command::Resolve { config } => cmd_resolve(&config),
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> Result<HoistConfig> {
    match path {
        Some(p) => HoistConfig::load(p),
        None => Ok(HoistConfig::default()),
    }
}

fn root_dir(cfg: &HoistConfig, cli_root: Option<&Path>) -> Result<PathBuf> {
    if let Some(r) = cli_root {
        return Ok(r.to_path_buf());
    }
    let cwd =
        std::env::current_dir().map_err(|e| Error::io("read current dir", Path::new("."), e))?;
    workspace::resolve_user_path(&cwd, &cfg.headers.root)
}

fn cmd_generate(
    config: Option<&Path>,
    root: Option<&Path>,
    dry_run: bool,
    report_path: Option<&Path>,
) -> Result<()> {
    let cfg = load_config(config)?;
    let plan = cfg.layer_plan()?;
    let dont_dedup = cfg.dont_dedup()?;
    let root = HeaderRoot::open(&root_dir(&cfg, root)?)?;

    let opts = ResolveOptions {
        dont_dedup: &dont_dedup,
        dry_run,
    };
    let report = header_hoist::layers::run_plan(&root, &plan, opts)?;

    for layer in &report.layers {
        println!(
            "{:<22} {:>3} members  {:>10} -> {:>10} bytes  generic={:<5} missed={}",
            layer.layer,
            layer.members.len(),
            layer.bytes_scanned,
            layer.bytes_after,
            layer.generic_files,
            layer.wasted_bytes()
        );
    }
    if let Some(p) = report_path {
        report.write_json(p)?;
    }
    Ok(())
}

fn cmd_fetch(config: Option<&Path>, root: Option<&Path>, target: Option<&str>) -> Result<()> {
    let cfg = load_config(config)?;
    let target = match target {
        Some(raw) => raw.parse::<Target>()?,
        None => header_hoist::fetch::detect_host(&cfg.fetch, cfg.os()?)?,
    };
    let root = HeaderRoot::create(&root_dir(&cfg, root)?)?;
    let stats = header_hoist::fetch::fetch_headers(&cfg.fetch, &root, &target)?;
    println!(
        "{}: {} headers, {} bytes",
        target.full_name(),
        stats.files,
        stats.bytes
    );
    Ok(())
}

fn cmd_plan(config: Option<&Path>, dot: bool) -> Result<()> {
    let cfg = load_config(config)?;
    let plan = cfg.layer_plan()?;
    if dot {
        print!("{}", plan.to_dot());
        return Ok(());
    }
    for (i, layer) in plan.ordered()?.iter().enumerate() {
        let members: Vec<String> = layer.members.iter().map(Target::full_name).collect();
        println!(
            "{:>2}. {:<22} <- {}",
            i + 1,
            layer.output.full_name(),
            members.join(", ")
        );
    }
    Ok(())
}

fn cmd_resolve(path: &Path) -> Result<()> {
    let doc = header_hoist::config::load(path)?;
    HoistConfig::from_doc(&doc)?;
    // Best-effort pretty print of resolved config.
    let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
    print!("{s}");
    Ok(())
}
