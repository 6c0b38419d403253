use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use rusty_force::analysis::contact::ContactAlgorithm;
use rusty_force::analysis::polymer::PolymerModel;
use rusty_force::data::{export, loader};
use rusty_force::{FeatureConfig, FeaturePipeline, FeatureRecord};

#[derive(Parser, Debug)]
#[command(
    name = "rusty-force",
    about = "Contour length, persistence length and rupture force from AFM force curves",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract features from every curve in a file.
    Extract(ExtractArgs),
    /// Print every intermediate result of one curve as JSON.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct Common {
    /// Curve table (.parquet, .json or .csv).
    input: PathBuf,

    /// JSON configuration; fields not given keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Contact-point algorithm: bilinear or baseline_slide.
    #[arg(long)]
    contact: Option<ContactAlgorithm>,

    /// Polymer model: wlc or fjc.
    #[arg(long)]
    model: Option<PolymerModel>,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[command(flatten)]
    common: Common,

    /// Output file (.csv or .parquet); prints a table when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Number of worker threads (0 = one per core).
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    common: Common,

    /// Curve id; defaults to the first curve.
    #[arg(long)]
    curve: Option<String>,
}

fn pipeline(common: &Common) -> Result<FeaturePipeline> {
    let mut config = match &common.config {
        Some(path) => loader::load_config(path)?,
        None => FeatureConfig::default(),
    };
    if let Some(algorithm) = common.contact {
        config.contact.algorithm = algorithm;
    }
    if let Some(model) = common.model {
        config.fit.model = model;
    }
    Ok(FeaturePipeline::new(config)?)
}

fn write_records(records: &[FeatureRecord], out: Option<&Path>) -> Result<()> {
    let Some(path) = out else {
        println!("{}", export::format_features(records)?);
        return Ok(());
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") | Some("pq") => export::save_features_parquet(records, path),
        Some("csv") => export::save_features_csv(records, path),
        other => bail!("Unsupported output extension: {other:?}"),
    }?;
    log::info!("wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn extract(args: ExtractArgs) -> Result<()> {
    let pipeline = pipeline(&args.common)?;
    let dataset = loader::load_file(&args.common.input)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()
        .context("failed creating rayon thread pool")?;
    let outcomes = pool.install(|| pipeline.extract_batch(&dataset.curves));

    let mut records = Vec::new();
    let mut failed = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(mut r) => records.append(&mut r),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e}", outcome.curve_id);
            }
        }
    }
    eprintln!(
        "{} curves, {} failed, {} features",
        dataset.len(),
        failed,
        records.len()
    );
    write_records(&records, args.out.as_deref())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let pipeline = pipeline(&args.common)?;
    let dataset = loader::load_file(&args.common.input)?;
    let curve = match &args.curve {
        Some(id) => dataset.get(id).with_context(|| format!("no curve with id '{id}'"))?,
        None => dataset.curves.first().context("file holds no curves")?,
    };
    let analysis = pipeline.analyze(curve)?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract(args) => extract(args),
        Commands::Inspect(args) => inspect(args),
    }
}
