//! Organize geo-located samples into a leakage-free train/val/test tree.
//! Samples come from a JSON list or from an imagery directory plus label
//! patches; the output root receives the split tree, the manifest and reports.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use geosplit_core::{
    discover_samples, load_samples_json, DatasetConfig, DatasetPipeline, ImageFormat, Placement,
    RunReport, Sample, Split, SplitConfig, SplitPlan,
};
use log::info;
use std::path::PathBuf;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "organize",
    about = "Assign samples to spatial splits and materialize the dataset tree"
)]
struct Args {
    /// JSON sample list (`[...]` or `{"samples": [...]}`).
    #[arg(short, long, conflicts_with = "imagery_dir")]
    samples: Option<PathBuf>,

    /// Imagery directory with one `<sample_id>/metadata.json` per sample.
    #[arg(long, requires = "patches_dir")]
    imagery_dir: Option<PathBuf>,

    /// Flat directory of `<sample_id>.tif` label patches.
    #[arg(long)]
    patches_dir: Option<PathBuf>,

    /// Dataset config JSON; flags below override its fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Tile size in degrees.
    #[arg(long)]
    tile_size: Option<f64>,

    #[arg(long)]
    train: Option<f64>,

    #[arg(long)]
    val: Option<f64>,

    #[arg(long)]
    test: Option<f64>,

    /// Allowed split deviation in percentage points.
    #[arg(long)]
    tolerance: Option<f64>,

    #[arg(long, value_enum)]
    placement: Option<PlacementArg>,

    #[arg(long, value_enum)]
    image_format: Option<ImageFormatArg>,

    /// Materialization threads (0 = one per core).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Stop starting new samples after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the split plan and exit without writing anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlacementArg {
    Copy,
    Hardlink,
    Symlink,
}

impl From<PlacementArg> for Placement {
    fn from(p: PlacementArg) -> Self {
        match p {
            PlacementArg::Copy => Placement::Copy,
            PlacementArg::Hardlink => Placement::Hardlink,
            PlacementArg::Symlink => Placement::Symlink,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImageFormatArg {
    Png,
    #[value(alias = "tif")]
    Geotiff,
    Both,
}

impl From<ImageFormatArg> for ImageFormat {
    fn from(f: ImageFormatArg) -> Self {
        match f {
            ImageFormatArg::Png => ImageFormat::Png,
            ImageFormatArg::Geotiff => ImageFormat::GeoTiff,
            ImageFormatArg::Both => ImageFormat::Both,
        }
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

fn load_config(args: &Args) -> Result<DatasetConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => DatasetConfig::default(),
    };

    let split_override = [args.train, args.val, args.test, args.tile_size]
        .iter()
        .any(Option::is_some);
    if split_override {
        let cur = cfg.split;
        cfg.split = SplitConfig::new(
            args.train.unwrap_or(cur.target(Split::Train)),
            args.val.unwrap_or(cur.target(Split::Val)),
            args.test.unwrap_or(cur.target(Split::Test)),
            args.tile_size.unwrap_or(cur.tile_size_deg()),
        )?;
    }
    if let Some(o) = &args.output {
        cfg.output_root = o.clone();
    }
    if let Some(t) = args.tolerance {
        cfg.tolerance_pct = t;
    }
    if let Some(p) = args.placement {
        cfg.placement = p.into();
    }
    if let Some(f) = args.image_format {
        cfg.image_format = f.into();
    }
    if let Some(w) = args.workers {
        cfg.workers = w;
    }
    if args.timeout_secs.is_some() {
        cfg.timeout_secs = args.timeout_secs;
    }
    Ok(cfg)
}

fn load_samples(args: &Args, cfg: &DatasetConfig) -> Result<Vec<Sample>> {
    match (&args.samples, &args.imagery_dir, &args.patches_dir) {
        (Some(path), _, _) => Ok(load_samples_json(path)?),
        (None, Some(imagery), Some(patches)) => {
            Ok(discover_samples(imagery, patches, cfg.image_format)?)
        }
        _ => bail!("either --samples or --imagery-dir with --patches-dir is required"),
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_plan(plan: &SplitPlan) {
    eprintln!();
    eprintln!(
        "{:<8} {:>8} {:>8} {:>9} {:>9}  status",
        "split", "tiles", "samples", "actual%", "target%"
    );
    eprintln!("{}", "─".repeat(58));
    for c in &plan.validation.checks {
        eprintln!(
            "{:<8} {:>8} {:>8} {:>8.1}% {:>8.1}%  {}",
            c.split,
            plan.splits.tally(c.split).tiles,
            c.samples,
            c.actual_pct,
            c.target_pct,
            if c.passed { "ok" } else { "WARN" },
        );
    }
    eprintln!(
        "\n{} samples in {} tiles ({} rejected)",
        plan.splits.total_samples,
        plan.tiles.total_tiles,
        plan.rejected.len()
    );
}

fn print_run(report: &RunReport, root: &std::path::Path) {
    eprintln!();
    eprintln!("{:<8} {:>8} {:>9} {:>9}  status", "split", "samples", "actual%", "target%");
    eprintln!("{}", "─".repeat(48));
    for c in &report.validation.checks {
        eprintln!(
            "{:<8} {:>8} {:>8.1}% {:>8.1}%  {}",
            c.split,
            c.samples,
            c.actual_pct,
            c.target_pct,
            if c.passed { "ok" } else { "WARN" },
        );
    }
    eprintln!();
    eprintln!("input samples     {:>6}", report.total_input);
    eprintln!("rejected          {:>6}", report.rejected.len());
    eprintln!("in manifest       {:>6}", report.manifest_rows);
    eprintln!("incomplete        {:>6}", report.materialization.incomplete.len());
    eprintln!("failed            {:>6}", report.materialization.failed.len());
    eprintln!("cancelled         {:>6}", report.materialization.cancelled.len());
    eprintln!("files written     {:>6}", report.materialization.files_written);
    for e in report.materialization.failed.iter().chain(&report.materialization.cancelled) {
        eprintln!("  {} ({}): {}", e.sample_id, e.split, e.reason);
    }
    eprintln!("\nOutput in {}", root.display());
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = load_config(&args)?;
    let samples = load_samples(&args, &cfg)?;
    let root = cfg.output_root.clone();
    let pipeline = DatasetPipeline::new(cfg)?;
    info!("loaded {} samples", samples.len());

    if args.dry_run {
        let plan = pipeline.plan(&samples)?;
        print_plan(&plan);
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let report = pipeline.run(&samples)?;
    print_run(&report, &root);
    if !report.is_clean() {
        eprintln!("Some samples were excluded; see {}", root.join("summary.txt").display());
    }
    Ok(())
}
