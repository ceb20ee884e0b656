//! Audit an organized dataset tree: every `<split>/<sample_id>/` must hold one
//! file per expected artifact. Exits non-zero when any triplet is incomplete.

use anyhow::{bail, Result};
use clap::Parser;
use geosplit_core::{validate_triplets, Split};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "validate_triplets",
    about = "Check that every sample directory holds a full artifact set"
)]
struct Args {
    /// Dataset output root containing train/, val/ and test/.
    #[arg(short, long, default_value = "dataset")]
    root: PathBuf,

    /// Expected artifact names, comma separated.
    #[arg(short, long, value_delimiter = ',', default_value = "pre,post,label")]
    artifacts: Vec<String>,

    /// Print the completeness report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let report = validate_triplets(&args.root, &args.artifacts)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("{:<8} {:>8}", "split", "complete");
        eprintln!("{}", "─".repeat(17));
        for split in Split::ALL {
            eprintln!("{:<8} {:>8}", split, report.split_counts.get(&split).copied().unwrap_or(0));
        }
        eprintln!();
        eprintln!("{} of {} sample directories complete", report.complete, report.total);
        for t in &report.incomplete {
            eprintln!("  {}/{}: {}", t.split, t.sample_id, t.reason);
        }
    }

    if !report.is_complete() {
        bail!("{} incomplete triplet(s) under {}", report.incomplete_count(), args.root.display());
    }
    Ok(())
}
