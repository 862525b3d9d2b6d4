//! `swarm`: repair every paired source file in a target directory.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use swarm::batch::{RunRequest, TargetDirMissing, describe, run};
use swarm::exit_codes;

#[derive(Parser)]
#[command(
    name = "swarm",
    version,
    about = "Sandboxed analyze/fix/judge repair loop for Python files"
)]
struct Cli {
    /// Directory containing the files to repair. Becomes the sandbox root.
    #[arg(long)]
    target_dir: PathBuf,

    /// Config file (defaults to `<target-dir>/.swarm.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transformer command and arguments, overriding `[transformer] command`.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    transformer: Vec<String>,
}

fn main() {
    swarm::logging::init();
    let cli = Cli::parse();

    let request = RunRequest {
        target_dir: cli.target_dir,
        config_path: cli.config,
        transformer: cli.transformer,
    };
    let root = request
        .target_dir
        .canonicalize()
        .unwrap_or_else(|_| request.target_dir.clone());

    println!("Starting repair of {}", request.target_dir.display());
    let result = run(&request, |file| println!("{}", describe(file, &root)));
    match result {
        Ok(report) => {
            println!(
                "processed: {}, fixed: {}, skipped: {}, errors: {}",
                report.processed, report.fixed, report.skipped, report.errored
            );
            println!("MISSION_COMPLETE");
            process::exit(exit_codes::OK);
        }
        Err(err) => {
            if let Some(missing) = err.downcast_ref::<TargetDirMissing>() {
                eprintln!("error: {missing}");
            } else {
                eprintln!("error: {err:#}");
            }
            process::exit(exit_codes::INVALID);
        }
    }
}
