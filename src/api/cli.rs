use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::core::{DEFAULT_BLOCK_WIDTH, ExecutionConfig, PolicySet};

#[derive(Parser, Debug)]
#[command(
    name = "taxmatrix",
    about = "Batch payroll and income tax engine (blocked matrix path + scalar reference)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute a synthetic batch and print a JSON summary.
    Run(RunArgs),
    /// Serve the plan and compute endpoints over HTTP.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value_t = 10_000, help = "Number of synthetic records")]
    pub records: usize,
    #[arg(long, default_value_t = 42, help = "Population generator seed")]
    pub seed: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_BLOCK_WIDTH,
        help = "Maximum policy columns multiplied per block"
    )]
    pub block_width: usize,
    #[arg(long, default_value_t = false, help = "Skip general ledger postings")]
    pub no_ledger: bool,
    #[arg(long, help = "Policy JSON file; the built-in policy set is used when absent")]
    pub policy: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = false,
        help = "Check results against the scalar reference calculator"
    )]
    pub verify: bool,
    #[arg(
        long,
        default_value_t = 1,
        help = "Verify every n-th record only"
    )]
    pub sample_stride: usize,
    #[arg(
        long,
        default_value_t = 1e-9,
        help = "Largest accepted relative drift when verifying"
    )]
    pub tolerance: f64,
    #[arg(
        long,
        default_value_t = 1,
        help = "Recompute the batch this many times reusing buffers and results"
    )]
    pub repeat: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, help = "Policy JSON file; the built-in policy set is used when absent")]
    pub policy: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VerifyOptions {
    pub sample_stride: usize,
    pub tolerance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub records: usize,
    pub seed: u64,
    pub execution: ExecutionConfig,
    pub policy: Option<PathBuf>,
    pub verify: Option<VerifyOptions>,
    pub repeat: usize,
}

pub fn build_run_config(args: RunArgs) -> Result<RunConfig, String> {
    if args.block_width == 0 {
        return Err("--block-width must be > 0".to_string());
    }

    if args.repeat == 0 {
        return Err("--repeat must be > 0".to_string());
    }

    if args.sample_stride == 0 {
        return Err("--sample-stride must be > 0".to_string());
    }

    if !args.tolerance.is_finite() || args.tolerance < 0.0 {
        return Err("--tolerance must be >= 0".to_string());
    }

    if !args.verify && args.sample_stride != 1 {
        return Err("--sample-stride requires --verify".to_string());
    }

    Ok(RunConfig {
        records: args.records,
        seed: args.seed,
        execution: ExecutionConfig {
            block_width: args.block_width,
            include_ledger: !args.no_ledger,
        },
        policy: args.policy,
        verify: args.verify.then_some(VerifyOptions {
            sample_stride: args.sample_stride,
            tolerance: args.tolerance,
        }),
        repeat: args.repeat,
    })
}

pub fn load_policies(path: Option<&Path>) -> Result<PolicySet, String> {
    let Some(path) = path else {
        return PolicySet::standard().map_err(|e| format!("built-in policy set: {e}"));
    };
    let json = fs::read_to_string(path)
        .map_err(|e| format!("failed to read --policy {}: {e}", path.display()))?;
    PolicySet::from_json(&json).map_err(|e| format!("invalid --policy {}: {e}", path.display()))
}
