//! Online simulation driver.
//!
//! Runs one or more episodes of a chosen domain, printing per-step
//! diagnostics and a final summary. Fatal planner errors exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use metis::domains::nav::{NavConfig, NavModel};
use metis::domains::rocks::{RocksConfig, RocksModel};
use metis::domains::tag::{TagConfig, TagModel};
use metis::domains::GridRect;
use metis::model::Model;
use metis::simulation::run_episode;
use metis::solver::Solver;
use metis::Result;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Problem {
    Tag,
    Nav,
    Rocks,
}

#[derive(Parser, Debug)]
#[command(name = "simulate", about = "Run online POMDP planning episodes")]
struct Args {
    /// Which domain to run
    #[arg(long, value_enum, default_value_t = Problem::Tag)]
    problem: Problem,

    /// Number of steps per episode
    #[arg(long, default_value_t = 50)]
    steps: u64,

    /// Number of episodes
    #[arg(long, default_value_t = 1)]
    runs: u64,

    /// Seed for the deterministic generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Change file applied during the episode (nav only)
    #[arg(long)]
    changes: Option<PathBuf>,

    /// Suppress per-step diagnostics
    #[arg(long)]
    quiet: bool,

    /// Extra options as key=value pairs, e.g. --set maxTrials=500
    #[arg(long = "set", value_name = "KEY=VALUE")]
    options: Vec<String>,
}

fn split_pairs(options: &[String]) -> Result<Vec<(&str, &str)>> {
    options
        .iter()
        .map(|option| {
            option.split_once('=').ok_or_else(|| {
                metis::PlannerError::invalid_config(
                    option.clone(),
                    "expected key=value".to_string(),
                )
            })
        })
        .collect()
}

fn run_one<M: Model>(
    mut model: M,
    seed: u64,
    steps: u64,
    changes: &Option<PathBuf>,
    quiet: bool,
) -> Result<f64> {
    let change_times = match changes {
        Some(path) => model.load_changes(path)?,
        None => Vec::new(),
    };
    let mut solver = Solver::new(model, seed)?;
    let result = run_episode(&mut solver, steps, &change_times, !quiet)?;

    println!();
    println!("Steps executed:    {}", result.records.len());
    println!("Reached terminal:  {}", result.reached_terminal);
    println!("Discounted return: {:.4}", result.discounted_return);
    for (time, report) in &result.change_reports {
        println!(
            "Change at t={}: {} sequences revised, {} deleted",
            time, report.affected_sequences, report.deleted_sequences
        );
    }
    Ok(result.discounted_return)
}

fn run(args: &Args) -> Result<()> {
    let pairs = split_pairs(&args.options)?;
    let mut returns = Vec::with_capacity(args.runs as usize);

    for run_index in 0..args.runs {
        let seed = args.seed + run_index;
        println!("=== Run {} (seed {}) ===", run_index, seed);
        let discounted = match args.problem {
            Problem::Tag => {
                let config = TagConfig::from_pairs(pairs.iter().copied())?;
                run_one(TagModel::new(config)?, seed, args.steps, &args.changes, args.quiet)?
            }
            Problem::Nav => {
                let config = NavConfig::from_pairs(pairs.iter().copied())?;
                let model = NavModel::new(
                    config,
                    10,
                    10,
                    GridRect::new(0, 0, 1, 1),
                    GridRect::new(9, 9, 9, 9),
                );
                run_one(model, seed, args.steps, &args.changes, args.quiet)?
            }
            Problem::Rocks => {
                let config = RocksConfig::from_pairs(pairs.iter().copied())?;
                let model = RocksModel::standard_7_8(config);
                run_one(model, seed, args.steps, &args.changes, args.quiet)?
            }
        };
        returns.push(discounted);
    }

    if returns.len() > 1 {
        let mean: f64 = returns.iter().sum::<f64>() / returns.len() as f64;
        println!();
        println!("Mean discounted return over {} runs: {:.4}", returns.len(), mean);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            ExitCode::FAILURE
        }
    }
}
