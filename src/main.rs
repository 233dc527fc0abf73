use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use logterm::parse::parse_term;
use logterm::{Machine, Session, SessionConfig, Solution};

#[derive(Parser)]
#[command(name = "logterm")]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Run a query against the reference engine")]
struct Args {
    /// Goal to solve, for example "append(X, Y, [1,2])"
    query: String,

    /// Clause files to consult before querying
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// Stop after this many solutions
    #[arg(short = 'n', long)]
    max_solutions: Option<usize>,

    /// Print solutions as JSON objects, one per line
    #[arg(long)]
    json: bool,

    /// Resolution steps allowed for the query
    #[arg(long)]
    inference_limit: Option<u64>,

    /// Wall-clock milliseconds allowed for the query
    #[arg(long)]
    time_limit_ms: Option<u64>,

    /// Longest list lifted out of the engine
    #[arg(long)]
    max_list_length: Option<usize>,
}

impl Args {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new();
        if let Some(limit) = self.inference_limit {
            config = config.with_inference_limit(limit);
        }
        if let Some(ms) = self.time_limit_ms {
            config = config.with_time_limit(Duration::from_millis(ms));
        }
        if let Some(limit) = self.max_list_length {
            config = config.with_max_list_length(limit);
        }
        config
    }
}

fn print(solution: &Solution, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(solution)?);
    } else {
        println!("{solution}.");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let session = Session::start(Machine::new(), args.config())
        .context("Failed to start the engine")?;

    for file in &args.files {
        let added = session
            .consult(file)
            .with_context(|| format!("Failed to consult {}", file.display()))?;
        info!("{}: {added} clauses", file.display());
    }

    let goal = parse_term(&args.query).context("Failed to read the query")?;
    let mut solutions = session.query(&goal)?;
    let mut found = 0;
    while args.max_solutions.map_or(true, |max| found < max) {
        let Some(solution) = solutions.next_solution().context("Query failed")? else {
            break;
        };
        print(&solution, args.json)?;
        found += 1;
    }
    solutions.close()?;
    drop(solutions);
    if found == 0 && !args.json {
        println!("false.");
    }

    session.stop()?;
    Ok(())
}
