#![deny(warnings)]

//! Headless CLI: compare testing strategies over batches of simulated
//! projects, or search for a configuration that ranks them in a given order.

use anyhow::{anyhow, bail, Context, Result};
use sim_core::ProjectConfig;
use sim_runtime::{run_batch_simulation, StrategyStats};
use sim_search::{default_ranges, search, ParamRange, SearchConfig, SearchReport};
use sim_strategy::Strategy;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const DEFAULT_RUNS: u32 = 1000;

const USAGE: &str = "usage:
  cli simulate [--runs N] [--seed S] [--config FILE] [--json]
  cli search   [--runs N] [--seed S] [--config FILE] [--json]
               [--target a,b,c,d] [--min-diff X] [--grid-steps N]
               [--max-iterations N] [--max-configs N] [--param NAME=MIN:MAX]...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Simulate,
    Search,
    Help,
}

#[derive(Debug)]
struct Args {
    command: Command,
    runs: Option<u32>,
    seed: Option<u64>,
    config: Option<String>,
    json: bool,
    target: Option<Vec<Strategy>>,
    min_diff: Option<f64>,
    grid_steps: Option<usize>,
    max_iterations: Option<usize>,
    max_configs: Option<usize>,
    params: Vec<ParamRange>,
}

fn value<T: std::str::FromStr>(flag: &str, raw: Option<String>) -> Result<T> {
    let raw = raw.ok_or_else(|| anyhow!("{flag} needs a value"))?;
    raw.parse().map_err(|_| anyhow!("invalid value for {flag}: {raw}"))
}

fn parse_target(raw: &str) -> Result<Vec<Strategy>> {
    raw.split(',')
        .map(|s| s.parse::<Strategy>().map_err(anyhow::Error::from))
        .collect()
}

/// `NAME=MIN:MAX`
fn parse_range(raw: &str) -> Result<ParamRange> {
    let (name, bounds) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=MIN:MAX, got {raw}"))?;
    let (min, max) = bounds
        .split_once(':')
        .ok_or_else(|| anyhow!("expected NAME=MIN:MAX, got {raw}"))?;
    Ok(ParamRange::new(
        name.trim(),
        min.trim().parse::<f64>().with_context(|| format!("bad minimum in {raw}"))?,
        max.trim().parse::<f64>().with_context(|| format!("bad maximum in {raw}"))?,
    ))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut it = args.into_iter();
    let command = match it.next().as_deref() {
        Some("simulate") | None => Command::Simulate,
        Some("search") => Command::Search,
        Some("help" | "--help" | "-h") => Command::Help,
        Some(other) => bail!("unknown command {other}\n{USAGE}"),
    };
    let mut args = Args {
        command,
        runs: None,
        seed: None,
        config: None,
        json: false,
        target: None,
        min_diff: None,
        grid_steps: None,
        max_iterations: None,
        max_configs: None,
        params: Vec::new(),
    };
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--runs" => args.runs = Some(value(&arg, it.next())?),
            "--seed" => args.seed = Some(value(&arg, it.next())?),
            "--config" => args.config = it.next(),
            "--json" => args.json = true,
            "--target" => {
                let raw: String = value(&arg, it.next())?;
                args.target = Some(parse_target(&raw)?);
            }
            "--min-diff" => args.min_diff = Some(value(&arg, it.next())?),
            "--grid-steps" => args.grid_steps = Some(value(&arg, it.next())?),
            "--max-iterations" => args.max_iterations = Some(value(&arg, it.next())?),
            "--max-configs" => args.max_configs = Some(value(&arg, it.next())?),
            "--param" => {
                let raw: String = value(&arg, it.next())?;
                args.params.push(parse_range(&raw)?);
            }
            "--help" | "-h" => args.command = Command::Help,
            other => bail!("unknown flag {other}\n{USAGE}"),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&str>) -> Result<ProjectConfig> {
    let Some(path) = path else {
        return Ok(ProjectConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let cfg: ProjectConfig =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {path}"))?;
    cfg.validate()?;
    Ok(cfg)
}

fn print_stats(stats: &[StrategyStats]) {
    println!(
        "{:<10} {:>6} {:>6} {:>8} {:>11} {:>11} {:>9}",
        "strategy", "wins", "losses", "win rate", "avg defects", "avg sprints", "find rate"
    );
    for s in stats {
        println!(
            "{:<10} {:>6} {:>6} {:>7.1}% {:>11.2} {:>11.2} {:>8.1}%",
            s.strategy.name(),
            s.wins,
            s.losses,
            s.win_rate * 100.0,
            s.avg_defects,
            s.avg_sprints,
            s.avg_defect_finding_rate * 100.0
        );
    }
}

fn print_report(report: &SearchReport) {
    println!("Baseline");
    print_stats(&report.baseline.results);
    println!(
        "Evaluations: {} | accepted: {}",
        report.evaluations,
        report.found.len()
    );
    let shown = if report.found.is_empty() {
        &report.top
    } else {
        &report.found
    };
    for (rank, eval) in shown.iter().take(sim_search::TOP_REPORTED).enumerate() {
        println!(
            "#{} fitness {:.4} ({:?}{})",
            rank + 1,
            eval.fitness,
            eval.phase,
            if eval.acceptable { ", accepted" } else { "" }
        );
        for (name, v) in &eval.params {
            println!("  {name} = {v:.4}");
        }
        for s in &eval.results {
            println!("  {:<10} {:>6.1}%", s.strategy.name(), s.win_rate * 100.0);
        }
    }
    if !report.diagnostics.is_empty() {
        println!("No configuration met the target; parameter spread over the best samples:");
        for d in &report.diagnostics {
            println!(
                "  {:<28} min {:.4} max {:.4} mean {:.4}",
                d.name, d.min, d.max, d.mean
            );
        }
    }
}

fn simulate(args: &Args, config: &ProjectConfig) -> Result<()> {
    let runs = args.runs.unwrap_or(DEFAULT_RUNS);
    let stats = run_batch_simulation(runs, config, args.seed, args.json)?;
    if args.json {
        let out = serde_json::json!({
            "generated_at": chrono::Utc::now(),
            "runs": runs,
            "seed": args.seed,
            "results": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Runs per strategy: {runs}");
        print_stats(&stats);
    }
    Ok(())
}

fn run_search(args: &Args, config: &ProjectConfig) -> Result<()> {
    let defaults = SearchConfig::default();
    let search_cfg = SearchConfig {
        target_order: args.target.clone().unwrap_or(defaults.target_order),
        min_diff: args.min_diff.unwrap_or(defaults.min_diff),
        grid_steps: args.grid_steps.unwrap_or(defaults.grid_steps),
        max_iterations: args.max_iterations.unwrap_or(defaults.max_iterations),
        max_configs: args.max_configs.unwrap_or(defaults.max_configs),
        runs_per_eval: args.runs.unwrap_or(defaults.runs_per_eval),
        seed: args.seed,
        ..defaults
    };
    let ranges = if args.params.is_empty() {
        default_ranges()
    } else {
        args.params.clone()
    };
    info!(order = ?search_cfg.target_order, params = ranges.len(), "starting search");
    let report = search(config.clone(), ranges, search_cfg)?;
    if args.json {
        let out = serde_json::json!({
            "generated_at": chrono::Utc::now(),
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    info!(
        command = ?args.command,
        git_sha = env!("GIT_SHA"),
        build_date = env!("BUILD_DATE"),
        "starting CLI"
    );
    if args.command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }
    let config = load_config(args.config.as_deref())?;
    match args.command {
        Command::Simulate => simulate(&args, &config),
        Command::Search => run_search(&args, &config),
        Command::Help => Ok(()),
    }
}
