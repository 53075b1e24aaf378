use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::{ColoredString, Colorize};
use serde::Serialize;

use keel_sdk::{Clock, Keel, KeelConfig, ManualClock, PressureLevel, ScriptedUsage, TickReport};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, cli.format),
        Command::Config(args) => cmd_config(args, cli.format),
    }
}

/// One simulated sample, as printed or serialised.
#[derive(Debug, Serialize)]
struct SimulationStep {
    at_ms: u64,
    #[serde(flatten)]
    report: TickReport,
    cache_entries: usize,
    suspended: bool,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KeelConfig> {
    match path {
        Some(path) => KeelConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(KeelConfig::default()),
    }
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.usage.is_empty() {
        bail!("--usage needs at least one value");
    }
    let config = load_config(args.config.as_deref())?;

    let clock = ManualClock::new(0);
    let keel = Keel::builder(config)
        .clock(clock.shared())
        .usage_source(Arc::new(ScriptedUsage::new(args.usage.iter().copied())))
        .build()?;

    let demo = keel.cache().create_namespace::<usize, String>(
        "demo",
        args.entries.max(1),
        keel.config().cache.ttl(),
    )?;
    for i in 0..args.entries {
        demo.set(i, format!("entry-{i}"));
    }

    let interval = keel.config().monitor.sample_interval();
    let mut steps = Vec::with_capacity(args.usage.len());
    for _ in &args.usage {
        let at_ms = clock.now_ms();
        let report = keel.monitor().tick()?;
        steps.push(SimulationStep {
            at_ms,
            report,
            cache_entries: keel.cache().total_entries(),
            suspended: keel.tracker().is_suspended(),
        });
        clock.advance(interval);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
        OutputFormat::Text => print_simulation(&steps, args.entries, interval.as_millis() as u64),
    }
    Ok(())
}

fn print_simulation(steps: &[SimulationStep], entries: usize, interval_ms: u64) {
    println!(
        "Simulating {} samples against {} cached entries (interval {}ms)",
        steps.len().to_string().bold(),
        entries.to_string().bold(),
        interval_ms
    );
    for step in steps {
        let report = &step.report;
        let transition = if report.level_changed() {
            format!("({} → {})", report.previous, report.level).dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  t={:<7} usage {:>5.1}%  {:<10} {}",
            format!("{}ms", step.at_ms),
            report.usage,
            paint(report.level),
            transition
        );

        let actions = &report.actions;
        if report.level.is_elevated() {
            println!(
                "    expired {}  lru {}  handles {}  cache {}",
                actions.expired_evicted,
                actions.lru_evicted,
                actions.handles_pruned,
                step.cache_entries.to_string().cyan()
            );
        }
        if let Some(until) = actions.suspended_until {
            println!("    {} non-critical work suspended until {}ms", "!".red().bold(), until);
        }
    }

    if let Some(last) = steps.last() {
        let state = if last.suspended { "suspended".red() } else { "running".green() };
        println!("\nFinal level {}, {} entries cached, operations {}", paint(last.report.level), last.cache_entries, state);
    }
}

fn paint(level: PressureLevel) -> ColoredString {
    let name = level.to_string();
    match level {
        PressureLevel::Normal => name.green(),
        PressureLevel::Warning => name.yellow(),
        PressureLevel::Critical => name.red(),
        PressureLevel::Emergency => name.red().bold(),
    }
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.file.as_deref())?;
    match format {
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulate(usage: Vec<f64>, entries: usize) -> SimulateArgs {
        SimulateArgs {
            usage,
            entries,
            config: None,
        }
    }

    #[test]
    fn simulate_runs_the_default_script() {
        let args = simulate(vec![40.0, 72.0, 88.0, 97.0], 40);
        cmd_simulate(args, OutputFormat::Json).unwrap();
    }

    #[test]
    fn simulate_rejects_empty_usage() {
        assert!(cmd_simulate(simulate(vec![], 10), OutputFormat::Text).is_err());
    }

    #[test]
    fn simulate_with_no_entries_still_runs() {
        cmd_simulate(simulate(vec![99.0], 0), OutputFormat::Text).unwrap();
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/keel.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to load config"));
    }
}
