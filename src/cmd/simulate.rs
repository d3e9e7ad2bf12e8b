//! Scripted navigation replay (`transit simulate`).
//!
//! Wires a bus, a driver, the delay-gated terminal indicator and the
//! telemetry observer together, then replays a script on real time.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;

use transit::clock::{Scheduler, TokioScheduler};
use transit::config::TransitConfig;
use transit::driver::NavigationDriver;
use transit::events::EventBus;
use transit::indicator::Indicator;
use transit::indicator::terminal::DONE_HOLD;
use transit::indicator::{DelayGatedObserver, TerminalIndicator};
use transit::script::Script;
use transit::telemetry::TelemetryObserver;

pub async fn cmd_simulate(
    config: &TransitConfig,
    script_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let script = match script_path {
        Some(path) => Script::load(path)
            .with_context(|| format!("Failed to load script {}", path.display()))?,
        None => Script::demo(),
    };

    let indicator_config = config.indicator();
    let bus = Arc::new(EventBus::new());
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::current()?);
    let indicator = if json {
        TerminalIndicator::hidden(&indicator_config)?
    } else {
        TerminalIndicator::new(&indicator_config)?
    };
    let indicator = Arc::new(indicator.with_scheduler(Arc::clone(&scheduler)));
    let _gate = DelayGatedObserver::from_config(
        &bus,
        Arc::clone(&indicator),
        scheduler,
        &indicator_config,
    );
    let telemetry = if json {
        TelemetryObserver::with_sink(&bus, Box::new(std::io::stdout()))
    } else {
        TelemetryObserver::attach(&bus)
    };

    let mut driver = NavigationDriver::new(Arc::clone(&bus));
    let summary = script.run(&mut driver).await?;
    if indicator.is_completing() {
        tokio::time::sleep(DONE_HOLD).await;
    }
    indicator.remove();

    if json {
        return Ok(());
    }

    let counts = telemetry.counts();
    println!();
    println!(
        "{} {} steps, {} visits, {}ms simulated",
        style("Simulation finished:").bold(),
        summary.steps,
        summary.visits,
        summary.waited_ms
    );
    println!(
        "  {} completed  {} interrupted  {} cancelled",
        style(counts.completed).green(),
        style(counts.interrupted).yellow(),
        style(counts.cancelled).red()
    );
    for record in telemetry.records() {
        let pct = record
            .max_percentage
            .map(|p| format!(" (upload {}%)", p))
            .unwrap_or_default();
        println!(
            "  {} {:<11} {:>6}ms{}",
            style(record.id).dim(),
            record.outcome.as_str(),
            record.duration_ms,
            pct
        );
    }
    if telemetry.in_flight() > 0 {
        println!(
            "  {} visit(s) still in flight when the script ended",
            style(telemetry.in_flight()).yellow()
        );
    }
    println!();

    Ok(())
}
