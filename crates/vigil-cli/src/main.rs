//! `vigil` – health-driven safety supervisor.
//!
//! This binary wires a [`KernelSafetyContext`] to either the simulated rig or
//! the host's own metrics and then:
//!
//! 1. Loads `~/.vigil/config.toml`, writing the defaults on first run.
//! 2. Runs the voltage preflight and the boot-time KPI check.
//! 3. Drives the health loop until **Ctrl-C** or until the fault escalation
//!    machine reaches `halted`.
//!
//! ```text
//! vigil [run]                      supervise until Ctrl-C or halt
//! vigil report                     sample once and print a health report
//! vigil inject-fault <code> [msg]  push a raw driver fault through escalation
//! ```

mod config;

use colored::Colorize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

use config::{Config, Driver};
use vigil_hal::{DryRunPower, ProcMetrics, SimRig, ThreadExecutor};
use vigil_kernel::{FaultOutcome, TaskSpec};
use vigil_middleware::{Topic, TopicReceiver};
use vigil_runtime::{Collaborators, KernelSafetyContext, init_tracing};
use vigil_types::{Alert, AlertLevel, EventPayload, FaultState, Priority};

enum Command {
    Run,
    Report,
    InjectFault { code: u32, detail: String },
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        None | Some("run") => Ok(Command::Run),
        Some("report") => Ok(Command::Report),
        Some("inject-fault") => {
            let raw = args
                .get(1)
                .ok_or_else(|| "inject-fault needs a fault code".to_string())?;
            let code = parse_code(raw).ok_or_else(|| format!("invalid fault code '{raw}'"))?;
            let detail = if args.len() > 2 {
                args[2..].join(" ")
            } else {
                "injected from the command line".to_string()
            };
            Ok(Command::InjectFault { code, detail })
        }
        Some("help" | "-h" | "--help") => Ok(Command::Help),
        Some(other) => Err(format!("unknown command '{other}'")),
    }
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_code(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn main() {
    // Boot time is measured from process start to the first health sample.
    let started = Instant::now();

    let command = match parse_args(&std::env::args().skip(1).collect::<Vec<_>>()) {
        Ok(Command::Help) => {
            print_usage();
            return;
        }
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            print_usage();
            std::process::exit(2);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start tokio runtime: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    };
    let _rt_guard = rt.enter();

    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); VIGIL_LOG_FORMAT=json switches to
    // JSON lines; OTEL_EXPORTER_OTLP_ENDPOINT adds span export.  Operator
    // facing output still uses println!.
    let telemetry = init_tracing("vigil");

    print_banner();

    let cfg = load_config();
    println!("  Driver: {}", cfg.driver.to_string().bold());

    let boot_ms = started.elapsed().as_millis() as u64;
    let collaborators = build_collaborators(cfg.driver, boot_ms);
    let ctx = Arc::new(KernelSafetyContext::new(cfg.safety_config(), collaborators));

    let code = match command {
        Command::Run => rt.block_on(run(Arc::clone(&ctx), cfg.driver)),
        Command::Report => {
            println!("\n{}\n", ctx.report());
            0
        }
        Command::InjectFault { code, detail } => inject_fault(&ctx, code, &detail),
        Command::Help => 0,
    };

    drop(telemetry);
    std::process::exit(code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

async fn run(ctx: Arc<KernelSafetyContext>, driver: Driver) -> i32 {
    // Subscribe before starting so preflight alerts reach the operator.
    let alerts = ctx.bus().subscribe_to(Topic::SystemAlerts);
    let (done_tx, done_rx) = watch::channel(false);
    let renderer = tokio::spawn(render_alerts(alerts, done_rx));
    let mut faults = ctx.bus().subscribe_to(Topic::FaultState);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping supervision …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with SIGKILL only");
    }

    if let Err(e) = ctx.start() {
        let _ = done_tx.send(true);
        let _ = renderer.await;
        println!("{}: {}", "Preflight failed".red().bold(), e);
        return 1;
    }

    if driver == Driver::Sim {
        submit_demo_workload(&ctx);
    }
    println!(
        "  Supervising every {} ms. Press {} to stop.\n",
        ctx.config().sample_interval.as_millis(),
        "Ctrl-C".bold()
    );

    let code = loop {
        tokio::select! {
            _ = stop_rx.changed() => break 0,
            event = faults.recv() => match event {
                Ok(event) => {
                    if let EventPayload::FaultTransition { from, to } = event.payload {
                        println!("  {} {} → {}", "fault".magenta().bold(), from, to);
                        if to == FaultState::Halted {
                            break 3;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "fault watcher lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break 0,
            }
        }
    };

    ctx.shutdown().await;
    let _ = done_tx.send(true);
    let _ = renderer.await;
    println!("\n{}\n", ctx.report());
    code
}

fn inject_fault(ctx: &KernelSafetyContext, code: u32, detail: &str) -> i32 {
    let mut alerts = ctx.bus().subscribe_to(Topic::SystemAlerts);
    let outcome = ctx.report_raw_fault(code, detail);
    while let Ok(event) = alerts.try_recv() {
        render(event.payload);
    }
    match outcome {
        FaultOutcome::ShutdownInitiated {
            code,
            transitions,
            delay_secs,
        } => {
            for t in &transitions {
                println!("  {} {} → {}", "fault".magenta().bold(), t.from, t.to);
            }
            println!(
                "  {} {} handled; shutdown after {}s",
                "✓".green().bold(),
                code,
                delay_secs
            );
            0
        }
        FaultOutcome::AlreadyShuttingDown { state } => {
            println!("  {} already {}", "!".yellow().bold(), state);
            0
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn build_collaborators(driver: Driver, boot_ms: u64) -> Collaborators {
    match driver {
        Driver::Sim => {
            let rig = SimRig::new();
            rig.metrics.set_boot_time_ms(boot_ms);
            // Alerts go to the bus so the renderer shows them.
            Collaborators {
                alerts: None,
                ..Collaborators::from_sim(&rig)
            }
        }
        Driver::Proc => Collaborators {
            metrics: Arc::new(ProcMetrics::new(Some(boot_ms))),
            power: Arc::new(DryRunPower::new()),
            executor: Arc::new(ThreadExecutor::new()),
            alerts: None,
        },
    }
}

fn submit_demo_workload(ctx: &KernelSafetyContext) {
    let specs = [
        TaskSpec::new("telemetry-uplink", || {})
            .io_bound(true)
            .memory_kb(8_192),
        TaskSpec::new("map-builder", || {})
            .priority(Priority::Background)
            .memory_kb(65_536),
        TaskSpec::new("motor-loop", || {}).priority(Priority::RealTime),
    ];
    for spec in specs {
        match ctx.submit(spec) {
            Ok(handle) => info!(task = %handle.id(), "demo task admitted"),
            Err(e) => warn!(error = %e, "demo task rejected"),
        }
    }
}

/// Print alerts as they arrive; once `done` fires, print whatever is still
/// queued and return.
async fn render_alerts(mut alerts: TopicReceiver, mut done: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            event = alerts.recv() => match event {
                Ok(event) => render(event.payload),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
            _ = done.changed() => break,
        }
    }
    while let Ok(event) = alerts.try_recv() {
        render(event.payload);
    }
}

fn render(payload: EventPayload) {
    if let EventPayload::Alert(alert) = payload {
        print_alert(&alert);
    }
}

fn print_alert(alert: &Alert) {
    let tag = match alert.level {
        AlertLevel::Critical => "CRITICAL".red().bold(),
        AlertLevel::Warning => "WARNING".yellow().bold(),
        AlertLevel::Info => "INFO".cyan().bold(),
    };
    println!("  [{}] {}: {}", tag, alert.title.bold(), alert.detail);
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _    ___       _ __"#.bold().cyan());
    println!("{}", r#"| |  / (_)___ _(_) /"#.bold().cyan());
    println!("{}", r#"| | / / / __ `/ / / "#.bold().cyan());
    println!("{}", r#"| |/ / / /_/ / / /  "#.bold().cyan());
    println!("{}", r#"|___/_/\__, /_/_/   "#.bold().cyan());
    println!("{}", r#"      /____/        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Vigil".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Health-driven scheduling & safety escalation");
    println!();
}

fn print_usage() {
    println!("Usage: vigil [run | report | inject-fault <code> [detail] | help]");
    println!();
    println!("  run                       supervise until Ctrl-C or halt (default)");
    println!("  report                    sample once and print a health report");
    println!("  inject-fault <code> [msg] push a raw fault code (101 over-temperature,");
    println!("                            102 extreme discharge, 103 BMS failure)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_means_run() {
        assert!(matches!(parse_args(&[]), Ok(Command::Run)));
    }

    #[test]
    fn inject_fault_joins_detail_words() {
        match parse_args(&args(&["inject-fault", "0x65", "pack", "at", "70C"])) {
            Ok(Command::InjectFault { code, detail }) => {
                assert_eq!(code, 101);
                assert_eq!(detail, "pack at 70C");
            }
            _ => panic!("expected inject-fault"),
        }
    }

    #[test]
    fn inject_fault_requires_a_numeric_code() {
        assert!(parse_args(&args(&["inject-fault"])).is_err());
        assert!(parse_args(&args(&["inject-fault", "hot"])).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_args(&args(&["reboot"])).is_err());
    }

    #[test]
    fn both_drivers_route_alerts_to_the_bus() {
        assert!(build_collaborators(Driver::Proc, 120).alerts.is_none());
        assert!(build_collaborators(Driver::Sim, 120).alerts.is_none());
    }

    #[test]
    fn hex_and_decimal_codes_parse() {
        assert_eq!(parse_code("103"), Some(103));
        assert_eq!(parse_code("0X66"), Some(102));
        assert_eq!(parse_code("-1"), None);
    }
}
