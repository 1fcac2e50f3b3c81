//! `cadence` – run the simulated demo robot under the command scheduler.
//!
//! This binary:
//!
//! 1. Loads `~/.cadence/config.toml` (or the file given with `--config`),
//!    falling back to defaults, then applies `CADENCE_*` overrides.
//! 2. Builds the demo robot (drivetrain, intake, default commands, sensor
//!    trigger) and schedules its autonomous routine.
//! 3. Runs the scheduler at the configured period for `cycles` cycles
//!    (`0` runs until Ctrl-C), disabling the robot at `disable_at_cycle`.
//! 4. Prints a summary of scheduler events on exit.
//!
//! ```text
//! cadence [--config <path>] [--write-config]
//! ```

mod config;
mod demo;

use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use cadence_kernel::{CommandScheduler, SubsystemHandle};
use cadence_runtime::robot_loop::RobotLoop;
use cadence_runtime::telemetry::init_tracing;

fn main() {
    let _telemetry = init_tracing("cadence");

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };
    if options.help {
        println!("{}", USAGE);
        return;
    }

    print_banner();

    let path = options.config.unwrap_or_else(config::config_path);

    if options.write_config {
        match config::save_to(&config::Config::default(), &path) {
            Ok(()) => println!(
                "  {} Default config written to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            ),
            Err(e) => {
                println!("{}: {}", "Error saving config".red(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let mut cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            println!("  No config at {}; using defaults.", path.display().to_string().dimmed());
            config::Config::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this cycle …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the run can only end after its configured cycles");
    }

    // ── Robot ─────────────────────────────────────────────────────────────
    let scheduler = CommandScheduler::with_config(cfg.scheduler.clone());
    let robot = match demo::Demo::build(&scheduler) {
        Ok(robot) => robot,
        Err(e) => {
            println!("{}: {}", "Failed to build demo robot".red(), e);
            std::process::exit(1);
        }
    };
    scheduler.schedule(robot.autonomous());

    let span = match cfg.cycles {
        0 => "until Ctrl-C".to_string(),
        n => format!("{} cycles", n),
    };
    println!("  Running {} at {} ms per cycle\n", span.bold(), cfg.scheduler.period_ms);

    let mut robot_loop = RobotLoop::from_config(scheduler.clone());
    while !shutdown.load(Ordering::SeqCst) && (cfg.cycles == 0 || robot_loop.cycles() < cfg.cycles) {
        if cfg.disable_at_cycle == Some(robot_loop.cycles()) && robot.is_enabled() {
            info!(cycle = robot_loop.cycles(), "disabling robot");
            robot.set_enabled(false);
        }
        robot_loop.run_for(1);
    }

    print_summary(&scheduler, &robot, robot_loop.cycles());
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

const USAGE: &str = "usage: cadence [--config <path>] [--write-config] [--help]";

#[derive(Debug, Default, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    write_config: bool,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config needs a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--write-config" => options.write_config = true,
            "--help" | "-h" => options.help = true,
            other => return Err(format!("unknown argument `{}`", other)),
        }
    }
    Ok(options)
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______          __                    "#.bold().cyan());
    println!("{}", r#"  / ____/___ _____/ /__  ____  ________  "#.bold().cyan());
    println!("{}", r#" / /   / __ `/ __  / _ \/ __ \/ ___/ _ \ "#.bold().cyan());
    println!("{}", r#"/ /___/ /_/ / /_/ /  __/ / / / /__/  __/ "#.bold().cyan());
    println!("{}", r#"\____/\__,_/\__,_/\___/_/ /_/\___/\___/  "#.bold().cyan());
    println!();
    println!("  {}", "Cooperative command scheduler – demo robot".dimmed());
    println!();
}

fn print_summary(scheduler: &CommandScheduler, robot: &demo::Demo, cycles: u64) {
    let summary = robot.summary();
    let holder = |subsystem: &SubsystemHandle| {
        scheduler
            .requiring(subsystem)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "nothing".to_string())
    };
    println!();
    println!("  {}", "Run summary".bold().underline());
    println!("    cycles       {}", cycles);
    println!(
        "    drivetrain   {:.2} m, {:.2} m/s, held by {}",
        robot.drivetrain().distance(),
        robot.drivetrain().speed(),
        holder(robot.drivetrain_handle())
    );
    println!(
        "    intake       piece {}, roller {:.2}, held by {}",
        if robot.intake().has_piece() { "yes".green() } else { "no".yellow() },
        robot.intake().roller(),
        holder(robot.intake_handle())
    );
    println!("    scheduled    {}", summary.scheduled);
    println!("    executed     {}", summary.executed);
    println!("    finished     {}", summary.finished);
    println!("    interrupted  {}", summary.interrupted);
    let errors = summary.errors.to_string();
    println!(
        "    errors       {}",
        if summary.errors == 0 { errors.as_str().green() } else { errors.as_str().red() }
    );
    println!();
}
