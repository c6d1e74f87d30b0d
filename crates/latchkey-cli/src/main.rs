//! `latchkey` – face-authorized smart lock.
//!
//! 1. Loads `~/.latchkey/config.toml`, writing the defaults on first run.
//! 2. Wires the lock, camera, vision service and broker named by the config.
//! 3. Runs the pipeline until Ctrl-C, `q` on stdin, or a fatal fault.

mod components;
mod config;

use colored::Colorize;
use crossbeam_channel::Sender;
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

use latchkey_runtime::{PipelineReport, Supervisor, init_tracing};

fn main() -> ExitCode {
    // Held until exit so pending spans are flushed.
    let tracing_guard = init_tracing("latchkey");

    print_banner();
    if tracing_guard.is_exporting() {
        println!("  {} Exporting spans over OTLP", "✓".green().bold());
    }

    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => write_default_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    config::apply_env_overrides(&mut cfg);
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Config error".red(), e);
        return ExitCode::FAILURE;
    }

    let controller = Arc::new(components::build_controller(&cfg));
    let broker = components::build_broker(&cfg);
    let camera = components::build_camera(&cfg);
    let vision = components::build_vision(&cfg);

    println!(
        "  Lock {} is {}",
        controller.component().bold(),
        controller.current_state().to_string().cyan()
    );
    println!(
        "  Type {} and press Enter to stop.\n",
        "q".bold().cyan()
    );

    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    let supervisor =
        Supervisor::new(cfg.pipeline_config(), broker, Arc::clone(&controller)).with_quit(quit_rx);

    let signal = supervisor.signal();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping pipeline …".yellow().bold());
        signal.trigger("ctrl-c");
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use `q` to stop");
    }

    spawn_quit_listener(quit_tx);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(supervisor.run(camera, vision)) {
        Ok(report) => {
            print_report(&report);
            println!("  {} Lock left {}.", "✓".green().bold(), controller.current_state());
            ExitCode::SUCCESS
        }
        Err(e) => {
            let kind = if e.is_fatal() { "Fatal fault" } else { "Pipeline error" };
            println!("{}: {}", kind.red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn write_default_config() -> config::Config {
    let cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

/// Forward `q` lines on stdin to the capture stage's quit input.
///
/// End of input leaves the pipeline running, so a detached service is not
/// stopped by a closed stdin.
fn spawn_quit_listener(quit: Sender<()>) {
    let spawned = std::thread::Builder::new()
        .name("latchkey-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    let _ = quit.try_send(());
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn stdin listener; use Ctrl-C to stop");
    }
}

fn print_report(report: &PipelineReport) {
    println!();
    println!(
        "  Stopped: {}",
        report.stop_reason.as_deref().unwrap_or("unknown").bold()
    );
    println!(
        "  Frames read {}, submitted {}, dropped {}",
        report.capture.frames_read, report.capture.frames_submitted, report.capture.frames_dropped
    );
    println!(
        "  Frames checked {}, authorized {}",
        report.authorization.frames, report.authorization.authorized
    );
    println!(
        "  Commands received {}, applied {}, rejected {}",
        report.commands.received, report.commands.actuated, report.commands.rejected
    );
    println!("  State updates published {}", report.published);
}

fn print_banner() {
    println!();
    println!("{}", r#"   __       __       __   __        "#.bold().cyan());
    println!("{}", r#"  / /  ___ / /_____/ /  / /_____ __ __"#.bold().cyan());
    println!("{}", r#" / /__/ _ `/ __/ __/ _ \/  '_/ -_) // /"#.bold().cyan());
    println!("{}", r#"/____/\_,_/\__/\__/_//_/_/\_\\__/\_, / "#.bold().cyan());
    println!("{}", r#"                                /___/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "latchkey".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Face-authorized smart lock");
    println!();
}
