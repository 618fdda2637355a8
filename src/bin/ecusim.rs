use clap::{App, Arg};
use colored::*;
use ecusim::nvram::DEFAULT_NVRAM_PATH;
use ecusim::state::EcuSnapshot;
use ecusim::telemetry::DEFAULT_TELEMETRY_PATH;
use ecusim::{EcuConfig, FileFaultStore, Simulation, StateStore, TelemetryLog};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_REFRESH_MS: &str = "500";
const DRIVER_TASK: &str = "driver";
const DRIVER_INTERVAL: Duration = Duration::from_millis(100);
const SWEEP_PEAK_PCT: u32 = 80;
// Placeholder deadline when no --duration is given; the branch is disabled
const IDLE_DEADLINE: Duration = Duration::from_secs(86_400);

type SimResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

struct SimOptions {
    config: EcuConfig,
    nvram_path: PathBuf,
    log_path: Option<PathBuf>,
    fixed_throttle: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("ecusim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🚗 Engine control unit simulator with a transmission peer on a CAN-style bus")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; built-in defaults when omitted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("nvram")
                .long("nvram")
                .value_name("FILE")
                .help("Fault store file")
                .takes_value(true)
                .default_value(DEFAULT_NVRAM_PATH),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .value_name("FILE")
                .help("Write CSV telemetry to FILE")
                .takes_value(true)
                .min_values(0),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after SECONDS; runs until Ctrl+C when omitted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-tcu")
                .long("no-tcu")
                .help("Disable the transmission controller and sniff the bus instead"),
        )
        .arg(
            Arg::with_name("json-logs")
                .long("json-logs")
                .help("Emit logs as JSON"),
        )
        .arg(
            Arg::with_name("refresh-ms")
                .short("r")
                .long("refresh-ms")
                .value_name("MS")
                .help("Dashboard refresh period")
                .takes_value(true)
                .default_value(DEFAULT_REFRESH_MS),
        )
        .arg(
            Arg::with_name("throttle")
                .short("t")
                .long("throttle")
                .value_name("PERCENT")
                .help("Hold a fixed throttle instead of the 0-80-0 % sweep")
                .takes_value(true),
        )
        .get_matches();

    init_tracing(matches.is_present("json-logs"));

    let mut config = match matches.value_of("config") {
        Some(path) => EcuConfig::load(path)?,
        None => EcuConfig::default(),
    };
    if matches.is_present("no-tcu") {
        config.transmission.enabled = false;
    }

    let refresh_ms: u64 = matches.value_of("refresh-ms").unwrap_or(DEFAULT_REFRESH_MS).parse()?;
    let duration = matches
        .value_of("duration")
        .map(str::parse::<u64>)
        .transpose()?
        .map(Duration::from_secs);
    let fixed_throttle = matches
        .value_of("throttle")
        .map(str::parse::<f32>)
        .transpose()?;
    let log_path = matches
        .is_present("log")
        .then(|| PathBuf::from(matches.value_of("log").unwrap_or(DEFAULT_TELEMETRY_PATH)));

    let options = SimOptions {
        config,
        nvram_path: PathBuf::from(matches.value_of("nvram").unwrap_or(DEFAULT_NVRAM_PATH)),
        log_path,
        fixed_throttle,
    };

    println!("{}", "🚗 ECU Simulator".bright_blue().bold());
    println!("{}", "================".bright_blue());

    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = oneshot::channel();
    let sim_stop = Arc::clone(&stop);
    let sim_thread = std::thread::Builder::new()
        .name("ecu-sim".to_string())
        .spawn(move || run_simulation(options, &sim_stop, ready_tx))?;

    let Ok(state) = ready_rx.await else {
        // The thread exited before publishing its state handle
        return match sim_thread.join() {
            Ok(Err(e)) => Err(e.to_string().into()),
            _ => Err("simulation thread exited during startup".into()),
        };
    };

    info!(refresh_ms, "Dashboard started (Ctrl+C to stop)");
    print_header();

    let mut refresh = time::interval(Duration::from_millis(refresh_ms.max(1)));
    let deadline = time::sleep(duration.unwrap_or(IDLE_DEADLINE));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                if sim_thread.is_finished() {
                    warn!("Simulation thread stopped");
                    break;
                }
                print_row(&state.read());
            }
            _ = &mut deadline, if duration.is_some() => {
                info!("Run duration elapsed");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    let outcome = tokio::task::spawn_blocking(move || sim_thread.join()).await?;
    print_summary(&state);

    match outcome {
        Ok(Ok(())) => {
            println!("{}", "🏁 ECU Simulator stopped".bright_green());
            Ok(())
        }
        Ok(Err(e)) => {
            println!("{} {}", "❌ Simulation failed:".bright_red().bold(), e);
            Err(e.to_string().into())
        }
        Err(_) => Err("simulation thread panicked".into()),
    }
}

fn init_tracing(json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

/// Body of the simulation thread. The simulation is built here because its
/// components are not `Send`.
fn run_simulation(
    options: SimOptions,
    stop: &AtomicBool,
    ready: oneshot::Sender<Arc<StateStore>>,
) -> SimResult {
    let store = FileFaultStore::new(&options.nvram_path);
    info!(nvram = %options.nvram_path.display(), "Using fault store");

    let mut sim = Simulation::new(options.config, Box::new(store))?;
    if let Some(path) = &options.log_path {
        sim.attach_telemetry(TelemetryLog::create(path)?);
    }

    let ecu = sim.ecu();
    match options.fixed_throttle {
        Some(throttle) => ecu.borrow_mut().set_throttle_demand(throttle),
        None => {
            let mut step = 0u32;
            sim.register_task(DRIVER_TASK, DRIVER_INTERVAL, move || {
                ecu.borrow_mut().set_throttle_demand(sweep_throttle(step));
                step = step.wrapping_add(1);
                Ok(())
            });
        }
    }

    if ready.send(sim.state()).is_err() {
        return Ok(());
    }

    info!("ECU scheduler started");
    sim.run_until(stop)?;
    Ok(())
}

/// Triangle wave 0 -> peak -> 0, one percent per step.
fn sweep_throttle(step: u32) -> f32 {
    let period = SWEEP_PEAK_PCT * 2;
    let pos = step % period;
    let pct = if pos <= SWEEP_PEAK_PCT { pos } else { period - pos };
    pct as f32
}

fn print_header() {
    println!("{}", "┌──────────┬──────────┬──────────┬──────────┬───────────┬─────────┐".bright_white());
    println!("{}", "│      RPM │ Throttle │  Coolant │     Load │ Injection │     DTC │".bright_white());
    println!("{}", "├──────────┼──────────┼──────────┼──────────┼───────────┼─────────┤".bright_white());
}

fn print_row(s: &EcuSnapshot) {
    let rpm_str = format!("{:>8}", s.rpm);
    let rpm_str = if s.rpm > 6000 { rpm_str.red() } else { rpm_str.bright_green() };
    let coolant_str = format!("{:>6.1}°C", s.coolant_c);
    let coolant_str = if s.coolant_c > 95.0 { coolant_str.red() } else { coolant_str.white() };
    let load_str = format!("{:>6.1}Nm", s.load_nm);
    let load_str = if s.load_nm > 0.0 { load_str.yellow() } else { load_str.white() };
    let dtc_str = format!("{:>7}", s.dtc_label());
    let dtc_str = if s.active_dtc.is_some() { dtc_str.bright_red().bold() } else { dtc_str.green() };

    println!(
        "│ {} │ {:>7.1}% │ {} │ {} │ {:>7.3}ms │ {} │",
        rpm_str, s.throttle_pct, coolant_str, load_str, s.injection_ms, dtc_str
    );
}

fn print_summary(state: &StateStore) {
    let s = state.read();
    println!("{}", "└──────────┴──────────┴──────────┴──────────┴───────────┴─────────┘".bright_white());
    println!(
        "{} {} snapshots | last RPM {} | DTC {}",
        "📊".bright_blue(),
        state.updates(),
        s.rpm,
        s.dtc_label()
    );
}
