use std::env;
use std::process;
use std::thread;
use std::time::Duration;

use shared_resources::config::SystemConfig;
use shared_resources::floor::Floor;
use shared_resources::shared_state::{SharedState, MAX_CAR_NAME_LEN};
use shared_resources::signal;

pub mod fsm;
pub mod network;

#[derive(Debug, Clone)]
pub struct CarSettings {
    pub name: String,
    pub lowest: Floor,
    pub highest: Floor,
    /// Door timing and travel time per floor, and the network cycle period.
    pub delay: Duration,
    pub controller_address: String,
    pub poll_timeout: Duration,
    pub idle_delay: Duration,
}

fn main() {
    env_logger::init();

    let settings = parse_args().unwrap_or_else(|message| {
        eprintln!("{}", message);
        process::exit(1);
    });

    if let Err(e) = signal::install_handlers() {
        eprintln!("Failed to install signal handlers: {}", e);
        process::exit(1);
    }

    let shared = match SharedState::create(&settings.name, settings.lowest) {
        Ok(shared) => shared,
        Err(e) => {
            eprintln!("Failed to create shared memory: {}", e);
            process::exit(1);
        }
    };

    log::info!(
        "car {} serving floors {} to {}",
        settings.name,
        settings.lowest,
        settings.highest
    );

    thread::scope(|scope| {
        scope.spawn(|| network::run(&shared, &settings, signal::shutdown_flag()));
        fsm::run(&shared, &settings, signal::shutdown_flag());
    });

    SharedState::unlink(&settings.name);
}

fn parse_args() -> Result<CarSettings, String> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 5 {
        return Err(format!(
            "Usage: {} <name> <lowest> <highest> <delay_ms>",
            args.first().map(String::as_str).unwrap_or("car")
        ));
    }

    let name = args[1].clone();
    if name.is_empty() || name.len() > MAX_CAR_NAME_LEN {
        return Err("Invalid car name".to_string());
    }

    let lowest: Floor = args[2].parse().map_err(|_| "Invalid floor range".to_string())?;
    let highest: Floor = args[3].parse().map_err(|_| "Invalid floor range".to_string())?;
    if lowest >= highest {
        return Err("Invalid floor range".to_string());
    }

    let delay_ms: u64 = match args[4].parse() {
        Ok(ms) if ms > 0 => ms,
        _ => return Err("Invalid delay".to_string()),
    };

    let config = SystemConfig::get();
    Ok(CarSettings {
        name,
        lowest,
        highest,
        delay: Duration::from_millis(delay_ms),
        controller_address: config.controller_address.clone(),
        poll_timeout: config.poll_timeout(),
        idle_delay: config.idle_delay(),
    })
}
