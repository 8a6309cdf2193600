use std::env;
use std::process;

use shared_resources::config::SystemConfig;
use shared_resources::shared_state::SharedState;
use shared_resources::signal;

pub mod checks;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!(
            "Usage: {} <car_name>",
            args.first().map(String::as_str).unwrap_or("safety")
        );
        process::exit(1);
    }
    let car_name = &args[1];

    if let Err(e) = signal::install_handlers() {
        eprintln!("Failed to install signal handlers: {}", e);
        process::exit(1);
    }

    let shared = match SharedState::open(car_name) {
        Ok(shared) => shared,
        Err(_) => {
            println!("Unable to access car {}.", car_name);
            process::exit(1);
        }
    };

    let config = SystemConfig::get();
    log::info!("safety monitor attached to car {}", car_name);

    while !signal::shutdown_requested() {
        let mut guard = shared.lock();
        // wake on any state change, or at the interval to re-validate
        guard.wait_timeout(config.safety_interval());

        let outcome = checks::enforce(&mut guard);
        for alert in &outcome.alerts {
            println!("{}", alert);
        }
        if outcome.changed {
            guard.notify_all();
        }
    }

    log::info!("safety monitor for car {} shutting down", car_name);
}
