use std::net::TcpListener;
use std::process;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;

use shared_resources::config::SystemConfig;
use shared_resources::signal;

use controller::display;
use controller::server::{self, Controller};

fn main() {
    env_logger::init();

    if let Err(e) = signal::install_handlers() {
        eprintln!("Failed to install signal handlers: {}", e);
        process::exit(1);
    }

    let config = SystemConfig::get();

    let listener = match TcpListener::bind(&config.controller_address) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Unable to listen on {}: {}", config.controller_address, e);
            process::exit(1);
        }
    };
    println!("Controller listening on {}", config.controller_address);

    let updates = if config.status_display {
        let (snapshots_tx, snapshots_rx) = unbounded();
        thread::spawn(move || display::main(snapshots_rx));
        Some(snapshots_tx)
    } else {
        None
    };

    let controller = Arc::new(Controller::new(updates));
    server::run(listener, controller, signal::shutdown_flag());
}
