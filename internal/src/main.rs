use std::env;
use std::process;

use shared_resources::shared_state::{CarState, DoorStatus, SharedState};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!(
            "Usage: {} <car_name> <operation>",
            args.first().map(String::as_str).unwrap_or("internal")
        );
        process::exit(1);
    }
    let car_name = &args[1];
    let operation = args[2].as_str();

    let shared = match SharedState::open(car_name) {
        Ok(shared) => shared,
        Err(_) => {
            println!("Unable to access car {}.", car_name);
            process::exit(1);
        }
    };

    let mut guard = shared.lock();
    match operation {
        "open" => {
            guard.open_button = 1;
            guard.notify_all();
        }
        "close" => {
            guard.close_button = 1;
            guard.notify_all();
        }
        "stop" => {
            guard.emergency_stop = 1;
            guard.notify_all();
        }
        "service_on" => {
            // taking manual control also releases a latched emergency
            guard.individual_service_mode = 1;
            guard.emergency_mode = 0;
            guard.notify_all();
        }
        "service_off" => {
            guard.individual_service_mode = 0;
            guard.notify_all();
        }
        "up" => {
            if step_destination(&mut guard, true) {
                guard.notify_all();
            }
        }
        "down" => {
            if step_destination(&mut guard, false) {
                guard.notify_all();
            }
        }
        _ => println!("Invalid operation."),
    }
}

/// Manual one-floor moves, only meaningful under manual control with the
/// car at rest. The step skips the nonexistent floor 0, so `down` at 1
/// targets B1; at the end of the world the destination stays put. The car
/// itself rejects destinations outside its serviced range.
fn step_destination(state: &mut CarState, going_up: bool) -> bool {
    if state.individual_service_mode == 0 {
        println!("Operation only allowed in service mode.");
        return false;
    }

    match state.status() {
        Some(DoorStatus::Closed) => {}
        Some(DoorStatus::Open) | Some(DoorStatus::Opening) | Some(DoorStatus::Closing) => {
            println!("Operation not allowed while doors are open.");
            return false;
        }
        _ => {
            println!("Operation not allowed while elevator is moving.");
            return false;
        }
    }

    let current = match state.current_floor() {
        Some(current) => current,
        None => return false,
    };
    let next = if going_up {
        current.up()
    } else {
        current.down()
    };
    match next {
        Some(next) => {
            state.set_destination_floor(next);
            true
        }
        None => false,
    }
}
