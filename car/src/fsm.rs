/// ----- FSM MODULE -----
/// The door and motion state machine. Every transition happens under the
/// shared-state mutex; the mutex is released across the door/travel delays
/// and the status re-read afterwards, so the safety monitor (or a button
/// client) can preempt a transition in flight and win.
///
/// Opening the doors is the only way out of Between.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use shared_resources::floor;
use shared_resources::shared_state::{DoorStatus, SharedState, StateGuard};

use crate::CarSettings;

/// Upper bound on one dwell-poll sleep, so fresh button presses and mode
/// changes are noticed quickly even with long door delays.
const MAX_SLEEP: Duration = Duration::from_millis(10);

pub fn run(shared: &SharedState, settings: &CarSettings, shutdown: &AtomicBool) {
    let mut open_since = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        let mut guard = shared.lock();
        consume_buttons(&mut guard, &mut open_since);

        match guard.status() {
            Some(DoorStatus::Opening) => {
                drop(guard);
                thread::sleep(settings.delay);

                let mut guard = shared.lock();
                if guard.status() == Some(DoorStatus::Opening) {
                    guard.set_status(DoorStatus::Open);
                    open_since = Instant::now();
                    guard.notify_all();
                }
            }

            Some(DoorStatus::Open) => {
                drop(guard);
                let elapsed = open_since.elapsed();
                if elapsed >= settings.delay {
                    let mut guard = shared.lock();
                    let held_open = guard.individual_service_mode == 1;
                    if guard.status() == Some(DoorStatus::Open) && !held_open {
                        guard.set_status(DoorStatus::Closing);
                        guard.notify_all();
                    } else {
                        drop(guard);
                        // service mode keeps the doors open; idle gently
                        thread::sleep(MAX_SLEEP);
                    }
                } else {
                    thread::sleep((settings.delay - elapsed).min(MAX_SLEEP));
                }
            }

            Some(DoorStatus::Closing) => {
                drop(guard);
                thread::sleep(settings.delay);

                let mut guard = shared.lock();
                // the safety monitor reverses to Opening on obstruction;
                // only an undisturbed Closing completes
                if guard.status() == Some(DoorStatus::Closing) {
                    guard.set_status(DoorStatus::Closed);
                    guard.notify_all();
                }
            }

            Some(DoorStatus::Closed) => closed_step(guard, settings),

            Some(DoorStatus::Between) => {
                drop(guard);
                thread::sleep(settings.delay);
                between_step(shared.lock(), settings);
            }

            None => {
                // corrupt status byte; leave it for the safety monitor
                drop(guard);
                thread::sleep(settings.idle_delay);
            }
        }
    }
}

/// Button flags are consumed on observation. Open reopens closing or
/// closed doors and extends the dwell of open ones; close cuts the dwell
/// short.
fn consume_buttons(guard: &mut StateGuard<'_>, open_since: &mut Instant) {
    if guard.open_button == 1 {
        guard.open_button = 0;
        match guard.status() {
            Some(DoorStatus::Closed) | Some(DoorStatus::Closing) => {
                guard.set_status(DoorStatus::Opening);
                guard.notify_all();
            }
            Some(DoorStatus::Open) => *open_since = Instant::now(),
            _ => {}
        }
    }

    if guard.close_button == 1 {
        guard.close_button = 0;
        if guard.status() == Some(DoorStatus::Open) {
            guard.set_status(DoorStatus::Closing);
            guard.notify_all();
        }
    }
}

/// Decide whether to start moving. A destination outside the car's range
/// is coerced back to the current floor; with nowhere to go the car blocks
/// on the condvar so a button press or a new target wakes it immediately.
fn closed_step(mut guard: StateGuard<'_>, settings: &CarSettings) {
    let need_move = !guard.at_destination();
    let emergency = guard.emergency_mode == 1;

    let mut valid_destination = true;
    if need_move {
        match guard.destination_floor() {
            Some(destination) if destination.is_within(settings.lowest, settings.highest) => {}
            _ => {
                valid_destination = false;
                if let Some(current) = guard.current_floor() {
                    guard.set_destination_floor(current);
                    guard.notify_all();
                }
            }
        }
    }

    if need_move && !emergency && valid_destination {
        guard.set_status(DoorStatus::Between);
        guard.notify_all();
    } else {
        guard.wait_timeout(settings.idle_delay);
    }
}

/// One floor of travel has elapsed: advance toward the destination and
/// open on arrival (or just stop, in individual service mode).
fn between_step(mut guard: StateGuard<'_>, settings: &CarSettings) {
    if guard.status() != Some(DoorStatus::Between) {
        return;
    }

    if let (Some(current), Some(destination)) = (guard.current_floor(), guard.destination_floor())
    {
        if let Ok(next) = floor::next_toward(current, destination, settings.lowest, settings.highest)
        {
            guard.set_current_floor(next);
        }
    }

    if guard.at_destination() {
        if guard.individual_service_mode == 1 {
            guard.set_status(DoorStatus::Closed);
        } else {
            guard.set_status(DoorStatus::Opening);
        }
    }
    guard.notify_all();
}
