/// ----- CHECKS MODULE -----
/// One pass of the safety monitor over the shared record: bootstrap the
/// heartbeat, reverse obstructed doors, latch emergency mode on the stop
/// button, the overload sensor or corrupt state. Everything here is pure
/// against the record so it can be exercised without shared memory; the
/// monitor loop owns the locking and the alert printing.
///
/// Emergency mode is latching. Nothing in this module, or anywhere else,
/// clears it.
use shared_resources::shared_state::{CarState, DoorStatus};

pub struct Outcome {
    pub changed: bool,
    pub alerts: Vec<&'static str>,
}

/// Validate every field the record can express: label bytes, the status
/// discriminant, flag domains, the heartbeat range, and the rule that an
/// obstruction can only exist while the doors are in motion.
pub fn state_is_consistent(state: &CarState) -> bool {
    if state.current_floor().is_none() || state.destination_floor().is_none() {
        return false;
    }

    let status = match state.status() {
        Some(status) => status,
        None => return false,
    };

    let flags = [
        state.open_button,
        state.close_button,
        state.door_obstruction,
        state.overload,
        state.emergency_stop,
        state.individual_service_mode,
        state.emergency_mode,
    ];
    if flags.iter().any(|&flag| flag > 1) {
        return false;
    }

    if state.safety_system > 3 {
        return false;
    }

    if state.door_obstruction == 1
        && !matches!(status, DoorStatus::Opening | DoorStatus::Closing)
    {
        return false;
    }

    true
}

pub fn enforce(state: &mut CarState) -> Outcome {
    let mut changed = false;
    let mut alerts = Vec::new();

    // the heartbeat doubles as "a monitor is attached"
    if state.safety_system == 0 {
        state.safety_system = 1;
        changed = true;
    }

    // obstructed while closing: reverse, the car completes the Opening
    if state.door_obstruction == 1 && state.status() == Some(DoorStatus::Closing) {
        state.set_status(DoorStatus::Opening);
        changed = true;
    }

    if state.emergency_stop == 1 && state.emergency_mode == 0 {
        alerts.push("The emergency stop button has been pressed!");
        state.emergency_stop = 0;
        state.emergency_mode = 1;
        changed = true;
    }

    if state.overload == 1 && state.emergency_mode == 0 {
        alerts.push("The overload sensor has been tripped!");
        state.emergency_mode = 1;
        changed = true;
    }

    // corruption checks are moot once emergency mode is latched
    if state.emergency_mode != 1 && !state_is_consistent(state) {
        alerts.push("Data consistency error!");
        state.emergency_mode = 1;
        changed = true;
    }

    Outcome { changed, alerts }
}
