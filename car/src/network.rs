/// ----- NETWORK MODULE -----
/// The car's second thread. Each cycle it reconciles the TCP session with
/// the controller against the shared state (connect, or say goodbye and
/// hang up), mirrors the car's status, polls for one FLOOR target, and
/// advances the safety heartbeat. A live safety monitor keeps the
/// heartbeat at 1; if it climbs to 3 the monitor is gone and the car
/// latches emergency mode and withdraws from dispatching.
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shared_resources::error::ProtocolError;
use shared_resources::floor::Floor;
use shared_resources::message::{self, Message};
use shared_resources::shared_state::{DoorStatus, SharedState};

use crate::CarSettings;

const HEARTBEAT_LIMIT: u8 = 3;

enum Cycle {
    KeepAlive,
    EnteredEmergency,
}

pub fn run(shared: &SharedState, settings: &CarSettings, shutdown: &AtomicBool) {
    let mut connection: Option<TcpStream> = None;
    let mut last_sent_status = String::new();

    while !shutdown.load(Ordering::SeqCst) {
        let (should_connect, service_mode) = {
            let guard = shared.lock();
            (
                guard.safety_system >= 1
                    && guard.safety_system < HEARTBEAT_LIMIT
                    && guard.individual_service_mode == 0
                    && guard.emergency_mode == 0,
                guard.individual_service_mode == 1,
            )
        };

        if should_connect && connection.is_none() {
            connection = establish(settings, &mut last_sent_status);
        } else if !should_connect && connection.is_some() {
            let mut stream = connection.take().expect("connection checked above");
            if service_mode {
                let _ = message::send_message(&mut stream, &Message::IndividualService);
            }
            log::info!("car {} left the controller", settings.name);
        }

        if let Some(mut stream) = connection.take() {
            match service_cycle(&mut stream, shared, settings, &mut last_sent_status) {
                Ok(Cycle::KeepAlive) => connection = Some(stream),
                Ok(Cycle::EnteredEmergency) => {
                    let _ = message::send_message(&mut stream, &Message::Emergency);
                    println!("Safety system disconnected! Entering emergency mode.");
                    log::warn!(
                        "car {}: safety heartbeat expired, entering emergency mode",
                        settings.name
                    );
                }
                Err(e) => {
                    log::debug!("car {} lost the controller: {}", settings.name, e);
                }
            }
        }

        let mut guard = shared.lock();
        guard.wait_timeout(settings.delay);
    }
}

/// Open a session and introduce ourselves. The status dedup is reset so
/// the first report after (re)connecting always goes out.
fn establish(settings: &CarSettings, last_sent_status: &mut String) -> Option<TcpStream> {
    let mut stream = match TcpStream::connect(&settings.controller_address) {
        Ok(stream) => stream,
        Err(e) => {
            log::debug!("controller not reachable: {}", e);
            return None;
        }
    };

    last_sent_status.clear();
    let greeting = Message::Car {
        name: settings.name.clone(),
        lowest: settings.lowest,
        highest: settings.highest,
    };
    match message::send_message(&mut stream, &greeting) {
        Ok(()) => {
            log::info!("car {} connected to the controller", settings.name);
            Some(stream)
        }
        Err(e) => {
            log::debug!("registration failed: {}", e);
            None
        }
    }
}

/// One connected cycle: status mirror, inbound poll, heartbeat.
fn service_cycle(
    stream: &mut TcpStream,
    shared: &SharedState,
    settings: &CarSettings,
    last_sent_status: &mut String,
) -> Result<Cycle, ProtocolError> {
    if let Some(status) = current_status(shared) {
        let line = status.to_string();
        if line != *last_sent_status {
            message::send_message(stream, &status)?;
            *last_sent_status = line;
        }
    }

    match message::poll_message(stream, settings.poll_timeout) {
        Ok(Some(Message::Floor(target))) => apply_floor_target(shared, target),
        Ok(Some(other)) => log::debug!("ignoring {:?} from the controller", other),
        Ok(None) => {}
        // a garbled frame is not worth the session; skip it
        Err(ProtocolError::BadMessage(text)) => {
            log::debug!("unparseable message from the controller: {:?}", text);
        }
        Err(e) => return Err(e),
    }

    let entered_emergency = {
        let mut guard = shared.lock();
        if guard.safety_system < HEARTBEAT_LIMIT {
            guard.safety_system += 1;
        }
        let expired = guard.safety_system >= HEARTBEAT_LIMIT;
        if expired {
            guard.emergency_mode = 1;
        }
        guard.notify_all();
        expired
    };

    if entered_emergency {
        Ok(Cycle::EnteredEmergency)
    } else {
        Ok(Cycle::KeepAlive)
    }
}

/// Snapshot the state fields into a STATUS message; corrupt fields mean
/// no report this cycle (the safety monitor is about to intervene).
fn current_status(shared: &SharedState) -> Option<Message> {
    let guard = shared.lock();
    Some(Message::Status {
        status: guard.status()?,
        current: guard.current_floor()?,
        destination: guard.destination_floor()?,
    })
}

/// A FLOOR target from the controller. At the named floor with the doors
/// closed the car opens up; anywhere else the target becomes the new
/// destination, including mid-flight retargeting.
fn apply_floor_target(shared: &SharedState, target: Floor) {
    let mut guard = shared.lock();
    if guard.current_floor() == Some(target) {
        if guard.status() == Some(DoorStatus::Closed) {
            guard.set_status(DoorStatus::Opening);
            guard.notify_all();
        }
    } else {
        guard.set_destination_floor(target);
        guard.notify_all();
    }
}
