/// ----- SERVER MODULE -----
/// Accept loop and per-connection handlers. The first frame on a
/// connection decides what the peer is: a car registering for the lifetime
/// of the connection, or a call client asking one question. A single table
/// mutex serialises every update to car records and queues.
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::Sender;

use shared_resources::error::ProtocolError;
use shared_resources::floor::Floor;
use shared_resources::message::{self, Message};

use crate::dispatch::CarTable;
use crate::display::CarSnapshot;

pub struct Controller {
    pub table: Mutex<CarTable>,
    updates: Option<Sender<Vec<CarSnapshot>>>,
}

impl Controller {
    pub fn new(updates: Option<Sender<Vec<CarSnapshot>>>) -> Self {
        Controller {
            table: Mutex::new(CarTable::new()),
            updates,
        }
    }

    fn publish_snapshots(&self) {
        if let Some(updates) = &self.updates {
            let snapshots = {
                let table = self.table.lock().unwrap();
                table.cars().iter().map(CarSnapshot::from_record).collect()
            };
            let _ = updates.send(snapshots);
        }
    }
}

/// Accept connections until the shutdown flag is raised. SIGINT interrupts
/// the blocking accept, which is how the flag gets noticed.
pub fn run(listener: TcpListener, controller: Arc<Controller>, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let controller = Arc::clone(&controller);
                thread::spawn(move || handle_client(stream, controller));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("accept failed: {}", e);
                break;
            }
        }
    }
}

fn handle_client(mut stream: TcpStream, controller: Arc<Controller>) {
    let first = match message::recv_message(&mut stream) {
        Ok(message) => message,
        Err(_) => return,
    };

    match first {
        Message::Car {
            name,
            lowest,
            highest,
        } => serve_car(stream, controller, name, lowest, highest),
        Message::Call {
            source,
            destination,
        } => serve_call(stream, controller, source, destination),
        other => log::debug!("dropping connection that opened with {:?}", other),
    }
}

/// Lifetime of one car connection: register, then fold in status reports
/// until the car leaves or the connection dies.
fn serve_car(
    mut stream: TcpStream,
    controller: Arc<Controller>,
    name: String,
    lowest: Floor,
    highest: Floor,
) {
    if lowest >= highest {
        log::warn!("rejecting car {} with floor range {}..{}", name, lowest, highest);
        return;
    }

    let write_half = stream.try_clone().ok();
    let handle = {
        let mut table = controller.table.lock().unwrap();
        table.register(&name, lowest, highest, write_half)
    };
    log::info!("car {} registered for floors {} to {}", name, lowest, highest);
    controller.publish_snapshots();

    loop {
        let inbound = match message::recv_message(&mut stream) {
            Ok(message) => message,
            // a garbled frame is not worth the session; skip it
            Err(ProtocolError::BadMessage(text)) => {
                log::debug!("unparseable message from car {}: {:?}", name, text);
                continue;
            }
            Err(_) => break,
        };

        let mut table = controller.table.lock().unwrap();
        match inbound {
            Message::Status {
                status,
                current,
                destination,
            } => {
                if let Some(next) = table.update_status(handle, status, current, destination) {
                    table.send_floor(handle.id, next);
                }
            }
            Message::Emergency => {
                log::warn!("car {} reported an emergency", name);
                table.disconnect(handle);
                drop(table);
                break;
            }
            Message::IndividualService => {
                log::info!("car {} left for individual service", name);
                table.disconnect(handle);
                drop(table);
                break;
            }
            other => log::debug!("ignoring {:?} from car {}", other, name),
        }
        drop(table);
        controller.publish_snapshots();
    }

    let mut table = controller.table.lock().unwrap();
    table.disconnect(handle);
    drop(table);
    controller.publish_snapshots();
    log::info!("car {} disconnected", name);
}

fn serve_call(mut stream: TcpStream, controller: Arc<Controller>, source: Floor, destination: Floor) {
    let reply = answer_call(&controller, source, destination);
    if let Err(e) = message::send_message(&mut stream, &reply) {
        log::debug!("failed to answer call client: {}", e);
    }
    controller.publish_snapshots();
}

/// Pick a car, queue the stops, and nudge the car if the insertions put a
/// new target at the front of its queue.
pub fn answer_call(controller: &Controller, source: Floor, destination: Floor) -> Message {
    let mut table = controller.table.lock().unwrap();
    match table.select_car(source, destination) {
        Some(id) => {
            if let Some(head) = table.assign_call(id, source, destination) {
                table.send_floor(id, head);
            }
            let name = table.car(id).name.clone();
            log::info!("call {} to {} assigned to car {}", source, destination, name);
            Message::AssignedCar(name)
        }
        None => {
            log::info!("call {} to {} is unserviceable", source, destination);
            Message::Unavailable
        }
    }
}
