/// End-to-end dispatcher tests: a real listener on an ephemeral port, fake
/// cars and call clients talking the framed protocol over TCP.
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use controller::server::{self, Controller};
use shared_resources::floor::Floor;
use shared_resources::message::{self, Message};
use shared_resources::shared_state::DoorStatus;

static NEVER_SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn floor(label: &str) -> Floor {
    label.parse().unwrap()
}

fn start_controller() -> (SocketAddr, Arc<Controller>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let controller = Arc::new(Controller::new(None));
    let handle = Arc::clone(&controller);
    thread::spawn(move || server::run(listener, handle, &NEVER_SHUTDOWN));
    (addr, controller)
}

fn connect_car(addr: SocketAddr, name: &str, lowest: &str, highest: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    message::send_message(
        &mut stream,
        &Message::Car {
            name: name.to_string(),
            lowest: floor(lowest),
            highest: floor(highest),
        },
    )
    .unwrap();
    stream
}

fn report_status(stream: &mut TcpStream, status: DoorStatus, current: &str, destination: &str) {
    message::send_message(
        stream,
        &Message::Status {
            status,
            current: floor(current),
            destination: floor(destination),
        },
    )
    .unwrap();
}

fn place_call(addr: SocketAddr, source: &str, destination: &str) -> Message {
    let mut stream = TcpStream::connect(addr).unwrap();
    message::send_message(
        &mut stream,
        &Message::Call {
            source: floor(source),
            destination: floor(destination),
        },
    )
    .unwrap();
    message::recv_message(&mut stream).unwrap()
}

/// Spin until the controller's view of `name` reaches `current`, so tests
/// do not race the handler threads.
fn wait_for_car_at(controller: &Controller, name: &str, current: &str) {
    for _ in 0..200 {
        {
            let table = controller.table.lock().unwrap();
            if table
                .cars()
                .iter()
                .any(|car| car.name == name && car.connected && car.current == floor(current))
            {
                return;
            }
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("car {} never reported floor {}", name, current);
}

#[test]
fn single_call_is_walked_through_pickup_and_dropoff() {
    let (addr, controller) = start_controller();

    let mut car = connect_car(addr, "A", "1", "10");
    report_status(&mut car, DoorStatus::Closed, "1", "1");
    wait_for_car_at(&controller, "A", "1");

    assert_eq!(place_call(addr, "3", "7"), Message::AssignedCar("A".to_string()));

    // the pickup floor is pushed immediately
    assert_eq!(message::recv_message(&mut car).unwrap(), Message::Floor(floor("3")));

    // arriving and opening at the pickup yields the drop-off target
    report_status(&mut car, DoorStatus::Between, "2", "3");
    report_status(&mut car, DoorStatus::Opening, "3", "3");
    assert_eq!(message::recv_message(&mut car).unwrap(), Message::Floor(floor("7")));
}

#[test]
fn nearest_car_wins_the_call() {
    let (addr, controller) = start_controller();

    let mut far = connect_car(addr, "A", "1", "10");
    report_status(&mut far, DoorStatus::Closed, "1", "1");
    let mut near = connect_car(addr, "B", "1", "10");
    report_status(&mut near, DoorStatus::Closed, "5", "5");
    wait_for_car_at(&controller, "A", "1");
    wait_for_car_at(&controller, "B", "5");

    assert_eq!(place_call(addr, "6", "8"), Message::AssignedCar("B".to_string()));
}

#[test]
fn calls_outside_every_range_are_unavailable() {
    let (addr, controller) = start_controller();

    let mut car = connect_car(addr, "A", "1", "5");
    report_status(&mut car, DoorStatus::Closed, "1", "1");
    wait_for_car_at(&controller, "A", "1");

    assert_eq!(place_call(addr, "2", "8"), Message::Unavailable);
}

#[test]
fn a_call_with_no_cars_is_unavailable() {
    let (addr, _controller) = start_controller();
    assert_eq!(place_call(addr, "3", "7"), Message::Unavailable);
}

#[test]
fn an_emergency_releases_the_car_from_dispatching() {
    let (addr, controller) = start_controller();

    let mut car = connect_car(addr, "A", "1", "10");
    report_status(&mut car, DoorStatus::Closed, "4", "4");
    wait_for_car_at(&controller, "A", "4");

    message::send_message(&mut car, &Message::Emergency).unwrap();
    for _ in 0..200 {
        {
            let table = controller.table.lock().unwrap();
            if !table.cars()[0].connected {
                break;
            }
        }
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(place_call(addr, "2", "3"), Message::Unavailable);
}

#[test]
fn a_reconnecting_car_starts_with_an_empty_queue() {
    let (addr, controller) = start_controller();

    let mut car = connect_car(addr, "A", "1", "10");
    report_status(&mut car, DoorStatus::Closed, "1", "1");
    wait_for_car_at(&controller, "A", "1");
    assert_eq!(place_call(addr, "3", "7"), Message::AssignedCar("A".to_string()));
    drop(car);

    let mut car = connect_car(addr, "A", "1", "10");
    report_status(&mut car, DoorStatus::Closed, "1", "1");
    wait_for_car_at(&controller, "A", "1");

    let table = controller.table.lock().unwrap();
    let record = table.cars().iter().find(|c| c.name == "A").unwrap();
    assert!(record.queue.is_empty());
}
