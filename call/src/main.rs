use std::env;
use std::net::TcpStream;
use std::process;

use shared_resources::config::SystemConfig;
use shared_resources::error::ProtocolError;
use shared_resources::floor::Floor;
use shared_resources::message::{self, Message};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!(
            "Usage: {} <source> <destination>",
            args.first().map(String::as_str).unwrap_or("call")
        );
        process::exit(1);
    }

    let (source, destination): (Floor, Floor) = match (args[1].parse(), args[2].parse()) {
        (Ok(source), Ok(destination)) => (source, destination),
        _ => {
            println!("Invalid floor(s) specified.");
            process::exit(1);
        }
    };

    if source == destination {
        println!("You are already on that floor!");
        process::exit(1);
    }

    let config = SystemConfig::get();
    match request_car(&config.controller_address, source, destination) {
        Ok(Some(name)) => println!("Car {} is arriving.", name),
        Ok(None) => println!("Sorry, no car is available to take this request."),
        Err(_) => {
            println!("Unable to connect to elevator system.");
            process::exit(1);
        }
    }
}

fn request_car(
    address: &str,
    source: Floor,
    destination: Floor,
) -> Result<Option<String>, ProtocolError> {
    let mut stream = TcpStream::connect(address)?;
    message::send_message(
        &mut stream,
        &Message::Call {
            source,
            destination,
        },
    )?;
    match message::recv_message(&mut stream)? {
        Message::AssignedCar(name) => Ok(Some(name)),
        _ => Ok(None),
    }
}
