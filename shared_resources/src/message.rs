/// ----- MESSAGE MODULE -----
/// Wire protocol between the controller, the cars and the one-shot call
/// clients. Every frame is a 2-byte big-endian length followed by that many
/// bytes of ASCII text, no terminator. The payload grammar:
///
///   CAR <name> <lowest> <highest>   car registration (first frame)
///   STATUS <status> <cur> <dest>    car -> controller
///   EMERGENCY                       car -> controller
///   INDIVIDUAL SERVICE              car -> controller
///   FLOOR <target>                  controller -> car
///   CALL <source> <destination>     call client -> controller
///   CAR <name>                      controller -> call client
///   UNAVAILABLE                     controller -> call client
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::floor::Floor;
use crate::shared_state::DoorStatus;

pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Car {
        name: String,
        lowest: Floor,
        highest: Floor,
    },
    Status {
        status: DoorStatus,
        current: Floor,
        destination: Floor,
    },
    Emergency,
    IndividualService,
    Floor(Floor),
    Call {
        source: Floor,
        destination: Floor,
    },
    AssignedCar(String),
    Unavailable,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Car {
                name,
                lowest,
                highest,
            } => write!(f, "CAR {} {} {}", name, lowest, highest),
            Message::Status {
                status,
                current,
                destination,
            } => write!(f, "STATUS {} {} {}", status, current, destination),
            Message::Emergency => write!(f, "EMERGENCY"),
            Message::IndividualService => write!(f, "INDIVIDUAL SERVICE"),
            Message::Floor(floor) => write!(f, "FLOOR {}", floor),
            Message::Call {
                source,
                destination,
            } => write!(f, "CALL {} {}", source, destination),
            Message::AssignedCar(name) => write!(f, "CAR {}", name),
            Message::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError::BadMessage(s.to_string());
        let tokens: Vec<&str> = s.split(' ').collect();

        let message = match tokens.as_slice() {
            ["CAR", name] => Message::AssignedCar(name.to_string()),
            ["CAR", name, lowest, highest] => Message::Car {
                name: name.to_string(),
                lowest: lowest.parse().map_err(|_| bad())?,
                highest: highest.parse().map_err(|_| bad())?,
            },
            ["STATUS", status, current, destination] => Message::Status {
                status: status.parse().map_err(|_| bad())?,
                current: current.parse().map_err(|_| bad())?,
                destination: destination.parse().map_err(|_| bad())?,
            },
            ["EMERGENCY"] => Message::Emergency,
            ["INDIVIDUAL", "SERVICE"] => Message::IndividualService,
            ["FLOOR", floor] => Message::Floor(floor.parse().map_err(|_| bad())?),
            ["CALL", source, destination] => Message::Call {
                source: source.parse().map_err(|_| bad())?,
                destination: destination.parse().map_err(|_| bad())?,
            },
            ["UNAVAILABLE"] => Message::Unavailable,
            _ => return Err(bad()),
        };
        Ok(message)
    }
}

/// Write one length-prefixed frame. write_all already retries interrupted
/// writes, so a successful return means the whole frame went out.
pub fn write_frame<W: Write>(writer: &mut W, payload: &str) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::TooLong);
    }
    writer.write_all(&(payload.len() as u16).to_be_bytes())?;
    writer.write_all(payload.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame, blocking until it is complete.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let mut payload = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    reader.read_exact(&mut payload)?;
    String::from_utf8(payload).map_err(|e| ProtocolError::BadMessage(format!("{:?}", e.as_bytes())))
}

pub fn send_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), ProtocolError> {
    write_frame(writer, &message.to_string())
}

pub fn recv_message<R: Read>(reader: &mut R) -> Result<Message, ProtocolError> {
    read_frame(reader)?.parse()
}

/// Poll for one inbound message without committing to block: returns None
/// when no frame starts within `timeout`. Once the first byte of a frame
/// has arrived the rest is read to completion, waiting across timeouts, so
/// a slow peer cannot leave the stream desynchronised.
pub fn poll_message(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<Option<Message>, ProtocolError> {
    stream.set_read_timeout(Some(timeout))?;

    let mut len_buf = [0u8; 2];
    if read_full(stream, &mut len_buf, true)?.is_none() {
        return Ok(None);
    }
    let mut payload = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    read_full(stream, &mut payload, false)?;

    let text = String::from_utf8(payload)
        .map_err(|e| ProtocolError::BadMessage(format!("{:?}", e.as_bytes())))?;
    text.parse().map(Some)
}

/// Fill `buf`, retrying interrupted and timed-out reads. With `bail_if_idle`
/// a timeout before the first byte returns None instead of waiting on.
fn read_full(
    stream: &mut TcpStream,
    buf: &mut [u8],
    bail_if_idle: bool,
) -> Result<Option<()>, ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                if bail_if_idle && filled == 0 {
                    return Ok(None);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(()))
}
