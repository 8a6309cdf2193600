/// ----- DISPLAY MODULE -----
/// Optional live table of the fleet, redrawn in place whenever a handler
/// publishes fresh snapshots. Off by default so stdout carries only the
/// startup line.
use std::io::{stdout, Stdout, Write};

use crossbeam_channel::Receiver;
use crossterm::{cursor, terminal, ExecutableCommand, Result};

use shared_resources::floor::Floor;
use shared_resources::shared_state::DoorStatus;

use crate::dispatch::CarRecord;

#[derive(Debug, Clone)]
pub struct CarSnapshot {
    pub name: String,
    pub status: DoorStatus,
    pub current: Floor,
    pub destination: Floor,
    pub connected: bool,
    pub queue: Vec<Floor>,
}

impl CarSnapshot {
    pub fn from_record(record: &CarRecord) -> Self {
        CarSnapshot {
            name: record.name.clone(),
            status: record.status,
            current: record.current,
            destination: record.destination,
            connected: record.connected,
            queue: record.queue.iter().copied().collect(),
        }
    }
}

pub fn main(snapshots_rx: Receiver<Vec<CarSnapshot>>) -> Result<()> {
    let mut stdout = stdout();
    for snapshots in snapshots_rx.iter() {
        printstatus(&mut stdout, &snapshots)?;
    }
    Ok(())
}

fn printstatus(stdout: &mut Stdout, snapshots: &[CarSnapshot]) -> Result<()> {
    stdout.execute(terminal::Clear(terminal::ClearType::FromCursorDown))?;

    writeln!(stdout, "+-----------------+----------+-------+-------+------------------------+")?;
    writeln!(
        stdout,
        "| {0:<15} | {1:<8} | {2:<5} | {3:<5} | {4:<22} |",
        "CAR", "STATUS", "FLOOR", "DEST", "QUEUE"
    )?;
    writeln!(stdout, "+-----------------+----------+-------+-------+------------------------+")?;
    for snapshot in snapshots {
        let queue = snapshot
            .queue
            .iter()
            .map(|floor| floor.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let status = if snapshot.connected {
            snapshot.status.as_str().to_string()
        } else {
            "offline".to_string()
        };
        writeln!(
            stdout,
            "| {0:<15} | {1:<8} | {2:<5} | {3:<5} | {4:<22} |",
            snapshot.name,
            status,
            snapshot.current.to_string(),
            snapshot.destination.to_string(),
            queue
        )?;
    }
    writeln!(stdout, "+-----------------+----------+-------+-------+------------------------+")?;

    stdout.execute(cursor::MoveUp(4 + snapshots.len() as u16))?;
    Ok(())
}
