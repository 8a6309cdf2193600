/// ----- DISPATCH MODULE -----
/// The controller's view of the fleet: one record per car ever seen, each
/// with the floors it still has to visit. Records are created on first
/// registration, reused on reconnect (queue flushed) and never removed.
///
/// Queues are kept in SCAN order: a car serves every stop in its current
/// sweep direction before reversing. Insertion decides sweep membership
/// from the car's effective position; a floor the car has already passed,
/// or that sits below an already-queued stop of the running sweep, waits
/// for the next sweep at the tail.
use std::collections::VecDeque;
use std::net::TcpStream;

use shared_resources::floor::Floor;
use shared_resources::message::{self, Message};
use shared_resources::shared_state::DoorStatus;

pub struct CarRecord {
    pub name: String,
    pub lowest: Floor,
    pub highest: Floor,
    pub current: Floor,
    pub destination: Floor,
    pub status: DoorStatus,
    pub connected: bool,
    pub stream: Option<TcpStream>,
    pub queue: VecDeque<Floor>,
    generation: u64,
}

/// Names one registration of a car. The id outlives reconnections, the
/// generation does not, so a stale reader thread can tell that the record
/// has been handed to a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarHandle {
    pub id: usize,
    pub generation: u64,
}

#[derive(Default)]
pub struct CarTable {
    cars: Vec<CarRecord>,
}

impl CarTable {
    pub fn new() -> Self {
        CarTable::default()
    }

    /// Register a car, reusing the record of a previous connection with the
    /// same name. The pending queue does not survive reconnection.
    pub fn register(
        &mut self,
        name: &str,
        lowest: Floor,
        highest: Floor,
        stream: Option<TcpStream>,
    ) -> CarHandle {
        let id = match self.cars.iter().position(|car| car.name == name) {
            Some(id) => {
                let car = &mut self.cars[id];
                car.lowest = lowest;
                car.highest = highest;
                car.current = lowest;
                car.destination = lowest;
                car.status = DoorStatus::Closed;
                car.connected = true;
                car.stream = stream;
                car.queue.clear();
                car.generation += 1;
                id
            }
            None => {
                self.cars.push(CarRecord {
                    name: name.to_string(),
                    lowest,
                    highest,
                    current: lowest,
                    destination: lowest,
                    status: DoorStatus::Closed,
                    connected: true,
                    stream,
                    queue: VecDeque::new(),
                    generation: 0,
                });
                self.cars.len() - 1
            }
        };
        CarHandle {
            id,
            generation: self.cars[id].generation,
        }
    }

    pub fn car(&self, id: usize) -> &CarRecord {
        &self.cars[id]
    }

    pub fn cars(&self) -> &[CarRecord] {
        &self.cars
    }

    fn current_record(&mut self, handle: CarHandle) -> Option<&mut CarRecord> {
        let car = self.cars.get_mut(handle.id)?;
        (car.generation == handle.generation).then_some(car)
    }

    /// Drop the car from dispatching and forget its pending floors. A no-op
    /// when the handle belongs to a superseded connection.
    pub fn disconnect(&mut self, handle: CarHandle) {
        if let Some(car) = self.current_record(handle) {
            car.connected = false;
            car.stream = None;
            car.queue.clear();
        }
    }

    /// Fold a STATUS report into the record. When the car is opening its
    /// doors at the head of its queue that stop is done; the next pending
    /// floor, if any, is returned for pushing to the car.
    pub fn update_status(
        &mut self,
        handle: CarHandle,
        status: DoorStatus,
        current: Floor,
        destination: Floor,
    ) -> Option<Floor> {
        let car = self.current_record(handle)?;
        car.status = status;
        car.current = current;
        car.destination = destination;

        if status == DoorStatus::Opening && car.queue.front() == Some(&current) {
            car.queue.pop_front();
            return car.queue.front().copied();
        }
        None
    }

    /// The connected car that can serve both floors with the lowest ETA;
    /// ties go to the lexicographically smaller name.
    pub fn select_car(&self, source: Floor, destination: Floor) -> Option<usize> {
        self.cars
            .iter()
            .enumerate()
            .filter(|(_, car)| {
                car.connected
                    && source.is_within(car.lowest, car.highest)
                    && destination.is_within(car.lowest, car.highest)
            })
            .min_by(|(_, a), (_, b)| {
                eta(a, source)
                    .cmp(&eta(b, source))
                    .then_with(|| a.name.cmp(&b.name))
            })
            .map(|(id, _)| id)
    }

    /// Queue the pickup and drop-off floors of an accepted call. Returns
    /// the new queue head when the insertions changed it, meaning the car
    /// needs a fresh FLOOR target.
    pub fn assign_call(&mut self, id: usize, source: Floor, destination: Floor) -> Option<Floor> {
        let car = &mut self.cars[id];
        let old_head = car.queue.front().copied();

        for floor in [source, destination] {
            let position = effective_position(car);
            let going_up = sweep_direction(car, floor);
            scan_insert(&mut car.queue, position, going_up, floor);
        }

        let new_head = car.queue.front().copied();
        if new_head != old_head {
            new_head
        } else {
            None
        }
    }

    /// Push a FLOOR target over the car's connection. Write failures are
    /// logged and left for the reader thread to notice.
    pub fn send_floor(&mut self, id: usize, floor: Floor) {
        let car = &mut self.cars[id];
        if let Some(stream) = car.stream.as_mut() {
            if let Err(e) = message::send_message(stream, &Message::Floor(floor)) {
                log::warn!("failed to push FLOOR {} to car {}: {}", floor, car.name, e);
            }
        }
    }
}

/// Where the car effectively is for scheduling: one numeric step ahead of
/// `current` while it is committed to moving (Closing or Between with a
/// different destination). The value may be the empty slot between B1 and
/// 1; it is a position on the shaft, not a floor.
pub fn effective_position(car: &CarRecord) -> i32 {
    if matches!(car.status, DoorStatus::Closing | DoorStatus::Between) && car.current != car.destination
    {
        let direction = if car.destination > car.current { 1 } else { -1 };
        car.current.numeric() + direction
    } else {
        car.current.numeric()
    }
}

/// Distance to `target` plus one per already-queued stop.
pub fn eta(car: &CarRecord, target: Floor) -> i32 {
    (target.numeric() - effective_position(car)).abs() + car.queue.len() as i32
}

/// Current sweep direction: from the motion in progress, else from the
/// queued head, else from where the new floor lies.
fn sweep_direction(car: &CarRecord, new_floor: Floor) -> bool {
    if car.current != car.destination {
        car.destination > car.current
    } else if let Some(&head) = car.queue.front() {
        head > car.current
    } else {
        new_floor > car.current
    }
}

/// SCAN insertion. Duplicates are dropped. A floor in the running sweep
/// extends the sweep's queue prefix unless a queued stop of that sweep
/// already lies beyond it, in which case the car is treated as committed
/// past it and the floor joins the next sweep at the tail; floors behind
/// the effective position always go to the tail.
pub fn scan_insert(queue: &mut VecDeque<Floor>, position: i32, going_up: bool, floor: Floor) {
    if queue.contains(&floor) {
        return;
    }
    if queue.is_empty() {
        queue.push_back(floor);
        return;
    }

    let numeric = floor.numeric();
    let in_sweep = |n: i32| {
        if going_up {
            n > position
        } else {
            n < position
        }
    };

    if !in_sweep(numeric) {
        queue.push_back(floor);
        return;
    }

    let overtaken = queue.iter().any(|&queued| {
        let q = queued.numeric();
        in_sweep(q) && if going_up { numeric < q } else { numeric > q }
    });
    if overtaken {
        queue.push_back(floor);
        return;
    }

    let index = queue
        .iter()
        .position(|&queued| !in_sweep(queued.numeric()))
        .unwrap_or(queue.len());
    queue.insert(index, floor);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor(label: &str) -> Floor {
        label.parse().unwrap()
    }

    fn queue_of(labels: &[&str]) -> VecDeque<Floor> {
        labels.iter().map(|label| floor(label)).collect()
    }

    fn test_car(name: &str, lowest: &str, highest: &str, current: &str) -> CarRecord {
        CarRecord {
            name: name.to_string(),
            lowest: floor(lowest),
            highest: floor(highest),
            current: floor(current),
            destination: floor(current),
            status: DoorStatus::Closed,
            connected: true,
            stream: None,
            queue: VecDeque::new(),
            generation: 0,
        }
    }

    #[test]
    fn scan_keeps_the_running_sweep_in_order() {
        let mut queue = queue_of(&["5"]);
        scan_insert(&mut queue, 2, true, floor("8"));
        scan_insert(&mut queue, 2, true, floor("6"));
        // 8 extends the up sweep behind 5; 6 is below the queued 8, so it
        // waits for the next sweep
        assert_eq!(queue, queue_of(&["5", "8", "6"]));
    }

    #[test]
    fn scan_sends_passed_floors_to_the_tail() {
        let mut queue = queue_of(&["10"]);
        scan_insert(&mut queue, 4, true, floor("2"));
        assert_eq!(queue, queue_of(&["10", "2"]));
    }

    #[test]
    fn scan_matches_the_moving_car_scenario() {
        // car at 1 heading for 10: pickups 4 then 3 both yield to the
        // queued 10 and join the down sweep in arrival order
        let mut queue = queue_of(&["10"]);
        scan_insert(&mut queue, 2, true, floor("4"));
        scan_insert(&mut queue, 2, true, floor("3"));
        assert_eq!(queue, queue_of(&["10", "4", "3"]));
    }

    #[test]
    fn scan_is_symmetric_going_down() {
        let mut queue = queue_of(&["3"]);
        scan_insert(&mut queue, 8, false, floor("B1"));
        scan_insert(&mut queue, 8, false, floor("5"));
        assert_eq!(queue, queue_of(&["3", "B1", "5"]));

        // 4 sits above the queued 3, so it waits for the next sweep
        let mut queue = queue_of(&["3", "9"]);
        scan_insert(&mut queue, 8, false, floor("4"));
        assert_eq!(queue, queue_of(&["3", "9", "4"]));
    }

    #[test]
    fn scan_never_duplicates_a_floor() {
        let mut queue = queue_of(&["5", "8"]);
        scan_insert(&mut queue, 2, true, floor("8"));
        scan_insert(&mut queue, 2, true, floor("5"));
        assert_eq!(queue, queue_of(&["5", "8"]));
    }

    #[test]
    fn effective_position_leads_a_committed_car() {
        let mut car = test_car("A", "1", "10", "4");
        car.destination = floor("8");
        car.status = DoorStatus::Between;
        assert_eq!(effective_position(&car), 5);

        car.status = DoorStatus::Closing;
        assert_eq!(effective_position(&car), 5);

        car.status = DoorStatus::Open;
        assert_eq!(effective_position(&car), 4);

        car.destination = floor("4");
        car.status = DoorStatus::Between;
        assert_eq!(effective_position(&car), 4);
    }

    #[test]
    fn effective_position_may_sit_between_b1_and_1() {
        let mut car = test_car("A", "B2", "5", "B1");
        car.destination = floor("2");
        car.status = DoorStatus::Between;
        assert_eq!(effective_position(&car), 0);
    }

    #[test]
    fn eta_adds_queue_length_to_distance() {
        let mut car = test_car("A", "1", "10", "5");
        assert_eq!(eta(&car, floor("6")), 1);
        car.queue = queue_of(&["8", "2"]);
        assert_eq!(eta(&car, floor("6")), 3);
    }

    #[test]
    fn selection_prefers_the_lowest_eta() {
        let mut table = CarTable::new();
        table.register("A", floor("1"), floor("10"), None);
        table.register("B", floor("1"), floor("10"), None);
        table.cars[1].current = floor("5");
        table.cars[1].destination = floor("5");

        let best = table.select_car(floor("6"), floor("8")).unwrap();
        assert_eq!(table.car(best).name, "B");
    }

    #[test]
    fn selection_breaks_ties_by_name() {
        let mut table = CarTable::new();
        table.register("Beta", floor("1"), floor("10"), None);
        table.register("Alpha", floor("1"), floor("10"), None);

        let best = table.select_car(floor("3"), floor("7")).unwrap();
        assert_eq!(table.car(best).name, "Alpha");
    }

    #[test]
    fn selection_skips_out_of_range_and_disconnected_cars() {
        let mut table = CarTable::new();
        table.register("A", floor("1"), floor("5"), None);
        let b = table.register("B", floor("1"), floor("10"), None);

        // A is first in name order but cannot serve floor 8
        assert_eq!(table.select_car(floor("2"), floor("8")), Some(b.id));

        table.disconnect(b);
        assert_eq!(table.select_car(floor("2"), floor("8")), None);
    }

    #[test]
    fn assign_call_reports_a_changed_head() {
        let mut table = CarTable::new();
        let handle = table.register("A", floor("1"), floor("10"), None);

        // empty queue: the pickup becomes the head
        assert_eq!(
            table.assign_call(handle.id, floor("3"), floor("7")),
            Some(floor("3"))
        );
        assert_eq!(table.car(handle.id).queue, queue_of(&["3", "7"]));

        // nothing moved to the front this time
        assert_eq!(table.assign_call(handle.id, floor("4"), floor("7")), None);
        assert_eq!(table.car(handle.id).queue, queue_of(&["3", "4", "7"]));
    }

    #[test]
    fn opening_at_the_head_pops_and_yields_the_next_stop() {
        let mut table = CarTable::new();
        let handle = table.register("A", floor("1"), floor("10"), None);
        table.assign_call(handle.id, floor("3"), floor("7"));

        let next = table.update_status(handle, DoorStatus::Opening, floor("3"), floor("3"));
        assert_eq!(next, Some(floor("7")));
        assert_eq!(table.car(handle.id).queue, queue_of(&["7"]));

        // opening anywhere else leaves the queue alone
        let next = table.update_status(handle, DoorStatus::Opening, floor("5"), floor("5"));
        assert_eq!(next, None);
        assert_eq!(table.car(handle.id).queue, queue_of(&["7"]));
    }

    #[test]
    fn reconnection_flushes_the_queue_and_fences_old_handles() {
        let mut table = CarTable::new();
        let old = table.register("A", floor("1"), floor("10"), None);
        table.assign_call(old.id, floor("3"), floor("7"));

        let new = table.register("A", floor("1"), floor("10"), None);
        assert_eq!(new.id, old.id);
        assert_ne!(new.generation, old.generation);
        assert!(table.car(new.id).queue.is_empty());

        // the superseded reader can no longer disconnect the car
        table.disconnect(old);
        assert!(table.car(new.id).connected);

        table.disconnect(new);
        assert!(!table.car(new.id).connected);
    }
}
