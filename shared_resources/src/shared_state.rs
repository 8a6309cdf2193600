/// ----- SHARED STATE MODULE -----
/// Per-car state record placed in a named POSIX shared memory object so the
/// car process, the safety monitor and the one-shot button clients all see
/// the same fields. The record starts with a process-shared pthread mutex
/// and condition variable; every writer holds the mutex and broadcasts the
/// condvar after changing anything.
///
/// Floors are stored as NUL-terminated ASCII labels and the door status as
/// a raw u8 discriminant. Readers go through the typed accessors, which
/// return None on corrupt bytes instead of trusting them; the safety
/// monitor validates the raw fields directly.
use std::ffi::CString;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FloorError, ShmError};
use crate::floor::Floor;

pub const MAX_FLOOR_LEN: usize = 4;
pub const MAX_CAR_NAME_LEN: usize = 31;

const SHM_PREFIX: &str = "/car";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoorStatus {
    Opening = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
    Between = 4,
}

impl DoorStatus {
    pub const ALL: [DoorStatus; 5] = [
        DoorStatus::Opening,
        DoorStatus::Open,
        DoorStatus::Closing,
        DoorStatus::Closed,
        DoorStatus::Between,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DoorStatus::Opening => "Opening",
            DoorStatus::Open => "Open",
            DoorStatus::Closing => "Closing",
            DoorStatus::Closed => "Closed",
            DoorStatus::Between => "Between",
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        DoorStatus::ALL.get(raw as usize).copied()
    }
}

impl fmt::Display for DoorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoorStatus {
    type Err = FloorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DoorStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or(FloorError::BadLabel)
    }
}

/// The plain-data portion of the record. Field layout is part of the
/// cross-process contract, hence repr(C) and raw integer fields.
#[repr(C)]
pub struct CarState {
    pub current_floor: [u8; MAX_FLOOR_LEN],
    pub destination_floor: [u8; MAX_FLOOR_LEN],
    pub status: u8,
    pub open_button: u8,
    pub close_button: u8,
    pub safety_system: u8,
    pub door_obstruction: u8,
    pub overload: u8,
    pub emergency_stop: u8,
    pub individual_service_mode: u8,
    pub emergency_mode: u8,
}

impl CarState {
    pub fn status(&self) -> Option<DoorStatus> {
        DoorStatus::from_raw(self.status)
    }

    pub fn set_status(&mut self, status: DoorStatus) {
        self.status = status as u8;
    }

    pub fn current_floor(&self) -> Option<Floor> {
        parse_label(&self.current_floor)
    }

    pub fn set_current_floor(&mut self, floor: Floor) {
        write_label(&mut self.current_floor, floor);
    }

    pub fn destination_floor(&self) -> Option<Floor> {
        parse_label(&self.destination_floor)
    }

    pub fn set_destination_floor(&mut self, floor: Floor) {
        write_label(&mut self.destination_floor, floor);
    }

    pub fn at_destination(&self) -> bool {
        self.current_floor == self.destination_floor
    }
}

/// Label bytes up to the first NUL, if there is one and it is valid UTF-8.
pub fn label_str(buf: &[u8; MAX_FLOOR_LEN]) -> Option<&str> {
    let end = buf.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&buf[..end]).ok()
}

pub fn parse_label(buf: &[u8; MAX_FLOOR_LEN]) -> Option<Floor> {
    label_str(buf)?.parse().ok()
}

fn write_label(buf: &mut [u8; MAX_FLOOR_LEN], floor: Floor) {
    let label = floor.to_string();
    buf.fill(0);
    buf[..label.len()].copy_from_slice(label.as_bytes());
}

#[repr(C)]
struct SharedBlock {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    state: CarState,
}

/// Mapping of one car's shared record. Cloneable across threads of the same
/// process by reference; the mapping itself is released on drop, the name
/// only by an explicit unlink.
pub struct SharedState {
    block: NonNull<SharedBlock>,
    shm_name: String,
}

unsafe impl Send for SharedState {}
unsafe impl Sync for SharedState {}

pub fn shm_name(car_name: &str) -> String {
    format!("{}{}", SHM_PREFIX, car_name)
}

impl SharedState {
    /// Create and initialise the record for a new car. Both floors start at
    /// `lowest`, the doors closed, every flag and the heartbeat at zero.
    pub fn create(car_name: &str, lowest: Floor) -> Result<Self, ShmError> {
        let name = shm_name(car_name);
        let c_name = cstring(&name)?;

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o666 as libc::mode_t,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Err(ShmError::AlreadyExists(name));
            }
            return Err(ShmError::Open(err));
        }

        if unsafe { libc::ftruncate(fd, mem::size_of::<SharedBlock>() as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ShmError::Resize(err));
        }

        let block = match map_block(fd) {
            Ok(block) => block,
            Err(err) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe { init_sync(block.as_ptr()) } {
            unsafe {
                libc::munmap(block.as_ptr().cast(), mem::size_of::<SharedBlock>());
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ShmError::SyncInit(err));
        }

        let shared = SharedState {
            block,
            shm_name: name,
        };
        {
            let mut guard = shared.lock();
            guard.set_current_floor(lowest);
            guard.set_destination_floor(lowest);
            guard.set_status(DoorStatus::Closed);
            guard.open_button = 0;
            guard.close_button = 0;
            guard.safety_system = 0;
            guard.door_obstruction = 0;
            guard.overload = 0;
            guard.emergency_stop = 0;
            guard.individual_service_mode = 0;
            guard.emergency_mode = 0;
        }
        Ok(shared)
    }

    /// Map an existing car's record.
    pub fn open(car_name: &str) -> Result<Self, ShmError> {
        let name = shm_name(car_name);
        let c_name = cstring(&name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666 as libc::mode_t) };
        if fd < 0 {
            return Err(ShmError::NotFound(name));
        }

        let block = map_block(fd)?;
        Ok(SharedState {
            block,
            shm_name: name,
        })
    }

    /// Remove the shared memory name. Existing mappings stay valid.
    pub fn unlink(car_name: &str) {
        if let Ok(c_name) = cstring(&shm_name(car_name)) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    pub fn lock(&self) -> StateGuard<'_> {
        unsafe { libc::pthread_mutex_lock(ptr::addr_of_mut!((*self.block.as_ptr()).mutex)) };
        StateGuard {
            shared: self,
            _not_send: PhantomData,
        }
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.block.as_ptr().cast(), mem::size_of::<SharedBlock>());
        }
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("shm_name", &self.shm_name)
            .finish()
    }
}

/// Holds the record's process-shared mutex for its lifetime. Not Send: the
/// pthread mutex must be released by the thread that acquired it.
pub struct StateGuard<'a> {
    shared: &'a SharedState,
    _not_send: PhantomData<*mut ()>,
}

impl StateGuard<'_> {
    /// Wait for a broadcast or the timeout, whichever comes first. The
    /// mutex is released while waiting and reacquired before returning, so
    /// callers must re-read any field they had inspected.
    pub fn wait_timeout(&mut self, timeout: Duration) {
        let block = self.shared.block.as_ptr();
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += timeout.subsec_nanos() as libc::c_long;
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }
        unsafe {
            libc::pthread_cond_timedwait(
                ptr::addr_of_mut!((*block).cond),
                ptr::addr_of_mut!((*block).mutex),
                &ts,
            );
        }
    }

    /// Wake every process blocked on the condvar.
    pub fn notify_all(&mut self) {
        unsafe {
            libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.shared.block.as_ptr()).cond));
        }
    }
}

impl Deref for StateGuard<'_> {
    type Target = CarState;

    fn deref(&self) -> &CarState {
        unsafe { &(*self.shared.block.as_ptr()).state }
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut CarState {
        unsafe { &mut (*self.shared.block.as_ptr()).state }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(ptr::addr_of_mut!((*self.shared.block.as_ptr()).mutex));
        }
    }
}

fn cstring(name: &str) -> Result<CString, ShmError> {
    CString::new(name).map_err(|_| ShmError::NotFound(name.to_string()))
}

fn map_block(fd: libc::c_int) -> Result<NonNull<SharedBlock>, ShmError> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            mem::size_of::<SharedBlock>(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    let err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    if ptr == libc::MAP_FAILED {
        return Err(ShmError::Map(err));
    }
    Ok(NonNull::new(ptr.cast()).expect("mmap returned a non-null mapping"))
}

/// Initialise the mutex and condvar with process-shared attributes; the
/// condvar is bound to CLOCK_MONOTONIC so timed waits survive wall-clock
/// adjustments.
unsafe fn init_sync(block: *mut SharedBlock) -> io::Result<()> {
    let mut mutex_attr: libc::pthread_mutexattr_t = mem::zeroed();
    check(libc::pthread_mutexattr_init(&mut mutex_attr))?;
    check(libc::pthread_mutexattr_setpshared(
        &mut mutex_attr,
        libc::PTHREAD_PROCESS_SHARED,
    ))?;
    let result = check(libc::pthread_mutex_init(
        ptr::addr_of_mut!((*block).mutex),
        &mutex_attr,
    ));
    libc::pthread_mutexattr_destroy(&mut mutex_attr);
    result?;

    let mut cond_attr: libc::pthread_condattr_t = mem::zeroed();
    check(libc::pthread_condattr_init(&mut cond_attr))?;
    check(libc::pthread_condattr_setpshared(
        &mut cond_attr,
        libc::PTHREAD_PROCESS_SHARED,
    ))?;
    check(libc::pthread_condattr_setclock(
        &mut cond_attr,
        libc::CLOCK_MONOTONIC,
    ))?;
    let result = check(libc::pthread_cond_init(
        ptr::addr_of_mut!((*block).cond),
        &cond_attr,
    ));
    libc::pthread_condattr_destroy(&mut cond_attr);
    result
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(ret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn floor(label: &str) -> Floor {
        label.parse().unwrap()
    }

    fn unique_name(tag: &str) -> String {
        format!("shmtest{}{}", tag, std::process::id())
    }

    #[test]
    fn create_initialises_the_record() {
        let name = unique_name("init");
        let shared = SharedState::create(&name, floor("B2")).unwrap();

        let guard = shared.lock();
        assert_eq!(guard.current_floor(), Some(floor("B2")));
        assert_eq!(guard.destination_floor(), Some(floor("B2")));
        assert_eq!(guard.status(), Some(DoorStatus::Closed));
        assert_eq!(guard.safety_system, 0);
        assert_eq!(guard.emergency_mode, 0);
        drop(guard);

        SharedState::unlink(&name);
    }

    #[test]
    fn create_refuses_an_existing_name() {
        let name = unique_name("dup");
        let _shared = SharedState::create(&name, floor("1")).unwrap();
        assert!(matches!(
            SharedState::create(&name, floor("1")),
            Err(ShmError::AlreadyExists(_))
        ));
        SharedState::unlink(&name);
    }

    #[test]
    fn open_sees_writes_from_the_creator() {
        let name = unique_name("rw");
        let creator = SharedState::create(&name, floor("1")).unwrap();
        let observer = SharedState::open(&name).unwrap();

        {
            let mut guard = creator.lock();
            guard.set_status(DoorStatus::Opening);
            guard.open_button = 1;
            guard.notify_all();
        }
        {
            let guard = observer.lock();
            assert_eq!(guard.status(), Some(DoorStatus::Opening));
            assert_eq!(guard.open_button, 1);
        }

        SharedState::unlink(&name);
    }

    #[test]
    fn open_fails_for_a_missing_name() {
        assert!(matches!(
            SharedState::open(&unique_name("missing")),
            Err(ShmError::NotFound(_))
        ));
    }

    #[test]
    fn wait_timeout_returns_after_the_deadline() {
        let name = unique_name("wait");
        let shared = SharedState::create(&name, floor("1")).unwrap();

        let start = Instant::now();
        shared.lock().wait_timeout(Duration::from_millis(50));
        assert!(start.elapsed() >= Duration::from_millis(45));

        SharedState::unlink(&name);
    }

    #[test]
    fn corrupt_bytes_parse_to_none() {
        let name = unique_name("corrupt");
        let shared = SharedState::create(&name, floor("1")).unwrap();

        {
            let mut guard = shared.lock();
            guard.status = 99;
            guard.current_floor = *b"XX\0\0";
            assert_eq!(guard.status(), None);
            assert_eq!(guard.current_floor(), None);
        }

        SharedState::unlink(&name);
    }
}
