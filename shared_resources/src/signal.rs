/// ----- SIGNAL MODULE -----
/// SIGINT handling shared by the long-running binaries. The handler only
/// stores to an atomic flag; every loop in the system is bounded by a timed
/// wait and checks the flag, and all cleanup happens cooperatively after
/// the loops unwind. SIGPIPE is ignored so broken connections surface as
/// write errors instead of killing the process.
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn flag_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT to the shutdown flag and ignore SIGPIPE.
pub fn install_handlers() -> io::Result<()> {
    let handler: extern "C" fn(libc::c_int) = flag_shutdown;
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGINT, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ignore: libc::sigaction = mem::zeroed();
        ignore.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut ignore.sa_mask);
        if libc::sigaction(libc::SIGPIPE, &ignore, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// The flag itself, for loops that take it as a parameter so tests can
/// drive them with a local one.
pub fn shutdown_flag() -> &'static AtomicBool {
    &SHUTDOWN
}
