//! Reference benchmark module. Each iteration sleeps for one second and does
//! no other work, which makes the expected wallclock delta known.

use std::os::raw::c_int;
use std::thread;
use std::time::Duration;

#[no_mangle]
pub extern "C" fn run_iter(_param: c_int) {
    thread::sleep(Duration::from_secs(1));
}
