use std::io;

use crate::Error;

/// Returns the number of online logical cores.
pub fn discover_cores() -> Result<usize, Error> {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 0 {
        return Err(Error::CoreDiscovery(io::Error::last_os_error()));
    }
    if n == 0 {
        return Err(Error::CoreDiscovery(io::Error::new(
            io::ErrorKind::Other,
            "sysconf reported zero online cores",
        )));
    }
    Ok(n as usize)
}
