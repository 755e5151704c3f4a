//! External paste helper — probe, then hand off delivery.
//!
//! The helper is invoked as `PROG test REQUESTOR_HEX PAYLOAD`; exit
//! status 0 means it wants the paste, and `PROG paste` with the same
//! arguments performs it. Any other outcome leaves delivery to the
//! normal X send path. The payload is passed verbatim as one argv
//! element.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::process::Command;

use x11rb::protocol::xproto::Window;

/// A user-supplied helper program.
#[derive(Debug, Clone)]
pub struct HelperProgram {
    program: String,
}

impl HelperProgram {
    pub fn new(program: String) -> Self {
        Self { program }
    }

    /// Probe the helper and, when it accepts, let it deliver the
    /// payload. Returns whether delivery was handed off.
    pub fn try_paste(&self, requestor: Window, payload: &[u8]) -> bool {
        let requestor = format!("0x{requestor:x}");
        let payload = OsStr::from_bytes(payload);

        match Command::new(&self.program)
            .arg("test")
            .arg(&requestor)
            .arg(payload)
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "helper probe failed");
                return false;
            }
        }

        match Command::new(&self.program)
            .arg("paste")
            .arg(&requestor)
            .arg(payload)
            .status()
        {
            Ok(status) if status.success() => {
                tracing::debug!(program = %self.program, "helper delivered payload");
                true
            }
            Ok(status) => {
                tracing::warn!(program = %self.program, %status, "helper paste failed");
                // The probe accepted; the requestor still must not
                // receive a second copy over X.
                true
            }
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "helper paste failed");
                true
            }
        }
    }
}
