//! Single-instance enforcement via window-name sentinels.
//!
//! Every instance names its top window after its mode; a startup scan
//! of the root's children tells whether another instance is already
//! serving the display.

use super::{X11Error, XConn};

/// Sentinel carried by an interactive instance's window.
pub const SENTINEL: &str = "multiselect";
/// Sentinel carried by a daemon instance's window.
pub const SENTINEL_DAEMON: &str = "multiselectd";

/// What the startup scan found on this display.
#[derive(Debug, Clone, Copy)]
pub struct Presence {
    pub interactive_running: bool,
    pub daemon_running: bool,
}

/// Scan the root's children for sentinel window names.
pub fn scan(x: &XConn) -> Result<Presence, X11Error> {
    let mut presence = Presence {
        interactive_running: false,
        daemon_running: false,
    };
    for child in x.root_children()? {
        match x.window_name(child)?.as_deref() {
            Some(SENTINEL) => presence.interactive_running = true,
            Some(SENTINEL_DAEMON) => presence.daemon_running = true,
            _ => {}
        }
    }
    Ok(presence)
}

impl Presence {
    /// An interactive instance excludes everything; a daemon excludes
    /// only a second daemon.
    pub fn excludes(&self, daemon: bool) -> bool {
        self.interactive_running || (daemon && self.daemon_running)
    }
}
