//! Keysym constants and the server keyboard mapping.
//!
//! The mapping is fetched once at connect time; lookups in both
//! directions (keycode for grabbing, keysym for classifying menu input)
//! are then local and pure.

use x11rb::protocol::xproto::{GetKeyboardMappingReply, Keycode, Keysym};

pub const XK_BACKSPACE: Keysym = 0xff08;
pub const XK_RETURN: Keysym = 0xff0d;
pub const XK_UP: Keysym = 0xff52;
pub const XK_DOWN: Keysym = 0xff54;
pub const XK_KP_ENTER: Keysym = 0xff8d;
pub const XK_F1: Keysym = 0xffbe;
pub const XK_F2: Keysym = 0xffbf;
pub const XK_F3: Keysym = 0xffc0;
pub const XK_F4: Keysym = 0xffc1;
pub const XK_F5: Keysym = 0xffc2;
pub const XK_DELETE: Keysym = 0xffff;
pub const XK_Z: Keysym = 0x7a;

/// Snapshot of the server's keycode→keysym table.
#[derive(Debug)]
pub struct KeyMap {
    min_keycode: Keycode,
    keysyms_per_keycode: usize,
    keysyms: Vec<Keysym>,
}

impl KeyMap {
    pub fn from_reply(min_keycode: Keycode, reply: GetKeyboardMappingReply) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode: reply.keysyms_per_keycode as usize,
            keysyms: reply.keysyms,
        }
    }

    /// Unshifted keysym for a keycode (column 0), or 0 when unmapped.
    pub fn keysym_at(&self, keycode: Keycode) -> Keysym {
        if keycode < self.min_keycode || self.keysyms_per_keycode == 0 {
            return 0;
        }
        let index = (keycode - self.min_keycode) as usize * self.keysyms_per_keycode;
        self.keysyms.get(index).copied().unwrap_or(0)
    }

    /// First keycode producing `keysym` in any column, for key grabs.
    pub fn keycode_for(&self, keysym: Keysym) -> Option<Keycode> {
        if self.keysyms_per_keycode == 0 {
            return None;
        }
        for (i, row) in self.keysyms.chunks(self.keysyms_per_keycode).enumerate() {
            if row.contains(&keysym) {
                return Some(self.min_keycode + i as Keycode);
            }
        }
        None
    }
}
