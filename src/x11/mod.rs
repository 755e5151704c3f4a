//! X connection wrapper — events in, drawing and selection primitives out.
//!
//! Owns the `RustConnection`, the two override-redirect windows (menu
//! and flash), the interned atoms, and the keyboard-mapping snapshot.
//! Everything above this module speaks in terms of these primitives and
//! never touches x11rb directly, except the renderer, which draws
//! through [`XConn::raw`].

pub mod keys;
pub mod singleton;

use std::collections::VecDeque;

use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT, ConfigureWindowAux,
    ConnectionExt as _, CreateWindowAux, EventMask, GrabMode, GrabStatus, InputFocus, Keycode,
    Keysym, ModMask, PropMode, SELECTION_NOTIFY_EVENT, SelectionNotifyEvent, StackMode, Timestamp,
    Window, WindowClass,
};
use x11rb::protocol::xtest::{self, ConnectionExt as _};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use keys::KeyMap;

use crate::engine::RequestRecord;

x11rb::atom_manager! {
    /// Atoms interned once at connect time.
    pub Atoms: AtomsCookie {
        PRIMARY,
        STRING,
        UTF8_STRING,
        TARGETS,
        ATOM,
        CURSOR,
        CUT_BUFFER0,
        TEXT_MOZ_INTERNAL: b"text/x-moz-text-internal",
        XT_SELECTION_1: b"_XT_SELECTION_1",
    }
}

/// Errors surfaced by the X connection.
#[derive(Debug, thiserror::Error)]
pub enum X11Error {
    #[error("cannot open display: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),
    #[error("connection: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),
    #[error("reply: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),
    #[error("id allocation: {0}")]
    Id(#[from] x11rb::errors::ReplyOrIdError),
}

/// Wrapper around the X connection and the two program windows.
pub struct XConn {
    conn: RustConnection,
    root: Window,
    root_width: u16,
    root_height: u16,
    white: u32,
    black: u32,
    atoms: Atoms,
    keymap: KeyMap,
    xtest: bool,
    menu_win: Window,
    flash_win: Window,
    /// Events set aside while waiting for a specific one.
    queue: VecDeque<Event>,
}

impl XConn {
    /// Connect to the display, intern atoms, snapshot the keyboard
    /// mapping, probe for XTEST, and create the (unnamed, unmapped)
    /// menu and flash windows.
    pub fn connect() -> Result<Self, X11Error> {
        let (conn, screen_num) = RustConnection::connect(None)?;

        let setup = conn.setup();
        let screen = &setup.roots[screen_num];
        let root = screen.root;
        let root_width = screen.width_in_pixels;
        let root_height = screen.height_in_pixels;
        let white = screen.white_pixel;
        let black = screen.black_pixel;
        let min_keycode = setup.min_keycode;
        let max_keycode = setup.max_keycode;

        let atoms = Atoms::new(&conn)?.reply()?;

        let mapping = conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;
        let keymap = KeyMap::from_reply(min_keycode, mapping);

        let xtest = conn
            .extension_information(xtest::X11_EXTENSION_NAME)?
            .is_some();
        if !xtest {
            tracing::warn!("XTEST extension missing, synthetic clicks unavailable");
        }

        let menu_win = conn.generate_id()?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            menu_win,
            root,
            0,
            0,
            1,
            1,
            1,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new()
                .background_pixel(white)
                .override_redirect(1)
                .event_mask(
                    EventMask::EXPOSURE
                        | EventMask::STRUCTURE_NOTIFY
                        | EventMask::KEY_PRESS
                        | EventMask::BUTTON_PRESS
                        | EventMask::PROPERTY_CHANGE,
                ),
        )?;

        let flash_win = conn.generate_id()?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            flash_win,
            root,
            0,
            0,
            50,
            10,
            1,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new()
                .background_pixel(white)
                .override_redirect(1)
                .event_mask(EventMask::EXPOSURE),
        )?;

        conn.flush()?;
        tracing::debug!(menu = menu_win, flash = flash_win, "windows created");

        Ok(Self {
            conn,
            root,
            root_width,
            root_height,
            white,
            black,
            atoms,
            keymap,
            xtest,
            menu_win,
            flash_win,
            queue: VecDeque::new(),
        })
    }

    // -- Accessors --

    pub fn raw(&self) -> &RustConnection {
        &self.conn
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn menu_window(&self) -> Window {
        self.menu_win
    }

    pub fn flash_window(&self) -> Window {
        self.flash_win
    }

    pub fn white_pixel(&self) -> u32 {
        self.white
    }

    pub fn black_pixel(&self) -> u32 {
        self.black
    }

    pub fn has_xtest(&self) -> bool {
        self.xtest
    }

    pub fn keysym_at(&self, keycode: Keycode) -> Keysym {
        self.keymap.keysym_at(keycode)
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn flush(&self) -> Result<(), X11Error> {
        self.conn.flush()?;
        Ok(())
    }

    // -- Event intake --

    /// Next event, draining any set-aside events first.
    pub fn wait_for_event(&mut self) -> Result<Event, X11Error> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(event);
        }
        Ok(self.conn.wait_for_event()?)
    }

    // -- Window naming --

    pub fn set_window_name(&self, window: Window, name: &str) -> Result<(), X11Error> {
        self.conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            name.as_bytes(),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// WM_NAME of a window, tolerating windows that vanish mid-query.
    pub fn window_name(&self, window: Window) -> Result<Option<String>, X11Error> {
        let cookie = self.conn.get_property(
            false,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            0,
            64,
        )?;
        match cookie.reply() {
            Ok(reply) if reply.format == 8 && !reply.value.is_empty() => {
                Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()))
            }
            Ok(_) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    pub fn root_children(&self) -> Result<Vec<Window>, X11Error> {
        Ok(self.conn.query_tree(self.root)?.reply()?.children)
    }

    // -- Ownership --

    /// Server timestamp for "now", via a zero-length property append and
    /// the PropertyNotify it generates.
    pub fn timestamp_now(&mut self) -> Result<Timestamp, X11Error> {
        self.conn.change_property8(
            PropMode::APPEND,
            self.menu_win,
            self.atoms.CURSOR,
            self.atoms.STRING,
            &[],
        )?;
        self.conn.flush()?;
        loop {
            let event = self.conn.wait_for_event()?;
            match event {
                Event::PropertyNotify(ev)
                    if ev.window == self.menu_win && ev.atom == self.atoms.CURSOR =>
                {
                    return Ok(ev.time);
                }
                other => self.queue.push_back(other),
            }
        }
    }

    /// Claim PRIMARY for the menu window. Returns the ownership
    /// timestamp, or `None` when the server gave the selection to
    /// someone else. Clears `CUT_BUFFER0` so clients that fall back to
    /// cut buffers after a refusal do not paste stale data.
    pub fn try_acquire_primary(&mut self) -> Result<Option<Timestamp>, X11Error> {
        self.conn
            .set_selection_owner(self.menu_win, self.atoms.PRIMARY, x11rb::CURRENT_TIME)?;
        let owner = self
            .conn
            .get_selection_owner(self.atoms.PRIMARY)?
            .reply()?
            .owner;
        if owner != self.menu_win {
            tracing::warn!(owner, "selection ownership not granted");
            return Ok(None);
        }
        let since = self.timestamp_now()?;
        self.conn.delete_property(self.root, self.atoms.CUT_BUFFER0)?;
        self.conn.flush()?;
        tracing::debug!(since, "primary selection acquired");
        Ok(Some(since))
    }

    pub fn disown_primary(&self) -> Result<(), X11Error> {
        self.conn
            .set_selection_owner(x11rb::NONE, self.atoms.PRIMARY, x11rb::CURRENT_TIME)?;
        self.conn.flush()?;
        Ok(())
    }

    /// Current PRIMARY owner; `x11rb::NONE` when unowned.
    pub fn selection_owner(&self) -> Result<Window, X11Error> {
        Ok(self
            .conn
            .get_selection_owner(self.atoms.PRIMARY)?
            .reply()?
            .owner)
    }

    // -- Capturing another owner's selection --

    /// Ask the current owner to convert PRIMARY to STRING into our
    /// window's PRIMARY property.
    pub fn convert_primary(&self) -> Result<(), X11Error> {
        self.conn.convert_selection(
            self.menu_win,
            self.atoms.PRIMARY,
            self.atoms.STRING,
            self.atoms.PRIMARY,
            x11rb::CURRENT_TIME,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// Read (and delete) the property a conversion landed in. `None`
    /// when the property is missing or not a STRING.
    pub fn read_converted_selection(&self) -> Result<Option<Vec<u8>>, X11Error> {
        let reply = self
            .conn
            .get_property(
                true,
                self.menu_win,
                self.atoms.PRIMARY,
                self.atoms.STRING,
                0,
                200,
            )?
            .reply()?;
        if reply.type_ != self.atoms.STRING || reply.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(reply.value))
    }

    // -- Replies to requestors --

    /// Write a string payload to the requestor. Must precede the notify.
    pub fn write_payload(
        &self,
        request: &RequestRecord,
        property: Atom,
        target: Atom,
        bytes: &[u8],
    ) -> Result<(), X11Error> {
        self.conn
            .change_property8(PropMode::REPLACE, request.requestor, property, target, bytes)?;
        Ok(())
    }

    /// Write the supported-target list to the requestor.
    pub fn write_targets(
        &self,
        request: &RequestRecord,
        property: Atom,
    ) -> Result<(), X11Error> {
        self.conn.change_property32(
            PropMode::REPLACE,
            request.requestor,
            property,
            AtomEnum::ATOM,
            &[self.atoms.STRING, self.atoms.UTF8_STRING],
        )?;
        Ok(())
    }

    /// SelectionNotify echoing the request; `property == x11rb::NONE`
    /// refuses it.
    pub fn send_notify(
        &self,
        request: &RequestRecord,
        property: Atom,
    ) -> Result<(), X11Error> {
        let event = SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: request.time,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property,
        };
        self.conn
            .send_event(false, request.requestor, EventMask::NO_EVENT, event)?;
        self.conn.flush()?;
        Ok(())
    }

    // -- Window presentation --

    /// Resize, place near the pointer, and raise-map a window.
    pub fn present_at_pointer(
        &self,
        window: Window,
        width: u16,
        height: u16,
    ) -> Result<(), X11Error> {
        let (px, py) = self.pointer_position()?;
        let (x, y) = place_near_pointer(px, py, width, height, self.root_width, self.root_height);
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new()
                .x(i32::from(x))
                .y(i32::from(y))
                .width(u32::from(width))
                .height(u32::from(height))
                .stack_mode(StackMode::ABOVE),
        )?;
        self.conn.map_window(window)?;
        self.conn.flush()?;
        Ok(())
    }

    pub fn unmap(&self, window: Window) -> Result<(), X11Error> {
        self.conn.unmap_window(window)?;
        self.conn.flush()?;
        Ok(())
    }

    // -- Focus and pointer --

    pub fn input_focus(&self) -> Result<(Window, InputFocus), X11Error> {
        let reply = self.conn.get_input_focus()?.reply()?;
        Ok((reply.focus, reply.revert_to))
    }

    pub fn restore_focus(&self, window: Window, revert_to: InputFocus) -> Result<(), X11Error> {
        self.conn
            .set_input_focus(revert_to, window, x11rb::CURRENT_TIME)?;
        self.conn.flush()?;
        Ok(())
    }

    pub fn focus_menu(&self) -> Result<(), X11Error> {
        self.conn
            .set_input_focus(InputFocus::NONE, self.menu_win, x11rb::CURRENT_TIME)?;
        Ok(())
    }

    pub fn pointer_position(&self) -> Result<(i16, i16), X11Error> {
        let reply = self.conn.query_pointer(self.root)?.reply()?;
        Ok((reply.root_x, reply.root_y))
    }

    pub fn warp_pointer_to(&self, x: i16, y: i16) -> Result<(), X11Error> {
        self.conn
            .warp_pointer(x11rb::NONE, self.root, 0, 0, 0, 0, x, y)?;
        Ok(())
    }

    /// Fake a middle-button press and release via XTEST, provoking the
    /// requestor under the pointer to ask for the selection again.
    pub fn fake_middle_click(&self) -> Result<(), X11Error> {
        self.conn
            .xtest_fake_input(BUTTON_PRESS_EVENT, 2, x11rb::CURRENT_TIME, self.root, 0, 0, 0)?;
        self.conn.xtest_fake_input(
            BUTTON_RELEASE_EVENT,
            2,
            x11rb::CURRENT_TIME,
            self.root,
            0,
            0,
            0,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// Keep the pointer to ourselves while the menu is up, so the
    /// requestor cannot fire further requests mid-decision.
    pub fn grab_pointer_on_menu(&self) -> Result<(), X11Error> {
        let status = self
            .conn
            .grab_pointer(
                true,
                self.menu_win,
                EventMask::BUTTON_PRESS,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                x11rb::CURRENT_TIME,
            )?
            .reply()?
            .status;
        if status != GrabStatus::SUCCESS {
            tracing::debug!(?status, "pointer grab not granted");
        }
        Ok(())
    }

    pub fn ungrab_pointer(&self) -> Result<(), X11Error> {
        self.conn.ungrab_pointer(x11rb::CURRENT_TIME)?;
        self.conn.flush()?;
        Ok(())
    }

    // -- Hotkey grabs --

    /// Grab `keysym` (+`modifiers`) on the root window. Returns whether
    /// the grab succeeded; conflicts are logged, not fatal.
    pub fn grab_root_key(&self, keysym: Keysym, modifiers: ModMask) -> Result<bool, X11Error> {
        let Some(keycode) = self.keymap.keycode_for(keysym) else {
            tracing::warn!(keysym, "keysym not in keyboard mapping, cannot grab");
            return Ok(false);
        };
        let cookie = self.conn.grab_key(
            false,
            self.root,
            modifiers,
            keycode,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )?;
        match cookie.check() {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(keysym, error = %e, "key grab failed, hotkey disabled");
                Ok(false)
            }
        }
    }

    // -- Teardown --

    /// Destroy both windows and flush; errors at this point are moot.
    pub fn shutdown(&self) {
        let _ = self.conn.destroy_window(self.menu_win);
        let _ = self.conn.destroy_window(self.flash_win);
        let _ = self.conn.flush();
    }
}

/// Place a `width`×`height` window next to the pointer, clamped to the
/// screen: horizontally centered on the pointer, below it when there is
/// room and above otherwise.
fn place_near_pointer(
    pointer_x: i16,
    pointer_y: i16,
    width: u16,
    height: u16,
    root_width: u16,
    root_height: u16,
) -> (i16, i16) {
    const BORDER: i32 = 1;
    let (px, py) = (i32::from(pointer_x), i32::from(pointer_y));
    let (w, h) = (i32::from(width), i32::from(height));
    let (rw, rh) = (i32::from(root_width), i32::from(root_height));

    let mut x = px - w / 2;
    if x < 0 {
        x = BORDER;
    }
    if x + w >= rw {
        x = rw - w - 2 * BORDER;
    }
    let y = if py + 10 + h + 2 * BORDER < rh {
        py + 10
    } else {
        py - 10 - h
    };
    (x as i16, y as i16)
}

/// Fixed atom values for engine and layout tests; no server involved.
#[cfg(test)]
pub fn test_atoms() -> Atoms {
    Atoms {
        PRIMARY: 1,
        STRING: 31,
        UTF8_STRING: 0x100,
        TARGETS: 0x101,
        ATOM: 4,
        CURSOR: 5,
        CUT_BUFFER0: 9,
        TEXT_MOZ_INTERNAL: 0x102,
        XT_SELECTION_1: 0x103,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Pointer-relative placement --

    #[test]
    fn window_centers_under_pointer() {
        let (x, y) = place_near_pointer(500, 300, 400, 100, 1920, 1080);
        assert_eq!((x, y), (300, 310));
    }

    #[test]
    fn window_clamps_to_left_edge() {
        let (x, _) = place_near_pointer(10, 300, 400, 100, 1920, 1080);
        assert_eq!(x, 1);
    }

    #[test]
    fn window_clamps_to_right_edge() {
        let (x, _) = place_near_pointer(1900, 300, 400, 100, 1920, 1080);
        assert_eq!(x, 1920 - 400 - 2);
    }

    #[test]
    fn window_flips_above_pointer_near_bottom() {
        let (_, y) = place_near_pointer(500, 1050, 400, 100, 1920, 1080);
        assert_eq!(y, 1050 - 10 - 100);
    }
}
