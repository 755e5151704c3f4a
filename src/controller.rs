//! Top-level coordinator: X events and user input in, engine
//! transitions and window updates out.
//!
//! One blocking loop over [`XConn::wait_for_event`]. Each iteration is
//! independent; per-request problems refuse that request and the loop
//! keeps going. The only other blocking point is the deliberate sleep
//! while the flash window is up.

use std::thread;
use std::time::{Duration, Instant};

use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    ButtonPressEvent, InputFocus, Keysym, ModMask, SelectionNotifyEvent, Window,
};

use crate::cli::RunOptions;
use crate::engine::{
    Action, Answer, EngineConfig, ProtocolEngine, RequestRecord, destination_property,
};
use crate::helper::HelperProgram;
use crate::ingest;
use crate::list::SelectionList;
use crate::render::{CoreFontRenderer, FlashView, Hit, MenuView, Renderer};
use crate::x11::{X11Error, XConn, keys, singleton};

/// How long the flash window stays up, by occasion.
const FLASH_STARTUP: Duration = Duration::from_millis(200);
const FLASH_CHANGE: Duration = Duration::from_millis(500);
const FLASH_MESSAGE: Duration = Duration::from_millis(800);

const NO_OWNER_MESSAGE: &str = "select a string first";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0} already running")]
    AlreadyRunning(&'static str),
    #[error("cannot acquire ownership of the primary selection")]
    OwnershipDenied,
    #[error(transparent)]
    X11(#[from] X11Error),
}

/// What a key pressed while the menu is up means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuKey {
    Pick(usize),
    CursorUp,
    CursorDown,
    PickCursor,
    Capture,
    RemoveCursor,
    RemoveLast,
    Clear,
    Quit,
    Cancel,
}

/// Map a keysym to its menu meaning. Digits `1`-`9` and letters `a`-`z`
/// pick rows 0-8 and 9-34; a letter pointing past the end of the list
/// falls back to its management meaning, and anything unassigned
/// cancels.
fn classify_key(keysym: Keysym, len: usize) -> MenuKey {
    match keysym {
        0x31..=0x39 => {
            let index = (keysym - 0x31) as usize;
            if index < len {
                MenuKey::Pick(index)
            } else {
                MenuKey::Cancel
            }
        }
        0x61..=0x7a => {
            let index = 9 + (keysym - 0x61) as usize;
            if index < len {
                return MenuKey::Pick(index);
            }
            match keysym as u8 {
                b'z' => MenuKey::Capture,
                b's' => MenuKey::RemoveLast,
                b'd' => MenuKey::Clear,
                b'q' => MenuKey::Quit,
                _ => MenuKey::Cancel,
            }
        }
        keys::XK_UP => MenuKey::CursorUp,
        keys::XK_DOWN => MenuKey::CursorDown,
        keys::XK_RETURN | keys::XK_KP_ENTER => MenuKey::PickCursor,
        keys::XK_BACKSPACE | keys::XK_DELETE => MenuKey::RemoveCursor,
        keys::XK_F2 => MenuKey::Capture,
        keys::XK_F3 => MenuKey::RemoveLast,
        keys::XK_F4 => MenuKey::Clear,
        keys::XK_F5 => MenuKey::Quit,
        _ => MenuKey::Cancel,
    }
}

struct FlashState {
    view: FlashView,
    hide: Duration,
    shown_at: Instant,
}

/// Event-loop owner; holds every piece of mutable program state.
pub struct Controller {
    x: XConn,
    list: SelectionList,
    engine: ProtocolEngine,
    renderer: Box<dyn Renderer>,
    opts: RunOptions,
    helper: Option<HelperProgram>,
    /// Focus to restore when the menu goes away.
    saved_focus: Option<(Window, InputFocus)>,
    /// Pointer position to warp back to before the synthetic click.
    saved_pointer: Option<(i16, i16)>,
    menu_open: bool,
    /// Cooperative exit: honoured once the pending transaction is done.
    exitnext: bool,
    stop: bool,
    flash: Option<FlashState>,
}

/// Bootstrap and run until exit.
pub fn run(opts: RunOptions, strings: Vec<String>) -> Result<(), RunError> {
    let mut controller = Controller::bootstrap(opts, strings)?;
    controller.run_loop()
}

impl Controller {
    fn bootstrap(mut opts: RunOptions, strings: Vec<String>) -> Result<Self, RunError> {
        let mut x = XConn::connect()?;

        let presence = singleton::scan(&x)?;
        if presence.excludes(opts.daemon) {
            x.shutdown();
            return Err(RunError::AlreadyRunning(if presence.interactive_running {
                singleton::SENTINEL
            } else {
                singleton::SENTINEL_DAEMON
            }));
        }
        let sentinel = if opts.daemon {
            singleton::SENTINEL_DAEMON
        } else {
            singleton::SENTINEL
        };
        x.set_window_name(x.menu_window(), sentinel)?;

        if opts.click && !x.has_xtest() {
            tracing::warn!("XTEST unavailable, falling back to direct paste");
            opts.click = false;
        }

        // Ctrl+Shift+Z adds the current selection; a running daemon
        // already serves it for the whole display.
        if opts.daemon || !presence.daemon_running {
            x.grab_root_key(keys::XK_Z, ModMask::CONTROL | ModMask::SHIFT)?;
        }
        if opts.hotkey_f1 {
            x.grab_root_key(keys::XK_F1, ModMask::from(0u16))?;
        }
        if opts.hotkey_f2 {
            x.grab_root_key(keys::XK_F2, ModMask::from(0u16))?;
        }
        if opts.hotkey_f5 {
            x.grab_root_key(keys::XK_F5, ModMask::from(0u16))?;
        }

        let renderer: Box<dyn Renderer> = Box::new(CoreFontRenderer::new(&x)?);

        let mut list = SelectionList::new(opts.separator);
        for s in strings {
            if !list.add(s) {
                break;
            }
        }

        let mut engine = ProtocolEngine::new(
            *x.atoms(),
            x.menu_window(),
            EngineConfig {
                click: opts.click,
                daemon: opts.daemon,
                continuous: opts.continuous,
            },
        );

        // Continuous mode defers to an existing owner: capture its
        // string first and take the selection over once it arrives.
        let owner = x.selection_owner()?;
        if opts.continuous && owner != x11rb::NONE && owner != x.menu_window() {
            tracing::debug!(owner, "capturing current owner before acquiring");
            x.convert_primary()?;
        } else {
            match x.try_acquire_primary()? {
                Some(since) => engine.acquired(since),
                None if opts.continuous => x.convert_primary()?,
                None => {
                    x.shutdown();
                    return Err(RunError::OwnershipDenied);
                }
            }
        }

        let helper = opts.helper.clone().map(HelperProgram::new);
        let mut controller = Self {
            x,
            list,
            engine,
            renderer,
            opts,
            helper,
            saved_focus: None,
            saved_pointer: None,
            menu_open: false,
            exitnext: false,
            stop: false,
            flash: None,
        };
        controller.show_flash(FlashView::of(&controller.list), FLASH_STARTUP)?;
        Ok(controller)
    }

    fn run_loop(&mut self) -> Result<(), RunError> {
        let result = self.event_loop();
        self.x.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<(), RunError> {
        while !self.stop {
            let event = self.x.wait_for_event()?;
            self.expire_flash()?;
            self.dispatch(event)?;
            if self.exitnext && !self.engine.has_pending() && !self.menu_open {
                tracing::debug!("transaction done, exiting");
                self.stop = true;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<(), RunError> {
        match event {
            Event::Expose(ev) if ev.window == self.x.flash_window() => self.expose_flash()?,
            Event::Expose(ev) if ev.window == self.x.menu_window() && self.menu_open => {
                self.renderer.draw_menu(&self.x, &MenuView::of(&self.list))?;
                self.x.focus_menu()?;
                self.x.grab_pointer_on_menu()?;
                self.x.flush()?;
            }
            Event::SelectionRequest(ev) => {
                tracing::debug!(
                    requestor = ev.requestor,
                    atom = ev.target,
                    "selection request"
                );
                let record = RequestRecord::from_event(&ev);
                let actions = self
                    .engine
                    .handle_request(record, &self.list, Instant::now());
                for action in actions {
                    self.apply_action(action)?;
                }
            }
            Event::SelectionClear(_) => {
                tracing::debug!("selection clear");
                if !self.exitnext {
                    self.x.ungrab_pointer()?;
                    let actions = self.engine.handle_clear();
                    for action in actions {
                        self.apply_action(action)?;
                    }
                }
            }
            Event::SelectionNotify(ev) => self.capture_arrival(&ev)?,
            Event::KeyPress(ev) => {
                let keysym = self.x.keysym_at(ev.detail);
                if ev.event == self.x.root() {
                    self.hotkey(keysym)?;
                } else if ev.event == self.x.menu_window() && self.menu_open {
                    self.menu_key(keysym)?;
                }
            }
            Event::ButtonPress(ev)
                if ev.event == self.x.menu_window() && self.menu_open =>
            {
                self.menu_click(&ev)?;
            }
            Event::Error(err) => {
                tracing::debug!(?err, "x protocol error event");
            }
            other => {
                tracing::trace!(?other, "ignored event");
            }
        }
        Ok(())
    }

    // -- Engine action execution --

    fn apply_action(&mut self, action: Action) -> Result<(), RunError> {
        match action {
            Action::Reply { request, answer } => self.reply(&request, answer)?,
            Action::OpenMenu => self.open_menu()?,
            Action::SyntheticPaste => self.warp_and_click()?,
            Action::CaptureOwner => self.request_capture()?,
            Action::ScheduleExit => self.exitnext = true,
        }
        Ok(())
    }

    /// Carry out one reply: property write first, then the notify.
    fn reply(&mut self, request: &RequestRecord, answer: Answer) -> Result<(), RunError> {
        match answer {
            Answer::Refuse => {
                tracing::debug!(requestor = request.requestor, "refusing request");
                self.x.send_notify(request, x11rb::NONE)?;
            }
            Answer::Targets => {
                let property = destination_property(self.x.atoms(), request);
                self.x.write_targets(request, property)?;
                self.x.send_notify(request, property)?;
            }
            Answer::Payload { bytes, target } => {
                if let Some(helper) = &self.helper
                    && helper.try_paste(request.requestor, &bytes)
                {
                    // Delivered externally; the requestor still gets
                    // its notify, with nothing attached.
                    self.x.send_notify(request, x11rb::NONE)?;
                    return Ok(());
                }
                let property = destination_property(self.x.atoms(), request);
                self.x.write_payload(request, property, target, &bytes)?;
                self.x.send_notify(request, property)?;
                tracing::debug!(
                    requestor = request.requestor,
                    bytes = bytes.len(),
                    "payload sent"
                );
            }
        }
        Ok(())
    }

    // -- Menu lifecycle --

    fn open_menu(&mut self) -> Result<(), RunError> {
        if self.menu_open {
            return Ok(());
        }
        let (focus, revert) = self.x.input_focus()?;
        if self.saved_focus.is_none() && focus != self.x.menu_window() {
            tracing::debug!(focus, "saving focus window");
            self.saved_focus = Some((focus, revert));
        }
        self.saved_pointer = Some(self.x.pointer_position()?);
        let (width, height) = self.renderer.window_size(self.list.len());
        self.x
            .present_at_pointer(self.x.menu_window(), width, height)?;
        self.menu_open = true;
        self.engine.menu_opened();
        Ok(())
    }

    /// Unmap the menu and restore what the user had: focus, then
    /// pointer, then (in click mode after a pick) the middle click that
    /// provokes the requestor to ask again.
    fn close_menu(&mut self, warp_click: bool) -> Result<(), RunError> {
        self.x.unmap(self.x.menu_window())?;
        self.menu_open = false;
        self.engine.menu_closed();
        self.x.ungrab_pointer()?;
        if let Some((window, revert)) = self.saved_focus.take() {
            tracing::debug!(window, "restoring focus");
            self.x.restore_focus(window, revert)?;
        }
        if warp_click {
            self.warp_and_click()?;
        }
        self.saved_pointer = None;
        Ok(())
    }

    fn warp_and_click(&mut self) -> Result<(), RunError> {
        if let Some((x, y)) = self.saved_pointer {
            self.x.warp_pointer_to(x, y)?;
        }
        self.x.fake_middle_click()?;
        Ok(())
    }

    fn redraw_menu(&mut self) -> Result<(), RunError> {
        if self.menu_open {
            self.renderer.draw_menu(&self.x, &MenuView::of(&self.list))?;
        }
        Ok(())
    }

    /// Serve the user's decision and close the menu.
    fn pick(&mut self, key: Option<usize>) -> Result<(), RunError> {
        let actions = self.engine.serve_pick(key, &self.list, Instant::now());
        let mut click_after = false;
        for action in actions {
            match action {
                Action::SyntheticPaste => click_after = true,
                other => self.apply_action(other)?,
            }
        }
        self.close_menu(click_after)?;
        Ok(())
    }

    // -- Keyboard input --

    fn hotkey(&mut self, keysym: Keysym) -> Result<(), RunError> {
        match keysym {
            keys::XK_Z => {
                tracing::debug!("hotkey: add current selection");
                self.request_capture()?;
            }
            keys::XK_F2 if self.opts.hotkey_f2 => self.request_capture()?,
            keys::XK_F1 if self.opts.hotkey_f1 => self.show_menu_by_hotkey()?,
            keys::XK_F5 if self.opts.hotkey_f5 => {
                tracing::debug!("hotkey: quit");
                self.list.clear();
                self.disown_if_owned()?;
                self.exitnext = true;
            }
            _ => {}
        }
        Ok(())
    }

    /// Open the menu without a pasting client. With force mode, a
    /// fabricated request against the focused window makes the eventual
    /// pick paste anyway.
    fn show_menu_by_hotkey(&mut self) -> Result<(), RunError> {
        if self.menu_open {
            return Ok(());
        }
        if self.opts.force && !self.engine.has_pending() {
            let (focus, _) = self.x.input_focus()?;
            if focus != self.x.menu_window() {
                self.engine.fabricate_request(focus);
            }
        }
        self.open_menu()
    }

    fn menu_key(&mut self, keysym: Keysym) -> Result<(), RunError> {
        match classify_key(keysym, self.list.len()) {
            MenuKey::Pick(index) => self.pick(Some(index))?,
            MenuKey::CursorUp => {
                self.list.cursor_up();
                self.after_cursor_move()?;
            }
            MenuKey::CursorDown => {
                self.list.cursor_down();
                self.after_cursor_move()?;
            }
            MenuKey::PickCursor => {
                if let Some(cursor) = self.list.cursor() {
                    self.pick(Some(cursor))?;
                }
            }
            MenuKey::Capture => self.request_capture()?,
            MenuKey::RemoveCursor => {
                if let Some(cursor) = self.list.cursor() {
                    self.list.remove(cursor);
                    self.after_removal()?;
                }
            }
            MenuKey::RemoveLast => {
                self.list.remove_last();
                self.after_removal()?;
            }
            MenuKey::Clear => {
                self.list.clear();
                self.after_removal()?;
            }
            MenuKey::Quit => {
                self.list.clear();
                self.disown_if_owned()?;
                self.pick(None)?;
                if !self.opts.daemon {
                    self.exitnext = true;
                }
            }
            MenuKey::Cancel => self.pick(None)?,
        }
        Ok(())
    }

    fn after_cursor_move(&mut self) -> Result<(), RunError> {
        if self.opts.immediate
            && let Some(cursor) = self.list.cursor()
        {
            return self.pick(Some(cursor));
        }
        self.redraw_menu()
    }

    /// The list shrank under the open menu: give up the selection when
    /// nothing is left, close outside daemon mode, redraw otherwise.
    fn after_removal(&mut self) -> Result<(), RunError> {
        if self.list.is_empty() {
            self.disown_if_owned()?;
            if !self.opts.daemon {
                return self.pick(None);
            }
        }
        self.redraw_menu()
    }

    fn disown_if_owned(&mut self) -> Result<(), RunError> {
        if self.engine.owns_selection() {
            self.x.disown_primary()?;
            self.engine.disowned();
        }
        Ok(())
    }

    // -- Mouse input --

    fn menu_click(&mut self, ev: &ButtonPressEvent) -> Result<(), RunError> {
        match self
            .renderer
            .hit(ev.event_x, ev.event_y, self.list.len())
        {
            Hit::Row(index) => self.pick(Some(index))?,
            Hit::IconAdd => self.request_capture()?,
            Hit::IconExit => {
                self.pick(None)?;
                self.exitnext = true;
            }
            Hit::Title | Hit::Outside => {}
        }
        Ok(())
    }

    // -- Capturing another owner's selection --

    fn request_capture(&mut self) -> Result<(), RunError> {
        if self.list.is_full() {
            tracing::debug!("list full, not capturing");
            return Ok(());
        }
        let owner = self.x.selection_owner()?;
        if owner == x11rb::NONE {
            self.show_flash(FlashView::message(NO_OWNER_MESSAGE), FLASH_MESSAGE)?;
            return Ok(());
        }
        if owner == self.x.menu_window() {
            tracing::debug!("already the owner, nothing to capture");
            return Ok(());
        }
        self.x.convert_primary()?;
        Ok(())
    }

    fn capture_arrival(&mut self, ev: &SelectionNotifyEvent) -> Result<(), RunError> {
        if ev.property == x11rb::NONE {
            tracing::debug!("conversion refused by owner");
            return Ok(());
        }
        if self.list.is_full() {
            return Ok(());
        }
        let bytes = match self.x.read_converted_selection() {
            Ok(Some(bytes)) => ingest::strip_trailing_nuls(bytes),
            Ok(None) => return Ok(()),
            Err(e) => {
                // A failed read just drops the would-be entry.
                tracing::debug!(error = %e, "property read failed");
                return Ok(());
            }
        };
        if bytes.is_empty() {
            return Ok(());
        }
        self.list.add(String::from_utf8_lossy(&bytes).into_owned());
        tracing::debug!(len = self.list.len(), "captured selection");

        // With a single entry the previous owner keeps answering
        // pastes; from two on (or in continuous mode) we take over.
        if !self.engine.owns_selection() && (self.list.len() >= 2 || self.opts.continuous) {
            match self.x.try_acquire_primary()? {
                Some(since) => self.engine.acquired(since),
                None => {
                    return Err(RunError::OwnershipDenied);
                }
            }
        }

        self.redraw_menu()?;
        self.show_flash(FlashView::of(&self.list), FLASH_CHANGE)?;
        Ok(())
    }

    // -- Flash window --

    fn show_flash(&mut self, view: FlashView, hide: Duration) -> Result<(), RunError> {
        let (width, height) = self.renderer.window_size(view.rows.len());
        self.x
            .present_at_pointer(self.x.flash_window(), width, height)?;
        self.flash = Some(FlashState {
            view,
            hide,
            shown_at: Instant::now(),
        });
        Ok(())
    }

    /// Draw, linger, unmap. The sleep is synchronous; the flash is a
    /// modal confirmation, not an interactive element, and queued
    /// events are handled right after.
    fn expose_flash(&mut self) -> Result<(), RunError> {
        let Some(flash) = self.flash.take() else {
            return Ok(());
        };
        self.renderer.draw_flash(&self.x, &flash.view)?;
        self.x.flush()?;
        thread::sleep(flash.hide);
        self.x.unmap(self.x.flash_window())?;
        Ok(())
    }

    /// Fallback for a flash whose Expose never came: drop it once its
    /// time is up.
    fn expire_flash(&mut self) -> Result<(), RunError> {
        if let Some(flash) = &self.flash
            && flash.shown_at.elapsed() > flash.hide
        {
            self.x.unmap(self.x.flash_window())?;
            self.flash = None;
        }
        Ok(())
    }
}
