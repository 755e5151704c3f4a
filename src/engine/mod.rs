//! ICCCM selection-owner state machine.
//!
//! The engine consumes one event at a time and returns the actions the
//! caller must carry out: replies to send, the menu to open, a capture
//! to start, an exit to schedule. It never blocks and never touches the
//! X connection, which keeps every protocol decision unit-testable.
//!
//! Requestors are not uniformly well behaved. xterm retries a refused
//! request with a different conversion, opera asks twice for no reason,
//! and firefox gives the user half a second before falling back to a
//! `text/x-moz-text-internal` conversion. The short-time window and the
//! firefox latch below exist to absorb exactly those behaviors: a
//! request arriving within [`SHORT_INTERVAL`] of the previous serve is
//! answered identically, and a request following the firefox sentinel
//! is answered with the previously chosen string.

pub mod request;

use std::time::{Duration, Instant};

use x11rb::protocol::xproto::{Atom, Timestamp, Window};

pub use request::{RequestRecord, TargetClass, destination_property};

use crate::list::SelectionList;
use crate::x11::Atoms;

/// Window within which a repeated request is answered identically to
/// its predecessor.
pub const SHORT_INTERVAL: Duration = Duration::from_millis(80);

/// Whether we currently own PRIMARY, and since which server timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    NotOwner,
    Owner { since: Timestamp },
}

/// Mode flags the engine's policy depends on, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Answer picks by provoking a fresh request with a synthetic
    /// middle click instead of serving the parked one.
    pub click: bool,
    pub daemon: bool,
    /// Capture every selection another client takes ownership of.
    pub continuous: bool,
}

/// The content of a reply to a selection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Write `bytes` (format 8, type `target`) and notify.
    Payload { bytes: Vec<u8>, target: Atom },
    /// Write the supported-target list (format 32, type ATOM) and notify.
    Targets,
    /// Notify with property `None`.
    Refuse,
}

/// What the caller must do after feeding the engine an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply {
        request: RequestRecord,
        answer: Answer,
    },
    /// Put the chooser menu on screen for the parked request.
    OpenMenu,
    /// Warp the pointer back and fake a middle click so the requestor
    /// asks again.
    SyntheticPaste,
    /// Ask the current owner for its selection.
    CaptureOwner,
    /// Cooperatively terminate once the current transaction resolves.
    ScheduleExit,
}

/// The selection-owner state machine.
#[derive(Debug)]
pub struct ProtocolEngine {
    atoms: Atoms,
    /// Our own top-level window; requests from it are never served.
    own_window: Window,
    config: EngineConfig,
    ownership: Ownership,
    /// The request parked while the user decides. At most one.
    pending: Option<RequestRecord>,
    /// Whether the parked request was fabricated by force mode rather
    /// than received from a requestor. A fabricated pick is answered
    /// directly even in click mode: the synthetic click lands at the
    /// saved pointer position, which has no relation to the focused
    /// window the fabricated request targets.
    pending_fabricated: bool,
    menu_open: bool,
    /// Wall-clock instant of the most recent serve (send or refuse).
    last_served: Option<Instant>,
    /// The answer given at the most recent serve: a list index, or
    /// `None` for a refusal. Replayed by the short-time and firefox
    /// rules.
    last_choice: Option<usize>,
    /// Click mode only: the key the user picked, consumed by the next
    /// inbound request.
    choice: Option<usize>,
    /// Set when the firefox sentinel target was seen; the next
    /// supported request repeats the previous answer.
    firefox: bool,
}

impl ProtocolEngine {
    pub fn new(atoms: Atoms, own_window: Window, config: EngineConfig) -> Self {
        Self {
            atoms,
            own_window,
            config,
            ownership: Ownership::NotOwner,
            pending: None,
            pending_fabricated: false,
            menu_open: false,
            last_served: None,
            last_choice: None,
            choice: None,
            firefox: false,
        }
    }

    // -- Ownership bookkeeping --

    pub fn acquired(&mut self, since: Timestamp) {
        self.ownership = Ownership::Owner { since };
    }

    pub fn disowned(&mut self) {
        self.ownership = Ownership::NotOwner;
    }

    pub fn owns_selection(&self) -> bool {
        matches!(self.ownership, Ownership::Owner { .. })
    }

    // -- Menu visibility, reported by the controller --

    pub fn menu_opened(&mut self) {
        self.menu_open = true;
    }

    pub fn menu_closed(&mut self) {
        self.menu_open = false;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Park a fabricated request against `focus`, as if that window had
    /// asked for STRING. Used when the menu is opened by hotkey and the
    /// pick should be pushed to the focused window anyway. `CurrentTime`
    /// always passes the stale-timestamp check.
    pub fn fabricate_request(&mut self, focus: Window) {
        if self.pending.is_some() {
            return;
        }
        self.pending = Some(RequestRecord {
            requestor: focus,
            selection: self.atoms.PRIMARY,
            target: self.atoms.STRING,
            property: x11rb::NONE,
            time: x11rb::CURRENT_TIME,
        });
        self.pending_fabricated = true;
    }

    /// Feed one inbound `SelectionRequest`. First matching rule wins.
    pub fn handle_request(
        &mut self,
        req: RequestRecord,
        list: &SelectionList,
        now: Instant,
    ) -> Vec<Action> {
        // Never serve ourselves.
        if req.requestor == self.own_window {
            tracing::debug!(requestor = req.requestor, "request from own window, refusing");
            return vec![refusal(req)];
        }

        let class = TargetClass::of(&self.atoms, req.target);

        // TARGETS is answered immediately and does not count as a serve.
        if class == TargetClass::Targets {
            return vec![Action::Reply {
                request: req,
                answer: Answer::Targets,
            }];
        }

        // The sentinel conversion means firefox's paste timeout already
        // expired; remember to repeat the answer on its next request.
        if !self.config.click && class == TargetClass::MozSentinel {
            tracing::warn!(requestor = req.requestor, "firefox sentinel target, latching");
            self.firefox = true;
        }

        if !class.is_sendable() {
            tracing::debug!(atom = req.target, "unsupported target, refusing");
            return vec![refusal(req)];
        }

        // The user is still deciding for an earlier request.
        if self.menu_open {
            tracing::debug!(requestor = req.requestor, "menu busy, refusing");
            return vec![refusal(req)];
        }

        if self.firefox {
            tracing::debug!("second firefox request, repeating previous answer");
            self.firefox = false;
            self.last_served = Some(now);
            let answer = self.answer_for(self.last_choice, list, &req);
            return vec![Action::Reply {
                request: req,
                answer,
            }];
        }

        // Click mode: the user already picked; this is the request the
        // synthetic middle click provoked.
        if self.config.click
            && let Some(key) = self.choice.take()
        {
            self.pending = None;
            self.pending_fabricated = false;
            self.last_choice = Some(key);
            self.last_served = Some(now);
            let answer = self.answer_for(Some(key), list, &req);
            return vec![Action::Reply {
                request: req,
                answer,
            }];
        }

        // A request right on the heels of the previous serve gets the
        // same answer, whatever it was.
        if let Some(at) = self.last_served
            && now.duration_since(at) <= SHORT_INTERVAL
        {
            tracing::debug!("short time, repeating previous answer");
            self.last_served = Some(now);
            let answer = self.answer_for(self.last_choice, list, &req);
            return vec![Action::Reply {
                request: req,
                answer,
            }];
        }

        // Park the request and ask the user. In click mode the parked
        // request is refused right away; the payload rides on the fresh
        // request the synthetic click will provoke.
        self.pending = Some(req);
        self.pending_fabricated = false;
        let mut actions = Vec::new();
        if self.config.click {
            actions.push(refusal(req));
        }
        actions.push(Action::OpenMenu);
        actions
    }

    /// The user picked entry `key`, or cancelled (`None`). Serves the
    /// parked request, or arms the synthetic-click path in click mode.
    /// A fabricated request is always served directly: it must reach
    /// the focused window it was built against, not whatever sits
    /// under the pointer.
    pub fn serve_pick(
        &mut self,
        key: Option<usize>,
        list: &SelectionList,
        now: Instant,
    ) -> Vec<Action> {
        let Some(req) = self.pending.take() else {
            return Vec::new();
        };
        let fabricated = self.pending_fabricated;
        self.pending_fabricated = false;
        self.last_choice = key;
        self.last_served = Some(now);
        if self.config.click && !fabricated {
            self.choice = key;
            return match key {
                Some(_) => vec![Action::SyntheticPaste],
                // The parked request was already refused on arrival;
                // nothing more is owed.
                None => Vec::new(),
            };
        }
        let answer = self.answer_for(key, list, &req);
        vec![Action::Reply {
            request: req,
            answer,
        }]
    }

    /// Another client took (or was given) the selection.
    pub fn handle_clear(&mut self) -> Vec<Action> {
        if !self.owns_selection() {
            // A clear can trail our own disown; nothing changes.
            return Vec::new();
        }
        self.ownership = Ownership::NotOwner;
        if self.config.continuous {
            vec![Action::CaptureOwner]
        } else if !self.config.daemon {
            vec![Action::ScheduleExit]
        } else {
            Vec::new()
        }
    }

    /// Build the answer for a previously or currently chosen key.
    fn answer_for(&self, key: Option<usize>, list: &SelectionList, req: &RequestRecord) -> Answer {
        let Some(key) = key else {
            return Answer::Refuse;
        };
        let Some(view) = list.view(key) else {
            // The list shrank since the choice was recorded.
            return Answer::Refuse;
        };
        if self.request_predates_ownership(req.time) {
            tracing::debug!(time = req.time, "request predates ownership, refusing");
            return Answer::Refuse;
        }
        Answer::Payload {
            bytes: view.payload.to_vec(),
            target: req.target,
        }
    }

    fn request_predates_ownership(&self, time: Timestamp) -> bool {
        match self.ownership {
            Ownership::Owner { since } => time != x11rb::CURRENT_TIME && time < since,
            Ownership::NotOwner => false,
        }
    }
}

fn refusal(request: RequestRecord) -> Action {
    Action::Reply {
        request,
        answer: Answer::Refuse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x11::test_atoms;

    const OWN_WINDOW: Window = 0x400001;
    const REQUESTOR: Window = 0x500002;

    fn engine(config: EngineConfig) -> ProtocolEngine {
        let mut e = ProtocolEngine::new(test_atoms(), OWN_WINDOW, config);
        e.acquired(1000);
        e
    }

    fn interactive() -> ProtocolEngine {
        engine(EngineConfig {
            click: false,
            daemon: false,
            continuous: false,
        })
    }

    fn click_mode() -> ProtocolEngine {
        engine(EngineConfig {
            click: true,
            daemon: false,
            continuous: false,
        })
    }

    fn list_of(items: &[&str]) -> SelectionList {
        let mut l = SelectionList::new(None);
        for s in items {
            assert!(l.add((*s).to_string()));
        }
        l
    }

    fn string_request() -> RequestRecord {
        RequestRecord {
            requestor: REQUESTOR,
            selection: test_atoms().PRIMARY,
            target: test_atoms().STRING,
            property: 0x600003,
            time: 2000,
        }
    }

    fn request_with_target(target: Atom) -> RequestRecord {
        RequestRecord {
            target,
            ..string_request()
        }
    }

    fn payload(actions: &[Action]) -> Option<&[u8]> {
        match actions {
            [
                Action::Reply {
                    answer: Answer::Payload { bytes, .. },
                    ..
                },
            ] => Some(bytes.as_slice()),
            _ => None,
        }
    }

    fn is_single_refusal(actions: &[Action]) -> bool {
        matches!(
            actions,
            [Action::Reply {
                answer: Answer::Refuse,
                ..
            }]
        )
    }

    // -- Decision tree: terminal rules --

    #[test]
    fn request_from_own_window_is_refused() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let req = RequestRecord {
            requestor: OWN_WINDOW,
            ..string_request()
        };
        let actions = e.handle_request(req, &list, Instant::now());
        assert!(is_single_refusal(&actions));
        assert!(!e.has_pending());
    }

    #[test]
    fn targets_is_answered_immediately() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let req = request_with_target(test_atoms().TARGETS);
        let actions = e.handle_request(req, &list, Instant::now());
        assert_eq!(
            actions,
            vec![Action::Reply {
                request: req,
                answer: Answer::Targets,
            }]
        );
    }

    #[test]
    fn targets_does_not_update_last_served() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        e.handle_request(
            request_with_target(test_atoms().TARGETS),
            &list,
            Instant::now(),
        );
        // A STRING request afterwards must open the menu, not hit the
        // short-time repeat.
        let actions = e.handle_request(string_request(), &list, Instant::now());
        assert_eq!(actions, vec![Action::OpenMenu]);
    }

    #[test]
    fn unsupported_target_is_refused() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let actions = e.handle_request(request_with_target(0xdead), &list, Instant::now());
        assert!(is_single_refusal(&actions));
    }

    #[test]
    fn request_while_menu_open_is_refused() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        e.handle_request(string_request(), &list, Instant::now());
        e.menu_opened();
        let actions = e.handle_request(string_request(), &list, Instant::now());
        assert!(is_single_refusal(&actions));
        // The parked request is untouched.
        assert!(e.has_pending());
    }

    // -- Parking and serving --

    #[test]
    fn first_request_opens_menu() {
        let mut e = interactive();
        let list = list_of(&["foo", "bar"]);
        let actions = e.handle_request(string_request(), &list, Instant::now());
        assert_eq!(actions, vec![Action::OpenMenu]);
        assert!(e.has_pending());
    }

    #[test]
    fn pick_sends_chosen_payload() {
        let mut e = interactive();
        let list = list_of(&["foo", "bar"]);
        let now = Instant::now();
        e.handle_request(string_request(), &list, now);
        e.menu_opened();
        e.menu_closed();
        let actions = e.serve_pick(Some(1), &list, now);
        assert_eq!(payload(&actions), Some(b"bar".as_slice()));
        assert!(!e.has_pending());
    }

    #[test]
    fn pick_echoes_request_fields() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let req = string_request();
        let now = Instant::now();
        e.handle_request(req, &list, now);
        let actions = e.serve_pick(Some(0), &list, now);
        match &actions[..] {
            [Action::Reply { request, answer }] => {
                assert_eq!(*request, req);
                assert_eq!(
                    *answer,
                    Answer::Payload {
                        bytes: b"foo".to_vec(),
                        target: req.target,
                    }
                );
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn cancel_refuses_parked_request() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let now = Instant::now();
        e.handle_request(string_request(), &list, now);
        let actions = e.serve_pick(None, &list, now);
        assert!(is_single_refusal(&actions));
        assert!(!e.has_pending());
    }

    #[test]
    fn pick_without_pending_does_nothing() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        assert!(e.serve_pick(Some(0), &list, Instant::now()).is_empty());
    }

    #[test]
    fn pick_of_vanished_entry_is_refused() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let now = Instant::now();
        e.handle_request(string_request(), &list, now);
        let actions = e.serve_pick(Some(5), &list, now);
        assert!(is_single_refusal(&actions));
    }

    // -- Short-time repeat --

    #[test]
    fn repeat_within_window_sends_same_payload() {
        let mut e = interactive();
        let list = list_of(&["foo", "bar"]);
        let t0 = Instant::now();
        e.handle_request(string_request(), &list, t0);
        let first = e.serve_pick(Some(1), &list, t0);
        let retry = e.handle_request(string_request(), &list, t0 + Duration::from_millis(50));
        assert_eq!(payload(&first), payload(&retry));
        assert_eq!(payload(&retry), Some(b"bar".as_slice()));
    }

    #[test]
    fn repeat_within_window_repeats_refusal() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let t0 = Instant::now();
        e.handle_request(string_request(), &list, t0);
        e.serve_pick(None, &list, t0);
        let retry = e.handle_request(string_request(), &list, t0 + Duration::from_millis(50));
        assert!(is_single_refusal(&retry));
    }

    #[test]
    fn request_after_window_opens_menu_again() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let t0 = Instant::now();
        e.handle_request(string_request(), &list, t0);
        e.serve_pick(Some(0), &list, t0);
        let later = e.handle_request(string_request(), &list, t0 + Duration::from_millis(200));
        assert_eq!(later, vec![Action::OpenMenu]);
    }

    #[test]
    fn repeat_window_slides_forward() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let t0 = Instant::now();
        e.handle_request(string_request(), &list, t0);
        e.serve_pick(Some(0), &list, t0);
        // Each repeat renews the window, so a chain of fast retries is
        // absorbed even when the chain outlasts one interval.
        let t1 = t0 + Duration::from_millis(60);
        assert!(payload(&e.handle_request(string_request(), &list, t1)).is_some());
        let t2 = t1 + Duration::from_millis(60);
        assert!(payload(&e.handle_request(string_request(), &list, t2)).is_some());
    }

    // -- Stale timestamps --

    #[test]
    fn request_predating_ownership_is_refused() {
        let mut e = interactive();
        e.acquired(5000);
        let list = list_of(&["foo"]);
        let req = RequestRecord {
            time: 4000,
            ..string_request()
        };
        let now = Instant::now();
        e.handle_request(req, &list, now);
        let actions = e.serve_pick(Some(0), &list, now);
        assert!(is_single_refusal(&actions));
    }

    #[test]
    fn current_time_is_always_valid() {
        let mut e = interactive();
        e.acquired(5000);
        let list = list_of(&["foo"]);
        let req = RequestRecord {
            time: x11rb::CURRENT_TIME,
            ..string_request()
        };
        let now = Instant::now();
        e.handle_request(req, &list, now);
        let actions = e.serve_pick(Some(0), &list, now);
        assert_eq!(payload(&actions), Some(b"foo".as_slice()));
    }

    // -- Firefox latch --

    #[test]
    fn sentinel_latches_and_is_refused() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let actions = e.handle_request(
            request_with_target(test_atoms().TEXT_MOZ_INTERNAL),
            &list,
            Instant::now(),
        );
        assert!(is_single_refusal(&actions));
        assert!(e.firefox);
    }

    #[test]
    fn second_firefox_request_repeats_chosen_payload() {
        let mut e = interactive();
        let list = list_of(&["foo", "bar"]);
        let t0 = Instant::now();
        // Normal interaction: user picks "bar".
        e.handle_request(string_request(), &list, t0);
        e.serve_pick(Some(1), &list, t0);
        // Firefox's paste loop timed out; it asks for its sentinel.
        let t1 = t0 + Duration::from_secs(1);
        e.handle_request(request_with_target(test_atoms().TEXT_MOZ_INTERNAL), &list, t1);
        // Its follow-up STRING request gets the previous answer without
        // reopening the menu.
        let actions = e.handle_request(string_request(), &list, t1 + Duration::from_millis(10));
        assert_eq!(payload(&actions), Some(b"bar".as_slice()));
        assert!(!e.firefox);
    }

    #[test]
    fn sentinel_is_ignored_in_click_mode() {
        let mut e = click_mode();
        let list = list_of(&["foo"]);
        e.handle_request(
            request_with_target(test_atoms().TEXT_MOZ_INTERNAL),
            &list,
            Instant::now(),
        );
        assert!(!e.firefox);
    }

    // -- Click mode --

    #[test]
    fn click_mode_refuses_parked_request_immediately() {
        let mut e = click_mode();
        let list = list_of(&["foo"]);
        let req = string_request();
        let actions = e.handle_request(req, &list, Instant::now());
        assert_eq!(
            actions,
            vec![
                Action::Reply {
                    request: req,
                    answer: Answer::Refuse,
                },
                Action::OpenMenu,
            ]
        );
        assert!(e.has_pending());
    }

    #[test]
    fn click_mode_pick_arms_synthetic_paste() {
        let mut e = click_mode();
        let list = list_of(&["foo", "bar"]);
        let now = Instant::now();
        e.handle_request(string_request(), &list, now);
        let actions = e.serve_pick(Some(1), &list, now);
        assert_eq!(actions, vec![Action::SyntheticPaste]);
    }

    #[test]
    fn click_mode_provoked_request_gets_chosen_payload() {
        let mut e = click_mode();
        let list = list_of(&["foo", "bar"]);
        let t0 = Instant::now();
        e.handle_request(string_request(), &list, t0);
        e.menu_opened();
        e.menu_closed();
        e.serve_pick(Some(1), &list, t0);
        // The synthetic middle click provokes a fresh request.
        let actions = e.handle_request(string_request(), &list, t0 + Duration::from_millis(5));
        assert_eq!(payload(&actions), Some(b"bar".as_slice()));
        assert!(!e.has_pending());
    }

    #[test]
    fn click_mode_choice_is_consumed_once() {
        let mut e = click_mode();
        let list = list_of(&["foo", "bar"]);
        let t0 = Instant::now();
        e.handle_request(string_request(), &list, t0);
        e.serve_pick(Some(1), &list, t0);
        e.handle_request(string_request(), &list, t0 + Duration::from_millis(5));
        // A second provoked-style request falls into the short-time
        // repeat, not the choice path.
        assert!(e.choice.is_none());
        let retry = e.handle_request(string_request(), &list, t0 + Duration::from_millis(10));
        assert_eq!(payload(&retry), Some(b"bar".as_slice()));
    }

    #[test]
    fn click_mode_cancel_owes_nothing() {
        let mut e = click_mode();
        let list = list_of(&["foo"]);
        let now = Instant::now();
        e.handle_request(string_request(), &list, now);
        let actions = e.serve_pick(None, &list, now);
        assert!(actions.is_empty());
        // Retries right after the cancel repeat the refusal.
        let retry = e.handle_request(string_request(), &list, now + Duration::from_millis(20));
        assert!(is_single_refusal(&retry));
    }

    // -- SelectionClear --

    #[test]
    fn clear_schedules_exit_outside_daemon_mode() {
        let mut e = interactive();
        assert_eq!(e.handle_clear(), vec![Action::ScheduleExit]);
        assert!(!e.owns_selection());
    }

    #[test]
    fn clear_keeps_daemon_alive() {
        let mut e = engine(EngineConfig {
            click: false,
            daemon: true,
            continuous: false,
        });
        assert!(e.handle_clear().is_empty());
    }

    #[test]
    fn clear_in_continuous_mode_captures_new_owner() {
        let mut e = engine(EngineConfig {
            click: false,
            daemon: true,
            continuous: true,
        });
        assert_eq!(e.handle_clear(), vec![Action::CaptureOwner]);
    }

    #[test]
    fn clear_after_disown_is_ignored() {
        let mut e = interactive();
        e.disowned();
        assert!(e.handle_clear().is_empty());
    }

    // -- Fabricated requests --

    #[test]
    fn fabricated_request_is_served_through_send_path() {
        let mut e = interactive();
        e.acquired(5000);
        let list = list_of(&["foo"]);
        e.fabricate_request(0x700004);
        let actions = e.serve_pick(Some(0), &list, Instant::now());
        match &actions[..] {
            [Action::Reply { request, answer }] => {
                assert_eq!(request.requestor, 0x700004);
                assert_eq!(request.property, x11rb::NONE);
                // CurrentTime passes the stale check.
                assert_eq!(
                    *answer,
                    Answer::Payload {
                        bytes: b"foo".to_vec(),
                        target: test_atoms().STRING,
                    }
                );
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn fabricated_pick_in_click_mode_replies_directly() {
        // The default force-mode configuration: click mode on, menu
        // opened by hotkey. The pick must reach the focused window the
        // request was built against, not ride on a synthetic click.
        let mut e = click_mode();
        e.acquired(5000);
        let list = list_of(&["foo"]);
        e.fabricate_request(0x700004);
        let actions = e.serve_pick(Some(0), &list, Instant::now());
        match &actions[..] {
            [Action::Reply { request, answer }] => {
                assert_eq!(request.requestor, 0x700004);
                assert_eq!(
                    *answer,
                    Answer::Payload {
                        bytes: b"foo".to_vec(),
                        target: test_atoms().STRING,
                    }
                );
            }
            other => panic!("unexpected actions: {other:?}"),
        }
        // No click is armed; a later real request must not be hijacked.
        assert!(e.choice.is_none());
    }

    #[test]
    fn fabricated_cancel_in_click_mode_sends_refusal() {
        let mut e = click_mode();
        let list = list_of(&["foo"]);
        e.fabricate_request(0x700004);
        let actions = e.serve_pick(None, &list, Instant::now());
        assert!(is_single_refusal(&actions));
        assert!(e.choice.is_none());
    }

    #[test]
    fn real_request_after_fabricated_serve_uses_synthetic_click() {
        let mut e = click_mode();
        e.acquired(5000);
        let list = list_of(&["foo"]);
        e.fabricate_request(0x700004);
        e.serve_pick(Some(0), &list, Instant::now());
        // The fabricated flag must not leak onto the next parked
        // request.
        let t1 = Instant::now() + Duration::from_millis(200);
        e.handle_request(string_request(), &list, t1);
        let actions = e.serve_pick(Some(0), &list, t1);
        assert_eq!(actions, vec![Action::SyntheticPaste]);
    }

    #[test]
    fn fabricate_does_not_displace_parked_request() {
        let mut e = interactive();
        let list = list_of(&["foo"]);
        let req = string_request();
        e.handle_request(req, &list, Instant::now());
        e.fabricate_request(0x700004);
        assert_eq!(e.pending, Some(req));
        assert!(!e.pending_fabricated);
    }

    // -- Payload separator interplay --

    #[test]
    fn payload_respects_separator() {
        let mut e = interactive();
        let mut list = SelectionList::new(Some(b':'));
        list.add("k: v".into());
        let now = Instant::now();
        e.handle_request(string_request(), &list, now);
        let actions = e.serve_pick(Some(0), &list, now);
        assert_eq!(payload(&actions), Some(b" v".as_slice()));
    }
}
