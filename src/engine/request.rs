//! Owned selection-request records and target classification.
//!
//! The engine keeps a copy of each `SelectionRequestEvent` rather than
//! a borrow, so the X event buffer can be reused while a request is
//! parked waiting for the user.

use x11rb::protocol::xproto::{Atom, SelectionRequestEvent, Timestamp, Window};

use crate::x11::Atoms;

/// An inbound selection request, detached from the X event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    /// Destination property named by the requestor; `x11rb::NONE` for
    /// obsolete clients that leave it unset.
    pub property: Atom,
    pub time: Timestamp,
}

impl RequestRecord {
    pub fn from_event(ev: &SelectionRequestEvent) -> Self {
        Self {
            requestor: ev.requestor,
            selection: ev.selection,
            target: ev.target,
            property: ev.property,
            time: ev.time,
        }
    }
}

/// What kind of conversion a request's target atom asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClass {
    /// Latin-1 text (`STRING`).
    Text,
    /// UTF-8 text (`UTF8_STRING`).
    Utf8,
    /// The list of supported targets (`TARGETS`).
    Targets,
    /// `text/x-moz-text-internal`, the request firefox emits after its
    /// internal paste timeout expires.
    MozSentinel,
    Unsupported,
}

impl TargetClass {
    pub fn of(atoms: &Atoms, target: Atom) -> Self {
        if target == atoms.STRING {
            Self::Text
        } else if target == atoms.UTF8_STRING {
            Self::Utf8
        } else if target == atoms.TARGETS {
            Self::Targets
        } else if target == atoms.TEXT_MOZ_INTERNAL {
            Self::MozSentinel
        } else {
            Self::Unsupported
        }
    }

    /// Whether a payload can be sent for this target.
    pub fn is_sendable(self) -> bool {
        matches!(self, Self::Text | Self::Utf8)
    }
}

/// The property a reply is written to: the one the requestor named,
/// falling back to the target atom for obsolete clients, and to
/// `_XT_SELECTION_1` for ancient Xt clients that set neither.
pub fn destination_property(atoms: &Atoms, request: &RequestRecord) -> Atom {
    if request.property != x11rb::NONE {
        request.property
    } else if request.target != x11rb::NONE {
        request.target
    } else {
        atoms.XT_SELECTION_1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x11::test_atoms;

    fn record(target: Atom, property: Atom) -> RequestRecord {
        RequestRecord {
            requestor: 0x500000,
            selection: test_atoms().PRIMARY,
            target,
            property,
            time: 1000,
        }
    }

    // -- Classification --

    #[test]
    fn classify_known_targets() {
        let atoms = test_atoms();
        assert_eq!(TargetClass::of(&atoms, atoms.STRING), TargetClass::Text);
        assert_eq!(TargetClass::of(&atoms, atoms.UTF8_STRING), TargetClass::Utf8);
        assert_eq!(TargetClass::of(&atoms, atoms.TARGETS), TargetClass::Targets);
        assert_eq!(
            TargetClass::of(&atoms, atoms.TEXT_MOZ_INTERNAL),
            TargetClass::MozSentinel
        );
    }

    #[test]
    fn classify_unknown_target() {
        let atoms = test_atoms();
        assert_eq!(TargetClass::of(&atoms, 0xdead), TargetClass::Unsupported);
    }

    #[test]
    fn only_text_targets_are_sendable() {
        assert!(TargetClass::Text.is_sendable());
        assert!(TargetClass::Utf8.is_sendable());
        assert!(!TargetClass::Targets.is_sendable());
        assert!(!TargetClass::MozSentinel.is_sendable());
        assert!(!TargetClass::Unsupported.is_sendable());
    }

    // -- Destination property --

    #[test]
    fn destination_prefers_named_property() {
        let atoms = test_atoms();
        let req = record(atoms.STRING, 0x77);
        assert_eq!(destination_property(&atoms, &req), 0x77);
    }

    #[test]
    fn destination_falls_back_to_target() {
        let atoms = test_atoms();
        let req = record(atoms.STRING, x11rb::NONE);
        assert_eq!(destination_property(&atoms, &req), atoms.STRING);
    }

    #[test]
    fn destination_falls_back_to_xt_property() {
        let atoms = test_atoms();
        let req = record(x11rb::NONE, x11rb::NONE);
        assert_eq!(destination_property(&atoms, &req), atoms.XT_SELECTION_1);
    }
}
