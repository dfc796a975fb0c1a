//! Status progression: `sent -> delivered -> read`, never backwards.

use crate::models::MessageStatus;

/// Outcome of an [`advance`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub status: MessageStatus,
    pub changed: bool,
}

/// Apply `target` to a message currently at `current`.
///
/// `delivered` is only accepted from `sent`; `read` is accepted from `sent`
/// or `delivered`. Anything else leaves the status as it is.
pub fn advance(current: MessageStatus, target: MessageStatus) -> Advance {
    let accepted = match target {
        MessageStatus::Delivered => current == MessageStatus::Sent,
        MessageStatus::Read => current < MessageStatus::Read,
        MessageStatus::Sent => false,
    };

    if accepted {
        Advance {
            status: target,
            changed: true,
        }
    } else {
        Advance {
            status: current,
            changed: false,
        }
    }
}
