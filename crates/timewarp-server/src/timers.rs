//! Timer primitives for server callbacks.
//!
//! These dispatch through the ambient time backend, so the same callback
//! module works under real or virtual time. The loop thread installs its
//! own mailbox address before `init`, which is what makes
//! [`schedule_self_after`] work without threading a context parameter
//! through every callback.

use std::cell::RefCell;

use timewarp_clock::{CancelOutcome, MailboxSender, backend};
use timewarp_types::{Payload, TimerRef};

use crate::error::{Result, ServerError};

thread_local! {
    static SELF_ADDRESS: RefCell<Option<MailboxSender>> = const { RefCell::new(None) };
}

pub(crate) fn set_self_address(sender: Option<MailboxSender>) {
    SELF_ADDRESS.with(|cell| *cell.borrow_mut() = sender);
}

/// The mailbox address of the server loop running on this thread, if any.
pub fn self_address() -> Option<MailboxSender> {
    SELF_ADDRESS.with(|cell| cell.borrow().clone())
}

/// Schedules `payload` to `target` after `delay_ms` via the ambient backend.
pub fn schedule_after(
    target: &MailboxSender,
    payload: Payload,
    delay_ms: u64,
) -> Result<TimerRef> {
    Ok(backend::schedule_after(target, payload, delay_ms)?)
}

/// Schedules `payload` to the current server's own mailbox.
///
/// Fails with [`ServerError::OutsideServer`] when called from a thread
/// that is not running a server loop.
pub fn schedule_self_after(payload: Payload, delay_ms: u64) -> Result<TimerRef> {
    let target = self_address().ok_or(ServerError::OutsideServer)?;
    schedule_after(&target, payload, delay_ms)
}

/// Cancels a timer issued by the ambient backend.
pub fn cancel(timer: TimerRef) -> CancelOutcome {
    backend::cancel(timer)
}

/// Suspends the calling task via the ambient backend.
pub fn sleep(delay_ms: u64) -> Result<()> {
    Ok(backend::sleep(delay_ms)?)
}
