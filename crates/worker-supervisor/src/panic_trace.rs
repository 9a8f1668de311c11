//! Captures a backtrace for panics so the supervisor can log where a worker
//! blew up. The payload caught by `catch_unwind` carries no stack, so the
//! hook stashes one in a thread-local that the catching frame (same thread,
//! same poll) takes right after the unwind.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

pub(crate) fn install() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture();
            let _ = LAST_TRACE.try_with(|slot| {
                *slot.borrow_mut() = Some(format!("{info}\n{trace}"));
            });
            previous(info);
        }));
    });
}

pub(crate) fn take() -> Option<String> {
    LAST_TRACE.try_with(|slot| slot.borrow_mut().take()).ok().flatten()
}

pub(crate) fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
