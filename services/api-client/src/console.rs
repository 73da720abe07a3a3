//! Terminal notification sink
//!
//! Renders dispatcher notifications as one-line toasts on stderr, keeping
//! stdout free for response bodies.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use dispatcher::{Notification, NotificationKind, NotificationSink};

pub struct ConsoleSink<W> {
    out: Mutex<W>,
}

impl ConsoleSink<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> NotificationSink for ConsoleSink<W> {
    fn notify(&self, notification: Notification) {
        let tag = match notification.kind {
            NotificationKind::Success => "ok",
            NotificationKind::Error => "error",
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // Fire-and-forget: a closed terminal must not fail the request.
        let _ = writeln!(out, "[{tag}] {}", notification.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_notification() {
        let sink = ConsoleSink::new(Vec::new());
        sink.notify(Notification::success("Match created"));
        sink.notify(Notification::error("Unable to reach the server."));

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "[ok] Match created\n[error] Unable to reach the server.\n");
    }
}
