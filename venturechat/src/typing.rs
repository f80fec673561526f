//! Outbound typing-indicator debouncing.
//!
//! Every keystroke emits `typing(true)` toward the current counterpart and
//! re-arms a single trailing timer; when the timer survives the quiet
//! period uncancelled it emits `typing(false)`. Switching counterparts
//! aborts the previous timer without a spurious stop signal, since the
//! gateway scopes typing state per sender anyway.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use venturechat_proto::identity::Identity;

/// A typing emission toward the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingEmit {
    /// The counterpart being notified.
    pub counterpart: Identity,
    /// `true` on keystroke, `false` when the quiet period elapses.
    pub is_typing: bool,
}

/// Debounces keystrokes into start/stop typing signals.
#[derive(Debug)]
pub struct TypingDebouncer {
    quiet_period: Duration,
    emit_tx: mpsc::Sender<TypingEmit>,
    active: Option<(Identity, JoinHandle<()>)>,
}

impl TypingDebouncer {
    /// Creates a debouncer emitting through the given channel.
    #[must_use]
    pub const fn new(quiet_period: Duration, emit_tx: mpsc::Sender<TypingEmit>) -> Self {
        Self {
            quiet_period,
            emit_tx,
            active: None,
        }
    }

    /// Registers a keystroke toward `counterpart`.
    ///
    /// Emits `typing(true)` immediately and re-arms the trailing stop
    /// timer. A pending timer for a different counterpart is silently
    /// aborted.
    pub async fn on_input(&mut self, counterpart: Identity) {
        self.abort_timer();
        if self
            .emit_tx
            .send(TypingEmit {
                counterpart,
                is_typing: true,
            })
            .await
            .is_err()
        {
            return;
        }
        let emit_tx = self.emit_tx.clone();
        let quiet = self.quiet_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            trace!(counterpart = %counterpart, "typing quiet period elapsed");
            let _ = emit_tx
                .send(TypingEmit {
                    counterpart,
                    is_typing: false,
                })
                .await;
        });
        self.active = Some((counterpart, handle));
    }

    /// Stops typing immediately, emitting `typing(false)` if a timer was
    /// armed. Used when a message is sent (the composer is now empty).
    pub async fn stop_now(&mut self) {
        if let Some((counterpart, handle)) = self.active.take() {
            handle.abort();
            let _ = self
                .emit_tx
                .send(TypingEmit {
                    counterpart,
                    is_typing: false,
                })
                .await;
        }
    }

    /// Aborts any armed timer without emitting anything.
    pub fn abort_timer(&mut self) {
        if let Some((_, handle)) = self.active.take() {
            handle.abort();
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.abort_timer();
    }
}
