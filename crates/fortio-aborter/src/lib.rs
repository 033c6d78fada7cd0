//! The race-free cancellation primitive shared by a run and its watchers.
//!
//! Two independent `crossbeam_channel`s carry two distinct events: `stop`
//! must *broadcast* (every waiter unblocks simultaneously, exactly once),
//! `start` must *rendezvous* (a single token handed off, twice over a run's
//! lifetime: once to mark dispatch-loop entry, once to mark full
//! completion). Don't collapse them into one channel - broadcast and
//! rendezvous have incompatible semantics.
//!
//! The broadcast is implemented by *dropping* the stop sender: once every
//! clone of a `crossbeam_channel` sender is gone, every existing and future
//! `recv()` on every clone of the receiver returns `Err` immediately.

use std::sync::Arc;

use crossbeam_channel::{
    bounded,
    Receiver,
    Sender,
};
use parking_lot::Mutex;

struct State {
    has_started: bool,
    stop_requested: bool,
}

/// Shared, reference-counted; never copied. Clone an `Aborter` to hand it to
/// a watcher thread or an external canceller — all clones observe the same
/// underlying state.
#[derive(Clone)]
pub struct Aborter {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    start_tx: Sender<()>,
    start_rx: Receiver<()>,
}

impl Default for Aborter {
    fn default() -> Self {
        Self::new()
    }
}

impl Aborter {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (start_tx, start_rx) = bounded::<()>(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    has_started: false,
                    stop_requested: false,
                }),
                stop_tx: Mutex::new(Some(stop_tx)),
                stop_rx,
                start_tx,
                start_rx,
            }),
        }
    }

    /// A receiver that yields `Err` once this Aborter is (or becomes)
    /// cancelled. Clone freely; every clone observes the same close.
    pub fn stop_receiver(&self) -> Receiver<()> {
        self.inner.stop_rx.clone()
    }

    /// Called by the runner immediately before entering its dispatch loop.
    /// Returns a snapshot of the stop receiver and whether an abort was
    /// already requested before the run started.
    pub fn record_start(&self) -> (Receiver<()>, bool) {
        let mut state = self.inner.state.lock();
        state.has_started = true;
        let _ = self.inner.start_tx.try_send(());
        (self.inner.stop_rx.clone(), state.stop_requested)
    }

    /// Called once by the runner's completion path, after all dispatch has
    /// stopped: hands a second token through `start` so an external
    /// `Abort(wait=true)` caller blocked past "the run started" can also
    /// observe "the run fully ended".
    pub fn record_end(&self) {
        let _ = self.inner.start_tx.try_send(());
    }

    /// Signal cancellation. If `wait` is true and the run hasn't started
    /// yet, blocks until it does before closing the stop channel - this
    /// guarantees a late `RecordStart` still observes `should_abort = true`
    /// instead of racing past it.
    pub fn abort(&self, wait: bool) {
        let mut state = self.inner.state.lock();
        let mut stop_tx = self.inner.stop_tx.lock();
        if stop_tx.is_none() {
            // Already cancelled.
            return;
        }
        state.stop_requested = true;
        if state.has_started || !wait {
            stop_tx.take();
            if state.has_started {
                while self.inner.start_rx.try_recv().is_ok() {}
                state.has_started = false;
            }
            return;
        }
        drop(stop_tx);
        drop(state);
        let _ = self.inner.start_rx.recv();
        let mut stop_tx = self.inner.stop_tx.lock();
        stop_tx.take();
    }

    /// For unit-test reuse: drains any pending start token and clears the
    /// flags. Does not recreate an already-closed stop channel - construct a
    /// fresh `Aborter` for that.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        while self.inner.start_rx.try_recv().is_ok() {}
        state.has_started = false;
        state.stop_requested = false;
    }

    /// True once `abort` has closed the stop channel.
    pub fn is_closed(&self) -> bool {
        self.inner.stop_tx.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn abort_no_wait_is_idempotent() {
        let a = Aborter::new();
        a.abort(false);
        a.abort(false);
        a.abort(false);
        assert!(a.is_closed());
    }

    #[test]
    fn record_start_after_abort_sees_should_abort() {
        let a = Aborter::new();
        a.abort(false);
        let (_rx, should_abort) = a.record_start();
        assert!(should_abort);
    }

    #[test]
    fn stop_receiver_unblocks_all_clones_on_abort() {
        let a = Aborter::new();
        let rx1 = a.stop_receiver();
        let rx2 = a.stop_receiver();
        a.abort(false);
        assert!(rx1.recv().is_err());
        assert!(rx2.recv().is_err());
    }

    #[test]
    fn abort_wait_blocks_until_started_then_closes() {
        let a = Aborter::new();
        let a2 = a.clone();
        let aborter_thread = thread::spawn(move || {
            a2.abort(true);
        });
        // Give the aborter thread a chance to block on start_rx.
        thread::sleep(Duration::from_millis(20));
        assert!(!a.is_closed());
        let (_rx, should_abort) = a.record_start();
        assert!(should_abort);
        aborter_thread.join().unwrap();
        assert!(a.is_closed());
    }

    #[test]
    fn reset_allows_a_second_record_start() {
        let a = Aborter::new();
        let (_rx, should_abort) = a.record_start();
        assert!(!should_abort);
        a.reset();
        let (_rx, should_abort) = a.record_start();
        assert!(!should_abort);
    }

    #[test]
    fn record_end_delivers_second_token_after_wait_abort() {
        let a = Aborter::new();
        let (_rx, _) = a.record_start();
        // Drain the "started" token like Abort(wait=true) would.
        let _ = a.inner.start_rx.try_recv();
        a.record_end();
        assert!(a.inner.start_rx.try_recv().is_ok());
    }
}
