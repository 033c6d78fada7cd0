//! Process-wide SIGINT coordination shared by every outstanding run (spec
//! §4.5 "Normalization" watcher thread, §6.3, §9 "Watcher thread / signal
//! coupling").
//!
//! `ctrlc::set_handler` accepts exactly one installation for the life of the
//! process, so the handler is installed lazily on first use and left in
//! place forever; what varies over time is *which* channel it closes. Each
//! "generation" of outstanding runs shares one zero-capacity interrupt
//! channel; firing the signal drops that channel's sender (the same
//! close-once broadcast trick as [`fortio_aborter::Aborter`]), waking every
//! watcher thread currently selecting on it. Once the last watcher of a
//! generation exits, the next `watch()` call rearms a fresh channel.

use std::sync::OnceLock;

use crossbeam_channel::{
    bounded,
    Receiver,
    Sender,
};
use fortio_aborter::Aborter;
use parking_lot::Mutex;

struct EngineState {
    outstanding: usize,
    interrupt_tx: Option<Sender<()>>,
    interrupt_rx: Receiver<()>,
}

pub struct Engine {
    state: Mutex<EngineState>,
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

impl Engine {
    fn global() -> &'static Engine {
        ENGINE.get_or_init(|| {
            let (tx, rx) = bounded::<()>(0);
            let _ = ctrlc::set_handler(Engine::fire_interrupt);
            Engine {
                state: Mutex::new(EngineState {
                    outstanding: 0,
                    interrupt_tx: Some(tx),
                    interrupt_rx: rx,
                }),
            }
        })
    }

    fn fire_interrupt() {
        let mut state = Self::global().state.lock();
        state.interrupt_tx.take();
    }

    /// Registers one outstanding run and spawns a watcher thread that
    /// translates a process-wide SIGINT into `run_stop.abort(false)`. The
    /// watcher exits quietly (without touching the interrupt channel) if
    /// `run_stop` is cancelled for any other reason first.
    pub fn watch(run_stop: Aborter) {
        let engine = Self::global();
        let interrupt_rx = {
            let mut state = engine.state.lock();
            if state.interrupt_tx.is_none() {
                let (tx, rx) = bounded::<()>(0);
                state.interrupt_tx = Some(tx);
                state.interrupt_rx = rx;
            }
            state.outstanding += 1;
            state.interrupt_rx.clone()
        };

        std::thread::spawn(move || {
            let stop_rx = run_stop.stop_receiver();
            crossbeam_channel::select! {
                recv(interrupt_rx) -> _ => {
                    run_stop.abort(false);
                },
                recv(stop_rx) -> _ => {},
            }
            let mut state = engine.state.lock();
            state.outstanding -= 1;
        });
    }

    #[cfg(test)]
    pub(crate) fn outstanding() -> usize {
        Self::global().state.lock().outstanding
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
    fn watch_decrements_outstanding_when_run_stops_on_its_own() {
        let a = Aborter::new();
        let before = Engine::outstanding();
        Engine::watch(a.clone());
        assert_eq!(Engine::outstanding(), before + 1);
        a.abort(false);
        // Give the watcher thread a moment to observe the close and exit.
        for _ in 0..50 {
            if Engine::outstanding() == before {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Engine::outstanding(), before);
    }
}
