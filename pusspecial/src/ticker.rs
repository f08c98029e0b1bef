/*
 * Periodic retrieval tick
 *
 * The tick is posted to the command interpreter's queue like any other
 * message, so playback never preempts command processing. Changing the period
 * wakes the thread and posts a tick at once. The thread ends when stopped or
 * when the queue's receiver has gone away.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::ci::Message;

#[derive(Clone)]
pub struct Ticker {
    pair: ArcCondPair<Instant>,
    period: Arc<Mutex<Duration>>,
    stopped: Arc<AtomicBool>,
}

impl Ticker {
    /// Start posting ticks to `tx`. There is no ticker for a zero period.
    pub fn start(period: Duration, tx: Sender<Message>) -> Option<Ticker> {
        if period.is_zero() {
            return None;
        }

        let pair = Arc::new(CondPair {
            lock: Mutex::new(Instant::now() + period),
            cvar: Condvar::new(),
        });

        let ticker = Ticker {
            pair,
            period: Arc::new(Mutex::new(period)),
            stopped: Arc::new(AtomicBool::new(false)),
        };

        let worker = ticker.clone();
        thread::spawn(move || worker.run(tx));

        Some(ticker)
    }

    fn run(&self, tx: Sender<Message>) {
        loop {
            let mut expiration = lock(&self.pair.lock);

            // Wait until expiration time or until stopped
            loop {
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let now = Instant::now();
                if *expiration <= now {
                    break;
                }
                let timeout = *expiration - now;
                let (guard, _) = self
                    .pair
                    .cvar
                    .wait_timeout(expiration, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
                expiration = guard;
            }

            // Keep the cadence unless we have fallen a whole period behind
            let period = *lock(&self.period);
            let now = Instant::now();
            let next = *expiration + period;
            *expiration = if next < now { now + period } else { next };
            drop(expiration);

            if tx.send(Message::Tick).is_err() {
                debug!("Tick receiver gone, ticker exiting");
                return;
            }
        }
    }

    pub fn period(&self) -> Duration {
        *lock(&self.period)
    }

    /// Change the period. A tick is posted immediately.
    pub fn set_period(&self, period: Duration) {
        if period.is_zero() {
            return;
        }

        *lock(&self.period) = period;
        *lock(&self.pair.lock) = Instant::now();
        self.pair.cvar.notify_one();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.pair.cvar.notify_one();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type ArcCondPair<T> = Arc<CondPair<T>>;

struct CondPair<T> {
    lock: Mutex<T>,
    cvar: Condvar,
}
