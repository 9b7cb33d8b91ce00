//! Pulse capture pipeline for S0 / reed-contact meter outputs.
//!
//! The contact pulls the input low for the duration of a pulse. The GPIO
//! ISR reports the falling edge through [`PulseCounter::on_edge_down`] and
//! the rising edge through [`PulseCounter::on_edge_up`]; the rising edge is
//! where a pulse is accepted or rejected.
//!
//! ## Shared state
//!
//! Everything the ISR and the main loop both touch lives in one
//! `critical_section::Mutex<RefCell<_>>`. Each access is O(1) integer
//! work: no floats and no callbacks run while the lock is held. The
//! consumer wake-up is signalled after the lock is released.
//!
//! Happens-before: an accepted edge is visible to [`PulseCounter::take_pending`]
//! once the ISR's critical section has been released; the take itself
//! swaps out and zeroes the pending counters under the same lock.
//!
//! `PulseCounter::new` is `const`, so the production instance lives in a
//! `static` the ISR can reach, while tests build as many as they like.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Edge filter windows, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseTiming {
    /// Minimum spacing from the last counted edge.
    pub debounce_us: u64,
    /// Minimum low time between the paired falling and rising edge.
    pub min_width_us: u64,
}

impl PulseTiming {
    pub const fn from_ms(debounce_ms: u16, min_width_ms: u16) -> Self {
        Self {
            debounce_us: debounce_ms as u64 * 1000,
            min_width_us: min_width_ms as u64 * 1000,
        }
    }
}

/// Snapshot handed to the consumer by [`PulseCounter::take_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseBatch {
    /// True when `count` or `lost` is non-zero.
    pub has_data: bool,
    /// Pulses accepted since the previous take.
    pub count: u32,
    /// Pulses that arrived while `count` was saturated.
    pub lost: u32,
    /// Timestamp of the most recent counted edge.
    pub last_ts: Option<u64>,
    /// Timestamp of the counted edge before `last_ts`.
    pub prev_ts: Option<u64>,
}

#[derive(Debug)]
struct Shared {
    total: u64,
    pending: u32,
    lost: u32,
    last_ts: Option<u64>,
    prev_ts: Option<u64>,
    last_down: Option<u64>,
    timing: PulseTiming,
}

impl Shared {
    const fn new() -> Self {
        Self {
            total: 0,
            pending: 0,
            lost: 0,
            last_ts: None,
            prev_ts: None,
            last_down: None,
            timing: PulseTiming {
                debounce_us: 0,
                min_width_us: 0,
            },
        }
    }

    fn within_debounce(&self, now: u64) -> bool {
        let debounce = self.timing.debounce_us;
        match self.last_ts {
            Some(last) if debounce > 0 => now.saturating_sub(last) < debounce,
            _ => false,
        }
    }

    fn record(&mut self, now: u64) {
        self.prev_ts = self.last_ts;
        self.last_ts = Some(now);
        self.total = self.total.saturating_add(1);
        if self.pending == u32::MAX {
            self.lost = self.lost.saturating_add(1);
        } else {
            self.pending += 1;
        }
    }
}

/// ISR-fed pulse counter with a consumer-side batch take.
pub struct PulseCounter {
    shared: Mutex<RefCell<Shared>>,
    enabled: AtomicBool,
    blocked: AtomicBool,
    ready: Signal<CriticalSectionRawMutex, ()>,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared::new())),
            enabled: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
            ready: Signal::new(),
        }
    }

    /// Load filter windows and the persisted total, then start accepting edges.
    pub fn start(&self, timing: PulseTiming, initial_total: u64) {
        critical_section::with(|cs| {
            let mut s = self.shared.borrow_ref_mut(cs);
            s.timing = timing;
            s.total = initial_total;
            s.pending = 0;
            s.lost = 0;
        });
        self.enabled.store(true, Ordering::Release);
        log::info!(
            "pulse: started (debounce={}us min_width={}us total={})",
            timing.debounce_us,
            timing.min_width_us,
            initial_total
        );
    }

    fn accepting(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && !self.blocked.load(Ordering::Acquire)
    }

    // ── Producer side (ISR context) ───────────────────────────

    /// Falling edge: the contact closed.
    pub fn on_edge_down(&self, now: u64) {
        if !self.accepting() {
            return;
        }
        critical_section::with(|cs| {
            self.shared.borrow_ref_mut(cs).last_down = Some(now);
        });
    }

    /// Rising edge: the contact opened. Returns true if the pulse was counted.
    pub fn on_edge_up(&self, now: u64) -> bool {
        if !self.accepting() {
            return false;
        }
        let accepted = critical_section::with(|cs| {
            let mut s = self.shared.borrow_ref_mut(cs);
            let min_width = s.timing.min_width_us;
            if min_width > 0 {
                let down = match s.last_down {
                    Some(d) if d <= now => d,
                    _ => now,
                };
                if now - down < min_width {
                    return false;
                }
            }
            if s.within_debounce(now) {
                return false;
            }
            s.record(now);
            true
        });
        if accepted {
            self.ready.signal(());
        }
        accepted
    }

    /// Count a level-triggered wake whose edge interrupt may have been missed.
    ///
    /// Rejected when it falls inside the debounce window of the last counted
    /// edge, which is the case when the ISR already saw the same pulse.
    pub fn record_level_wake(&self, now: u64) -> bool {
        if !self.accepting() {
            return false;
        }
        let accepted = critical_section::with(|cs| {
            let mut s = self.shared.borrow_ref_mut(cs);
            if s.within_debounce(now) {
                return false;
            }
            s.record(now);
            true
        });
        if accepted {
            self.ready.signal(());
        }
        accepted
    }

    // ── Consumer side (main loop) ─────────────────────────────

    /// Swap out the pending counters. Both `count` and `lost` read as zero
    /// on the next call unless new edges arrive in between.
    pub fn take_pending(&self) -> PulseBatch {
        self.ready.reset();
        critical_section::with(|cs| {
            let mut s = self.shared.borrow_ref_mut(cs);
            let batch = PulseBatch {
                has_data: s.pending > 0 || s.lost > 0,
                count: s.pending,
                lost: s.lost,
                last_ts: s.last_ts,
                prev_ts: s.prev_ts,
            };
            s.pending = 0;
            s.lost = 0;
            batch
        })
    }

    /// True if an edge was counted since the last [`take_pending`](Self::take_pending).
    pub fn has_signal(&self) -> bool {
        self.ready.signaled()
    }

    /// Wait for the next counted edge.
    pub async fn wait(&self) {
        self.ready.wait().await;
    }

    /// Cumulative count of accepted edges, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        critical_section::with(|cs| self.shared.borrow_ref(cs).total)
    }

    /// Overwrite the cumulative total and drop anything pending.
    pub fn set_total(&self, total: u64) {
        critical_section::with(|cs| {
            let mut s = self.shared.borrow_ref_mut(cs);
            s.total = total;
            s.pending = 0;
            s.lost = 0;
        });
    }

    pub fn set_timing(&self, timing: PulseTiming) {
        critical_section::with(|cs| self.shared.borrow_ref_mut(cs).timing = timing);
    }

    pub fn timing(&self) -> PulseTiming {
        critical_section::with(|cs| self.shared.borrow_ref(cs).timing)
    }

    /// Suspend counting while the input is borrowed by something else.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}
