//! Cooperative periodic-callback timer wheel (§4.3, §3 `Timer`).
//!
//! The teacher's DHCP client hand-rolled a single-purpose `RetryTimer` tied
//! to a concrete `TimeMs` peripheral type and a fixed `Retry` backoff
//! ladder — useful for DHCP alone, not a general callback scheduler. §9's
//! design note calls for replacing the spec's intrusive linked list of
//! timer nodes (keyed by callback identity, with manual `free`) with "a
//! slab of fixed-capacity slots keyed by a small integer handle, or by the
//! callback's type-erased identity". This keeps the latter: a timer's
//! identity is its function pointer, compared by value, so `set` on an
//! already-armed callback replaces it in place rather than growing the
//! table. DHCP's own exponential-backoff ladder is kept as
//! `dhcp::RetryTimer`, layered on top of this wheel rather than replacing
//! it.

use crate::error::{NetError, NetResult};

/// Max simultaneous armed timers. The source's linked list has no fixed
/// cap; this stack needs at most one per protocol concern (ARP aging,
/// DHCP retry/renew/rebind, packet queue sweep, application timers), so 8
/// leaves headroom without reserving much RAM.
pub const MAX_TIMERS: usize = 8;

/// What a fired callback wants done with its own timer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimerOutcome {
    /// Re-arm for another `interval` seconds from the scheduled fire time.
    Keep,
    /// Remove this timer; it will not fire again unless `set` again.
    Remove,
}

struct TimerSlot<C> {
    callback: fn(&mut C) -> TimerOutcome,
    start_seconds: u32,
    interval_seconds: u32,
}

/// A fixed-capacity set of periodic callbacks, swept by [`TimerWheel::periodic`].
///
/// `C` is whatever context the callbacks need (here, always `&mut NetStack`
/// or one of its sub-components) — there is no dynamic allocation, so the
/// callback set is a plain array of `Option<TimerSlot<C>>`.
pub struct TimerWheel<C> {
    slots: [Option<TimerSlot<C>>; MAX_TIMERS],
}

impl<C> TimerWheel<C> {
    pub const fn new() -> Self {
        Self {
            slots: [None, None, None, None, None, None, None, None],
        }
    }

    fn position(&self, cb: fn(&mut C) -> TimerOutcome) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map(|t| t.callback as usize) == Some(cb as usize))
    }

    /// Arm `cb` to fire every `interval_seconds`, starting from `now_seconds`.
    /// If `cb` is already armed, its existing timer is replaced (§3
    /// "at most one timer per callback identity").
    pub fn set(&mut self, cb: fn(&mut C) -> TimerOutcome, interval_seconds: u32, now_seconds: u32) -> NetResult<()> {
        self.clear(cb);
        let slot_index = match self.slots.iter().position(|s| s.is_none()) {
            Some(i) => i,
            None => {
                debug::logln!(debug::LL::Warn, "timers: wheel full");
                return Err(NetError::TableFull);
            }
        };
        self.slots[slot_index] = Some(TimerSlot {
            callback: cb,
            start_seconds: now_seconds,
            interval_seconds,
        });
        Ok(())
    }

    /// Remove the timer for `cb`, if any.
    pub fn clear(&mut self, cb: fn(&mut C) -> TimerOutcome) {
        if let Some(i) = self.position(cb) {
            self.slots[i] = None;
        }
    }

    /// Advance `cb`'s scheduled start by its interval (a logical re-arm
    /// without resetting the phase), per §4.3 `reset`.
    pub fn reset(&mut self, cb: fn(&mut C) -> TimerOutcome) {
        if let Some(i) = self.position(cb) {
            if let Some(t) = self.slots[i].as_mut() {
                t.start_seconds = t.start_seconds.wrapping_add(t.interval_seconds);
            }
        }
    }

    /// Re-arm `cb`'s start to `now_seconds`, restarting its phase (§4.3
    /// `restart`).
    pub fn restart(&mut self, cb: fn(&mut C) -> TimerOutcome, now_seconds: u32) {
        if let Some(i) = self.position(cb) {
            if let Some(t) = self.slots[i].as_mut() {
                t.start_seconds = now_seconds;
            }
        }
    }

    /// True if `cb` currently has an armed timer.
    pub fn get(&self, cb: fn(&mut C) -> TimerOutcome) -> bool {
        self.position(cb).is_some()
    }

    /// Sweep every armed timer whose interval has elapsed, invoking its
    /// callback with `ctx`. A callback returning [`TimerOutcome::Keep`] is
    /// re-armed by advancing its start by its interval (not jammed to
    /// `now_seconds`, so a late sweep doesn't stretch the period);
    /// [`TimerOutcome::Remove`] frees the slot. Callbacks may call
    /// `set`/`clear` on themselves or other timers; each slot's fire
    /// decision is read fresh from the array on every sweep pass, so such
    /// mutation is safe, though a callback cannot observe timers armed by
    /// a later callback within the same sweep.
    pub fn periodic(&mut self, ctx: &mut C, now_seconds: u32) {
        for i in 0..MAX_TIMERS {
            let due = match &self.slots[i] {
                Some(t) => now_seconds.wrapping_sub(t.start_seconds) >= t.interval_seconds,
                None => false,
            };
            if !due {
                continue;
            }
            let (cb, interval) = match &self.slots[i] {
                Some(t) => (t.callback, t.interval_seconds),
                None => continue,
            };
            let outcome = cb(ctx);
            match outcome {
                TimerOutcome::Keep => {
                    if let Some(t) = self.slots[i].as_mut() {
                        t.start_seconds = t.start_seconds.wrapping_add(interval);
                    }
                }
                TimerOutcome::Remove => {
                    self.slots[i] = None;
                }
            }
        }
    }
}

impl<C> Default for TimerWheel<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        fires: u32,
    }

    fn tick_keep(ctx: &mut Counter) -> TimerOutcome {
        ctx.fires += 1;
        TimerOutcome::Keep
    }

    fn tick_once(ctx: &mut Counter) -> TimerOutcome {
        ctx.fires += 1;
        TimerOutcome::Remove
    }

    #[test]
    fn fires_when_interval_elapses_and_rearms_on_keep() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::new();
        let mut ctx = Counter { fires: 0 };
        wheel.set(tick_keep, 10, 0).unwrap();
        wheel.periodic(&mut ctx, 5);
        assert_eq!(ctx.fires, 0);
        wheel.periodic(&mut ctx, 10);
        assert_eq!(ctx.fires, 1);
        wheel.periodic(&mut ctx, 20);
        assert_eq!(ctx.fires, 2);
    }

    #[test]
    fn remove_outcome_frees_the_slot() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::new();
        let mut ctx = Counter { fires: 0 };
        wheel.set(tick_once, 10, 0).unwrap();
        wheel.periodic(&mut ctx, 10);
        assert_eq!(ctx.fires, 1);
        assert!(!wheel.get(tick_once));
        wheel.periodic(&mut ctx, 100);
        assert_eq!(ctx.fires, 1);
    }

    #[test]
    fn second_set_replaces_first_for_same_callback() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::new();
        wheel.set(tick_keep, 10, 0).unwrap();
        wheel.set(tick_keep, 30, 5).unwrap();
        let mut ctx = Counter { fires: 0 };
        wheel.periodic(&mut ctx, 20);
        assert_eq!(ctx.fires, 0); // 20 - 5 = 15 < 30
        wheel.periodic(&mut ctx, 35);
        assert_eq!(ctx.fires, 1);
    }

    #[test]
    fn set_fails_when_table_full() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::new();
        fn cb0(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb1(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb2(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb3(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb4(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb5(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb6(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb7(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        fn cb8(c: &mut Counter) -> TimerOutcome { c.fires += 1; TimerOutcome::Keep }
        wheel.set(cb0, 1, 0).unwrap();
        wheel.set(cb1, 1, 0).unwrap();
        wheel.set(cb2, 1, 0).unwrap();
        wheel.set(cb3, 1, 0).unwrap();
        wheel.set(cb4, 1, 0).unwrap();
        wheel.set(cb5, 1, 0).unwrap();
        wheel.set(cb6, 1, 0).unwrap();
        wheel.set(cb7, 1, 0).unwrap();
        assert_eq!(wheel.set(cb8, 1, 0), Err(NetError::TableFull));
    }
}
