//! Host timers fired from the CPU loop
//!
//! Devices register callbacks with an interval in microseconds. The CPU
//! calls [`Timers::fire_expired`] at slice boundaries with the time elapsed
//! since it started, so callbacks run on the emulation thread between
//! instructions.

/// Handle returned by [`Timers::register_timer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

pub type TimerCallback = Box<dyn FnMut(u64)>;

struct Timer {
    callback: TimerCallback,
    interval_usecs: u64,
    continuous: bool,
    active: bool,
    deadline: u64,
}

#[derive(Default)]
pub struct Timers {
    timers: Vec<Timer>,
    now_usecs: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inactive timer; call [`Timers::activate`] to arm it.
    ///
    /// The callback receives the current time in microseconds.
    pub fn register_timer(
        &mut self,
        callback: TimerCallback,
        interval_usecs: u64,
        continuous: bool,
    ) -> TimerId {
        self.timers.push(Timer {
            callback,
            interval_usecs: interval_usecs.max(1),
            continuous,
            active: false,
            deadline: 0,
        });
        TimerId(self.timers.len() - 1)
    }

    /// Arm `id` to expire one interval from the last observed time
    pub fn activate(&mut self, id: TimerId) {
        let now = self.now_usecs;
        if let Some(timer) = self.timers.get_mut(id.0) {
            timer.active = true;
            timer.deadline = now + timer.interval_usecs;
        }
    }

    pub fn deactivate(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(id.0) {
            timer.active = false;
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.get(id.0).is_some_and(|t| t.active)
    }

    /// Run every expired callback once; returns how many fired.
    ///
    /// Continuous timers re-arm relative to their previous deadline so they
    /// do not drift; one-shot timers deactivate.
    pub fn fire_expired(&mut self, now_usecs: u64) -> usize {
        self.now_usecs = now_usecs;
        let mut fired = 0;
        for timer in self.timers.iter_mut().filter(|t| t.active) {
            if timer.deadline > now_usecs {
                continue;
            }
            (timer.callback)(now_usecs);
            fired += 1;
            if timer.continuous {
                timer.deadline += timer.interval_usecs;
                if timer.deadline <= now_usecs {
                    timer.deadline = now_usecs + timer.interval_usecs;
                }
            } else {
                timer.active = false;
            }
        }
        fired
    }

    /// Earliest deadline among active timers
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers
            .iter()
            .filter(|t| t.active)
            .map(|t| t.deadline)
            .min()
    }
}
