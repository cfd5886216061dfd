// Named countdowns advanced by host-supplied elapsed time.

use std::collections::BTreeMap;
use std::time::Duration;

/// Timer names. Declaration order is the firing priority when several
/// timers expire in the same tick: the rotation flag first, so a lobby
/// entered in that tick sees it, then population checks, round flow and votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerName {
    PresetRotation,
    TooFewPlayers,
    PreGame,
    WeaponSelection,
    RoundTime,
    PingCheck,
    PostGame,
    VoteWindow,
}

// Smallest duration an armed timer can hold.
const MIN_REMAINING: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct TimerRegistry {
    // Only armed timers are present; remaining is always > 0.
    armed: BTreeMap<TimerName, Duration>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) a timer. A zero duration fires on the next tick.
    pub fn arm(&mut self, name: TimerName, duration: Duration) {
        self.armed.insert(name, duration.max(MIN_REMAINING));
    }

    pub fn disarm(&mut self, name: TimerName) {
        self.armed.remove(&name);
    }

    pub fn is_armed(&self, name: TimerName) -> bool {
        self.armed.contains_key(&name)
    }

    pub fn remaining(&self, name: TimerName) -> Option<Duration> {
        self.armed.get(&name).copied()
    }

    /// Advances every armed timer and returns the ones that fired, in
    /// priority order. Fired timers are disarmed.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<TimerName> {
        let mut fired = Vec::new();
        for (name, remaining) in self.armed.iter_mut() {
            *remaining = remaining.saturating_sub(elapsed);
            if remaining.is_zero() {
                fired.push(*name);
            }
        }
        for name in &fired {
            self.armed.remove(name);
        }
        fired
    }
}
