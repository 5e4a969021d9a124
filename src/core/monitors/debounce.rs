// src/core/monitors/debounce.rs

//! Shared hysteresis/cooldown state machine, used by the inotify monitor
//! and the capacity guardian so that oscillating metrics don't flood the
//! hub with alerts. Keyed by `(event_key, level)`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const HYSTERESIS_WINDOW: Duration = Duration::from_secs(30);
const FIRE_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const CLEAR_COOLDOWN: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone)]
struct LevelState {
    firing_since: Option<Instant>,
    last_fired: Option<Instant>,
    is_firing: bool,
    last_clear_fired: Option<Instant>,
}

impl Default for LevelState {
    fn default() -> Self {
        Self {
            firing_since: None,
            last_fired: None,
            is_firing: false,
            last_clear_fired: None,
        }
    }
}

/// What a caller should do in response to the latest observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Suppress: still inside the hysteresis window, still within cooldown,
    /// or already fired with no new transition.
    Suppress,
    /// Fire an alert at `level`.
    Fire,
    /// The condition cleared; fire a one-time "clear" notification.
    FireClear,
}

/// Per-(key, level) debounce state, shared by any monitor that needs
/// hysteresis/cooldown alerting instead of firing on every tick.
pub struct Debouncer {
    state: HashMap<(String, String), LevelState>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            state: HashMap::new(),
        }
    }

    /// Evaluates whether `level` is currently "breaching" (above its
    /// threshold) for `key` at time `now`, returning what the caller should
    /// do. `breaching = false` represents the normal/cleared condition.
    pub fn evaluate(&mut self, key: &str, level: &str, breaching: bool, now: Instant) -> Decision {
        let entry = self
            .state
            .entry((key.to_string(), level.to_string()))
            .or_default();

        if !breaching {
            if entry.is_firing {
                entry.is_firing = false;
                entry.firing_since = None;
                let suppressed = entry
                    .last_clear_fired
                    .is_some_and(|t| now.duration_since(t) < CLEAR_COOLDOWN);
                if suppressed {
                    return Decision::Suppress;
                }
                entry.last_clear_fired = Some(now);
                return Decision::FireClear;
            }
            return Decision::Suppress;
        }

        let firing_since = *entry.firing_since.get_or_insert(now);
        if now.duration_since(firing_since) < HYSTERESIS_WINDOW {
            return Decision::Suppress;
        }

        let cooldown_elapsed = entry
            .last_fired
            .is_none_or(|t| now.duration_since(t) >= FIRE_COOLDOWN);
        if !entry.is_firing || cooldown_elapsed {
            entry.is_firing = true;
            entry.last_fired = Some(now);
            return Decision::Fire;
        }
        Decision::Suppress
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_hysteresis_window_before_first_fire() {
        let mut d = Debouncer::new();
        let t0 = Instant::now();
        assert_eq!(d.evaluate("inotify", "warning", true, t0), Decision::Suppress);
        assert_eq!(
            d.evaluate("inotify", "warning", true, t0 + Duration::from_secs(10)),
            Decision::Suppress
        );
        assert_eq!(
            d.evaluate("inotify", "warning", true, t0 + Duration::from_secs(31)),
            Decision::Fire
        );
    }

    #[test]
    fn cooldown_suppresses_repeat_fires() {
        let mut d = Debouncer::new();
        let t0 = Instant::now();
        assert_eq!(
            d.evaluate("pool-tank", "critical", true, t0 + Duration::from_secs(31)),
            Decision::Fire
        );
        assert_eq!(
            d.evaluate(
                "pool-tank",
                "critical",
                true,
                t0 + Duration::from_secs(60)
            ),
            Decision::Suppress
        );
        assert_eq!(
            d.evaluate(
                "pool-tank",
                "critical",
                true,
                t0 + Duration::from_secs(31 + 5 * 60 + 1)
            ),
            Decision::Fire
        );
    }

    #[test]
    fn clear_fires_once_then_cooldown_suppresses() {
        let mut d = Debouncer::new();
        let t0 = Instant::now();
        d.evaluate("inotify", "warning", true, t0 + Duration::from_secs(31));
        assert_eq!(
            d.evaluate("inotify", "warning", false, t0 + Duration::from_secs(32)),
            Decision::FireClear
        );
        assert_eq!(
            d.evaluate("inotify", "warning", false, t0 + Duration::from_secs(33)),
            Decision::Suppress
        );
    }
}
