use std::time::{Duration, Instant};

use log::debug;

/// Minimum spacing between two firings of the same direction.
const ALERT_COOLDOWN: Duration = Duration::from_secs(60);

/// Price levels to watch. Either, both, or neither may be set; the two
/// directions are evaluated independently.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlertThresholds {
    pub above: Option<f64>,
    pub below: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDirection {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertEvent {
    pub direction: AlertDirection,
}

/// Firing eligibility for one direction.
#[derive(Debug, Clone, Copy)]
struct ArmState {
    armed: bool,
    last_fired_at: Option<Instant>,
}

impl ArmState {
    fn new(active: bool) -> Self {
        Self {
            armed: active,
            last_fired_at: None,
        }
    }

    /// Fires if armed and past the cooldown. A blocked attempt leaves the
    /// state untouched, so the alert goes off on a later tick once the
    /// cooldown has elapsed.
    fn try_fire(&mut self, now: Instant, cooldown: Duration) -> bool {
        let cooled = self
            .last_fired_at
            .map_or(true, |at| now.duration_since(at) >= cooldown);
        if self.armed && cooled {
            self.armed = false;
            self.last_fired_at = Some(now);
            return true;
        }
        false
    }

    fn rearm(&mut self) {
        self.armed = true;
    }
}

/// Turns the raw tick stream into de-duplicated threshold alerts.
///
/// Each direction fires once when the price reaches its threshold, then
/// stays quiet until the price crosses strictly back past the threshold
/// (hysteresis) and the cooldown window has elapsed. Re-arming itself is
/// independent of the cooldown timer. Driven purely by the tick stream
/// and a caller-supplied monotonic clock.
pub struct AlertEngine {
    thresholds: AlertThresholds,
    above: ArmState,
    below: ArmState,
    cooldown: Duration,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self::with_cooldown(thresholds, ALERT_COOLDOWN)
    }

    pub fn with_cooldown(thresholds: AlertThresholds, cooldown: Duration) -> Self {
        Self {
            thresholds,
            above: ArmState::new(thresholds.above.is_some()),
            below: ArmState::new(thresholds.below.is_some()),
            cooldown,
        }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds
    }

    /// Replaces both thresholds atomically and resets both arm states,
    /// discarding any pending cooldown. Safe to call mid-stream.
    pub fn set_thresholds(&mut self, thresholds: AlertThresholds) {
        self.thresholds = thresholds;
        self.above = ArmState::new(thresholds.above.is_some());
        self.below = ArmState::new(thresholds.below.is_some());
        debug!(
            "alert thresholds set: above={:?} below={:?}",
            thresholds.above, thresholds.below
        );
    }

    /// Evaluates one tick against both thresholds.
    ///
    /// Usually returns nothing or a single event. Both directions can fire
    /// on the same tick when the thresholds are inverted (`below > above`);
    /// no ordering is guaranteed between the two events in that case.
    pub fn on_tick(&mut self, price: f64, now: Instant) -> Vec<AlertEvent> {
        let mut fired = Vec::new();

        if let Some(threshold) = self.thresholds.above {
            if price >= threshold {
                if self.above.try_fire(now, self.cooldown) {
                    fired.push(AlertEvent {
                        direction: AlertDirection::Above,
                    });
                }
            } else {
                // Strictly below the threshold: crossing back re-arms,
                // regardless of the cooldown timer.
                self.above.rearm();
            }
        }

        if let Some(threshold) = self.thresholds.below {
            if price <= threshold {
                if self.below.try_fire(now, self.cooldown) {
                    fired.push(AlertEvent {
                        direction: AlertDirection::Below,
                    });
                }
            } else {
                self.below.rearm();
            }
        }

        fired
    }
}
