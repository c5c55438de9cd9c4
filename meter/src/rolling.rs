//! Per-source rolling window over the last `window_seconds` of combat
//! events, used to compute live DPS/HPS while also tracking lifetime
//! totals for the current session.

use std::collections::{HashMap, VecDeque};

use photon::{CombatEvent, CombatEventKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceTotals {
    pub damage: f64,
    pub heal: f64,
    pub dps: f64,
    pub hps: f64,
}

#[derive(Debug, Clone)]
pub struct MeterSnapshot {
    pub timestamp: f64,
    pub totals: HashMap<i32, SourceTotals>,
}

#[derive(Debug, Default)]
struct SourceRing {
    events: VecDeque<(f64, CombatEventKind, f64)>,
    total_damage: f64,
    total_heal: f64,
}

#[derive(Debug)]
pub struct RollingMeter {
    window_seconds: f64,
    per_source: HashMap<i32, SourceRing>,
    last_touch: Option<f64>,
}

impl RollingMeter {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            per_source: HashMap::new(),
            last_touch: None,
        }
    }

    pub fn push(&mut self, event: &CombatEvent) {
        let ring = self.per_source.entry(event.source_id).or_default();
        match event.kind {
            CombatEventKind::Damage => ring.total_damage += event.amount,
            CombatEventKind::Heal => ring.total_heal += event.amount,
        }
        ring.events.push_back((event.timestamp, event.kind, event.amount));
        self.prune_source(event.source_id, event.timestamp);
        self.last_touch = Some(self.last_touch.map_or(event.timestamp, |t| t.max(event.timestamp)));
    }

    /// Advance the window without adding an event — drives DPS decay when a
    /// source goes quiet but the session is still open.
    pub fn touch(&mut self, now: f64) {
        self.last_touch = Some(self.last_touch.map_or(now, |t| t.max(now)));
        let source_ids: Vec<i32> = self.per_source.keys().copied().collect();
        for source_id in source_ids {
            self.prune_source(source_id, now);
        }
    }

    pub fn snapshot(&self, now: Option<f64>) -> MeterSnapshot {
        let now = now.or(self.last_touch).unwrap_or(0.0);
        let cutoff = now - self.window_seconds;
        let mut totals = HashMap::new();
        for (source_id, ring) in &self.per_source {
            let mut windowed_damage = 0.0;
            let mut windowed_heal = 0.0;
            for (ts, kind, amount) in &ring.events {
                if *ts < cutoff {
                    continue;
                }
                match kind {
                    CombatEventKind::Damage => windowed_damage += amount,
                    CombatEventKind::Heal => windowed_heal += amount,
                }
            }
            totals.insert(
                *source_id,
                SourceTotals {
                    damage: ring.total_damage,
                    heal: ring.total_heal,
                    dps: windowed_damage / self.window_seconds,
                    hps: windowed_heal / self.window_seconds,
                },
            );
        }
        MeterSnapshot { timestamp: now, totals }
    }

    fn prune_source(&mut self, source_id: i32, now: f64) {
        let cutoff = now - self.window_seconds;
        if let Some(ring) = self.per_source.get_mut(&source_id) {
            while let Some((ts, _, _)) = ring.events.front() {
                if *ts < cutoff {
                    ring.events.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon::CombatEventKind;

    fn dmg(ts: f64, source: i32, amount: f64) -> CombatEvent {
        CombatEvent {
            timestamp: ts,
            source_id: source,
            target_id: 1,
            kind: CombatEventKind::Damage,
            amount,
        }
    }

    #[test]
    fn lifetime_totals_are_monotone() {
        let mut meter = RollingMeter::new(10.0);
        meter.push(&dmg(0.0, 7, 50.0));
        meter.push(&dmg(1.0, 7, 50.0));
        let snapshot = meter.snapshot(Some(1.0));
        assert_eq!(snapshot.totals[&7].damage, 100.0);
    }

    #[test]
    fn window_excludes_events_older_than_ten_seconds() {
        let mut meter = RollingMeter::new(10.0);
        meter.push(&dmg(0.0, 7, 100.0));
        let snapshot = meter.snapshot(Some(11.0));
        assert_eq!(snapshot.totals[&7].damage, 100.0);
        assert_eq!(snapshot.totals[&7].dps, 0.0);
    }
}
