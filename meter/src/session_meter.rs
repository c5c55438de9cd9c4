//! Accumulates allowed combat events into a rolling window and archives
//! completed sessions into a bounded per-mode history.

use std::collections::{HashMap, VecDeque};

use photon::{CombatEvent, CombatEventKind, RawPacket};

use crate::rolling::{MeterSnapshot, RollingMeter};

const COMBAT_END_GRACE_SECONDS: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Battle,
    Zone,
    Manual,
}

/// Why a session closed. Richer than a bare string so callers can match
/// exhaustively instead of comparing against magic words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    CombatState,
    Idle,
    ZoneChange,
    ManualStop,
    ManualEnd,
    ModeChange,
    StreamEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    pub label: String,
    pub damage: f64,
    pub heal: f64,
    pub dps: f64,
    pub hps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub mode: Mode,
    pub start_ts: f64,
    pub end_ts: f64,
    pub duration: f64,
    pub label: Option<String>,
    pub entries: Vec<SessionEntry>,
    pub total_damage: f64,
    pub total_heal: f64,
    pub reason: CloseReason,
}

pub type NameLookup<'a> = dyn Fn(i32) -> Option<String> + 'a;

pub struct SessionMeter {
    window_seconds: f64,
    battle_timeout_seconds: f64,
    history_limit: usize,
    mode: Mode,
    history: HashMap<Mode, VecDeque<SessionSummary>>,
    meter: RollingMeter,
    session_start: Option<f64>,
    last_event_ts: Option<f64>,
    last_seen_ts: Option<f64>,
    active: bool,
    manual_active: bool,
    zone_key: Option<(String, u16)>,
    zone_label: Option<String>,
    combatants: std::collections::HashSet<i32>,
    seen_sources: std::collections::HashSet<i32>,
    combat_end_ts: Option<f64>,
    last_combat_event_ts: Option<f64>,
    saw_combat_state: bool,
}

impl SessionMeter {
    pub fn new(window_seconds: f64, battle_timeout_seconds: f64, history_limit: usize) -> Self {
        let mut history = HashMap::new();
        history.insert(Mode::Battle, VecDeque::with_capacity(history_limit));
        history.insert(Mode::Zone, VecDeque::with_capacity(history_limit));
        history.insert(Mode::Manual, VecDeque::with_capacity(history_limit));
        Self {
            window_seconds,
            battle_timeout_seconds,
            history_limit,
            mode: Mode::Battle,
            history,
            meter: RollingMeter::new(window_seconds),
            session_start: None,
            last_event_ts: None,
            last_seen_ts: None,
            active: false,
            manual_active: false,
            zone_key: None,
            zone_label: None,
            combatants: std::collections::HashSet::new(),
            seen_sources: std::collections::HashSet::new(),
            combat_end_ts: None,
            last_combat_event_ts: None,
            saw_combat_state: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        self.end_session(self.last_seen_ts.or(self.last_event_ts).unwrap_or(0.0), CloseReason::ModeChange, None);
        self.mode = mode;
        self.manual_active = false;
        self.combatants.clear();
        self.combat_end_ts = None;
        self.last_combat_event_ts = None;
        self.saw_combat_state = false;
        if self.mode == Mode::Zone && self.zone_key.is_some() {
            self.start_session(self.last_seen_ts.unwrap_or(0.0));
        }
    }

    pub fn toggle_manual(&mut self) -> bool {
        if self.mode != Mode::Manual {
            return false;
        }
        if self.manual_active {
            self.manual_active = false;
            self.end_session(self.last_seen_ts.or(self.last_event_ts).unwrap_or(0.0), CloseReason::ManualStop, None);
            return false;
        }
        self.manual_active = true;
        self.start_session(self.last_seen_ts.unwrap_or(0.0));
        true
    }

    pub fn end_session(&mut self, timestamp: f64, reason: CloseReason, label_override: Option<String>) {
        if !self.active {
            return;
        }
        let start_ts = self.session_start.unwrap_or(timestamp);
        let end_ts = timestamp;
        let duration = (end_ts - start_ts).max(0.0);
        let snapshot = self.meter.snapshot(Some(end_ts));
        let entries = build_entries(&snapshot, duration, None::<&NameLookup>);
        if entries.is_empty() {
            self.reset_meter_state();
            return;
        }
        let total_damage: f64 = entries.iter().map(|e| e.damage).sum();
        let total_heal: f64 = entries.iter().map(|e| e.heal).sum();
        let label = if self.mode == Mode::Zone {
            label_override.or_else(|| self.zone_label.clone())
        } else {
            None
        };
        let summary = SessionSummary {
            mode: self.mode,
            start_ts,
            end_ts,
            duration,
            label,
            entries,
            total_damage,
            total_heal,
            reason,
        };
        let history = self.history.entry(self.mode).or_insert_with(|| VecDeque::with_capacity(self.history_limit));
        if history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(summary);
        self.reset_session_state();
    }

    pub fn end_session_manual(&mut self) {
        self.end_session(self.last_seen_ts.or(self.last_event_ts).unwrap_or(0.0), CloseReason::ManualEnd, None);
    }

    pub fn finalize(&mut self) {
        if !self.active {
            return;
        }
        let mut end_ts = self.last_seen_ts.or(self.last_event_ts).unwrap_or(0.0);
        if self.mode == Mode::Battle {
            if let Some(combat_end_ts) = self.combat_end_ts {
                end_ts = match self.last_event_ts {
                    Some(last) if last > combat_end_ts => last,
                    _ => combat_end_ts,
                };
                self.end_session(end_ts, CloseReason::CombatState, None);
                return;
            }
            if let Some(last_combat) = self.last_combat_event_ts {
                if end_ts - last_combat >= self.battle_timeout_seconds {
                    self.end_session(end_ts, CloseReason::Idle, None);
                    return;
                }
            }
        }
        self.end_session(end_ts, CloseReason::StreamEnd, None);
    }

    pub fn observe_packet(&mut self, packet: &RawPacket) {
        self.last_seen_ts = Some(packet.timestamp);
        if let Some(zone_key) = packet.zone_key() {
            match &self.zone_key {
                None => {
                    self.zone_key = Some(zone_key.clone());
                    self.zone_label = Some(format!("{}:{}", zone_key.0, zone_key.1));
                    if self.mode == Mode::Zone {
                        self.start_session(packet.timestamp);
                    }
                }
                Some(current) if *current != zone_key => {
                    let previous_label = self.zone_label.clone();
                    self.zone_key = Some(zone_key.clone());
                    self.zone_label = Some(format!("{}:{}", zone_key.0, zone_key.1));
                    if self.mode == Mode::Zone {
                        if self.active {
                            self.end_session(packet.timestamp, CloseReason::ZoneChange, previous_label);
                        }
                        self.start_session(packet.timestamp);
                    }
                }
                _ => {}
            }
        }

        if self.mode == Mode::Battle && self.active {
            if let Some(last_activity) = self.last_combat_event_ts {
                if packet.timestamp - last_activity >= self.battle_timeout_seconds {
                    self.end_session(packet.timestamp, CloseReason::Idle, None);
                }
            }
        }

        if self.mode == Mode::Battle && self.active {
            if let Some(combat_end_ts) = self.combat_end_ts {
                if packet.timestamp - combat_end_ts >= COMBAT_END_GRACE_SECONDS {
                    let mut end_ts = combat_end_ts;
                    if let Some(last) = self.last_event_ts {
                        if last > end_ts {
                            end_ts = last;
                        }
                    }
                    self.end_session(end_ts, CloseReason::CombatState, None);
                }
            }
        }

        if self.active {
            self.meter.touch(packet.timestamp);
        }
    }

    pub fn push(&mut self, event: &CombatEvent) {
        if self.mode == Mode::Manual && !self.manual_active {
            return;
        }
        if !self.active {
            self.start_session(event.timestamp);
        }
        if self.last_event_ts.is_none_or(|t| event.timestamp > t) {
            self.last_event_ts = Some(event.timestamp);
        }
        if self.last_seen_ts.is_none_or(|t| event.timestamp > t) {
            self.last_seen_ts = Some(event.timestamp);
        }
        if let Some(combat_end_ts) = self.combat_end_ts {
            if event.timestamp - combat_end_ts > COMBAT_END_GRACE_SECONDS {
                self.combat_end_ts = None;
            }
        }
        self.seen_sources.insert(event.source_id);

        let qualifies = if self.saw_combat_state {
            event.kind == CombatEventKind::Damage
                || (event.kind == CombatEventKind::Heal && event.source_id != event.target_id)
        } else {
            true
        };
        if qualifies && self.last_combat_event_ts.is_none_or(|t| event.timestamp > t) {
            self.last_combat_event_ts = Some(event.timestamp);
        }
        self.meter.push(event);
    }

    pub fn observe_combat_state(&mut self, entity_id: i32, in_active: bool, in_passive: bool, timestamp: f64) {
        if self.mode != Mode::Battle {
            return;
        }
        if self.seen_sources.is_empty() || !self.seen_sources.contains(&entity_id) {
            return;
        }
        self.saw_combat_state = true;
        if self.last_seen_ts.is_none_or(|t| timestamp > t) {
            self.last_seen_ts = Some(timestamp);
        }
        let in_combat = in_active || in_passive;
        if in_combat {
            self.combatants.insert(entity_id);
            self.combat_end_ts = None;
            if !self.active {
                self.start_session(timestamp);
            }
            return;
        }
        self.combatants.remove(&entity_id);
        if self.combatants.is_empty() {
            self.combat_end_ts = Some(timestamp);
        }
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        if !self.active {
            return MeterSnapshot {
                timestamp: self.last_seen_ts.unwrap_or(0.0),
                totals: HashMap::new(),
            };
        }
        let now = self.last_seen_ts.or(self.last_event_ts);
        self.meter.snapshot(now)
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<&SessionSummary> {
        let entries = self.history.get(&self.mode).into_iter().flatten().rev();
        match limit {
            Some(limit) if limit > 0 => entries.take(limit).collect(),
            _ => entries.collect(),
        }
    }

    /// Finds the most recent session whose `[start_ts, end_ts]` contains
    /// `event.timestamp`, folds the amount into the matching label, and
    /// re-sorts the summary's entries. Pipeline callers attempt this before
    /// pushing a late event into the live meter.
    pub fn merge_event_into_history(&mut self, event: &CombatEvent, name_lookup: Option<&NameLookup>) -> bool {
        let Some(history) = self.history.get_mut(&self.mode) else {
            return false;
        };
        let label = name_lookup
            .and_then(|lookup| lookup(event.source_id))
            .unwrap_or_else(|| event.source_id.to_string());
        for summary in history.iter_mut().rev() {
            if event.timestamp < summary.start_ts || event.timestamp > summary.end_ts {
                continue;
            }
            let mut grouped: HashMap<String, (f64, f64)> = summary
                .entries
                .iter()
                .map(|entry| (entry.label.clone(), (entry.damage, entry.heal)))
                .collect();
            let (damage, heal) = grouped.entry(label.clone()).or_insert((0.0, 0.0));
            match event.kind {
                CombatEventKind::Damage => *damage += event.amount,
                CombatEventKind::Heal => *heal += event.amount,
            }
            let entries = build_entries_from_grouped(&grouped, summary.duration);
            summary.total_damage = entries.iter().map(|e| e.damage).sum();
            summary.total_heal = entries.iter().map(|e| e.heal).sum();
            summary.entries = entries;
            return true;
        }
        false
    }

    /// Walks all retained summaries and rewrites numeric labels that now
    /// have resolved names, merging any duplicates that result.
    pub fn refresh_history_labels(&mut self, name_lookup: &NameLookup) -> bool {
        let Some(history) = self.history.get_mut(&self.mode) else {
            return false;
        };
        let mut changed = false;
        for summary in history.iter_mut() {
            let mut grouped: HashMap<String, (f64, f64)> = HashMap::new();
            let mut changed_local = false;
            for entry in &summary.entries {
                let mut label = entry.label.clone();
                if label.chars().all(|c| c.is_ascii_digit()) {
                    if let Ok(id) = label.parse::<i32>() {
                        if let Some(mapped) = name_lookup(id) {
                            label = mapped;
                            changed_local = true;
                        }
                    }
                }
                if grouped.contains_key(&label) {
                    changed_local = true;
                }
                let slot = grouped.entry(label).or_insert((0.0, 0.0));
                slot.0 += entry.damage;
                slot.1 += entry.heal;
            }
            let entries = build_entries_from_grouped(&grouped, summary.duration);
            summary.total_damage = entries.iter().map(|e| e.damage).sum();
            summary.total_heal = entries.iter().map(|e| e.heal).sum();
            summary.entries = entries;
            if changed_local {
                changed = true;
            }
        }
        changed
    }

    pub fn manual_active(&self) -> bool {
        self.manual_active
    }

    pub fn zone_label(&self) -> Option<&str> {
        self.zone_label.as_deref()
    }

    fn start_session(&mut self, timestamp: f64) {
        self.meter = RollingMeter::new(self.window_seconds);
        self.session_start = Some(timestamp);
        self.last_event_ts = None;
        self.active = true;
        self.combat_end_ts = None;
        self.last_combat_event_ts = None;
        self.seen_sources.clear();
    }

    /// Clears just the meter/active-session bookkeeping. Used when a session
    /// closes with a completed summary to report.
    fn reset_session_state(&mut self) {
        self.reset_meter_state();
        self.combat_end_ts = None;
        self.combatants.clear();
        self.last_combat_event_ts = None;
        self.seen_sources.clear();
    }

    /// Clears only the rolling meter and session-active flag. Used on the
    /// empty-entries early return in `end_session`, which leaves combat
    /// tracking untouched.
    fn reset_meter_state(&mut self) {
        self.meter = RollingMeter::new(self.window_seconds);
        self.session_start = None;
        self.last_event_ts = None;
        self.active = false;
    }
}

fn build_entries(snapshot: &MeterSnapshot, duration: f64, name_lookup: Option<&NameLookup>) -> Vec<SessionEntry> {
    let mut grouped: HashMap<String, (f64, f64)> = HashMap::new();
    for (source_id, totals) in &snapshot.totals {
        let label = name_lookup
            .and_then(|lookup| lookup(*source_id))
            .unwrap_or_else(|| source_id.to_string());
        let slot = grouped.entry(label).or_insert((0.0, 0.0));
        slot.0 += totals.damage;
        slot.1 += totals.heal;
    }
    build_entries_from_grouped(&grouped, duration)
}

fn build_entries_from_grouped(grouped: &HashMap<String, (f64, f64)>, duration: f64) -> Vec<SessionEntry> {
    let mut entries: Vec<SessionEntry> = grouped
        .iter()
        .map(|(label, (damage, heal))| {
            let (dps, hps) = if duration > 0.0 {
                (damage / duration, heal / duration)
            } else {
                (0.0, 0.0)
            };
            SessionEntry {
                label: label.clone(),
                damage: *damage,
                heal: *heal,
                dps,
                hps,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.damage.partial_cmp(&a.damage).unwrap_or(std::cmp::Ordering::Equal));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dmg(ts: f64, source: i32, target: i32, amount: f64) -> CombatEvent {
        CombatEvent {
            timestamp: ts,
            source_id: source,
            target_id: target,
            kind: CombatEventKind::Damage,
            amount,
        }
    }

    #[test]
    fn battle_session_starts_on_first_event() {
        let mut meter = SessionMeter::new(10.0, 20.0, 10);
        meter.push(&dmg(0.0, 7, 99, 100.0));
        assert_eq!(meter.snapshot().totals[&7].damage, 100.0);
    }

    #[test]
    fn idle_timeout_closes_battle_session() {
        let mut meter = SessionMeter::new(10.0, 20.0, 10);
        meter.push(&dmg(0.0, 7, 99, 100.0));
        let packet = RawPacket {
            timestamp: 25.0,
            src_ip: "a".into(),
            src_port: 1,
            dst_ip: "b".into(),
            dst_port: 2,
            payload: vec![],
        };
        meter.observe_packet(&packet);
        assert_eq!(meter.history(None).len(), 1);
        assert_eq!(meter.history(None)[0].reason, CloseReason::Idle);
    }

    #[test]
    fn manual_mode_requires_explicit_toggle() {
        let mut meter = SessionMeter::new(10.0, 20.0, 10);
        meter.set_mode(Mode::Manual);
        meter.push(&dmg(0.0, 7, 99, 50.0));
        assert_eq!(meter.snapshot().totals.len(), 0);
        meter.toggle_manual();
        meter.push(&dmg(1.0, 7, 99, 50.0));
        assert_eq!(meter.snapshot().totals[&7].damage, 50.0);
    }
}
