//! Wires the per-packet decode → map → attribute → aggregate sequence
//! together. Callers (capture/replay adapters in the `native` crate) drive
//! this with one [`Pipeline::process_packet`] call per captured datagram
//! and read back a snapshot whenever one is due.

use std::collections::HashMap;

use photon::{CombatEvent, CombatEventMapper, PhotonMessage, RawPacket};

use crate::name_registry::NameRegistry;
use crate::party_registry::PartyRegistry;
use crate::rolling::SourceTotals;
use crate::session_meter::SessionMeter;

const COMBAT_STATE_EVENT_CODE: u8 = 1;
const COMBAT_STATE_SUBTYPE_KEY: u8 = 252;
const COMBAT_STATE_SUBTYPE_VALUES: [i32; 2] = [257, 274];
const COMBAT_STATE_ID_KEY: u8 = 0;
const COMBAT_STATE_ACTIVE_KEY: u8 = 1;
const COMBAT_STATE_PASSIVE_KEY: u8 = 2;

const PENDING_MAX_AGE_SECONDS: f64 = 120.0;
const PENDING_MAX_COUNT: usize = 2000;

/// Observes decoded messages for side effects unrelated to damage/healing
/// (loot fame, silver, etc). Not implemented by this repository's domain
/// layer; callers that want fame tracking provide their own.
pub trait FameTracker {
    fn observe(&mut self, message: &PhotonMessage, packet: &RawPacket);
}

#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub timestamp: f64,
    pub totals: HashMap<i32, SourceTotals>,
    pub names: Option<HashMap<i32, String>>,
}

struct PendingCombatState {
    timestamp: f64,
    entity_id: i32,
    in_active: bool,
    in_passive: bool,
}

pub struct Pipeline {
    mapper: CombatEventMapper,
    name_registry: Option<NameRegistry>,
    party_registry: Option<PartyRegistry>,
    fame_tracker: Option<Box<dyn FameTracker>>,
    meter: SessionMeter,
    snapshot_interval: f64,
    last_emit: Option<f64>,
    last_timestamp: Option<f64>,
    pending_events: Vec<CombatEvent>,
    pending_combat_states: Vec<PendingCombatState>,
}

impl Pipeline {
    pub fn new(meter: SessionMeter, snapshot_interval: f64) -> Self {
        Self {
            mapper: CombatEventMapper::default(),
            name_registry: None,
            party_registry: None,
            fame_tracker: None,
            meter,
            snapshot_interval,
            last_emit: None,
            last_timestamp: None,
            pending_events: Vec::new(),
            pending_combat_states: Vec::new(),
        }
    }

    pub fn with_name_registry(mut self, registry: NameRegistry) -> Self {
        self.name_registry = Some(registry);
        self
    }

    pub fn with_party_registry(mut self, registry: PartyRegistry) -> Self {
        self.party_registry = Some(registry);
        self
    }

    pub fn with_fame_tracker(mut self, tracker: Box<dyn FameTracker>) -> Self {
        self.fame_tracker = Some(tracker);
        self
    }

    pub fn meter(&self) -> &SessionMeter {
        &self.meter
    }

    pub fn meter_mut(&mut self) -> &mut SessionMeter {
        &mut self.meter
    }

    pub fn party_registry(&self) -> Option<&PartyRegistry> {
        self.party_registry.as_ref()
    }

    pub fn name_registry(&self) -> Option<&NameRegistry> {
        self.name_registry.as_ref()
    }

    /// Processes one captured packet through the full decode/map/attribute
    /// sequence and, if a snapshot is due, returns it.
    pub fn process_packet(&mut self, packet: &RawPacket) -> Option<PipelineSnapshot> {
        self.last_timestamp = Some(packet.timestamp);

        if let Some(party_registry) = &mut self.party_registry {
            party_registry.observe_packet(packet);
        }

        let messages = photon::decode_packet(packet);

        for message in &messages {
            if let Some(name_registry) = &mut self.name_registry {
                name_registry.observe(message);
            }
            if let Some(party_registry) = &mut self.party_registry {
                party_registry.observe(message, Some(packet));
                if let Some(name_registry) = &mut self.name_registry {
                    party_registry.sync_names(name_registry);
                    party_registry.infer_self_name_from_targets(name_registry);
                    party_registry.sync_id_names(name_registry);
                }
                party_registry.try_resolve_self_id(self.name_registry.as_ref());
            }
            if let Some(fame_tracker) = &mut self.fame_tracker {
                fame_tracker.observe(message, packet);
            }
        }

        self.flush_or_trim_pending(packet.timestamp);

        for message in &messages {
            for event in self.mapper.map(message, packet.timestamp) {
                self.route_event(event);
            }
        }

        for message in &messages {
            let Some((entity_id, in_active, in_passive)) = decode_combat_state(message) else {
                continue;
            };
            if allow_combat_state(entity_id, &mut self.party_registry, self.name_registry.as_ref()) {
                self.meter.observe_combat_state(entity_id, in_active, in_passive, packet.timestamp);
            } else if self.party_registry_wants_pending() {
                self.pending_combat_states.push(PendingCombatState {
                    timestamp: packet.timestamp,
                    entity_id,
                    in_active,
                    in_passive,
                });
            }
        }

        self.flush_or_trim_pending(packet.timestamp);

        self.meter.observe_packet(packet);

        if let Some(name_registry) = &self.name_registry {
            let lookup = |id: i32| name_registry.lookup(id).map(str::to_string);
            self.meter.refresh_history_labels(&lookup);
        }

        self.maybe_snapshot(packet.timestamp)
    }

    /// Call once the packet stream is exhausted; flushes a closing session
    /// (if any) and returns the final snapshot.
    pub fn finalize(&mut self) -> PipelineSnapshot {
        self.meter.finalize();
        let fallback_ts = self.last_timestamp.unwrap_or(0.0);
        self.build_snapshot(fallback_ts)
    }

    fn route_event(&mut self, event: CombatEvent) {
        let strict_unresolved = self
            .party_registry
            .as_ref()
            .is_some_and(|p| p.strict && !p.has_ids());
        if strict_unresolved {
            if let Some(party_registry) = &mut self.party_registry {
                party_registry.observe_combat_event(&event);
            }
            if let Some(party_registry) = &mut self.party_registry {
                party_registry.try_resolve_self_id(self.name_registry.as_ref());
            }
        }
        if allow_event(&event, &mut self.party_registry, self.name_registry.as_ref()) {
            self.meter.push(&event);
            return;
        }
        if self.party_registry_wants_pending() {
            self.pending_events.push(event);
        }
    }

    fn party_registry_wants_pending(&self) -> bool {
        self.party_registry
            .as_ref()
            .is_some_and(|p| p.strict && (!p.has_ids() || p.has_unresolved_names()))
    }

    fn flush_or_trim_pending(&mut self, now_ts: f64) {
        if self.party_registry.is_none() {
            return;
        }
        if self.pending_events.is_empty() && self.pending_combat_states.is_empty() {
            return;
        }
        let cutoff = now_ts - PENDING_MAX_AGE_SECONDS;
        if cutoff > 0.0 {
            self.pending_events.retain(|e| e.timestamp >= cutoff);
            self.pending_combat_states.retain(|s| s.timestamp >= cutoff);
        }
        if self.pending_events.len() > PENDING_MAX_COUNT {
            let drop = self.pending_events.len() - PENDING_MAX_COUNT;
            self.pending_events.drain(0..drop);
        }
        if self.pending_combat_states.len() > PENDING_MAX_COUNT {
            let drop = self.pending_combat_states.len() - PENDING_MAX_COUNT;
            self.pending_combat_states.drain(0..drop);
        }
        if self.pending_events.is_empty() && self.pending_combat_states.is_empty() {
            return;
        }

        let has_ids = self.party_registry.as_ref().is_some_and(|p| p.has_ids());
        if !has_ids {
            return;
        }
        let retain_unresolved = self.party_registry.as_ref().is_some_and(|p| p.has_unresolved_names());

        let pending_events = std::mem::take(&mut self.pending_events);
        let mut remaining = Vec::new();
        for event in pending_events {
            if allow_event(&event, &mut self.party_registry, self.name_registry.as_ref()) {
                let name_registry = self.name_registry.as_ref();
                let merged = match name_registry {
                    Some(name_registry) => {
                        let lookup = |id: i32| name_registry.lookup(id).map(str::to_string);
                        self.meter.merge_event_into_history(&event, Some(&lookup))
                    }
                    None => self.meter.merge_event_into_history(&event, None),
                };
                if !merged {
                    self.meter.push(&event);
                }
            } else if retain_unresolved {
                remaining.push(event);
            }
        }
        self.pending_events = remaining;

        let mut pending_states = std::mem::take(&mut self.pending_combat_states);
        pending_states.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        let mut remaining_states = Vec::new();
        for state in pending_states {
            if allow_combat_state(state.entity_id, &mut self.party_registry, self.name_registry.as_ref()) {
                self.meter.observe_combat_state(state.entity_id, state.in_active, state.in_passive, state.timestamp);
            } else if retain_unresolved {
                remaining_states.push(state);
            }
        }
        self.pending_combat_states = remaining_states;
    }

    fn maybe_snapshot(&mut self, timestamp: f64) -> Option<PipelineSnapshot> {
        let due = self.last_emit.is_none() || self.snapshot_interval <= 0.0 || timestamp - self.last_emit.unwrap() >= self.snapshot_interval;
        if !due {
            return None;
        }
        self.last_emit = Some(timestamp);
        Some(self.build_snapshot(timestamp))
    }

    fn build_snapshot(&self, timestamp: f64) -> PipelineSnapshot {
        let snapshot = self.meter.snapshot();
        let names = self.name_registry.as_ref().map(NameRegistry::snapshot);
        PipelineSnapshot {
            timestamp,
            totals: snapshot.totals,
            names,
        }
    }
}

fn allow_event(event: &CombatEvent, party_registry: &mut Option<PartyRegistry>, name_registry: Option<&NameRegistry>) -> bool {
    match party_registry {
        None => true,
        Some(registry) => registry.allows(event.source_id, name_registry),
    }
}

fn allow_combat_state(entity_id: i32, party_registry: &mut Option<PartyRegistry>, name_registry: Option<&NameRegistry>) -> bool {
    match party_registry {
        None => true,
        Some(registry) => registry.allows(entity_id, name_registry),
    }
}

fn decode_combat_state(message: &PhotonMessage) -> Option<(i32, bool, bool)> {
    let PhotonMessage::Event(event) = message else {
        return None;
    };
    if event.event_code != COMBAT_STATE_EVENT_CODE {
        return None;
    }
    let subtype = event.parameters.get(&COMBAT_STATE_SUBTYPE_KEY).and_then(photon::protocol16::Value::as_i32)?;
    if !COMBAT_STATE_SUBTYPE_VALUES.contains(&subtype) {
        return None;
    }
    let entity_id = event.parameters.get(&COMBAT_STATE_ID_KEY).and_then(photon::protocol16::Value::as_i32)?;
    let in_active = event
        .parameters
        .get(&COMBAT_STATE_ACTIVE_KEY)
        .and_then(photon::protocol16::Value::as_i32)
        .unwrap_or(0)
        != 0;
    let in_passive = event
        .parameters
        .get(&COMBAT_STATE_PASSIVE_KEY)
        .and_then(photon::protocol16::Value::as_i32)
        .unwrap_or(0)
        != 0;
    Some((entity_id, in_active, in_passive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon::CombatEventKind;
    use crate::session_meter::SessionMeter;

    fn packet(ts: f64, payload: Vec<u8>) -> RawPacket {
        RawPacket {
            timestamp: ts,
            src_ip: "10.0.0.5".into(),
            src_port: 40000,
            dst_ip: "203.0.113.1".into(),
            dst_port: 5056,
            payload,
        }
    }

    #[test]
    fn pipeline_without_party_registry_allows_every_source() {
        let meter = SessionMeter::new(10.0, 20.0, 10);
        let mut pipeline = Pipeline::new(meter, 1.0);
        pipeline.route_event(CombatEvent {
            timestamp: 0.0,
            source_id: 7,
            target_id: 99,
            kind: CombatEventKind::Damage,
            amount: 120.0,
        });
        assert_eq!(pipeline.meter().snapshot().totals[&7].damage, 120.0);
    }

    #[test]
    fn snapshot_interval_gates_emission() {
        let meter = SessionMeter::new(10.0, 20.0, 10);
        let mut pipeline = Pipeline::new(meter, 5.0);
        let first = pipeline.process_packet(&packet(0.0, vec![]));
        assert!(first.is_some());
        let second = pipeline.process_packet(&packet(1.0, vec![]));
        assert!(second.is_none());
        let third = pipeline.process_packet(&packet(6.0, vec![]));
        assert!(third.is_some());
    }
}
