//! Decides which entity IDs belong to "my party" (including "me") using
//! only passively observed signals — the hardest subsystem, since the wire
//! never announces "your entity ID is N". Constants below are pinned
//! bit-for-bit from the wire contract.

use std::collections::{HashMap, HashSet, VecDeque};

use photon::protocol16::Value;
use photon::{CombatEvent, PhotonMessage, RawPacket, ZONE_PORTS};

use crate::name_registry::NameRegistry;

const PARTY_EVENT_CODE: u8 = 1;
const PARTY_SUBTYPE_KEY: u8 = 252;
const PARTY_SUBTYPE_NAME_KEYS: [(i32, u8); 2] = [(227, 13), (229, 6)];
const PARTY_SUBTYPE_ID_KEYS: [(i32, u8); 2] = [(209, 0), (210, 0)];
const SELF_SUBTYPE_NAME_KEYS: [(i32, u8); 2] = [(228, 1), (238, 0)];
const COMBAT_TARGET_SUBTYPE: i32 = 21;
const COMBAT_TARGET_A_KEY: u8 = 0;
const COMBAT_TARGET_B_KEY: u8 = 1;
const SERVER_PORTS: [u16; 3] = [5055, 5056, 5058];
const TARGET_REQUEST_OPCODE: u8 = 1;
const TARGET_REQUEST_ID_KEY: u8 = 5;
const TARGET_SELF_NAME_MIN_COUNT: usize = 5;
const TARGET_SELF_NAME_MIN_RATIO: f64 = 2.0;
const TARGET_SELF_NAME_WINDOW_SECONDS: f64 = 60.0;
const TARGET_SELF_NAME_CONFIRM_COUNT: usize = 20;
const SELF_ID_CANDIDATE_TTL_SECONDS: f64 = 15.0;
const SELF_ID_CORRELATION_WINDOW_SECONDS: f64 = 0.75;
const SELF_ID_MIN_SCORE: f64 = 1.0;
const SELF_ID_MIN_SCORE_GAP: f64 = 1.0;
const TARGET_LINK_WINDOW_SECONDS: f64 = 2.0;
const TARGET_LINK_REORDER_SECONDS: f64 = 0.15;
const RECENT_RING_CAPACITY: usize = 500;

type Fingerprint = (u64, String, u16, String, u16, usize);

#[derive(Debug)]
pub struct PartyRegistry {
    pub strict: bool,
    party_names: HashSet<String>,
    party_ids: HashSet<i32>,
    resolved_party_names: HashSet<String>,
    party_roster_candidates: HashSet<i32>,
    party_roster_self_seen: bool,
    combat_ids_seen: HashSet<i32>,
    target_ids: HashSet<i32>,
    self_ids: HashSet<i32>,
    primary_self_id: Option<i32>,
    self_name: Option<String>,
    self_name_confirmed: bool,
    recent_target_ids: VecDeque<(f64, i32)>,
    recent_outbound_ts: VecDeque<f64>,
    target_request_ts: HashMap<i32, f64>,
    self_candidate_scores: HashMap<i32, f64>,
    self_candidate_last_ts: HashMap<i32, f64>,
    self_candidate_link_hits: HashMap<i32, u32>,
    self_candidate_combat_hits: HashMap<i32, u32>,
    recent_target_links: VecDeque<(f64, i32, i32)>,
    last_packet_fingerprint: Option<Fingerprint>,
    zone_key: Option<(String, u16)>,
}

impl Default for PartyRegistry {
    fn default() -> Self {
        Self {
            strict: true,
            party_names: HashSet::new(),
            party_ids: HashSet::new(),
            resolved_party_names: HashSet::new(),
            party_roster_candidates: HashSet::new(),
            party_roster_self_seen: false,
            combat_ids_seen: HashSet::new(),
            target_ids: HashSet::new(),
            self_ids: HashSet::new(),
            primary_self_id: None,
            self_name: None,
            self_name_confirmed: false,
            recent_target_ids: VecDeque::new(),
            recent_outbound_ts: VecDeque::new(),
            target_request_ts: HashMap::new(),
            self_candidate_scores: HashMap::new(),
            self_candidate_last_ts: HashMap::new(),
            self_candidate_link_hits: HashMap::new(),
            self_candidate_combat_hits: HashMap::new(),
            recent_target_links: VecDeque::new(),
            last_packet_fingerprint: None,
            zone_key: None,
        }
    }
}

impl PartyRegistry {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, message: &PhotonMessage, packet: Option<&RawPacket>) {
        if let Some(packet) = packet {
            self.observe_packet_once(packet);
            self.apply_target_request(message, packet);
        }
        let PhotonMessage::Event(event) = message else {
            return;
        };
        if event.event_code != PARTY_EVENT_CODE {
            return;
        }
        let Some(subtype) = event.parameters.get(&PARTY_SUBTYPE_KEY).and_then(Value::as_i32) else {
            return;
        };

        if subtype == COMBAT_TARGET_SUBTYPE {
            self.apply_target_link(&event.parameters, packet);
            return;
        }

        if let Some((_, id_key)) = PARTY_SUBTYPE_ID_KEYS.iter().find(|(code, _)| *code == subtype) {
            if !self.party_names.is_empty() {
                return;
            }
            if let Some(entity_id) = event.parameters.get(id_key).and_then(Value::as_i32) {
                self.party_roster_candidates.insert(entity_id);
                if self.self_ids.contains(&entity_id) {
                    self.party_roster_self_seen = true;
                }
                self.promote_roster_candidates();
            }
            return;
        }

        let name_key = PARTY_SUBTYPE_NAME_KEYS
            .iter()
            .find(|(code, _)| *code == subtype)
            .map(|(_, key)| *key)
            .or_else(|| {
                SELF_SUBTYPE_NAME_KEYS
                    .iter()
                    .find(|(code, _)| *code == subtype)
                    .map(|(_, key)| *key)
            });
        let Some(name_key) = name_key else {
            return;
        };
        let names = event
            .parameters
            .get(&name_key)
            .and_then(Value::as_string_array)
            .or_else(|| {
                event
                    .parameters
                    .get(&name_key)
                    .and_then(Value::as_str)
                    .map(|s| vec![s.to_string()])
            })
            .unwrap_or_default();
        if names.is_empty() {
            return;
        }

        if SELF_SUBTYPE_NAME_KEYS.iter().any(|(code, _)| *code == subtype) {
            self.set_self_name(&names[0], true);
            return;
        }

        self.party_names.extend(names);
        self.resolved_party_names.clear();
        self.party_roster_candidates.clear();
        self.party_roster_self_seen = false;
        if !self.self_ids.is_empty() {
            self.party_ids.retain(|id| self.self_ids.contains(id));
        } else {
            self.party_ids.clear();
        }
    }

    pub fn observe_packet(&mut self, packet: &RawPacket) {
        self.last_packet_fingerprint = Some(fingerprint_of(packet));
        self.update_zone_key(packet);
        if ZONE_PORTS.contains(&packet.dst_port) && !SERVER_PORTS.contains(&packet.src_port) {
            push_capped(&mut self.recent_outbound_ts, packet.timestamp, RECENT_RING_CAPACITY);
        }
        prune_front(&mut self.recent_outbound_ts, packet.timestamp, SELF_ID_CANDIDATE_TTL_SECONDS, |ts| *ts);
        prune_front(
            &mut self.recent_target_ids,
            packet.timestamp,
            TARGET_SELF_NAME_WINDOW_SECONDS,
            |(ts, _)| *ts,
        );
        prune_front(
            &mut self.recent_target_links,
            packet.timestamp,
            TARGET_LINK_WINDOW_SECONDS,
            |(ts, _, _)| *ts,
        );
        self.prune_candidate_scores(Some(packet.timestamp));
        let cutoff = packet.timestamp - SELF_ID_CANDIDATE_TTL_SECONDS;
        self.target_request_ts.retain(|_, ts| *ts >= cutoff);
    }

    pub fn observe_combat_event(&mut self, event: &CombatEvent) {
        if self.primary_self_id.is_some() {
            return;
        }
        if !self.target_request_ts.contains_key(&event.target_id) {
            return;
        }
        if !has_outbound_correlation(&self.recent_outbound_ts, event.timestamp) {
            return;
        }
        self.add_self_candidate_score(event.source_id, event.timestamp, 1.0);
        *self.self_candidate_combat_hits.entry(event.source_id).or_insert(0) += 1;
    }

    pub fn try_resolve_self_id(&mut self, name_registry: Option<&NameRegistry>) {
        if self.primary_self_id.is_some() {
            return;
        }
        self.prune_candidate_scores(None);
        if self.self_candidate_scores.is_empty() {
            return;
        }

        if let (Some(name_registry), true, Some(self_name)) =
            (name_registry, self.self_name_confirmed, self.self_name.clone())
        {
            let matches: Vec<i32> = self
                .self_candidate_scores
                .keys()
                .copied()
                .filter(|id| name_registry.lookup(*id) == Some(self_name.as_str()))
                .collect();
            if matches.len() == 1 {
                let candidate = matches[0];
                if self.self_candidate_link_hits.get(&candidate).copied().unwrap_or(0) > 0
                    && self.self_candidate_combat_hits.get(&candidate).copied().unwrap_or(0) > 0
                {
                    self.accept_self_id_candidate(candidate);
                }
                return;
            }
        }

        let (best_id, best_score) = self
            .self_candidate_scores
            .iter()
            .map(|(id, score)| (*id, *score))
            .fold((i32::MIN, f64::MIN), |acc, item| if item.1 > acc.1 { item } else { acc });
        let second_score = self
            .self_candidate_scores
            .iter()
            .filter(|(id, _)| **id != best_id)
            .map(|(_, score)| *score)
            .fold(0.0_f64, f64::max);
        if best_score >= SELF_ID_MIN_SCORE && (best_score - second_score) >= SELF_ID_MIN_SCORE_GAP {
            if self.self_candidate_combat_hits.get(&best_id).copied().unwrap_or(0) == 0 {
                return;
            }
            self.accept_self_id_candidate(best_id);
        }
    }

    pub fn seed_names(&mut self, names: impl IntoIterator<Item = String>) {
        for name in names {
            if !name.is_empty() {
                self.party_names.insert(name);
            }
        }
    }

    pub fn seed_ids(&mut self, ids: impl IntoIterator<Item = i32>) {
        self.party_ids.extend(ids);
    }

    pub fn seed_self_ids(&mut self, ids: impl IntoIterator<Item = i32>) {
        for entity_id in ids {
            self.party_ids.insert(entity_id);
            self.self_ids.insert(entity_id);
            if self.primary_self_id.is_none() {
                self.primary_self_id = Some(entity_id);
            }
        }
        self.promote_roster_candidates();
    }

    pub fn set_self_name(&mut self, name: &str, confirmed: bool) {
        if name.is_empty() {
            return;
        }
        if confirmed {
            self.self_name = Some(name.to_string());
            self.self_name_confirmed = true;
            return;
        }
        if self.self_name_confirmed {
            return;
        }
        if self.self_name.is_none() {
            self.self_name = Some(name.to_string());
        }
    }

    pub fn snapshot_names(&self) -> HashSet<String> {
        self.party_names.clone()
    }

    pub fn snapshot_ids(&self) -> HashSet<i32> {
        self.party_ids.clone()
    }

    pub fn snapshot_self_ids(&self) -> HashSet<i32> {
        self.self_ids.clone()
    }

    pub fn self_name(&self) -> Option<&str> {
        self.self_name.as_deref()
    }

    pub fn has_ids(&self) -> bool {
        if self.strict {
            !self.self_ids.is_empty()
        } else {
            !self.party_ids.is_empty()
        }
    }

    pub fn has_unresolved_names(&self) -> bool {
        if self.party_names.is_empty() {
            return false;
        }
        self.party_names.difference(&self.resolved_party_names).next().is_some()
    }

    pub fn sync_names(&mut self, name_registry: &NameRegistry) {
        if self.party_names.is_empty() {
            return;
        }
        let snapshot = name_registry.snapshot();
        let mut mapped_ids = HashSet::new();
        for (entity_id, name) in snapshot {
            if !self.party_names.contains(&name) {
                continue;
            }
            if entity_id <= 0 {
                continue;
            }
            if !self.combat_ids_seen.contains(&entity_id) && !self.self_ids.contains(&entity_id) {
                continue;
            }
            mapped_ids.insert(entity_id);
            self.resolved_party_names.insert(name);
        }
        if !mapped_ids.is_empty() {
            self.party_ids.extend(mapped_ids);
        }
    }

    pub fn infer_self_name_from_targets(&mut self, name_registry: &NameRegistry) {
        if self.self_name_confirmed {
            return;
        }
        let Some(&(last_ts, _)) = self.recent_target_ids.back() else {
            return;
        };
        let cutoff = last_ts - TARGET_SELF_NAME_WINDOW_SECONDS;
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut distinct_ids: HashMap<String, HashSet<i32>> = HashMap::new();
        for (ts, entity_id) in &self.recent_target_ids {
            if *ts < cutoff {
                continue;
            }
            let Some(name) = name_registry.lookup(*entity_id) else {
                continue;
            };
            if name == "SYSTEM" {
                continue;
            }
            *counts.entry(name.to_string()).or_insert(0) += 1;
            distinct_ids.entry(name.to_string()).or_default().insert(*entity_id);
        }
        if counts.is_empty() {
            return;
        }
        let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        let (best_name, best_count) = sorted[0].clone();
        let second_count = sorted.get(1).map(|(_, c)| *c).unwrap_or(0);
        if best_count < TARGET_SELF_NAME_MIN_COUNT {
            return;
        }
        if second_count > 0 && (best_count as f64 / second_count as f64) < TARGET_SELF_NAME_MIN_RATIO {
            return;
        }
        let confirm = best_count >= TARGET_SELF_NAME_CONFIRM_COUNT
            || distinct_ids.get(&best_name).map(HashSet::len).unwrap_or(0) >= 2;
        if let Some(existing) = &self.self_name {
            if existing != &best_name {
                return;
            }
        }
        self.set_self_name(&best_name, confirm);
    }

    pub fn sync_id_names(&mut self, name_registry: &mut NameRegistry) {
        if self.self_ids.is_empty() {
            return;
        }
        let (Some(self_name), true) = (self.self_name.clone(), self.self_name_confirmed) else {
            return;
        };
        for entity_id in self.self_ids.clone() {
            let current = name_registry.lookup(entity_id).map(str::to_string);
            if let Some(current) = &current {
                if current != &self_name {
                    continue;
                }
            }
            name_registry.record_weak(entity_id, &self_name);
        }
    }

    pub fn allows(&mut self, source_id: i32, name_registry: Option<&NameRegistry>) -> bool {
        self.combat_ids_seen.insert(source_id);
        if self.strict {
            if self.self_ids.is_empty() {
                return false;
            }
            return self.party_ids.contains(&source_id) || self.self_ids.contains(&source_id);
        }
        if !self.party_ids.is_empty() {
            return self.party_ids.contains(&source_id);
        }
        if self.party_names.is_empty() {
            return true;
        }
        let Some(name_registry) = name_registry else {
            return true;
        };
        name_registry
            .lookup(source_id)
            .map(|name| self.party_names.contains(name))
            .unwrap_or(false)
    }

    fn apply_target_request(&mut self, message: &PhotonMessage, packet: &RawPacket) {
        let PhotonMessage::OperationRequest(request) = message else {
            return;
        };
        if !ZONE_PORTS.contains(&packet.dst_port) {
            return;
        }
        if request.code != TARGET_REQUEST_OPCODE {
            return;
        }
        let Some(entity_id) = request.parameters.get(&TARGET_REQUEST_ID_KEY).and_then(Value::as_i32) else {
            return;
        };
        self.target_ids.insert(entity_id);
        push_capped(&mut self.recent_target_ids, (packet.timestamp, entity_id), RECENT_RING_CAPACITY);
        self.target_request_ts.insert(entity_id, packet.timestamp);
        self.apply_target_link_hint_from_recent_links(entity_id, packet.timestamp);
    }

    fn apply_target_link(&mut self, parameters: &photon::protocol16::ParamMap, packet: Option<&RawPacket>) {
        let Some(first) = parameters.get(&COMBAT_TARGET_A_KEY).and_then(Value::as_i32) else {
            return;
        };
        let Some(second) = parameters.get(&COMBAT_TARGET_B_KEY).and_then(Value::as_i32) else {
            return;
        };
        let ts = packet.map(|p| p.timestamp).unwrap_or(0.0);
        push_capped(&mut self.recent_target_links, (ts, first, second), RECENT_RING_CAPACITY);
        if self.target_ids.is_empty() {
            return;
        }
        self.apply_target_link_hint(first, second, ts);
    }

    fn apply_target_link_hint_from_recent_links(&mut self, target_id: i32, ts: f64) {
        let links: Vec<(f64, i32, i32)> = self.recent_target_links.iter().rev().copied().collect();
        for (link_ts, first, second) in links {
            if (ts - link_ts) > TARGET_LINK_WINDOW_SECONDS {
                break;
            }
            if (ts - link_ts) > TARGET_LINK_REORDER_SECONDS {
                continue;
            }
            if first == target_id && second != target_id {
                self.apply_target_link_hint(first, second, ts);
            } else if second == target_id && first != target_id {
                self.apply_target_link_hint(first, second, ts);
            }
        }
    }

    fn apply_target_link_hint(&mut self, first: i32, second: i32, ts: f64) {
        let candidate = if self.target_ids.contains(&first) && !self.target_ids.contains(&second) {
            second
        } else if self.target_ids.contains(&second) && !self.target_ids.contains(&first) {
            first
        } else {
            return;
        };
        self.add_self_candidate_score(candidate, ts, 0.5);
        *self.self_candidate_link_hits.entry(candidate).or_insert(0) += 1;
    }

    fn accept_self_id_candidate(&mut self, candidate_id: i32) {
        if let Some(primary) = self.primary_self_id {
            if candidate_id != primary {
                return;
            }
        } else {
            self.primary_self_id = Some(candidate_id);
        }
        self.self_ids.insert(candidate_id);
        self.party_ids.insert(candidate_id);
        if self.party_roster_candidates.contains(&candidate_id) {
            self.party_roster_self_seen = true;
        }
        self.promote_roster_candidates();
    }

    fn promote_roster_candidates(&mut self) {
        if self.party_roster_candidates.is_empty() {
            return;
        }
        if !self.party_roster_self_seen && !self.self_ids.is_empty() {
            if self.party_roster_candidates.iter().any(|id| self.self_ids.contains(id)) {
                self.party_roster_self_seen = true;
            }
        }
        if !self.party_roster_self_seen {
            return;
        }
        self.party_ids.extend(self.party_roster_candidates.iter().copied());
    }

    fn add_self_candidate_score(&mut self, candidate_id: i32, ts: f64, weight: f64) {
        *self.self_candidate_scores.entry(candidate_id).or_insert(0.0) += weight;
        self.self_candidate_last_ts.insert(candidate_id, ts);
    }

    fn prune_candidate_scores(&mut self, now: Option<f64>) {
        let now = match now {
            Some(now) => now,
            None => match self.self_candidate_last_ts.values().cloned().fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            }) {
                Some(now) => now,
                None => return,
            },
        };
        let cutoff = now - SELF_ID_CANDIDATE_TTL_SECONDS;
        let expired: Vec<i32> = self
            .self_candidate_last_ts
            .iter()
            .filter(|(_, ts)| **ts < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.self_candidate_last_ts.remove(&id);
            self.self_candidate_scores.remove(&id);
            self.self_candidate_link_hits.remove(&id);
            self.self_candidate_combat_hits.remove(&id);
        }
    }

    fn observe_packet_once(&mut self, packet: &RawPacket) {
        let fingerprint = fingerprint_of(packet);
        if Some(&fingerprint) == self.last_packet_fingerprint.as_ref() {
            return;
        }
        self.last_packet_fingerprint = Some(fingerprint);
        self.observe_packet(packet);
    }

    /// A change of zone-endpoint clears all per-zone state before the next
    /// event is processed; `self_name` persists across zones.
    fn update_zone_key(&mut self, packet: &RawPacket) {
        let Some(zone_key) = packet.zone_key() else {
            return;
        };
        match &self.zone_key {
            None => self.zone_key = Some(zone_key),
            Some(current) if *current == zone_key => {}
            Some(_) => {
                self.zone_key = Some(zone_key);
                self.target_ids.clear();
                self.recent_target_ids.clear();
                self.recent_outbound_ts.clear();
                self.target_request_ts.clear();
                self.self_candidate_scores.clear();
                self.self_candidate_last_ts.clear();
                self.self_candidate_link_hits.clear();
                self.self_candidate_combat_hits.clear();
                self.party_ids.retain(|id| self.self_ids.contains(id));
                self.self_ids.clear();
                self.primary_self_id = None;
                self.party_roster_candidates.clear();
                self.party_roster_self_seen = false;
                self.combat_ids_seen.clear();
            }
        }
    }
}

/// Builds the owned, hashable dedup key from [`RawPacket::endpoint_fingerprint`]
/// — that method borrows from the packet, so its fields are copied into an
/// owned tuple here rather than duplicating which fields make up the key.
fn fingerprint_of(packet: &RawPacket) -> Fingerprint {
    let (timestamp, src_ip, src_port, dst_ip, dst_port, payload_len) = packet.endpoint_fingerprint();
    (timestamp.to_bits(), src_ip.to_string(), src_port, dst_ip.to_string(), dst_port, payload_len)
}

fn push_capped<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

fn prune_front<T>(ring: &mut VecDeque<T>, now: f64, window_seconds: f64, ts_of: impl Fn(&T) -> f64) {
    let cutoff = now - window_seconds;
    while let Some(front) = ring.front() {
        if ts_of(front) < cutoff {
            ring.pop_front();
        } else {
            break;
        }
    }
}

fn has_outbound_correlation(outbound_ts: &VecDeque<f64>, event_ts: f64) -> bool {
    for ts in outbound_ts.iter().rev() {
        if *ts > event_ts {
            continue;
        }
        return (event_ts - ts) <= SELF_ID_CORRELATION_WINDOW_SECONDS;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon::protocol16::{EventData, OperationRequest, ParamMap};
    use photon::CombatEventKind;

    fn packet(ts: f64, src_port: u16, dst_port: u16) -> RawPacket {
        RawPacket {
            timestamp: ts,
            src_ip: "10.0.0.5".into(),
            src_port,
            dst_ip: "203.0.113.1".into(),
            dst_port,
            payload: vec![],
        }
    }

    fn target_request(id: i32) -> PhotonMessage {
        let mut parameters: ParamMap = ParamMap::new();
        parameters.insert(TARGET_REQUEST_ID_KEY, Value::Integer(id));
        PhotonMessage::OperationRequest(OperationRequest {
            code: TARGET_REQUEST_OPCODE,
            parameters,
        })
    }

    fn target_link(a: i32, b: i32) -> PhotonMessage {
        let mut parameters: ParamMap = ParamMap::new();
        parameters.insert(PARTY_SUBTYPE_KEY, Value::Integer(COMBAT_TARGET_SUBTYPE));
        parameters.insert(COMBAT_TARGET_A_KEY, Value::Integer(a));
        parameters.insert(COMBAT_TARGET_B_KEY, Value::Integer(b));
        PhotonMessage::Event(EventData {
            event_code: PARTY_EVENT_CODE,
            parameters,
        })
    }

    #[test]
    fn synthetic_self_id_acceptance_scenario() {
        // Scenario 6 from the testable-properties section: a damage event of
        // amount 100 at t=0 from source 7, plus a zone-port outgoing packet
        // at t=-0.2 and an outgoing target-request for 99 at t=-0.1,
        // followed by a combat event (7->99) at t=0 should accept 7 as self.
        let mut registry = PartyRegistry::new(true);
        registry.observe_packet(&packet(-0.2, 40000, 5056));
        registry.observe(&target_request(99), Some(&packet(-0.1, 40000, 5056)));

        let event = CombatEvent {
            timestamp: 0.0,
            source_id: 7,
            target_id: 99,
            kind: CombatEventKind::Damage,
            amount: 100.0,
        };
        registry.observe_combat_event(&event);
        registry.try_resolve_self_id(None);

        assert_eq!(registry.snapshot_self_ids().len(), 1);
        assert!(registry.snapshot_self_ids().contains(&7));
    }

    #[test]
    fn zone_change_clears_self_ids() {
        let mut registry = PartyRegistry::new(true);
        registry.seed_self_ids([7]);
        registry.observe_packet(&packet(0.0, 5056, 40000));
        assert!(!registry.snapshot_self_ids().is_empty());

        registry.observe_packet(&packet(1.0, 5056, 40000));
        // same endpoint: no reset
        assert!(!registry.snapshot_self_ids().is_empty());

        registry.observe_packet(&packet(2.0, 5056, 50000));
        assert!(registry.snapshot_self_ids().is_empty());
    }

    #[test]
    fn target_link_hint_scores_when_other_end_already_targeted() {
        let mut registry = PartyRegistry::new(true);
        registry.observe(&target_request(99), Some(&packet(0.0, 40000, 5056)));
        registry.observe(&target_link(99, 7), Some(&packet(0.05, 40000, 5056)));
        assert!(registry.self_candidate_link_hits.get(&7).copied().unwrap_or(0) > 0);
    }
}
