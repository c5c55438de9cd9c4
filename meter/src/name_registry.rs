//! Resolves numeric entity IDs to player names from multiple weak signals
//! observed in the Photon stream. Subtype/key numbers below are the wire
//! contract and must be preserved bit-for-bit.

use std::collections::{HashMap, HashSet};

use photon::protocol16::Value;
use photon::PhotonMessage;

const NAME_EVENT_CODE: u8 = 1;
const NAME_ID_KEY: u8 = 0;
const NAME_VALUE_KEY: u8 = 1;
const NAME_SUBTYPE_KEY: u8 = 252;
const NAME_SUBTYPE_ID_NAME: i32 = 275;
const NAME_SUBTYPE_NAME_KEY: u8 = 2;
const NAME_SUBTYPE_ENTITY_NAME: i32 = 166;
const NAME_SUBTYPE_ENTITY_ID_KEY: u8 = 0;
const NAME_SUBTYPE_ENTITY_ALT_ID_KEY: u8 = 4;
const NAME_SUBTYPE_ENTITY_NAME_KEY: u8 = 5;
const NAME_SUBTYPE_UNIT_INFO: i32 = 29;
const NAME_SUBTYPE_UNIT_NAME_KEY: u8 = 1;
const NAME_SUBTYPE_CHARACTER_INFO: i32 = 30;
const NAME_SUBTYPE_CHARACTER_NAME_KEY: u8 = 5;
const NAME_SUBTYPE_CHARACTER_ITEM_KEY: u8 = 1;
const NAME_SUBTYPE_EQUIPMENT: i32 = 90;
const NAME_EQUIPMENT_ENTITY_ID_KEY: u8 = 0;
const NAME_EQUIPMENT_ITEM_LIST_KEY: u8 = 2;
const NAME_EQUIPMENT_MIN_MATCHES: usize = 3;
const NAME_EQUIPMENT_MIN_RATIO: f64 = 2.0;
const PARTY_SUBTYPE_KEY: u8 = 252;
const PARTY_ROSTER_GUIDS_NAMES: [(i32, u8, u8); 2] = [(229, 5, 6), (227, 12, 13)];

type Guid = [u8; 16];

#[derive(Debug, Default)]
pub struct NameRegistry {
    names: HashMap<i32, String>,
    guid_names: HashMap<Guid, String>,
    id_guids: HashMap<i32, Guid>,
    strong_name_ids: HashMap<String, HashSet<i32>>,
    weak_name_ids: HashMap<String, HashSet<i32>>,
    strong_id_names: HashMap<i32, String>,
    item_names: HashMap<i32, HashSet<String>>,
    entity_items: HashMap<i32, Vec<i32>>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, message: &PhotonMessage) {
        let PhotonMessage::Event(event) = message else {
            return;
        };
        if event.event_code != NAME_EVENT_CODE {
            return;
        }
        self.apply_party_roster(&event.parameters);
        self.apply_guid_link(&event.parameters);

        let subtype = event.parameters.get(&NAME_SUBTYPE_KEY).and_then(Value::as_i32);

        if subtype == Some(NAME_SUBTYPE_ENTITY_NAME) {
            if let Some(name) = event
                .parameters
                .get(&NAME_SUBTYPE_ENTITY_NAME_KEY)
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
            {
                let name = name.to_string();
                let id = event.parameters.get(&NAME_SUBTYPE_ENTITY_ID_KEY).and_then(Value::as_i32);
                let alt_id = event
                    .parameters
                    .get(&NAME_SUBTYPE_ENTITY_ALT_ID_KEY)
                    .and_then(Value::as_i32);
                self.store_opt(id, Some(name.clone()), false);
                self.store_opt(alt_id, Some(name), false);
            }
        }

        if subtype == Some(NAME_SUBTYPE_UNIT_INFO) {
            if let Some(name) = event
                .parameters
                .get(&NAME_SUBTYPE_UNIT_NAME_KEY)
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
            {
                let id = event.parameters.get(&NAME_SUBTYPE_ENTITY_ID_KEY).and_then(Value::as_i32);
                self.store_opt(id, Some(name.to_string()), false);
            }
        }

        if subtype == Some(NAME_SUBTYPE_CHARACTER_INFO) {
            if let Some(name) = event
                .parameters
                .get(&NAME_SUBTYPE_CHARACTER_NAME_KEY)
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
            {
                let name = name.to_string();
                let entity_id = event.parameters.get(&NAME_SUBTYPE_ENTITY_ID_KEY).and_then(Value::as_i32);
                self.store_opt(entity_id, Some(name.clone()), false);
                if let Some(item_id) = event
                    .parameters
                    .get(&NAME_SUBTYPE_CHARACTER_ITEM_KEY)
                    .and_then(Value::as_i32)
                {
                    self.item_names.entry(item_id).or_default().insert(name);
                    if let Some(entity_id) = entity_id {
                        self.infer_name_from_items(entity_id);
                    }
                    for target_id in self
                        .entity_items
                        .iter()
                        .filter(|(_, items)| items.contains(&item_id))
                        .map(|(id, _)| *id)
                        .collect::<Vec<_>>()
                    {
                        self.infer_name_from_items(target_id);
                    }
                }
            }
        }

        if subtype == Some(NAME_SUBTYPE_EQUIPMENT) {
            let entity_id = event.parameters.get(&NAME_EQUIPMENT_ENTITY_ID_KEY).and_then(Value::as_i32);
            let items = event.parameters.get(&NAME_EQUIPMENT_ITEM_LIST_KEY).and_then(Value::as_i32_array);
            if let (Some(entity_id), Some(items)) = (entity_id, items) {
                let filtered: Vec<i32> = items.into_iter().filter(|item| *item > 0).collect();
                if !filtered.is_empty() {
                    self.entity_items.insert(entity_id, filtered);
                    self.infer_name_from_items(entity_id);
                }
            }
        }

        if subtype == Some(NAME_SUBTYPE_ID_NAME) {
            let id = event.parameters.get(&NAME_ID_KEY).and_then(Value::as_i32);
            let name = event
                .parameters
                .get(&NAME_SUBTYPE_NAME_KEY)
                .and_then(Value::as_str)
                .map(str::to_string);
            self.store_opt(id, name, true);
        }

        let raw_id = event.parameters.get(&NAME_ID_KEY);
        let raw_name = event.parameters.get(&NAME_VALUE_KEY);
        if let (Some(ids), Some(names)) = (
            raw_id.and_then(Value::as_i32_array),
            raw_name.and_then(Value::as_string_array),
        ) {
            for (id, name) in ids.into_iter().zip(names) {
                self.store(id, &name, false);
            }
            return;
        }

        self.store_opt(
            raw_id.and_then(Value::as_i32),
            raw_name.and_then(Value::as_str).map(str::to_string),
            false,
        );
    }

    pub fn snapshot(&self) -> HashMap<i32, String> {
        let mut merged = self.names.clone();
        for (entity_id, guid) in &self.id_guids {
            if merged.contains_key(entity_id) {
                continue;
            }
            if let Some(name) = self.guid_names.get(guid) {
                merged.insert(*entity_id, name.clone());
            }
        }
        merged
    }

    pub fn lookup(&self, entity_id: i32) -> Option<&str> {
        if let Some(name) = self.names.get(&entity_id) {
            return Some(name.as_str());
        }
        let guid = self.id_guids.get(&entity_id)?;
        self.guid_names.get(guid).map(String::as_str)
    }

    pub fn record(&mut self, entity_id: i32, name: &str) {
        self.store(entity_id, name, false);
    }

    pub fn record_weak(&mut self, entity_id: i32, name: &str) {
        self.store(entity_id, name, true);
    }

    fn store_opt(&mut self, entity_id: Option<i32>, name: Option<String>, weak: bool) {
        if let (Some(entity_id), Some(name)) = (entity_id, name) {
            self.store(entity_id, &name, weak);
        }
    }

    /// (i) a weak assignment never shadows an existing strong one for a
    /// different name; (ii) promoting a weak binding to strong unbinds
    /// conflicting weak bindings.
    fn store(&mut self, entity_id: i32, name: &str, weak: bool) {
        if name.is_empty() {
            return;
        }
        if weak {
            if let Some(strong_name) = self.strong_id_names.get(&entity_id) {
                if strong_name != name {
                    return;
                }
            }
            if let Some(strong_ids) = self.strong_name_ids.get(name) {
                if !strong_ids.is_empty() && !strong_ids.contains(&entity_id) {
                    return;
                }
            }
            self.weak_name_ids
                .entry(name.to_string())
                .or_default()
                .insert(entity_id);
        } else {
            let strong_ids = self.strong_name_ids.entry(name.to_string()).or_default();
            strong_ids.insert(entity_id);
            self.strong_id_names.insert(entity_id, name.to_string());
            let strong_ids = strong_ids.clone();
            if let Some(weak_ids) = self.weak_name_ids.get_mut(name) {
                for weak_id in weak_ids.iter().copied().collect::<Vec<_>>() {
                    if strong_ids.contains(&weak_id) {
                        continue;
                    }
                    if self.names.get(&weak_id) == Some(&name.to_string()) {
                        self.names.remove(&weak_id);
                    }
                }
                weak_ids.retain(|id| strong_ids.contains(id));
            }
        }
        self.names.insert(entity_id, name.to_string());
    }

    fn apply_guid_link(&mut self, parameters: &photon::protocol16::ParamMap) {
        let Some(guid) = parameters.get(&3).and_then(Value::as_guid) else {
            return;
        };
        let Some(entity_id) = parameters.get(&1).and_then(Value::as_i32) else {
            return;
        };
        self.id_guids.insert(entity_id, *guid);
    }

    fn apply_party_roster(&mut self, parameters: &photon::protocol16::ParamMap) {
        let Some(subtype) = parameters.get(&PARTY_SUBTYPE_KEY).and_then(Value::as_i32) else {
            return;
        };
        let Some((_, guid_key, name_key)) = PARTY_ROSTER_GUIDS_NAMES
            .iter()
            .find(|(code, _, _)| *code == subtype)
        else {
            return;
        };
        let Some(guids) = parameters.get(guid_key) else {
            return;
        };
        let Some(names) = parameters.get(name_key).and_then(Value::as_string_array) else {
            return;
        };
        let photon::protocol16::Value::Array(guid_values) = guids else {
            return;
        };
        for (guid_value, name) in guid_values.iter().zip(names) {
            if let Some(guid) = guid_value.as_guid() {
                if !name.is_empty() {
                    self.guid_names.insert(*guid, name);
                }
            }
        }
    }

    fn infer_name_from_items(&mut self, entity_id: i32) {
        let Some(items) = self.entity_items.get(&entity_id) else {
            return;
        };
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item_id in items {
            if let Some(names) = self.item_names.get(item_id) {
                for name in names {
                    if name.is_empty() {
                        continue;
                    }
                    *counts.entry(name.clone()).or_insert(0) += 1;
                }
            }
        }
        if counts.is_empty() {
            return;
        }
        let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        let (best_name, best_count) = sorted[0].clone();
        let second_count = sorted.get(1).map(|(_, c)| *c).unwrap_or(0);
        if best_count < NAME_EQUIPMENT_MIN_MATCHES {
            return;
        }
        if second_count > 0 && (best_count as f64 / second_count as f64) < NAME_EQUIPMENT_MIN_RATIO {
            return;
        }
        if let Some(current_strong) = self.strong_id_names.get(&entity_id) {
            if current_strong != &best_name {
                return;
            }
        }
        self.store(entity_id, &best_name, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon::protocol16::{EventData, ParamMap};

    fn event(subtype: i32, params: Vec<(u8, Value)>) -> PhotonMessage {
        let mut parameters: ParamMap = params.into_iter().collect();
        parameters.insert(NAME_SUBTYPE_KEY, Value::Integer(subtype));
        PhotonMessage::Event(EventData {
            event_code: NAME_EVENT_CODE,
            parameters,
        })
    }

    #[test]
    fn direct_id_name_binding_is_strong() {
        let mut registry = NameRegistry::new();
        registry.record(7, "SocialFur10");
        assert_eq!(registry.lookup(7), Some("SocialFur10"));
    }

    #[test]
    fn weak_binding_does_not_shadow_conflicting_strong() {
        let mut registry = NameRegistry::new();
        registry.record(7, "SocialFur10");
        registry.record_weak(7, "Draxier");
        assert_eq!(registry.lookup(7), Some("SocialFur10"));
    }

    #[test]
    fn promoting_strong_removes_conflicting_weak() {
        let mut registry = NameRegistry::new();
        registry.record_weak(9, "SocialFur10");
        assert_eq!(registry.lookup(9), Some("SocialFur10"));
        registry.record(9, "Draxier");
        assert_eq!(registry.lookup(9), Some("Draxier"));
    }

    #[test]
    fn entity_name_subtype_binds_id_and_alt_id() {
        let mut registry = NameRegistry::new();
        let message = event(
            NAME_SUBTYPE_ENTITY_NAME,
            vec![
                (NAME_SUBTYPE_ENTITY_ID_KEY, Value::Integer(5)),
                (NAME_SUBTYPE_ENTITY_ALT_ID_KEY, Value::Integer(6)),
                (NAME_SUBTYPE_ENTITY_NAME_KEY, Value::Str("Draxier".into())),
            ],
        );
        registry.observe(&message);
        assert_eq!(registry.lookup(5), Some("Draxier"));
        assert_eq!(registry.lookup(6), Some("Draxier"));
    }

    #[test]
    fn equipment_fingerprint_requires_three_matches_and_double_ratio() {
        let mut registry = NameRegistry::new();
        for item_id in [100, 101, 102] {
            let message = event(
                NAME_SUBTYPE_CHARACTER_INFO,
                vec![
                    (NAME_SUBTYPE_ENTITY_ID_KEY, Value::Integer(999)),
                    (NAME_SUBTYPE_CHARACTER_ITEM_KEY, Value::Integer(item_id)),
                    (NAME_SUBTYPE_CHARACTER_NAME_KEY, Value::Str("SocialFur10".into())),
                ],
            );
            registry.observe(&message);
        }
        let equip = event(
            NAME_SUBTYPE_EQUIPMENT,
            vec![
                (NAME_EQUIPMENT_ENTITY_ID_KEY, Value::Integer(42)),
                (
                    NAME_EQUIPMENT_ITEM_LIST_KEY,
                    Value::Array(vec![Value::Integer(100), Value::Integer(101), Value::Integer(102)]),
                ),
            ],
        );
        registry.observe(&equip);
        assert_eq!(registry.lookup(42), Some("SocialFur10"));
    }
}
