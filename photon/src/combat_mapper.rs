//! Maps a decoded [`PhotonMessage`] to zero, one, or many [`CombatEvent`]s.
//!
//! The exact subtype/parameter-key numbers for damage and heal events are
//! not part of the canonical capture this repository was built against —
//! unlike the name/party subtype keys, which are pinned bit-for-bit from a
//! known-good source, these are left as configuration so a real capture can
//! override them without touching the mapping logic itself.

use crate::container::PhotonMessage;
use crate::opcode_registry::OpcodeRegistry;
use crate::protocol16::Value;

pub const COMBAT_EVENT_CODE: u8 = 1;
pub const COMBAT_SUBTYPE_KEY: u8 = 252;

/// How to handle a damage/heal magnitude above [`MapperConfig::overkill_cap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverkillPolicy {
    Drop,
    Saturate,
}

#[derive(Debug, Clone, Copy)]
pub struct MapperConfig {
    pub single_target_subtype: i32,
    pub multi_target_subtype: i32,
    pub heal_over_time_subtype: i32,
    pub heal_instance_subtype: i32,
    pub source_key: u8,
    pub target_key: u8,
    pub amount_key: u8,
    pub target_list_key: u8,
    pub amount_list_key: u8,
    pub overkill_cap: f64,
    pub overkill_policy: OverkillPolicy,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            single_target_subtype: 3,
            multi_target_subtype: 53,
            heal_over_time_subtype: 56,
            heal_instance_subtype: 67,
            source_key: 0,
            target_key: 1,
            amount_key: 4,
            target_list_key: 2,
            amount_list_key: 3,
            overkill_cap: 1e7,
            overkill_policy: OverkillPolicy::Drop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatEventKind {
    Damage,
    Heal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatEvent {
    pub timestamp: f64,
    pub source_id: i32,
    pub target_id: i32,
    pub kind: CombatEventKind,
    pub amount: f64,
}

pub struct CombatEventMapper {
    config: MapperConfig,
    registry: OpcodeRegistry,
}

impl Default for CombatEventMapper {
    fn default() -> Self {
        Self::new(MapperConfig::default())
    }
}

impl CombatEventMapper {
    pub fn new(config: MapperConfig) -> Self {
        let registry = OpcodeRegistry::new().with_event(COMBAT_EVENT_CODE, "combat");
        Self { config, registry }
    }

    /// Attach a registry used only to label unmapped codes in debug logs.
    pub fn with_registry(mut self, registry: OpcodeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Map one message, given the packet timestamp it arrived with.
    pub fn map(&self, message: &PhotonMessage, timestamp: f64) -> Vec<CombatEvent> {
        let PhotonMessage::Event(event) = message else {
            return Vec::new();
        };
        if event.event_code != COMBAT_EVENT_CODE {
            log::debug!(
                "ignoring event code {} ({})",
                event.event_code,
                self.registry.event_label(event.event_code)
            );
            return Vec::new();
        }
        let Some(subtype) = event.parameters.get(&COMBAT_SUBTYPE_KEY).and_then(Value::as_i32) else {
            return Vec::new();
        };

        let cfg = &self.config;
        if subtype == cfg.single_target_subtype
            || subtype == cfg.heal_over_time_subtype
            || subtype == cfg.heal_instance_subtype
        {
            self.map_single_target(event, timestamp, subtype)
                .into_iter()
                .collect()
        } else if subtype == cfg.multi_target_subtype {
            self.map_multi_target(event, timestamp)
        } else {
            log::debug!("unmapped combat subtype {subtype}");
            Vec::new()
        }
    }

    fn map_single_target(
        &self,
        event: &crate::protocol16::EventData,
        timestamp: f64,
        subtype: i32,
    ) -> Option<CombatEvent> {
        let cfg = &self.config;
        let source_id = event.parameters.get(&cfg.source_key)?.as_i32()?;
        let target_id = event.parameters.get(&cfg.target_key)?.as_i32()?;
        let raw_amount = event.parameters.get(&cfg.amount_key)?.as_f64()?;

        let (kind, amount) = if subtype == cfg.heal_over_time_subtype || subtype == cfg.heal_instance_subtype {
            (CombatEventKind::Heal, raw_amount.abs())
        } else {
            self.classify_damage_channel(raw_amount)?
        };

        self.clamp_overkill(amount)
            .map(|amount| CombatEvent {
                timestamp,
                source_id,
                target_id,
                kind,
                amount,
            })
    }

    fn map_multi_target(
        &self,
        event: &crate::protocol16::EventData,
        timestamp: f64,
    ) -> Vec<CombatEvent> {
        let cfg = &self.config;
        let Some(source_id) = event.parameters.get(&cfg.source_key).and_then(Value::as_i32) else {
            return Vec::new();
        };
        let Some(targets) = event.parameters.get(&cfg.target_list_key).and_then(Value::as_i32_array) else {
            return Vec::new();
        };
        let Some(amounts) = event.parameters.get(&cfg.amount_list_key).and_then(|v| match v {
            Value::Array(items) => items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>(),
            _ => None,
        }) else {
            return Vec::new();
        };

        targets
            .into_iter()
            .zip(amounts)
            .filter_map(|(target_id, raw_amount)| {
                let (kind, amount) = self.classify_damage_channel(raw_amount)?;
                self.clamp_overkill(amount).map(|amount| CombatEvent {
                    timestamp,
                    source_id,
                    target_id,
                    kind,
                    amount,
                })
            })
            .collect()
    }

    /// Heal events arrive as negative damage on the damage channel.
    fn classify_damage_channel(&self, raw_amount: f64) -> Option<(CombatEventKind, f64)> {
        if raw_amount < 0.0 {
            Some((CombatEventKind::Heal, -raw_amount))
        } else {
            Some((CombatEventKind::Damage, raw_amount))
        }
    }

    fn clamp_overkill(&self, amount: f64) -> Option<f64> {
        if amount <= self.config.overkill_cap {
            return Some(amount);
        }
        match self.config.overkill_policy {
            OverkillPolicy::Drop => None,
            OverkillPolicy::Saturate => Some(self.config.overkill_cap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol16::EventData;
    use std::collections::BTreeMap;

    fn single_target_event(subtype: i32, source: i32, target: i32, amount: f64) -> PhotonMessage {
        let mut parameters = BTreeMap::new();
        parameters.insert(COMBAT_SUBTYPE_KEY, Value::Integer(subtype));
        parameters.insert(0, Value::Integer(source));
        parameters.insert(1, Value::Integer(target));
        parameters.insert(4, Value::Double(amount));
        PhotonMessage::Event(EventData {
            event_code: COMBAT_EVENT_CODE,
            parameters,
        })
    }

    #[test]
    fn maps_positive_damage() {
        let mapper = CombatEventMapper::default();
        let message = single_target_event(3, 10, 20, 150.0);
        let events = mapper.map(&message, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CombatEventKind::Damage);
        assert_eq!(events[0].amount, 150.0);
    }

    #[test]
    fn negative_damage_becomes_heal() {
        let mapper = CombatEventMapper::default();
        let message = single_target_event(3, 10, 20, -80.0);
        let events = mapper.map(&message, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CombatEventKind::Heal);
        assert_eq!(events[0].amount, 80.0);
    }

    #[test]
    fn overkill_above_cap_is_dropped_by_default() {
        let mapper = CombatEventMapper::default();
        let message = single_target_event(3, 10, 20, 2e7);
        assert!(mapper.map(&message, 1.0).is_empty());
    }

    #[test]
    fn overkill_can_be_configured_to_saturate() {
        let mut config = MapperConfig::default();
        config.overkill_policy = OverkillPolicy::Saturate;
        let mapper = CombatEventMapper::new(config);
        let message = single_target_event(3, 10, 20, 2e7);
        let events = mapper.map(&message, 1.0);
        assert_eq!(events[0].amount, config.overkill_cap);
    }

    #[test]
    fn unknown_subtype_produces_nothing() {
        let mapper = CombatEventMapper::default();
        let message = single_target_event(9999, 10, 20, 5.0);
        assert!(mapper.map(&message, 1.0).is_empty());
    }
}
