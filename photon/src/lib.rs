pub mod combat_mapper;
pub mod container;
pub mod error;
pub mod opcode_registry;
pub mod packet;
pub mod protocol16;

pub use combat_mapper::{CombatEvent, CombatEventKind, CombatEventMapper, MapperConfig, OverkillPolicy};
pub use container::PhotonMessage;
pub use error::Error;
pub use opcode_registry::OpcodeRegistry;
pub use packet::{RawPacket, SERVER_PORTS, ZONE_PORTS};

/// Decode a raw packet into zero or more Photon application messages.
pub fn decode_packet(packet: &RawPacket) -> Vec<PhotonMessage> {
    container::decode_all(&packet.payload)
}
