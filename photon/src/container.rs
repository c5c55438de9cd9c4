//! Photon UDP container framing: a packet header followed by one or more
//! commands. Only reliable/unreliable message commands carry an application
//! payload worth decoding; everything else (acks, pings, fragments) is
//! skipped silently, exactly as the framing described in the wire contract
//! requires.

use nom::{
    IResult,
    bytes::complete::take,
    number::complete::{be_i32, be_u16, be_u32, u8 as nom_u8},
};

use crate::protocol16::{self, EventData, OperationRequest, OperationResponse};

const COMMAND_TYPE_ACK: u8 = 1;
const COMMAND_TYPE_CONNECT: u8 = 2;
const COMMAND_TYPE_DISCONNECT: u8 = 4;
const COMMAND_TYPE_PING: u8 = 5;
const COMMAND_TYPE_SEND_RELIABLE: u8 = 6;
const COMMAND_TYPE_SEND_UNRELIABLE: u8 = 7;
const COMMAND_TYPE_SEND_FRAGMENT: u8 = 8;

const PACKET_HEADER_LEN: usize = 12;
const COMMAND_HEADER_LEN: usize = 12;

const MESSAGE_TYPE_OPERATION_REQUEST: u8 = 2;
const MESSAGE_TYPE_OPERATION_RESPONSE: u8 = 3;
const MESSAGE_TYPE_EVENT_DATA: u8 = 4;

/// One decoded Photon application message: an inbound event, an outbound
/// operation request, or an operation response.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotonMessage {
    Event(EventData),
    OperationRequest(OperationRequest),
    OperationResponse(OperationResponse),
}

impl PhotonMessage {
    pub fn event_code(&self) -> Option<u8> {
        match self {
            PhotonMessage::Event(event) => Some(event.event_code),
            _ => None,
        }
    }
}

struct PacketHeader {
    #[allow(dead_code)]
    peer_id: u16,
    #[allow(dead_code)]
    flags: u8,
    command_count: u8,
    #[allow(dead_code)]
    timestamp: u32,
    #[allow(dead_code)]
    challenge: i32,
}

fn packet_header(input: &[u8]) -> IResult<&[u8], PacketHeader> {
    let (input, peer_id) = be_u16(input)?;
    let (input, flags) = nom_u8(input)?;
    let (input, command_count) = nom_u8(input)?;
    let (input, timestamp) = be_u32(input)?;
    let (input, challenge) = be_i32(input)?;
    Ok((
        input,
        PacketHeader {
            peer_id,
            flags,
            command_count,
            timestamp,
            challenge,
        },
    ))
}

struct CommandHeader {
    command_type: u8,
    #[allow(dead_code)]
    channel_id: u8,
    #[allow(dead_code)]
    command_flags: u8,
    command_length: u32,
    #[allow(dead_code)]
    reliable_sequence_number: u32,
}

fn command_header(input: &[u8]) -> IResult<&[u8], CommandHeader> {
    let (input, command_type) = nom_u8(input)?;
    let (input, channel_id) = nom_u8(input)?;
    let (input, command_flags) = nom_u8(input)?;
    let (input, _reserved) = nom_u8(input)?;
    let (input, command_length) = be_u32(input)?;
    let (input, reliable_sequence_number) = be_u32(input)?;
    Ok((
        input,
        CommandHeader {
            command_type,
            channel_id,
            command_flags,
            command_length,
            reliable_sequence_number,
        },
    ))
}

/// Decode every Photon application message out of one raw UDP payload.
/// A malformed command, or one whose payload fails to decode, is dropped;
/// the remaining commands in the packet still get a chance.
pub fn decode_all(payload: &[u8]) -> Vec<PhotonMessage> {
    let Ok((mut rest, header)) = packet_header(payload) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for _ in 0..header.command_count {
        let Ok((next, cmd_header)) = command_header(rest) else {
            break;
        };
        let body_len = (cmd_header.command_length as usize).saturating_sub(COMMAND_HEADER_LEN);
        let Ok((next, body)) = take::<_, _, nom::error::Error<&[u8]>>(body_len)(next) else {
            break;
        };
        rest = next;

        if let Some(message) = decode_command(cmd_header.command_type, body) {
            out.push(message);
        }
    }
    out
}

fn decode_command(command_type: u8, body: &[u8]) -> Option<PhotonMessage> {
    match command_type {
        COMMAND_TYPE_SEND_RELIABLE => decode_application_message(body),
        COMMAND_TYPE_SEND_UNRELIABLE => {
            // unreliable sends are prefixed by a 4-byte sequence number
            // ahead of the application payload.
            let (rest, _seq) = be_u32::<_, nom::error::Error<&[u8]>>(body).ok()?;
            decode_application_message(rest)
        }
        COMMAND_TYPE_ACK
        | COMMAND_TYPE_CONNECT
        | COMMAND_TYPE_DISCONNECT
        | COMMAND_TYPE_PING
        | COMMAND_TYPE_SEND_FRAGMENT => None,
        _ => None,
    }
}

fn decode_application_message(body: &[u8]) -> Option<PhotonMessage> {
    let (rest, message_type) = nom_u8::<_, nom::error::Error<&[u8]>>(body).ok()?;
    match message_type {
        MESSAGE_TYPE_EVENT_DATA => protocol16::decode_event_data(rest).ok().map(PhotonMessage::Event),
        MESSAGE_TYPE_OPERATION_REQUEST => protocol16::decode_operation_request(rest)
            .ok()
            .map(PhotonMessage::OperationRequest),
        MESSAGE_TYPE_OPERATION_RESPONSE => protocol16::decode_operation_response(rest)
            .ok()
            .map(PhotonMessage::OperationResponse),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol16::{encode_event_data, EventData, Value};

    fn wrap_as_reliable_packet(event: &EventData) -> Vec<u8> {
        let mut app_payload = vec![MESSAGE_TYPE_EVENT_DATA];
        app_payload.extend_from_slice(&encode_event_data(event));

        let command_length = (COMMAND_HEADER_LEN + app_payload.len()) as u32;
        let mut command = vec![COMMAND_TYPE_SEND_RELIABLE, 0, 0, 0];
        command.extend_from_slice(&command_length.to_be_bytes());
        command.extend_from_slice(&1u32.to_be_bytes());
        command.extend_from_slice(&app_payload);

        let mut packet = vec![0, 1, 0, 1];
        packet.extend_from_slice(&0u32.to_be_bytes());
        packet.extend_from_slice(&0i32.to_be_bytes());
        packet.extend_from_slice(&command);
        packet
    }

    #[test]
    fn decodes_single_reliable_event() {
        let event = EventData {
            event_code: 1,
            parameters: [(252u8, Value::Integer(257))].into_iter().collect(),
        };
        let packet = wrap_as_reliable_packet(&event);
        let messages = decode_all(&packet);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event_code(), Some(1));
    }

    #[test]
    fn truncated_packet_yields_no_messages() {
        assert!(decode_all(&[0, 1]).is_empty());
    }

    #[test]
    fn bad_command_does_not_abort_remaining_commands() {
        let event = EventData {
            event_code: 1,
            parameters: [(252u8, Value::Integer(257))].into_iter().collect(),
        };
        let good = wrap_as_reliable_packet(&event);

        // two commands advertised, but only one is actually present — the
        // decoder must stop cleanly rather than panic or overrun the buffer.
        let mut packet = good.clone();
        packet[3] = 2;
        let messages = decode_all(&packet);
        assert_eq!(messages.len(), 1);
    }
}
