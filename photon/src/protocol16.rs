//! Protocol16: Photon's tag-driven binary serialisation format.
//!
//! Every value is prefixed by a 1-byte type tag; integers are big-endian;
//! strings are short-length-prefixed UTF-8; arrays are homogeneous
//! `[tag][len:u16][items]`; dictionaries are `[key_tag][val_tag][count:u16][pairs]`.

use std::collections::BTreeMap;

use nom::{
    IResult, Parser,
    bytes::complete::take,
    multi::count,
    number::complete::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, u8 as nom_u8},
    sequence::pair,
};

use crate::error::{Error, Result};

const TAG_NULL: u8 = 42;
const TAG_DICTIONARY: u8 = 68;
const TAG_STRING_ARRAY: u8 = 97;
const TAG_BYTE: u8 = 98;
const TAG_DOUBLE: u8 = 100;
const TAG_EVENT_DATA: u8 = 101;
const TAG_FLOAT: u8 = 102;
const TAG_HASHTABLE: u8 = 104;
const TAG_INTEGER: u8 = 105;
const TAG_SHORT: u8 = 107;
const TAG_LONG: u8 = 108;
const TAG_INTEGER_ARRAY: u8 = 110;
const TAG_BOOLEAN: u8 = 111;
const TAG_OPERATION_RESPONSE: u8 = 112;
const TAG_OPERATION_REQUEST: u8 = 113;
const TAG_STRING: u8 = 115;
const TAG_BYTE_ARRAY: u8 = 120;
const TAG_ARRAY: u8 = 121;
const TAG_GUID: u8 = 103;

/// A decoded Protocol16 value. Arrays and lists are distinct variants
/// because the wire distinguishes a homogeneous array from a dictionary's
/// heterogeneous value slots.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    ByteArray(Vec<u8>),
    Guid([u8; 16]),
    Array(Vec<Value>),
    StringArray(Vec<String>),
    Dictionary(Vec<(Value, Value)>),
    Null,
}

impl Value {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Byte(v) => Some(*v as i32),
            Value::Short(v) => Some(*v as i32),
            Value::Integer(v) => Some(*v),
            Value::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Byte(v) => Some(*v as f64),
            Value::Short(v) => Some(*v as f64),
            Value::Integer(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<&[u8; 16]> {
        match self {
            Value::Guid(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_i32_array(&self) -> Option<Vec<i32>> {
        match self {
            Value::Array(items) => items.iter().map(Value::as_i32).collect(),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<Vec<String>> {
        match self {
            Value::StringArray(items) => Some(items.clone()),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect(),
            _ => None,
        }
    }
}

/// Parameter map keyed by the wire's u8 parameter key.
pub type ParamMap = BTreeMap<u8, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub event_code: u8,
    pub parameters: ParamMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub code: u8,
    pub parameters: ParamMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub code: u8,
    pub return_code: i16,
    pub parameters: ParamMap,
}

fn string(input: &[u8]) -> IResult<&[u8], String> {
    let (input, len) = be_u16(input)?;
    let (input, bytes) = take(len as usize)(input)?;
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|_| nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Char)))?;
    Ok((input, s))
}

fn byte_array(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, len) = be_i32(input)?;
    let len = usize::try_from(len)
        .map_err(|_| nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    let (input, bytes) = take(len)(input)?;
    Ok((input, bytes.to_vec()))
}

fn guid(input: &[u8]) -> IResult<&[u8], [u8; 16]> {
    let (input, bytes) = take(16usize)(input)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(bytes);
    Ok((input, out))
}

fn tagged_value(input: &[u8]) -> IResult<&[u8], Value> {
    let (input, tag) = nom_u8(input)?;
    decode_value_body(tag, input)
}

fn decode_value_body(tag: u8, input: &[u8]) -> IResult<&[u8], Value> {
    match tag {
        TAG_NULL => Ok((input, Value::Null)),
        TAG_BYTE => nom_u8.map(|v| Value::Byte(v as i8)).parse(input),
        TAG_SHORT => be_i16.map(Value::Short).parse(input),
        TAG_INTEGER => be_i32.map(Value::Integer).parse(input),
        TAG_LONG => be_i64.map(Value::Long).parse(input),
        TAG_FLOAT => be_f32.map(Value::Float).parse(input),
        TAG_DOUBLE => be_f64.map(Value::Double).parse(input),
        TAG_BOOLEAN => nom_u8.map(|v| Value::Bool(v != 0)).parse(input),
        TAG_STRING => string.map(Value::Str).parse(input),
        TAG_BYTE_ARRAY => byte_array.map(Value::ByteArray).parse(input),
        TAG_GUID => guid.map(Value::Guid).parse(input),
        TAG_STRING_ARRAY => {
            let (input, len) = be_u16(input)?;
            count(string, len as usize)
                .map(Value::StringArray)
                .parse(input)
        }
        TAG_ARRAY | TAG_INTEGER_ARRAY => {
            let (input, element_tag) = nom_u8(input)?;
            let (input, len) = be_u16(input)?;
            count(
                |i| decode_value_body(element_tag, i),
                len as usize,
            )
            .map(Value::Array)
            .parse(input)
        }
        TAG_DICTIONARY | TAG_HASHTABLE => {
            let (input, (key_tag, val_tag)) = pair(nom_u8, nom_u8).parse(input)?;
            let (input, count_) = be_u16(input)?;
            count(
                pair(
                    |i| decode_value_body(key_tag, i),
                    |i| decode_value_body(val_tag, i),
                ),
                count_ as usize,
            )
            .map(Value::Dictionary)
            .parse(input)
        }
        _unknown => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Switch,
        ))),
    }
}

fn parameters(input: &[u8], param_count: u8) -> IResult<&[u8], ParamMap> {
    let (input, pairs) = count(pair(nom_u8, tagged_value), param_count as usize).parse(input)?;
    Ok((input, pairs.into_iter().collect()))
}

fn decode_event_data_inner(input: &[u8]) -> IResult<&[u8], EventData> {
    let (input, event_code) = nom_u8(input)?;
    let (input, param_count) = nom_u8(input)?;
    let (input, parameters) = parameters(input, param_count)?;
    Ok((
        input,
        EventData {
            event_code,
            parameters,
        },
    ))
}

fn decode_operation_request_inner(input: &[u8]) -> IResult<&[u8], OperationRequest> {
    let (input, code) = nom_u8(input)?;
    let (input, param_count) = nom_u8(input)?;
    let (input, parameters) = parameters(input, param_count)?;
    Ok((input, OperationRequest { code, parameters }))
}

fn decode_operation_response_inner(input: &[u8]) -> IResult<&[u8], OperationResponse> {
    let (input, code) = nom_u8(input)?;
    let (input, return_code) = be_i16(input)?;
    let (input, param_count) = nom_u8(input)?;
    let (input, parameters) = parameters(input, param_count)?;
    Ok((
        input,
        OperationResponse {
            code,
            return_code,
            parameters,
        },
    ))
}

/// Decode a standalone Protocol16 value, e.g. for round-trip tests.
pub fn decode_value(input: &[u8]) -> Result<Value> {
    tagged_value(input)
        .map(|(_, value)| value)
        .map_err(|_| Error::Truncated)
}

pub fn decode_event_data(payload: &[u8]) -> Result<EventData> {
    decode_event_data_inner(payload)
        .map(|(_, event)| event)
        .map_err(|_| Error::MalformedLength)
}

pub fn decode_operation_request(payload: &[u8]) -> Result<OperationRequest> {
    decode_operation_request_inner(payload)
        .map(|(_, request)| request)
        .map_err(|_| Error::MalformedLength)
}

pub fn decode_operation_response(payload: &[u8]) -> Result<OperationResponse> {
    decode_operation_response_inner(payload)
        .map(|(_, response)| response)
        .map_err(|_| Error::MalformedLength)
}

/// Encode a value back to wire bytes. Used only by round-trip tests; the
/// live decoder never needs to re-encode.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_tagged(value, &mut out);
    out
}

fn encode_tagged(value: &Value, out: &mut Vec<u8>) {
    out.push(tag_of(value));
    encode_body(value, out);
}

fn tag_of(value: &Value) -> u8 {
    match value {
        Value::Null => TAG_NULL,
        Value::Byte(_) => TAG_BYTE,
        Value::Short(_) => TAG_SHORT,
        Value::Integer(_) => TAG_INTEGER,
        Value::Long(_) => TAG_LONG,
        Value::Float(_) => TAG_FLOAT,
        Value::Double(_) => TAG_DOUBLE,
        Value::Bool(_) => TAG_BOOLEAN,
        Value::Str(_) => TAG_STRING,
        Value::ByteArray(_) => TAG_BYTE_ARRAY,
        Value::Guid(_) => TAG_GUID,
        Value::Array(_) => TAG_ARRAY,
        Value::StringArray(_) => TAG_STRING_ARRAY,
        Value::Dictionary(_) => TAG_DICTIONARY,
    }
}

fn encode_body(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => {}
        Value::Byte(v) => out.push(*v as u8),
        Value::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Integer(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Bool(v) => out.push(if *v { 1 } else { 0 }),
        Value::Str(s) => {
            out.extend_from_slice(&(s.len() as u16).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::ByteArray(bytes) => {
            out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Value::Guid(bytes) => out.extend_from_slice(bytes),
        Value::Array(items) => {
            let elem_tag = items.first().map(tag_of).unwrap_or(TAG_NULL);
            out.push(elem_tag);
            out.extend_from_slice(&(items.len() as u16).to_be_bytes());
            for item in items {
                encode_body(item, out);
            }
        }
        Value::StringArray(items) => {
            out.extend_from_slice(&(items.len() as u16).to_be_bytes());
            for item in items {
                out.extend_from_slice(&(item.len() as u16).to_be_bytes());
                out.extend_from_slice(item.as_bytes());
            }
        }
        Value::Dictionary(pairs) => {
            let key_tag = pairs.first().map(|(k, _)| tag_of(k)).unwrap_or(TAG_NULL);
            let val_tag = pairs.first().map(|(_, v)| tag_of(v)).unwrap_or(TAG_NULL);
            out.push(key_tag);
            out.push(val_tag);
            out.extend_from_slice(&(pairs.len() as u16).to_be_bytes());
            for (k, v) in pairs {
                encode_body(k, out);
                encode_body(v, out);
            }
        }
    }
}

pub fn encode_event_data(event: &EventData) -> Vec<u8> {
    let mut out = vec![event.event_code, event.parameters.len() as u8];
    for (key, value) in &event.parameters {
        out.push(*key);
        encode_tagged(value, &mut out);
    }
    out
}

pub fn encode_operation_request(request: &OperationRequest) -> Vec<u8> {
    let mut out = vec![request.code, request.parameters.len() as u8];
    for (key, value) in &request.parameters {
        out.push(*key);
        encode_tagged(value, &mut out);
    }
    out
}

pub const TAG_EVENT_DATA_MARKER: u8 = TAG_EVENT_DATA;
pub const TAG_OPERATION_REQUEST_MARKER: u8 = TAG_OPERATION_REQUEST;
pub const TAG_OPERATION_RESPONSE_MARKER: u8 = TAG_OPERATION_RESPONSE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_integer() {
        let value = Value::Integer(-42);
        let bytes = encode_value(&value);
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_string() {
        let value = Value::Str("SocialFur10".to_string());
        let bytes = encode_value(&value);
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_guid() {
        let value = Value::Guid([7u8; 16]);
        let bytes = encode_value(&value);
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_integer_array() {
        let value = Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let bytes = encode_value(&value);
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn decodes_event_data_record() {
        let event = EventData {
            event_code: 1,
            parameters: [(252u8, Value::Integer(275))].into_iter().collect(),
        };
        let bytes = encode_event_data(&event);
        assert_eq!(decode_event_data(&bytes).unwrap(), event);
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        assert!(decode_event_data(&[1]).is_err());
    }
}
