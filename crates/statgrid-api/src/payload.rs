//! Request body parsing.
//!
//! A body is either the packet payload itself or an object wrapping it:
//!
//! ```text
//! ["1:2:3:4:5:6:7", "1:2.5:3"]                          put
//! [["1:2:3:4:5:6:7", "1:2.5:3"], [...]]                 mput
//! {"stat": "avg_resp_time", "data": <payload>}          any route
//! ```
//!
//! A packet is a JSON array `[key, value]` or `[key, value, result]` of
//! strings. Anything else in its place is dropped.

use serde_json::Value;
use statgrid_queue::RawPacket;

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// `stat` of the wrapping object.
    pub stat: Option<String>,
    /// The packet payload (`data` of the wrapping object).
    pub data: Value,
    /// Whether the body was a `{stat, data}` object.
    pub wrapped: bool,
}

impl Payload {
    /// Parse a request body. `None` for empty, non-JSON, or empty-valued
    /// bodies.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        if is_blank(&value) {
            return None;
        }
        Some(match value {
            Value::Object(mut object) => Self {
                stat: object
                    .get("stat")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data: object.remove("data").unwrap_or(Value::Null),
                wrapped: true,
            },
            data => Self {
                stat: None,
                data,
                wrapped: false,
            },
        })
    }

    /// Packets carried by `data`: one when `multi` is false, an array of
    /// packets otherwise.
    pub fn packets(&self, multi: bool) -> Vec<RawPacket> {
        if !multi {
            return to_packet(&self.data).into_iter().collect();
        }
        match &self.data {
            Value::Array(items) => items.iter().filter_map(to_packet).collect(),
            _ => Vec::new(),
        }
    }
}

fn to_packet(value: &Value) -> Option<RawPacket> {
    let parts = value.as_array()?;
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let key = parts[0].as_str()?;
    let val = parts[1].as_str()?;
    let result = match parts.get(2) {
        Some(result) => Some(result.as_str()?.to_string()),
        None => None,
    };
    Some(RawPacket {
        key: key.to_string(),
        value: val.to_string(),
        result,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(object) => object.is_empty(),
        Value::Number(_) => false,
    }
}
