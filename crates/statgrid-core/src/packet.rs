//! Packet codec — validation and decoding of the wire packet format.
//!
//! A packet travels as two or three `:`-delimited strings:
//!
//! ```text
//! key    = grp:loc:cmp:rnd:cat:stp:gmr[:tm]   (configured arity, digits only)
//! value  = answers:elapsed:points             (exactly three parts)
//! result = n[:n...]                           (optional, digits only, default "0")
//! ```
//!
//! Neither [`PacketCodec::split`] nor [`PacketCodec::decode`] fails loudly:
//! a malformed packet yields `None` and the caller drops it.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Separator between packet parts.
pub const PACKET_SEP: char = ':';

/// Separator between answers inside the first value part.
pub const ANSWER_SEP: char = ',';

/// Result used when a packet carries none.
pub const DEFAULT_RESULT: &str = "0";

/// Smallest key arity any protocol version uses.
pub const MIN_KEY_ARITY: usize = 5;

/// Largest key arity any protocol version uses.
pub const MAX_KEY_ARITY: usize = 8;

/// Key arity of the current wire protocol.
pub const DEFAULT_KEY_ARITY: usize = 7;

/// Packet split into its raw string parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketParts<'a> {
    pub key: Vec<&'a str>,
    pub value: Vec<&'a str>,
    pub result: Vec<&'a str>,
}

/// Decoded value tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketValue {
    /// Answer ids; non-numeric tokens are dropped.
    pub answers: Vec<u64>,
    /// Response time.
    pub elapsed: f64,
    /// Points scored.
    pub points: i64,
}

/// Fully decoded packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub key: Vec<u64>,
    pub value: PacketValue,
    pub result: Vec<u64>,
}

impl Packet {
    /// Location id (second key component).
    pub fn loc_id(&self) -> Option<u64> {
        self.key.get(1).copied()
    }
}

/// Validates and decodes packets for one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    key_arity: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_ARITY)
    }
}

impl PacketCodec {
    /// Create a codec expecting keys of `key_arity` parts.
    ///
    /// Arity bounds are enforced by config validation, not here.
    pub fn new(key_arity: usize) -> Self {
        Self { key_arity }
    }

    pub fn key_arity(&self) -> usize {
        self.key_arity
    }

    /// Split and validate a packet without converting anything.
    pub fn split<'a>(
        &self,
        key: &'a str,
        value: &'a str,
        result: Option<&'a str>,
    ) -> Option<PacketParts<'a>> {
        let key_parts: Vec<&str> = key.split(PACKET_SEP).collect();
        if key_parts.len() != self.key_arity {
            warn!(?key, expected = self.key_arity, "bad packet key arity");
            return None;
        }
        if !key_parts.iter().all(|part| is_digits(part)) {
            warn!(?key, "bad packet key parts");
            return None;
        }

        let value_parts: Vec<&str> = value.split(PACKET_SEP).collect();
        if value_parts.len() != 3 {
            warn!(?value, "bad packet value");
            return None;
        }

        let result = result.unwrap_or(DEFAULT_RESULT);
        let result_parts: Vec<&str> = result.split(PACKET_SEP).collect();
        if !result_parts.iter().all(|part| is_digits(part)) {
            warn!(?result, "bad packet result parts");
            return None;
        }

        Some(PacketParts {
            key: key_parts,
            value: value_parts,
            result: result_parts,
        })
    }

    /// True when the packet decodes. Packets that split but carry
    /// unconvertible parts are rejected too.
    pub fn is_valid(&self, key: &str, value: &str, result: Option<&str>) -> bool {
        self.decode(key, value, result).is_some()
    }

    /// Split, then convert every part into its typed form.
    pub fn decode(&self, key: &str, value: &str, result: Option<&str>) -> Option<Packet> {
        let parts = self.split(key, value, result)?;

        let key = parts
            .key
            .iter()
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        let answers = parts.value[0]
            .split(ANSWER_SEP)
            .filter(|answer| is_digits(answer))
            .map(|answer| answer.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        // `nan`, `inf` and overflowing literals parse but have no JSON form.
        let elapsed = parts.value[1]
            .parse::<f64>()
            .ok()
            .filter(|elapsed| elapsed.is_finite())?;
        let points = parts.value[2].parse::<i64>().ok()?;

        let result = parts
            .result
            .iter()
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        Some(Packet {
            key,
            value: PacketValue {
                answers,
                elapsed,
                points,
            },
            result,
        })
    }

    /// Decode many raw `(key, value, result)` triples, dropping undecodable ones.
    pub fn decode_all<'a, I>(&self, raw: I) -> Vec<Packet>
    where
        I: IntoIterator<Item = (&'a str, &'a str, Option<&'a str>)>,
    {
        raw.into_iter()
            .filter_map(|(key, value, result)| self.decode(key, value, result))
            .collect()
    }
}

fn is_digits(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PacketCodec {
        PacketCodec::new(7)
    }

    #[test]
    fn split_rejects_malformed() {
        let c = codec();
        assert!(c.split("", "", None).is_none());
        assert!(c.split("1:2:3:4", "", None).is_none());
        assert!(c.split("a:2:3:4:5:6:7", "1:2:3", None).is_none());
        assert!(c.split("1:2:3:4:5:6:7", "1:2", None).is_none());
        assert!(c.split("1:2:3:4:5:6", "8:9:10", None).is_none());
        assert!(c.split("1:2:3:4:5:6:7:8", "8:9:10", None).is_none());
        assert!(c.split("1::3:4:5:6:7", "8:9:10", None).is_none());
        assert!(c.split("1:2:3:4:5:6:7", "1:2:3:4", None).is_none());
    }

    #[test]
    fn split_accepts_well_formed() {
        let parts = codec().split("1:2:3:4:5:6:7", "1:2:3", None).unwrap();
        assert_eq!(parts.key, vec!["1", "2", "3", "4", "5", "6", "7"]);
        assert_eq!(parts.value, vec!["1", "2", "3"]);
        assert_eq!(parts.result, vec!["0"]);
    }

    #[test]
    fn split_value_first_part_is_free_form() {
        assert!(codec().is_valid("1:2:3:4:5:6:7", "abc,2:0.5:1", None));
    }

    #[test]
    fn split_checks_result_digits() {
        let c = codec();
        assert!(c.split("1:2:3:4:5:6:7", "1:2:3", Some("4:5")).is_some());
        assert!(c.split("1:2:3:4:5:6:7", "1:2:3", Some("4:x")).is_none());
        assert!(c.split("1:2:3:4:5:6:7", "1:2:3", Some("")).is_none());
    }

    #[test]
    fn arity_is_per_codec() {
        let old = PacketCodec::new(5);
        let new = PacketCodec::new(8);
        assert!(old.is_valid("1:2:3:4:5", "1:2:3", None));
        assert!(!old.is_valid("1:2:3:4:5:6:7:8", "1:2:3", None));
        assert!(new.is_valid("1:2:3:4:5:6:7:8", "1:2:3", None));
        assert!(!new.is_valid("1:2:3:4:5", "1:2:3", None));
    }

    #[test]
    fn decode_simple_packet() {
        let packet = codec().decode("1:2:3:4:5:6:7", "1:2:3", None).unwrap();
        assert_eq!(packet.key, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(packet.value.answers, vec![1]);
        assert_eq!(packet.value.elapsed, 2.0);
        assert_eq!(packet.value.points, 3);
        assert_eq!(packet.result, vec![0]);
        assert_eq!(packet.loc_id(), Some(2));
    }

    #[test]
    fn decode_multi_answer_packet() {
        let packet = codec()
            .decode("7:6:5:4:3:2:1", "2,3,x,1:6.5:4", Some("9:8"))
            .unwrap();
        assert_eq!(packet.key, vec![7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(packet.value.answers, vec![2, 3, 1]);
        assert_eq!(packet.value.elapsed, 6.5);
        assert_eq!(packet.value.points, 4);
        assert_eq!(packet.result, vec![9, 8]);
    }

    #[test]
    fn decode_preserves_key_and_numeric_parts() {
        let c = codec();
        let key = "10:20:30:40:50:60:70";
        let packet = c.decode(key, "5:0.25:-2", None).unwrap();
        let parts = c.split(key, "5:0.25:-2", None).unwrap();
        let rejoined: Vec<u64> = parts.key.iter().map(|p| p.parse().unwrap()).collect();
        assert_eq!(packet.key, rejoined);
        assert_eq!(packet.value.elapsed, 0.25);
        assert_eq!(packet.value.points, -2);
    }

    #[test]
    fn decode_fails_closed_on_conversion() {
        let c = codec();
        assert!(c.decode("1:2:3:4:5:6:7", "1:fast:3", None).is_none());
        assert!(c.decode("1:2:3:4:5:6:7", "1:2:3.5", None).is_none());
        assert!(
            c.decode("99999999999999999999999:2:3:4:5:6:7", "1:2:3", None)
                .is_none()
        );
        assert!(c.decode("a:2:3:4:5:6:7", "1:2:3", None).is_none());
    }

    #[test]
    fn non_finite_elapsed_is_rejected() {
        let c = codec();
        for value in ["1:nan:1", "1:NaN:1", "1:inf:1", "1:-inf:1", "1:1e999:1"] {
            assert!(c.decode("1:2:3:4:5:6:7", value, None).is_none(), "{value}");
            assert!(!c.is_valid("1:2:3:4:5:6:7", value, None), "{value}");
        }
        assert!(c.is_valid("1:2:3:4:5:6:7", "1:1e300:1", None));
    }

    #[test]
    fn decode_all_skips_invalid() {
        let packets = codec().decode_all([
            ("", "", None),
            ("a", "b", None),
            ("1:2:3:4:5:6:7", "1:2:3", None),
        ]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].key[0], 1);
    }
}
