//! Built-in reducers.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use statgrid_core::Packet;

use crate::registry::Computable;

/// Number of locations `tops_of_locs` reports.
pub const TOPS_LIMIT: usize = 10;

/// Mean response time over all packets of a session; `0.0` when there are none.
pub struct AvgRespTime;

impl Computable for AvgRespTime {
    fn name(&self) -> &'static str {
        "avg_resp_time"
    }

    fn compute(&self, packets: &[Packet]) -> anyhow::Result<Value> {
        if packets.is_empty() {
            return Ok(json!(0.0));
        }
        let sum: f64 = packets.iter().map(|p| p.value.elapsed).sum();
        Ok(json!(sum / packets.len() as f64))
    }
}

/// Locations ranked by the percentage of packets that scored points.
///
/// Output is `[[loc, pct], ...]`, ordered by `(pct, loc)` descending.
pub struct TopsOfLocs;

impl Computable for TopsOfLocs {
    fn name(&self) -> &'static str {
        "tops_of_locs"
    }

    fn compute(&self, packets: &[Packet]) -> anyhow::Result<Value> {
        // loc → (scored, total)
        let mut per_loc: BTreeMap<u64, (u64, u64)> = BTreeMap::new();
        for packet in packets {
            let Some(loc) = packet.loc_id() else {
                continue;
            };
            let counts = per_loc.entry(loc).or_default();
            if packet.value.points > 0 {
                counts.0 += 1;
            }
            counts.1 += 1;
        }

        let mut ranked: Vec<(u64, u64)> = per_loc
            .into_iter()
            .map(|(loc, (scored, total))| (loc, scored * 100 / total))
            .collect();
        ranked.sort_unstable_by(|a, b| (b.1, b.0).cmp(&(a.1, a.0)));
        ranked.truncate(TOPS_LIMIT);

        Ok(Value::Array(
            ranked
                .into_iter()
                .map(|(loc, pct)| json!([loc, pct]))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statgrid_core::PacketCodec;

    fn packets(raw: &[(&str, &str)]) -> Vec<Packet> {
        PacketCodec::default().decode_all(raw.iter().map(|(k, v)| (*k, *v, None)))
    }

    #[test]
    fn avg_resp_time_of_nothing_is_zero() {
        assert_eq!(AvgRespTime.compute(&[]).unwrap(), json!(0.0));
    }

    #[test]
    fn avg_resp_time_is_mean_elapsed() {
        let packets = packets(&[
            ("1:1:1:1:1:1:1", "1:2.0:0"),
            ("1:1:1:1:1:1:2", "1:4.0:0"),
            ("1:1:1:1:1:1:3", "1:6.0:1"),
        ]);
        assert_eq!(AvgRespTime.compute(&packets).unwrap(), json!(4.0));
    }

    #[test]
    fn tops_of_locs_ranks_by_pct_then_loc() {
        let packets = packets(&[
            // loc 1: 1 of 2 scored → 50
            ("1:1:1:1:1:1:1", "1:1:1"),
            ("1:1:1:1:1:1:2", "1:1:0"),
            // loc 2: 2 of 3 scored → 66
            ("1:2:1:1:1:1:1", "1:1:5"),
            ("1:2:1:1:1:1:2", "1:1:5"),
            ("1:2:1:1:1:1:3", "1:1:-1"),
            // loc 3: 1 of 2 scored → 50, beats loc 1 on the tie
            ("1:3:1:1:1:1:1", "1:1:1"),
            ("1:3:1:1:1:1:2", "1:1:0"),
            // loc 4: none scored
            ("1:4:1:1:1:1:1", "1:1:0"),
        ]);
        let result = TopsOfLocs.compute(&packets).unwrap();
        assert_eq!(result, json!([[2, 66], [3, 50], [1, 50], [4, 0]]));
    }

    #[test]
    fn tops_of_locs_truncates() {
        let raw: Vec<(String, String)> = (0..15)
            .map(|loc| (format!("1:{loc}:1:1:1:1:1"), "1:1:1".to_string()))
            .collect();
        let packets = PacketCodec::default()
            .decode_all(raw.iter().map(|(k, v)| (k.as_str(), v.as_str(), None)));
        let result = TopsOfLocs.compute(&packets).unwrap();
        let ranked = result.as_array().unwrap();
        assert_eq!(ranked.len(), TOPS_LIMIT);
        assert_eq!(ranked[0], json!([14, 100]));
    }

    #[test]
    fn tops_of_locs_of_nothing_is_empty() {
        assert_eq!(TopsOfLocs.compute(&[]).unwrap(), json!([]));
    }
}
