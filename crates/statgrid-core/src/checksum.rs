//! Request body checksum.

/// CRC32 of `data` rendered as 8 lowercase hex digits.
pub fn calc_checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}
