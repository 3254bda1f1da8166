pub mod checksum;
pub mod config;
pub mod packet;
pub mod types;

pub use checksum::calc_checksum;
pub use config::{ConfigError, SinkKind, StatgridConfig};
pub use packet::{Packet, PacketCodec, PacketParts, PacketValue};
pub use types::*;
