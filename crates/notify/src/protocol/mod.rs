//! Wire protocol of the notification channel.

pub mod event;
pub mod packet;

pub use event::{InboundEvent, OutboundEvent};
pub use packet::{DEFAULT_NAMESPACE, EnginePacket, Handshake, SocketPacket, SocketPacketType};
