use crate::error::TransportError;
use async_trait::async_trait;

/// OTA service & characteristic UUIDs, 16 bit values on the Bluetooth base UUID
#[allow(dead_code)]
pub mod ota_uuids {
    /// OTA Service (16 bit UUID 0xFFF0)
    pub const SERVICE: uuid::Uuid = uuid::Uuid::from_u128(0x0000FFF0_0000_1000_8000_00805F9B34FB);
    /// Image size Characteristic, 4 bytes little-endian
    pub const SIZE: uuid::Uuid = uuid::Uuid::from_u128(0x0000FFF1_0000_1000_8000_00805F9B34FB);
    /// Image data Characteristic
    pub const DATA: uuid::Uuid = uuid::Uuid::from_u128(0x0000FFF2_0000_1000_8000_00805F9B34FB);
}

/// ATT MTU the peripheral negotiates
pub const DEFAULT_MTU: usize = 247;

/// ATT header bytes taken from every write
pub const ATT_WRITE_OVERHEAD: usize = 3;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteMode {
    /// Wait for the peripheral to confirm at the link layer
    WithResponse,
    /// Return once queued, no delivery guarantee
    WithoutResponse,
}

/// OTA transport interface over a connected peripheral
#[async_trait]
pub trait OtaTransport: Send + Sync {
    /// MTU of the BLE link
    async fn mtu(&self) -> usize;
    /// Write bytes to a characteristic
    async fn write(&self, characteristic: uuid::Uuid, bytes: &[u8], mode: WriteMode) -> Result<(), TransportError>;
    /// Release the link. Safe to call more than once.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
