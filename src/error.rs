use thiserror::Error;

/// Failures of the BLE link itself
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),
    #[error("write timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(uuid::Uuid),
    #[error("no bluetooth adapter available")]
    NoAdapter,
}

/// Terminal outcomes of an OTA transfer. None of these are retried.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error("no peripheral advertising as {name:?} found")]
    DiscoveryFailed { name: String },
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] TransportError),
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[source] TransportError),
    #[error("chunk write failed at offset {offset}: {source}")]
    ChunkWriteFailed {
        offset: usize,
        #[source]
        source: TransportError,
    },
    #[error("invalid firmware image of {size} bytes (must be 1..=4294967295)")]
    InvalidImage { size: usize },
    #[error("chunk size {chunk_size} outside 1..={max}")]
    InvalidChunkSize { chunk_size: usize, max: usize },
    #[error("failed to read firmware: {0}")]
    Firmware(#[from] std::io::Error),
    #[error("bluetooth adapter: {0}")]
    Adapter(#[source] TransportError),
    #[error("transfer cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_failure_reports_offset() {
        let err = OtaError::ChunkWriteFailed {
            offset: 480,
            source: TransportError::Btle(btleplug::Error::NotConnected),
        };
        assert!(err.to_string().contains("offset 480"));
    }

    #[test]
    fn handshake_failure_keeps_source() {
        let err = OtaError::HandshakeFailed(TransportError::CharacteristicNotFound(uuid::Uuid::nil()));
        assert!(std::error::Error::source(&err).is_some());
    }
}
