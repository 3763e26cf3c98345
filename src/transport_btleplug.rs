use crate::error::{OtaError, TransportError};
use crate::transport::ota_uuids::*;
use crate::transport::{OtaTransport, WriteMode, DEFAULT_MTU};

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::time::Duration;

/// How a peripheral is picked out of the advertisements
#[derive(Debug, Clone)]
pub struct PeripheralFilter {
    pub name: String,
    pub addr: Option<BDAddr>,
}

impl PeripheralFilter {
    fn matches(&self, local_name: Option<&str>, addr: BDAddr) -> bool {
        self.addr == Some(addr) || local_name == Some(self.name.as_str())
    }
}

fn find_characteristic_by_uuid(peripheral: &Peripheral, uuid: uuid::Uuid) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(TransportError::CharacteristicNotFound(uuid))
}

pub async fn first_adapter() -> Result<Adapter, OtaError> {
    let manager = btleplug::platform::Manager::new()
        .await
        .map_err(|e| OtaError::Adapter(e.into()))?;
    let adapters = manager.adapters().await.map_err(|e| OtaError::Adapter(e.into()))?;
    adapters
        .into_iter()
        .next()
        .ok_or(OtaError::Adapter(TransportError::NoAdapter))
}

/// First candidate whose properties match `filter`. A device can show up
/// several times; its name may only arrive with a later update.
async fn first_match<P, S>(candidates: S, filter: &PeripheralFilter) -> Result<Option<P>, btleplug::Error>
where
    S: Stream<Item = Result<(P, Option<PeripheralProperties>), btleplug::Error>>,
{
    futures::pin_mut!(candidates);
    while let Some(candidate) = candidates.next().await {
        let (peripheral, props) = candidate?;
        let Some(props) = props else {
            continue;
        };
        if let Some(n) = &props.local_name {
            tracing::debug!("Found [{}] at [{}]", n, props.address);
        }
        if filter.matches(props.local_name.as_deref(), props.address) {
            tracing::info!("Found {:?} at [{}]", filter.name, props.address);
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

async fn scan_events(central: &Adapter, filter: &PeripheralFilter) -> Result<Option<Peripheral>, btleplug::Error> {
    // subscribe before scanning so nothing raised in between is missed
    let events = central.events().await?;
    central.start_scan(ScanFilter::default()).await?;

    // peripherals the adapter already knows do not raise DeviceDiscovered again
    let cached = central.peripherals().await?.into_iter().map(|p| p.id());
    let announced = events.filter_map(|event| async move {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
            _ => None,
        }
    });
    let candidates = stream::iter(cached).chain(announced).then(move |id| async move {
        let peripheral = central.peripheral(&id).await?;
        let props = peripheral.properties().await?;
        Ok::<_, btleplug::Error>((peripheral, props))
    });
    first_match(candidates, filter).await
}

/// Scan until a peripheral matches `filter` or `scan_timeout` elapses
pub async fn find_peripheral(
    central: &Adapter,
    filter: &PeripheralFilter,
    scan_timeout: Duration,
) -> Result<Peripheral, OtaError> {
    tracing::info!("Searching for {:?} (address {:?}) ...", filter.name, filter.addr);
    let found = tokio::time::timeout(scan_timeout, scan_events(central, filter)).await;
    stop_scan(central).await;

    match found {
        Ok(Ok(Some(peripheral))) => Ok(peripheral),
        Ok(Ok(None)) | Err(_) => Err(OtaError::DiscoveryFailed {
            name: filter.name.clone(),
        }),
        Ok(Err(e)) => Err(OtaError::Adapter(e.into())),
    }
}

pub async fn stop_scan(central: &Adapter) {
    if let Err(e) = central.stop_scan().await {
        tracing::warn!("Failed to stop scan: {}", e);
    }
}

/// Best-effort release of a link that never became a transport
pub async fn release(peripheral: &Peripheral) {
    if let Err(e) = peripheral.disconnect().await {
        tracing::warn!("Failed to disconnect: {}", e);
    }
}

pub struct BtleplugTransport {
    peripheral: Peripheral,
    size_point: Characteristic,
    data_point: Characteristic,
    write_timeout: Duration,
}

#[async_trait]
impl OtaTransport for BtleplugTransport {
    async fn mtu(&self) -> usize {
        // btleplug has no MTU query; the peripheral always negotiates 247
        DEFAULT_MTU
    }

    async fn write(&self, characteristic: uuid::Uuid, bytes: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let chr = if characteristic == SIZE {
            &self.size_point
        } else if characteristic == DATA {
            &self.data_point
        } else {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        };
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        tokio::time::timeout(self.write_timeout, self.peripheral.write(chr, bytes, write_type)).await??;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
            tracing::info!("Disconnected");
        }
        Ok(())
    }
}

impl BtleplugTransport {
    async fn resolve(peripheral: &Peripheral) -> Result<(Characteristic, Characteristic), TransportError> {
        peripheral.connect().await?;
        peripheral.discover_services().await?;
        let size_point = find_characteristic_by_uuid(peripheral, SIZE)?;
        let data_point = find_characteristic_by_uuid(peripheral, DATA)?;
        Ok((size_point, data_point))
    }

    /// Connect and resolve the OTA characteristics within `connect_timeout`.
    /// The link is released again on every failure.
    pub async fn connect(
        peripheral: Peripheral,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, OtaError> {
        let (size_point, data_point) =
            within_or_release(connect_timeout, Self::resolve(&peripheral), release(&peripheral))
                .await
                .map_err(OtaError::ConnectionFailed)?;
        tracing::info!("Connected, OTA service {} resolved", SERVICE);
        Ok(BtleplugTransport {
            peripheral,
            size_point,
            data_point,
            write_timeout,
        })
    }
}

/// Runs `attempt` with a time limit; runs `release` if it fails or times out
async fn within_or_release<T, A, R>(limit: Duration, attempt: A, release: R) -> Result<T, TransportError>
where
    A: Future<Output = Result<T, TransportError>>,
    R: Future<Output = ()>,
{
    let result = match tokio::time::timeout(limit, attempt).await {
        Ok(r) => r,
        Err(elapsed) => Err(elapsed.into()),
    };
    if result.is_err() {
        release.await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn filter(addr: Option<BDAddr>) -> PeripheralFilter {
        PeripheralFilter {
            name: "nimble-ble-ota".into(),
            addr,
        }
    }

    #[test]
    fn name_must_match_exactly() {
        let addr = BDAddr::from([1, 2, 3, 4, 5, 6]);
        assert!(filter(None).matches(Some("nimble-ble-ota"), addr));
        assert!(!filter(None).matches(Some("nimble-ble-ota2"), addr));
        assert!(!filter(None).matches(Some("NIMBLE-BLE-OTA"), addr));
        assert!(!filter(None).matches(None, addr));
    }

    #[test]
    fn address_matches_without_name() {
        let addr = BDAddr::from([0xC0, 0x49, 0xEF, 0x10, 0x20, 0x30]);
        assert!(filter(Some(addr)).matches(None, addr));
        assert!(!filter(Some(addr)).matches(None, BDAddr::from([0; 6])));
    }

    type Candidate = Result<(&'static str, Option<PeripheralProperties>), btleplug::Error>;

    fn props(name: Option<&str>) -> Option<PeripheralProperties> {
        Some(PeripheralProperties {
            address: BDAddr::from([0x30, 0x20, 0x10, 0xEF, 0x49, 0xC0]),
            local_name: name.map(String::from),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn known_peripheral_matches_without_new_events() {
        // nothing is ever announced after the already known devices
        let known: Vec<Candidate> = vec![Ok(("other", props(Some("speaker")))), Ok(("ota", props(Some("nimble-ble-ota"))))];
        let candidates = stream::iter(known).chain(stream::pending());

        let found = first_match(candidates, &filter(None)).await.unwrap();
        assert_eq!(found, Some("ota"));
    }

    #[tokio::test]
    async fn name_from_later_update_matches() {
        let updates: Vec<Candidate> = vec![
            Ok(("ota", None)),
            Ok(("ota", props(None))),
            Ok(("ota", props(Some("nimble-ble-ota")))),
        ];
        let candidates = stream::iter(updates);

        let found = first_match(candidates, &filter(None)).await.unwrap();
        assert_eq!(found, Some("ota"));
    }

    #[tokio::test]
    async fn no_match_when_stream_ends() {
        let seen: Vec<Candidate> = vec![Ok(("other", props(Some("speaker"))))];
        let candidates = stream::iter(seen);
        assert_eq!(first_match(candidates, &filter(None)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lookup_error_ends_scan() {
        let seen: Vec<Candidate> = vec![
            Err(btleplug::Error::DeviceNotFound),
            Ok(("ota", props(Some("nimble-ble-ota")))),
        ];
        let candidates = stream::iter(seen);
        assert!(first_match(candidates, &filter(None)).await.is_err());
    }

    #[tokio::test]
    async fn hung_connect_is_released() {
        let released = AtomicBool::new(false);
        let result: Result<(), _> = within_or_release(
            Duration::from_millis(10),
            std::future::pending(),
            async { released.store(true, Ordering::SeqCst) },
        )
        .await;

        assert!(matches!(result, Err(TransportError::Timeout(_))));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_connect_is_released() {
        let released = AtomicBool::new(false);
        let result: Result<(), _> = within_or_release(
            Duration::from_secs(1),
            async { Err(TransportError::Btle(btleplug::Error::NotConnected)) },
            async { released.store(true, Ordering::SeqCst) },
        )
        .await;

        assert!(matches!(result, Err(TransportError::Btle(_))));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn successful_connect_is_kept() {
        let released = AtomicBool::new(false);
        let result = within_or_release(
            Duration::from_secs(1),
            async { Ok::<_, TransportError>(7) },
            async { released.store(true, Ordering::SeqCst) },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert!(!released.load(Ordering::SeqCst));
    }
}
