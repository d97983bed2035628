//! BlueZ D-Bus backend for advertisement scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ reports each advertisement as a property change on the device object,
//! so the backend runs discovery with change events enabled and duplicate data
//! passed through, and re-reads the device properties on every event.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{Advertisement, is_thermometer_company};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning using the BlueZ D-Bus backend.
///
/// Initializes the default adapter, powers it on and starts LE discovery.
/// Advertisements are sent through the returned channel until discovery ends
/// or the receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let filter = DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    adapter.set_discovery_filter(filter).await?;
    let mut events = adapter.discover_devices_with_changes().await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // The task owns the session so discovery stays active as long as it runs.
    tokio::spawn(async move {
        let _session = session;

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            match read_advertisement(&adapter, address).await {
                Ok(adv) => {
                    if tx.send(adv).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!(%address, error = %e, "failed to read device properties"),
            }
        }
        warn!("BlueZ discovery stream ended");
    });

    Ok(rx)
}

/// Snapshot the advertised properties of a device.
async fn read_advertisement(adapter: &Adapter, address: Address) -> Result<Advertisement, ScanError> {
    let device = adapter.device(address)?;
    let manufacturer_data = device
        .manufacturer_data()
        .await?
        .map(|data| manufacturer_payload(&data))
        .unwrap_or_default();

    Ok(Advertisement {
        address: address.into(),
        rssi: device.rssi().await?,
        manufacturer_data,
        local_name: device.name().await?,
    })
}

/// Rebuild the raw manufacturer-specific data BlueZ split into a map.
///
/// BlueZ strips the company identifier into the map key; the payload is put
/// back together as the little-endian identifier followed by the data. A
/// thermometer entry wins when several companies are advertised, otherwise
/// the lowest identifier is used.
fn manufacturer_payload(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let chosen = data
        .iter()
        .find(|(id, _)| is_thermometer_company(**id))
        .or_else(|| data.iter().min_by_key(|(id, _)| **id));

    match chosen {
        Some((id, bytes)) => {
            let mut payload = Vec::with_capacity(2 + bytes.len());
            payload.extend_from_slice(&id.to_le_bytes());
            payload.extend_from_slice(bytes);
            payload
        }
        None => Vec::new(),
    }
}
