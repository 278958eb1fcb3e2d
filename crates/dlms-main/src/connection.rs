// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of the FluxION DLMS/COSEM bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Supervised meter link
//!
//! A single `DlmsClient` shared by every reader. Failures flip the
//! availability signal to `false`, a background task then rebuilds the link
//! and flips it back.

use crate::error::{BridgeError, BridgeResult};
use crate::flagids::FlagIdDatabase;
use crate::identity::{self, DeviceInfo};
use dlms_client::acse::AssociationInfo;
use dlms_client::{ClientSettings, DlmsClient, DlmsError, DlmsResult};
use dlms_types::{CosemAttribute, DlmsValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default delay between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct DlmsConnection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    settings: ClientSettings,
    client: Mutex<DlmsClient>,
    available: watch::Sender<bool>,
    reconnect_delay: Duration,
    reconnect_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DlmsConnection {
    pub fn new(settings: ClientSettings, reconnect_delay: Duration) -> Self {
        let (available, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                client: Mutex::new(DlmsClient::new(settings.clone())),
                settings,
                available,
                reconnect_delay,
                reconnect_task: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Connect, associate and start supervising the link
    pub async fn setup(&self) -> DlmsResult<()> {
        let client = open_client(&self.inner.settings).await?;
        *self.inner.client.lock().await = client;
        info!(
            "🔌 Connected to meter at {}:{}",
            self.inner.settings.host, self.inner.settings.port
        );

        self.inner.available.send_replace(true);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(reconnect_loop(inner));
        if let Some(previous) = self.inner.reconnect_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Read and decode an attribute, `None` while the meter is unreachable
    ///
    /// A refused read leaves the link up; any other failure marks the
    /// connection unavailable and hands it to the reconnect task.
    pub async fn get(&self, attribute: &CosemAttribute) -> Option<DlmsValue> {
        if !self.is_available() {
            return None;
        }

        let mut client = self.inner.client.lock().await;
        match client.get_value(attribute).await {
            Ok(value) => Some(value),
            Err(DlmsError::DataAccess(result)) => {
                debug!("Meter refused {}: {}", attribute, result);
                None
            }
            Err(e) => {
                warn!("⚠️ Reading {} failed: {}", attribute, e);
                client.disconnect().await;
                drop(client);
                self.mark_unavailable();
                None
            }
        }
    }

    /// Read the name plate objects over the current link
    pub async fn identify(
        &self,
        db: &FlagIdDatabase,
        timeout: Duration,
    ) -> BridgeResult<DeviceInfo> {
        let mut client = self.inner.client.lock().await;
        let result = identity::identify(&mut *client, db, timeout).await;
        if let Err(e) = &result
            && is_link_failure(e)
        {
            client.disconnect().await;
            drop(client);
            self.mark_unavailable();
        }
        result
    }

    pub fn is_available(&self) -> bool {
        *self.inner.available.borrow()
    }

    /// Availability signal; `true` once the meter is associated
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.available.subscribe()
    }

    /// Stop reconnecting and release the meter
    pub async fn close(&self) {
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        self.inner.client.lock().await.disconnect().await;
        self.inner.available.send_replace(false);
        info!("🔌 Meter connection closed");
    }

    /// One-shot connection test
    pub async fn check(settings: &ClientSettings) -> DlmsResult<AssociationInfo> {
        let mut client = open_client(settings).await?;
        let association = client.association().ok_or(DlmsError::NotConnected)?;
        client.disconnect().await;
        Ok(association)
    }

    fn mark_unavailable(&self) {
        if self.inner.available.send_replace(false) {
            warn!("📡 Meter connection lost, reconnecting");
        }
    }
}

fn is_link_failure(error: &BridgeError) -> bool {
    match error {
        BridgeError::Dlms(DlmsError::DataAccess(_)) => false,
        BridgeError::Dlms(_) | BridgeError::IdentifyTimeout(_) => true,
        _ => false,
    }
}

async fn open_client(settings: &ClientSettings) -> DlmsResult<DlmsClient> {
    let mut client = DlmsClient::new(settings.clone());
    client.connect().await?;
    if let Err(e) = client.associate().await {
        client.disconnect().await;
        return Err(e);
    }
    Ok(client)
}

async fn reconnect_loop(inner: Arc<Inner>) {
    let mut available = inner.available.subscribe();
    loop {
        if available.wait_for(|up| !*up).await.is_err() {
            return;
        }

        match open_client(&inner.settings).await {
            Ok(client) => {
                *inner.client.lock().await = client;
                inner.available.send_replace(true);
                info!("✅ Reconnected to meter at {}", inner.settings.host);
            }
            Err(e) => {
                debug!(
                    "Reconnect failed: {}, retrying in {:?}",
                    e, inner.reconnect_delay
                );
                tokio::time::sleep(inner.reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_client::fake::FakeMeter;
    use dlms_types::{CosemInterface, EQUIPMENT_ID, LOGICAL_DEVICE_NAME, Obis};
    use std::net::SocketAddr;

    const VOLTAGE: CosemAttribute =
        CosemAttribute::value_of(CosemInterface::Register, Obis::new(1, 0, 32, 7, 0));

    fn settings(addr: SocketAddr) -> ClientSettings {
        ClientSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout: Duration::from_millis(500),
            ..ClientSettings::default()
        }
    }

    async fn connected(meter: &FakeMeter) -> DlmsConnection {
        let addr = meter.listen().await.unwrap();
        let connection = DlmsConnection::new(settings(addr), Duration::from_millis(50));
        connection.setup().await.unwrap();
        connection
    }

    async fn wait_until(rx: &mut watch::Receiver<bool>, state: bool) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| *v == state))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_setup_and_get() {
        let meter = FakeMeter::new().with_value(VOLTAGE, DlmsValue::LongUnsigned(23012));
        let connection = connected(&meter).await;

        assert!(connection.is_available());
        assert_eq!(
            connection.get(&VOLTAGE).await,
            Some(DlmsValue::LongUnsigned(23012))
        );
        connection.close().await;
        assert!(!connection.is_available());
        assert_eq!(connection.get(&VOLTAGE).await, None);
    }

    #[tokio::test]
    async fn test_refused_read_keeps_link() {
        let meter = FakeMeter::new();
        let connection = connected(&meter).await;

        assert_eq!(connection.get(&VOLTAGE).await, None);
        assert!(connection.is_available());
        assert_eq!(meter.connection_count(), 1);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let meter = FakeMeter::new().with_value(VOLTAGE, DlmsValue::LongUnsigned(23012));
        let connection = connected(&meter).await;
        let mut rx = connection.subscribe();

        meter.set_offline(true);
        assert_eq!(connection.get(&VOLTAGE).await, None);
        assert!(!connection.is_available());

        meter.set_offline(false);
        wait_until(&mut rx, true).await;
        assert!(meter.connection_count() >= 2);
        assert_eq!(
            connection.get(&VOLTAGE).await,
            Some(DlmsValue::LongUnsigned(23012))
        );
        connection.close().await;
    }

    #[tokio::test]
    async fn test_setup_fails_when_meter_is_offline() {
        let meter = FakeMeter::new();
        let addr = meter.listen().await.unwrap();
        meter.set_offline(true);

        let connection = DlmsConnection::new(settings(addr), RECONNECT_DELAY);
        assert!(connection.setup().await.is_err());
        assert!(!connection.is_available());
    }

    #[tokio::test]
    async fn test_check() {
        let meter = FakeMeter::new().with_password("111111");
        let addr = meter.listen().await.unwrap();

        let mut good = settings(addr);
        good.password = Some("111111".to_string());
        let association = DlmsConnection::check(&good).await.unwrap();
        assert_eq!(association.server_max_receive_pdu, Some(500));

        let mut bad = settings(addr);
        bad.password = Some("000000".to_string());
        assert!(matches!(
            DlmsConnection::check(&bad).await,
            Err(DlmsError::AssociationRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_identify_over_connection() {
        let meter = FakeMeter::new()
            .with_value(
                LOGICAL_DEVICE_NAME,
                DlmsValue::OctetString(b"INC234ART2".to_vec()),
            )
            .with_value(EQUIPMENT_ID, DlmsValue::OctetString(b"47001234".to_vec()));
        let connection = connected(&meter).await;
        let db = FlagIdDatabase::bundled().unwrap();

        let info = connection
            .identify(&db, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(info.equipment_id, "47001234");
        assert_eq!(info.model, "Mercury 234");
        assert_eq!(info.sw_version, None);
        assert!(connection.is_available());
        connection.close().await;
    }
}
