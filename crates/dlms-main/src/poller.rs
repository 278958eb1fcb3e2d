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

//! Periodic meter polling

use crate::connection::DlmsConnection;
use crate::entities::CosemEntityDescription;
use crate::publisher::{EntityState, StatePublisher};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Slot {
    entity: &'static CosemEntityDescription,
    state: EntityState,
    published: Option<EntityState>,
}

/// Reads every entity from the meter and forwards changes to the publisher
pub struct MeterPoller {
    connection: DlmsConnection,
    publisher: Arc<dyn StatePublisher>,
    slots: Vec<Slot>,
    scan_interval: Duration,
    timezone: Option<Tz>,
}

impl std::fmt::Debug for MeterPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterPoller")
            .field("publisher", &self.publisher.name())
            .field("entities", &self.slots.len())
            .field("scan_interval", &self.scan_interval)
            .finish_non_exhaustive()
    }
}

impl MeterPoller {
    pub fn new(
        connection: DlmsConnection,
        publisher: Arc<dyn StatePublisher>,
        entities: Vec<&'static CosemEntityDescription>,
        scan_interval: Duration,
        timezone: Option<Tz>,
    ) -> Self {
        let available = connection.is_available();
        let slots = entities
            .into_iter()
            .map(|entity| Slot {
                entity,
                state: EntityState {
                    available,
                    ..EntityState::default()
                },
                published: None,
            })
            .collect();
        Self {
            connection,
            publisher,
            slots,
            scan_interval,
            timezone,
        }
    }

    #[cfg(test)]
    pub fn state(&self, key: &str) -> Option<&EntityState> {
        self.slots
            .iter()
            .find(|slot| slot.entity.key == key)
            .map(|slot| &slot.state)
    }

    /// Read every entity once; returns how many states were published
    ///
    /// Reads are sequential over the single meter link. A failed read keeps
    /// the previous value.
    pub async fn poll_once(&mut self) -> usize {
        for slot in &mut self.slots {
            let Some(raw) = self.connection.get(&slot.entity.cosem_attribute()).await else {
                continue;
            };
            match slot.entity.convert(&raw, self.timezone) {
                Some(value) => {
                    slot.state.value = Some(value);
                    slot.state.attributes = slot.entity.extra_attributes(&raw);
                }
                None => debug!(
                    "Ignoring {} value of type {} for {}",
                    slot.entity.obis,
                    raw.type_name(),
                    slot.entity.key
                ),
            }
        }

        let available = self.connection.is_available();
        for slot in &mut self.slots {
            slot.state.available = available;
        }
        self.publish(false).await
    }

    /// Republish every entity with the new availability
    pub async fn publish_availability(&mut self, available: bool) -> usize {
        let count = self.slots.len();
        if available {
            info!("✅ Meter available, refreshing {} entities", count);
        } else {
            warn!("📡 Meter unavailable, marking {} entities", count);
        }
        for slot in &mut self.slots {
            slot.state.available = available;
        }
        self.publish(true).await
    }

    async fn publish(&mut self, force: bool) -> usize {
        let mut published = 0;
        for slot in &mut self.slots {
            if !force && slot.published.as_ref() == Some(&slot.state) {
                continue;
            }
            match self.publisher.publish(slot.entity, &slot.state).await {
                Ok(()) => {
                    slot.published = Some(slot.state.clone());
                    published += 1;
                }
                Err(e) => warn!(
                    "⚠️ Failed to publish {} to {}: {}",
                    slot.entity.key,
                    self.publisher.name(),
                    e
                ),
            }
        }
        if published > 0 {
            debug!("Published {} states", published);
        }
        published
    }

    /// Poll until `shutdown` is notified
    pub async fn run(mut self, shutdown: Arc<Notify>) {
        let mut availability = self.connection.subscribe();
        availability.mark_unchanged();
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "🔄 Polling {} entities every {:?}",
            self.slots.len(),
            self.scan_interval
        );

        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    info!("Poller stopping");
                    break;
                }
                changed = availability.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let available = *availability.borrow_and_update();
                    self.publish_availability(available).await;
                    if available {
                        self.poll_once().await;
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{self, EntityValue};
    use crate::error::{BridgeError, BridgeResult};
    use async_trait::async_trait;
    use dlms_client::ClientSettings;
    use dlms_client::fake::FakeMeter;
    use dlms_types::DlmsValue;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(&'static str, EntityState)>>,
        fail: AtomicBool,
    }

    impl RecordingPublisher {
        fn take(&self) -> Vec<(&'static str, EntityState)> {
            std::mem::take(&mut *self.published.lock())
        }
    }

    #[async_trait]
    impl StatePublisher for RecordingPublisher {
        async fn publish(
            &self,
            entity: &CosemEntityDescription,
            state: &EntityState,
        ) -> BridgeResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BridgeError::IdentifyFailed("publisher down".to_string()));
            }
            self.published.lock().push((entity.key, state.clone()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn pick(keys: &[&str]) -> Vec<&'static CosemEntityDescription> {
        keys.iter().filter_map(|k| entities::find(k)).collect()
    }

    async fn setup(
        meter: &FakeMeter,
        keys: &[&str],
    ) -> (MeterPoller, Arc<RecordingPublisher>, DlmsConnection) {
        let addr = meter.listen().await.unwrap();
        let settings = ClientSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout: Duration::from_millis(500),
            ..ClientSettings::default()
        };
        let connection = DlmsConnection::new(settings, Duration::from_millis(50));
        connection.setup().await.unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let poller = MeterPoller::new(
            connection.clone(),
            publisher.clone(),
            pick(keys),
            Duration::from_millis(100),
            None,
        );
        (poller, publisher, connection)
    }

    fn attribute(key: &str) -> dlms_types::CosemAttribute {
        entities::find(key).unwrap().cosem_attribute()
    }

    #[tokio::test]
    async fn test_poll_publishes_only_changes() {
        let meter = FakeMeter::new()
            .with_value(attribute("voltage_l1"), DlmsValue::LongUnsigned(23000))
            .with_value(
                attribute("active_energy_total"),
                DlmsValue::DoubleLongUnsigned(0),
            );
        let (mut poller, publisher, connection) =
            setup(&meter, &["voltage_l1", "active_energy_total", "frequency"]).await;

        assert_eq!(poller.poll_once().await, 3);
        let published = publisher.take();
        assert_eq!(published[0].1.state_text(), "230");
        // zero is a real reading
        assert_eq!(published[1].1.state_text(), "0");
        // not provided by this meter
        assert_eq!(published[2].1.state_text(), "unknown");

        assert_eq!(poller.poll_once().await, 0);

        meter.set_value(attribute("voltage_l1"), DlmsValue::LongUnsigned(23150));
        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(
            poller.state("voltage_l1").unwrap().value,
            Some(EntityValue::Number(231.5))
        );
        connection.close().await;
    }

    #[tokio::test]
    async fn test_failed_read_keeps_last_value() {
        let meter = FakeMeter::new()
            .with_value(attribute("current_l1"), DlmsValue::DoubleLongUnsigned(1500));
        let (mut poller, _publisher, connection) = setup(&meter, &["current_l1"]).await;

        poller.poll_once().await;
        meter.remove_value(&attribute("current_l1"));
        assert_eq!(poller.poll_once().await, 0);
        assert_eq!(
            poller.state("current_l1").unwrap().value,
            Some(EntityValue::Number(1.5))
        );
        connection.close().await;
    }

    #[tokio::test]
    async fn test_self_test_error_codes() {
        let self_test = attribute("self_test");
        let meter = FakeMeter::new().with_value(self_test, DlmsValue::OctetString(vec![0, 1]));
        let (mut poller, publisher, connection) = setup(&meter, &["self_test"]).await;

        poller.poll_once().await;
        let state = &publisher.take()[0].1;
        assert_eq!(state.state_text(), "on");
        assert_eq!(state.attributes["error_codes"], "E-09");

        meter.set_value(attribute("self_test"), DlmsValue::OctetString(vec![0, 0]));
        poller.poll_once().await;
        let state = &publisher.take()[0].1;
        assert_eq!(state.state_text(), "off");
        assert!(state.attributes.is_empty());
        connection.close().await;
    }

    #[tokio::test]
    async fn test_availability_republishes_everything() {
        let meter = FakeMeter::new();
        meter.set_value(attribute("voltage_l1"), DlmsValue::LongUnsigned(23000));
        let (mut poller, publisher, connection) =
            setup(&meter, &["voltage_l1", "voltage_l2"]).await;

        poller.poll_once().await;
        publisher.take();

        assert_eq!(poller.publish_availability(false).await, 2);
        let published = publisher.take();
        for (_, state) in &published {
            assert_eq!(state.state_text(), "unavailable");
        }
        // the last value survives the outage
        assert_eq!(
            poller.state("voltage_l1").unwrap().value,
            Some(EntityValue::Number(230.0))
        );
        connection.close().await;
    }

    #[tokio::test]
    async fn test_publish_failure_is_retried_next_poll() {
        let meter = FakeMeter::new();
        meter.set_value(attribute("frequency"), DlmsValue::LongUnsigned(5000));
        let addr = meter.listen().await.unwrap();
        let settings = ClientSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..ClientSettings::default()
        };
        let connection = DlmsConnection::new(settings, Duration::from_millis(50));
        connection.setup().await.unwrap();
        let publisher = Arc::new(RecordingPublisher {
            fail: AtomicBool::new(true),
            ..RecordingPublisher::default()
        });
        let mut poller = MeterPoller::new(
            connection.clone(),
            publisher.clone(),
            pick(&["frequency"]),
            Duration::from_secs(30),
            None,
        );

        assert_eq!(poller.poll_once().await, 0);
        assert!(poller.slots[0].published.is_none());

        // Same reading, so only the pending publish goes out
        publisher.fail.store(false, Ordering::SeqCst);
        assert_eq!(poller.poll_once().await, 1);
        assert!(poller.slots[0].published.is_some());
        let published = publisher.take();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1.state_text(), "50");
        connection.close().await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let meter = FakeMeter::new();
        meter.set_value(attribute("voltage_l1"), DlmsValue::LongUnsigned(23000));
        let (poller, publisher, connection) = setup(&meter, &["voltage_l1"]).await;
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(poller.run(shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while publisher.published.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        connection.close().await;
    }

    #[tokio::test]
    async fn test_run_marks_entities_unavailable_on_link_loss() {
        let meter = FakeMeter::new();
        meter.set_value(attribute("voltage_l1"), DlmsValue::LongUnsigned(23000));
        let (poller, publisher, connection) = setup(&meter, &["voltage_l1"]).await;
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(poller.run(shutdown.clone()));

        meter.set_offline(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let seen = publisher
                    .published
                    .lock()
                    .iter()
                    .any(|(_, s)| s.state_text() == "unavailable");
                if seen {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.notify_one();
        task.await.unwrap();
        connection.close().await;
    }
}
