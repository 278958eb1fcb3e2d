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

//! High level DLMS/COSEM client: HDLC link, association and GET

use crate::acse::{self, AssociationInfo};
use crate::axdr;
use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::{HdlcAddress, HdlcTransport};
use crate::io::connect_tcp;
use crate::xdlms::{GetRequest, GetResponse};
use dlms_types::{CosemAttribute, DlmsValue};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 23;
pub const DEFAULT_CLIENT_ADDRESS: u16 = 32;
pub const DEFAULT_LOGICAL_ADDRESS: u16 = 1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub client_logical_address: u16,
    pub server_logical_address: u16,
    pub server_physical_address: Option<u16>,
    /// LLS secret; `None` for a public association
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            client_logical_address: DEFAULT_CLIENT_ADDRESS,
            server_logical_address: DEFAULT_LOGICAL_ADDRESS,
            server_physical_address: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientSettings {
    pub fn client_address(&self) -> HdlcAddress {
        HdlcAddress::client(self.client_logical_address)
    }

    pub fn server_address(&self) -> HdlcAddress {
        HdlcAddress::server(self.server_logical_address, self.server_physical_address)
    }
}

#[derive(Debug)]
pub struct DlmsClient<IO = TcpStream> {
    settings: ClientSettings,
    transport: Option<HdlcTransport<IO>>,
    association: Option<AssociationInfo>,
    invoke_id: u8,
}

impl DlmsClient<TcpStream> {
    /// Open the TCP connection and the HDLC link
    pub async fn connect(&mut self) -> DlmsResult<()> {
        let settings = &self.settings;
        let stream = connect_tcp(&settings.host, settings.port, settings.timeout).await?;
        self.attach(stream).await
    }
}

impl<IO> DlmsClient<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            transport: None,
            association: None,
            invoke_id: 0,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(HdlcTransport::is_connected)
    }

    pub fn is_associated(&self) -> bool {
        self.is_connected() && self.association.is_some()
    }

    pub fn association(&self) -> Option<AssociationInfo> {
        self.association
    }

    /// Establish the HDLC link over an already open byte stream
    pub async fn attach(&mut self, io: IO) -> DlmsResult<()> {
        let mut transport = HdlcTransport::new(
            io,
            self.settings.client_address(),
            self.settings.server_address(),
            self.settings.timeout,
        );
        transport.connect().await?;
        self.transport = Some(transport);
        self.association = None;
        Ok(())
    }

    /// Open the application association (AARQ/AARE)
    pub async fn associate(&mut self) -> DlmsResult<AssociationInfo> {
        let password = self.settings.password.clone();
        let lls = password.is_some();
        let aarq = acse::build_aarq(password.as_deref().map(str::as_bytes));

        let aare = self.exchange(&aarq).await?;
        let info = acse::parse_aare(&aare)?;
        info!(
            "Associated with meter {}:{} ({})",
            self.settings.host,
            self.settings.port,
            if lls { "LLS" } else { "public" }
        );
        self.association = Some(info);
        Ok(info)
    }

    /// Read an attribute and return its raw A-XDR encoding, reassembling data blocks
    pub async fn get(&mut self, attribute: &CosemAttribute) -> DlmsResult<Vec<u8>> {
        if self.association.is_none() {
            return Err(DlmsError::NotConnected);
        }

        let invoke_id = self.next_invoke_id();
        let mut response = self
            .get_request(&GetRequest::Normal {
                invoke_id,
                attribute: *attribute,
            })
            .await?;

        let mut data = Vec::new();
        let mut expected_block = 1;
        loop {
            if response.invoke_id() != invoke_id {
                warn!(
                    "Response invoke id {} does not match request {}",
                    response.invoke_id(),
                    invoke_id
                );
            }

            match response {
                GetResponse::Normal { result, .. } => {
                    return result.map_err(DlmsError::DataAccess);
                }
                GetResponse::Block {
                    last,
                    block_number,
                    result,
                    ..
                } => {
                    if block_number != expected_block {
                        return Err(DlmsError::UnexpectedResponse(format!(
                            "data block {block_number}, expected {expected_block}"
                        )));
                    }
                    data.extend(result.map_err(DlmsError::DataAccess)?);
                    if last {
                        debug!(
                            "{} read in {} blocks ({} bytes)",
                            attribute,
                            block_number,
                            data.len()
                        );
                        return Ok(data);
                    }
                    expected_block += 1;
                    response = self
                        .get_request(&GetRequest::Next {
                            invoke_id,
                            block_number,
                        })
                        .await?;
                }
            }
        }
    }

    /// Read and decode an attribute
    pub async fn get_value(&mut self, attribute: &CosemAttribute) -> DlmsResult<DlmsValue> {
        let raw = self.get(attribute).await?;
        Ok(axdr::decode(&raw)?)
    }

    /// Release the association and the link; failures are only logged
    pub async fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        if self.association.take().is_some() && transport.is_connected() {
            match transport.request(&acse::RELEASE_REQUEST).await {
                Ok(rlre) => {
                    if let Err(e) = acse::parse_rlre(&rlre) {
                        warn!("Release not confirmed: {}", e);
                    }
                }
                Err(e) => warn!("Release request failed: {}", e),
            }
        }

        if let Err(e) = transport.disconnect().await {
            warn!("HDLC disconnect failed: {}", e);
        }
        debug!("Disconnected from {}", self.settings.host);
    }

    async fn get_request(&mut self, request: &GetRequest) -> DlmsResult<GetResponse> {
        let apdu = self.exchange(&request.encode()).await?;
        GetResponse::decode(&apdu)
    }

    async fn exchange(&mut self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(DlmsError::NotConnected)?;
        match transport.request(apdu).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_communication_error() {
                    // link state is unknown, force a fresh connect
                    self.transport = None;
                    self.association = None;
                }
                Err(e)
            }
        }
    }

    fn next_invoke_id(&mut self) -> u8 {
        self.invoke_id = self.invoke_id % 15 + 1;
        self.invoke_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeMeter;
    use crate::xdlms::DataAccessResult;
    use dlms_types::{EQUIPMENT_ID, LOGICAL_DEVICE_NAME, Obis};
    use dlms_types::{CosemInterface, DEFAULT_ATTRIBUTE};
    use tokio::io::DuplexStream;

    const ENERGY: CosemAttribute =
        CosemAttribute::value_of(CosemInterface::Register, Obis::new(1, 0, 1, 8, 0));

    fn settings(password: Option<&str>) -> ClientSettings {
        ClientSettings {
            host: "meter".to_string(),
            password: password.map(str::to_string),
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn meter() -> FakeMeter {
        FakeMeter::new()
            .with_password("111111")
            .with_value(
                LOGICAL_DEVICE_NAME,
                DlmsValue::OctetString(b"INC1234567890".to_vec()),
            )
            .with_value(EQUIPMENT_ID, DlmsValue::OctetString(b"47001234".to_vec()))
            .with_value(ENERGY, DlmsValue::DoubleLongUnsigned(123_456))
    }

    async fn connected(meter: FakeMeter, password: Option<&str>) -> DlmsClient<DuplexStream> {
        let mut client = DlmsClient::new(settings(password));
        client.attach(meter.spawn_duplex()).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_associate_and_read() {
        let mut client = connected(meter(), Some("111111")).await;
        client.associate().await.unwrap();
        assert!(client.is_associated());

        let value = client.get_value(&ENERGY).await.unwrap();
        assert_eq!(value, DlmsValue::DoubleLongUnsigned(123_456));

        let name = client.get_value(&LOGICAL_DEVICE_NAME).await.unwrap();
        assert_eq!(name.as_text().unwrap(), "INC1234567890");

        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_public_association() {
        let meter = FakeMeter::new().with_value(ENERGY, DlmsValue::DoubleLongUnsigned(7));
        let mut client = connected(meter, None).await;
        client.associate().await.unwrap();
        assert!(client.is_associated());
        assert_eq!(
            client.get_value(&ENERGY).await.unwrap(),
            DlmsValue::DoubleLongUnsigned(7)
        );
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let mut client = connected(meter(), Some("000000")).await;
        let err = client.associate().await.unwrap_err();
        assert!(matches!(err, DlmsError::AssociationRejected { result: 1, .. }));
        assert!(!err.is_communication_error());
    }

    #[tokio::test]
    async fn test_get_before_associate() {
        let mut client = connected(meter(), None).await;
        assert!(matches!(client.get(&ENERGY).await, Err(DlmsError::NotConnected)));
    }

    #[tokio::test]
    async fn test_undefined_object() {
        let mut client = connected(meter(), Some("111111")).await;
        client.associate().await.unwrap();

        let missing = CosemAttribute::new(
            CosemInterface::Register,
            Obis::new(1, 0, 99, 8, 0),
            DEFAULT_ATTRIBUTE,
        );
        let err = client.get(&missing).await.unwrap_err();
        assert!(matches!(
            err,
            DlmsError::DataAccess(DataAccessResult::ObjectUndefined)
        ));
        // association survives a data access error
        assert!(client.get(&ENERGY).await.is_ok());
    }

    #[tokio::test]
    async fn test_block_transfer_and_segmentation() {
        let long_text = "X".repeat(600);
        let meter = meter()
            .with_block_size(200)
            .with_max_info_length(64)
            .with_value(
                LOGICAL_DEVICE_NAME,
                DlmsValue::VisibleString(long_text.clone()),
            );

        let mut client = connected(meter, Some("111111")).await;
        client.associate().await.unwrap();
        let transport = client.transport.as_ref().unwrap();
        assert_eq!(transport.parameters().max_info_tx, 64);

        let value = client.get_value(&LOGICAL_DEVICE_NAME).await.unwrap();
        assert_eq!(value, DlmsValue::VisibleString(long_text));
    }

    #[tokio::test]
    async fn test_timeout_drops_link() {
        let meter = meter().unresponsive_after_association();
        let mut client = connected(meter, Some("111111")).await;
        client.associate().await.unwrap();

        let err = client.get(&ENERGY).await.unwrap_err();
        assert!(matches!(err, DlmsError::Timeout(_)));
        assert!(!client.is_connected());
        assert!(matches!(client.get(&ENERGY).await, Err(DlmsError::NotConnected)));
    }

    #[test]
    fn test_invoke_ids_cycle() {
        let mut client: DlmsClient<DuplexStream> = DlmsClient::new(settings(None));
        let ids: Vec<u8> = (0..16).map(|_| client.next_invoke_id()).collect();
        assert_eq!(ids[0], 1);
        assert_eq!(ids[14], 15);
        assert_eq!(ids[15], 1);
    }
}
