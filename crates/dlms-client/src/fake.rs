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

//! In-memory meter speaking HDLC + DLMS, for tests

use crate::axdr;
use crate::hdlc::frame::split_frame;
use crate::hdlc::transport::{LLC_COMMAND, LLC_RESPONSE};
use crate::hdlc::{AddressKind, Control, HdlcFrame, HdlcParameters};
use crate::xdlms::{DataAccessResult, GetRequest, GetResponse};
use bytes::BytesMut;
use dlms_types::{CosemAttribute, DlmsValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;

const AARE_ACCEPTED: [u8; 43] = [
    0x61, 0x29, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2, 0x03,
    0x02, 0x01, 0x00, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x00, 0xBE, 0x10, 0x04, 0x0E, 0x08,
    0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x50, 0x1F, 0x01, 0xF4, 0x00, 0x07,
];
/// rejected-permanent, authentication-failure
const AARE_REJECTED: [u8; 25] = [
    0x61, 0x17, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2, 0x03,
    0x02, 0x01, 0x01, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x0D,
];
const RLRE: [u8; 5] = [0x63, 0x03, 0x80, 0x01, 0x00];
const EXCEPTION: [u8; 3] = [0xD8, 0x01, 0x02];

/// Scriptable meter; clones share the object table and counters
#[derive(Debug, Clone)]
pub struct FakeMeter {
    objects: Arc<Mutex<HashMap<CosemAttribute, DlmsValue>>>,
    password: Option<Vec<u8>>,
    max_info_length: u16,
    block_size: Option<usize>,
    unresponsive_after_association: bool,
    offline: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl Default for FakeMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMeter {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            password: None,
            max_info_length: 128,
            block_size: None,
            unresponsive_after_association: false,
            offline: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.as_bytes().to_vec());
        self
    }

    pub fn with_value(self, attribute: CosemAttribute, value: DlmsValue) -> Self {
        self.set_value(attribute, value);
        self
    }

    /// Answer values longer than `size` encoded bytes with GET data blocks
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = Some(size.max(1));
        self
    }

    pub fn with_max_info_length(mut self, length: u16) -> Self {
        self.max_info_length = length;
        self
    }

    /// Accept the association, then stop answering GET requests
    pub fn unresponsive_after_association(mut self) -> Self {
        self.unresponsive_after_association = true;
        self
    }

    pub fn set_value(&self, attribute: CosemAttribute, value: DlmsValue) {
        self.objects.lock().insert(attribute, value);
    }

    pub fn remove_value(&self, attribute: &CosemAttribute) {
        self.objects.lock().remove(attribute);
    }

    /// While offline, open sessions are closed and new ones dropped
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn get_request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Serve one session over an in-memory pipe
    pub fn spawn_duplex(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(8192);
        tokio::spawn(self.clone().serve(server));
        client
    }

    /// Accept TCP sessions on a loopback port
    pub async fn listen(&self) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let meter = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if meter.offline.load(Ordering::SeqCst) {
                    continue;
                }
                tokio::spawn(meter.clone().serve(stream));
            }
        });
        Ok(addr)
    }

    pub async fn serve<IO>(self, io: IO)
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let mut session = Session {
            meter: self,
            io,
            buffer: BytesMut::new(),
            send_seq: 0,
            recv_seq: 0,
            associated: false,
            blocks: Vec::new(),
            block_sent: 0,
        };
        // a closed pipe simply ends the session
        let _ = session.run().await;
    }
}

struct Session<IO> {
    meter: FakeMeter,
    io: IO,
    buffer: BytesMut,
    send_seq: u8,
    recv_seq: u8,
    associated: bool,
    blocks: Vec<Vec<u8>>,
    block_sent: usize,
}

impl<IO> Session<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self) -> io::Result<()> {
        let mut apdu = Vec::new();

        while let Some(frame) = self.next_frame().await? {
            if self.meter.offline.load(Ordering::SeqCst) {
                return Ok(());
            }
            let reply_to = |control| HdlcFrame::new(frame.source, frame.destination, control);

            match frame.control {
                Control::Snrm => {
                    self.send_seq = 0;
                    self.recv_seq = 0;
                    let params = HdlcParameters {
                        max_info_tx: self.meter.max_info_length,
                        max_info_rx: self.meter.max_info_length,
                        ..Default::default()
                    };
                    let ua = reply_to(Control::Ua).with_information(params.encode(), false);
                    self.write(&ua).await?;
                }
                Control::Disc => {
                    self.write(&reply_to(Control::Ua)).await?;
                    return Ok(());
                }
                Control::Information { send_seq, .. } => {
                    self.recv_seq = (send_seq + 1) % 8;
                    apdu.extend_from_slice(&frame.information);
                    if frame.segmented {
                        let rr = reply_to(Control::Rr {
                            recv_seq: self.recv_seq,
                        });
                        self.write(&rr).await?;
                        continue;
                    }

                    let request = std::mem::take(&mut apdu);
                    let Some(command) = request.strip_prefix(&LLC_COMMAND[..]) else {
                        continue;
                    };
                    if self.meter.unresponsive_after_association && self.associated {
                        continue;
                    }
                    let response = self.handle(command);
                    self.send_apdu(&frame, &response).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle(&mut self, command: &[u8]) -> Vec<u8> {
        match command.first() {
            Some(0x60) => {
                let accepted = match &self.meter.password {
                    Some(expected) => aarq_password(command).as_deref() == Some(expected),
                    None => true,
                };
                self.associated = accepted;
                if accepted {
                    AARE_ACCEPTED.to_vec()
                } else {
                    AARE_REJECTED.to_vec()
                }
            }
            Some(0x62) => {
                self.associated = false;
                RLRE.to_vec()
            }
            Some(0xC0) if self.associated => match GetRequest::decode(command) {
                Ok(request) => {
                    self.meter.requests.fetch_add(1, Ordering::SeqCst);
                    self.get(request).encode()
                }
                Err(_) => EXCEPTION.to_vec(),
            },
            _ => EXCEPTION.to_vec(),
        }
    }

    fn get(&mut self, request: GetRequest) -> GetResponse {
        match request {
            GetRequest::Normal {
                invoke_id,
                attribute,
            } => {
                let Some(value) = self.meter.objects.lock().get(&attribute).cloned() else {
                    return GetResponse::Normal {
                        invoke_id,
                        result: Err(DataAccessResult::ObjectUndefined),
                    };
                };
                let encoded = axdr::encode(&value);

                match self.meter.block_size {
                    Some(size) if encoded.len() > size => {
                        self.blocks = encoded.chunks(size).map(<[u8]>::to_vec).collect();
                        self.block_sent = 0;
                        self.next_block(invoke_id)
                    }
                    _ => GetResponse::Normal {
                        invoke_id,
                        result: Ok(encoded),
                    },
                }
            }
            GetRequest::Next {
                invoke_id,
                block_number,
            } => {
                if self.block_sent == 0 || block_number as usize != self.block_sent {
                    return GetResponse::Block {
                        invoke_id,
                        last: true,
                        block_number,
                        result: Err(DataAccessResult::NoLongGetInProgress),
                    };
                }
                self.next_block(invoke_id)
            }
        }
    }

    fn next_block(&mut self, invoke_id: u8) -> GetResponse {
        let block = self.blocks.get(self.block_sent).cloned().unwrap_or_default();
        self.block_sent += 1;
        let last = self.block_sent >= self.blocks.len();
        let response = GetResponse::Block {
            invoke_id,
            last,
            block_number: self.block_sent as u32,
            result: Ok(block),
        };
        if last {
            self.blocks.clear();
            self.block_sent = 0;
        }
        response
    }

    async fn send_apdu(&mut self, request: &HdlcFrame, apdu: &[u8]) -> io::Result<()> {
        let mut payload = LLC_RESPONSE.to_vec();
        payload.extend_from_slice(apdu);

        let chunks: Vec<&[u8]> = payload
            .chunks(usize::from(self.meter.max_info_length))
            .collect();
        let last = chunks.len() - 1;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let segmented = idx < last;
            let control = Control::Information {
                send_seq: self.send_seq,
                recv_seq: self.recv_seq,
            };
            let frame = HdlcFrame::new(request.source, request.destination, control)
                .with_information(chunk.to_vec(), segmented);
            self.write(&frame).await?;
            self.send_seq = (self.send_seq + 1) % 8;

            if segmented {
                // wait for the client's RR
                if self.next_frame().await?.is_none() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> io::Result<Option<HdlcFrame>> {
        loop {
            if let Some(raw) = split_frame(&mut self.buffer) {
                if let Ok(frame) = HdlcFrame::decode(&raw, AddressKind::Server) {
                    return Ok(Some(frame));
                }
                continue;
            }
            if self.io.read_buf(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
        }
    }

    async fn write(&mut self, frame: &HdlcFrame) -> io::Result<()> {
        self.io.write_all(&frame.encode()).await?;
        self.io.flush().await
    }
}

/// LLS secret from the calling-authentication-value of an AARQ
fn aarq_password(aarq: &[u8]) -> Option<Vec<u8>> {
    let (len, used) = axdr::decode_length(aarq.get(1..)?).ok()?;
    let mut content = aarq.get(1 + used..1 + used + len)?;

    while let Some((&tag, rest)) = content.split_first() {
        let (len, used) = axdr::decode_length(rest).ok()?;
        let value = rest.get(used..used + len)?;
        if tag == 0xAC {
            // [0] GraphicString
            let (secret_len, used) = axdr::decode_length(value.get(1..)?).ok()?;
            return value.get(1 + used..1 + used + secret_len).map(<[u8]>::to_vec);
        }
        content = &rest[used + len..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acse::build_aarq;

    #[test]
    fn test_aarq_password_extraction() {
        assert_eq!(
            aarq_password(&build_aarq(Some(b"secret"))),
            Some(b"secret".to_vec())
        );
        assert_eq!(aarq_password(&build_aarq(None)), None);
    }
}
