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

//! Connection-oriented HDLC transport carrying xDLMS APDUs

use super::address::{AddressKind, HdlcAddress};
use super::frame::{Control, HdlcFrame, split_frame};
use super::parameters::HdlcParameters;
use crate::error::{DlmsError, DlmsResult, HdlcError};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// LLC header of command APDUs (client to server)
pub const LLC_COMMAND: [u8; 3] = [0xE6, 0xE6, 0x00];
/// LLC header of response APDUs (server to client)
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

#[derive(Debug)]
pub struct HdlcTransport<IO> {
    io: IO,
    client: HdlcAddress,
    server: HdlcAddress,
    send_seq: u8,
    recv_seq: u8,
    parameters: HdlcParameters,
    timeout: Duration,
    buffer: BytesMut,
    connected: bool,
}

impl<IO> HdlcTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: IO, client: HdlcAddress, server: HdlcAddress, timeout: Duration) -> Self {
        Self {
            io,
            client,
            server,
            send_seq: 0,
            recv_seq: 0,
            parameters: HdlcParameters::default(),
            timeout,
            buffer: BytesMut::with_capacity(512),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Parameters in effect after SNRM/UA negotiation
    pub fn parameters(&self) -> HdlcParameters {
        self.parameters
    }

    /// Set up the link with SNRM and adopt the parameters from the UA answer
    pub async fn connect(&mut self) -> DlmsResult<()> {
        let snrm = HdlcFrame::new(self.server, self.client, Control::Snrm)
            .with_information(HdlcParameters::default().encode(), false);
        self.write_frame(&snrm).await?;

        let reply = self.read_frame().await?;
        match reply.control {
            Control::Ua => {
                let peer = HdlcParameters::decode(&reply.information)?;
                self.parameters = HdlcParameters::from_peer(&peer);
                self.send_seq = 0;
                self.recv_seq = 0;
                self.connected = true;
                debug!(
                    "HDLC link established (max info tx={}, rx={})",
                    self.parameters.max_info_tx, self.parameters.max_info_rx
                );
                Ok(())
            }
            Control::Dm => Err(DlmsError::ConnectionRefused),
            other => Err(HdlcError::UnexpectedFrame {
                expected: "UA",
                actual: other.to_string(),
            }
            .into()),
        }
    }

    /// Send an APDU and wait for the complete response APDU
    pub async fn request(&mut self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        self.send(apdu).await?;
        self.recv().await
    }

    pub async fn send(&mut self, apdu: &[u8]) -> DlmsResult<()> {
        if !self.connected {
            return Err(DlmsError::NotConnected);
        }

        let mut payload = Vec::with_capacity(apdu.len() + LLC_COMMAND.len());
        payload.extend_from_slice(&LLC_COMMAND);
        payload.extend_from_slice(apdu);

        let max_info = usize::from(self.parameters.max_info_tx.max(16));
        let chunks: Vec<&[u8]> = payload.chunks(max_info).collect();
        let last = chunks.len() - 1;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let segmented = idx < last;
            let control = Control::Information {
                send_seq: self.send_seq,
                recv_seq: self.recv_seq,
            };
            let frame = HdlcFrame::new(self.server, self.client, control)
                .with_information(chunk.to_vec(), segmented);
            self.write_frame(&frame).await?;
            self.send_seq = (self.send_seq + 1) % 8;

            if segmented {
                let ack = self.read_frame().await?;
                match ack.control {
                    Control::Rr { recv_seq } => {
                        if recv_seq != self.send_seq {
                            warn!(
                                "Meter acknowledged N(R)={recv_seq}, expected {}",
                                self.send_seq
                            );
                        }
                    }
                    other => {
                        return Err(HdlcError::UnexpectedFrame {
                            expected: "RR",
                            actual: other.to_string(),
                        }
                        .into());
                    }
                }
            }
        }

        Ok(())
    }

    /// Receive one APDU, acknowledging segments as they arrive
    pub async fn recv(&mut self) -> DlmsResult<Vec<u8>> {
        if !self.connected {
            return Err(DlmsError::NotConnected);
        }

        let mut data = Vec::new();
        loop {
            let frame = self.read_frame().await?;
            match frame.control {
                Control::Information { send_seq, .. } => {
                    if send_seq != self.recv_seq {
                        warn!(
                            "Out of sequence I-frame: N(S)={send_seq}, expected {}",
                            self.recv_seq
                        );
                    }
                    self.recv_seq = (send_seq + 1) % 8;
                    data.extend_from_slice(&frame.information);

                    if !frame.segmented {
                        break;
                    }
                    trace!("Segment received ({} bytes so far)", data.len());
                    let control = Control::Rr {
                        recv_seq: self.recv_seq,
                    };
                    let rr = HdlcFrame::new(self.server, self.client, control);
                    self.write_frame(&rr).await?;
                }
                Control::Dm | Control::Disc => {
                    self.connected = false;
                    return Err(DlmsError::NotConnected);
                }
                other => {
                    return Err(HdlcError::UnexpectedFrame {
                        expected: "I",
                        actual: other.to_string(),
                    }
                    .into());
                }
            }
        }

        match data.strip_prefix(&LLC_RESPONSE[..]) {
            Some(apdu) => Ok(apdu.to_vec()),
            None => Err(HdlcError::MissingLlc.into()),
        }
    }

    /// Release the link with DISC
    pub async fn disconnect(&mut self) -> DlmsResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        let disc = HdlcFrame::new(self.server, self.client, Control::Disc);
        self.write_frame(&disc).await?;

        let reply = self.read_frame().await?;
        match reply.control {
            Control::Ua | Control::Dm => Ok(()),
            other => Err(HdlcError::UnexpectedFrame {
                expected: "UA",
                actual: other.to_string(),
            }
            .into()),
        }
    }

    async fn write_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        let bytes = frame.encode();
        trace!("HDLC >> {} {:02X?}", frame.control, bytes);
        self.io.write_all(&bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> DlmsResult<HdlcFrame> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_frame_inner())
            .await
            .map_err(|_| DlmsError::Timeout(timeout))?
    }

    async fn read_frame_inner(&mut self) -> DlmsResult<HdlcFrame> {
        loop {
            if let Some(raw) = split_frame(&mut self.buffer) {
                let frame = HdlcFrame::decode(&raw, AddressKind::Client)?;
                trace!("HDLC << {} {:02X?}", frame.control, &raw[..]);

                if frame.destination.logical != self.client.logical {
                    warn!(
                        "Ignoring frame for client address {}",
                        frame.destination.logical
                    );
                    continue;
                }
                return Ok(frame);
            }

            let read = self.io.read_buf(&mut self.buffer).await?;
            if read == 0 {
                self.connected = false;
                return Err(DlmsError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "meter closed the connection",
                )));
            }
        }
    }
}
