//! Codec for envelope frames over libp2p request-response.
//!
//! Each request is one frame: a 4-byte big-endian length, the sender's
//! 16-byte device ID, then the envelope JSON. Responses are a single
//! acknowledgement byte.

use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::request_response;
use std::io;
use tandem_types::DeviceId;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const DEVICE_ID_LEN: usize = 16;
const ACK: u8 = 0x06;

/// The frame codec for request-response.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec;

/// A frame sent from one device to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    /// The device that sent the frame.
    pub sender: DeviceId,
    /// Encoded envelope.
    pub body: Vec<u8>,
}

/// Delivery acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAck;

#[async_trait]
impl request_response::Codec for FrameCodec {
    type Protocol = &'static str;
    type Request = FrameRequest;
    type Response = FrameAck;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_frame(io).await
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut byte = [0u8; 1];
        io.read_exact(&mut byte).await?;
        if byte[0] != ACK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected acknowledgement byte {:#04x}", byte[0]),
            ));
        }
        Ok(FrameAck)
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        _res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&[ACK]).await?;
        io.flush().await
    }
}

/// Reads one length-prefixed frame.
pub async fn read_frame<T: AsyncRead + Unpin>(io: &mut T) -> io::Result<FrameRequest> {
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }
    if len < DEVICE_ID_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too short: {len} bytes"),
        ));
    }

    let mut sender = [0u8; DEVICE_ID_LEN];
    io.read_exact(&mut sender).await?;
    let mut body = vec![0u8; len - DEVICE_ID_LEN];
    io.read_exact(&mut body).await?;

    Ok(FrameRequest {
        sender: DeviceId::from_bytes(sender),
        body,
    })
}

/// Writes one length-prefixed frame.
pub async fn write_frame<T: AsyncWrite + Unpin>(io: &mut T, frame: &FrameRequest) -> io::Result<()> {
    let len = DEVICE_ID_LEN + frame.body.len();
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }

    let len_bytes = (len as u32).to_be_bytes();
    io.write_all(&len_bytes).await?;
    io.write_all(frame.sender.as_bytes()).await?;
    io.write_all(&frame.body).await?;
    io.flush().await?;

    Ok(())
}
