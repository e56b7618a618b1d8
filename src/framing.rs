//! Wire framing.
//!
//! Datagrams accumulate until the literal `<EOF>` sentinel appears.
//! Handshake frames are base64(JSON); once a session key exists, frames
//! are AEAD-codec output (itself already base64) with `<EOF>` appended.

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::net::UdpSocket;

use crate::error::{OverlayError, Result};

pub const EOF_SENTINEL: &[u8] = b"<EOF>";
const RECV_CHUNK: usize = 4096;

/// Accumulate datagrams from `socket` until `<EOF>` appears, returning
/// everything read before the sentinel along with the sender address.
pub async fn recv_framed(socket: &UdpSocket) -> Result<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; RECV_CHUNK];
    let mut acc = Vec::new();
    let mut from: Option<SocketAddr> = None;
    loop {
        let (n, addr) = socket.recv_from(&mut buf).await?;
        from.get_or_insert(addr);
        acc.extend_from_slice(&buf[..n]);
        if let Some(pos) = find_sentinel(&acc) {
            acc.truncate(pos);
            return Ok((acc, from.unwrap()));
        }
    }
}

/// Append the `<EOF>` sentinel to `payload` and send it in one datagram.
pub async fn send_framed(socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) -> Result<()> {
    let mut framed = Vec::with_capacity(payload.len() + EOF_SENTINEL.len());
    framed.extend_from_slice(payload);
    framed.extend_from_slice(EOF_SENTINEL);
    socket.send_to(&framed, addr).await?;
    Ok(())
}

fn find_sentinel(buf: &[u8]) -> Option<usize> {
    if buf.len() < EOF_SENTINEL.len() {
        return None;
    }
    buf.windows(EOF_SENTINEL.len())
        .position(|w| w == EOF_SENTINEL)
}

/// base64(JSON) framing used only during the handshake, before a session
/// key exists to drive the AEAD codec.
pub fn encode_handshake<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value).map_err(|e| OverlayError::Framing(e.to_string()))?;
    Ok(STANDARD.encode(json).into_bytes())
}

pub fn decode_handshake<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let json = STANDARD
        .decode(bytes)
        .map_err(|e| OverlayError::Framing(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| OverlayError::Framing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn handshake_round_trips() {
        let value = Sample {
            a: 7,
            b: "hello".into(),
        };
        let encoded = encode_handshake(&value).unwrap();
        let decoded: Sample = decode_handshake(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn send_and_recv_over_loopback_strips_sentinel() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send_framed(&client, server_addr, b"payload bytes")
            .await
            .unwrap();

        let (received, _from) = recv_framed(&server).await.unwrap();
        assert_eq!(received, b"payload bytes");
    }
}
