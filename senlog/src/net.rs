//! CoAP block-wise uplink transport.
//!
//! Packs leave the device as a confirmable CoAP PUT with the block1
//! option, Content-Format `application/senml+cbor` (112). The remote is
//! expected to answer every non-final block with `2.31 Continue` and the
//! final one with `2.04 Changed`. Block size is configurable through the
//! block size exponent (16..1024 bytes, default the protocol maximum).
//!
//! The transport sits behind the [`Transport`] trait so the publisher can
//! be exercised against mocks; [`CoapClient`] is the real thing over a UDP
//! socket.

use std::io::{self, Read, Seek, SeekFrom};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TransferError};
use crate::transfer::PackSource;

/// CoAP Content-Format for `application/senml+cbor` (RFC 8428).
pub const SENML_CBOR_FORMAT: u16 = 112;

/// Valid range of the block size exponent (16 to 1024-byte blocks).
pub const BLOCK_SIZE_EXP_RANGE: std::ops::RangeInclusive<u8> = 4..=10;

/// Description of the remote resource packs are PUT to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Backend server address (IP or host name).
    pub address: String,
    /// Backend server UDP port.
    pub port: u16,
    /// CoAP resource path, e.g. `/storage/node0`.
    pub path: String,
}

impl RemoteResource {
    /// Creates a resource description.
    pub fn new(address: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        RemoteResource {
            address: address.into(),
            port,
            path: path.into(),
        }
    }
}

/// Synchronous pack upload to a remote resource.
///
/// Implementations rewind the source themselves, so a retried send starts
/// over from the first byte. Returns the number of payload bytes shipped.
pub trait Transport: Send + Sync {
    /// Sends the source's content to `res`, blocking until the remote
    /// acknowledged it or the attempt failed.
    fn send(
        &self,
        res: &RemoteResource,
        source: &mut dyn PackSource,
    ) -> Result<usize, TransferError>;
}

/// CoAP block-wise PUT client.
#[derive(Debug, Clone)]
pub struct CoapClient {
    block_size_exp: u8,
    timeout: Duration,
    max_retransmits: u32,
}

impl Default for CoapClient {
    /// Protocol-maximum blocks, 2 s response timeout, 4 retransmits.
    fn default() -> Self {
        CoapClient {
            block_size_exp: 10,
            timeout: Duration::from_secs(2),
            max_retransmits: 4,
        }
    }
}

impl CoapClient {
    /// Creates a client with the given block size exponent.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BlockSizeExp`] outside `4..=10`.
    pub fn new(block_size_exp: u8) -> Result<Self, ConfigError> {
        if !BLOCK_SIZE_EXP_RANGE.contains(&block_size_exp) {
            return Err(ConfigError::BlockSizeExp(block_size_exp));
        }
        Ok(CoapClient {
            block_size_exp,
            ..CoapClient::default()
        })
    }

    /// Sets the per-block response timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of retransmits per block before giving up.
    #[must_use]
    pub fn with_max_retransmits(mut self, n: u32) -> Self {
        self.max_retransmits = n;
        self
    }

    /// Builds the PUT request for one block.
    fn block_request(
        &self,
        res: &RemoteResource,
        payload: &[u8],
        num: u32,
        more: bool,
    ) -> Packet {
        let msg_id = next_message_id();

        let mut pkt = Packet::new();
        pkt.header.message_id = msg_id;
        pkt.header.set_type(MessageType::Confirmable);
        pkt.header.code = MessageClass::Request(RequestType::Put);
        pkt.set_token(msg_id.to_be_bytes().to_vec());

        for segment in res.path.split('/').filter(|s| !s.is_empty()) {
            pkt.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        pkt.add_option(CoapOption::ContentFormat, encode_uint(SENML_CBOR_FORMAT.into()));
        pkt.add_option(
            CoapOption::Block1,
            block1_value(num, more, self.block_size_exp - 4),
        );

        pkt.payload = payload.to_vec();
        pkt
    }

    /// Sends one request, retransmitting on timeout, and returns the
    /// token-matched response.
    fn exchange(&self, socket: &UdpSocket, pkt: &Packet) -> Result<Packet, TransferError> {
        let bytes = pkt
            .to_bytes()
            .map_err(|e| TransferError::Protocol(format!("cannot encode request: {e:?}")))?;
        let token = pkt.get_token().to_vec();

        let mut buf = [0u8; 2048];
        for _ in 0..=self.max_retransmits {
            socket.send(&bytes)?;

            match socket.recv(&mut buf) {
                Ok(n) => {
                    if let Ok(resp) = Packet::from_bytes(&buf[..n]) {
                        if token.as_slice() == &resp.get_token()[..] {
                            return Ok(resp);
                        }
                        tracing::debug!("response token mismatch, retransmitting");
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::ConnectionRefused =>
                {
                    tracing::debug!("no block response yet, retransmitting");
                }
                Err(e) => return Err(TransferError::Io(e)),
            }
        }

        Err(TransferError::Timeout)
    }
}

impl Transport for CoapClient {
    fn send(
        &self,
        res: &RemoteResource,
        source: &mut dyn PackSource,
    ) -> Result<usize, TransferError> {
        source.seek(SeekFrom::Start(0))?;

        let remote = resolve(res)?;
        let local: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().expect("literal address")
        } else {
            "0.0.0.0:0".parse().expect("literal address")
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        socket.set_read_timeout(Some(self.timeout))?;

        let block_size = 1usize << self.block_size_exp;
        let mut current = read_chunk(source, block_size)?;
        let mut num: u32 = 0;
        let mut total = 0usize;

        // One block of lookahead decides the `more` flag, so a payload
        // that is an exact block multiple still terminates cleanly.
        loop {
            let next = read_chunk(source, block_size)?;
            let more = !next.is_empty();

            let pkt = self.block_request(res, &current, num, more);
            let resp = self.exchange(&socket, &pkt)?;

            let expected = if more {
                ResponseType::Continue
            } else {
                ResponseType::Changed
            };
            match resp.header.code {
                MessageClass::Response(code) if code == expected => {}
                other => {
                    return Err(TransferError::Protocol(format!(
                        "unexpected response code {other:?} for block {num}"
                    )));
                }
            }

            total += current.len();
            tracing::debug!(num, len = current.len(), more, "block acknowledged");

            if !more {
                break;
            }
            current = next;
            num += 1;
        }

        tracing::info!(total, blocks = num + 1, "pack delivered");
        Ok(total)
    }
}

/// Resolves the resource address to a socket address.
fn resolve(res: &RemoteResource) -> Result<SocketAddr, TransferError> {
    (res.address.as_str(), res.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            TransferError::Protocol(
                ConfigError::RemoteAddress(res.address.clone()).to_string(),
            )
        })
}

/// Reads up to `len` bytes, short only at end of data.
fn read_chunk(source: &mut dyn PackSource, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    buf.truncate(filled);
    Ok(buf)
}

/// Encodes a block1 option value: `num << 4 | more << 3 | szx`.
fn block1_value(num: u32, more: bool, szx: u8) -> Vec<u8> {
    let v = (num << 4) | (u32::from(more) << 3) | u32::from(szx);
    encode_uint(v)
}

/// Minimal-length big-endian option encoding of an unsigned value.
fn encode_uint(v: u32) -> Vec<u8> {
    if v == 0 {
        return Vec::new();
    }
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn next_message_id() -> u16 {
    static MSG_ID: AtomicU16 = AtomicU16::new(1);
    MSG_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfile::MemFile;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_block1_value_layout() {
        // num=0, more, szx=6 -> 0b0000_1110
        assert_eq!(block1_value(0, true, 6), vec![0x0e]);
        // num=1, more, szx=6 -> 0x1e
        assert_eq!(block1_value(1, true, 6), vec![0x1e]);
        // num=16 crosses into the second byte.
        assert_eq!(block1_value(16, false, 6), vec![0x01, 0x06]);
        // Zero encodes as the empty option value.
        assert_eq!(block1_value(0, false, 0), Vec::<u8>::new());
    }

    #[test]
    fn test_encode_uint_minimal() {
        assert_eq!(encode_uint(0), Vec::<u8>::new());
        assert_eq!(encode_uint(112), vec![112]);
        assert_eq!(encode_uint(0x1234), vec![0x12, 0x34]);
    }

    #[test]
    fn test_block_size_exp_validation() {
        assert!(CoapClient::new(3).is_err());
        assert!(CoapClient::new(11).is_err());
        assert!(CoapClient::new(4).is_ok());
        assert!(CoapClient::new(10).is_ok());
    }

    /// Decodes a block1 option value back into (num, more, szx).
    fn parse_block1(value: &[u8]) -> (u32, bool, u8) {
        let mut v: u32 = 0;
        for b in value {
            v = (v << 8) | u32::from(*b);
        }
        (v >> 4, v & 0x08 != 0, (v & 0x07) as u8)
    }

    /// A minimal CoAP server answering Continue/Changed per block1.
    fn spawn_mock_server() -> (SocketAddr, mpsc::Receiver<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            let mut payload = Vec::new();

            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf) else {
                    return;
                };
                let Ok(req) = Packet::from_bytes(&buf[..n]) else {
                    continue;
                };

                let block1 = req
                    .get_option(CoapOption::Block1)
                    .and_then(|values| values.front())
                    .map(|v| parse_block1(v))
                    .unwrap_or((0, false, 0));
                let (_, more, _) = block1;

                payload.extend_from_slice(&req.payload);

                let mut resp = Packet::new();
                resp.header.message_id = req.header.message_id;
                resp.header.set_type(MessageType::Acknowledgement);
                resp.header.code = MessageClass::Response(if more {
                    ResponseType::Continue
                } else {
                    ResponseType::Changed
                });
                resp.set_token(req.get_token().to_vec());
                socket.send_to(&resp.to_bytes().unwrap(), peer).unwrap();

                if !more {
                    tx.send(payload).unwrap();
                    return;
                }
            }
        });

        (addr, rx)
    }

    #[test]
    fn test_blockwise_put_roundtrip() {
        let (addr, rx) = spawn_mock_server();

        let payload: Vec<u8> = (0..100u8).collect();
        let client = CoapClient::new(4)
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        let res = RemoteResource::new(addr.ip().to_string(), addr.port(), "/storage/node0");

        let sent = client
            .send(&res, &mut MemFile::with_data(payload.clone()))
            .unwrap();
        assert_eq!(sent, 100);

        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received, payload);
    }

    #[test]
    fn test_blockwise_exact_multiple_terminates() {
        let (addr, rx) = spawn_mock_server();

        // Exactly two 16-byte blocks; the last one must clear `more`.
        let payload: Vec<u8> = (0..32u8).collect();
        let client = CoapClient::new(4)
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        let res = RemoteResource::new(addr.ip().to_string(), addr.port(), "/p");

        let sent = client
            .send(&res, &mut MemFile::with_data(payload.clone()))
            .unwrap();
        assert_eq!(sent, 32);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), payload);
    }

    #[test]
    fn test_unreachable_server_times_out() {
        // Nothing listens here; the send must fail, not hang forever.
        let client = CoapClient::new(4)
            .unwrap()
            .with_timeout(Duration::from_millis(50))
            .with_max_retransmits(1);
        let res = RemoteResource::new("127.0.0.1", 9, "/p");

        let err = client
            .send(&res, &mut MemFile::with_data(vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout));
    }
}
