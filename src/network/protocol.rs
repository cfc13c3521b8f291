// Wire format: a fixed-width, zero-padded ASCII command tag followed by a
// bincode-encoded payload. The receiver reads the whole connection before
// parsing; there is no framing beyond the tag.

use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

pub const COMMAND_LENGTH: usize = 12;

pub const CMD_VERSION: &str = "version";
pub const CMD_GET_BLOCKS: &str = "getblocks";
pub const CMD_INV: &str = "inv";
pub const CMD_GET_DATA: &str = "getdata";
pub const CMD_BLOCK: &str = "block";
pub const CMD_TX: &str = "tx";
pub const CMD_ADDR: &str = "addr";

/// What an inventory or data request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum InvKind {
    Block,
    Tx,
}

/// Handshake announcing protocol version and chain height.
#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct VersionPayload {
    pub version: usize,
    pub best_height: usize,
    pub addr_from: String,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

/// Announcement of hashes the sender holds, inviting `getdata` requests.
#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

/// Peer-list exchange.
#[derive(Debug, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

pub fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    for (i, b) in command.bytes().enumerate().take(COMMAND_LENGTH) {
        bytes[i] = b;
    }
    bytes
}

pub fn bytes_to_command(bytes: &[u8]) -> String {
    let stripped: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0x00).collect();
    String::from_utf8_lossy(&stripped).to_string()
}

/// Tag + encoded payload, ready to write to a peer connection.
pub fn build_request<T: Serialize + bincode::Encode>(command: &str, payload: &T) -> Result<Vec<u8>> {
    let mut request = command_to_bytes(command).to_vec();
    request.extend(serialize(payload)?);
    Ok(request)
}

/// Split a received request into its command and decoded payload.
pub fn parse_payload<T>(request: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    if request.len() < COMMAND_LENGTH {
        return Err(LedgerError::Network("Request too short".to_string()));
    }
    deserialize(&request[COMMAND_LENGTH..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tag_round_trip() {
        for cmd in [
            CMD_VERSION,
            CMD_GET_BLOCKS,
            CMD_INV,
            CMD_GET_DATA,
            CMD_BLOCK,
            CMD_TX,
            CMD_ADDR,
        ] {
            let bytes = command_to_bytes(cmd);
            assert_eq!(bytes.len(), COMMAND_LENGTH);
            assert_eq!(bytes_to_command(&bytes), cmd);
        }
    }

    #[test]
    fn test_request_round_trip() {
        let payload = VersionPayload {
            version: 1,
            best_height: 7,
            addr_from: "127.0.0.1:2001".to_string(),
        };
        let request = build_request(CMD_VERSION, &payload).unwrap();

        assert_eq!(bytes_to_command(&request[..COMMAND_LENGTH]), CMD_VERSION);
        let decoded: VersionPayload = parse_payload(&request).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.best_height, 7);
        assert_eq!(decoded.addr_from, "127.0.0.1:2001");
    }

    #[test]
    fn test_inv_payload_round_trip() {
        let payload = InvPayload {
            addr_from: "127.0.0.1:2002".to_string(),
            kind: InvKind::Block,
            items: vec![b"hash1".to_vec(), b"hash2".to_vec()],
        };
        let request = build_request(CMD_INV, &payload).unwrap();
        let decoded: InvPayload = parse_payload(&request).unwrap();
        assert_eq!(decoded.kind, InvKind::Block);
        assert_eq!(decoded.items.len(), 2);
    }

    #[test]
    fn test_short_request_rejected() {
        let result: crate::error::Result<VersionPayload> = parse_payload(b"inv");
        assert!(result.is_err());
    }
}
