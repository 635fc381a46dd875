//! Wire framing for peer messages.
//!
//! A frame is a fixed-width, zero-padded ASCII command tag followed by
//! the bincode payload. Frames decode once into the [`Message`] enum and
//! every handler matches on that; a frame with an unknown tag or an
//! undecodable payload is a protocol error the caller logs and drops.

use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

pub const COMMAND_LENGTH: usize = 12;

const CMD_VERSION: &str = "version";
const CMD_GET_BLOCKS: &str = "getblocks";
const CMD_INV: &str = "inv";
const CMD_GET_DATA: &str = "getdata";
const CMD_BLOCK: &str = "block";
const CMD_TX: &str = "tx";
const CMD_TX_FROM_POOL: &str = "txfrompool";

/// What an `inv` or `getdata` frame refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Version {
    pub version: usize,
    pub best_height: usize,
    pub addr_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetBlocks {
    pub addr_from: String,
    pub height: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Inv {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetData {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockFrame {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxFrame {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetTxFromPool {
    pub addr_from: String,
    pub count: usize,
}

/// Every peer message the node understands.
#[derive(Debug, Clone)]
pub enum Message {
    Version(Version),
    GetBlocks(GetBlocks),
    Inv(Inv),
    GetData(GetData),
    Block(BlockFrame),
    Tx(TxFrame),
    GetTxFromPool(GetTxFromPool),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => CMD_VERSION,
            Message::GetBlocks(_) => CMD_GET_BLOCKS,
            Message::Inv(_) => CMD_INV,
            Message::GetData(_) => CMD_GET_DATA,
            Message::Block(_) => CMD_BLOCK,
            Message::Tx(_) => CMD_TX,
            Message::GetTxFromPool(_) => CMD_TX_FROM_POOL,
        }
    }

    /// Frame the message: zero-padded command tag, then the payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::Version(p) => serialize(p)?,
            Message::GetBlocks(p) => serialize(p)?,
            Message::Inv(p) => serialize(p)?,
            Message::GetData(p) => serialize(p)?,
            Message::Block(p) => serialize(p)?,
            Message::Tx(p) => serialize(p)?,
            Message::GetTxFromPool(p) => serialize(p)?,
        };

        let mut bytes = vec![0u8; COMMAND_LENGTH];
        let command = self.command().as_bytes();
        bytes[..command.len()].copy_from_slice(command);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Message> {
        if data.len() < COMMAND_LENGTH {
            return Err(ChainError::Protocol(format!(
                "Frame too short: {} bytes",
                data.len()
            )));
        }

        let tag = &data[..COMMAND_LENGTH];
        let end = tag.iter().position(|&b| b == 0).unwrap_or(COMMAND_LENGTH);
        let command = std::str::from_utf8(&tag[..end])
            .map_err(|_| ChainError::Protocol("Command tag is not ASCII".to_string()))?;
        let payload = &data[COMMAND_LENGTH..];

        let message = match command {
            CMD_VERSION => Message::Version(deserialize(payload)?),
            CMD_GET_BLOCKS => Message::GetBlocks(deserialize(payload)?),
            CMD_INV => Message::Inv(deserialize(payload)?),
            CMD_GET_DATA => Message::GetData(deserialize(payload)?),
            CMD_BLOCK => Message::Block(deserialize(payload)?),
            CMD_TX => Message::Tx(deserialize(payload)?),
            CMD_TX_FROM_POOL => Message::GetTxFromPool(deserialize(payload)?),
            other => {
                return Err(ChainError::Protocol(format!("Unknown command: {other}")));
            }
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let message = Message::Version(Version {
            version: 1,
            best_height: 42,
            addr_from: "node-1".to_string(),
        });

        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[..7], CMD_VERSION.as_bytes());
        assert_eq!(&bytes[7..COMMAND_LENGTH], &[0u8; 5]);

        match Message::from_bytes(&bytes).unwrap() {
            Message::Version(v) => {
                assert_eq!(v.version, 1);
                assert_eq!(v.best_height, 42);
                assert_eq!(v.addr_from, "node-1");
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_inv_round_trip_keeps_kind_and_items() {
        let message = Message::Inv(Inv {
            addr_from: "node-2".to_string(),
            kind: InvKind::Block,
            items: vec![vec![0xab; 32], vec![0xcd; 32]],
        });

        let bytes = message.to_bytes().unwrap();
        match Message::from_bytes(&bytes).unwrap() {
            Message::Inv(inv) => {
                assert_eq!(inv.kind, InvKind::Block);
                assert_eq!(inv.items.len(), 2);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_short_frame_is_a_protocol_error() {
        let err = Message::from_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ChainError::Protocol(_)));
    }

    #[test]
    fn test_unknown_command_is_a_protocol_error() {
        let mut bytes = vec![0u8; COMMAND_LENGTH];
        bytes[..4].copy_from_slice(b"nope");
        let err = Message::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ChainError::Protocol(_)));
    }

    #[test]
    fn test_garbled_payload_fails_to_decode() {
        let mut bytes = vec![0u8; COMMAND_LENGTH];
        bytes[..CMD_INV.len()].copy_from_slice(CMD_INV.as_bytes());
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(Message::from_bytes(&bytes).is_err());
    }
}
