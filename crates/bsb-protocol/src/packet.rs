//! Packet types exchanged on the bus

use std::fmt;

use crate::error::ParseError;

/// Kind of transaction carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PacketType {
    /// Unsolicited broadcast of a value
    Inf,
    /// Write a value
    Set,
    /// Write acknowledged
    Ack,
    /// Write or query refused
    Nack,
    /// Query a value
    Get,
    /// Query answer carrying the value
    Ret,
    /// Controller-side error
    Err,
}

impl PacketType {
    /// Wire byte of this packet type
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::Inf => 0x02,
            PacketType::Set => 0x03,
            PacketType::Ack => 0x04,
            PacketType::Nack => 0x05,
            PacketType::Get => 0x06,
            PacketType::Ret => 0x07,
            PacketType::Err => 0x08,
        }
    }

    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Result<Self, ParseError> {
        match byte {
            0x02 => Ok(PacketType::Inf),
            0x03 => Ok(PacketType::Set),
            0x04 => Ok(PacketType::Ack),
            0x05 => Ok(PacketType::Nack),
            0x06 => Ok(PacketType::Get),
            0x07 => Ok(PacketType::Ret),
            0x08 => Ok(PacketType::Err),
            other => Err(ParseError::UnknownPacketType(other)),
        }
    }

    /// Short lowercase name, as used in correlation keys
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Inf => "inf",
            PacketType::Set => "set",
            PacketType::Ack => "ack",
            PacketType::Nack => "nack",
            PacketType::Get => "get",
            PacketType::Ret => "ret",
            PacketType::Err => "err",
        }
    }

    /// Whether this packet answers an earlier request
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            PacketType::Ack | PacketType::Nack | PacketType::Ret | PacketType::Err
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
