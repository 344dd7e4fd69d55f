//! Byte-serialization codec (C3): MsgPack (preferred) or JSON encoding of
//! RPC payloads, plus an Ext-type hook registry for application types
//! carried over MsgPack's Ext wire type.

pub mod ext;

use crate::error::CodecError;
use serde::{Deserialize, Serialize};

/// Canonical in-memory representation of any wire value: covers MsgPack's
/// nil/bool/int/float/str/bin/array/map/ext directly, and round-trips
/// through the JSON fallback via `rmpv`'s serde support (lossy for
/// Binary/Ext, which JSON has no native representation for).
pub type Value = rmpv::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    MsgPack,
    Json,
}

impl Default for WireFormat {
    fn default() -> Self {
        WireFormat::MsgPack
    }
}

impl std::str::FromStr for WireFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" => Ok(WireFormat::MsgPack),
            "json" => Ok(WireFormat::Json),
            other => Err(CodecError::MalformedTuple(format!(
                "unknown wire format: {other}"
            ))),
        }
    }
}

/// Encodes a [`Value`] to bytes in the configured wire format.
pub fn encode(value: &Value, format: WireFormat) -> Result<Vec<u8>, CodecError> {
    match format {
        WireFormat::MsgPack => {
            let mut buf = Vec::new();
            rmpv::encode::write_value(&mut buf, value)
                .map_err(|e| CodecError::MsgPackEncode(e.to_string()))?;
            Ok(buf)
        }
        WireFormat::Json => serde_json::to_vec(value).map_err(CodecError::from),
    }
}

/// Decodes bytes into a [`Value`] using the configured wire format.
pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Value, CodecError> {
    match format {
        WireFormat::MsgPack => {
            let mut cursor = std::io::Cursor::new(bytes);
            rmpv::decode::read_value(&mut cursor)
                .map_err(|e| CodecError::MsgPackDecode(e.to_string()))
        }
        WireFormat::Json => serde_json::from_slice(bytes).map_err(CodecError::from),
    }
}
