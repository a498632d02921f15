//! Protection System Specific Header (`pssh` box) handling.
//!
//! Stream key URIs carry the header as the last comma-separated field,
//! base64 encoded. It is either a complete `pssh` box or bare Widevine init
//! data, in which case it is wrapped into a version 0 box.

use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{AmdlError, Result};

/// Widevine system id, `edef8ba9-79d6-4ace-a3c8-27dcd51d21ed`.
pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];

const BOX_TYPE: &[u8; 4] = b"pssh";

/// Header length before the payload: size, type, version/flags, system id.
const FULL_HEADER_LEN: usize = 4 + 4 + 4 + 16;

/// A parsed `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pssh {
    pub version: u8,
    pub flags: u32,
    pub system_id: [u8; 16],
    /// Key ids, version 1 boxes only.
    pub key_ids: Vec<[u8; 16]>,
    pub init_data: Vec<u8>,
}

impl Pssh {
    /// Build from a stream key URI such as `data:text/plain;base64,AAAA…`.
    pub fn from_key_uri(uri: &str) -> Result<Self> {
        let field = uri.rsplit(',').next().unwrap_or(uri).trim();
        let bytes = STANDARD
            .decode(field)
            .map_err(|e| AmdlError::License(format!("protection header is not base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Parse a full box, or wrap bare Widevine init data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= FULL_HEADER_LEN && &bytes[4..8] == BOX_TYPE {
            Self::parse_box(bytes)
        } else if bytes.is_empty() {
            Err(AmdlError::License("protection header is empty".to_string()))
        } else {
            Ok(Self::from_init_data(bytes.to_vec()))
        }
    }

    /// Wrap Widevine init data into a version 0 box.
    pub fn from_init_data(init_data: Vec<u8>) -> Self {
        Self {
            version: 0,
            flags: 0,
            system_id: WIDEVINE_SYSTEM_ID,
            key_ids: Vec::new(),
            init_data,
        }
    }

    fn parse_box(bytes: &[u8]) -> Result<Self> {
        let malformed = |what: &str| AmdlError::License(format!("malformed pssh box: {}", what));
        let mut cursor = Cursor::new(bytes);

        let size = cursor.read_u32::<BigEndian>()? as usize;
        if size != bytes.len() {
            return Err(malformed("size mismatch"));
        }
        cursor.set_position(8);

        let version_flags = cursor.read_u32::<BigEndian>()?;
        let version = (version_flags >> 24) as u8;
        let flags = version_flags & 0x00ff_ffff;
        if version > 1 {
            return Err(malformed("unsupported version"));
        }

        let mut system_id = [0u8; 16];
        cursor.read_exact(&mut system_id)?;

        let mut key_ids = Vec::new();
        if version == 1 {
            let count = cursor.read_u32::<BigEndian>()?;
            for _ in 0..count {
                let mut kid = [0u8; 16];
                cursor.read_exact(&mut kid).map_err(|_| malformed("truncated key ids"))?;
                key_ids.push(kid);
            }
        }

        let data_len = cursor.read_u32::<BigEndian>()? as usize;
        let start = cursor.position() as usize;
        let init_data = bytes
            .get(start..start + data_len)
            .ok_or_else(|| malformed("truncated data"))?
            .to_vec();

        Ok(Self {
            version,
            flags,
            system_id,
            key_ids,
            init_data,
        })
    }

    pub fn is_widevine(&self) -> bool {
        self.system_id == WIDEVINE_SYSTEM_ID
    }

    /// Serialize back into a `pssh` box.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        // writes into a Vec cannot fail
        let _ = body.write_u32::<BigEndian>((u32::from(self.version) << 24) | self.flags);
        body.extend_from_slice(&self.system_id);
        if self.version == 1 {
            let _ = body.write_u32::<BigEndian>(self.key_ids.len() as u32);
            for kid in &self.key_ids {
                body.extend_from_slice(kid);
            }
        }
        let _ = body.write_u32::<BigEndian>(self.init_data.len() as u32);
        body.extend_from_slice(&self.init_data);

        let mut out = Vec::with_capacity(body.len() + 8);
        let _ = out.write_u32::<BigEndian>((body.len() + 8) as u32);
        out.extend_from_slice(BOX_TYPE);
        out.extend_from_slice(&body);
        out
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_init_data_is_wrapped() {
        let init_data = vec![0x08, 0x01, 0x12, 0x10];
        let uri = format!("data:text/plain;base64,{}", STANDARD.encode(&init_data));

        let pssh = Pssh::from_key_uri(&uri).unwrap();
        assert!(pssh.is_widevine());
        assert_eq!(pssh.version, 0);
        assert_eq!(pssh.init_data, init_data);

        let bytes = pssh.to_bytes();
        assert_eq!(bytes.len(), 32 + init_data.len());
        assert_eq!(&bytes[4..8], b"pssh");
    }

    #[test]
    fn test_full_box_is_parsed() {
        let original = Pssh {
            version: 1,
            flags: 0,
            system_id: WIDEVINE_SYSTEM_ID,
            key_ids: vec![[7u8; 16]],
            init_data: b"payload".to_vec(),
        };
        let parsed = Pssh::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_truncated_box_is_rejected() {
        let mut bytes = Pssh::from_init_data(vec![1, 2, 3, 4]).to_bytes();
        bytes.truncate(bytes.len() - 2);
        // size field no longer matches
        assert!(matches!(Pssh::from_bytes(&bytes), Err(AmdlError::License(_))));
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        assert!(Pssh::from_key_uri("data:;base64,@@@").is_err());
        assert!(Pssh::from_key_uri("data:;base64,").is_err());
    }
}
