use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use lazy_static::lazy_static;
use rand::prelude::*;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

/// An email identifier: 8 bytes of process start time (milliseconds),
/// 8 random bytes, and a 4-byte per-process sequence number. Unique
/// across concurrently running importers without any coordination, and
/// opaque to clients (hex on the wire).
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct EmailId(pub [u8; 20]);

struct IdGenerator {
    prefix: [u8; 16],
    seq: AtomicU32,
}

impl IdGenerator {
    fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        let noise = thread_rng().gen::<u64>();
        let mut prefix = [0u8; 16];
        prefix[..8].copy_from_slice(&now.to_be_bytes());
        prefix[8..].copy_from_slice(&noise.to_be_bytes());
        Self {
            prefix,
            seq: AtomicU32::new(0),
        }
    }

    fn gen(&self) -> EmailId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut raw = [0u8; 20];
        raw[..16].copy_from_slice(&self.prefix);
        raw[16..].copy_from_slice(&seq.to_be_bytes());
        EmailId(raw)
    }
}

lazy_static! {
    static ref GENERATOR: IdGenerator = IdGenerator::new();
}

pub fn gen_email_id() -> EmailId {
    GENERATOR.gen()
}

impl fmt::Display for EmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for EmailId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<EmailId, &'static str> {
        let bytes = hex::decode(s).map_err(|_| "invalid hex")?;
        if bytes.len() != 20 {
            return Err("bad length");
        }
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&bytes);
        Ok(EmailId(raw))
    }
}

impl<'de> Deserialize<'de> for EmailId {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = String::deserialize(d)?;
        EmailId::from_str(&v).map_err(D::Error::custom)
    }
}

impl Serialize for EmailId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_roundtrip() {
        let a = gen_email_id();
        let b = gen_email_id();
        assert_ne!(a, b);
        assert!(b > a);

        let text = a.to_string();
        assert_eq!(text.len(), 40);
        assert_eq!(text.parse::<EmailId>().unwrap(), a);
        assert!("zz".parse::<EmailId>().is_err());
        assert!("abcd".parse::<EmailId>().is_err());
    }
}
