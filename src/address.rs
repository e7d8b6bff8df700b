//! Peer device address.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AudioError;

/// A Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
   pub const fn new(bytes: [u8; 6]) -> Self {
      Self(bytes)
   }

   pub const fn any() -> Self {
      Self([0; 6])
   }

   pub const fn as_bytes(&self) -> &[u8; 6] {
      &self.0
   }
}

impl From<[u8; 6]> for Address {
   fn from(bytes: [u8; 6]) -> Self {
      Self(bytes)
   }
}

impl fmt::Display for Address {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let [a, b, c, d, e, g] = self.0;
      write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
   }
}

impl FromStr for Address {
   type Err = AudioError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      let mut bytes = [0u8; 6];
      let mut parts = s.split(':');
      for byte in &mut bytes {
         let part = parts
            .next()
            .ok_or(AudioError::InvalidArgument("address too short"))?;
         if part.len() != 2 {
            return Err(AudioError::InvalidArgument("malformed address octet"));
         }
         let mut raw = [0u8; 1];
         hex::decode_to_slice(part, &mut raw)
            .map_err(|_| AudioError::InvalidArgument("malformed address octet"))?;
         *byte = raw[0];
      }
      if parts.next().is_some() {
         return Err(AudioError::InvalidArgument("address too long"));
      }
      Ok(Self(bytes))
   }
}

impl Serialize for Address {
   fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.collect_str(self)
   }
}

impl<'de> Deserialize<'de> for Address {
   fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
      let s = String::deserialize(deserializer)?;
      s.parse().map_err(serde::de::Error::custom)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_display_and_parse() {
      let addr = Address::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
      assert_eq!(addr.to_string(), "00:1A:7D:DA:71:13");
      assert_eq!("00:1a:7d:da:71:13".parse::<Address>().unwrap(), addr);
   }

   #[test]
   fn test_parse_rejects_garbage() {
      assert!("00:11:22:33:44".parse::<Address>().is_err());
      assert!("00:11:22:33:44:55:66".parse::<Address>().is_err());
      assert!("00:11:22:33:44:5G".parse::<Address>().is_err());
      assert!("001:1:22:33:44:55".parse::<Address>().is_err());
   }

   #[test]
   fn test_serde_as_string() {
      let addr = Address::new([1, 2, 3, 4, 5, 6]);
      let json = serde_json::to_string(&addr).unwrap();
      assert_eq!(json, "\"01:02:03:04:05:06\"");
      let back: Address = serde_json::from_str(&json).unwrap();
      assert_eq!(back, addr);
   }
}
