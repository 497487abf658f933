//! Accessory identification strings sent during the AOA handshake.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("{field} is {len} bytes with NUL, limit is {max}")]
    TooLong {
        field: StringIndex,
        len: usize,
        max: usize,
    },
    #[error("{field} contains an interior NUL byte")]
    InteriorNul { field: StringIndex },
}

/// AOA string slot, in the order the strings are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StringIndex {
    Manufacturer = ACCESSORY_STRING_MANUFACTURER,
    Model = ACCESSORY_STRING_MODEL,
    Description = ACCESSORY_STRING_DESCRIPTION,
    Version = ACCESSORY_STRING_VERSION,
    Uri = ACCESSORY_STRING_URI,
    Serial = ACCESSORY_STRING_SERIAL,
}

impl StringIndex {
    pub const ALL: [StringIndex; 6] = [
        StringIndex::Manufacturer,
        StringIndex::Model,
        StringIndex::Description,
        StringIndex::Version,
        StringIndex::Uri,
        StringIndex::Serial,
    ];

    /// wIndex value of the SendString request.
    pub fn index(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for StringIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringIndex::Manufacturer => write!(f, "manufacturer"),
            StringIndex::Model => write!(f, "model"),
            StringIndex::Description => write!(f, "description"),
            StringIndex::Version => write!(f, "version"),
            StringIndex::Uri => write!(f, "uri"),
            StringIndex::Serial => write!(f, "serial"),
        }
    }
}

/// Identity the host presents to the Android device.
///
/// Fields are validated by [`AccessoryIdentity::validate`]; the Android side
/// uses manufacturer/model/version to pick the application to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryIdentity {
    pub manufacturer: String,
    pub model: String,
    pub description: String,
    pub version: String,
    pub uri: String,
    pub serial: String,
}

impl Default for AccessoryIdentity {
    /// The DemoKit identity, matched by the stock ADK sample application.
    fn default() -> Self {
        Self {
            manufacturer: "Google, Inc.".into(),
            model: "DemoKit".into(),
            description: "DemoKit host driver".into(),
            version: "1.0".into(),
            uri: "http://www.android.com".into(),
            serial: "0000000012345678".into(),
        }
    }
}

impl AccessoryIdentity {
    /// Build and validate an identity.
    pub fn new(
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
        uri: impl Into<String>,
        serial: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            description: description.into(),
            version: version.into(),
            uri: uri.into(),
            serial: serial.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn field(&self, index: StringIndex) -> &str {
        match index {
            StringIndex::Manufacturer => &self.manufacturer,
            StringIndex::Model => &self.model,
            StringIndex::Description => &self.description,
            StringIndex::Version => &self.version,
            StringIndex::Uri => &self.uri,
            StringIndex::Serial => &self.serial,
        }
    }

    /// Check every field fits in one SendString request.
    pub fn validate(&self) -> Result<(), IdentityError> {
        for index in StringIndex::ALL {
            let value = self.field(index);
            if value.as_bytes().contains(&0) {
                return Err(IdentityError::InteriorNul { field: index });
            }
            let len = value.len() + 1;
            if len > MAX_STRING_LEN {
                return Err(IdentityError::TooLong {
                    field: index,
                    len,
                    max: MAX_STRING_LEN,
                });
            }
        }
        Ok(())
    }

    /// SendString payload for `index`: UTF-8 bytes plus terminating NUL.
    pub fn wire_bytes(&self, index: StringIndex) -> Vec<u8> {
        let value = self.field(index);
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        bytes
    }

    /// All six payloads in transmission order.
    pub fn wire_strings(&self) -> impl Iterator<Item = (StringIndex, Vec<u8>)> + '_ {
        StringIndex::ALL
            .into_iter()
            .map(move |index| (index, self.wire_bytes(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_is_valid() {
        assert!(AccessoryIdentity::default().validate().is_ok());
    }

    #[test]
    fn test_wire_bytes_are_nul_terminated() {
        let identity = AccessoryIdentity::default();
        let bytes = identity.wire_bytes(StringIndex::Model);
        assert_eq!(bytes, b"DemoKit\0");
    }

    #[test]
    fn test_wire_strings_order() {
        let identity = AccessoryIdentity::new("m", "o", "d", "v", "u", "s").unwrap();
        let order: Vec<u16> = identity.wire_strings().map(|(i, _)| i.index()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
        let payloads: Vec<Vec<u8>> = identity.wire_strings().map(|(_, b)| b).collect();
        assert_eq!(payloads[5], b"s\0");
    }

    #[test]
    fn test_string_limit() {
        // 255 bytes + NUL fits exactly.
        let fits = "a".repeat(MAX_STRING_LEN - 1);
        assert!(AccessoryIdentity::new(fits, "", "", "", "", "").is_ok());

        let too_long = "a".repeat(MAX_STRING_LEN);
        let err = AccessoryIdentity::new("", "", "", "", too_long, "").unwrap_err();
        assert_eq!(
            err,
            IdentityError::TooLong {
                field: StringIndex::Uri,
                len: MAX_STRING_LEN + 1,
                max: MAX_STRING_LEN,
            }
        );
    }

    #[test]
    fn test_interior_nul_rejected() {
        let err = AccessoryIdentity::new("a\0b", "", "", "", "", "").unwrap_err();
        assert_eq!(
            err,
            IdentityError::InteriorNul {
                field: StringIndex::Manufacturer
            }
        );
    }
}
