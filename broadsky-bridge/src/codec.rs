use std::{convert::Infallible, fmt::Display, str::FromStr};

use serde::Serialize;

use crate::error::BridgeError;

/// Payload format used when publishing to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Cbor,
    Json,
}

impl Codec {
    pub fn encode<T>(&self, event: &T) -> Result<Vec<u8>, BridgeError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Codec::Json => Ok(serde_json::to_vec(event)?),
            Codec::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(event, &mut buf)?;
                Ok(buf)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Cbor => "cbor",
            Codec::Json => "json",
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything other than `json` falls back to cbor.
impl FromStr for Codec {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("json") {
            Ok(Codec::Json)
        } else {
            Ok(Codec::Cbor)
        }
    }
}
