use std::str::FromStr;

pub use envconfig::Envconfig;
use zenoh_config::{EndPoint, ModeDependentValue, WhatAmI};

/// Connect address used when none is given on the command line.
pub const DEFAULT_CONNECT: &str = "tcp/127.0.0.1:7447";

#[derive(thiserror::Error, Debug)]
pub enum ZenohConfigError {
    #[error("invalid zenoh endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("no zenoh endpoint in `{0}`")]
    EmptyEndpoints(String),
    #[error("cannot apply zenoh option `{0}`")]
    Rejected(&'static str),
    #[error("zenoh open failure: {0}")]
    Open(String),
}

#[derive(Envconfig, Clone, Debug)]
pub struct BroadskyZenohConfig {
    #[envconfig(from = "BROADSKY_ZENOH_MODE", default = "client")]
    pub mode: WhatAmI,

    /// Comma separated listen endpoints. Only useful in peer mode.
    #[envconfig(from = "BROADSKY_ZENOH_LISTEN")]
    pub listen: Option<String>,

    #[envconfig(from = "BROADSKY_ZENOH_SCOUTING_MULTICAST_ENABLED")]
    pub scouting_multicast_enabled: Option<bool>,

    #[envconfig(from = "BROADSKY_ZENOH_BUFFER_SIZE")]
    pub buffer_size: Option<u64>,
}

impl Default for BroadskyZenohConfig {
    fn default() -> Self {
        Self {
            mode: WhatAmI::Client,
            listen: None,
            scouting_multicast_enabled: None,
            buffer_size: None,
        }
    }
}

/// Splits a comma separated endpoint list, skipping blank entries.
pub fn parse_endpoints(list: &str) -> Result<Vec<EndPoint>, ZenohConfigError> {
    let mut endpoints = Vec::new();
    for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let endpoint = EndPoint::from_str(raw).map_err(|e| {
            ZenohConfigError::InvalidEndpoint {
                endpoint: raw.to_string(),
                reason: e.to_string(),
            }
        })?;
        endpoints.push(endpoint);
    }
    if endpoints.is_empty() {
        return Err(ZenohConfigError::EmptyEndpoints(list.to_string()));
    }
    Ok(endpoints)
}

impl BroadskyZenohConfig {
    /// Builds a session config that connects to `connect`, a comma separated
    /// endpoint list such as `tcp/127.0.0.1:7447`.
    pub fn create_zenoh(
        &self,
        connect: &str,
    ) -> Result<zenoh::Config, ZenohConfigError> {
        let mut conf = zenoh::Config::default();
        conf.set_mode(Some(self.mode))
            .map_err(|_| ZenohConfigError::Rejected("mode"))?;

        let mut connect_conf = zenoh_config::ConnectConfig::default();
        connect_conf
            .set_endpoints(ModeDependentValue::Unique(parse_endpoints(
                connect,
            )?))
            .map_err(|_| ZenohConfigError::Rejected("connect.endpoints"))?;
        conf.set_connect(connect_conf)
            .map_err(|_| ZenohConfigError::Rejected("connect"))?;

        if let Some(listen) = &self.listen {
            let mut listen_conf = zenoh_config::ListenConfig::default();
            listen_conf
                .set_endpoints(ModeDependentValue::Unique(parse_endpoints(
                    listen,
                )?))
                .map_err(|_| ZenohConfigError::Rejected("listen.endpoints"))?;
            conf.set_listen(listen_conf)
                .map_err(|_| ZenohConfigError::Rejected("listen"))?;
        }

        conf.scouting
            .multicast
            .set_enabled(self.scouting_multicast_enabled)
            .map_err(|_| ZenohConfigError::Rejected("scouting.multicast"))?;

        if let Some(buffer_size) = self.buffer_size {
            conf.transport
                .link
                .rx
                .set_buffer_size(buffer_size as usize)
                .map_err(|_| {
                    ZenohConfigError::Rejected("transport.link.rx.buffer_size")
                })?;
        }
        Ok(conf)
    }

    pub async fn open(
        &self,
        connect: &str,
    ) -> Result<zenoh::Session, ZenohConfigError> {
        let conf = self.create_zenoh(connect)?;
        tracing::debug!(mode = %self.mode, connect, "opening zenoh session");
        zenoh::open(conf)
            .await
            .map_err(|e| ZenohConfigError::Open(e.to_string()))
    }
}
