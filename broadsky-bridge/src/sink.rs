use std::sync::Arc;

use broadsky_zenoh::BroadskyZenohConfig;
use tracing::info;

use crate::error::BridgeError;

/// Downstream bus the dispatcher publishes encoded events to.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<(), BridgeError>;

    /// Flushes and releases the connection.
    async fn close(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<(), BridgeError> {
        (**self).publish(subject, payload).await
    }

    async fn close(&self) -> Result<(), BridgeError> {
        (**self).close().await
    }
}

pub struct ZenohSink {
    session: zenoh::Session,
}

impl ZenohSink {
    pub async fn connect(
        target: &str,
        z_conf: &BroadskyZenohConfig,
    ) -> Result<Self, BridgeError> {
        info!("dialing zenoh target: {target}");
        let session = z_conf.open(target).await?;
        Ok(Self { session })
    }
}

#[async_trait::async_trait]
impl EventSink for ZenohSink {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<(), BridgeError> {
        self.session.put(subject, payload).await.map_err(|e| {
            BridgeError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.session.close().await.map_err(|e| BridgeError::Close {
            target: "zenoh".into(),
            reason: e.to_string(),
        })
    }
}
