use appdsn_database::dialer::Dialer;
use appdsn_database::store::RecordSource;
use appdsn_models::ChangeEvent;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio_util::sync::CancellationToken;

use crate::error::{BusError, Result};
use crate::reconcile::Reconciler;

/// Broker settings for one logical invalidation channel. Deployments run two
/// of these, one for relational tenants and one for document-store tenants.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub channel: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            channel: "appdsn:changes".to_string(),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| Self::default().url),
            channel: std::env::var("REGISTRY_CHANNEL").unwrap_or_else(|_| Self::default().channel),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// Publishes tenant change events for every subscriber process.
#[derive(Clone)]
pub struct Publisher {
    manager: ConnectionManager,
    channel: String,
}

impl Publisher {
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            channel: config.channel.clone(),
        })
    }

    pub async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        tracing::debug!("published {:?} for tenant {}", event.kind, event.app_key);
        Ok(())
    }
}

pub(crate) fn decode_event(payload: &str) -> Result<ChangeEvent> {
    Ok(serde_json::from_str(payload)?)
}

/// The single long-lived consumer of one invalidation channel.
///
/// Runs until the cancellation token fires or the broker drops the
/// subscription. A message that fails to decode is logged and skipped; the
/// loop never terminates on bad input.
pub struct Subscriber<S: RecordSource, D: Dialer> {
    config: BusConfig,
    reconciler: Reconciler<S, D>,
}

impl<S: RecordSource, D: Dialer> Subscriber<S, D> {
    pub fn new(config: BusConfig, reconciler: Reconciler<S, D>) -> Self {
        Self { config, reconciler }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let client = Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&self.config.channel).await?;
        tracing::info!("subscribed to invalidation channel {}", self.config.channel);

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("invalidation consumer shutting down");
                    return Ok(());
                }
                message = messages.next() => {
                    let Some(message) = message else {
                        tracing::error!(
                            "invalidation channel {} closed by broker",
                            self.config.channel
                        );
                        return Err(BusError::StreamClosed);
                    };
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::warn!("dropping unreadable bus message: {}", err);
                            continue;
                        }
                    };
                    match decode_event(&payload) {
                        Ok(event) => self.reconciler.apply(&event).await,
                        Err(err) => {
                            tracing::warn!(
                                "dropping malformed bus message {:?}: {}",
                                payload,
                                err
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appdsn_models::ChangeKind;

    #[test]
    fn test_decode_wire_payload() {
        let event = decode_event(r#"{"AppKey":"A1","Category":1}"#).unwrap();
        assert_eq!(event.app_key, "A1");
        assert_eq!(event.kind, ChangeKind::Added);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_event("not json").is_err());
        assert!(decode_event(r#"{"AppKey":"A1","Category":99}"#).is_err());
    }

    #[tokio::test]
    #[ignore] // Only run with Redis available
    async fn test_publish_roundtrip() {
        let config = BusConfig::from_env().with_channel("appdsn:test");
        let publisher = Publisher::connect(&config)
            .await
            .expect("Failed to connect to Redis");
        publisher
            .publish(&ChangeEvent::new("A1", ChangeKind::Updated))
            .await
            .expect("Failed to publish");
    }
}
