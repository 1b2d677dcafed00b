use std::sync::Arc;

use appdsn_models::ConnectionCategory;
use tokio::task::JoinSet;

use crate::dialer::Dialer;
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::store::RecordSource;

/// Outcome of one eager-bootstrap batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub total: usize,
    pub connected: usize,
    pub failed: usize,
}

/// Eagerly connects every tenant known to the registry store.
///
/// The initial `fetch_all` is a single point of failure: when it errors,
/// nothing is attempted and the whole batch aborts. After it succeeds, each
/// tenant connects in its own task; a tenant that fails or panics is logged
/// and counted without affecting any other tenant. The registry serves lazy
/// requests the whole time, so callers need not wait for the batch.
pub struct Bootstrapper<S: RecordSource, D: Dialer> {
    registry: Arc<ConnectionRegistry<S, D>>,
}

impl<S: RecordSource, D: Dialer> Bootstrapper<S, D> {
    pub fn new(registry: Arc<ConnectionRegistry<S, D>>) -> Self {
        Self { registry }
    }

    pub async fn run(&self) -> Result<BootstrapReport> {
        let records = self.registry.source().fetch_all().await?;
        let total = records.len();
        tracing::info!("bootstrap: connecting {} tenant(s)", total);

        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();
        for record in records {
            let registry = self.registry.clone();
            tasks.spawn(async move {
                let outcome = registry
                    .get(&record.app_key, ConnectionCategory::All)
                    .await
                    .map(|_| ());
                (record.app_key, outcome)
            });
        }

        let mut connected = 0usize;
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => connected += 1,
                Ok((app_key, Err(err))) => {
                    failed += 1;
                    tracing::warn!("bootstrap: tenant {} failed to connect: {}", app_key, err);
                }
                // a panicking tenant task lands here as a structured error
                Err(join_err) => {
                    failed += 1;
                    tracing::error!("bootstrap: tenant task aborted: {}", join_err);
                }
            }
        }

        tracing::info!(
            "bootstrap: finished, {} connected, {} failed out of {}",
            connected,
            failed,
            total
        );
        Ok(BootstrapReport {
            total,
            connected,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::error::RegistryError;
    use crate::testing::{MemDialer, MemSource};
    use std::time::Duration;

    fn registry_with(
        records: &[(&str, &str)],
    ) -> Arc<ConnectionRegistry<MemSource, MemDialer>> {
        let source = MemSource::new();
        for (key, primary) in records {
            source.insert(MemSource::record(key, primary, ""));
        }
        let config = RegistryConfig::default()
            .with_inflight_wait(Duration::from_millis(10))
            .with_connect_deadline(Duration::from_secs(2));
        Arc::new(ConnectionRegistry::new(source, MemDialer::new(), config))
    }

    #[tokio::test]
    async fn test_bulk_init_connects_everyone() {
        let registry = registry_with(&[("A1", "dsn1"), ("A2", "dsn2"), ("A3", "dsn3")]);
        let report = Bootstrapper::new(registry.clone()).run().await.unwrap();

        assert_eq!(
            report,
            BootstrapReport {
                total: 3,
                connected: 3,
                failed: 0
            }
        );
        for key in ["A1", "A2", "A3"] {
            assert!(registry.check_loaded(key));
        }
    }

    #[tokio::test]
    async fn test_one_bad_tenant_does_not_block_others() {
        let registry = registry_with(&[("A1", "dsn1"), ("A2", "dsn2"), ("A3", "dsn3")]);
        registry.dialer().fail_tenant("A2");

        let report = Bootstrapper::new(registry.clone()).run().await.unwrap();
        assert_eq!(report.connected, 2);
        assert_eq!(report.failed, 1);
        assert!(registry.check_loaded("A1"));
        assert!(!registry.check_loaded("A2"));
        assert!(registry.check_loaded("A3"));
    }

    #[tokio::test]
    async fn test_panicking_tenant_is_contained() {
        let registry = registry_with(&[("A1", "dsn1"), ("A2", "dsn2")]);
        registry.dialer().panic_tenant("A1");

        let report = Bootstrapper::new(registry.clone()).run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.connected, 1);
        assert!(registry.check_loaded("A2"));
        assert_eq!(
            registry.stats().inflight,
            0,
            "in-flight markers must be released even on panic"
        );
    }

    #[tokio::test]
    async fn test_fetch_all_failure_aborts_whole_batch() {
        let registry = registry_with(&[("A1", "dsn1")]);
        registry.source().fail_everything();

        let result = Bootstrapper::new(registry.clone()).run().await;
        assert!(matches!(result, Err(RegistryError::Store(_))));
        assert!(!registry.check_loaded("A1"));
    }
}
