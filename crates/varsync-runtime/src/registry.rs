//! Provider directory client
//!
//! The registry lives on the bus; its directory is just another pair of
//! request/response messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use varsync_core::subject::{
    registry_provider_query, registry_providers_changed_event, registry_providers_query,
};
use varsync_core::{ProviderId, VarsyncError, VarsyncResult};
use varsync_transport::Transport;
use varsync_wire::{
    DefinitionSet, ProvidersChangedEvent, ReadDefinitionQuery, ReadDefinitionResponse,
    ReadProvidersQuery, ReadProvidersResponse, WireMessage,
};

/// Queries the registry over an open transport
#[derive(Clone)]
pub struct RegistryClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        RegistryClient { transport, timeout }
    }

    /// Ids of all registered providers, sorted
    pub async fn list_providers(&self) -> VarsyncResult<Vec<ProviderId>> {
        let reply = self
            .transport
            .request(
                &registry_providers_query(),
                ReadProvidersQuery.to_bytes()?,
                self.timeout,
            )
            .await?;
        let mut providers = ReadProvidersResponse::from_bytes(&reply)?.providers;
        providers.sort();
        Ok(providers)
    }

    /// Definition set of one provider as the registry knows it.
    /// A provider the registry does not know is `ProviderUnavailable`.
    pub async fn fetch_definition(&self, provider: &ProviderId) -> VarsyncResult<DefinitionSet> {
        let reply = self
            .transport
            .request(
                &registry_provider_query(provider),
                ReadDefinitionQuery.to_bytes()?,
                self.timeout,
            )
            .await?;
        ReadDefinitionResponse::from_bytes(&reply)?
            .definition
            .ok_or_else(|| VarsyncError::ProviderUnavailable(provider.clone()))
    }

    /// Call `observer` with the full provider list on every registry change
    pub async fn watch_providers<F>(&self, observer: F) -> VarsyncResult<ProviderWatch>
    where
        F: Fn(&[ProviderId]) + Send + Sync + 'static,
    {
        let mut sub = self
            .transport
            .subscribe(&registry_providers_changed_event())
            .await?;

        let task = tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                match ProvidersChangedEvent::from_bytes(&msg.payload) {
                    Ok(event) => {
                        let mut providers = event.providers;
                        providers.sort();
                        observer(&providers);
                    }
                    Err(e) => tracing::warn!(error = %e, "Malformed providers-changed event"),
                }
            }
        });
        Ok(ProviderWatch { task: Some(task) })
    }
}

/// Handle of a running provider watch. Dropping it stops the watch.
pub struct ProviderWatch {
    task: Option<JoinHandle<()>>,
}

impl ProviderWatch {
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ProviderWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
