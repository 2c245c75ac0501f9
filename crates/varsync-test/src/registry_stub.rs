//! In-process registry
//!
//! Plays the hub's part for tests and demos: collects announced
//! definition sets, validates them, tells each provider the verdict and
//! answers the directory queries.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use varsync_core::subject::{
    registry_provider_event, registry_providers_changed_event, registry_providers_query,
};
use varsync_core::{ProviderId, SubjectKind, ValidationState, VarsyncResult};
use varsync_transport::{MemoryBus, Message, Subscription, Transport};
use varsync_wire::{
    DefinitionChangedEvent, DefinitionSet, ProvidersChangedEvent, ReadDefinitionResponse,
    ReadProvidersResponse, WireMessage,
};

/// Client name the stub connects with
pub const REGISTRY_CLIENT_NAME: &str = "registry";

/// Verdict for an announced set: empty sets and duplicate ids are invalid
pub fn validate(set: &DefinitionSet) -> ValidationState {
    let mut ids = HashSet::new();
    if set.is_empty() || !set.definitions.iter().all(|d| ids.insert(d.id)) {
        ValidationState::Invalid
    } else {
        ValidationState::Ok
    }
}

#[derive(Clone, Copy, Debug)]
enum Route {
    Announcement,
    ProviderList,
    DefinitionLookup,
}

struct StubShared {
    transport: Arc<dyn Transport>,
    table: Mutex<BTreeMap<ProviderId, DefinitionSet>>,
}

impl StubShared {
    fn providers(&self) -> Vec<ProviderId> {
        self.table.lock().keys().cloned().collect()
    }

    async fn handle(&self, route: Route, msg: &Message) -> VarsyncResult<()> {
        match route {
            Route::Announcement => self.on_announcement(msg).await,
            Route::ProviderList => {
                let body = ReadProvidersResponse {
                    providers: self.providers(),
                };
                self.transport.reply(msg, body.to_bytes()?).await
            }
            Route::DefinitionLookup => {
                let definition = SubjectKind::parse(&msg.subject)
                    .and_then(|(provider, _)| self.table.lock().get(&provider).cloned());
                let body = ReadDefinitionResponse { definition };
                self.transport.reply(msg, body.to_bytes()?).await
            }
        }
    }

    async fn on_announcement(&self, msg: &Message) -> VarsyncResult<()> {
        let Some((provider, _)) = SubjectKind::parse(&msg.subject) else {
            return Ok(());
        };
        let event = DefinitionChangedEvent::from_bytes(&msg.payload)?;

        let verdict = match event.definition {
            Some(announced) => {
                // Fingerprint is recomputed, never trusted
                let state = validate(&announced);
                let set = DefinitionSet::new(announced.definitions).with_state(state);
                tracing::info!(
                    provider = %provider,
                    fingerprint = set.fingerprint,
                    state = ?state,
                    "Definition set registered"
                );
                self.table.lock().insert(provider.clone(), set.clone());
                Some(set)
            }
            None => {
                self.table.lock().remove(&provider);
                tracing::info!(provider = %provider, "Provider withdrew its definitions");
                None
            }
        };

        self.notify(&provider, verdict).await?;
        self.publish_providers().await
    }

    async fn notify(&self, provider: &ProviderId, definition: Option<DefinitionSet>) -> VarsyncResult<()> {
        let event = DefinitionChangedEvent { definition };
        self.transport
            .publish(&registry_provider_event(provider), event.to_bytes()?)
            .await
    }

    async fn publish_providers(&self) -> VarsyncResult<()> {
        let event = ProvidersChangedEvent {
            providers: self.providers(),
        };
        self.transport
            .publish(&registry_providers_changed_event(), event.to_bytes()?)
            .await
    }
}

/// Registry answering on one transport
pub struct RegistryStub {
    shared: Arc<StubShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl RegistryStub {
    pub async fn start(transport: Arc<dyn Transport>) -> VarsyncResult<Self> {
        let announcements = transport
            .subscribe(&SubjectKind::DefinitionChanged.wildcard())
            .await?;
        let lists = transport.subscribe(&registry_providers_query()).await?;
        let lookups = transport
            .subscribe(&SubjectKind::RegistryDefinitionQuery.wildcard())
            .await?;

        let shared = Arc::new(StubShared {
            transport,
            table: Mutex::new(BTreeMap::new()),
        });
        let tasks = vec![
            Self::spawn_route(Arc::clone(&shared), announcements, Route::Announcement),
            Self::spawn_route(Arc::clone(&shared), lists, Route::ProviderList),
            Self::spawn_route(Arc::clone(&shared), lookups, Route::DefinitionLookup),
        ];
        tracing::debug!("Registry stub listening");
        Ok(RegistryStub { shared, tasks })
    }

    /// Start on a fresh client of `bus`
    pub async fn on_bus(bus: &MemoryBus) -> VarsyncResult<Self> {
        Self::start(Arc::new(bus.client(REGISTRY_CLIENT_NAME))).await
    }

    fn spawn_route(shared: Arc<StubShared>, mut sub: Subscription, route: Route) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                if let Err(e) = shared.handle(route, &msg).await {
                    tracing::warn!(route = ?route, subject = %msg.subject, error = %e, "Registry stub failed");
                }
            }
        })
    }

    /// Registered providers, sorted
    pub fn providers(&self) -> Vec<ProviderId> {
        self.shared.providers()
    }

    pub fn definition(&self, provider: &ProviderId) -> Option<DefinitionSet> {
        self.shared.table.lock().get(provider).cloned()
    }

    /// Drop a provider and tell it so. Returns whether it was registered.
    pub async fn remove(&self, provider: &ProviderId) -> VarsyncResult<bool> {
        let removed = self.shared.table.lock().remove(provider).is_some();
        if removed {
            self.shared.notify(provider, None).await?;
            self.shared.publish_providers().await?;
        }
        Ok(removed)
    }

    pub async fn stop(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            task.abort();
            let _ = task.await;
        }
        self.shared.transport.close().await;
    }
}

impl Drop for RegistryStub {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
