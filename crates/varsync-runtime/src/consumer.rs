//! Consumer agent
//!
//! Keeps a read-only replica of one provider's variables. Snapshots are
//! answers to the caller; only broadcasts received on the standing
//! subscription fire change observers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use varsync_core::subject::{read_variables_query, vars_changed_event, write_variables_command};
use varsync_core::{
    ProviderId, Quality, Timestamp, Value, VariableId, VariableState, VarsyncError, VarsyncResult,
};
use varsync_state::Replica;
use varsync_transport::{Connector, CredentialProvider, Subscription, Transport};
use varsync_wire::{
    DefinitionSet, EncodedValue, ReadVariablesQuery, ReadVariablesResponse, VariableBatch,
    VariableEntry, VariablesChangedEvent, WireMessage, WriteVariablesCommand,
};

use crate::config::ConsumerConfig;
use crate::registry::RegistryClient;

/// Change observer; receives every state touched by one broadcast
pub type ChangeObserver = Arc<dyn Fn(&[VariableState]) + Send + Sync>;

struct ConsumerShared {
    provider_id: ProviderId,
    replica: Mutex<Replica>,
    observers: Mutex<Vec<ChangeObserver>>,
    definitions: Mutex<Option<DefinitionSet>>,
}

impl ConsumerShared {
    /// Drop cached definitions that no longer match what the provider sends
    fn check_fingerprint(&self, fingerprint: u64) {
        if fingerprint == 0 {
            return;
        }
        let mut cached = self.definitions.lock();
        if let Some(defs) = cached.as_ref() {
            if defs.fingerprint != fingerprint {
                tracing::info!(
                    provider = %self.provider_id,
                    cached = defs.fingerprint,
                    received = fingerprint,
                    "Definition set changed, dropping cached definitions"
                );
                *cached = None;
            }
        }
    }

    fn merge(&self, batch: &VariableBatch) -> Vec<VariableState> {
        self.check_fingerprint(batch.reference_fingerprint);
        self.replica.lock().merge(batch)
    }

    fn on_broadcast(&self, batch: &VariableBatch) {
        let changed = self.merge(batch);
        if changed.is_empty() {
            return;
        }
        // Observers may register further observers
        let observers: Vec<ChangeObserver> = self.observers.lock().clone();
        for observer in observers {
            observer(&changed);
        }
    }
}

struct ConsumerSession {
    transport: Arc<dyn Transport>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Follows one provider over the bus
pub struct ConsumerAgent {
    config: ConsumerConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<ConsumerShared>,
    session: Mutex<Option<ConsumerSession>>,
}

impl ConsumerAgent {
    pub fn new(
        config: ConsumerConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let shared = Arc::new(ConsumerShared {
            provider_id: config.provider_id.clone(),
            replica: Mutex::new(Replica::new()),
            observers: Mutex::new(Vec::new()),
            definitions: Mutex::new(None),
        });
        ConsumerAgent {
            config,
            connector,
            credentials,
            shared,
            session: Mutex::new(None),
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.shared.provider_id
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Register an observer. Observers run in registration order on the
    /// subscription task and must not block.
    pub fn on_change<F>(&self, observer: F)
    where
        F: Fn(&[VariableState]) + Send + Sync + 'static,
    {
        self.shared.observers.lock().push(Arc::new(observer));
    }

    /// Authenticate, connect and subscribe to the provider's broadcasts
    pub async fn start(&self) -> VarsyncResult<()> {
        if self.is_running() {
            return Err(VarsyncError::AlreadyStarted);
        }

        let token = self.credentials.fetch_token(&self.config.oauth).await?;
        let transport = self
            .connector
            .connect(&self.config.connection, &token)
            .await?;
        let sub = match transport
            .subscribe(&vars_changed_event(&self.shared.provider_id))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let (shutdown, rx) = watch::channel(false);
        let task = self.spawn_subscription(sub, rx);

        let previous = self.session.lock().replace(ConsumerSession {
            transport,
            shutdown,
            task,
        });
        if let Some(raced) = previous {
            // Another start() won; keep its session
            let ours = self.session.lock().replace(raced);
            if let Some(ours) = ours {
                Self::shutdown_session(ours).await;
            }
            return Err(VarsyncError::AlreadyStarted);
        }

        tracing::info!(provider = %self.shared.provider_id, "Consumer subscribed");
        Ok(())
    }

    fn spawn_subscription(
        &self,
        mut sub: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    msg = sub.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                match VariablesChangedEvent::from_bytes(&msg.payload) {
                    Ok(event) => shared.on_broadcast(&event.changed),
                    Err(e) => tracing::warn!(
                        provider = %shared.provider_id,
                        error = %e,
                        "Malformed variables-changed event"
                    ),
                }
            }
        })
    }

    fn transport(&self) -> VarsyncResult<Arc<dyn Transport>> {
        self.session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.transport))
            .ok_or(VarsyncError::NotStarted)
    }

    /// Fetch every variable. The answer is merged into the replica and
    /// returned; observers are not called.
    pub async fn request_snapshot(&self) -> VarsyncResult<Vec<VariableState>> {
        self.read(ReadVariablesQuery::all()).await
    }

    /// Fetch selected variables; unknown ids are left out of the answer
    pub async fn request_variables(&self, ids: &[VariableId]) -> VarsyncResult<Vec<VariableState>> {
        self.read(ReadVariablesQuery::only(ids.iter().copied())).await
    }

    async fn read(&self, query: ReadVariablesQuery) -> VarsyncResult<Vec<VariableState>> {
        let transport = self.transport()?;
        let provider = &self.shared.provider_id;
        let reply = transport
            .request(
                &read_variables_query(provider),
                query.to_bytes()?,
                self.config.request_timeout,
            )
            .await
            .map_err(|e| match e {
                VarsyncError::NoResponders(_) => VarsyncError::ProviderUnavailable(provider.clone()),
                other => other,
            })?;
        let response = ReadVariablesResponse::from_bytes(&reply)?;
        Ok(self.shared.merge(&response.variables))
    }

    /// Current replica, ordered by id
    pub fn states(&self) -> Vec<VariableState> {
        self.shared.replica.lock().snapshot()
    }

    pub fn get(&self, id: VariableId) -> Option<VariableState> {
        self.shared.replica.lock().get(id).cloned()
    }

    /// Fetch the provider's definitions from the registry and cache them
    pub async fn load_definitions(&self) -> VarsyncResult<DefinitionSet> {
        let registry = RegistryClient::new(self.transport()?, self.config.request_timeout);
        let definitions = registry.fetch_definition(&self.shared.provider_id).await?;
        tracing::debug!(
            provider = %self.shared.provider_id,
            fingerprint = definitions.fingerprint,
            count = definitions.len(),
            "Definitions cached"
        );
        *self.shared.definitions.lock() = Some(definitions.clone());
        Ok(definitions)
    }

    /// Cached definitions, if loaded and still current
    pub fn definitions(&self) -> Option<DefinitionSet> {
        self.shared.definitions.lock().clone()
    }

    /// Id of a dotted key, from the cached definitions
    pub fn resolve_key(&self, key: &str) -> Option<VariableId> {
        self.shared
            .definitions
            .lock()
            .as_ref()
            .and_then(|defs| defs.by_key(key))
            .map(|d| d.id)
    }

    /// Send a write command.
    ///
    /// With cached definitions every entry is checked first (known id,
    /// writable, matching type); any failure refuses the whole write and
    /// nothing is sent. Without a cache the values go out with their own
    /// types and the provider decides.
    pub async fn write(&self, entries: Vec<(VariableId, Value)>) -> VarsyncResult<()> {
        let transport = self.transport()?;
        let cached = self.definitions();

        let fingerprint = cached.as_ref().map_or(0, |d| d.fingerprint);
        let mut batch = VariableBatch::new(fingerprint, Timestamp::now());
        for (id, value) in entries {
            let encoded = match &cached {
                Some(defs) => {
                    let def = defs.get(id).ok_or(VarsyncError::UnknownVariableId(id))?;
                    if !def.is_writable() {
                        return Err(VarsyncError::PermissionDenied(id));
                    }
                    EncodedValue::encode(def.data_type, &value)?
                }
                None => EncodedValue::from_value(&value),
            };
            batch.push(VariableEntry::new(id, encoded, Quality::Good));
        }

        tracing::debug!(provider = %self.shared.provider_id, count = batch.len(), "Sending write command");
        transport
            .publish(
                &write_variables_command(&self.shared.provider_id),
                WriteVariablesCommand { variables: batch }.to_bytes()?,
            )
            .await
    }

    /// Write a textual value to a dotted key, loading definitions if needed
    pub async fn write_text(&self, key: &str, text: &str) -> VarsyncResult<()> {
        let defs = match self.definitions() {
            Some(defs) => defs,
            None => self.load_definitions().await?,
        };
        let def = defs
            .by_key(key)
            .ok_or_else(|| VarsyncError::Config(format!("Unknown variable key {:?}", key)))?;
        let value = Value::parse(def.data_type, text)?;
        self.write(vec![(def.id, value)]).await
    }

    async fn shutdown_session(session: ConsumerSession) {
        let _ = session.shutdown.send(true);
        if let Err(e) = session.task.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "Consumer task failed");
            }
        }
        session.transport.close().await;
    }

    /// Unsubscribe and disconnect. Idempotent.
    pub async fn stop(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            Self::shutdown_session(session).await;
            tracing::info!(provider = %self.shared.provider_id, "Consumer stopped");
        }
    }
}
