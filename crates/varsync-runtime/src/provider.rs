//! Provider agent
//!
//! Lifecycle: `Disconnected → Registering → Serving`, terminal `Stopped`.
//!
//! While serving, three handler tasks (registry notifications, read
//! queries, write commands) and the broadcast loop run concurrently
//! against one [`LiveStateMap`]. The map sits behind a mutex that is never
//! held across an await.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use varsync_core::subject::{
    provider_definition_changed_event, read_variables_query, registry_provider_event,
    vars_changed_event, write_variables_command,
};
use varsync_core::{
    ProviderId, Quality, Timestamp, ValidationState, Value, VariableId, VariableState,
    VarsyncError, VarsyncResult,
};
use varsync_state::{LiveStateMap, WriteReport};
use varsync_transport::{Connector, CredentialProvider, Message, Subscription, Transport};
use varsync_wire::{
    DefinitionChangedEvent, DefinitionSet, ReadVariablesQuery, ReadVariablesResponse,
    VariablesChangedEvent, WireMessage, WriteVariablesCommand,
};

use crate::config::ProviderConfig;
use crate::source::ValueSource;

/// Provider lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderPhase {
    Disconnected,
    Registering,
    Serving,
    Stopped,
}

/// Counters for one provider session
#[derive(Clone, Debug, Default)]
pub struct ProviderStats {
    pub broadcasts: u64,
    pub broadcast_failures: u64,
    pub reads_served: u64,
    pub write_commands: u64,
    pub entries_written: u64,
    pub entries_rejected: u64,
}

/// State shared between the agent and its tasks
struct ProviderShared {
    provider_id: ProviderId,
    state: Mutex<LiveStateMap>,
    source: Mutex<Box<dyn ValueSource>>,
    stats: Mutex<ProviderStats>,
    validation: watch::Sender<ValidationState>,
    enforce_write_access: bool,
    broadcast_after_write: bool,
}

impl ProviderShared {
    fn initialize(&self) {
        let mut state = self.state.lock();
        let definitions = state.definitions().definitions.clone();
        let initial = self.source.lock().initial_states(&definitions);
        state.replace_states(initial);
    }

    fn advance(&self) {
        let mut state = self.state.lock();
        let definitions = state.definitions().definitions.clone();
        let previous = state.states();
        let next = self.source.lock().advance(&definitions, &previous);
        state.replace_states(next);
    }

    async fn broadcast(&self, transport: &dyn Transport) -> VarsyncResult<()> {
        let event = VariablesChangedEvent {
            changed: self.state.lock().to_batch(None),
        };
        let result = transport
            .publish(&vars_changed_event(&self.provider_id), event.to_bytes()?)
            .await;

        let mut stats = self.stats.lock();
        match result {
            Ok(()) => stats.broadcasts += 1,
            Err(_) => stats.broadcast_failures += 1,
        }
        result
    }

    async fn handle_read(&self, transport: &dyn Transport, msg: &Message) -> VarsyncResult<()> {
        let query = ReadVariablesQuery::from_bytes(&msg.payload)?;
        let response = ReadVariablesResponse {
            variables: self.state.lock().to_batch(query.ids.as_deref()),
        };
        tracing::debug!(
            provider = %self.provider_id,
            count = response.variables.len(),
            filtered = query.ids.is_some(),
            "Answering read query"
        );
        transport.reply(msg, response.to_bytes()?).await?;
        self.stats.lock().reads_served += 1;
        Ok(())
    }

    async fn handle_write(&self, transport: &dyn Transport, msg: &Message) -> VarsyncResult<()> {
        let command = WriteVariablesCommand::from_bytes(&msg.payload)?;
        let batch = command.variables;

        let report = {
            let mut state = self.state.lock();
            if batch.reference_fingerprint != 0 && batch.reference_fingerprint != state.fingerprint() {
                tracing::debug!(
                    provider = %self.provider_id,
                    fingerprint = batch.reference_fingerprint,
                    "Write refers to another definition set"
                );
            }
            state.apply_write(&batch, self.enforce_write_access, Timestamp::now())
        };
        self.record_write(&report);

        if self.broadcast_after_write {
            self.broadcast(transport).await?;
        }
        Ok(())
    }

    fn record_write(&self, report: &WriteReport) {
        for (id, fault) in report.rejected() {
            tracing::warn!(provider = %self.provider_id, id = %id, error = %fault, "Write rejected");
        }
        tracing::debug!(
            provider = %self.provider_id,
            applied = report.applied.len(),
            faults = report.faults.len(),
            "Write command applied"
        );

        let mut stats = self.stats.lock();
        stats.write_commands += 1;
        stats.entries_written += report.applied.len() as u64;
        stats.entries_rejected += report.rejected().count() as u64;
    }

    fn handle_registry(&self, msg: &Message) -> VarsyncResult<()> {
        let event = DefinitionChangedEvent::from_bytes(&msg.payload)?;
        let Some(definition) = event.definition else {
            tracing::warn!(provider = %self.provider_id, "Registry reports provider removed");
            return Ok(());
        };

        let mut state = self.state.lock();
        if definition.fingerprint != state.fingerprint() {
            tracing::warn!(
                provider = %self.provider_id,
                expected = state.fingerprint(),
                actual = definition.fingerprint,
                "Registry validated a different definition set"
            );
        }
        state.set_validation_state(definition.validation_state);
        drop(state);

        self.validation.send_replace(definition.validation_state);
        tracing::info!(
            provider = %self.provider_id,
            state = ?definition.validation_state,
            "Registry validation state"
        );
        Ok(())
    }
}

/// Resources of a serving provider
struct ProviderSession {
    transport: Arc<dyn Transport>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns a definition set and its live values on the bus
pub struct ProviderAgent {
    config: ProviderConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<ProviderShared>,
    phase: Mutex<ProviderPhase>,
    session: Mutex<Option<ProviderSession>>,
}

impl ProviderAgent {
    pub fn new(
        config: ProviderConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        source: Box<dyn ValueSource>,
    ) -> Self {
        let definitions = DefinitionSet::new(config.variables.clone());
        let (validation, _) = watch::channel(ValidationState::Unspecified);
        let shared = Arc::new(ProviderShared {
            provider_id: config.provider_id.clone(),
            state: Mutex::new(LiveStateMap::new(definitions)),
            source: Mutex::new(source),
            stats: Mutex::new(ProviderStats::default()),
            validation,
            enforce_write_access: config.enforce_write_access,
            broadcast_after_write: config.broadcast_after_write,
        });

        ProviderAgent {
            config,
            connector,
            credentials,
            shared,
            phase: Mutex::new(ProviderPhase::Disconnected),
            session: Mutex::new(None),
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.shared.provider_id
    }

    pub fn phase(&self) -> ProviderPhase {
        *self.phase.lock()
    }

    pub fn fingerprint(&self) -> u64 {
        self.shared.state.lock().fingerprint()
    }

    pub fn definitions(&self) -> DefinitionSet {
        self.shared.state.lock().definitions().clone()
    }

    /// Last validation state reported by the registry
    pub fn validation_state(&self) -> ValidationState {
        self.shared.state.lock().validation_state()
    }

    /// Follow validation state changes
    pub fn watch_validation(&self) -> watch::Receiver<ValidationState> {
        self.shared.validation.subscribe()
    }

    /// Current states in definition order
    pub fn states(&self) -> Vec<VariableState> {
        self.shared.state.lock().states()
    }

    pub fn stats(&self) -> ProviderStats {
        self.shared.stats.lock().clone()
    }

    /// Set a value locally. It goes out with the next broadcast.
    pub fn set_value(&self, id: VariableId, value: Value) -> VarsyncResult<()> {
        self.shared
            .state
            .lock()
            .set_value(id, value, Quality::Good, Timestamp::now())
    }

    /// Connect, subscribe, announce the definition set and start
    /// broadcasting. On failure the agent is left `Disconnected`.
    pub async fn start(&self) -> VarsyncResult<()> {
        {
            let mut phase = self.phase.lock();
            match *phase {
                ProviderPhase::Disconnected => *phase = ProviderPhase::Registering,
                ProviderPhase::Stopped => {
                    return Err(VarsyncError::InvalidTransition(
                        "A stopped provider cannot be restarted".into(),
                    ))
                }
                _ => return Err(VarsyncError::AlreadyStarted),
            }
        }

        match self.connect_and_serve().await {
            Ok(session) => {
                let stopped = {
                    let mut phase = self.phase.lock();
                    if *phase == ProviderPhase::Stopped {
                        Some(session)
                    } else {
                        *self.session.lock() = Some(session);
                        *phase = ProviderPhase::Serving;
                        None
                    }
                };
                if let Some(session) = stopped {
                    self.shutdown_session(session).await;
                    return Err(VarsyncError::InvalidTransition(
                        "Provider was stopped while starting".into(),
                    ));
                }
                tracing::info!(
                    provider = %self.shared.provider_id,
                    fingerprint = self.fingerprint(),
                    interval_ms = self.config.publish_interval.as_millis() as u64,
                    "Provider serving"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(provider = %self.shared.provider_id, error = %e, "Provider start failed");
                let mut phase = self.phase.lock();
                if *phase == ProviderPhase::Registering {
                    *phase = ProviderPhase::Disconnected;
                }
                Err(e)
            }
        }
    }

    async fn connect_and_serve(&self) -> VarsyncResult<ProviderSession> {
        self.config.validate()?;
        let token = self.credentials.fetch_token(&self.config.oauth).await?;
        let transport = self
            .connector
            .connect(&self.config.connection, &token)
            .await?;

        match self.serve(Arc::clone(&transport)).await {
            Ok(session) => Ok(session),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn serve(&self, transport: Arc<dyn Transport>) -> VarsyncResult<ProviderSession> {
        let id = &self.shared.provider_id;
        let registry = transport.subscribe(&registry_provider_event(id)).await?;
        let reads = transport.subscribe(&read_variables_query(id)).await?;
        let writes = transport.subscribe(&write_variables_command(id)).await?;
        tracing::debug!(provider = %id, "Provider subscriptions active");

        self.shared.initialize();

        let announcement = DefinitionChangedEvent {
            definition: Some(self.definitions()),
        };
        transport
            .publish(&provider_definition_changed_event(id), announcement.to_bytes()?)
            .await?;
        tracing::info!(
            provider = %id,
            variables = self.shared.state.lock().len(),
            "Definition set announced"
        );

        let (shutdown, _) = watch::channel(false);
        let tasks = vec![
            self.spawn_handler(Arc::clone(&transport), registry, shutdown.subscribe(), Handler::Registry),
            self.spawn_handler(Arc::clone(&transport), reads, shutdown.subscribe(), Handler::Read),
            self.spawn_handler(Arc::clone(&transport), writes, shutdown.subscribe(), Handler::Write),
            self.spawn_broadcast_loop(Arc::clone(&transport), shutdown.subscribe()),
        ];

        Ok(ProviderSession {
            transport,
            shutdown,
            tasks,
        })
    }

    fn spawn_handler(
        &self,
        transport: Arc<dyn Transport>,
        mut sub: Subscription,
        mut shutdown: watch::Receiver<bool>,
        handler: Handler,
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

                let result = match handler {
                    Handler::Registry => shared.handle_registry(&msg),
                    Handler::Read => shared.handle_read(transport.as_ref(), &msg).await,
                    Handler::Write => shared.handle_write(transport.as_ref(), &msg).await,
                };
                if let Err(e) = result {
                    tracing::warn!(
                        provider = %shared.provider_id,
                        subject = %msg.subject,
                        error = %e,
                        "Message handling failed"
                    );
                }
            }
        })
    }

    fn spawn_broadcast_loop(
        &self,
        transport: Arc<dyn Transport>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let interval = self.config.publish_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        shared.advance();
                        if let Err(e) = shared.broadcast(transport.as_ref()).await {
                            tracing::warn!(provider = %shared.provider_id, error = %e, "Broadcast failed");
                        }
                    }
                }
            }
            tracing::debug!(provider = %shared.provider_id, "Broadcast loop finished");
        })
    }

    /// Publish the full state now, outside the timer
    pub async fn broadcast_now(&self) -> VarsyncResult<()> {
        let transport = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.transport))
            .ok_or(VarsyncError::NotStarted)?;
        self.shared.broadcast(transport.as_ref()).await
    }

    /// Stop all tasks, wait for them, then disconnect. Idempotent; safe
    /// without a prior `start()`. A stopped provider stays stopped.
    pub async fn stop(&self) {
        // Phase before session, as in start()
        let session = {
            let mut phase = self.phase.lock();
            *phase = ProviderPhase::Stopped;
            self.session.lock().take()
        };
        if let Some(session) = session {
            self.shutdown_session(session).await;
            tracing::info!(provider = %self.shared.provider_id, "Provider stopped");
        }
    }

    async fn shutdown_session(&self, session: ProviderSession) {
        let _ = session.shutdown.send(true);
        for task in session.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(provider = %self.shared.provider_id, error = %e, "Provider task failed");
                }
            }
        }
        session.transport.close().await;
    }
}

#[derive(Clone, Copy)]
enum Handler {
    Registry,
    Read,
    Write,
}

/// Ask a provider for its states directly, without a consumer agent
pub async fn read_provider(
    transport: &dyn Transport,
    provider: &ProviderId,
    ids: Option<Vec<VariableId>>,
    timeout: Duration,
) -> VarsyncResult<ReadVariablesResponse> {
    let reply = transport
        .request(
            &read_variables_query(provider),
            ReadVariablesQuery { ids }.to_bytes()?,
            timeout,
        )
        .await
        .map_err(|e| match e {
            VarsyncError::NoResponders(_) => VarsyncError::ProviderUnavailable(provider.clone()),
            other => other,
        })?;
    ReadVariablesResponse::from_bytes(&reply)
}
