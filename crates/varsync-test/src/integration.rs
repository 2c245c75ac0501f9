//! End-to-end suite
//!
//! Provider, consumer and registry stub on one in-process bus:
//! - Snapshots, filtered reads and unreachable providers
//! - Writes, including no-op and rejected entries
//! - Broadcast merge and observer behaviour
//! - Registry validation, directory and definition cache

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use varsync_core::subject::vars_changed_event;
    use varsync_core::{
        AccessType, DataType, ProviderId, Quality, Timestamp, ValidationState, Value,
        VariableDefinition, VariableId, VariableState, VarsyncError,
    };
    use varsync_runtime::{
        ConsumerAgent, ConsumerConfig, FixedValues, ProviderAgent, ProviderConfig, RegistryClient,
    };
    use varsync_transport::{MemoryBus, StaticToken, Transport};
    use varsync_wire::{EncodedValue, VariableBatch, VariableEntry, VariablesChangedEvent, WireMessage};

    use crate::registry_stub::RegistryStub;

    const PROVIDER: &str = "press01";
    const TIMEOUT: Duration = Duration::from_millis(500);
    const WAIT: Duration = Duration::from_secs(2);

    fn sample_definitions() -> Vec<VariableDefinition> {
        vec![
            VariableDefinition::new(1, "status.text", DataType::String, AccessType::ReadWrite),
            VariableDefinition::new(2, "status.count", DataType::Int64, AccessType::ReadWrite),
        ]
    }

    fn provider(bus: &MemoryBus, definitions: Vec<VariableDefinition>) -> ProviderAgent {
        let config = ProviderConfig::new(PROVIDER, definitions)
            .with_publish_interval(Duration::from_secs(3600));
        ProviderAgent::new(
            config,
            Arc::new(bus.clone()),
            Arc::new(StaticToken::new("token")),
            Box::new(FixedValues::new([(1, Value::from("ready")), (2, Value::Int64(5))])),
        )
    }

    fn consumer(bus: &MemoryBus, provider_id: &str) -> ConsumerAgent {
        ConsumerAgent::new(
            ConsumerConfig::new(provider_id).with_request_timeout(TIMEOUT),
            Arc::new(bus.clone()),
            Arc::new(StaticToken::new("token")),
        )
    }

    /// Changes seen by a consumer's observers
    fn observe(consumer: &ConsumerAgent) -> mpsc::UnboundedReceiver<Vec<VariableState>> {
        let (tx, rx) = mpsc::unbounded_channel();
        consumer.on_change(move |changed: &[VariableState]| {
            let _ = tx.send(changed.to_vec());
        });
        rx
    }

    async fn wait_for_value(
        changes: &mut mpsc::UnboundedReceiver<Vec<VariableState>>,
        id: u32,
        value: Value,
    ) {
        let found = tokio::time::timeout(WAIT, async {
            while let Some(changed) = changes.recv().await {
                if changed
                    .iter()
                    .any(|s| s.id == VariableId(id) && s.value.as_ref() == Some(&value))
                {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(found, Ok(true), "value {:?} for id {} never arrived", value, id);
    }

    async fn wait_validated(provider: &ProviderAgent) -> ValidationState {
        let mut watch = provider.watch_validation();
        let state = tokio::time::timeout(
            WAIT,
            watch.wait_for(|s| *s != ValidationState::Unspecified),
        )
        .await
        .expect("no registry verdict")
        .expect("provider dropped");
        *state
    }

    async fn wait_for_writes(provider: &ProviderAgent, count: u64) {
        let deadline = Instant::now() + WAIT;
        while provider.stats().write_commands < count {
            assert!(Instant::now() < deadline, "write command never handled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn values(states: &[VariableState]) -> Vec<(u32, Option<Value>)> {
        states.iter().map(|s| (s.id.0, s.value.clone())).collect()
    }

    #[tokio::test]
    async fn test_snapshot_returns_live_values() {
        let bus = MemoryBus::new();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let consumer = consumer(&bus, PROVIDER);
        consumer.start().await.unwrap();

        let snapshot = consumer.request_snapshot().await.unwrap();
        assert_eq!(
            values(&snapshot),
            vec![(1, Some(Value::from("ready"))), (2, Some(Value::Int64(5)))]
        );
        // One timestamp for the whole batch
        assert_eq!(snapshot[0].timestamp, snapshot[1].timestamp);
        assert!(!snapshot[0].timestamp.is_zero());
        assert_eq!(values(&consumer.states()), values(&snapshot));

        let filtered = consumer
            .request_variables(&[VariableId(2), VariableId(99)])
            .await
            .unwrap();
        assert_eq!(values(&filtered), vec![(2, Some(Value::Int64(5)))]);

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_provider_fails_within_timeout() {
        let bus = MemoryBus::new();
        let consumer = consumer(&bus, "nobody");
        consumer.start().await.unwrap();

        let started = Instant::now();
        let err = consumer.request_snapshot().await.unwrap_err();
        assert!(matches!(err, VarsyncError::ProviderUnavailable(ref p) if p.as_str() == "nobody"));
        assert!(started.elapsed() < TIMEOUT + Duration::from_millis(250));
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_provider_becomes_unavailable() {
        let bus = MemoryBus::new();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let consumer = consumer(&bus, PROVIDER);
        consumer.start().await.unwrap();
        consumer.request_snapshot().await.unwrap();

        provider.stop().await;
        assert!(matches!(
            consumer.request_snapshot().await,
            Err(VarsyncError::ProviderUnavailable(_))
        ));
        // The replica keeps the last known values
        assert_eq!(consumer.states().len(), 2);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_write_then_snapshot() {
        let bus = MemoryBus::new();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let consumer = consumer(&bus, PROVIDER);
        let mut changes = observe(&consumer);
        consumer.start().await.unwrap();

        consumer.write(vec![(VariableId(2), Value::Int64(42))]).await.unwrap();
        wait_for_value(&mut changes, 2, Value::Int64(42)).await;

        let snapshot = consumer.request_snapshot().await.unwrap();
        assert_eq!(
            values(&snapshot),
            vec![(1, Some(Value::from("ready"))), (2, Some(Value::Int64(42)))]
        );
        assert_eq!(provider.stats().entries_written, 1);

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_write_to_unknown_id_is_noop() {
        let bus = MemoryBus::new();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let before = provider.states();

        // No cached definitions, so the consumer sends it unchecked
        let consumer = consumer(&bus, PROVIDER);
        consumer.start().await.unwrap();
        consumer.write(vec![(VariableId(77), Value::Int64(1))]).await.unwrap();
        wait_for_writes(&provider, 1).await;

        let after = provider.states();
        assert_eq!(after.len(), 2);
        assert_eq!(values(&after), values(&before));
        let stats = provider.stats();
        assert_eq!(stats.entries_written, 0);
        assert_eq!(stats.entries_rejected, 0);

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_provider_rejects_read_only_and_mistyped_entries() {
        let bus = MemoryBus::new();
        let mut definitions = sample_definitions();
        definitions.push(VariableDefinition::new(3, "status.serial", DataType::String, AccessType::ReadOnly));
        let provider = provider(&bus, definitions);
        provider.start().await.unwrap();

        let consumer = consumer(&bus, PROVIDER);
        consumer.start().await.unwrap();
        consumer
            .write(vec![
                (VariableId(3), Value::from("forged")),
                (VariableId(2), Value::from("not a number")),
                (VariableId(1), Value::from("running")),
            ])
            .await
            .unwrap();
        wait_for_writes(&provider, 1).await;

        let stats = provider.stats();
        assert_eq!(stats.entries_written, 1);
        assert_eq!(stats.entries_rejected, 2);
        let snapshot = consumer.request_snapshot().await.unwrap();
        assert_eq!(
            values(&snapshot),
            vec![
                (1, Some(Value::from("running"))),
                (2, Some(Value::Int64(5))),
                (3, None),
            ]
        );

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_does_not_notify_but_broadcast_does() {
        let bus = MemoryBus::new();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let consumer = consumer(&bus, PROVIDER);
        let mut changes = observe(&consumer);
        consumer.start().await.unwrap();

        consumer.request_snapshot().await.unwrap();
        assert!(changes.try_recv().is_err());

        provider.set_value(VariableId(1), Value::from("idle")).unwrap();
        provider.broadcast_now().await.unwrap();
        let changed = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
        assert_eq!(
            values(&changed),
            vec![(1, Some(Value::from("idle"))), (2, Some(Value::Int64(5)))]
        );

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_periodic_broadcast_reaches_consumer() {
        let bus = MemoryBus::new();
        let config = ProviderConfig::new(PROVIDER, sample_definitions())
            .with_publish_interval(Duration::from_millis(20));
        let provider = ProviderAgent::new(
            config,
            Arc::new(bus.clone()),
            Arc::new(StaticToken::new("token")),
            Box::new(FixedValues::new([(1, Value::from("ready")), (2, Value::Int64(5))])),
        );
        let consumer = consumer(&bus, PROVIDER);
        let mut changes = observe(&consumer);
        consumer.start().await.unwrap();
        provider.start().await.unwrap();

        let first = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert!(second[0].timestamp >= first[0].timestamp);

        provider.stop().await;
        consumer.stop().await;
        assert!(provider.stats().broadcasts >= 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_value_for_unknown_tag() {
        let bus = MemoryBus::new();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let consumer = consumer(&bus, PROVIDER);
        let mut changes = observe(&consumer);
        consumer.start().await.unwrap();
        consumer.request_snapshot().await.unwrap();

        // A newer provider sending a type this side does not know
        let base = Timestamp::from_nanos(1_700_000_000_000_000_000);
        let mut batch = VariableBatch::new(provider.fingerprint(), base);
        batch.push(VariableEntry::new(
            VariableId(2),
            EncodedValue {
                tag: 0x7F,
                data: Bytes::from_static(b"future"),
            },
            Quality::Uncertain,
        ));
        let raw = bus.client("future-provider");
        raw.publish(
            &vars_changed_event(&ProviderId::new(PROVIDER)),
            VariablesChangedEvent { changed: batch }.to_bytes().unwrap(),
        )
        .await
        .unwrap();

        let changed = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
        assert_eq!(changed.len(), 1);
        let state = consumer.get(VariableId(2)).unwrap();
        assert_eq!(state.value, Some(Value::Int64(5)));
        assert_eq!(state.timestamp, base);
        assert_eq!(state.quality, Quality::Uncertain);

        consumer.stop().await;
        provider.stop().await;
    }

    #[tokio::test]
    async fn test_registry_validates_and_serves_definitions() {
        let bus = MemoryBus::new();
        let stub = RegistryStub::on_bus(&bus).await.unwrap();
        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        assert_eq!(wait_validated(&provider).await, ValidationState::Ok);

        let consumer = consumer(&bus, PROVIDER);
        consumer.start().await.unwrap();
        let definitions = consumer.load_definitions().await.unwrap();
        assert_eq!(definitions.fingerprint, provider.fingerprint());
        assert_eq!(definitions.validation_state, ValidationState::Ok);
        assert_eq!(consumer.resolve_key("status.count"), Some(VariableId(2)));

        consumer.write_text("status.count", "42").await.unwrap();
        wait_for_writes(&provider, 1).await;
        assert_eq!(
            consumer.request_variables(&[VariableId(2)]).await.unwrap()[0].value,
            Some(Value::Int64(42))
        );
        assert!(matches!(
            consumer.write_text("status.count", "many").await,
            Err(VarsyncError::InvalidValue { data_type: DataType::Int64, .. })
        ));

        consumer.stop().await;
        provider.stop().await;
        stub.stop().await;
    }

    #[tokio::test]
    async fn test_registry_rejects_empty_definition_set() {
        let bus = MemoryBus::new();
        let stub = RegistryStub::on_bus(&bus).await.unwrap();
        let provider = provider(&bus, vec![]);
        provider.start().await.unwrap();
        assert_eq!(wait_validated(&provider).await, ValidationState::Invalid);
        assert_eq!(
            stub.definition(&ProviderId::new(PROVIDER)).map(|d| d.validation_state),
            Some(ValidationState::Invalid)
        );
        provider.stop().await;
        stub.stop().await;
    }

    #[tokio::test]
    async fn test_same_definitions_in_any_order_share_a_fingerprint() {
        let bus = MemoryBus::new();
        let stub = RegistryStub::on_bus(&bus).await.unwrap();

        let mut reversed = sample_definitions();
        reversed.reverse();
        let first = provider(&bus, sample_definitions());
        let second = ProviderAgent::new(
            ProviderConfig::new("press02", reversed),
            Arc::new(bus.clone()),
            Arc::new(StaticToken::new("token")),
            Box::new(FixedValues::default()),
        );
        first.start().await.unwrap();
        second.start().await.unwrap();
        wait_validated(&first).await;
        wait_validated(&second).await;

        assert_eq!(first.fingerprint(), second.fingerprint());
        let registered: Vec<u64> = stub
            .providers()
            .iter()
            .filter_map(|p| stub.definition(p))
            .map(|d| d.fingerprint)
            .collect();
        assert_eq!(registered, vec![first.fingerprint(), first.fingerprint()]);

        first.stop().await;
        second.stop().await;
        stub.stop().await;
    }

    #[tokio::test]
    async fn test_provider_directory_follows_registrations() {
        let bus = MemoryBus::new();
        let stub = RegistryStub::on_bus(&bus).await.unwrap();
        let directory = RegistryClient::new(Arc::new(bus.client("directory")), TIMEOUT);
        let (tx, mut seen) = mpsc::unbounded_channel();
        let watch = directory
            .watch_providers(move |providers: &[ProviderId]| {
                let _ = tx.send(providers.to_vec());
            })
            .await
            .unwrap();

        let provider = provider(&bus, sample_definitions());
        provider.start().await.unwrap();
        let listed = tokio::time::timeout(WAIT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(listed, vec![ProviderId::new(PROVIDER)]);
        assert_eq!(directory.list_providers().await.unwrap(), listed);

        assert!(stub.remove(&ProviderId::new(PROVIDER)).await.unwrap());
        let listed = tokio::time::timeout(WAIT, seen.recv()).await.unwrap().unwrap();
        assert!(listed.is_empty());
        assert!(matches!(
            directory.fetch_definition(&ProviderId::new(PROVIDER)).await,
            Err(VarsyncError::ProviderUnavailable(_))
        ));
        // Removal from the directory does not stop the provider itself
        assert!(directory_read(&bus).await);

        watch.stop().await;
        provider.stop().await;
        stub.stop().await;
    }

    async fn directory_read(bus: &MemoryBus) -> bool {
        let client = bus.client("reader");
        let response = varsync_runtime::read_provider(
            &client,
            &ProviderId::new(PROVIDER),
            None,
            TIMEOUT,
        )
        .await;
        client.close().await;
        response.map(|r| r.variables.len() == 2).unwrap_or(false)
    }

    #[tokio::test]
    async fn test_new_definition_set_invalidates_consumer_cache() {
        let bus = MemoryBus::new();
        let stub = RegistryStub::on_bus(&bus).await.unwrap();
        let old = provider(&bus, sample_definitions());
        old.start().await.unwrap();
        wait_validated(&old).await;

        let consumer = consumer(&bus, PROVIDER);
        let mut changes = observe(&consumer);
        consumer.start().await.unwrap();
        consumer.load_definitions().await.unwrap();
        old.stop().await;

        let mut definitions = sample_definitions();
        definitions.push(VariableDefinition::new(3, "status.serial", DataType::String, AccessType::ReadOnly));
        let new = provider(&bus, definitions);
        new.start().await.unwrap();
        wait_validated(&new).await;

        new.broadcast_now().await.unwrap();
        tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
        assert!(consumer.definitions().is_none());
        assert_eq!(consumer.resolve_key("status.serial"), None);

        let reloaded = consumer.load_definitions().await.unwrap();
        assert_eq!(reloaded.fingerprint, new.fingerprint());
        assert_eq!(consumer.resolve_key("status.serial"), Some(VariableId(3)));
        assert!(matches!(
            consumer.write(vec![(VariableId(3), Value::from("x"))]).await,
            Err(VarsyncError::PermissionDenied(VariableId(3)))
        ));

        consumer.stop().await;
        new.stop().await;
        stub.stop().await;
    }

    #[tokio::test]
    async fn test_required_token_is_checked() {
        let bus = MemoryBus::with_required_token("secret");
        let consumer = consumer(&bus, PROVIDER);
        assert!(matches!(consumer.start().await, Err(VarsyncError::AuthFailure(_))));

        let provider = ProviderAgent::new(
            ProviderConfig::new(PROVIDER, sample_definitions()),
            Arc::new(bus.clone()),
            Arc::new(StaticToken::new("secret")),
            Box::new(FixedValues::default()),
        );
        provider.start().await.unwrap();
        provider.stop().await;
    }
}
