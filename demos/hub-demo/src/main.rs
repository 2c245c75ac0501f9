//! varsync hub demo
//!
//! Runs a registry, the sample provider and a consumer on one in-process
//! bus, prints every change the consumer sees and writes a value halfway.
//!
//! Usage: `hub-demo [config.json] [seconds]`

use std::sync::Arc;
use std::time::Duration;

use varsync_core::{Value, VariableState, VarsyncResult};
use varsync_runtime::{
    init_tracing, ConsumerAgent, ConsumerConfig, HubConfig, ProviderAgent, ProviderConfig,
    Simulation,
};
use varsync_test::RegistryStub;
use varsync_transport::{MemoryBus, StaticToken};

fn print_changes(changed: &[VariableState]) {
    for state in changed {
        let value = state
            .value
            .as_ref()
            .map(|v| format!("{:?}", v))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {:>3}  {:<40} {:?}",
            state.id, value, state.quality
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> VarsyncResult<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
    init_tracing(&config.log);

    println!("=== varsync hub demo ===\n");

    let bus = MemoryBus::new();
    let token = Arc::new(StaticToken::new("demo"));

    println!("1. Starting registry...");
    let registry = RegistryStub::on_bus(&bus).await?;

    println!("2. Starting provider...");
    let provider_config = config.provider.unwrap_or_else(ProviderConfig::default);
    let provider = ProviderAgent::new(
        provider_config.clone(),
        Arc::new(bus.clone()),
        token.clone(),
        Box::new(Simulation::new()),
    );
    provider.start().await?;
    let mut validation = provider.watch_validation();
    let _ = tokio::time::timeout(Duration::from_secs(1), validation.changed()).await;
    println!(
        "   {} with {} variables, fingerprint {:016x}, registry says {:?}\n",
        provider.provider_id(),
        provider_config.variables.len(),
        provider.fingerprint(),
        provider.validation_state()
    );

    println!("3. Starting consumer...");
    let consumer_config = config
        .consumer
        .unwrap_or_else(|| ConsumerConfig::new(provider_config.provider_id.clone()));
    let consumer = ConsumerAgent::new(consumer_config, Arc::new(bus.clone()), token);
    consumer.on_change(|changed: &[VariableState]| {
        println!("-- broadcast: {} variables", changed.len());
        print_changes(changed);
    });
    consumer.start().await?;
    let definitions = consumer.load_definitions().await?;
    for def in &definitions.definitions {
        println!(
            "   {:>3}  {:<40} {:<8} {}",
            def.id,
            def.key,
            def.data_type.as_str(),
            def.access.as_str()
        );
    }

    println!("\n4. Snapshot:");
    print_changes(&consumer.request_snapshot().await?);

    tokio::time::sleep(Duration::from_secs(seconds / 2)).await;
    if let Some(id) = consumer.resolve_key("diagnostics.error_count") {
        println!("5. Writing 100 to diagnostics.error_count...\n");
        consumer.write(vec![(id, Value::Int64(100))]).await?;
    }
    tokio::time::sleep(Duration::from_secs(seconds - seconds / 2)).await;

    println!("6. Shutting down...");
    consumer.stop().await;
    provider.stop().await;
    registry.stop().await;

    let stats = provider.stats();
    println!(
        "   broadcasts={} reads={} writes={} rejected={}",
        stats.broadcasts, stats.reads_served, stats.write_commands, stats.entries_rejected
    );
    tracing::info!(published = bus.published_count(), "Demo finished");
    Ok(())
}
