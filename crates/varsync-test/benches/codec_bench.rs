//! Benchmarks for the varsync wire codec and state merge

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use varsync_core::{
    AccessType, DataType, Quality, Timestamp, Value, VariableDefinition, VariableId,
};
use varsync_runtime::{Simulation, ValueSource};
use varsync_state::{LiveStateMap, Replica};
use varsync_wire::{
    fingerprint, DefinitionSet, VariableBatch, VariablesChangedEvent, WireMessage,
};

fn definitions(count: u32) -> Vec<VariableDefinition> {
    (1..=count)
        .map(|id| {
            let data_type = DataType::ALL[(id as usize) % DataType::ALL.len()];
            VariableDefinition::new(id, format!("machine.sensor_{}", id), data_type, AccessType::ReadWrite)
        })
        .collect()
}

fn live_map(count: u32) -> LiveStateMap {
    let defs = definitions(count);
    let mut map = LiveStateMap::new(DefinitionSet::new(defs.clone()));
    let mut source = Simulation::with_seed(1);
    let initial = source.initial_states(&defs);
    map.replace_states(source.advance(&defs, &initial));
    map
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut defs = definitions(256);
    defs.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));

    c.bench_function("fingerprint_256", |b| {
        b.iter(|| black_box(fingerprint(black_box(&defs))))
    });
}

fn bench_batch_encode(c: &mut Criterion) {
    let map = live_map(256);

    c.bench_function("changed_event_encode_256", |b| {
        b.iter(|| {
            let event = VariablesChangedEvent {
                changed: map.to_batch(None),
            };
            black_box(event.to_bytes())
        })
    });
}

fn bench_batch_decode(c: &mut Criterion) {
    let map = live_map(256);
    let bytes = VariablesChangedEvent {
        changed: map.to_batch(None),
    }
    .to_bytes()
    .unwrap();

    c.bench_function("changed_event_decode_256", |b| {
        b.iter(|| black_box(VariablesChangedEvent::from_bytes(black_box(&bytes)).unwrap()))
    });
}

fn bench_replica_merge(c: &mut Criterion) {
    let batch = live_map(256).to_batch(None);

    c.bench_function("replica_merge_256", |b| {
        let mut replica = Replica::new();
        b.iter(|| black_box(replica.merge(black_box(&batch))))
    });
}

fn bench_apply_write(c: &mut Criterion) {
    let mut map = live_map(256);
    let mut batch = VariableBatch::new(map.fingerprint(), Timestamp::now());
    for def in definitions(256).iter().filter(|d| d.data_type == DataType::Int64) {
        let value = varsync_wire::EncodedValue::encode(def.data_type, &Value::Int64(42)).unwrap();
        batch.push(varsync_wire::VariableEntry::new(def.id, value, Quality::Good));
    }
    batch.push(varsync_wire::VariableEntry::new(
        VariableId(9999),
        varsync_wire::EncodedValue::from_value(&Value::Int64(1)),
        Quality::Good,
    ));

    c.bench_function("apply_write_64", |b| {
        b.iter(|| black_box(map.apply_write(black_box(&batch), true, Timestamp::now())))
    });
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_batch_encode,
    bench_batch_decode,
    bench_replica_merge,
    bench_apply_write,
);
criterion_main!(benches);
