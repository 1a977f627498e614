use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId, Criterion,
    Throughput
};
use serde_json::{json, Map, Value};
use tessera::Variables;
use tessera_store::{
    create_operation_descriptor, normalize, OperationDescriptor, RecordSourceMap, Store,
    StoreOptions, ROOT_TYPE
};
use tessera_test::queries::stream_query;

criterion_group!(benches, read, write);
criterion_main!(benches);

pub fn read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    benchmark_reads(&mut group, 100);
    benchmark_reads(&mut group, 1000);
    benchmark_reads(&mut group, 10000);

    group.finish();
}

pub fn write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    benchmark_writes(&mut group, 100);
    benchmark_writes(&mut group, 1000);
    benchmark_writes(&mut group, 10000);

    group.finish();
}

fn make_friends(n: usize) -> Map<String, Value> {
    let friends: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "__typename": "User",
                "id": (i + 2).to_string(),
                "name": format!("friend {}", i)
            })
        })
        .collect();
    let data = json!({
        "node": { "__typename": "User", "id": "1", "friendsList": friends }
    });
    data.as_object().cloned().unwrap_or_default()
}

fn operation() -> OperationDescriptor {
    create_operation_descriptor(stream_query(), &Variables::new(), None)
}

fn write_friends(store: &Store, operation: &OperationDescriptor, data: &Map<String, Value>) {
    let result = normalize(
        &operation.root,
        ROOT_TYPE,
        data,
        vec![],
        &StoreOptions::default()
    )
    .unwrap();
    store.publish(result.source);
    store.notify(Some(operation));
}

fn benchmark_reads(group: &mut BenchmarkGroup<WallTime>, n: usize) {
    let store = Store::new(RecordSourceMap::new(), StoreOptions::default());
    let operation = operation();
    write_friends(&store, &operation, &make_friends(n));

    group.throughput(Throughput::Elements(n as u64));
    group.sample_size(usize::max(10, 10000 / n));
    group.bench_with_input(
        BenchmarkId::new("plural field", format!("{} entries", n)),
        &operation,
        |b, op| {
            b.iter(|| store.lookup(&op.fragment));
        }
    );
}

fn benchmark_writes(group: &mut BenchmarkGroup<WallTime>, n: usize) {
    let store = Store::new(RecordSourceMap::new(), StoreOptions::default());
    let operation = operation();
    let data = make_friends(n);
    let _retained = store.retain(&operation);

    group.throughput(Throughput::Elements(n as u64));
    group.sample_size(usize::max(10, 10000 / n));
    group.bench_with_input(
        BenchmarkId::new("plural field", format!("{} entries", n)),
        &data,
        |b, data| {
            b.iter(|| write_friends(&store, &operation, data));
        }
    );
}
