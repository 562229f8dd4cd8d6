use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use address_core::{Address, AddressId, ApplicationId, RandomIdGenerator, TenantId};
use address_infra::{AddressKey, AddressRepository, AddressStore, FanOut, InMemorySession, MutationPlan};

fn address_with(attributes: usize) -> Address {
    (0..attributes)
        .map(|i| (format!("Line{i}"), format!("value {i}")))
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

/// Write fan-out alone, by attribute count and in-flight bound.
fn bench_write_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("write_fan_out");

    for attributes in [1usize, 8, 32] {
        let address = address_with(attributes);
        group.throughput(Throughput::Elements((attributes * 2) as u64));

        for max_in_flight in [1usize, 16] {
            let fan_out = FanOut::new(max_in_flight);
            group.bench_with_input(
                BenchmarkId::new(format!("in_flight_{max_in_flight}"), attributes),
                &address,
                |b, address| {
                    let session = Arc::new(InMemorySession::new());
                    b.iter(|| {
                        let key = AddressKey::new(TenantId::new(), ApplicationId::new(), AddressId::new());
                        rt.block_on(fan_out.run(&session, MutationPlan::write(&key, black_box(address))))
                            .unwrap();
                    });
                },
            );
        }
    }

    group.finish();
}

/// Full repository lifecycle: create, update, read, delete.
fn bench_repository_lifecycle(c: &mut Criterion) {
    let rt = runtime();
    let repo = AddressRepository::new(Arc::new(InMemorySession::new()), RandomIdGenerator::new());
    let (tenant_id, application_id) = (TenantId::new(), ApplicationId::new());
    let original = address_with(8);
    let replacement = address_with(4);

    c.bench_function("repository_lifecycle_8_attributes", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = repo
                    .create(tenant_id, application_id, original.clone())
                    .await
                    .unwrap();
                repo.update(tenant_id, application_id, id, replacement.clone())
                    .await
                    .unwrap();
                black_box(repo.read_all(tenant_id, application_id, id).await.unwrap());
                repo.delete(tenant_id, application_id, id).await.unwrap();
            })
        });
    });
}

criterion_group!(benches, bench_write_fan_out, bench_repository_lifecycle);
criterion_main!(benches);
