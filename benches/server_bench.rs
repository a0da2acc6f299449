use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use adversarial_protocol::client::{LocalModel, RandomSearch};
use adversarial_protocol::config::{AttackConfig, ServerConfig};
use adversarial_protocol::protocol::{Probe, Want};
use adversarial_protocol::server::LinearClassifier;
use adversarial_protocol::{BsonAttack, ModelServer, Tensor};

const FEATURES: usize = 784;
const CLASSES: usize = 10;

#[allow(clippy::unwrap_used)]
fn server() -> Arc<ModelServer> {
    let weights = (0..CLASSES)
        .map(|c| {
            (0..FEATURES)
                .map(|i| ((i * 31 + c * 17) % 97) as f32 / 97.0 - 0.5)
                .collect()
        })
        .collect();
    let classifier = LinearClassifier::new(vec![1, 28, 28], weights, vec![0.0; CLASSES]).unwrap();
    let config = ServerConfig {
        max_budget: u64::MAX,
        ..ServerConfig::default()
    };
    Arc::new(ModelServer::new(Arc::new(classifier), config))
}

fn image() -> Tensor {
    let data = (0..FEATURES).map(|i| (i % 255) as f32 / 255.0).collect();
    Tensor::new(vec![1, 28, 28], data).unwrap_or_else(|_| Tensor::zeros(vec![1, 28, 28]))
}

#[allow(clippy::unwrap_used)]
fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");
    group.throughput(Throughput::Elements(1));
    let server = server();
    let session = server.open_session(u64::MAX / 2).unwrap();

    for want in [Want::Label, Want::Probs, Want::Gradient] {
        let probe = Probe::new(image(), want);
        group.bench_function(want.as_str(), |b| {
            b.iter(|| server.predict(&session, &probe).unwrap())
        });
    }

    group.bench_function("open_close_session", |b| {
        b.iter(|| {
            let id = server.open_session(10).unwrap();
            server.close_session(&id).unwrap();
        })
    });

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_attack(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let server = server();
    let config = AttackConfig {
        max_iterations: 100,
        ..AttackConfig::default()
    };

    c.bench_function("random_search_100_queries", |b| {
        b.iter_batched(
            || LocalModel::open(server.clone(), 101).unwrap(),
            |mut model| {
                let mut attack = BsonAttack::new(RandomSearch::from_config(&config), config.clone());
                runtime
                    .block_on(attack.run(&mut model, &image(), 0.05, false))
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_predict, bench_attack);
criterion_main!(benches);
