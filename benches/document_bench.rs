use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use adversarial_protocol::core::codec::PacketCodec;
use adversarial_protocol::core::document;
use adversarial_protocol::core::packet::Packet;
use adversarial_protocol::protocol::{Message, Probe, SessionId, Want};
use adversarial_protocol::Tensor;
use tokio_util::codec::Encoder;

fn probe_message(shape: &[usize]) -> Message {
    let len: usize = shape.iter().product();
    let data: Vec<f32> = (0..len).map(|i| (i % 255) as f32 / 255.0).collect();
    #[allow(clippy::unwrap_used)]
    let tensor = Tensor::new(shape.to_vec(), data).unwrap();
    Message::Probe {
        session_id: SessionId::from("bench"),
        probe: Probe::new(tensor, Want::Probs).with_probe_id("bench-1"),
    }
}

#[allow(clippy::unwrap_used)]
fn bench_probe_documents(c: &mut Criterion) {
    let mut group = c.benchmark_group("probe_document");

    for shape in [vec![1usize, 28, 28], vec![3, 32, 32], vec![3, 224, 224]] {
        let label = shape
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("x");
        let msg = probe_message(&shape);
        let bytes = msg.encode().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_function(format!("encode_{label}"), |b| {
            b.iter(|| msg.encode().unwrap())
        });
        group.bench_function(format!("decode_{label}"), |b| {
            b.iter(|| Message::decode(&bytes).unwrap())
        });
        group.bench_function(format!("decode_raw_{label}"), |b| {
            b.iter(|| document::decode(&bytes).unwrap())
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_packet_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_framing");
    let payload = probe_message(&[3, 32, 32]).encode().unwrap();
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("encode", |b| {
        b.iter_batched(
            || payload.clone(),
            |payload| {
                let mut buf = BytesMut::with_capacity(payload.len() + 16);
                PacketCodec.encode(Packet::new(payload), &mut buf).unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    let framed = Packet::new(payload.clone()).to_bytes();
    group.bench_function("decode", |b| {
        b.iter(|| {
            let decoded = Packet::from_bytes(&framed);
            assert!(decoded.is_ok());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_probe_documents, bench_packet_framing);
criterion_main!(benches);
