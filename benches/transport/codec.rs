use criterion::{BatchSize, Criterion, Throughput};
use iothub_device::message::Message;
use iothub_device::transport::https::batch::{HttpsBatch, encode};
use iothub_device::transport::mqtt::topic::{TelemetryTopics, parse_topic};
use rand::Rng;
use std::hint::black_box;

fn telemetry(body_len: usize) -> Message {
    let mut rng = rand::thread_rng();
    let body: Vec<u8> = (0..body_len).map(|_| rng.r#gen()).collect();
    Message::new(body)
        .with_message_id(format!("msg-{}", rng.r#gen::<u32>()))
        .with_content_type("application/json")
        .with_property("sensor", "bme280")
        .with_property("room name", "living room")
}

pub fn bench_telemetry_topic(c: &mut Criterion) {
    let topics = TelemetryTopics::new("bench-device");
    let message = telemetry(64);
    c.bench_function("telemetry_topic", |b| {
        b.iter(|| topics.topic_for(black_box(&message)))
    });
}

pub fn bench_parse_topic(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_topic");
    for topic in [
        "$iothub/twin/res/200/?$rid=42&$version=17",
        "$iothub/twin/PATCH/properties/desired/?$version=18",
        "$iothub/methods/POST/reboot/?$rid=7",
    ] {
        group.bench_function(topic, |b| b.iter(|| parse_topic(black_box(topic))));
    }
    group.finish();
}

pub fn bench_batch_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_encode");
    for count in [1usize, 10, 100] {
        let messages: Vec<Message> = (0..count).map(|_| telemetry(256)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("encode_{count}"), |b| {
            b.iter(|| encode(black_box(&messages)).expect("batch fits"))
        });
        group.bench_function(format!("try_add_{count}"), |b| {
            b.iter_batched_ref(
                HttpsBatch::new,
                |batch| {
                    for message in &messages {
                        batch.try_add(message).expect("batch fits");
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}
