use criterion::{criterion_group, criterion_main};

mod network;
mod transport;

criterion_group!(
    benches,
    network::mqtt_client::bench_publish_qos0,
    network::mqtt_client::bench_publish_qos1,
    network::mqtt_client::bench_poll,
    transport::codec::bench_telemetry_topic,
    transport::codec::bench_parse_topic,
    transport::codec::bench_batch_encode
);
criterion_main!(benches);
