use criterion::{BatchSize, Criterion, Throughput};
use iothub_device::network::application::mqtt::{Client, Options, QoS};
use iothub_device::network::error::Error;
use iothub_device::network::{Close, Connection, Read, Write};
use std::collections::VecDeque;

/// In-memory peer: starts with a CONNACK, then answers every empty read
/// with whatever `refill` produces for the next packet identifier.
struct Loopback {
    buffer: VecDeque<u8>,
    next_id: u16,
    refill: fn(u16) -> Vec<u8>,
}

impl Loopback {
    fn new(refill: fn(u16) -> Vec<u8>) -> Self {
        Self {
            buffer: VecDeque::from(vec![0x20, 0x02, 0x00, 0x00]),
            next_id: 0,
            refill,
        }
    }
}

impl Read for Loopback {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.buffer.is_empty() {
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            self.buffer.extend((self.refill)(self.next_id));
        }
        let len = buf.len().min(self.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffer.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for Loopback {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for Loopback {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for Loopback {}

fn puback(id: u16) -> Vec<u8> {
    let [hi, lo] = id.to_be_bytes();
    vec![0x40, 0x02, hi, lo]
}

fn method_request(_id: u16) -> Vec<u8> {
    let topic = b"$iothub/methods/POST/reboot/?$rid=1";
    let payload = br#"{"delay":5}"#;
    let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8, 0x00, topic.len() as u8];
    packet.extend_from_slice(topic);
    packet.extend_from_slice(payload);
    packet
}

fn setup_client(refill: fn(u16) -> Vec<u8>) -> Client<Loopback> {
    let options = Options {
        client_id: "bench-device",
        username: Some("hub.example.net/bench-device/?api-version=2020-09-30"),
        password: Some("SharedAccessSignature sr=bench"),
        keep_alive_seconds: 230,
        clean_session: false,
    };
    Client::connect(Loopback::new(refill), options).expect("Failed to connect")
}

const TOPIC: &str = "devices/bench-device/messages/events/$.ct=application%2Fjson";

pub fn bench_publish_qos0(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_qos0");
    let payload = br#"{"temperature":21.5,"humidity":40}"#;
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("publish_qos0", |b| {
        b.iter_batched_ref(
            || setup_client(puback),
            |client| {
                client
                    .publish(TOPIC, payload, QoS::AtMostOnce)
                    .expect("Failed to publish");
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_publish_qos1(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_qos1");
    let payload = br#"{"temperature":21.5,"humidity":40}"#;
    group.throughput(Throughput::Bytes(payload.len() as u64 * 50));
    group.bench_function("publish_qos1", |b| {
        b.iter_batched_ref(
            || setup_client(puback),
            |client| {
                for _ in 0..50 {
                    client
                        .publish(TOPIC, payload, QoS::AtLeastOnce)
                        .expect("Failed to publish");
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll");
    group.throughput(Throughput::Elements(50));
    group.bench_function("poll", |b| {
        b.iter_batched_ref(
            || setup_client(method_request),
            |client| {
                for _ in 0..50 {
                    let _ = client.poll().expect("Failed to poll");
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}
