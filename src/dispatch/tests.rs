use super::*;
use crate::network::error::Error as NetError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<(String, StatusCode)>>>;

fn telemetry(log: &Log, name: &str) -> Packet {
    let log = log.clone();
    let name = name.to_string();
    Packet::new(Operation::Telemetry, Message::new(name.clone().into_bytes()))
        .on_result(move |status, _| log.lock().unwrap().push((name, status)))
}

fn deliver(queue: &mut OutboundDispatchQueue) {
    for callback in queue.take_callbacks() {
        callback.invoke();
    }
}

fn body_of(packet: &Packet) -> String {
    String::from_utf8(packet.message().body().to_vec()).unwrap()
}

#[test]
fn drain_on_empty_queue_is_a_no_op() {
    let mut queue = OutboundDispatchQueue::new();
    let mut calls = 0;
    let sent = queue
        .drain(10, Instant::now(), |_| {
            calls += 1;
            Ok(Disposition::Completed(StatusCode::Ok))
        })
        .unwrap();
    assert_eq!(sent, 0);
    assert_eq!(calls, 0);
    assert!(queue.is_empty());
}

#[test]
fn drain_is_fifo_and_respects_budget() {
    let log = Log::default();
    let mut queue = OutboundDispatchQueue::new();
    for name in ["a", "b", "c"] {
        queue.enqueue(telemetry(&log, name)).unwrap();
    }

    let mut order = Vec::new();
    let sent = queue
        .drain(2, Instant::now(), |p| {
            order.push(body_of(p));
            Ok(Disposition::Completed(StatusCode::Ok))
        })
        .unwrap();

    assert_eq!(sent, 2);
    assert_eq!(order, vec!["a", "b"]);
    assert_eq!(queue.waiting_len(), 1);
}

#[test]
fn expired_packets_never_reach_the_wire() {
    let log = Log::default();
    let mut queue = OutboundDispatchQueue::new();
    let now = Instant::now();

    let expiring = telemetry(&log, "old");
    let expiring = Packet {
        message: expiring.message.clone().with_expires_at(now + Duration::from_millis(5)),
        ..expiring
    };
    queue.enqueue(expiring).unwrap();
    queue.enqueue(telemetry(&log, "fresh")).unwrap();

    // Enqueued while still live, drained after it aged out
    let later = now + Duration::from_secs(1);
    let mut wire = Vec::new();
    queue
        .drain(10, later, |p| {
            wire.push(body_of(p));
            Ok(Disposition::Completed(StatusCode::Ok))
        })
        .unwrap();
    deliver(&mut queue);

    assert_eq!(wire, vec!["fresh"]);
    let log = log.lock().unwrap();
    assert_eq!(log[0], ("old".to_string(), StatusCode::MessageExpired));
    assert_eq!(log[1], ("fresh".to_string(), StatusCode::Ok));
}

#[test]
fn retryable_error_returns_packet_to_front_of_waiting() {
    let log = Log::default();
    let mut queue = OutboundDispatchQueue::new();
    queue.enqueue(telemetry(&log, "a")).unwrap();
    queue.enqueue(telemetry(&log, "b")).unwrap();

    let err = queue
        .drain(10, Instant::now(), |_| Err(NetError::WriteError.into()))
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(queue.waiting_len(), 2);
    assert_eq!(queue.in_progress_len(), 0);
    assert_eq!(queue.callbacks_len(), 0);

    let mut order = Vec::new();
    queue
        .drain(10, Instant::now(), |p| {
            order.push(body_of(p));
            Ok(Disposition::Completed(StatusCode::Ok))
        })
        .unwrap();
    assert_eq!(order, vec!["a", "b"]);
}

#[test]
fn non_retryable_error_resolves_with_error_and_continues() {
    let log = Log::default();
    let mut queue = OutboundDispatchQueue::new();
    queue.enqueue(telemetry(&log, "bad")).unwrap();
    queue.enqueue(telemetry(&log, "good")).unwrap();

    let sent = queue
        .drain(10, Instant::now(), |p| {
            if body_of(p) == "bad" {
                Err(NetError::ProtocolError.into())
            } else {
                Ok(Disposition::Completed(StatusCode::Ok))
            }
        })
        .unwrap();
    deliver(&mut queue);

    assert_eq!(sent, 2);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("bad".to_string(), StatusCode::Error),
            ("good".to_string(), StatusCode::Ok)
        ]
    );
}

#[test]
fn awaiting_packets_resolve_by_request_id() {
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let mut queue = OutboundDispatchQueue::new();
    queue
        .enqueue(
            Packet::new(Operation::TwinGet, Message::default())
                .with_request_id("7")
                .on_result(move |status, body| {
                    *sink.lock().unwrap() = Some((status, body.map(<[u8]>::to_vec)));
                }),
        )
        .unwrap();

    queue
        .drain(10, Instant::now(), |_| Ok(Disposition::AwaitResponse))
        .unwrap();
    assert_eq!(queue.in_progress_len(), 1);

    assert!(!queue.complete_request("8", StatusCode::Ok, None));
    assert!(queue.complete_request("7", StatusCode::Ok, Some(b"{}".to_vec())));
    deliver(&mut queue);

    assert_eq!(
        *seen.lock().unwrap(),
        Some((StatusCode::Ok, Some(b"{}".to_vec())))
    );
    assert!(queue.is_empty());
}

#[test]
fn twin_request_without_request_id_is_rejected() {
    let mut queue = OutboundDispatchQueue::new();
    let err = queue
        .enqueue(Packet::new(Operation::TwinGet, Message::default()))
        .unwrap_err();
    assert!(matches!(err, Error::MissingRequestId(Operation::TwinGet)));
    assert!(queue.is_empty());
}

#[test]
fn cancel_all_resolves_waiting_and_in_progress_exactly_once() {
    let log = Log::default();
    let mut queue = OutboundDispatchQueue::new();
    for name in ["a", "b", "c"] {
        queue.enqueue(telemetry(&log, name)).unwrap();
    }
    queue
        .drain(1, Instant::now(), |_| Ok(Disposition::AwaitResponse))
        .unwrap();
    assert_eq!(queue.in_progress_len(), 1);

    assert_eq!(queue.cancel_all(), 3);
    deliver(&mut queue);
    // A second cancel finds nothing left
    assert_eq!(queue.cancel_all(), 0);
    deliver(&mut queue);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|(_, s)| *s == StatusCode::MessageCancelledOnClose));
    drop(log);

    assert!(matches!(
        queue.enqueue(telemetry(&Log::default(), "late")),
        Err(Error::Closed)
    ));
    assert!(matches!(
        queue.drain(1, Instant::now(), |_| Ok(Disposition::AwaitResponse)),
        Err(Error::Closed)
    ));
}

#[test]
fn requeue_in_progress_preserves_order_ahead_of_waiting() {
    let log = Log::default();
    let mut queue = OutboundDispatchQueue::new();
    for name in ["a", "b", "c"] {
        queue.enqueue(telemetry(&log, name)).unwrap();
    }
    queue
        .drain(2, Instant::now(), |_| Ok(Disposition::AwaitResponse))
        .unwrap();

    assert_eq!(queue.requeue_in_progress(), 2);
    assert_eq!(queue.requeue_in_progress(), 0);

    let mut order = Vec::new();
    queue
        .drain(10, Instant::now(), |p| {
            order.push(body_of(p));
            Ok(Disposition::Completed(StatusCode::Ok))
        })
        .unwrap();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[test]
fn status_codes_map_from_service_codes() {
    assert_eq!(StatusCode::from_http(200), StatusCode::Ok);
    assert_eq!(StatusCode::from_http(204), StatusCode::OkEmpty);
    assert_eq!(StatusCode::from_http(412), StatusCode::PreconditionFailed);
    assert_eq!(StatusCode::from_http(429), StatusCode::ThrottlingExceeded);
    assert_eq!(StatusCode::from_http(418), StatusCode::Error);
    assert!(StatusCode::OkEmpty.is_success());
    assert!(!StatusCode::MessageExpired.is_success());
}
