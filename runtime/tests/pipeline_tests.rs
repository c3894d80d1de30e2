//! End-to-end: publisher and subscriber sharing one in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use eda_core::context::Context;
use eda_core::envelope::EventEnvelope;
use eda_core::event::{DomainEvent, EventType, OrderCreated, OrderLine};
use eda_core::handler::{HandlerError, HandlerRegistry, handler_fn};
use eda_runtime::{Publisher, Subscriber, SubscriberConfig};
use eda_testing::{InMemoryBroker, init_test_tracing};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn order_created_flows_from_publisher_to_handler() {
    init_test_tracing();
    let broker = InMemoryBroker::new();
    let group = "inventory-service-group";
    let topic = "order_created";

    let (producer, reports) = broker.producer();
    let publisher = Publisher::new(producer, reports, tracing::info_span!("publisher"));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new().with_handler(
        topic,
        handler_fn(move |_ctx, record| {
            let events = events_tx.clone();
            async move {
                let envelope = EventEnvelope::decode(record.value())?;
                assert_eq!(envelope.event_type(), EventType::OrderCreated);
                events.send((record.key_lossy(), envelope.into_event()?)).ok();
                Ok::<(), HandlerError>(())
            }
        }),
    );
    let mut subscriber = Subscriber::new(
        broker.consumer(group),
        registry,
        tracing::info_span!("subscriber", group),
    )
    .with_config(SubscriberConfig::default().poll_timeout(Duration::from_millis(10)));
    subscriber.subscribe(&[topic]).unwrap();
    assert_eq!(broker.committed_offset(group, topic, 0), None);

    let cancel = CancellationToken::new();
    let (errors_tx, _errors_rx) = mpsc::channel(1);
    let handle = subscriber.spawn(cancel.clone(), errors_tx);

    let event = DomainEvent::from(OrderCreated::new("order-1", vec![OrderLine::new("p1", 2)]));
    let ctx = Context::background().with_timeout(Duration::from_secs(5));
    publisher
        .publish_event(&ctx, topic, "order-1", &event)
        .await
        .unwrap();

    let (key, received) = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "order-1");
    match &received {
        DomainEvent::OrderCreated(order) => {
            assert_eq!(order.order_id, "order-1");
            assert_eq!(order.items, vec![OrderLine::new("p1", 2)]);
        },
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(received, event);

    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.committed_offset(group, topic, 0) != Some(1) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("offset committed");

    cancel.cancel();
    handle.await.unwrap();
    publisher.close().await;

    assert!(events_rx.try_recv().is_err(), "exactly one record expected");
    assert_eq!(broker.committed_offset(group, topic, 0), Some(1));
}
