use std::{hint::black_box, sync::Arc, time::Duration};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use zcast::{BroadcastChannel, ChannelOptions, MemoryBroker, Subscription, SubscriptionSettings};

fn channel(
    broker: &MemoryBroker,
    capacity: usize,
) -> BroadcastChannel {
    BroadcastChannel::with_options(
        Arc::new(broker.clone()),
        ChannelOptions {
            use_sharded_pubsub: Some(false),
            subscription: SubscriptionSettings {
                queue_capacity: capacity,
                poll_interval_ms: 5,
                join_timeout_ms: 1000,
            },
        },
    )
    .unwrap()
}

fn bench_publish_0_sub(c: &mut Criterion) {
    let broker = MemoryBroker::new();
    let topic = channel(&broker, 1024).topic("chan");
    c.bench_function("publish_0_subs", |b| {
        b.iter(|| {
            topic
                .as_producer()
                .publish(black_box(Bytes::from_static(b"x")))
                .unwrap();
        })
    });
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fan_out");
    for subs in [1usize, 10, 100] {
        let broker = MemoryBroker::new();
        let topic = channel(&broker, 1 << 16).topic("chan");
        // создаём подписки заранее
        let _subs: Vec<Subscription> = (0..subs)
            .map(|_| {
                let sub = topic.as_subscriber().subscribe();
                sub.start().unwrap();
                sub
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(subs), &subs, |b, _| {
            b.iter(|| {
                topic
                    .as_producer()
                    .publish(black_box(Bytes::from_static(b"x")))
                    .unwrap();
            })
        });
    }
    group.finish();
}

fn bench_publish_receive(c: &mut Criterion) {
    let broker = MemoryBroker::new();
    let topic = channel(&broker, 1024).topic("chan");
    let sub = topic.as_subscriber().subscribe();
    sub.start().unwrap();

    c.bench_function("publish_then_receive", |b| {
        b.iter(|| {
            topic
                .as_producer()
                .publish(Bytes::from_static(b"payload"))
                .unwrap();
            black_box(sub.receive(Some(Duration::from_secs(1))).unwrap());
        })
    });
}

fn bench_subscribe_start_close(c: &mut Criterion) {
    let broker = MemoryBroker::new();
    let topic = channel(&broker, 16).topic("chan");
    c.bench_function("subscribe_start_close", |b| {
        b.iter(|| {
            let sub = topic.as_subscriber().subscribe();
            sub.start().unwrap();
            sub.close();
        })
    });
}

criterion_group!(
    benches,
    bench_publish_0_sub,
    bench_publish_fan_out,
    bench_publish_receive,
    bench_subscribe_start_close
);
criterion_main!(benches);
