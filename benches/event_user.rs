use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use flag_events::{
    EvaluationDetail, EvaluationReason, EventFactory, EventUser, EventsConfig, FlagEventProperties,
    User,
};

fn criterion_benchmark(c: &mut Criterion) {
    let user = User::builder("user-key")
        .email("test@example.com")
        .as_private_attribute()
        .name("Test User")
        .country("US")
        .custom("plan", "enterprise")
        .custom("seats", 42)
        .as_private_attribute()
        .build()
        .unwrap();

    {
        let mut group = c.benchmark_group("event-user");
        group.throughput(Throughput::Elements(1));

        let config = EventsConfig::new("sdk-key");
        group.bench_function("from_user", |b| {
            b.iter(|| EventUser::from_user(black_box(&user), black_box(&config)))
        });

        let config = EventsConfig::new("sdk-key").with_all_attributes_private(true);
        group.bench_function("from_user_all_private", |b| {
            b.iter(|| EventUser::from_user(black_box(&user), black_box(&config)))
        });

        let event_user = EventUser::from_user(&user, &EventsConfig::new("sdk-key"));
        group.bench_function("serialize", |b| {
            b.iter(|| serde_json::to_vec(black_box(&event_user)))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("event-factory");
        group.throughput(Throughput::Elements(1));

        let factory = EventFactory::new(true);
        let flag = FlagEventProperties::new("flag-key")
            .with_version(3)
            .with_track_events(true);
        let user = Arc::new(user);
        group.bench_function("new_feature_request_event", |b| {
            b.iter(|| {
                factory.new_feature_request_event(
                    black_box(&flag),
                    black_box(Some(Arc::clone(&user))),
                    EvaluationDetail::new(
                        json!("on"),
                        Some(1),
                        Some(EvaluationReason::Fallthrough),
                    ),
                    black_box(Some(json!("off"))),
                )
            })
        });
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
