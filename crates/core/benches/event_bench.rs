//! 이벤트 모델 벤치마크
//!
//! LogEvent 생성, dot-path 접근, 템플릿 포맷, JSON 직렬화 성능을 측정합니다.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use logferry_core::event::LogEvent;
use serde_json::{json, Map, Value};

fn sample_extra() -> Map<String, Value> {
    match json!({
        "host": "web-server-01",
        "app": "nginx",
        "http": {"method": "GET", "path": "/api/v1/users", "status": 200},
        "duration_ms": 125,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn bench_event_creation(c: &mut Criterion) {
    let extra = sample_extra();

    let mut group = c.benchmark_group("event_creation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("new", |b| {
        b.iter(|| LogEvent::new(black_box("GET /api/v1/users HTTP/1.1 200 OK")))
    });

    group.bench_function("with_extra", |b| {
        b.iter(|| LogEvent::new("GET /api/v1/users").with_extra(black_box(extra.clone())))
    });

    group.finish();
}

fn bench_field_access(c: &mut Criterion) {
    let event = LogEvent::new("x").with_extra(sample_extra());

    let mut group = c.benchmark_group("field_access");
    group.bench_function("get_nested", |b| {
        b.iter(|| black_box(&event).get(black_box("http.status")))
    });
    group.bench_function("format_template", |b| {
        b.iter(|| black_box(&event).format(black_box("%{app}-%{http.status}-%{+YYYY.MM.dd}")))
    });
    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut event = LogEvent::new("GET /api/v1/users HTTP/1.1 200 OK").with_extra(sample_extra());
    event.add_tag("parsed");
    let bytes = event.to_json_bytes().unwrap();

    let mut group = c.benchmark_group("serialization");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("to_json_bytes", |b| {
        b.iter(|| black_box(&event).to_json_bytes().unwrap())
    });

    group.bench_function("from_object", |b| {
        b.iter(|| {
            let value: Value = serde_json::from_slice(black_box(&bytes)).unwrap();
            match value {
                Value::Object(map) => LogEvent::from_object(map, None),
                _ => unreachable!(),
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_event_creation,
    bench_field_access,
    bench_serialization
);
criterion_main!(benches);
