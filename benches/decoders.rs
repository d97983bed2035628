//! Benchmarks for the hot paths: advertisement decoding, serial frame
//! reassembly and routing an advertisement into the Prometheus sink.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use switchbot_mhz19_exporter::serial::frame::FrameAssembler;
use switchbot_mhz19_exporter::{
    Advertisement, DeviceEntry, MacAddress, PrometheusSink, Roster, TelemetryRouter, decode,
};

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// 22.1 °C, 50 % humidity
fn thermometer_payload() -> Vec<u8> {
    vec![
        0x69, 0x09, 0x4A, 0x5F, 0x10, 0x22, 0x03, 0x64, 0x00, 0x01, 0x01, 0x96, 0x32,
    ]
}

/// 300 ppm response preceded by line noise
fn noisy_response() -> Vec<u8> {
    vec![
        0x00, 0x13, 0x37, 0xFF, 0x86, 0x01, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x4D,
    ]
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let payload = thermometer_payload();
    group.bench_function("thermometer", |b| b.iter(|| decode(black_box(&payload))));

    let apple = vec![0x4C, 0x00, 0x02, 0x15];
    group.bench_function("not_applicable", |b| b.iter(|| decode(black_box(&apple))));

    group.finish();
}

fn bench_frame_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_assembly");
    let response = noisy_response();

    for chunk in [1, 4, response.len()] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            let mut assembler = FrameAssembler::new();
            b.iter(|| {
                assembler.reset();
                for part in response.chunks(chunk) {
                    assembler.push(black_box(part));
                }
                black_box(assembler.take_frame())
            })
        });
    }

    group.finish();
}

fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    let entries = [DeviceEntry {
        address: TEST_MAC.to_string(),
        name: "Kitchen".to_string(),
    }];
    let roster = Roster::from_entries(&entries).unwrap();
    let sink = Arc::new(PrometheusSink::new(PrometheusBuilder::new().build_recorder()));
    let router = TelemetryRouter::new(roster, sink);

    let known = Advertisement {
        address: TEST_MAC,
        rssi: Some(-60),
        manufacturer_data: thermometer_payload(),
        local_name: None,
    };
    let unknown = Advertisement {
        address: MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
        ..known.clone()
    };

    group.throughput(Throughput::Elements(1));
    group.bench_function("known_device", |b| {
        b.iter(|| router.handle_advertisement(black_box(&known)))
    });
    group.bench_function("unknown_device", |b| {
        b.iter(|| router.handle_advertisement(black_box(&unknown)))
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_frame_assembly, bench_router);
criterion_main!(benches);
