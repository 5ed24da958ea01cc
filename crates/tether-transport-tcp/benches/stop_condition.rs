use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tether_transport_tcp::{ByteCount, StopCondition, Substring};

/// 比较两种停止条件在典型响应头上的扫描开销。
///
/// `Substring` 模拟逐块到达：每次只多给 64 字节，并利用续扫提示跳过已扫描前缀。
fn bench_stop_conditions(c: &mut Criterion) {
    let mut head = String::from("HTTP/1.1 200 OK\r\n");
    for i in 0..32 {
        head.push_str(&format!("X-Header-{i}: some-value-{i}\r\n"));
    }
    head.push_str("\r\nbody");
    let bytes = head.into_bytes();

    c.bench_function("substring_incremental", |b| {
        b.iter(|| {
            let mut condition = Substring::new("\r\n\r\n").expect("非空分隔串");
            let mut scanned = 0;
            let mut available = 0;
            loop {
                available = (available + 64).min(bytes.len());
                let (position, matched) = condition.evaluate(&bytes[scanned..available]);
                if matched {
                    break black_box(scanned + position);
                }
                scanned += position;
            }
        })
    });

    c.bench_function("byte_count", |b| {
        b.iter(|| ByteCount::new(black_box(512)).evaluate(black_box(&bytes)))
    });
}

criterion_group!(stop_condition_benches, bench_stop_conditions);
criterion_main!(stop_condition_benches);
