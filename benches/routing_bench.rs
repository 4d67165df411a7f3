//! Routing core benchmarks for batmand

use batmand::collections::{HashTable, LinkWindow};
use batmand::network::{BatmanIf, RecordingRouteTable, RecordingTunnel};
use batmand::protocol::{OgmHeader, COMPAT_VERSION};
use batmand::routing::{RoutingSettings, RoutingState};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::net::Ipv4Addr;

fn benchmark_window_record(c: &mut Criterion) {
    c.bench_function("window_record_in_order", |b| {
        let mut window = LinkWindow::new();
        b.iter(|| {
            let new = window.record(black_box(1), true);
            black_box((new, window.popcount()))
        })
    });

    c.bench_function("window_shift_across_words", |b| {
        let mut window = LinkWindow::new();
        for bit in (0..64).step_by(3) {
            window.mark(bit);
        }
        b.iter(|| {
            let mut copy = window;
            copy.shift(black_box(37));
            black_box(copy)
        })
    });
}

fn benchmark_hash_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_table");

    for count in [128u32, 1024, 8192] {
        group.bench_with_input(BenchmarkId::new("insert_grow", count), &count, |b, &count| {
            b.iter(|| {
                let mut table = HashTable::new(128);
                for i in 0..count {
                    let _ = table.insert(Ipv4Addr::from(0x0a00_0000 + i), i);
                    table.grow_if_needed();
                }
                black_box(table.len())
            })
        });

        let mut table = HashTable::new(128);
        for i in 0..count {
            let _ = table.insert(Ipv4Addr::from(0x0a00_0000 + i), i);
            table.grow_if_needed();
        }
        group.bench_with_input(BenchmarkId::new("find", count), &table, |b, table| {
            let mut i = 0u32;
            b.iter(|| {
                i = (i + 7919) % count;
                black_box(table.find(&Ipv4Addr::from(0x0a00_0000 + i)))
            })
        });
    }

    group.finish();
}

fn benchmark_update_originator(c: &mut Criterion) {
    let mut state = RoutingState::new(
        RoutingSettings::default(),
        vec![BatmanIf::new(0, "mesh0", Ipv4Addr::new(10, 0, 0, 1), 24)],
        Box::new(RecordingRouteTable::new()),
        Box::new(RecordingTunnel::new()),
    );
    let neighbors: Vec<Ipv4Addr> = (2..6).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();
    let mut seqno = 0u16;

    c.bench_function("update_originator_four_neighbors", |b| {
        b.iter(|| {
            seqno = seqno.wrapping_add(1);
            let header = OgmHeader {
                orig: Ipv4Addr::new(10, 0, 1, 9),
                flags: 0,
                ttl: 50,
                seqno,
                gwflags: 0,
                version: COMPAT_VERSION,
                tq: 255,
                hna_len: 0,
            };
            for neighbor in &neighbors {
                state.update_originator(&header, &[], *neighbor, 0, seqno as u64);
            }
            black_box(state.originators().len())
        })
    });
}

criterion_group!(
    benches,
    benchmark_window_record,
    benchmark_hash_table,
    benchmark_update_originator
);
criterion_main!(benches);
