use std::any::{Any, TypeId};
use std::rc::Rc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use fury_core::class_resolver::ClassResolver;
use fury_core::generics::{GenericType, GenericsStack};
use fury_core::map_codec::{read_map, write_map, HashMapFactory, MapReadCall, MapWriteCall};
use fury_core::ref_resolver::RefResolver;
use fury_core::serializer::{I32Serializer, StringSerializer};
use fury_core::{Buffer, FuryConfig};

type Entry = (Option<Rc<dyn Any>>, Option<Rc<dyn Any>>);

fn resolver() -> ClassResolver {
    let mut resolver = ClassResolver::new(&FuryConfig::new());
    resolver.register(TypeId::of::<String>(), 0, Rc::new(StringSerializer));
    resolver.register(TypeId::of::<i32>(), 1, Rc::new(I32Serializer));
    resolver
}

fn calls() -> (MapWriteCall, MapReadCall) {
    let key_generic = Some(GenericType::monomorphic(TypeId::of::<String>()));
    let value_generic = Some(GenericType::monomorphic(TypeId::of::<i32>()));
    (
        MapWriteCall {
            key_generic: key_generic.clone(),
            value_generic: value_generic.clone(),
            ..Default::default()
        },
        MapReadCall { key_generic, value_generic, ..Default::default() },
    )
}

fn homogeneous_entries(n: usize) -> Vec<Entry> {
    (0..n)
        .map(|i| {
            (
                Some(Rc::new(format!("key-{i}")) as Rc<dyn Any>),
                Some(Rc::new(i as i32) as Rc<dyn Any>),
            )
        })
        .collect()
}

fn encode(entries: &[Entry], class_resolver: &ClassResolver) -> Vec<u8> {
    let (write_call, _) = calls();
    let mut buf = Buffer::new();
    let mut ref_resolver = RefResolver::new();
    let mut generics = GenericsStack::new();
    write_map(&mut buf, entries, write_call, class_resolver, &mut ref_resolver, &mut generics).unwrap();
    buf.into_bytes()
}

fn bench_map_codec(c: &mut Criterion) {
    const N: usize = 100_000;
    let class_resolver = resolver();
    let entries = homogeneous_entries(N);
    let encoded = encode(&entries, &class_resolver);

    let mut group = c.benchmark_group("map_codec");
    group.throughput(criterion::Throughput::Elements(N as u64));

    group.bench_function("write_homogeneous_monomorphic_100k", |b| {
        b.iter(|| {
            let bytes = encode(&entries, &class_resolver);
            std::hint::black_box(bytes);
        });
    });

    group.bench_function("read_homogeneous_monomorphic_100k", |b| {
        b.iter(|| {
            let (_, read_call) = calls();
            let mut read_buf = Buffer::from_bytes(encoded.clone());
            let mut ref_resolver = RefResolver::new();
            let mut generics = GenericsStack::new();
            let factory = HashMapFactory::<String, i32>::default();
            let container = read_map(
                &mut read_buf,
                read_call,
                &factory,
                &class_resolver,
                &mut ref_resolver,
                &mut generics,
            )
            .unwrap();
            std::hint::black_box(container);
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().warm_up_time(Duration::from_secs(1)).sample_size(10);
    targets = bench_map_codec
}
criterion_main!(benches);
