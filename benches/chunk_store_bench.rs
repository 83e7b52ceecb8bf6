use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vaultfs::device::InMemoryDevice;
use vaultfs::{allocator::SpaceAllocator, chunk::ChunkTable};

fn bench_chunk_insert(c: &mut Criterion) {
    let data = vec![0x42u8; 4096];

    c.bench_function("insert_chunk_4kb_compressible", |b| {
        b.iter(|| {
            let device = InMemoryDevice::new(1 << 20);
            let mut alloc = SpaceAllocator::new(0, 1 << 20, 512);
            let mut table = ChunkTable::default();
            table
                .insert_chunk(&mut alloc, &device, black_box(&data), 2, 100)
                .unwrap();
        })
    });

    let random: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    c.bench_function("insert_chunk_4kb_high_entropy", |b| {
        b.iter(|| {
            let device = InMemoryDevice::new(1 << 20);
            let mut alloc = SpaceAllocator::new(0, 1 << 20, 512);
            let mut table = ChunkTable::default();
            table
                .insert_chunk(&mut alloc, &device, black_box(&random), 2, 100)
                .unwrap();
        })
    });
}

fn bench_chunk_read_with_repair(c: &mut Criterion) {
    let data = vec![0x7eu8; 4096];
    let device = InMemoryDevice::new(1 << 20);
    let mut alloc = SpaceAllocator::new(0, 1 << 20, 512);
    let mut table = ChunkTable::default();
    let out = table
        .insert_chunk(&mut alloc, &device, &data, 2, 100)
        .unwrap();
    let record = table.get(&out.id).unwrap().clone();

    c.bench_function("read_chunk_clean", |b| {
        b.iter(|| vaultfs::chunk::read_chunk(&device, black_box(&out.id), black_box(&record)).unwrap())
    });
}

criterion_group!(benches, bench_chunk_insert, bench_chunk_read_with_repair);
criterion_main!(benches);
