use criterion::{Criterion, black_box, criterion_group, criterion_main};

use frameflow_core::index_pool::IndexPool;
use frameflow_core::pool::{ObjectPool, PoolError, Poolable};

// ---------------------------------------------------------------------------
// Index pool
// ---------------------------------------------------------------------------

fn bench_index_pool_fill(c: &mut Criterion) {
    c.bench_function("index_pool_fill_4096", |b| {
        b.iter(|| {
            let mut pool = IndexPool::new(4096);
            while let Ok(index) = pool.allocate() {
                black_box(index);
            }
        });
    });
}

fn bench_index_pool_churn(c: &mut Criterion) {
    let mut pool = IndexPool::new(1024);
    c.bench_function("index_pool_alloc_free", |b| {
        b.iter(|| {
            let index = pool.allocate().unwrap();
            pool.deallocate(black_box(index));
        });
    });
}

// ---------------------------------------------------------------------------
// Object pool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Commands {
    words: Vec<u32>,
}

impl Poolable for Commands {
    fn reset(&mut self) {
        self.words.clear();
    }
}

fn bench_object_pool_reuse(c: &mut Criterion) {
    let pool = ObjectPool::<Commands>::new("bench", 16);
    c.bench_function("object_pool_acquire_recycle", |b| {
        b.iter(|| {
            let mut handle = pool
                .acquire(|| Ok::<_, PoolError>(Commands::default()))
                .unwrap();
            handle.words.push(black_box(7));
        });
    });
}

criterion_group!(
    benches,
    bench_index_pool_fill,
    bench_index_pool_churn,
    bench_object_pool_reuse,
);
criterion_main!(benches);
