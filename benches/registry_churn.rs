use core::ptr::NonNull;

use criterion::{Criterion, criterion_group, criterion_main};
use lethe::{WeakCell, WeakTable};

fn registry_churn(c: &mut Criterion) {
    // leaked so every object and cell has a stable address for the whole run
    let objects: Vec<NonNull<()>> = (0..1024)
        .map(|_| NonNull::from(Box::leak(Box::new(0u64))).cast())
        .collect();
    let cells: Vec<&'static WeakCell> = (0..1024)
        .map(|_| &*Box::leak(Box::new(WeakCell::new())))
        .collect();

    c.bench_function("register_unregister_1k", |b| {
        let mut table = WeakTable::new();
        b.iter(|| {
            for (object, cell) in objects.iter().zip(&cells) {
                unsafe { table.register(object.as_ptr(), NonNull::from(*cell), true) };
            }
            for (object, cell) in objects.iter().zip(&cells) {
                table.unregister(object.as_ptr(), NonNull::from(*cell));
            }
        });
    });

    c.bench_function("clear_64_referrers", |b| {
        let mut table = WeakTable::new();
        let target = objects[0];
        b.iter(|| {
            for cell in &cells[..64] {
                unsafe { table.register(target.as_ptr(), NonNull::from(*cell), true) };
            }
            unsafe { table.clear(target) };
        });
    });
}

criterion_group!(benches, registry_churn);
criterion_main!(benches);
