pub mod compile_queue;
pub mod root_marking;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    compile_queue::bench(c);
    root_marking::bench(c);
}
