use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use liveboard_collab::composer::diff::{compute_edit, trim_input};
use liveboard_collab::composer::{ComposerConfig, PostComposer};
use liveboard_collab::context::{Context, MemoryTransport};
use liveboard_collab::dispatch::Dispatcher;
use liveboard_collab::protocol::{ClientMessage, ServerMessage, SpliceRequest};
use liveboard_core::{Post, PostRegistry, ThreadRegistry};

fn long_body() -> String {
    "The quick brown fox jumps over the lazy dog. 日本語 😀\n".repeat(36)
}

fn bench_diff_append(c: &mut Criterion) {
    let old = long_body();
    let mut new = old.clone();
    new.push('x');

    c.bench_function("diff_append_2kB", |b| {
        b.iter(|| black_box(compute_edit(black_box(&old), black_box(&new))))
    });
}

fn bench_diff_middle_splice(c: &mut Criterion) {
    let old = long_body();
    let new = old.replacen("lazy", "sleepy", 1);

    c.bench_function("diff_splice_2kB", |b| {
        b.iter(|| black_box(compute_edit(black_box(&old), black_box(&new))))
    });
}

fn bench_trim(c: &mut Criterion) {
    let input = long_body().repeat(4);

    c.bench_function("trim_8kB", |b| {
        b.iter(|| black_box(trim_input(black_box(&input), 2000, 100)))
    });
}

fn bench_codec(c: &mut Criterion) {
    let splice = ClientMessage::Splice(SpliceRequest {
        start: 120,
        len: 4,
        text: "sleepy".into(),
    });
    c.bench_function("encode_splice", |b| {
        b.iter(|| black_box(splice.encode().unwrap()))
    });

    let frames: Vec<String> = (0..64).map(|i| format!("02[1,{}]", 97 + i % 26)).collect();
    let concat = ServerMessage::Concat(frames).encode().unwrap();
    c.bench_function("decode_concat_64", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&concat)).unwrap()))
    });
}

fn bench_dispatch_append(c: &mut Criterion) {
    let registry = Arc::new(ThreadRegistry::new());
    let ctx = Context::new(registry.clone(), Arc::new(MemoryTransport::new()), "a", 1);
    let dispatcher = Dispatcher::new(ctx);
    registry.insert(Post {
        id: 1,
        op: 1,
        editing: true,
        ..Post::default()
    });

    c.bench_function("dispatch_append", |b| {
        b.iter(|| {
            dispatcher.dispatch_frame(black_box("02[1,97]")).unwrap();
            dispatcher.dispatch_frame(black_box("031")).unwrap();
        })
    });
}

fn bench_typing_session(c: &mut Criterion) {
    let text = long_body();

    c.bench_function("compose_typing_2kB", |b| {
        b.iter(|| {
            let transport = Arc::new(MemoryTransport::new());
            let ctx = Context::new(Arc::new(ThreadRegistry::new()), transport.clone(), "a", 1);
            let composer = PostComposer::new(ctx, ComposerConfig::default());
            composer.submit_edit("T").unwrap();
            composer.receive_id(1).unwrap();
            let mut input = String::new();
            for ch in text.chars() {
                input.push(ch);
                composer.submit_edit(&input).unwrap();
            }
            black_box(transport.take().len())
        })
    });
}

criterion_group!(
    benches,
    bench_diff_append,
    bench_diff_middle_splice,
    bench_trim,
    bench_codec,
    bench_dispatch_append,
    bench_typing_session,
);
criterion_main!(benches);
