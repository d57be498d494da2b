//! Benchmarks for graph building and block rendering.
//!
//! Measures transform cost for deep and wide graphs, then per-block render
//! cost for the sequential and the multi-threaded player across block sizes.
//!
//! Run with: `cargo bench -p cadence-graph -- player/`

#![allow(missing_docs)]

use std::sync::Arc;

use cadence_graph::nodes::{GainNode, LatencyNode, SinNode, SummingNode};
use cadence_graph::{
    AudioBuffer, BufferSize, ExecutionPlan, MidiBuffer, MultiThreadedNodePlayer, NodeGraph,
    NodeId, NodePlayer, NodeRenderer, PlayHead, SampleRange, ThreadPool, ThreadPoolConfig,
};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK_SIZES: &[usize] = &[64, 128, 256, 512, 1024];
const CHANNELS: usize = 2;

// ---------------------------------------------------------------------------
// Graph constructors
// ---------------------------------------------------------------------------

/// Sine followed by `depth` gain stages.
fn make_deep(depth: usize) -> ExecutionPlan {
    let mut graph = NodeGraph::new();
    let mut prev = graph.add(SinNode::new(NodeId(1), 220.0, CHANNELS));
    for i in 0..depth {
        prev = graph.add(GainNode::new(NodeId(i as u64 + 2), prev, 0.99));
    }
    graph.build(prev).unwrap()
}

/// `width` independent sine-gain branches mixed into one output, every
/// other branch delayed so the transform has latency to balance.
fn make_wide(width: usize) -> ExecutionPlan {
    let mut graph = NodeGraph::new();
    let mut branches = Vec::with_capacity(width);
    for i in 0..width {
        let base = (i as u64 + 1) * 10;
        let sine = graph.add(SinNode::new(NodeId(base), 110.0 * (i + 1) as f64, CHANNELS));
        let gain = graph.add(GainNode::new(NodeId(base + 1), sine, 1.0 / width as f32));
        let branch = if i % 2 == 0 {
            graph.add(LatencyNode::new(NodeId(base + 2), gain, 32))
        } else {
            gain
        };
        branches.push(branch);
    }
    let root = graph.add(SummingNode::new(NodeId(1), branches));
    graph.build(root).unwrap()
}

fn render_block(player: &mut dyn NodeRenderer, block: usize, position: &mut i64, out: &mut AudioBuffer, midi: &mut MidiBuffer) {
    let range = SampleRange::with_length(*position, block);
    player.process(range, out.as_block_mut(), midi);
    *position += block as i64;
    black_box(out.channel(0));
}

// ---------------------------------------------------------------------------
// Build benchmarks
// ---------------------------------------------------------------------------

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("player/build");

    for &size in &[8usize, 64, 256] {
        group.bench_with_input(BenchmarkId::new("deep", size), &size, |b, &size| {
            b.iter(|| black_box(make_deep(size)));
        });
        group.bench_with_input(BenchmarkId::new("wide", size), &size, |b, &size| {
            b.iter(|| black_box(make_wide(size)));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Sequential player
// ---------------------------------------------------------------------------

fn bench_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("player/single");

    for &block in BLOCK_SIZES {
        let play_head = Arc::new(PlayHead::new());
        play_head.play();
        let mut player = NodePlayer::new(play_head);
        player.prepare_to_play(SAMPLE_RATE, block);
        player.set_plan(make_wide(16));

        let mut out = AudioBuffer::new(BufferSize::new(CHANNELS, block));
        let mut midi = MidiBuffer::default();
        let mut position = 0i64;

        group.bench_with_input(BenchmarkId::new("wide_16", block), &block, |b, &block| {
            b.iter(|| render_block(&mut player, block, &mut position, &mut out, &mut midi));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Multi-threaded player
// ---------------------------------------------------------------------------

fn bench_multi(c: &mut Criterion) {
    let mut group = c.benchmark_group("player/multi");
    let threads = Arc::new(ThreadPool::new(ThreadPoolConfig::default()).unwrap());

    for &block in BLOCK_SIZES {
        let play_head = Arc::new(PlayHead::new());
        play_head.play();
        let mut player = MultiThreadedNodePlayer::new(play_head, Arc::clone(&threads));
        player.prepare_to_play(SAMPLE_RATE, block);
        player.set_plan(make_wide(16));

        let mut out = AudioBuffer::new(BufferSize::new(CHANNELS, block));
        let mut midi = MidiBuffer::default();
        let mut position = 0i64;

        group.bench_with_input(BenchmarkId::new("wide_16", block), &block, |b, &block| {
            b.iter(|| render_block(&mut player, block, &mut position, &mut out, &mut midi));
        });
    }

    // Deep chains have no parallelism; this measures scheduling overhead.
    {
        let play_head = Arc::new(PlayHead::new());
        play_head.play();
        let mut player = MultiThreadedNodePlayer::new(play_head, Arc::clone(&threads));
        player.prepare_to_play(SAMPLE_RATE, 256);
        player.set_plan(make_deep(32));

        let mut out = AudioBuffer::new(BufferSize::new(CHANNELS, 256));
        let mut midi = MidiBuffer::default();
        let mut position = 0i64;

        group.bench_function("deep_32_block256", |b| {
            b.iter(|| render_block(&mut player, 256, &mut position, &mut out, &mut midi));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_build, bench_single, bench_multi);
criterion_main!(benches);
