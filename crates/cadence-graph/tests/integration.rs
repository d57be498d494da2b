//! End-to-end tests through the public player API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cadence_graph::nodes::{
    FunctionNode, GainNode, LatencyNode, MidiForwardNode, MidiOutputQueue, MidiSequenceNode,
    SequencedEvent, SinNode, SummingNode,
};
use cadence_graph::{
    AudioBuffer, BlockInfo, BufferSize, ExecutionPlan, GraphError, MidiBuffer, MidiMessage,
    MultiThreadedNodePlayer, Node, NodeGraph, NodeId, NodeKey, NodePlayer, NodeProperties,
    NodeRenderer, PlayHead, PlaybackInitialisationInfo, ProcessContext, SampleRange, ThreadPool,
    ThreadPoolConfig,
};

// --- Helpers ---

struct Rendered {
    audio: Vec<Vec<f32>>,
    /// (absolute reference sample, message)
    midi: Vec<(i64, MidiMessage)>,
}

fn render(player: &mut dyn NodeRenderer, channels: usize, total: usize, block: usize) -> Rendered {
    let mut audio = vec![Vec::with_capacity(total); channels];
    let mut events = Vec::new();
    let mut buffer = AudioBuffer::new(BufferSize::new(channels, block));
    let mut midi = MidiBuffer::with_capacity(256);
    let mut start = 0usize;
    while start < total {
        let len = block.min(total - start);
        let range = SampleRange::with_length(start as i64, len);
        player.process(range, buffer.block_mut(channels, len), &mut midi);
        for (c, out) in audio.iter_mut().enumerate() {
            out.extend_from_slice(&buffer.channel(c)[..len]);
        }
        events.extend(midi.iter().map(|e| (start as i64 + i64::from(e.sample_offset), e.message)));
        start += len;
    }
    Rendered { audio, midi: events }
}

fn single(plan: ExecutionPlan, play_head: Arc<PlayHead>, block: usize) -> NodePlayer {
    let mut player = NodePlayer::new(play_head);
    player.prepare_to_play(48000.0, block);
    player.set_plan(plan);
    player
}

fn multi(
    plan: ExecutionPlan,
    play_head: Arc<PlayHead>,
    block: usize,
    workers: usize,
) -> MultiThreadedNodePlayer {
    let threads = Arc::new(ThreadPool::new(ThreadPoolConfig::with_workers(workers)).unwrap());
    let mut player = MultiThreadedNodePlayer::new(play_head, threads);
    player.prepare_to_play(48000.0, block);
    player.set_plan(plan);
    player
}

fn sine_gain(gain: f32) -> ExecutionPlan {
    let mut graph = NodeGraph::new();
    let sine = graph.add(SinNode::new(NodeId(1), 440.0, 2));
    let out = graph.add(GainNode::new(NodeId(2), sine, gain));
    graph.build(out).unwrap()
}

fn sine_only() -> ExecutionPlan {
    let mut graph = NodeGraph::new();
    let sine = graph.add(SinNode::new(NodeId(1), 440.0, 2));
    graph.build(sine).unwrap()
}

// --- Scenario ---

#[test]
fn test_sine_gain_block_matches_between_players() {
    let play_head = Arc::new(PlayHead::new());
    let reference = render(&mut single(sine_only(), Arc::clone(&play_head), 512), 2, 512, 512);
    let one = render(&mut single(sine_gain(0.5), Arc::clone(&play_head), 512), 2, 512, 512);
    let many = render(&mut multi(sine_gain(0.5), play_head, 512, 3), 2, 512, 512);

    for (sine, scaled) in reference.audio[0].iter().zip(&one.audio[0]) {
        assert_eq!(*scaled, sine * 0.5);
    }
    assert!(one.audio[0].iter().any(|s| s.abs() > 0.4));
    assert_eq!(one.audio, many.audio);
}

#[test]
fn test_empty_player_renders_silence() {
    let mut player = NodePlayer::new(Arc::new(PlayHead::new()));
    let out = render(&mut player, 2, 64, 64);
    assert!(out.audio.iter().flatten().all(|&s| s == 0.0));
    assert!(out.midi.is_empty());
}

// --- Ordering ---

fn stamped_diamond(
    clock: &Arc<AtomicU64>,
    stamps: &Arc<Vec<AtomicU64>>,
) -> (ExecutionPlan, Vec<(usize, usize)>) {
    let mut graph = NodeGraph::new();
    let mut keys: Vec<NodeKey> = Vec::new();
    // node i reads the listed earlier nodes
    let wiring: [&[usize]; 7] = [&[], &[], &[0], &[0, 1], &[1], &[2, 3], &[4, 5, 0]];
    let mut edges = Vec::new();
    for (i, inputs) in wiring.iter().enumerate() {
        let (clock, stamps) = (Arc::clone(clock), Arc::clone(stamps));
        let node = FunctionNode::new(
            NodeId(i as u64 + 1),
            1,
            inputs.iter().map(|&k| keys[k]).collect(),
            move |ctx| {
                stamps[i].store(clock.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
                let mut acc = 0.0;
                for input in ctx.inputs().iter() {
                    acc += input.audio().channel(0)[0];
                }
                ctx.audio.channel_mut(0).fill(acc + 1.0);
            },
        );
        keys.push(graph.add(node));
        edges.extend(inputs.iter().map(|&from| (from, i)));
    }
    (graph.build(keys[6]).unwrap(), edges)
}

#[test]
fn test_inputs_always_finish_before_consumers() {
    let clock = Arc::new(AtomicU64::new(1));
    let stamps: Arc<Vec<AtomicU64>> = Arc::new((0..7).map(|_| AtomicU64::new(0)).collect());
    let (plan, edges) = stamped_diamond(&clock, &stamps);
    let mut player = multi(plan, Arc::new(PlayHead::new()), 32, 4);

    let mut buffer = AudioBuffer::new(BufferSize::new(1, 32));
    let mut midi = MidiBuffer::default();
    for block in 0..200 {
        player.process(SampleRange::with_length(block * 32, 32), buffer.as_block_mut(), &mut midi);
        for &(from, to) in &edges {
            let (a, b) = (stamps[from].load(Ordering::SeqCst), stamps[to].load(Ordering::SeqCst));
            assert!(a < b, "block {block}: node {from} finished at {a}, consumer {to} started at {b}");
        }
    }
    // each node outputs 1 + the sum of its inputs
    assert_eq!(buffer.channel(0)[0], 10.0);
}

#[test]
fn test_full_ready_queue_still_finishes_every_block() {
    // 64 leaves against a 16-slot queue forces jobs to run inline on the pusher.
    fn wide() -> ExecutionPlan {
        let mut graph = NodeGraph::new();
        let leaves: Vec<NodeKey> = (0..64u64)
            .map(|i| {
                graph.add(SinNode::new(NodeId(i + 1), 100.0 + 10.0 * i as f64, 1).with_amplitude(1.0 / 64.0))
            })
            .collect();
        let root = graph.add(SummingNode::new(NodeId(1000), leaves));
        graph.build(root).unwrap()
    }

    let play_head = Arc::new(PlayHead::new());
    let expected = render(&mut single(wide(), Arc::clone(&play_head), 32), 1, 32 * 50, 32);

    let config = ThreadPoolConfig {
        queue_capacity: 16,
        ..ThreadPoolConfig::with_workers(2)
    };
    let threads = Arc::new(ThreadPool::new(config).unwrap());
    let mut player = MultiThreadedNodePlayer::new(play_head, threads);
    player.prepare_to_play(48000.0, 32);
    player.set_plan(wide());
    let rendered = render(&mut player, 1, 32 * 50, 32);

    assert_eq!(rendered.audio, expected.audio);
    assert_eq!(player.stats().blocks_processed, 50);
    assert_eq!(player.stats().node_faults, 0);
}

// --- Transport and MIDI ---

fn looping_play_head(loop_end: i64) -> Arc<PlayHead> {
    let play_head = Arc::new(PlayHead::new());
    play_head.set_loop_range(SampleRange::new(0, loop_end));
    play_head.set_looping(true);
    play_head.play();
    play_head
}

#[test]
fn test_loop_wrap_splits_block_and_flags_both_sides() {
    let seen: Arc<Mutex<Vec<BlockInfo>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let mut graph = NodeGraph::new();
    let node = graph.add(FunctionNode::new(NodeId(1), 1, vec![], move |ctx| {
        recorder.lock().unwrap().push(ctx.block);
    }));
    let mut player = single(graph.build(node).unwrap(), looping_play_head(1000), 256);
    render(&mut player, 1, 1280, 256);

    let blocks = seen.lock().unwrap().clone();
    assert_eq!(blocks.len(), 6);
    assert_eq!(blocks[3].timeline_range, SampleRange::new(768, 1000));
    assert!(blocks[3].flags.last_block_before_loop);
    assert_eq!(blocks[4].timeline_range, SampleRange::new(0, 24));
    assert!(blocks[4].flags.first_block_of_loop);
    assert!(blocks[4].flags.jumped);
    assert_eq!(blocks[5].timeline_range, SampleRange::new(24, 280));
    assert!(blocks[5].flags.contiguous);
    assert!(blocks.iter().all(|b| !(b.flags.contiguous && b.flags.jumped)));
    assert!(blocks[0].flags.jumped);
}

#[test]
fn test_transport_changes_apply_from_the_next_block() {
    let seen: Arc<Mutex<Vec<SampleRange>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let mut graph = NodeGraph::new();
    let node = graph.add(FunctionNode::new(NodeId(1), 1, vec![], move |ctx| {
        recorder.lock().unwrap().push(ctx.block.timeline_range);
    }));
    let play_head = Arc::new(PlayHead::new());
    let mut player = single(graph.build(node).unwrap(), Arc::clone(&play_head), 64);
    let mut buffer = AudioBuffer::new(BufferSize::new(1, 64));
    let mut midi = MidiBuffer::default();
    let mut block = |n: i64| {
        player.process(SampleRange::with_length(n * 64, 64), buffer.as_block_mut(), &mut midi);
    };

    block(0);
    play_head.play();
    block(1);
    block(2);
    play_head.set_position(1000);
    block(3);
    play_head.stop();
    block(4);
    assert_eq!(play_head.position(), 1064);
    play_head.play();
    block(5);

    let ranges = seen.lock().unwrap().clone();
    assert_eq!(ranges[0], SampleRange::empty_at(0));
    assert_eq!(ranges[1], SampleRange::new(0, 64));
    assert_eq!(ranges[2], SampleRange::new(64, 128));
    assert_eq!(ranges[3], SampleRange::new(1000, 1064));
    assert_eq!(ranges[4], SampleRange::empty_at(1064));
    assert_eq!(ranges[5], SampleRange::new(1064, 1128));
}

#[test]
fn test_looping_sequence_never_leaves_notes_hanging() {
    let mut graph = NodeGraph::new();
    let seq = graph.add(MidiSequenceNode::new(
        NodeId(1),
        vec![SequencedEvent::new(100, MidiMessage::note_on(0, 60, 100))],
    ));
    let mut player = single(graph.build(seq).unwrap(), looping_play_head(1000), 256);
    let out = render(&mut player, 0, 1280, 256);

    let events: Vec<(i64, bool)> = out.midi.iter().map(|(t, m)| (*t, m.is_note_on())).collect();
    assert_eq!(events, vec![(100, true), (999, false), (1100, true)]);
}

#[test]
fn test_stop_sends_note_off() {
    let play_head = Arc::new(PlayHead::new());
    play_head.play();
    let mut graph = NodeGraph::new();
    let seq = graph.add(MidiSequenceNode::new(
        NodeId(1),
        vec![SequencedEvent::new(10, MidiMessage::note_on(0, 64, 90))],
    ));
    let mut player = single(graph.build(seq).unwrap(), Arc::clone(&play_head), 64);
    let mut buffer = AudioBuffer::new(BufferSize::new(0, 64));
    let mut midi = MidiBuffer::default();

    player.process(SampleRange::with_length(0, 64), buffer.as_block_mut(), &mut midi);
    assert_eq!(midi.len(), 1);
    play_head.stop();
    player.process(SampleRange::with_length(64, 64), buffer.as_block_mut(), &mut midi);
    assert_eq!(midi.len(), 1);
    assert!(midi.events()[0].message.is_note_off());
    player.process(SampleRange::with_length(128, 64), buffer.as_block_mut(), &mut midi);
    assert!(midi.is_empty());
}

#[test]
fn test_merged_midi_order_is_the_same_for_every_player() {
    // Four sequences with colliding positions, merged through two levels.
    let build = || {
        let mut graph = NodeGraph::new();
        let sequences: Vec<NodeKey> = (0..4u8)
            .map(|i| {
                let events = (0..6i64)
                    .flat_map(|step| {
                        let at = step * 40 + i64::from(i % 2) * 5;
                        [
                            SequencedEvent::new(at, MidiMessage::note_on(i, 60 + i, 100)),
                            SequencedEvent::new(at + 20, MidiMessage::note_off(i, 60 + i, 0)),
                        ]
                    })
                    .collect();
                graph.add(MidiSequenceNode::new(NodeId(u64::from(i) + 1), events))
            })
            .collect();
        let left = graph.add(SummingNode::new(NodeId(10), vec![sequences[0], sequences[1]]));
        let right = graph.add(GainNode::new(NodeId(11), sequences[2], 1.0));
        let delayed = graph.add(LatencyNode::new(NodeId(12), sequences[3], 7));
        let root = graph.add(SummingNode::new(NodeId(13), vec![left, right, delayed]));
        graph.build(root).unwrap()
    };

    let play_head = Arc::new(PlayHead::new());
    play_head.play();
    let expected = render(&mut single(build(), Arc::clone(&play_head), 32), 0, 256, 32);
    // The delayed branch makes the transform delay the other two by 7 as well.
    assert_eq!(expected.midi.len(), 48);
    let first: Vec<u8> = expected.midi.iter().filter(|(t, _)| *t == 7).map(|(_, m)| m.channel()).collect();
    assert_eq!(first, vec![0, 2, 3]);

    for workers in 1..=4 {
        let rendered = render(&mut multi(build(), Arc::clone(&play_head), 32, workers), 0, 256, 32);
        assert_eq!(rendered.midi, expected.midi, "{workers} workers");
    }
}

#[test]
fn test_forwarded_midi_carries_timeline_positions() {
    let play_head = Arc::new(PlayHead::new());
    play_head.set_position(5000);
    play_head.play();
    let queue = Arc::new(MidiOutputQueue::new(16));
    let mut graph = NodeGraph::new();
    let seq = graph.add(MidiSequenceNode::new(
        NodeId(1),
        vec![SequencedEvent::new(5070, MidiMessage::note_on(1, 48, 80))],
    ));
    let fwd = graph.add(MidiForwardNode::new(NodeId(2), seq, Arc::clone(&queue)));
    let mut player = single(graph.build(fwd).unwrap(), play_head, 64);
    let out = render(&mut player, 0, 128, 64);

    assert_eq!(out.midi.len(), 1);
    let sent = queue.pop().unwrap();
    assert_eq!(sent.timeline_position, 5070);
    assert_eq!(sent.message, MidiMessage::note_on(1, 48, 80));
    assert!(queue.is_empty());
}

// --- Latency ---

#[test]
fn test_impulse_arrives_aligned_through_unequal_paths() {
    let build = || {
        let mut graph = NodeGraph::new();
        let mut fired = false;
        let impulse = graph.add(FunctionNode::new(NodeId(1), 1, vec![], move |ctx| {
            if !fired {
                ctx.audio.channel_mut(0)[0] = 1.0;
                fired = true;
            }
        }));
        let short = graph.add(LatencyNode::new(NodeId(2), impulse, 10));
        let long = graph.add(LatencyNode::new(NodeId(3), impulse, 35));
        let mix = graph.add(SummingNode::new(NodeId(4), vec![short, long]));
        graph.build(mix).unwrap()
    };
    let plan = build();
    assert_eq!(plan.latency_num_samples(), 35);
    assert_eq!(plan.latency_compensations().len(), 1);
    assert_eq!(plan.latency_compensations()[0].delay_samples, 25);
    assert_eq!(plan.latency_compensations()[0].input, NodeId(2));

    let one = render(&mut single(plan, Arc::new(PlayHead::new()), 16), 1, 64, 16);
    let many = render(&mut multi(build(), Arc::new(PlayHead::new()), 16, 2), 1, 64, 16);
    let hits: Vec<(usize, f32)> = one.audio[0]
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, s)| s != 0.0)
        .collect();
    assert_eq!(hits, vec![(35, 2.0)]);
    assert_eq!(one.audio, many.audio);
}

// --- Rebuilds ---

#[test]
fn test_published_plan_continues_the_waveform() {
    let play_head = Arc::new(PlayHead::new());
    let continuous = render(&mut single(sine_only(), Arc::clone(&play_head), 64), 2, 128, 64);

    let mut player = single(sine_only(), play_head, 64);
    let mut buffer = AudioBuffer::new(BufferSize::new(2, 64));
    let mut midi = MidiBuffer::default();
    player.process(SampleRange::with_length(0, 64), buffer.as_block_mut(), &mut midi);
    let publisher = player.publisher();
    publisher.publish(sine_only());
    player.process(SampleRange::with_length(64, 64), buffer.as_block_mut(), &mut midi);

    assert_eq!(buffer.channel(0), &continuous.audio[0][64..]);
    assert_eq!(publisher.collect_garbage(), 1);
    assert_eq!(player.stats().blocks_processed, 2);
}

/// Writes how many blocks it has rendered, counting on from the node it replaces.
struct BlockCounter {
    id: NodeId,
    blocks: u64,
    prepare_delay: Duration,
}

impl Node for BlockCounter {
    fn properties(&self, _: &[NodeProperties]) -> NodeProperties {
        NodeProperties::audio(self.id, 1)
    }

    fn prepare_to_play(&mut self, _: &PlaybackInitialisationInfo<'_>) {
        thread::sleep(self.prepare_delay);
    }

    fn carry_over(&mut self, previous: &mut dyn Node) {
        if let Some(old) = previous.downcast_mut::<BlockCounter>() {
            self.blocks = old.blocks;
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        self.blocks += 1;
        ctx.audio.channel_mut(0).fill(self.blocks as f32);
    }
}

fn counter_plan(prepare_delay: Duration) -> ExecutionPlan {
    let mut graph = NodeGraph::new();
    let counter = graph.add(BlockCounter {
        id: NodeId(1),
        blocks: 0,
        prepare_delay,
    });
    graph.build(counter).unwrap()
}

#[test]
fn test_publishing_while_rendering_never_interrupts_playback() {
    // 0 workers stands for the single-threaded player.
    for workers in [0, 2] {
        let (plan, play_head) = (counter_plan(Duration::ZERO), Arc::new(PlayHead::new()));
        let mut player: Box<dyn NodeRenderer> = match workers {
            0 => Box::new(single(plan, play_head, 64)),
            n => Box::new(multi(plan, play_head, 64, n)),
        };
        let publisher = player.publisher();
        let control = thread::spawn(move || {
            publisher.publish(counter_plan(Duration::from_millis(100)));
            publisher
        });

        let mut buffer = AudioBuffer::new(BufferSize::new(1, 64));
        let mut midi = MidiBuffer::default();
        let mut block = 0i64;
        while !control.is_finished() {
            player.process(SampleRange::with_length(block * 64, 64), buffer.as_block_mut(), &mut midi);
            block += 1;
            assert_eq!(buffer.channel(0)[0], block as f32, "block {block}");
            thread::sleep(Duration::from_millis(1));
        }
        let publisher = control.join().unwrap();
        assert!(block > 10);

        // The first block of the new plan counts on from the old one.
        player.process(SampleRange::with_length(block * 64, 64), buffer.as_block_mut(), &mut midi);
        block += 1;
        assert_eq!(buffer.channel(0)[0], block as f32);
        assert!(!publisher.has_pending());
        assert_eq!(player.stats().node_faults, 0, "{workers} workers");
    }
}

#[test]
fn test_cycles_are_rejected_before_playback() {
    let mut graph = NodeGraph::new();
    let back = graph.reserve();
    let sine = graph.add(SinNode::new(NodeId(1), 100.0, 1));
    let mix = graph.add(SummingNode::new(NodeId(2), vec![sine, back]));
    graph.insert(back, GainNode::new(NodeId(3), mix, 0.5)).unwrap();
    assert!(matches!(graph.build(mix), Err(GraphError::CycleDetected(_))));
}

// --- Faults and destinations ---

#[test]
fn test_panicking_node_is_isolated() {
    let build = || {
        let mut graph = NodeGraph::new();
        let sine = graph.add(SinNode::new(NodeId(1), 440.0, 1));
        let bad = graph.add(FunctionNode::new(NodeId(2), 1, vec![], |ctx| {
            ctx.audio.channel_mut(0).fill(1.0);
            panic!("plugin crashed");
        }));
        let mix = graph.add(SummingNode::new(NodeId(3), vec![sine, bad]));
        graph.build(mix).unwrap()
    };
    let play_head = Arc::new(PlayHead::new());
    let clean = render(&mut single(sine_only(), Arc::clone(&play_head), 32), 1, 96, 32);

    let mut one = single(build(), Arc::clone(&play_head), 32);
    let out = render(&mut one, 1, 96, 32);
    assert_eq!(out.audio[0], clean.audio[0]);
    assert_eq!(one.stats().node_faults, 3);

    let mut many = multi(build(), play_head, 32, 2);
    let out = render(&mut many, 1, 96, 32);
    assert_eq!(out.audio[0], clean.audio[0]);
    assert_eq!(many.stats().node_faults, 3);
}

#[test]
fn test_destination_channels_are_matched() {
    let mut graph = NodeGraph::new();
    let mono = graph.add(SinNode::new(NodeId(1), 440.0, 1));
    let mut player = single(graph.build(mono).unwrap(), Arc::new(PlayHead::new()), 32);
    let mut wide = AudioBuffer::new(BufferSize::new(2, 32));
    wide.channel_mut(1).fill(9.0);
    player.process(SampleRange::with_length(0, 32), wide.as_block_mut(), &mut MidiBuffer::default());
    assert!(wide.channel(0).iter().any(|&s| s != 0.0));
    assert!(wide.channel(1).iter().all(|&s| s == 0.0));

    let mut player = single(sine_only(), Arc::new(PlayHead::new()), 32);
    let mut narrow = AudioBuffer::new(BufferSize::new(1, 32));
    player.process(SampleRange::with_length(0, 32), narrow.as_block_mut(), &mut MidiBuffer::default());
    assert_eq!(narrow.channel(0), wide.channel(0));
}
