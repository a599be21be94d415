//! End-to-end engine scenarios

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ostinato_engine::atom::{Labelset, Message, SequenceReader};
use ostinato_engine::backend::{BackendSettings, NullBackend, NullCapture};
use ostinato_engine::buffers::BufferType;
use ostinato_engine::context::BlockContext;
use ostinato_engine::controls::ControlValueState;
use ostinato_engine::player::{Player, PlayerStateMutation};
use ostinato_engine::processor::{NodeDescription, PortDirection};
use ostinato_engine::realm::Realm;
use ostinato_engine::vm::{self, OpArg, OpCode, ProcessorDecl, Program, ProgramSpec};
use ostinato_engine::{HostSystem, MusicalTime, TimeMapper};

fn fast_null() -> BackendSettings {
    BackendSettings {
        time_scale: 0.0,
        ..Default::default()
    }
}

fn null_backend(host: &HostSystem) -> NullBackend {
    use ostinato_engine::backend::Backend;
    let mut backend = NullBackend::new(fast_null());
    backend.setup(host).unwrap();
    backend
}

fn mapper_4_beats() -> TimeMapper {
    TimeMapper::new(44100, 120, MusicalTime::new(4, 1))
}

/// Scenario 1: a silent program through the null backend.
#[test]
fn silent_null_backend_runs_ten_blocks() {
    let host = Arc::new(HostSystem::new(44100, 64));
    let capture = NullCapture::new();
    let backend = Box::new(NullBackend::new(fast_null()).with_capture(capture.clone()));
    let (mut realm, handle) =
        Realm::new(Arc::clone(&host), backend, mapper_4_beats(), |_| {}).unwrap();

    let mut b = ProgramSpec::builder();
    let b0 = b.add_buffer(BufferType::FloatAudioBlock);
    b.append(OpCode::Clear, vec![OpArg::BufferIdx(b0)]).unwrap();
    b.append(OpCode::Output, vec![OpArg::BufferIdx(b0), OpArg::Str("left".into())])
        .unwrap();
    b.append(OpCode::Output, vec![OpArg::BufferIdx(b0), OpArg::Str("right".into())])
        .unwrap();
    b.append(OpCode::End, vec![]).unwrap();
    handle
        .install_program(Program::new(b.build(), &host).unwrap())
        .unwrap();

    for _ in 0..10 {
        realm.process_block().unwrap();
    }

    assert_eq!(realm.perf().blocks_failed, 0);
    capture.inspect(|data| {
        assert_eq!(data.output_counts["left"], 10);
        assert_eq!(data.output_counts["right"], 10);
        assert_eq!(data.samples["left"].len(), 10 * 64);
        assert!(data.samples["left"].iter().all(|&v| v == 0.0));
        assert!(data.samples["right"].iter().all(|&v| v == 0.0));
    });
}

/// Scenario 2: white noise has RMS near 1/sqrt(3).
#[test]
fn noise_rms_is_near_uniform_expectation() {
    let host = HostSystem::new(44100, 1024);
    let mut b = ProgramSpec::builder();
    let b0 = b.add_buffer(BufferType::FloatAudioBlock);
    b.append(OpCode::Noise, vec![OpArg::BufferIdx(b0)]).unwrap();
    b.append(OpCode::LogRms, vec![OpArg::BufferIdx(b0)]).unwrap();
    b.append(OpCode::End, vec![]).unwrap();

    let mut program = Program::new(b.build(), &host).unwrap();
    vm::setup_program(&mut program, &host).unwrap();

    let mut backend = null_backend(&host);
    let mut ctxt = BlockContext::new(1024);
    ctxt.begin_block();
    vm::process_block(
        &mut program,
        &mut ctxt,
        &mut backend,
        &host,
        &ControlValueState::default(),
    )
    .unwrap();

    let samples = program.pool().get(0).unwrap().as_samples().unwrap();
    let rms =
        (samples.iter().map(|v| v * v).sum::<f32>() / samples.len() as f32).sqrt();
    assert!((rms - 0.577).abs() < 0.05, "rms was {rms}");
}

/// Scenario 3: playback from 0 to the end of a 4-beat project, loop off.
#[test]
fn playback_clamps_and_stops_at_project_end() {
    let mut player = Player::new(|_| {});
    let sender = player.mutation_sender();
    sender.send(PlayerStateMutation {
        playing: Some(true),
        current_time: Some(MusicalTime::zero()),
        loop_enabled: Some(false),
        ..Default::default()
    });

    let tm = mapper_4_beats();
    let mut ctxt = BlockContext::new(512);
    let mut last_emitted_end = MusicalTime::zero();
    let mut blocks = 0;
    while player.state().playing {
        player.fill_time_map(&tm, &mut ctxt);
        if let Some(s) = ctxt.time_map.iter().rev().find(|s| s.is_playing()) {
            last_emitted_end = s.end_time;
        }
        blocks += 1;
        assert!(blocks < 500, "playback never stopped");
    }

    assert_eq!(player.state().current_time, MusicalTime::new(4, 1));
    assert_eq!(last_emitted_end, MusicalTime::new(4, 1));
    player.cleanup();
}

/// Scenario 4: with a loop over [1, 2), playback wraps to the loop start
/// and time increases strictly within each iteration.
#[test]
fn loop_wraps_to_loop_start() {
    let mut player = Player::new(|_| {});
    let sender = player.mutation_sender();
    sender.send(PlayerStateMutation {
        playing: Some(true),
        current_time: Some(MusicalTime::new(1, 2)),
        loop_enabled: Some(true),
        loop_start_time: Some(MusicalTime::new(1, 1)),
        loop_end_time: Some(MusicalTime::new(2, 1)),
        ..Default::default()
    });

    let tm = mapper_4_beats();
    let mut ctxt = BlockContext::new(256);
    let mut wrap = None;
    'outer: for _ in 0..1000 {
        player.fill_time_map(&tm, &mut ctxt);
        let mut prev_end: Option<MusicalTime> = None;
        for s in ctxt.time_map.iter().filter(|s| s.is_playing()) {
            assert!(s.start_time < s.end_time);
            if let Some(prev) = prev_end {
                if s.start_time < prev {
                    wrap = Some(*s);
                    break 'outer;
                }
                assert_eq!(s.start_time, prev);
            }
            prev_end = Some(s.end_time);
        }
    }

    let wrap = wrap.expect("loop never wrapped");
    assert_eq!(wrap.start_time, MusicalTime::new(1, 1));
    assert!(player.state().playing);
    player.cleanup();
}

/// Scenario 5: mutations queued between blocks coalesce; the block sees the
/// last write and at most one snapshot goes out per block.
#[test]
fn mutation_coalescing_between_blocks() {
    let snapshots = Arc::new(AtomicU64::new(0));
    let snapshots2 = Arc::clone(&snapshots);
    let mut player = Player::new(move |_| {
        snapshots2.fetch_add(1, Ordering::SeqCst);
    });
    let sender = player.mutation_sender();

    let tm = mapper_4_beats();
    let mut ctxt = BlockContext::new(64);
    player.fill_time_map(&tm, &mut ctxt);

    sender.send(PlayerStateMutation {
        playing: Some(true),
        ..Default::default()
    });
    sender.send(PlayerStateMutation {
        playing: Some(false),
        ..Default::default()
    });

    player.fill_time_map(&tm, &mut ctxt);
    assert!(!player.state().playing);
    assert!(ctxt.time_map.iter().all(|s| !s.is_playing()));

    player.cleanup();
    // two blocks ran; coalescing means the consumer saw at most two
    assert!(snapshots.load(Ordering::SeqCst) <= 2);
}

/// Scenario 6: FETCH_MESSAGES forges only messages whose labelset contains
/// the opcode's labels, in input order.
#[test]
fn fetch_messages_filters_by_labelset_subset() {
    let host = HostSystem::new(44100, 64);
    let mut b = ProgramSpec::builder();
    let b0 = b.add_buffer(BufferType::AtomData);
    b.append(
        OpCode::FetchMessages,
        vec![OpArg::Str("k=a".into()), OpArg::BufferIdx(b0)],
    )
    .unwrap();
    b.append(OpCode::LogAtom, vec![OpArg::BufferIdx(b0)]).unwrap();
    b.append(OpCode::End, vec![]).unwrap();

    let mut program = Program::new(b.build(), &host).unwrap();
    vm::setup_program(&mut program, &host).unwrap();

    let mut ctxt = BlockContext::new(64);
    ctxt.begin_block();
    let note = host.urids.midi_event;
    for (expr, payload) in [("k=a", &[1u8][..]), ("k=a,v=b", &[2u8][..]), ("v=b", &[3u8][..])] {
        ctxt.in_messages.push(Message {
            labelset: Labelset::parse(expr, &host.urid_map).unwrap(),
            atom_type: note,
            data: payload.to_vec(),
        });
    }

    let mut backend = null_backend(&host);
    vm::process_block(
        &mut program,
        &mut ctxt,
        &mut backend,
        &host,
        &ControlValueState::default(),
    )
    .unwrap();

    let bytes = program.pool().get(0).unwrap().as_bytes().unwrap();
    let reader = SequenceReader::new(bytes, host.urids.atom_sequence).unwrap();
    let events: Vec<_> = reader.events().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].payload, &[1u8]);
    assert_eq!(events[1].payload, &[2u8]);
    assert!(events.iter().all(|e| e.frame_time == 0));
}

/// A sine generator mixed down through a processor and delivered to the
/// backend, with the transport running.
#[test]
fn sine_through_mixer_to_backend() {
    let host = Arc::new(HostSystem::new(44100, 64));
    let capture = NullCapture::new();
    let backend = Box::new(NullBackend::new(fast_null()).with_capture(capture.clone()));
    let (mut realm, handle) =
        Realm::new(Arc::clone(&host), backend, mapper_4_beats(), |_| {}).unwrap();

    let mut b = ProgramSpec::builder();
    let osc = b.add_buffer(BufferType::FloatAudioBlock);
    let out = b.add_buffer(BufferType::FloatAudioBlock);
    let mixer = b.add_processor(ProcessorDecl {
        kind: "mixer".into(),
        desc: NodeDescription::new("mono-mix")
            .with_port("in0", PortDirection::Input, BufferType::FloatAudioBlock)
            .with_port("out", PortDirection::Output, BufferType::FloatAudioBlock),
        params: None,
    });
    b.append(
        OpCode::ConnectPort,
        vec![OpArg::ProcessorIdx(mixer), OpArg::Int(0), OpArg::BufferIdx(osc)],
    )
    .unwrap();
    b.append(
        OpCode::ConnectPort,
        vec![OpArg::ProcessorIdx(mixer), OpArg::Int(1), OpArg::BufferIdx(out)],
    )
    .unwrap();
    b.append(OpCode::Sine, vec![OpArg::BufferIdx(osc), OpArg::Float(440.0)])
        .unwrap();
    b.append(OpCode::Call, vec![OpArg::ProcessorIdx(mixer)]).unwrap();
    b.append(OpCode::Output, vec![OpArg::BufferIdx(out), OpArg::Str("left".into())])
        .unwrap();
    b.append(OpCode::End, vec![]).unwrap();
    handle
        .install_program(Program::new(b.build(), &host).unwrap())
        .unwrap();

    for _ in 0..4 {
        realm.process_block().unwrap();
    }

    assert_eq!(realm.perf().blocks_failed, 0);
    capture.inspect(|data| {
        let samples = &data.samples["left"];
        assert_eq!(samples.len(), 4 * 64);
        // a 440 Hz sine is audibly non-silent and bounded
        assert!(samples.iter().any(|&v| v.abs() > 0.1));
        assert!(samples.iter().all(|&v| v.abs() <= 1.0));
    });
}
