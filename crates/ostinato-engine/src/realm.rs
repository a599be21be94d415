//! Realm - one program, one player, one backend
//!
//! The realm is the audio-thread driver's unit of work. Per block it asks
//! the backend to frame the period, lets the player fill the time map,
//! executes the program, and closes the period. Everything the control
//! plane may touch while the driver runs is reachable only through the
//! lock-free [`RealmHandle`].
//!
//! Block-time failures do not stop the driver: the block is aborted,
//! counted, and logged, and the next block starts clean. Only backend
//! framing errors and an explicit stop end the loop.

use std::sync::Arc;
use std::time::Instant;

use basedrop::Owned;
use crossbeam::queue::ArrayQueue;

use crate::atom::NodeMessage;
use crate::backend::{Backend, MessageSender, StopHandle};
use crate::context::{BlockContext, PerfStats};
use crate::controls::ControlValueState;
use crate::double_buffered::{double_buffered, StateReader, StateWriter};
use crate::error::EngineResult;
use crate::gc;
use crate::host::HostSystem;
use crate::player::{Player, PlayerMutationSender, PlayerState};
use crate::time_mapper::TimeMapper;
use crate::vm::{self, Program};

/// Capacity of the audio-to-control node message ring
const NODE_MESSAGE_RING_CAPACITY: usize = 256;

/// Control-plane handle to a running realm
///
/// Cloneable pieces may be spread across control threads; the node message
/// consumer is single-owner.
pub struct RealmHandle {
    host: Arc<HostSystem>,
    program_slot: Arc<ArrayQueue<Owned<Program>>>,
    mapper_slot: Arc<ArrayQueue<TimeMapper>>,
    /// Transport mutations into the player
    pub player: PlayerMutationSender,
    /// Named control values, published with `publish()`
    pub controls: StateWriter<ControlValueState>,
    /// Message injection into the next block
    pub messages: MessageSender,
    /// Stop request, honored at the next block boundary
    pub stop: StopHandle,
    /// Outbound node messages emitted by processors and opcodes
    pub node_messages: rtrb::Consumer<NodeMessage>,
}

impl RealmHandle {
    /// Run a program's init phase and queue it for installation at the
    /// next block boundary. Replaces any not-yet-installed predecessor.
    pub fn install_program(&self, mut program: Program) -> EngineResult<()> {
        vm::setup_program(&mut program, &self.host)?;
        let owned = gc::retire(program);
        // latest wins; a displaced program is dropped here on the control
        // thread, an installed one is dropped through the reclaim thread
        let _ = self.program_slot.force_push(owned);
        Ok(())
    }

    /// Queue a tempo map replacement for the next block boundary
    pub fn set_time_mapper(&self, mapper: TimeMapper) {
        let _ = self.mapper_slot.force_push(mapper);
    }

    /// Drain whatever node messages have arrived
    pub fn drain_node_messages(&mut self, mut f: impl FnMut(NodeMessage)) {
        while let Ok(msg) = self.node_messages.pop() {
            f(msg);
        }
    }
}

/// The audio-thread driver state
pub struct Realm {
    host: Arc<HostSystem>,
    backend: Box<dyn Backend>,
    player: Player,
    ctxt: BlockContext,
    program: Option<Owned<Program>>,
    program_slot: Arc<ArrayQueue<Owned<Program>>>,
    mapper_slot: Arc<ArrayQueue<TimeMapper>>,
    controls: StateReader<ControlValueState>,
    time_mapper: TimeMapper,
}

impl Realm {
    /// Set up a realm: opens the backend and wires all control-plane
    /// channels. Errors here are fatal; the driver never starts.
    pub fn new(
        host: Arc<HostSystem>,
        mut backend: Box<dyn Backend>,
        time_mapper: TimeMapper,
        state_callback: impl Fn(PlayerState) + Send + 'static,
    ) -> EngineResult<(Realm, RealmHandle)> {
        backend.setup(&host)?;

        let player = Player::new(state_callback);
        let (controls_writer, controls_reader) = double_buffered(ControlValueState::default());
        let (msg_tx, msg_rx) = rtrb::RingBuffer::new(NODE_MESSAGE_RING_CAPACITY);
        let program_slot = Arc::new(ArrayQueue::new(1));
        let mapper_slot = Arc::new(ArrayQueue::new(1));

        let mut ctxt = BlockContext::new(host.block_size());
        ctxt.out_messages = Some(msg_tx);

        let handle = RealmHandle {
            host: Arc::clone(&host),
            program_slot: Arc::clone(&program_slot),
            mapper_slot: Arc::clone(&mapper_slot),
            player: player.mutation_sender(),
            controls: controls_writer,
            messages: backend.message_sender(),
            stop: backend.stop_handle(),
            node_messages: msg_rx,
        };

        let realm = Realm {
            host,
            backend,
            player,
            ctxt,
            program: None,
            program_slot,
            mapper_slot,
            controls: controls_reader,
            time_mapper,
        };

        Ok((realm, handle))
    }

    /// Execute one audio period end to end.
    pub fn process_block(&mut self) -> EngineResult<()> {
        let started = Instant::now();

        self.ctxt.begin_block();
        self.backend.begin_block(&mut self.ctxt)?;

        // control-plane swaps land at the block boundary
        while let Some(mapper) = self.mapper_slot.pop() {
            self.time_mapper = mapper;
        }
        while let Some(program) = self.program_slot.pop() {
            let _old = self.program.replace(program);
            log::info!("program installed");
        }

        self.player.fill_time_map(&self.time_mapper, &mut self.ctxt);

        if let Some(program) = &mut self.program {
            let result = vm::process_block(
                &mut *program,
                &mut self.ctxt,
                self.backend.as_mut(),
                &self.host,
                self.controls.current(),
            );
            if let Err(e) = result {
                self.ctxt.perf.blocks_failed += 1;
                if e.is_block_error() {
                    log::warn!("block aborted: {e}");
                } else {
                    log::error!("program fault: {e}");
                }
            }
        }

        self.backend.end_block(&mut self.ctxt)?;

        self.ctxt.sample_pos += self.ctxt.block_size as u64;
        self.ctxt.perf.blocks_processed += 1;
        self.ctxt.perf.last_block_duration = started.elapsed();
        Ok(())
    }

    /// Drive blocks until the backend reports stopped, then tear down.
    pub fn run(&mut self) -> EngineResult<()> {
        log::info!(
            "realm running: {} frames/block @ {} Hz",
            self.host.block_size(),
            self.host.sample_rate()
        );
        while !self.backend.stopped() {
            self.process_block()?;
        }
        self.backend.cleanup();
        self.backend.release();
        self.player.cleanup();
        log::info!("realm stopped after {} blocks", self.ctxt.perf.blocks_processed);
        Ok(())
    }

    pub fn perf(&self) -> &PerfStats {
        &self.ctxt.perf
    }

    pub fn player_state(&self) -> &PlayerState {
        self.player.state()
    }

    pub fn sample_pos(&self) -> u64 {
        self.ctxt.sample_pos
    }
}
