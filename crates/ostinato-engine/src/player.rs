//! Player - transport state machine and per-sample time map
//!
//! The player owns the transport state on the audio thread. Control threads
//! send partial-state mutations through a bounded lock-free queue; the
//! player drains it at the head of every block, walks musical time forward
//! one frame at a time through the [`TimeMapper`], and publishes a full
//! snapshot of its state through a [`Pump`] once per block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use crate::context::BlockContext;
use crate::pump::Pump;
use crate::time::{MusicalTime, SampleTime};
use crate::time_mapper::{TimeMapper, TimeMapperIterator};

/// Capacity of the mutation queue; overflow drops with a counter
const MUTATION_QUEUE_CAPACITY: usize = 64;

/// Full transport state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub playing: bool,
    pub current_time: MusicalTime,
    pub loop_enabled: bool,
    pub loop_start_time: MusicalTime,
    pub loop_end_time: MusicalTime,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playing: false,
            current_time: MusicalTime::zero(),
            loop_enabled: false,
            // negative means "not configured"
            loop_start_time: MusicalTime::new(-1, 1),
            loop_end_time: MusicalTime::new(-1, 1),
        }
    }
}

/// Partial transport update; only present fields mutate
#[derive(Debug, Clone, Default)]
pub struct PlayerStateMutation {
    pub playing: Option<bool>,
    pub current_time: Option<MusicalTime>,
    pub loop_enabled: Option<bool>,
    pub loop_start_time: Option<MusicalTime>,
    pub loop_end_time: Option<MusicalTime>,
}

/// Wire form of the player state exchange.
///
/// Inbound it is decoded into a [`PlayerStateMutation`] (absent fields
/// leave state untouched); outbound snapshots carry all five fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStateProto {
    pub playing: Option<bool>,
    pub current_time: Option<MusicalTime>,
    pub loop_enabled: Option<bool>,
    pub loop_start_time: Option<MusicalTime>,
    pub loop_end_time: Option<MusicalTime>,
}

impl From<PlayerStateProto> for PlayerStateMutation {
    fn from(proto: PlayerStateProto) -> Self {
        Self {
            playing: proto.playing,
            current_time: proto.current_time,
            loop_enabled: proto.loop_enabled,
            loop_start_time: proto.loop_start_time,
            loop_end_time: proto.loop_end_time,
        }
    }
}

impl From<&PlayerState> for PlayerStateProto {
    fn from(state: &PlayerState) -> Self {
        Self {
            playing: Some(state.playing),
            current_time: Some(state.current_time),
            loop_enabled: Some(state.loop_enabled),
            loop_start_time: Some(state.loop_start_time),
            loop_end_time: Some(state.loop_end_time),
        }
    }
}

/// Cloneable control-side handle into the mutation queue
#[derive(Clone)]
pub struct PlayerMutationSender {
    queue: Arc<ArrayQueue<PlayerStateMutation>>,
    dropped: Arc<AtomicU64>,
}

impl PlayerMutationSender {
    /// Queue a mutation; returns false (and counts) on overflow
    pub fn send(&self, mutation: PlayerStateMutation) -> bool {
        if self.queue.push(mutation).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Decode a wire update and queue it
    pub fn send_proto(&self, proto: PlayerStateProto) -> bool {
        self.send(proto.into())
    }
}

/// Transport owner; lives on the audio thread
pub struct Player {
    state: PlayerState,
    queue: Arc<ArrayQueue<PlayerStateMutation>>,
    dropped: Arc<AtomicU64>,
    tmap_iter: Option<TimeMapperIterator>,
    state_pump: Pump<PlayerState>,
}

impl Player {
    /// Create a player; `state_callback` receives the per-block snapshots
    /// on the pump's consumer thread.
    pub fn new(state_callback: impl Fn(PlayerState) + Send + 'static) -> Self {
        Self {
            state: PlayerState::default(),
            queue: Arc::new(ArrayQueue::new(MUTATION_QUEUE_CAPACITY)),
            dropped: Arc::new(AtomicU64::new(0)),
            tmap_iter: None,
            state_pump: Pump::new("player-state-pump", state_callback),
        }
    }

    pub fn mutation_sender(&self) -> PlayerMutationSender {
        PlayerMutationSender {
            queue: Arc::clone(&self.queue),
            dropped: Arc::clone(&self.dropped),
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    /// Join the pump consumer; call after the driver has drained
    pub fn cleanup(&mut self) {
        self.state_pump.cleanup();
    }

    /// Apply pending mutations and fill `ctxt.time_map` for one block.
    ///
    /// When playback passes the effective loop end, either the transport
    /// wraps to the loop start (loop enabled) or clamps and stops.
    /// Remaining frames carry the not-playing sentinel. One snapshot is
    /// pushed per call, regardless of how many mutations arrived.
    pub fn fill_time_map(&mut self, time_mapper: &TimeMapper, ctxt: &mut BlockContext) {
        let mut state = self.state;
        let mut iter = self.tmap_iter.take();

        while let Some(mutation) = self.queue.pop() {
            if let Some(playing) = mutation.playing {
                state.playing = playing;
            }
            if let Some(t) = mutation.current_time {
                state.current_time = t;
                iter = Some(time_mapper.find(t));
            }
            if let Some(enabled) = mutation.loop_enabled {
                state.loop_enabled = enabled;
            }
            if let Some(t) = mutation.loop_start_time {
                state.loop_start_time = t;
            }
            if let Some(t) = mutation.loop_end_time {
                state.loop_end_time = t;
            }
        }
        ctxt.perf.mutations_dropped += self.dropped.swap(0, Ordering::Relaxed);

        ctxt.time_map
            .resize(ctxt.block_size, SampleTime::not_playing());
        let mut filled = 0;

        if state.playing {
            let mut it = match iter {
                Some(it) if it.is_owned_by(time_mapper) => it,
                // the tempo map was replaced under us; re-seed
                _ => time_mapper.find(state.current_time),
            };

            let zero = MusicalTime::zero();
            let loop_start = if state.loop_enabled && state.loop_start_time >= zero {
                state.loop_start_time
            } else {
                zero
            };
            let mut loop_end = if state.loop_enabled && state.loop_end_time >= zero {
                state.loop_end_time
            } else {
                time_mapper.end_time()
            };
            let mut loop_active = state.loop_enabled;
            if loop_active && loop_start >= loop_end {
                log::warn!(
                    "degenerate loop [{loop_start}, {loop_end}), treating as loop-disabled"
                );
                loop_active = false;
                loop_end = time_mapper.end_time();
            }

            for slot in ctxt.time_map.iter_mut() {
                if state.current_time >= loop_end {
                    if !loop_active {
                        state.current_time = loop_end;
                        state.playing = false;
                        break;
                    }
                    state.current_time = loop_start;
                    it = time_mapper.find(state.current_time);
                }

                let prev_time = state.current_time;
                it.advance();
                state.current_time = it.current().min(loop_end);
                debug_assert!(state.current_time > prev_time);

                *slot = SampleTime {
                    start_time: prev_time,
                    end_time: state.current_time,
                };
                filled += 1;
            }

            if !state.playing {
                log::info!("playback stopped at {}", state.current_time);
            }
            self.tmap_iter = Some(it);
        } else {
            self.tmap_iter = iter;
        }

        for slot in &mut ctxt.time_map[filled..] {
            *slot = SampleTime::not_playing();
        }

        self.state = state;
        self.state_pump.push(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestCounter;

    fn quiet_player() -> Player {
        Player::new(|_| {})
    }

    fn mapper() -> TimeMapper {
        // 120 bpm at 44.1kHz: 22050 frames per beat
        TimeMapper::new(44100, 120, MusicalTime::new(4, 1))
    }

    fn mutation() -> PlayerStateMutation {
        PlayerStateMutation::default()
    }

    #[test]
    fn test_mutations_apply_last_write_wins() {
        let mut player = quiet_player();
        let sender = player.mutation_sender();
        sender.send(PlayerStateMutation {
            playing: Some(true),
            ..mutation()
        });
        sender.send(PlayerStateMutation {
            playing: Some(false),
            loop_enabled: Some(true),
            ..mutation()
        });

        let tm = mapper();
        let mut ctxt = BlockContext::new(64);
        player.fill_time_map(&tm, &mut ctxt);

        assert!(!player.state().playing);
        assert!(player.state().loop_enabled);
    }

    #[test]
    fn test_not_playing_fills_sentinel() {
        let mut player = quiet_player();
        let tm = mapper();
        let mut ctxt = BlockContext::new(64);
        player.fill_time_map(&tm, &mut ctxt);
        assert!(ctxt.time_map.iter().all(|s| !s.is_playing()));
    }

    #[test]
    fn test_playing_prefix_is_strictly_monotonic() {
        let mut player = quiet_player();
        let sender = player.mutation_sender();
        sender.send(PlayerStateMutation {
            playing: Some(true),
            current_time: Some(MusicalTime::zero()),
            ..mutation()
        });

        let tm = mapper();
        let mut ctxt = BlockContext::new(128);
        player.fill_time_map(&tm, &mut ctxt);

        for s in &ctxt.time_map {
            assert!(s.is_playing());
            assert!(s.start_time < s.end_time);
        }
        for pair in ctxt.time_map.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
    }

    #[test]
    fn test_stops_and_clamps_at_end_without_loop() {
        let mut player = quiet_player();
        let sender = player.mutation_sender();
        // one beat before the end of the 4-beat project
        sender.send(PlayerStateMutation {
            playing: Some(true),
            current_time: Some(MusicalTime::new(3, 1)),
            ..mutation()
        });

        let tm = mapper();
        let mut ctxt = BlockContext::new(512);
        let mut blocks = 0;
        while player.state().playing {
            player.fill_time_map(&tm, &mut ctxt);
            blocks += 1;
            assert!(blocks < 100, "playback never stopped");
        }

        assert_eq!(player.state().current_time, MusicalTime::new(4, 1));
        let last_playing = ctxt
            .time_map
            .iter()
            .rev()
            .find(|s| s.is_playing())
            .expect("a playing frame in the final block");
        assert_eq!(last_playing.end_time, MusicalTime::new(4, 1));
        // tail of the final block is sentinel
        assert!(!ctxt.time_map.last().unwrap().is_playing());
    }

    #[test]
    fn test_loop_wraps_to_start() {
        let mut player = quiet_player();
        let sender = player.mutation_sender();
        sender.send(PlayerStateMutation {
            playing: Some(true),
            current_time: Some(MusicalTime::new(1, 2)),
            loop_enabled: Some(true),
            loop_start_time: Some(MusicalTime::new(1, 1)),
            loop_end_time: Some(MusicalTime::new(2, 1)),
            ..mutation()
        });

        let tm = mapper();
        let mut ctxt = BlockContext::new(256);
        let mut wrapped = None;
        for _ in 0..1000 {
            player.fill_time_map(&tm, &mut ctxt);
            let mut prev_end = None;
            for s in ctxt.time_map.iter().filter(|s| s.is_playing()) {
                if let Some(prev) = prev_end {
                    if s.start_time < prev {
                        wrapped = Some(*s);
                    } else {
                        assert_eq!(s.start_time, prev);
                    }
                }
                assert!(s.start_time < s.end_time);
                prev_end = Some(s.end_time);
            }
            if wrapped.is_some() {
                break;
            }
        }

        let wrap = wrapped.expect("loop never wrapped");
        assert_eq!(wrap.start_time, MusicalTime::new(1, 1));
        assert!(player.state().playing);
    }

    #[test]
    fn test_degenerate_loop_behaves_as_disabled() {
        let mut player = quiet_player();
        let sender = player.mutation_sender();
        sender.send(PlayerStateMutation {
            playing: Some(true),
            current_time: Some(MusicalTime::new(3, 1)),
            loop_enabled: Some(true),
            loop_start_time: Some(MusicalTime::new(2, 1)),
            loop_end_time: Some(MusicalTime::new(2, 1)),
            ..mutation()
        });

        let tm = mapper();
        let mut ctxt = BlockContext::new(512);
        let mut blocks = 0;
        while player.state().playing {
            player.fill_time_map(&tm, &mut ctxt);
            blocks += 1;
            assert!(blocks < 200, "degenerate loop kept playing forever");
        }
        assert_eq!(player.state().current_time, tm.end_time());
    }

    #[test]
    fn test_one_snapshot_per_block() {
        let pushes = Arc::new(TestCounter::new(0));
        let pushes2 = Arc::clone(&pushes);
        let mut player = Player::new(move |_| {
            pushes2.fetch_add(1, Ordering::SeqCst);
        });
        let sender = player.mutation_sender();
        for _ in 0..10 {
            sender.send(PlayerStateMutation {
                playing: Some(false),
                ..mutation()
            });
        }

        let tm = mapper();
        let mut ctxt = BlockContext::new(64);
        player.fill_time_map(&tm, &mut ctxt);
        // coalescing: at most one snapshot can be observed for this block
        std::thread::sleep(std::time::Duration::from_millis(50));
        player.cleanup();
        assert!(pushes.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn test_queue_overflow_counts_drops() {
        let mut player = quiet_player();
        let sender = player.mutation_sender();
        let mut rejected = 0;
        for _ in 0..(MUTATION_QUEUE_CAPACITY + 10) {
            if !sender.send(mutation()) {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 10);

        let tm = mapper();
        let mut ctxt = BlockContext::new(64);
        player.fill_time_map(&tm, &mut ctxt);
        assert_eq!(ctxt.perf.mutations_dropped, 10);
    }

    #[test]
    fn test_proto_round_trip_preserves_all_fields() {
        let state = PlayerState {
            playing: true,
            current_time: MusicalTime::new(7, 4),
            loop_enabled: true,
            loop_start_time: MusicalTime::new(1, 1),
            loop_end_time: MusicalTime::new(3, 1),
        };
        let proto = PlayerStateProto::from(&state);
        let json = serde_json::to_string(&proto).unwrap();
        let back: PlayerStateProto = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proto);
        assert_eq!(back.current_time, Some(MusicalTime::new(7, 4)));
    }
}
