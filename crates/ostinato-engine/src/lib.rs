//! Ostinato engine - block-based audio virtual machine
//!
//! The engine executes a linearized program of opcodes over a pool of typed
//! buffers, once per audio period, under a hard deadline. Everything the
//! audio thread touches is bounded and preallocated; the control plane
//! talks to it exclusively through lock-free channels:
//!
//! - transport mutations flow into the [`player::Player`] and come back out
//!   as per-block snapshots through a coalescing [`pump::Pump`];
//! - named control values cross over through the
//!   [`double_buffered`] state manager;
//! - programs are compiled and set up on control threads, installed at
//!   block boundaries, and reclaimed off-thread (see [`gc`]).
//!
//! A [`realm::Realm`] ties one program, one player, and one backend
//! together and drives them block by block.

pub mod atom;
pub mod backend;
pub mod buffers;
pub mod context;
pub mod controls;
pub mod double_buffered;
pub mod error;
pub mod gc;
pub mod host;
pub mod player;
pub mod processor;
pub mod pump;
pub mod realm;
pub mod time;
pub mod time_mapper;
pub mod vm;

pub use error::{EngineError, EngineResult};
pub use host::HostSystem;
pub use realm::{Realm, RealmHandle};
pub use time::{MusicalTime, SampleTime};
pub use time_mapper::TimeMapper;
