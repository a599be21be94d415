//! Reclamation of retired programs
//!
//! When the realm installs a new program, the old one comes back out of the
//! audio thread at the block boundary. Its buffers can be hundreds of
//! kilobytes and its processors may hold native resources, so freeing it
//! there would put unbounded allocator time on the block path. Instead,
//! programs are retired: wrapped in `basedrop::Owned`, so the audio-thread
//! drop only enqueues a pointer, and a reclaim thread runs the real drop
//! (including processor `cleanup`) off the audio path.
//!
//! Retiring a program nudges the reclaim thread awake; a timeout pass
//! catches drops that happen with no retirement traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread::{self, Thread};
use std::time::Duration;

use basedrop::{Collector, Handle, Owned};

use crate::vm::Program;

/// Fallback pass interval. A retired program becomes reclaimable only once
/// the audio thread drops it at a later block boundary, so the thread must
/// re-check even without new retirements.
const RECLAIM_INTERVAL: Duration = Duration::from_millis(250);

struct Reclaimer {
    handle: Handle,
    thread: Thread,
}

static RECLAIMER: OnceLock<Reclaimer> = OnceLock::new();
static RETIRED_PROGRAMS: AtomicU64 = AtomicU64::new(0);

fn reclaimer() -> &'static Reclaimer {
    RECLAIMER.get_or_init(|| {
        // The Collector is built here so the handle exists before the
        // thread runs; the collector itself moves onto the reclaim thread
        // for the rest of its life (it is Send but not Sync).
        let mut collector = Collector::new();
        let handle = collector.handle();
        let join = thread::Builder::new()
            .name("program-reclaim".to_owned())
            .spawn(move || loop {
                collector.collect();
                thread::park_timeout(RECLAIM_INTERVAL);
            })
            .expect("failed to spawn program-reclaim thread");
        Reclaimer {
            handle,
            thread: join.thread().clone(),
        }
    })
}

/// Wrap a program for installation.
///
/// The returned pointer can cross to the audio thread; dropping it there
/// is a bounded enqueue, never a free.
pub fn retire(program: Program) -> Owned<Program> {
    let rec = reclaimer();
    let owned = Owned::new(&rec.handle, program);
    RETIRED_PROGRAMS.fetch_add(1, Ordering::Relaxed);
    rec.thread.unpark();
    owned
}

/// Programs that have been routed through [`retire`] so far. Diagnostic
/// only; reclamation of each one completes asynchronously.
pub fn retired_programs() -> u64 {
    RETIRED_PROGRAMS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::BufferType;
    use crate::host::HostSystem;
    use crate::vm::ProgramSpec;

    fn empty_program(host: &HostSystem) -> Program {
        let mut b = ProgramSpec::builder();
        b.add_buffer(BufferType::FloatAudioBlock);
        Program::new(b.build(), host).unwrap()
    }

    #[test]
    fn test_retire_counts_and_drop_does_not_block() {
        let host = HostSystem::new(44100, 64);
        let before = retired_programs();
        let owned = retire(empty_program(&host));
        assert_eq!(retired_programs(), before + 1);
        drop(owned);
    }

    #[test]
    fn test_retired_program_is_usable_until_dropped() {
        let host = HostSystem::new(44100, 64);
        let owned = retire(empty_program(&host));
        assert_eq!(owned.pool().len(), 1);
    }
}
