//! Host system - engine-wide constants and URID mapping
//!
//! A [`HostSystem`] is created once at engine startup and shared read-only
//! between the control plane (which interns URIs while building programs)
//! and the audio thread (which only reads the cached well-known ids).

use crate::atom::{Urid, UridMap};

/// Default capacity of an atom-data buffer, negotiated at startup
pub const DEFAULT_ATOM_DATA_SIZE: usize = 10240;

/// URIs the engine itself needs resolved
pub struct WellKnownUrids {
    pub atom_sequence: Urid,
    pub atom_frame_time: Urid,
    pub atom_chunk: Urid,
    pub midi_event: Urid,
}

/// Engine-wide runtime parameters and the URI interning table
pub struct HostSystem {
    sample_rate: u32,
    block_size: usize,
    atom_data_size: usize,
    pub urid_map: UridMap,
    pub urids: WellKnownUrids,
}

impl HostSystem {
    /// Create a host system for a fixed sample rate and block size.
    ///
    /// # Panics
    /// Panics if `sample_rate` or `block_size` is zero.
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        assert!(sample_rate > 0, "sample rate must be positive");
        assert!(block_size > 0, "block size must be positive");
        let urid_map = UridMap::new();
        let urids = WellKnownUrids {
            atom_sequence: urid_map.map("http://lv2plug.in/ns/ext/atom#Sequence"),
            atom_frame_time: urid_map.map("http://lv2plug.in/ns/ext/atom#frameTime"),
            atom_chunk: urid_map.map("http://lv2plug.in/ns/ext/atom#Chunk"),
            midi_event: urid_map.map("http://lv2plug.in/ns/ext/midi#MidiEvent"),
        };
        Self {
            sample_rate,
            block_size,
            atom_data_size: DEFAULT_ATOM_DATA_SIZE,
            urid_map,
            urids,
        }
    }

    /// Override the negotiated atom buffer capacity
    pub fn with_atom_data_size(mut self, size: usize) -> Self {
        self.atom_data_size = size;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn atom_data_size(&self) -> usize {
        self.atom_data_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_urids_distinct() {
        let host = HostSystem::new(44100, 128);
        let u = &host.urids;
        let ids = [u.atom_sequence, u.atom_frame_time, u.atom_chunk, u.midi_event];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_atom_data_size_override() {
        let host = HostSystem::new(48000, 256).with_atom_data_size(4096);
        assert_eq!(host.atom_data_size(), 4096);
    }
}
