// Audio hand-off between the field loop and the playback thread. The
// producer side never blocks: when the ring is full, fresh samples are
// dropped on the floor and the playback side keeps draining.

use crate::devices::SoundChip;
use rodio::Source;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 44100;
pub const CHANNELS: u16 = 2;

pub struct SampleRing {
    queue: Mutex<VecDeque<i16>>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Arc<SampleRing> {
        Arc::new(SampleRing { queue: Mutex::new(VecDeque::with_capacity(capacity)), capacity })
    }
    /// Push samples without ever blocking the caller; excess is dropped.
    pub fn push(&self, samples: &[i16]) {
        let mut queue = self.queue.lock().expect("sample ring poisoned");
        let room = self.capacity.saturating_sub(queue.len());
        for &sample in samples.iter().take(room) {
            queue.push_back(sample);
        }
    }
    pub fn pop(&self) -> Option<i16> {
        self.queue.lock().expect("sample ring poisoned").pop_front()
    }
    pub fn len(&self) -> usize {
        self.queue.lock().expect("sample ring poisoned").len()
    }
}

/// rodio source draining the ring; silence when the emulation falls behind.
pub struct RingSource {
    ring: Arc<SampleRing>,
}

impl RingSource {
    pub fn new(ring: Arc<SampleRing>) -> RingSource {
        RingSource { ring }
    }
}

impl Iterator for RingSource {
    type Item = i16;
    fn next(&mut self) -> Option<i16> {
        Some(self.ring.pop().unwrap_or(0))
    }
}

impl Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }
    fn channels(&self) -> u16 {
        CHANNELS
    }
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Placeholder YM2610: keeps the audio pipeline primed with silence at the
/// pace a real FM core would produce samples.
pub struct SilentYm2610 {
    ring: Arc<SampleRing>,
    chunk: Vec<i16>,
}

impl SilentYm2610 {
    pub fn new(ring: Arc<SampleRing>, updates_per_second: u32) -> SilentYm2610 {
        let frames = (SAMPLE_RATE / updates_per_second.max(1)) as usize;
        SilentYm2610 { ring, chunk: vec![0; frames * CHANNELS as usize] }
    }
}

impl SoundChip for SilentYm2610 {
    fn update(&mut self) {
        self.ring.push(&self.chunk);
    }
}
