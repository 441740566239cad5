//! Fixed-capacity store of recent raw sample points.

/// A circular buffer of `(x, y)` points that overwrites its oldest entry once full.
///
/// The write cursor only ever grows (until [`RingBuffer::reset`]); `cursor % capacity`
/// is the next slot to write.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Vec<[f32; 2]>,
    cursor: u64,
}

impl RingBuffer {
    /// Creates a buffer holding at most `capacity` points (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![[0.0; 2]; capacity.max(1)],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total number of pushes since creation or the last reset.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of points currently retained, `min(cursor, capacity)`.
    pub fn len(&self) -> usize {
        self.cursor.min(self.capacity() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn push(&mut self, x: f32, y: f32) {
        let slot = (self.cursor % self.capacity() as u64) as usize;
        self.slots[slot] = [x, y];
        self.cursor += 1;
    }

    /// Returns up to `k` of the most recent points, oldest first.
    ///
    /// `k` is bounded by [`RingBuffer::len`], so after a reset this yields nothing
    /// until new points arrive.
    pub fn read_last(&self, k: usize) -> Vec<[f32; 2]> {
        let cap = self.capacity() as u64;
        let k = (k as u64).min(self.len() as u64);
        let base = (self.cursor - k) % cap;
        (0..k)
            .map(|i| self.slots[((base + i) % cap) as usize])
            .collect()
    }

    /// Returns every retained point, oldest first.
    pub fn read_all(&self) -> Vec<[f32; 2]> {
        self.read_last(self.capacity())
    }

    /// Rewinds the cursor. Old slot contents stay in memory but are unreachable.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
