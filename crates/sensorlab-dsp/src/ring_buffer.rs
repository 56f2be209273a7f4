//! Fixed-capacity circular sample store.
//!
//! Every public operation takes the same internal lock, so a reader never
//! observes half of a write. `rewrite` replaces the whole contents under one
//! lock acquisition, which is what the signal engine uses on regeneration.

use parking_lot::Mutex;

struct Ring<T> {
    data: Box<[T]>,
    /// Next slot to write
    head: usize,
    count: usize,
}

impl<T: Copy + Default> Ring<T> {
    fn push(&mut self, value: T) {
        let cap = self.data.len();
        if cap == 0 {
            return;
        }
        self.data[self.head] = value;
        self.head = (self.head + 1) % cap;
        if self.count < cap {
            self.count += 1;
        }
    }

    fn copy_newest(&self, dest: &mut [T]) -> usize {
        let cap = self.data.len();
        let n = self.count.min(dest.len());
        let pad = dest.len() - n;
        dest[..pad].fill(T::default());
        // Oldest of the newest-n sits n slots behind head
        let start = (self.head + cap - n) % cap.max(1);
        for i in 0..n {
            dest[pad + i] = self.data[(start + i) % cap];
        }
        n
    }
}

pub struct RingBuffer<T> {
    inner: Mutex<Ring<T>>,
    capacity: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                data: vec![T::default(); capacity].into_boxed_slice(),
                head: 0,
                count: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one value, evicting the oldest once full.
    pub fn write(&self, value: T) {
        self.inner.lock().push(value);
    }

    /// Append a run of values under a single lock.
    pub fn write_slice(&self, values: &[T]) {
        let mut ring = self.inner.lock();
        for &v in values {
            ring.push(v);
        }
    }

    /// Clear and refill in one step. Readers see either the old or the new
    /// contents, never a mix.
    pub fn rewrite(&self, values: &[T]) {
        let mut ring = self.inner.lock();
        ring.head = 0;
        ring.count = 0;
        for &v in values {
            ring.push(v);
        }
    }

    /// Reset count and head; storage is kept.
    pub fn clear(&self) {
        let mut ring = self.inner.lock();
        ring.head = 0;
        ring.count = 0;
    }

    /// Copy the newest `min(len, dest.len())` values, oldest first, into the
    /// tail of `dest`, zero-filling the leading slots. Returns the number of
    /// real values copied.
    pub fn snapshot(&self, dest: &mut [T]) -> usize {
        self.inner.lock().copy_newest(dest)
    }

    /// Snapshot of everything currently held, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        let ring = self.inner.lock();
        let mut out = vec![T::default(); ring.count];
        ring.copy_newest(&mut out);
        out
    }

    /// Most recently written value.
    pub fn latest(&self) -> Option<T> {
        let ring = self.inner.lock();
        if ring.count == 0 {
            return None;
        }
        let cap = ring.data.len();
        Some(ring.data[(ring.head + cap - 1) % cap])
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.inner.lock().count as f64 / self.capacity as f64
    }
}
