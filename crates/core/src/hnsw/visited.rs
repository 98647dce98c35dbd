//! Epoch-stamped visited set for graph traversal.

/// Visited marker over dense node numbers.
///
/// Each slot stores the epoch in which it was last marked; `clear()` bumps the epoch
/// instead of zeroing the array. The array is only wiped when the epoch wraps.
#[derive(Debug)]
pub struct VisitedSet {
    marks: Vec<u32>,
    epoch: u32,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0; capacity],
            epoch: 1,
        }
    }

    /// Forget every mark. O(1) except on epoch wrap-around.
    pub fn clear(&mut self) {
        if self.epoch == u32::MAX {
            self.marks.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    /// Grow to cover node numbers below `cap`.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.marks.len() {
            self.marks.resize(cap, 0);
        }
    }

    /// Marks `node`. Returns `true` if it had not been visited in this epoch.
    #[inline]
    pub fn insert(&mut self, node: u32) -> bool {
        let slot = &mut self.marks[node as usize];
        if *slot == self.epoch {
            false
        } else {
            *slot = self.epoch;
            true
        }
    }

    #[inline]
    pub fn contains(&self, node: u32) -> bool {
        self.marks
            .get(node as usize)
            .is_some_and(|&m| m == self.epoch)
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}
