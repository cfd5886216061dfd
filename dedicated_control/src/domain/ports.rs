// Port for the random choices made during preset/level rotation.
pub trait RandomSource: Send {
    /// Returns an index in `0..len`. Callers never pass zero.
    fn pick_index(&mut self, len: usize) -> usize;
}
