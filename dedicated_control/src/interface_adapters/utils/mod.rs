// Small adapter utilities shared across the crate.

pub mod rng;
