//! Terminal MAC layer
//!
//! Only the random-access procedure is modeled; resource scheduling
//! belongs to the radio layer.

pub mod random_access;

pub use random_access::{MacState, PreambleTransmission, RandomAccess, TimeoutStep};
