//! Measurement inputs: the pulse counter shared with the edge ISR and the
//! battery voltage pipeline.

pub mod battery;
pub mod pulse;
