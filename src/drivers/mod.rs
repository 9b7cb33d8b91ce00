//! Board-level drivers: the factory-reset button and periodic timers.

pub mod button;
pub mod hw_timer;
