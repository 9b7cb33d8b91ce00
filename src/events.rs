//! Callback-to-loop event queues.
//!
//! Events are produced by:
//! - mesh stack callbacks (signals, attribute writes, bind completions)
//! - timer callbacks (battery sampling)
//! - the reset button ISR (hold detected)
//!
//! and consumed by the main loop, one at a time, in FIFO order.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Mesh stack  │────▶│              │     │              │
//! │ Timer cb    │────▶│ EVENT_CHANNEL│────▶│  Main Loop   │
//! │ Button ISR  │────▶│              │     │  (consumer)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//!
//! ┌─────────────┐     ┌──────────────┐
//! │ OTA client  │────▶│ OTA_CHANNEL  │────▶ Main Loop
//! └─────────────┘     └──────────────┘
//! ```
//!
//! Producers never block: a full queue drops the event and returns false.
//! The pulse pipeline does not go through here; it has its own counters.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::network::MeshSignal;

const EVENT_DEPTH: usize = 16;
const OTA_DEPTH: usize = 4;

/// Largest OTA block the stack hands over in one callback.
pub const OTA_BLOCK_MAX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Mesh(MeshSignal),
    /// Periodic battery sampling timer fired.
    BatteryTick,
    /// Reset button held past the factory-reset threshold.
    FactoryResetHold,
}

/// One step of a firmware transfer, as reported by the stack's OTA client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaMessage {
    Start { image_size: u32, file_version: u32 },
    Chunk(heapless::Vec<u8, OTA_BLOCK_MAX>),
    /// A block larger than [`OTA_BLOCK_MAX`] arrived; the session must fail.
    Oversized(usize),
    Check,
    Apply,
    Finish,
    Abort,
}

impl OtaMessage {
    /// Wrap one received block. A block that does not fit becomes
    /// [`OtaMessage::Oversized`].
    pub fn from_block(block: &[u8]) -> Self {
        match heapless::Vec::from_slice(block) {
            Ok(chunk) => Self::Chunk(chunk),
            Err(()) => Self::Oversized(block.len()),
        }
    }
}

pub static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, Event, EVENT_DEPTH> = Channel::new();

pub static OTA_CHANNEL: Channel<CriticalSectionRawMutex, OtaMessage, OTA_DEPTH> = Channel::new();

/// Queue an event. Safe from ISR and callback context.
/// Returns `false` if the queue is full (event dropped).
pub fn push_event(event: Event) -> bool {
    EVENT_CHANNEL.try_send(event).is_ok()
}

pub fn pop_event() -> Option<Event> {
    EVENT_CHANNEL.try_receive().ok()
}

/// Hand every pending event to `handler` in FIFO order.
pub fn drain_events(mut handler: impl FnMut(Event)) {
    while let Some(event) = pop_event() {
        handler(event);
    }
}

pub fn push_ota(msg: OtaMessage) -> bool {
    OTA_CHANNEL.try_send(msg).is_ok()
}

pub fn pop_ota() -> Option<OtaMessage> {
    OTA_CHANNEL.try_receive().ok()
}
