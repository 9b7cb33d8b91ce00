//! Fixed-capacity pool for in-flight bind requests.
//!
//! A request occupies a slot from [`BindPool::acquire`] until its
//! completion arrives. The [`BindToken`] is the only handle to that slot:
//! it is neither `Clone` nor `Copy`, crosses the stack boundary as a raw
//! `u16`, and [`BindPool::complete`] frees the slot at most once. A stale
//! or duplicated completion carries an old generation and is ignored.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    pub cluster: u16,
    pub dst_short: u16,
    pub dst_endpoint: u8,
}

/// Exclusive claim on one pool slot.
#[derive(Debug, PartialEq, Eq)]
pub struct BindToken {
    slot: u8,
    generation: u8,
}

impl BindToken {
    /// Encode for the stack's user context field.
    pub fn into_raw(self) -> u16 {
        u16::from(self.slot) | (u16::from(self.generation) << 8)
    }

    pub fn from_raw(raw: u16) -> Self {
        Self {
            slot: raw as u8,
            generation: (raw >> 8) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no free bind slot")
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u8,
    request: Option<BindRequest>,
}

pub struct BindPool<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> BindPool<N> {
    pub const fn new() -> Self {
        Self {
            slots: [Slot {
                generation: 0,
                request: None,
            }; N],
        }
    }

    pub fn acquire(&mut self, request: BindRequest) -> Result<BindToken, PoolExhausted> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.request.is_none())
            .ok_or(PoolExhausted)?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.request = Some(request);
        Ok(BindToken {
            slot: index as u8,
            generation: slot.generation,
        })
    }

    /// Release the slot named by `token`, returning its request.
    ///
    /// `None` if the slot is already free or has been reused since.
    pub fn complete(&mut self, token: BindToken) -> Option<BindRequest> {
        let slot = self.slots.get_mut(usize::from(token.slot))?;
        if slot.generation != token.generation {
            return None;
        }
        slot.request.take()
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.request.is_some()).count()
    }
}

impl<const N: usize> Default for BindPool<N> {
    fn default() -> Self {
        Self::new()
    }
}
