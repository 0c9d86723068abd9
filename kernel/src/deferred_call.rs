// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Hand-off from a short, high priority handler to a lower priority stage.
//!
//! Fault handlers that run at the highest priority should only capture state
//! and acknowledge the hardware. Anything slow, such as formatting a report,
//! is posted here as a message and picked up by a lower priority handler that
//! the architecture pends right after posting:
//!
//! ```text
//! stage one (high priority)           stage two (low priority)
//! ------------------------            ------------------------
//! capture record
//! DeferredCall::post(source, record)
//! pend low priority handler   ---->   DeferredCall::take()
//! return                              report
//! ```
//!
//! There is one payload slot. While it is occupied further payloads are
//! counted as dropped, but their source bits are still delivered, so stage
//! two always learns that it was requested. Posting never logs: stage one
//! must not reach an output device.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Which stage-one handlers asked for deferred service.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DeferredSource: u32 {
        const MEMORY_PROTECTION = 1 << 0;
    }
}

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;
const READING: u8 = 3;

/// A message taken by stage two.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeferredWork<T> {
    /// Every source that posted since the last `take`.
    pub sources: DeferredSource,
    /// The payload of the first post since the last `take`, if one fit.
    pub payload: Option<T>,
}

/// Single-slot mailbox between two interrupt priority levels.
///
/// `post` and `take` never block. Stage one may preempt stage two anywhere,
/// including in the middle of `take`.
pub struct DeferredCall<T: Copy> {
    sources: AtomicU32,
    state: AtomicU8,
    dropped: AtomicU32,
    slot: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the slot is only written by the owner of the EMPTY -> WRITING
// transition and only read by the owner of the FULL -> READING transition.
// These transitions are exclusive, so no two contexts touch the slot at once.
unsafe impl<T: Copy + Send> Sync for DeferredCall<T> {}

impl<T: Copy> DeferredCall<T> {
    pub const fn new() -> DeferredCall<T> {
        DeferredCall {
            sources: AtomicU32::new(0),
            state: AtomicU8::new(EMPTY),
            dropped: AtomicU32::new(0),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Posts `payload` on behalf of `source`.
    ///
    /// Returns `false` if the slot still held an earlier payload; `source` is
    /// recorded either way.
    pub fn post(&self, source: DeferredSource, payload: T) -> bool {
        let stored = self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if stored {
            // SAFETY: winning EMPTY -> WRITING gives exclusive access to the
            // slot until FULL is published.
            unsafe { (*self.slot.get()).write(payload) };
            self.state.store(FULL, Ordering::Release);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.sources.fetch_or(source.bits(), Ordering::Release);
        stored
    }

    /// Takes everything posted since the last call, or `None` if nothing
    /// was posted.
    pub fn take(&self) -> Option<DeferredWork<T>> {
        let sources = DeferredSource::from_bits_truncate(self.sources.swap(0, Ordering::Acquire));
        let payload = match self.state.compare_exchange(
            FULL,
            READING,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                // SAFETY: winning FULL -> READING gives exclusive access to
                // an initialized slot until EMPTY is published.
                let payload = unsafe { (*self.slot.get()).assume_init_read() };
                self.state.store(EMPTY, Ordering::Release);
                Some(payload)
            }
            Err(_) => None,
        };

        if sources.is_empty() && payload.is_none() {
            None
        } else {
            Some(DeferredWork { sources, payload })
        }
    }

    /// Whether a `take` right now would return something.
    pub fn is_pending(&self) -> bool {
        self.sources.load(Ordering::Relaxed) != 0 || self.state.load(Ordering::Relaxed) == FULL
    }

    /// Payloads dropped because the slot was occupied.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Payloads dropped since the last call. Meant for stage two, which can
    /// afford to report them.
    pub fn take_dropped(&self) -> u32 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl<T: Copy> Default for DeferredCall<T> {
    fn default() -> Self {
        DeferredCall::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_posted() {
        let call: DeferredCall<u32> = DeferredCall::new();
        assert!(!call.is_pending());
        assert_eq!(call.take(), None);
    }

    #[test]
    fn post_then_take() {
        let call = DeferredCall::new();
        assert!(call.post(DeferredSource::MEMORY_PROTECTION, 7_u32));
        assert!(call.is_pending());

        assert_eq!(
            call.take(),
            Some(DeferredWork {
                sources: DeferredSource::MEMORY_PROTECTION,
                payload: Some(7)
            })
        );
        assert!(!call.is_pending());
        assert_eq!(call.take(), None);
    }

    #[test]
    fn second_payload_is_dropped_but_signalled() {
        let call = DeferredCall::new();
        assert!(call.post(DeferredSource::MEMORY_PROTECTION, 1_u32));
        assert!(!call.post(DeferredSource::MEMORY_PROTECTION, 2_u32));
        assert!(!call.post(DeferredSource::MEMORY_PROTECTION, 3_u32));
        assert_eq!(call.dropped(), 2);
        assert_eq!(call.take_dropped(), 2);
        assert_eq!(call.take_dropped(), 0);

        let work = call.take().unwrap();
        assert_eq!(work.payload, Some(1));
        assert_eq!(work.sources, DeferredSource::MEMORY_PROTECTION);

        // The slot is free again.
        assert!(call.post(DeferredSource::MEMORY_PROTECTION, 4_u32));
        assert_eq!(call.take().unwrap().payload, Some(4));
    }
}
