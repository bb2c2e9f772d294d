//! Per-slice readiness tracking for the streaming-slice machinery.
//!
//! A [`SliceSlot`] is created for every pending slice whose parent is
//! sequential-only, at the moment the `slice` recipe resolves such a
//! parent. It starts `NotResumed` (so `make_reader()` fails fast with
//! `diff_slicing_invalid_state` before `resume_slicing` runs), becomes
//! `Pending` once the kitchen's coordinator picks it up, and is `Bound`
//! once its producer thread has copied its byte range into memory.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::{DiffError, ErrorKind, Result};
use crate::io::SharedReader;

#[derive(Clone)]
enum SlotState {
    NotResumed,
    Pending,
    Bound(SharedReader),
    Failed(ErrorKind, String),
}

pub struct SliceSlot {
    state: Mutex<SlotState>,
    cv: Condvar,
}

impl SliceSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::NotResumed),
            cv: Condvar::new(),
        })
    }

    /// Called by the coordinator when `resume_slicing` starts scheduling
    /// this slot's parent.
    pub fn mark_pending(&self) {
        let mut state = self.state.lock().expect("slice slot mutex poisoned");
        *state = SlotState::Pending;
        self.cv.notify_all();
    }

    pub fn bind(&self, reader: SharedReader) {
        let mut state = self.state.lock().expect("slice slot mutex poisoned");
        *state = SlotState::Bound(reader);
        self.cv.notify_all();
    }

    pub fn fail(&self, kind: ErrorKind, message: impl Into<String>) {
        let mut state = self.state.lock().expect("slice slot mutex poisoned");
        *state = SlotState::Failed(kind, message.into());
        self.cv.notify_all();
    }

    /// Blocks (only while `Pending`) until the slice is bound or failed.
    /// Never blocks while `NotResumed` — that's an immediate error, not a
    /// wait, since nothing will ever move it forward without a
    /// `resume_slicing` call the caller hasn't made yet.
    pub fn wait_for_reader(&self) -> Result<SharedReader> {
        let mut state = self.state.lock().expect("slice slot mutex poisoned");
        loop {
            match &*state {
                SlotState::NotResumed => {
                    return Err(DiffError::new(
                        ErrorKind::DiffSlicingInvalidState,
                        "slice requested before resume_slicing was called",
                    ))
                }
                SlotState::Bound(reader) => return Ok(reader.clone()),
                SlotState::Failed(kind, message) => {
                    return Err(DiffError::new(*kind, message.clone()))
                }
                SlotState::Pending => {
                    state = self.cv.wait(state).expect("slice slot mutex poisoned");
                }
            }
        }
    }
}
