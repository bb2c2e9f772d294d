//! The kitchen: request-driven dependency resolution over the cookbook, the
//! pantry of already-prepared items, and the streaming-slice coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{DiffError, ErrorKind, Result};
use crate::io::buffer::BufferReader;
use crate::io::SequentialReader;
use crate::item::{Item, MatchResult};
use crate::prepared::PreparedItem;
use crate::recipe::Recipe;
use crate::slicing::SliceSlot;

/// Kitchen slicing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicingState {
    Idle,
    Resolving,
    Ready,
    Slicing,
    Cancelled,
}

struct PendingSlice {
    parent: Arc<PreparedItem>,
    offset: u64,
    length: u64,
    slot: Arc<SliceSlot>,
}

fn compatible(a: &Item, b: &Item) -> bool {
    !matches!(a.matches(b), MatchResult::NoMatch)
}

/// The orchestrator: resolves requested items against the cookbook into the
/// pantry, then arbitrates streaming slices of any sequential-only parents
/// those items depend on.
pub struct Kitchen {
    pantry: Mutex<Vec<(Item, Arc<PreparedItem>)>>,
    cookbook: Mutex<Vec<Arc<dyn Recipe>>>,
    requested: Mutex<Vec<Item>>,
    pending_slices: Mutex<Vec<PendingSlice>>,
    state: Mutex<SlicingState>,
    producers: Mutex<Vec<JoinHandle<()>>>,
    slice_cancelled: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl Default for Kitchen {
    fn default() -> Self {
        Self::new()
    }
}

impl Kitchen {
    pub fn new() -> Self {
        Self {
            pantry: Mutex::new(Vec::new()),
            cookbook: Mutex::new(Vec::new()),
            requested: Mutex::new(Vec::new()),
            pending_slices: Mutex::new(Vec::new()),
            state: Mutex::new(SlicingState::Idle),
            producers: Mutex::new(Vec::new()),
            slice_cancelled: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SlicingState {
        *self.state.lock().expect("kitchen state mutex poisoned")
    }

    /// Shared flag that sequential-only recipes (e.g.
    /// `bspatch_decompression`'s internal patch worker) poll to notice
    /// `cancel_slicing` promptly. Unlike the per-session flag the slice
    /// producers use, this one is monotonic for the kitchen's whole
    /// lifetime: a recipe's worker thread may run detached from any single
    /// `resume_slicing` session, so it must never see cancellation
    /// rescinded by a later session reusing this kitchen.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Registers a ready prepared item in the pantry. Idempotent: a second
    /// `store_item` for an item that already compares equal to one already
    /// stored is a no-op.
    pub fn store_item(&self, prepared: Arc<PreparedItem>) {
        let mut pantry = self.pantry.lock().expect("pantry mutex poisoned");
        let item = prepared.get_item_definition().clone();
        if pantry.iter().any(|(existing, _)| existing == &item) {
            return;
        }
        pantry.push((item, prepared));
    }

    pub fn add_recipe(&self, recipe: Arc<dyn Recipe>) {
        self.cookbook
            .lock()
            .expect("cookbook mutex poisoned")
            .push(recipe);
    }

    pub fn request_item(&self, item: Item) {
        self.requested
            .lock()
            .expect("requested mutex poisoned")
            .push(item);
    }

    pub fn can_fetch_item(&self, item: &Item) -> bool {
        self.pantry
            .lock()
            .expect("pantry mutex poisoned")
            .iter()
            .any(|(stored, _)| compatible(stored, item))
    }

    pub fn fetch_item(&self, item: &Item) -> Result<Arc<PreparedItem>> {
        self.pantry
            .lock()
            .expect("pantry mutex poisoned")
            .iter()
            .find(|(stored, _)| compatible(stored, item))
            .map(|(_, prepared)| prepared.clone())
            .ok_or_else(|| {
                DiffError::new(
                    ErrorKind::DiffItemNotAvailable,
                    "no matching prepared item in the pantry",
                )
            })
    }

    /// Recipes whose result matches `item` (the matching rule: `uncertain`
    /// counts as a candidate, not a miss), recipes whose item-params are
    /// all already satisfiable sorted ahead of the rest — prefer recipes
    /// whose ingredients are already ready — while keeping
    /// first-registered-wins order within each group.
    fn candidates_for(&self, item: &Item) -> Vec<Arc<dyn Recipe>> {
        let mut candidates: Vec<Arc<dyn Recipe>> = self
            .cookbook
            .lock()
            .expect("cookbook mutex poisoned")
            .iter()
            .filter(|recipe| compatible(recipe.result(), item))
            .cloned()
            .collect();
        candidates.sort_by_key(|recipe| !recipe.item_params().iter().all(|p| self.can_fetch_item(p)));
        candidates
    }

    /// Depth-first resolution of a single item: already-ready items return
    /// immediately, otherwise every candidate recipe is tried in order,
    /// recursively resolving its item-params first. This realizes
    /// fixed-point resolution in one traversal, since an ingredient is
    /// fully resolved (or proven unresolvable) before its dependent recipe
    /// is attempted.
    fn resolve_item(&self, item: &Item, path: &mut Vec<Item>) -> Result<bool> {
        if self.can_fetch_item(item) {
            return Ok(true);
        }
        if path.iter().any(|seen| seen == item) {
            return Err(DiffError::new(
                ErrorKind::DiffItemNotAvailable,
                "cycle detected while resolving item dependencies",
            ));
        }
        path.push(item.clone());

        for recipe in self.candidates_for(item) {
            let mut ingredients_ready = true;
            for param in recipe.item_params() {
                match self.resolve_item(param, path) {
                    Ok(true) => {}
                    Ok(false) => {
                        ingredients_ready = false;
                        break;
                    }
                    Err(e) => {
                        path.pop();
                        return Err(e);
                    }
                }
            }
            if !ingredients_ready {
                continue;
            }

            let mut prepared_ingredients = Vec::with_capacity(recipe.item_params().len());
            for param in recipe.item_params() {
                prepared_ingredients.push(self.fetch_item(param)?);
            }

            match recipe.prepare(self, prepared_ingredients) {
                Ok(prepared) => {
                    self.store_item(prepared);
                    path.pop();
                    return Ok(true);
                }
                Err(e) => {
                    path.pop();
                    return Err(e);
                }
            }
        }

        path.pop();
        Ok(false)
    }

    /// Resolves every requested item against the cookbook. Returns
    /// `Ok(true)` iff all requested items are now fetchable; `Ok(false)` if
    /// some remain unresolvable with no hard error (caller may add more
    /// recipes/pantry entries and retry); `Err` on a genuine failure
    /// (a cycle, or a recipe's `prepare` call failing).
    pub fn process_requested_items(&self) -> Result<bool> {
        {
            let mut state = self.state.lock().expect("kitchen state mutex poisoned");
            match *state {
                SlicingState::Idle | SlicingState::Resolving => *state = SlicingState::Resolving,
                other => {
                    return Err(DiffError::new(
                        ErrorKind::DiffSlicingInvalidState,
                        format!("process_requested_items called in state {:?}", other),
                    ))
                }
            }
        }

        let requested = self.requested.lock().expect("requested mutex poisoned").clone();
        let mut all_ready = true;
        for item in &requested {
            let mut path = Vec::new();
            match self.resolve_item(item, &mut path) {
                Ok(true) => {}
                Ok(false) => all_ready = false,
                Err(e) => {
                    *self.state.lock().expect("kitchen state mutex poisoned") = SlicingState::Idle;
                    return Err(e);
                }
            }
        }

        *self.state.lock().expect("kitchen state mutex poisoned") = if all_ready {
            SlicingState::Ready
        } else {
            SlicingState::Idle
        };
        Ok(all_ready)
    }

    /// Registers a pending slice of a sequential-only `parent`, returning
    /// the slot its `make_reader()` will block on until `resume_slicing`
    /// drives the parent's producer thread past `offset`.
    pub fn register_pending_slice(
        &self,
        parent: Arc<PreparedItem>,
        offset: u64,
        length: u64,
    ) -> Arc<SliceSlot> {
        let slot = SliceSlot::new();
        self.pending_slices
            .lock()
            .expect("pending slices mutex poisoned")
            .push(PendingSlice {
                parent,
                offset,
                length,
                slot: slot.clone(),
            });
        slot
    }

    /// Starts one producer thread per distinct sequential-only parent with
    /// pending slices, materializing each slice's bytes in offset order.
    pub fn resume_slicing(&self) -> Result<()> {
        {
            let state = self.state.lock().expect("kitchen state mutex poisoned");
            if *state != SlicingState::Ready {
                return Err(DiffError::new(
                    ErrorKind::DiffSlicingInvalidState,
                    format!("resume_slicing called in state {:?}, expected Ready", state),
                ));
            }
        }

        let pending = std::mem::take(&mut *self.pending_slices.lock().expect("pending slices mutex poisoned"));
        let mut groups: Vec<(Arc<PreparedItem>, Vec<PendingSlice>)> = Vec::new();
        for slice in pending {
            match groups.iter_mut().find(|(parent, _)| Arc::ptr_eq(parent, &slice.parent)) {
                Some((_, slices)) => slices.push(slice),
                None => groups.push((slice.parent.clone(), vec![slice])),
            }
        }

        for (_, slices) in &mut groups {
            slices.sort_by_key(|s| s.offset);
            for pair in slices.windows(2) {
                if pair[0].offset + pair[0].length > pair[1].offset {
                    return Err(DiffError::new(
                        ErrorKind::DiffSlicingRequestSliceOverlap,
                        format!(
                            "overlapping slice requests [{}, {}) and [{}, {})",
                            pair[0].offset,
                            pair[0].offset + pair[0].length,
                            pair[1].offset,
                            pair[1].offset + pair[1].length
                        ),
                    ));
                }
            }
        }

        *self.state.lock().expect("kitchen state mutex poisoned") = SlicingState::Slicing;
        // Session-scoped: safe to rearm on every resume, since the producers
        // spawned below are always tracked and joined by cancel_slicing.
        self.slice_cancelled.store(false, Ordering::SeqCst);

        let mut handles = Vec::with_capacity(groups.len());
        for (parent, slices) in groups {
            let cancelled = self.slice_cancelled.clone();
            handles.push(thread::spawn(move || run_producer(parent, slices, cancelled)));
        }
        *self.producers.lock().expect("producers mutex poisoned") = handles;
        Ok(())
    }

    /// Signals all producer threads to exit and joins them; a no-op
    /// if slicing was never resumed. Safe to call more than once and from
    /// `Drop`. Also trips the kitchen-lifetime cancellation token so any
    /// detached recipe worker (e.g. `bspatch_decompression`'s patch thread)
    /// still running from a past session notices it isn't tracked here.
    pub fn cancel_slicing(&self) {
        {
            let mut state = self.state.lock().expect("kitchen state mutex poisoned");
            if *state != SlicingState::Slicing {
                return;
            }
            *state = SlicingState::Cancelled;
        }
        self.slice_cancelled.store(true, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.producers.lock().expect("producers mutex poisoned"));
        for handle in handles {
            let _ = handle.join();
        }
        *self.state.lock().expect("kitchen state mutex poisoned") = SlicingState::Idle;
    }
}

impl Drop for Kitchen {
    fn drop(&mut self) {
        self.cancel_slicing();
    }
}

/// Drives `parent`'s sequential reader once, handing each pending slice a
/// materialized buffer of its byte range in order.
fn run_producer(parent: Arc<PreparedItem>, slices: Vec<PendingSlice>, cancelled: Arc<AtomicBool>) {
    for slice in &slices {
        slice.slot.mark_pending();
    }

    let mut reader = match parent.make_sequential_reader() {
        Ok(reader) => reader,
        Err(e) => {
            log::error!("slicing producer failed to open sequential reader: {}", e);
            for slice in &slices {
                slice.slot.fail(e.kind(), e.to_string());
            }
            return;
        }
    };

    let mut position = 0u64;
    for slice in slices {
        if cancelled.load(Ordering::SeqCst) {
            slice.slot.fail(ErrorKind::DiffSlicingInvalidState, "slicing cancelled");
            continue;
        }
        if slice.offset > position {
            if let Err(e) = reader.skip(slice.offset - position) {
                log::error!("slicing producer failed to skip to offset {}: {}", slice.offset, e);
                slice.slot.fail(e.kind(), e.to_string());
                return;
            }
            position = slice.offset;
        }
        let mut buffer = vec![0u8; slice.length as usize];
        if let Err(e) = reader.read_exact(&mut buffer) {
            log::error!(
                "slicing producer short read at offset {} length {}: {}",
                slice.offset,
                slice.length,
                e
            );
            slice.slot.fail(e.kind(), e.to_string());
            return;
        }
        position += slice.length;
        slice.slot.bind(Arc::new(BufferReader::new(buffer)));
    }
}
