//! Top-level archive container: the target/source items, the kitchen
//! that resolves them, and the bookkeeping the legacy deserializer
//! needs while building a recipe graph out of a container.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{DiffError, ErrorKind, Result};
use crate::io::{SequentialWriter, SharedReader};
use crate::item::Item;
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;
use crate::recipe::{Recipe, RecipeTemplateRegistry};

mod legacy;

/// A top-level container: one mandatory target item, an optional
/// source item, the kitchen that owns the pantry and cookbook, a mapping
/// of payload names to items, a registry of recipe templates, and any
/// nested archives keyed by the item they reconstruct.
pub struct Archive {
    target_item: Item,
    source_item: Option<Item>,
    kitchen: Kitchen,
    payloads: Mutex<BTreeMap<String, Item>>,
    templates: RecipeTemplateRegistry,
    nested: Arc<Mutex<BTreeMap<Item, Arc<Archive>>>>,
}

impl Archive {
    pub fn new(target_item: Item) -> Self {
        Self {
            target_item,
            source_item: None,
            kitchen: Kitchen::new(),
            payloads: Mutex::new(BTreeMap::new()),
            templates: RecipeTemplateRegistry::with_builtins(),
            nested: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn target_item(&self) -> &Item {
        &self.target_item
    }

    pub fn source_item(&self) -> Option<&Item> {
        self.source_item.as_ref()
    }

    pub fn kitchen(&self) -> &Kitchen {
        &self.kitchen
    }

    pub fn templates(&self) -> &RecipeTemplateRegistry {
        &self.templates
    }

    pub fn set_source_item(&mut self, item: Item) {
        self.source_item = Some(item);
    }

    pub fn store_item(&self, prepared: Arc<PreparedItem>) {
        self.kitchen.store_item(prepared);
    }

    pub fn add_recipe(&self, recipe: Arc<dyn Recipe>) {
        self.kitchen.add_recipe(recipe);
    }

    /// Registers a payload name to item mapping, for nested content
    /// accessed by name rather than by dependency resolution. The legacy
    /// container format as grounded in `original_source/` carries no
    /// wire encoding of payload names; this stays available for other
    /// container formats and for callers driving the kitchen directly.
    pub fn register_payload(&self, name: impl Into<String>, item: Item) {
        self.payloads
            .lock()
            .expect("payload mutex poisoned")
            .insert(name.into(), item);
    }

    pub fn payload(&self, name: &str) -> Option<Item> {
        self.payloads.lock().expect("payload mutex poisoned").get(name).cloned()
    }

    pub fn nested_archive(&self, item: &Item) -> Option<Arc<Archive>> {
        self.nested.lock().expect("nested archives mutex poisoned").get(item).cloned()
    }

    pub fn has_nested_archive(&self, item: &Item) -> bool {
        self.nested.lock().expect("nested archives mutex poisoned").contains_key(item)
    }

    fn nested_handle(&self) -> Arc<Mutex<BTreeMap<Item, Arc<Archive>>>> {
        self.nested.clone()
    }

    /// Provides the optional source blob's bytes. Required before resolving
    /// any recipe that reads from this archive's source item (e.g. a legacy
    /// `copy_source` slice).
    pub fn provide_source(&self, reader: SharedReader) -> Result<()> {
        let source = self.source_item.clone().ok_or_else(|| {
            DiffError::new(ErrorKind::DiffItemNotAvailable, "archive has no source item to provide")
        })?;
        self.kitchen.store_item(PreparedItem::from_reader(source, reader));
        Ok(())
    }

    /// Resolves the target item end to end: requests it, drives the
    /// fixed-point resolver, resumes any streaming slices it depends on,
    /// and fetches the resulting prepared item.
    pub fn prepare_target(&self) -> Result<Arc<PreparedItem>> {
        self.kitchen.request_item(self.target_item.clone());
        if !self.kitchen.process_requested_items()? {
            return Err(DiffError::new(
                ErrorKind::DiffItemNotAvailable,
                "target item could not be resolved from the available pantry and cookbook",
            ));
        }
        self.kitchen.resume_slicing()?;
        self.kitchen.fetch_item(&self.target_item)
    }

    /// Convenience used by the CLI: provides the source, resolves
    /// the target, and streams it through `writer`, cancelling the
    /// kitchen's slicing machinery once the copy is done (or has failed).
    pub fn apply(&self, source: Option<SharedReader>, writer: &mut dyn SequentialWriter) -> Result<()> {
        if let Some(source) = source {
            self.provide_source(source)?;
        }
        let target = self.prepare_target()?;
        let result = target.write(writer);
        self.kitchen.cancel_slicing();
        result
    }

    /// Sniffs `reader` and parses it as a container. Only the legacy
    /// format is implemented; anything else — including any newer
    /// container format not covered here — fails with
    /// `diff_unrecognized_container`.
    pub fn open(reader: SharedReader) -> Result<Self> {
        if legacy::is_this_format(reader.as_ref())? {
            return legacy::parse(reader);
        }
        Err(DiffError::new(
            ErrorKind::DiffUnrecognizedContainer,
            "input does not match any recognized archive container format",
        ))
    }
}
