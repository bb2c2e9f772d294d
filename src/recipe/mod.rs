//! Recipes and the built-ins.

mod all_zeros;
mod bspatch;
mod chain;
mod slice;
mod zlib;
mod zstd;

pub use all_zeros::AllZerosRecipe;
pub use bspatch::BspatchDecompressionRecipe;
pub use chain::ChainRecipe;
pub use slice::SliceRecipe;
pub use zlib::{ZlibCompressionRecipe, ZlibDecompressionRecipe, ZlibInitType};
pub use zstd::{ZstdCompressionRecipe, ZstdDecompressionRecipe};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DiffError, ErrorKind, Result};
use crate::item::Item;
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// Recipe type-name constants, shared between the built-in registrations
/// and the legacy deserializer's type-tag translation table.
pub mod names {
    pub const ALL_ZEROS: &str = "all_zeros";
    pub const CHAIN: &str = "chain";
    pub const SLICE: &str = "slice";
    pub const ZLIB_DECOMPRESSION: &str = "zlib_decompression";
    pub const ZLIB_COMPRESSION: &str = "zlib_compression";
    pub const ZSTD_DECOMPRESSION: &str = "zstd_decompression";
    pub const ZSTD_COMPRESSION: &str = "zstd_compression";
    pub const BSPATCH_DECOMPRESSION: &str = "bspatch_decompression";
}

/// A recipe: a named function from ingredient prepared items (+ numeric
/// parameters) to a new prepared item for `result()`.
pub trait Recipe: Send + Sync {
    fn name(&self) -> &str;
    fn result(&self) -> &Item;
    fn number_params(&self) -> &[u64];
    fn item_params(&self) -> &[Item];

    /// `prepared_items` is aligned 1:1 with `item_params()`.
    fn prepare(
        &self,
        kitchen: &Kitchen,
        prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>>;
}

/// A factory that builds a concrete [`Recipe`] from its (result, number
/// params, item params) triple — the registry the legacy deserializer
/// looks typed recipes up in for the built-ins it doesn't hand-translate.
pub trait RecipeTemplate: Send + Sync {
    fn name(&self) -> &str;
    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>>;
}

/// Registry of recipe-type name to template, consulted by the deserializer
/// when reconstructing typed recipes from a container.
#[derive(Default)]
pub struct RecipeTemplateRegistry {
    templates: HashMap<String, Arc<dyn RecipeTemplate>>,
}

impl RecipeTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every built-in.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(all_zeros::AllZerosTemplate));
        registry.register(Arc::new(chain::ChainTemplate));
        registry.register(Arc::new(slice::SliceTemplate));
        registry.register(Arc::new(zlib::ZlibDecompressionTemplate));
        registry.register(Arc::new(zlib::ZlibCompressionTemplate));
        registry.register(Arc::new(zstd::ZstdDecompressionTemplate));
        registry.register(Arc::new(zstd::ZstdCompressionTemplate));
        registry.register(Arc::new(bspatch::BspatchDecompressionTemplate));
        registry
    }

    pub fn register(&mut self, template: Arc<dyn RecipeTemplate>) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RecipeTemplate>> {
        self.templates.get(name)
    }

    pub fn create(
        &self,
        name: &str,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        match self.get(name) {
            Some(template) => template.create(result, number_params, item_params),
            None => Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!("no recipe template registered for type '{}'", name),
            )),
        }
    }
}

/// Shared arity check used by every built-in's constructor.
pub(crate) fn expect_counts(
    recipe_name: &str,
    number_params: &[u64],
    expected_numbers: usize,
    item_params: &[Item],
    expected_items: std::ops::RangeInclusive<usize>,
) -> Result<()> {
    if number_params.len() != expected_numbers {
        return Err(DiffError::new(
            ErrorKind::DiffRecipeInvalidParameterCount,
            format!(
                "{}: expected {} number params, got {}",
                recipe_name,
                expected_numbers,
                number_params.len()
            ),
        ));
    }
    if !expected_items.contains(&item_params.len()) {
        return Err(DiffError::new(
            ErrorKind::DiffRecipeInvalidParameterCount,
            format!(
                "{}: expected {:?} item params, got {}",
                recipe_name,
                expected_items,
                item_params.len()
            ),
        ));
    }
    Ok(())
}
