use std::sync::Arc;

use super::{expect_counts, names, Recipe, RecipeTemplate};
use crate::error::{DiffError, ErrorKind, Result};
use crate::item::{Item, MatchResult};
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// `slice`: bytes `[offset, offset+result_length)` of a single ingredient.
pub struct SliceRecipe {
    result: Item,
    parent: Item,
    offset: u64,
}

impl SliceRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        expect_counts(names::SLICE, &number_params, 1, &item_params, 1..=1)?;
        let offset = number_params[0];
        let parent = item_params[0].clone();

        // Self-referential when the slice would span the whole parent *and*
        // the two items are actually known to be the same content (a shared
        // hash algorithm with agreeing digests). Two same-length items with
        // no overlapping hash (`Uncertain`) are routinely unrelated — e.g. a
        // single-chunk remainder's result item and its uncompressed parent —
        // and must not be rejected just because they happen to match in size.
        if offset == 0 && result.length() == parent.length() && result.matches(&parent) == MatchResult::Match {
            return Err(DiffError::new(
                ErrorKind::RecipeSelfReferential,
                "slice: offset 0 spanning the whole parent item would self-reference",
            ));
        }

        let end = offset.checked_add(result.length()).ok_or_else(|| {
            DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!("slice: offset {} + length {} overflows", offset, result.length()),
            )
        })?;
        if end > parent.length() {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!("slice: range [{}, {}) exceeds parent length {}", offset, end, parent.length()),
            ));
        }

        Ok(Self {
            result,
            parent,
            offset,
        })
    }
}

impl Recipe for SliceRecipe {
    fn name(&self) -> &str {
        names::SLICE
    }

    fn result(&self) -> &Item {
        &self.result
    }

    fn number_params(&self) -> &[u64] {
        std::slice::from_ref(&self.offset)
    }

    fn item_params(&self) -> &[Item] {
        std::slice::from_ref(&self.parent)
    }

    fn prepare(
        &self,
        kitchen: &Kitchen,
        mut prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != 1 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "slice: expected exactly 1 prepared ingredient, got {}",
                    prepared_items.len()
                ),
            ));
        }
        let parent = prepared_items.remove(0);
        let length = self.result.length();

        let slot = if parent.can_make_reader() {
            None
        } else {
            Some(kitchen.register_pending_slice(parent.clone(), self.offset, length))
        };

        Ok(PreparedItem::from_slice(
            self.result.clone(),
            parent,
            self.offset,
            length,
            slot,
        ))
    }
}

pub struct SliceTemplate;

impl RecipeTemplate for SliceTemplate {
    fn name(&self) -> &str {
        names::SLICE
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(SliceRecipe::new(result, number_params, item_params)?))
    }
}
