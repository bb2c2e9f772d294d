use std::sync::Arc;

use super::{names, Recipe, RecipeTemplate};
use crate::error::{DiffError, ErrorKind, Result};
use crate::item::{Item, MatchResult};
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// `chain`: concatenates N ingredients in order, no numeric parameters.
pub struct ChainRecipe {
    result: Item,
    item_params: Vec<Item>,
}

impl ChainRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        if !number_params.is_empty() {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "chain: expected 0 number params, got {}",
                    number_params.len()
                ),
            ));
        }
        let total = item_params.iter().try_fold(0u64, |acc, item| acc.checked_add(item.length())).ok_or_else(|| {
            DiffError::new(
                ErrorKind::RecipeChainTotalItemLengthMismatch,
                "chain: ingredient lengths overflow when summed",
            )
        })?;
        if total != result.length() {
            return Err(DiffError::new(
                ErrorKind::RecipeChainTotalItemLengthMismatch,
                format!(
                    "chain: ingredient lengths sum to {} but result length is {}",
                    total,
                    result.length()
                ),
            ));
        }
        Ok(Self { result, item_params })
    }
}

impl Recipe for ChainRecipe {
    fn name(&self) -> &str {
        names::CHAIN
    }

    fn result(&self) -> &Item {
        &self.result
    }

    fn number_params(&self) -> &[u64] {
        &[]
    }

    fn item_params(&self) -> &[Item] {
        &self.item_params
    }

    fn prepare(
        &self,
        _kitchen: &Kitchen,
        prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != self.item_params.len() {
            return Err(DiffError::new(
                ErrorKind::RecipeChainItemAndRecipeMismatch,
                format!(
                    "chain: expected {} prepared ingredients, got {}",
                    self.item_params.len(),
                    prepared_items.len()
                ),
            ));
        }
        for (expected, prepared) in self.item_params.iter().zip(prepared_items.iter()) {
            if matches!(
                expected.matches(prepared.get_item_definition()),
                MatchResult::NoMatch
            ) {
                return Err(DiffError::new(
                    ErrorKind::RecipeChainItemAndRecipeMismatch,
                    "chain: a prepared ingredient does not match its declared item parameter",
                ));
            }
        }
        Ok(PreparedItem::from_chain(self.result.clone(), prepared_items))
    }
}

pub struct ChainTemplate;

impl RecipeTemplate for ChainTemplate {
    fn name(&self) -> &str {
        names::CHAIN
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(ChainRecipe::new(result, number_params, item_params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::BufferReader;
    use crate::io::reader::ReaderExt;
    use crate::kitchen::Kitchen;

    #[test]
    fn concatenates_ingredients_in_order() {
        let a = Item::new(3);
        let b = Item::new(2);
        let result = Item::new(5);
        let recipe = ChainRecipe::new(result.clone(), vec![], vec![a.clone(), b.clone()]).unwrap();

        let pa = PreparedItem::from_reader(a, Arc::new(BufferReader::new(b"abc".to_vec())));
        let pb = PreparedItem::from_reader(b, Arc::new(BufferReader::new(b"de".to_vec())));

        let kitchen = Kitchen::new();
        let prepared = recipe.prepare(&kitchen, vec![pa, pb]).unwrap();
        assert_eq!(prepared.make_reader().unwrap().read_all().unwrap(), b"abcde");
    }

    #[test]
    fn rejects_length_sum_mismatch() {
        let a = Item::new(3);
        let result = Item::new(10);
        assert!(ChainRecipe::new(result, vec![], vec![a]).is_err());
    }

    #[test]
    fn rejects_ingredient_length_sum_overflow() {
        let a = Item::new(u64::MAX - 1);
        let b = Item::new(2);
        let result = Item::new(10);
        let err = match ChainRecipe::new(result, vec![], vec![a, b]) {
            Ok(_) => panic!("expected an overflowing ingredient length sum to be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::RecipeChainTotalItemLengthMismatch);
    }
}
