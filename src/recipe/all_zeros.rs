use std::sync::Arc;

use super::{expect_counts, names, Recipe, RecipeTemplate};
use crate::error::{DiffError, ErrorKind, Result};
use crate::io::buffer::ZeroReader;
use crate::item::Item;
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// `all_zeros`: yields `length` zero bytes, no ingredients.
pub struct AllZerosRecipe {
    result: Item,
    number_params: Vec<u64>,
}

impl AllZerosRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        expect_counts(names::ALL_ZEROS, &number_params, 1, &item_params, 0..=0)?;
        let length = number_params[0];
        if length != result.length() {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "all_zeros: declared length {} does not match result item length {}",
                    length,
                    result.length()
                ),
            ));
        }
        Ok(Self {
            result,
            number_params,
        })
    }
}

impl Recipe for AllZerosRecipe {
    fn name(&self) -> &str {
        names::ALL_ZEROS
    }

    fn result(&self) -> &Item {
        &self.result
    }

    fn number_params(&self) -> &[u64] {
        &self.number_params
    }

    fn item_params(&self) -> &[Item] {
        &[]
    }

    fn prepare(&self, _kitchen: &Kitchen, _prepared_items: Vec<Arc<PreparedItem>>) -> Result<Arc<PreparedItem>> {
        let reader = Arc::new(ZeroReader::new(self.number_params[0]));
        Ok(PreparedItem::from_reader(self.result.clone(), reader))
    }
}

pub struct AllZerosTemplate;

impl RecipeTemplate for AllZerosTemplate {
    fn name(&self) -> &str {
        names::ALL_ZEROS
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(AllZerosRecipe::new(result, number_params, item_params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reader::ReaderExt;
    use crate::kitchen::Kitchen;

    #[test]
    fn produces_requested_number_of_zero_bytes() {
        let result = Item::new(1000);
        let recipe = AllZerosRecipe::new(result.clone(), vec![1000], vec![]).unwrap();
        let kitchen = Kitchen::new();
        let prepared = recipe.prepare(&kitchen, vec![]).unwrap();
        let bytes = prepared.make_reader().unwrap().read_all().unwrap();
        assert_eq!(bytes.len(), 1000);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_length_mismatch() {
        let result = Item::new(10);
        assert!(AllZerosRecipe::new(result, vec![20], vec![]).is_err());
    }
}
