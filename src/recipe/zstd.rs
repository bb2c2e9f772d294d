use std::sync::Arc;

use super::{names, Recipe, RecipeTemplate};
use crate::error::{DiffError, ErrorKind, Result};
use crate::io::sequential::SequentialReaderFactory;
use crate::io::reader::ReaderExt;
use crate::io::{BoxedSequentialReader, StdReadAdapter, StdReadAsSequential};
use crate::item::Item;
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// Window log is capped at 28 (~256 MiB) regardless of how large the
/// declared uncompressed length is.
const MAX_WINDOW_LOG: u32 = 28;

struct DecompressionFactory {
    compressed: Arc<PreparedItem>,
    dictionary: Option<Arc<PreparedItem>>,
    result_length: u64,
}

impl SequentialReaderFactory for DecompressionFactory {
    fn make_sequential_reader(&self) -> Result<BoxedSequentialReader> {
        let upstream = std::io::BufReader::new(StdReadAdapter::new(
            self.compressed.make_sequential_reader()?,
        ));

        let mut decoder = match &self.dictionary {
            None => zstd::stream::read::Decoder::with_buffer(upstream).map_err(|e| {
                DiffError::from_io(ErrorKind::IoZstdDecompressStreamFailed, "zstd decoder init failed", e)
            })?,
            Some(dictionary) => {
                let dict_bytes = dictionary.make_reader()?.read_all()?;
                zstd::stream::read::Decoder::with_dictionary(upstream, &dict_bytes).map_err(|e| {
                    DiffError::from_io(
                        ErrorKind::IoZstdDecompressStreamFailed,
                        "zstd decoder init with dictionary failed",
                        e,
                    )
                })?
            }
        };

        if self.dictionary.is_some() {
            let window_log = window_log_for(self.result_length);
            // Best-effort: some builds of the underlying library reject a
            // window-log override outright; a fixed frame already carries
            // its own window requirement, so failing to raise it just
            // falls back to the frame's declared window.
            let _ = decoder.window_log_max(window_log);
        }

        Ok(Box::new(StdReadAsSequential::new(decoder, self.result_length)))
    }
}

fn window_log_for(uncompressed_length: u64) -> u32 {
    let bits = 64 - uncompressed_length.max(1).leading_zeros();
    bits.clamp(10, MAX_WINDOW_LOG)
}

/// `zstd_decompression`: 1 or 2 item params (compressed, optional
/// dictionary), 0 number params.
pub struct ZstdDecompressionRecipe {
    result: Item,
    compressed: Item,
    dictionary: Option<Item>,
    item_params: Vec<Item>,
}

impl ZstdDecompressionRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        if !number_params.is_empty() {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "zstd_decompression: expected 0 number params, got {}",
                    number_params.len()
                ),
            ));
        }
        if item_params.is_empty() || item_params.len() > 2 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "zstd_decompression: expected 1 or 2 item params, got {}",
                    item_params.len()
                ),
            ));
        }
        let compressed = item_params[0].clone();
        let dictionary = item_params.get(1).cloned();
        Ok(Self {
            result,
            compressed,
            dictionary,
            item_params,
        })
    }
}

impl Recipe for ZstdDecompressionRecipe {
    fn name(&self) -> &str {
        names::ZSTD_DECOMPRESSION
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
        kitchen: &Kitchen,
        prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != self.item_params.len() {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "zstd_decompression: expected {} prepared ingredients, got {}",
                    self.item_params.len(),
                    prepared_items.len()
                ),
            ));
        }
        let _ = kitchen;
        let mut iter = prepared_items.into_iter();
        let compressed = iter.next().expect("length checked above");
        let dictionary = iter.next();

        let factory = Arc::new(DecompressionFactory {
            compressed: compressed.clone(),
            dictionary: dictionary.clone(),
            result_length: self.result.length(),
        });

        let mut ingredients = vec![compressed];
        ingredients.extend(dictionary);

        Ok(PreparedItem::from_sequential_factory(
            self.result.clone(),
            factory,
            ingredients,
        ))
    }
}

pub struct ZstdDecompressionTemplate;

impl RecipeTemplate for ZstdDecompressionTemplate {
    fn name(&self) -> &str {
        names::ZSTD_DECOMPRESSION
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(ZstdDecompressionRecipe::new(
            result,
            number_params,
            item_params,
        )?))
    }
}

/// `zstd_compression`: kept only to preserve typed round-tripping of
/// legacy archives; construction always fails.
pub struct ZstdCompressionRecipe;

impl ZstdCompressionRecipe {
    pub fn new(_result: Item, _number_params: Vec<u64>, _item_params: Vec<Item>) -> Result<Self> {
        Err(DiffError::new(
            ErrorKind::RecipeZstdCompressionNotSupported,
            "zstd_compression is not supported",
        ))
    }
}

pub struct ZstdCompressionTemplate;

impl RecipeTemplate for ZstdCompressionTemplate {
    fn name(&self) -> &str {
        names::ZSTD_COMPRESSION
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        ZstdCompressionRecipe::new(result, number_params, item_params)?;
        unreachable!("ZstdCompressionRecipe::new always errs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::BufferReader;
    use crate::io::reader::ReaderExt as _;
    use std::io::Write;

    #[test]
    fn decompresses_plain_zstd_stream() {
        let plain = b"a message worth compressing, repeated a bit, a bit, a bit".to_vec();
        let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), 0).unwrap();
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let compressed_item = Item::new(compressed.len() as u64);
        let result_item = Item::new(plain.len() as u64);
        let recipe =
            ZstdDecompressionRecipe::new(result_item, vec![], vec![compressed_item.clone()]).unwrap();

        let prepared_input =
            PreparedItem::from_reader(compressed_item, Arc::new(BufferReader::new(compressed)));
        let kitchen = Kitchen::new();
        let prepared = recipe.prepare(&kitchen, vec![prepared_input]).unwrap();
        let out = prepared.make_sequential_reader().unwrap().read_to_end().unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn compression_recipe_construction_always_fails() {
        let err = match ZstdCompressionRecipe::new(Item::new(1), vec![], vec![Item::new(1)]) {
            Ok(_) => panic!("expected zstd compression recipe construction to always fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::RecipeZstdCompressionNotSupported);
    }
}
