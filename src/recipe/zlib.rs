use std::sync::Arc;

use flate2::read::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use super::{expect_counts, names, Recipe, RecipeTemplate};
use crate::error::{DiffError, ErrorKind, Result};
use crate::io::sequential::SequentialReaderFactory;
use crate::io::{BoxedSequentialReader, StdReadAdapter, StdReadAsSequential};
use crate::item::Item;
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// Wire values for the zlib "init type" number parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZlibInitType {
    RawDeflate,
    Gzip,
    Zlib,
}

impl ZlibInitType {
    pub fn from_u64(value: u64) -> Result<Self> {
        match value {
            0 => Ok(ZlibInitType::RawDeflate),
            1 => Ok(ZlibInitType::Gzip),
            2 => Ok(ZlibInitType::Zlib),
            other => Err(DiffError::new(
                ErrorKind::DiffBadHashType,
                format!("zlib: unknown init type {}", other),
            )),
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            ZlibInitType::RawDeflate => 0,
            ZlibInitType::Gzip => 1,
            ZlibInitType::Zlib => 2,
        }
    }
}

struct DecompressionFactory {
    init_type: ZlibInitType,
    ingredient: Arc<PreparedItem>,
    result_length: u64,
}

impl SequentialReaderFactory for DecompressionFactory {
    fn make_sequential_reader(&self) -> Result<BoxedSequentialReader> {
        let upstream = StdReadAdapter::new(self.ingredient.make_sequential_reader()?);
        let reader: Box<dyn std::io::Read + Send> = match self.init_type {
            ZlibInitType::RawDeflate => Box::new(DeflateDecoder::new(upstream)),
            ZlibInitType::Gzip => Box::new(GzDecoder::new(upstream)),
            ZlibInitType::Zlib => Box::new(ZlibDecoder::new(upstream)),
        };
        Ok(Box::new(StdReadAsSequential::new(reader, self.result_length)))
    }
}

/// `zlib_decompression`: 1 item param, number param[0] = init type.
pub struct ZlibDecompressionRecipe {
    result: Item,
    parent: Item,
    init_type: ZlibInitType,
    number_params: Vec<u64>,
}

impl ZlibDecompressionRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        expect_counts(names::ZLIB_DECOMPRESSION, &number_params, 1, &item_params, 1..=1)?;
        let init_type = ZlibInitType::from_u64(number_params[0])?;
        Ok(Self {
            result,
            parent: item_params[0].clone(),
            init_type,
            number_params,
        })
    }
}

impl Recipe for ZlibDecompressionRecipe {
    fn name(&self) -> &str {
        names::ZLIB_DECOMPRESSION
    }

    fn result(&self) -> &Item {
        &self.result
    }

    fn number_params(&self) -> &[u64] {
        &self.number_params
    }

    fn item_params(&self) -> &[Item] {
        std::slice::from_ref(&self.parent)
    }

    fn prepare(
        &self,
        _kitchen: &Kitchen,
        mut prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != 1 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                "zlib_decompression: expected exactly 1 prepared ingredient",
            ));
        }
        let ingredient = prepared_items.remove(0);
        let factory = Arc::new(DecompressionFactory {
            init_type: self.init_type,
            ingredient: ingredient.clone(),
            result_length: self.result.length(),
        });
        Ok(PreparedItem::from_sequential_factory(
            self.result.clone(),
            factory,
            vec![ingredient],
        ))
    }
}

pub struct ZlibDecompressionTemplate;

impl RecipeTemplate for ZlibDecompressionTemplate {
    fn name(&self) -> &str {
        names::ZLIB_DECOMPRESSION
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(ZlibDecompressionRecipe::new(
            result,
            number_params,
            item_params,
        )?))
    }
}

/// Sentinel number-param value meaning "default compression level".
pub const ZLIB_DEFAULT_LEVEL: u64 = 0xFFFF_FFFF;

struct CompressionFactory {
    init_type: ZlibInitType,
    level: Compression,
    ingredient: Arc<PreparedItem>,
    result_length: u64,
}

impl SequentialReaderFactory for CompressionFactory {
    fn make_sequential_reader(&self) -> Result<BoxedSequentialReader> {
        let upstream = StdReadAdapter::new(self.ingredient.make_sequential_reader()?);
        let reader: Box<dyn std::io::Read + Send> = match self.init_type {
            ZlibInitType::RawDeflate => Box::new(DeflateEncoder::new(upstream, self.level)),
            ZlibInitType::Gzip => Box::new(GzEncoder::new(upstream, self.level)),
            ZlibInitType::Zlib => Box::new(ZlibEncoder::new(upstream, self.level)),
        };
        Ok(Box::new(StdReadAsSequential::new(reader, self.result_length)))
    }
}

/// `zlib_compression`: 1 item param, number params `[init type, level]`.
pub struct ZlibCompressionRecipe {
    result: Item,
    parent: Item,
    init_type: ZlibInitType,
    level_param: u64,
    number_params: Vec<u64>,
}

impl ZlibCompressionRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        expect_counts(names::ZLIB_COMPRESSION, &number_params, 2, &item_params, 1..=1)?;
        let init_type = ZlibInitType::from_u64(number_params[0])?;
        let level_param = number_params[1];
        if level_param != ZLIB_DEFAULT_LEVEL && level_param > 9 {
            return Err(DiffError::new(
                ErrorKind::RecipeZlibCompressionLevelInvalid,
                format!("zlib_compression: level {} is not in 0..=9", level_param),
            ));
        }
        Ok(Self {
            result,
            parent: item_params[0].clone(),
            init_type,
            level_param,
            number_params,
        })
    }

    fn level(&self) -> Compression {
        if self.level_param == ZLIB_DEFAULT_LEVEL {
            Compression::default()
        } else {
            Compression::new(self.level_param as u32)
        }
    }
}

impl Recipe for ZlibCompressionRecipe {
    fn name(&self) -> &str {
        names::ZLIB_COMPRESSION
    }

    fn result(&self) -> &Item {
        &self.result
    }

    fn number_params(&self) -> &[u64] {
        &self.number_params
    }

    fn item_params(&self) -> &[Item] {
        std::slice::from_ref(&self.parent)
    }

    fn prepare(
        &self,
        _kitchen: &Kitchen,
        mut prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != 1 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                "zlib_compression: expected exactly 1 prepared ingredient",
            ));
        }
        let ingredient = prepared_items.remove(0);
        let factory = Arc::new(CompressionFactory {
            init_type: self.init_type,
            level: self.level(),
            ingredient: ingredient.clone(),
            result_length: self.result.length(),
        });
        Ok(PreparedItem::from_sequential_factory(
            self.result.clone(),
            factory,
            vec![ingredient],
        ))
    }
}

pub struct ZlibCompressionTemplate;

impl RecipeTemplate for ZlibCompressionTemplate {
    fn name(&self) -> &str {
        names::ZLIB_COMPRESSION
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(ZlibCompressionRecipe::new(
            result,
            number_params,
            item_params,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::BufferReader;
    use crate::io::reader::ReaderExt;
    use flate2::write::ZlibEncoder as ZlibWriteEncoder;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibWriteEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn decompresses_zlib_stream() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = zlib_compress(&plain);

        let compressed_item = Item::new(compressed.len() as u64);
        let result_item = Item::new(plain.len() as u64);

        let recipe = ZlibDecompressionRecipe::new(
            result_item.clone(),
            vec![ZlibInitType::Zlib.as_u64()],
            vec![compressed_item.clone()],
        )
        .unwrap();

        let prepared_input =
            PreparedItem::from_reader(compressed_item, Arc::new(BufferReader::new(compressed)));

        let kitchen = Kitchen::new();
        let prepared = recipe.prepare(&kitchen, vec![prepared_input]).unwrap();
        let mut stream = prepared.make_sequential_reader().unwrap();
        let out = stream.read_to_end().unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn compress_then_decompress_round_trips() {
        let plain = b"round trip me please, with some repetition repetition repetition".to_vec();
        let plain_item = Item::new(plain.len() as u64);

        // First compress (result length isn't known up front for a real
        // codec, so size this test's compressed item generously and trim).
        let mut enc = ZlibWriteEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&plain).unwrap();
        let compressed_bytes = enc.finish().unwrap();
        let compressed_item = Item::new(compressed_bytes.len() as u64);

        let compress_recipe = ZlibCompressionRecipe::new(
            compressed_item.clone(),
            vec![ZlibInitType::Zlib.as_u64(), ZLIB_DEFAULT_LEVEL],
            vec![plain_item.clone()],
        )
        .unwrap();

        let prepared_plain = PreparedItem::from_reader(plain_item, Arc::new(BufferReader::new(plain.clone())));
        let kitchen = Kitchen::new();
        let prepared_compressed = compress_recipe.prepare(&kitchen, vec![prepared_plain]).unwrap();
        let recompressed = prepared_compressed.make_sequential_reader().unwrap().read_to_end().unwrap();
        assert_eq!(recompressed, compressed_bytes);

        let decompress_recipe = ZlibDecompressionRecipe::new(
            Item::new(plain.len() as u64),
            vec![ZlibInitType::Zlib.as_u64()],
            vec![compressed_item.clone()],
        )
        .unwrap();
        let prepared_compressed_input =
            PreparedItem::from_reader(compressed_item, Arc::new(BufferReader::new(recompressed)));
        let roundtripped = decompress_recipe
            .prepare(&kitchen, vec![prepared_compressed_input])
            .unwrap()
            .make_sequential_reader()
            .unwrap()
            .read_to_end()
            .unwrap();
        assert_eq!(roundtripped, plain);
    }

    #[test]
    fn rejects_invalid_compression_level() {
        let parent = Item::new(5);
        let result = Item::new(5);
        let err = match ZlibCompressionRecipe::new(result, vec![0, 10], vec![parent]) {
            Ok(_) => panic!("expected an invalid compression level to be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::RecipeZlibCompressionLevelInvalid);
    }

    #[test]
    fn default_sentinel_level_is_accepted() {
        let parent = Item::new(5);
        let result = Item::new(5);
        assert!(ZlibCompressionRecipe::new(result, vec![0, ZLIB_DEFAULT_LEVEL], vec![parent]).is_ok());
    }
}
