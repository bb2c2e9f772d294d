//! The legacy container format: a sequential, big-endian binary
//! layout (magic `PAMZ`, version 0) ported from
//! `serialization/legacy/deserializer.cpp`. Parsing walks the stream once,
//! building items and recipes as it goes, then fixes up a handful of
//! recipe kinds (remainder, inline assets, nested diffs) whose final shape
//! depends on sizes only known once the whole header has been read.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ReadBytesExt};

use super::Archive;
use crate::error::{DiffError, ErrorKind, Result};
use crate::io::reader::Reader;
use crate::io::sequential::SequentialReader;
use crate::io::{ReaderAsSequential, ReaderExt, SharedReader};
use crate::item::{HashAlgorithm, Item};
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;
use crate::recipe::{names, ChainRecipe, Recipe, RecipeTemplateRegistry, ZlibDecompressionRecipe, ZlibInitType};

const MAGIC: &[u8; 4] = b"PAMZ";
const DIFF_VERSION: u64 = 0;
const HEADER_SIZE: u64 = 4 + 8;

/// Adapts `&mut dyn SequentialReader` to `std::io::Read` so `byteorder` can
/// parse the fixed-width integers this format is built from.
struct SeqAsStdRead<'a> {
    inner: &'a mut dyn SequentialReader,
}

impl std::io::Read for SeqAsStdRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner
            .read_some(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

fn read_u8(r: &mut dyn SequentialReader) -> Result<u8> {
    SeqAsStdRead { inner: r }
        .read_u8()
        .map_err(|e| DiffError::from_io(ErrorKind::IoReaderReadFailure, "short read (u8)", e))
}

fn read_u32_be(r: &mut dyn SequentialReader) -> Result<u32> {
    SeqAsStdRead { inner: r }
        .read_u32::<BigEndian>()
        .map_err(|e| DiffError::from_io(ErrorKind::IoReaderReadFailure, "short read (u32 be)", e))
}

fn read_u64_be(r: &mut dyn SequentialReader) -> Result<u64> {
    SeqAsStdRead { inner: r }
        .read_u64::<BigEndian>()
        .map_err(|e| DiffError::from_io(ErrorKind::IoReaderReadFailure, "short read (u64 be)", e))
}

fn read_hash(r: &mut dyn SequentialReader) -> Result<(HashAlgorithm, Vec<u8>)> {
    let tag = read_u32_be(r)?;
    let algorithm = HashAlgorithm::from_legacy_tag(tag)
        .ok_or_else(|| DiffError::new(ErrorKind::DiffBadHashType, format!("unrecognized hash algorithm tag {}", tag)))?;
    let mut digest = vec![0u8; algorithm.digest_len()];
    r.read_exact(&mut digest)?;
    Ok((algorithm, digest))
}

/// Cheap sniff: random-access only, never commits to a full parse.
pub(crate) fn is_this_format(reader: &dyn Reader) -> Result<bool> {
    if reader.size() < HEADER_SIZE {
        return Ok(false);
    }
    let mut magic = [0u8; 4];
    reader.read_exact(0, &mut magic)?;
    if &magic != MAGIC {
        return Ok(false);
    }
    let mut version_bytes = [0u8; 8];
    reader.read_exact(4, &mut version_bytes)?;
    Ok(u64::from_be_bytes(version_bytes) == DIFF_VERSION)
}

/// Legacy recipe type tags (`legacy_recipe_type.h`), values as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyRecipeType {
    Copy,
    Region,
    Concatenation,
    Bsdiff,
    Nested,
    Remainder,
    InlineAsset,
    CopySource,
    ZstdDelta,
    InlineAssetCopy,
    ZstdCompression,
    ZstdDecompression,
    AllZero,
    GzDecompression,
}

impl LegacyRecipeType {
    fn from_u32(tag: u32) -> Result<Self> {
        Ok(match tag {
            0 => Self::Copy,
            1 => Self::Region,
            2 => Self::Concatenation,
            3 => Self::Bsdiff,
            4 => Self::Nested,
            5 => Self::Remainder,
            6 => Self::InlineAsset,
            7 => Self::CopySource,
            8 => Self::ZstdDelta,
            9 => Self::InlineAssetCopy,
            10 => Self::ZstdCompression,
            11 => Self::ZstdDecompression,
            12 => Self::AllZero,
            13 => Self::GzDecompression,
            other => {
                return Err(DiffError::new(
                    ErrorKind::DiffRecipeParameterReadInvalidType,
                    format!("unknown legacy recipe type tag {}", other),
                ))
            }
        })
    }
}

/// A 1-byte tag, escaped to a 4-byte tag when it would overflow a `u8`.
fn read_recipe_type(r: &mut dyn SequentialReader) -> Result<LegacyRecipeType> {
    let byte = read_u8(r)?;
    let tag = if byte < u8::MAX { byte as u32 } else { read_u32_be(r)? };
    LegacyRecipeType::from_u32(tag)
}

/// `legacy_archive_item_type`: only `Chunk` carries an extra (unused, wire-
/// only) 8-byte offset ahead of the common length/hash/has-recipe fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyArchiveItemType {
    Blob,
    Chunk,
    Payload,
}

impl LegacyArchiveItemType {
    fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Blob,
            1 => Self::Chunk,
            2 => Self::Payload,
            other => {
                return Err(DiffError::new(
                    ErrorKind::DiffRecipeParameterReadInvalidType,
                    format!("unknown archive item type tag {}", other),
                ))
            }
        })
    }
}

/// Mounts a nested archive lazily: the diff blob is an ordinary item
/// dependency resolved by the owning kitchen like any other recipe
/// ingredient, so this needs no secondary kitchen bootstrap. The nested
/// `Archive` is cached in the outer archive's `nested` map both to dedupe
/// repeat mounts of the same result item and, just as importantly, to keep
/// its kitchen (and any streaming-slice producer threads it starts) alive
/// for as long as the outer archive is.
struct NestedMountRecipe {
    result: Item,
    diff_item: Item,
    nested: Arc<Mutex<BTreeMap<Item, Arc<Archive>>>>,
}

impl NestedMountRecipe {
    fn new(result: Item, item_params: Vec<Item>, nested: Arc<Mutex<BTreeMap<Item, Arc<Archive>>>>) -> Result<Self> {
        if item_params.len() != 2 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!("nested: expected exactly 2 item params on the wire, got {}", item_params.len()),
            ));
        }
        Ok(Self {
            result,
            diff_item: item_params[0].clone(),
            nested,
        })
    }
}

impl Recipe for NestedMountRecipe {
    fn name(&self) -> &str {
        "nested"
    }

    fn result(&self) -> &Item {
        &self.result
    }

    fn number_params(&self) -> &[u64] {
        &[]
    }

    fn item_params(&self) -> &[Item] {
        std::slice::from_ref(&self.diff_item)
    }

    fn prepare(&self, _kitchen: &Kitchen, mut prepared_items: Vec<Arc<PreparedItem>>) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != 1 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                "nested: expected exactly 1 prepared ingredient",
            ));
        }
        let diff_prepared = prepared_items.remove(0);
        let diff_reader = diff_prepared.make_reader()?;

        let existing = self
            .nested
            .lock()
            .expect("nested archives mutex poisoned")
            .get(&self.result)
            .cloned();
        let nested_archive = match existing {
            Some(archive) => archive,
            None => {
                let archive = Arc::new(Archive::open(diff_reader)?);
                self.nested
                    .lock()
                    .expect("nested archives mutex poisoned")
                    .insert(self.result.clone(), archive.clone());
                archive
            }
        };

        let nested_target = nested_archive.prepare_target()?;
        Ok(PreparedItem::from_chain(self.result.clone(), vec![nested_target]))
    }
}

/// Accumulates state while walking the stream: recipes ready to register
/// immediately, plus the handful of recipe kinds whose final item params
/// are only known once the remainder/inline-assets sizes have been read.
struct ParseContext {
    source_item: Option<Item>,
    recipes: Vec<Arc<dyn Recipe>>,
    pending_remainder: Vec<Item>,
    pending_inline_assets: Vec<Item>,
    pending_inline_asset_copies: Vec<(Item, u64)>,
    templates: RecipeTemplateRegistry,
    nested: Arc<Mutex<BTreeMap<Item, Arc<Archive>>>>,
}

impl ParseContext {
    fn new(source_item: Option<Item>, nested: Arc<Mutex<BTreeMap<Item, Arc<Archive>>>>) -> Self {
        Self {
            source_item,
            recipes: Vec::new(),
            pending_remainder: Vec::new(),
            pending_inline_assets: Vec::new(),
            pending_inline_asset_copies: Vec::new(),
            templates: RecipeTemplateRegistry::with_builtins(),
            nested,
        }
    }

    fn add_legacy_recipe(
        &mut self,
        tag: LegacyRecipeType,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<()> {
        use LegacyRecipeType::*;
        match tag {
            Copy => {}
            Region => {
                // Two number params on the wire; only the first (offset)
                // is used, the second is discarded (per `add_legacy_recipe`'s
                // `region` case in the original deserializer).
                if number_params.len() != 2 {
                    return Err(DiffError::new(
                        ErrorKind::DiffRecipeInvalidParameterCount,
                        format!("region: expected 2 number params on the wire, got {}", number_params.len()),
                    ));
                }
                let recipe = self
                    .templates
                    .create(names::SLICE, result, vec![number_params[0]], item_params)?;
                self.recipes.push(recipe);
            }
            Concatenation => {
                let recipe = self.templates.create(names::CHAIN, result, vec![], item_params)?;
                self.recipes.push(recipe);
            }
            Bsdiff => {
                let recipe = self
                    .templates
                    .create(names::BSPATCH_DECOMPRESSION, result, number_params, item_params)?;
                self.recipes.push(recipe);
            }
            Nested => {
                let recipe = NestedMountRecipe::new(result, item_params, self.nested.clone())?;
                self.recipes.push(Arc::new(recipe));
            }
            Remainder => {
                self.pending_remainder.push(result);
            }
            InlineAsset => {
                self.pending_inline_assets.push(result);
            }
            InlineAssetCopy => {
                let offset = *number_params.first().ok_or_else(|| {
                    DiffError::new(
                        ErrorKind::DiffRecipeInvalidParameterCount,
                        "inline_asset_copy: expected at least 1 number param",
                    )
                })?;
                self.pending_inline_asset_copies.push((result, offset));
            }
            CopySource => {
                if number_params.len() != 1 {
                    return Err(DiffError::new(
                        ErrorKind::DiffRecipeInvalidParameterCount,
                        format!("copy_source: expected 1 number param, got {}", number_params.len()),
                    ));
                }
                let source = self.source_item.clone().ok_or_else(|| {
                    DiffError::new(ErrorKind::DiffItemNotAvailable, "copy_source recipe requires an archive source item")
                })?;
                let recipe = self
                    .templates
                    .create(names::SLICE, result, vec![number_params[0]], vec![source])?;
                self.recipes.push(recipe);
            }
            ZstdDelta | ZstdDecompression => {
                let recipe = self
                    .templates
                    .create(names::ZSTD_DECOMPRESSION, result, number_params, item_params)?;
                self.recipes.push(recipe);
            }
            ZstdCompression => {
                let recipe = self
                    .templates
                    .create(names::ZSTD_COMPRESSION, result, number_params, item_params)?;
                self.recipes.push(recipe);
            }
            AllZero => {
                let recipe = self.templates.create(names::ALL_ZEROS, result, number_params, item_params)?;
                self.recipes.push(recipe);
            }
            GzDecompression => {
                // `c_zlib_gz_init` in the original: the wire's own number
                // params are ignored in favor of the hardcoded gzip init type.
                let recipe = self.templates.create(
                    names::ZLIB_DECOMPRESSION,
                    result,
                    vec![ZlibInitType::Gzip.as_u64()],
                    item_params,
                )?;
                self.recipes.push(recipe);
            }
        }
        Ok(())
    }
}

fn read_archive_item(r: &mut dyn SequentialReader, ctx: &mut ParseContext) -> Result<Item> {
    let item_type = LegacyArchiveItemType::from_u8(read_u8(r)?)?;
    if item_type == LegacyArchiveItemType::Chunk {
        let _offset = read_u64_be(r)?;
    }
    let length = read_u64_be(r)?;
    let (algorithm, digest) = read_hash(r)?;
    let item = Item::new(length).with_hash(algorithm, digest);

    let has_recipe = read_u8(r)?;
    if has_recipe != 0 {
        read_recipe(r, &item, ctx)?;
    }
    Ok(item)
}

fn read_recipe(r: &mut dyn SequentialReader, result: &Item, ctx: &mut ParseContext) -> Result<()> {
    let tag = read_recipe_type(r)?;

    let parameter_count = read_u8(r)?;
    let mut number_params = Vec::new();
    let mut item_params = Vec::new();
    for _ in 0..parameter_count {
        match read_u8(r)? {
            1 => number_params.push(read_u64_be(r)?),
            0 => item_params.push(read_archive_item(r, ctx)?),
            other => {
                return Err(DiffError::new(
                    ErrorKind::DiffRecipeParameterReadInvalidType,
                    format!("invalid recipe parameter type {}", other),
                ))
            }
        }
    }

    ctx.add_legacy_recipe(tag, result.clone(), number_params, item_params)
}

fn read_chunk(r: &mut dyn SequentialReader, ctx: &mut ParseContext) -> Result<Item> {
    let length = read_u64_be(r)?;
    let (algorithm, digest) = read_hash(r)?;
    let item = Item::new(length).with_hash(algorithm, digest);
    read_recipe(r, &item, ctx)?;
    Ok(item)
}

/// Parses the full legacy container out of `reader`.
pub(crate) fn parse(reader: SharedReader) -> Result<Archive> {
    let mut seq = ReaderAsSequential::new(reader.clone());

    let mut magic = [0u8; 4];
    seq.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(DiffError::new(ErrorKind::DiffMagicHeaderWrong, "not a valid legacy diff: bad magic"));
    }
    let version = read_u64_be(&mut seq)?;
    if version != DIFF_VERSION {
        return Err(DiffError::new(
            ErrorKind::DiffVersionWrong,
            format!("unsupported legacy diff version {}", version),
        ));
    }

    let target_length = read_u64_be(&mut seq)?;
    let (target_algorithm, target_digest) = read_hash(&mut seq)?;
    let target_item = Item::new(target_length).with_hash(target_algorithm, target_digest);

    let mut archive = Archive::new(target_item.clone());

    let source_length = read_u64_be(&mut seq)?;
    let source_item = if source_length != 0 {
        let (source_algorithm, source_digest) = read_hash(&mut seq)?;
        let item = Item::new(source_length).with_hash(source_algorithm, source_digest);
        archive.set_source_item(item.clone());
        Some(item)
    } else {
        None
    };

    let mut ctx = ParseContext::new(source_item, archive.nested_handle());

    let chunk_count = read_u64_be(&mut seq)?;
    let mut chain_ingredients = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        chain_ingredients.push(read_chunk(&mut seq, &mut ctx)?);
    }
    let chain_recipe = ChainRecipe::new(target_item.clone(), vec![], chain_ingredients)?;
    ctx.recipes.push(Arc::new(chain_recipe));

    let inline_assets_size = read_u64_be(&mut seq)?;
    let inline_assets_offset = seq.tellg();
    seq.skip(inline_assets_size)?;

    let remainder_uncompressed_size = read_u64_be(&mut seq)?;
    let remainder_compressed_size = read_u64_be(&mut seq)?;
    let remainder_offset = seq.tellg();

    let diff_size = remainder_offset + remainder_compressed_size;
    if diff_size != reader.size() {
        return Err(DiffError::new(
            ErrorKind::DiffReadDiffSizeMismatch,
            format!(
                "size mismatch for diff: computed {} from reading the header, reader reports {}",
                diff_size,
                reader.size()
            ),
        ));
    }

    let diff_item = Item::new(reader.size()).with_name("diff");
    let diff_prepared = PreparedItem::from_reader(diff_item, reader.clone());
    archive.store_item(diff_prepared.clone());

    let remainder_compressed_item = Item::new(remainder_compressed_size).with_name("remainder.compressed");
    let remainder_compressed_prepared = PreparedItem::from_slice(
        remainder_compressed_item.clone(),
        diff_prepared.clone(),
        remainder_offset,
        remainder_compressed_size,
        None,
    );
    archive.store_item(remainder_compressed_prepared.clone());

    let remainder_uncompressed_item = Item::new(remainder_uncompressed_size).with_name("remainder.uncompressed");
    let remainder_decompression = ZlibDecompressionRecipe::new(
        remainder_uncompressed_item.clone(),
        vec![ZlibInitType::RawDeflate.as_u64()],
        vec![remainder_compressed_item],
    )?;
    let remainder_uncompressed_prepared =
        remainder_decompression.prepare(archive.kitchen(), vec![remainder_compressed_prepared])?;
    archive.store_item(remainder_uncompressed_prepared);

    let inline_assets_item = Item::new(inline_assets_size).with_name("inline_assets");
    let inline_assets_prepared = PreparedItem::from_slice(
        inline_assets_item.clone(),
        diff_prepared,
        inline_assets_offset,
        inline_assets_size,
        None,
    );
    archive.store_item(inline_assets_prepared);

    // Fix up the remainder/inline-asset slices now that their parents and
    // sizes are known: each group slices its shared parent at a running,
    // auto-incrementing offset, in the order encountered during the main
    // chunk scan above. `inline_asset_copy` instead keeps the explicit
    // offset it carried on the wire.
    let mut offset = 0u64;
    for result in ctx.pending_remainder {
        let length = result.length();
        let recipe = ctx
            .templates
            .create(names::SLICE, result, vec![offset], vec![remainder_uncompressed_item.clone()])?;
        ctx.recipes.push(recipe);
        offset += length;
    }

    let mut offset = 0u64;
    for result in ctx.pending_inline_assets {
        let length = result.length();
        let recipe = ctx
            .templates
            .create(names::SLICE, result, vec![offset], vec![inline_assets_item.clone()])?;
        ctx.recipes.push(recipe);
        offset += length;
    }

    for (result, explicit_offset) in ctx.pending_inline_asset_copies {
        let recipe = ctx
            .templates
            .create(names::SLICE, result, vec![explicit_offset], vec![inline_assets_item.clone()])?;
        ctx.recipes.push(recipe);
    }

    for recipe in ctx.recipes {
        archive.add_recipe(recipe);
    }

    Ok(archive)
}
