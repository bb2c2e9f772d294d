//! Black-box scenario tests, driven entirely through the public API — the
//! same surface `applydiff` and other external callers see.

use std::io::Write as _;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use archive_diff::error::ErrorKind;
use archive_diff::io::buffer::BufferReader;
use archive_diff::io::reader::ReaderExt as _;
use archive_diff::io::SharedReader;
use archive_diff::item::{HashAlgorithm, Item};
use archive_diff::kitchen::Kitchen;
use archive_diff::prepared::PreparedItem;
use archive_diff::recipe::{AllZerosRecipe, ChainRecipe, SliceRecipe, ZlibDecompressionRecipe, ZlibInitType};
use archive_diff::Archive;

#[test]
fn all_zeros_resolves_to_a_fixed_length_buffer() {
    let target = Item::new(1000).with_hash(HashAlgorithm::Sha256, vec![0u8; 32]);
    let kitchen = Kitchen::new();
    kitchen.add_recipe(Arc::new(AllZerosRecipe::new(target.clone(), vec![1000], vec![]).unwrap()));
    kitchen.request_item(target.clone());

    assert!(kitchen.process_requested_items().unwrap());

    let prepared = kitchen.fetch_item(&target).unwrap();
    assert_eq!(prepared.make_reader().unwrap().read_all().unwrap(), vec![0u8; 1000]);
    assert_eq!(
        prepared.make_sequential_reader().unwrap().read_to_end().unwrap(),
        vec![0u8; 1000]
    );
}

#[test]
fn chain_of_singleton_slices_spells_a_word() {
    let alphabet = Item::new(26);
    let kitchen = Kitchen::new();
    kitchen.store_item(PreparedItem::from_reader(
        alphabet.clone(),
        Arc::new(BufferReader::new(b"abcdefghijklmnopqrstuvwxyz".to_vec())),
    ));

    let mut letters = Vec::new();
    for i in 0..26u8 {
        let letter = Item::new(1).with_hash(HashAlgorithm::Md5, vec![i; 16]);
        kitchen.add_recipe(Arc::new(
            SliceRecipe::new(letter.clone(), vec![i as u64], vec![alphabet.clone()]).unwrap(),
        ));
        letters.push(letter);
    }

    let word: Vec<Item> = "slice".bytes().map(|b| letters[(b - b'a') as usize].clone()).collect();
    let result = Item::new(5);
    kitchen.add_recipe(Arc::new(ChainRecipe::new(result.clone(), vec![], word).unwrap()));

    kitchen.request_item(result.clone());
    assert!(kitchen.process_requested_items().unwrap());
    kitchen.resume_slicing().unwrap();

    let prepared = kitchen.fetch_item(&result).unwrap();
    assert_eq!(prepared.make_reader().unwrap().read_all().unwrap(), b"slice");
}

#[test]
fn slicing_a_zlib_decompression_needs_resume_slicing_first() {
    let plain = b"the quick brown fox jumps over the lazy dog".repeat(50);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&plain).unwrap();
    let compressed = encoder.finish().unwrap();

    let compressed_item = Item::new(compressed.len() as u64);
    let uncompressed_item = Item::new(plain.len() as u64);

    let kitchen = Kitchen::new();
    kitchen.store_item(PreparedItem::from_reader(
        compressed_item.clone(),
        Arc::new(BufferReader::new(compressed)),
    ));
    kitchen.add_recipe(Arc::new(
        ZlibDecompressionRecipe::new(
            uncompressed_item.clone(),
            vec![ZlibInitType::Zlib.as_u64()],
            vec![compressed_item],
        )
        .unwrap(),
    ));

    let slice_item = Item::new(1000).with_hash(HashAlgorithm::Md5, vec![1; 16]);
    kitchen.add_recipe(Arc::new(
        SliceRecipe::new(slice_item.clone(), vec![100], vec![uncompressed_item]).unwrap(),
    ));

    kitchen.request_item(slice_item.clone());
    assert!(kitchen.process_requested_items().unwrap());

    let prepared = kitchen.fetch_item(&slice_item).unwrap();
    let err = prepared.make_reader().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiffSlicingInvalidState);

    kitchen.resume_slicing().unwrap();
    assert_eq!(prepared.make_reader().unwrap().read_all().unwrap(), &plain[100..1100]);
}

#[test]
fn overlapping_slices_of_the_same_sequential_parent_are_rejected() {
    let plain = b"0123456789".repeat(5);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&plain).unwrap();
    let compressed = encoder.finish().unwrap();

    let compressed_item = Item::new(compressed.len() as u64);
    let uncompressed_item = Item::new(plain.len() as u64);

    let kitchen = Kitchen::new();
    kitchen.store_item(PreparedItem::from_reader(
        compressed_item.clone(),
        Arc::new(BufferReader::new(compressed)),
    ));
    kitchen.add_recipe(Arc::new(
        ZlibDecompressionRecipe::new(
            uncompressed_item.clone(),
            vec![ZlibInitType::Zlib.as_u64()],
            vec![compressed_item],
        )
        .unwrap(),
    ));

    let a = Item::new(10).with_hash(HashAlgorithm::Md5, vec![1; 16]);
    let b = Item::new(10).with_hash(HashAlgorithm::Md5, vec![2; 16]);
    kitchen.add_recipe(Arc::new(SliceRecipe::new(a.clone(), vec![0], vec![uncompressed_item.clone()]).unwrap()));
    kitchen.add_recipe(Arc::new(SliceRecipe::new(b.clone(), vec![5], vec![uncompressed_item]).unwrap()));

    kitchen.request_item(a);
    kitchen.request_item(b);
    assert!(kitchen.process_requested_items().unwrap());

    let err = kitchen.resume_slicing().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiffSlicingRequestSliceOverlap);
}

#[test]
fn self_referential_slice_fails_at_construction() {
    let parent = Item::new(100);
    let result = Item::new(100);
    let err = SliceRecipe::new(result, vec![0], vec![parent]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecipeSelfReferential);
}

// Hand-assembled minimal legacy container used by the round-trip test below.
struct ByteWriter(Vec<u8>);
impl ByteWriter {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn u64_be(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn hash(&mut self, digest: &[u8]) {
        self.0.extend_from_slice(&HashAlgorithm::Sha256.legacy_tag().to_be_bytes());
        self.0.extend_from_slice(digest);
    }
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

#[test]
fn legacy_copy_source_round_trips() {
    let source_bytes = b"abcdefghijklmnopqrstuvwxyz".to_vec();
    let source_hash = sha256(&source_bytes);
    let target_bytes = source_bytes[4..9].to_vec();
    let target_hash = sha256(&target_bytes);

    let mut w = ByteWriter(Vec::new());
    w.0.extend_from_slice(b"PAMZ");
    w.u64_be(0); // version
    w.u64_be(target_bytes.len() as u64);
    w.hash(&target_hash);
    w.u64_be(source_bytes.len() as u64); // source item present
    w.hash(&source_hash);

    w.u64_be(1); // chunk_count
    w.u64_be(target_bytes.len() as u64);
    w.hash(&target_hash);
    w.u8(7); // copy_source tag
    w.u8(1); // parameter_count: one number param (offset)
    w.u8(1); // kind 1 = number
    w.u64_be(4); // offset

    w.u64_be(0); // inline_assets_size
    w.u64_be(0); // remainder_uncompressed_size
    w.u64_be(0); // remainder_compressed_size

    let reader: SharedReader = Arc::new(BufferReader::new(w.0));
    let archive = Archive::open(reader).unwrap();
    assert_eq!(archive.target_item().hash(HashAlgorithm::Sha256), Some(target_hash.as_slice()));

    archive.provide_source(Arc::new(BufferReader::new(source_bytes))).unwrap();
    let prepared = archive.prepare_target().unwrap();
    assert_eq!(prepared.make_reader().unwrap().read_all().unwrap(), target_bytes);
}

#[test]
fn unrecognized_container_is_rejected() {
    let reader: SharedReader = Arc::new(BufferReader::new(b"definitely not a diff container".to_vec()));
    let err = Archive::open(reader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiffUnrecognizedContainer);
}
