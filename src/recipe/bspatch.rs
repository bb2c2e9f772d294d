use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use qbsdiff::Bspatch;

use super::{expect_counts, names, Recipe, RecipeTemplate};
use crate::error::{DiffError, ErrorKind, Result};
use crate::io::channel::{ChannelReader, ChannelWriter, WriterToReaderChannel};
use crate::io::reader::ReaderExt;
use crate::io::sequential::{SequentialReader, SequentialReaderFactory, SequentialWriter};
use crate::io::BoxedSequentialReader;
use crate::item::Item;
use crate::kitchen::Kitchen;
use crate::prepared::PreparedItem;

/// Adapts a [`SequentialWriter`] to `std::io::Write`, the mirror of
/// [`crate::io::StdReadAdapter`], so `qbsdiff::Bspatch::apply` (which only
/// knows the standard `Write` trait) can write into a channel. Also checks
/// the kitchen's shared cancellation flag on every call, since `apply` runs
/// to completion with no other way to interrupt it mid-patch.
struct CancellableChannelWrite {
    inner: ChannelWriter,
    cancelled: Arc<AtomicBool>,
}

impl Write for CancellableChannelWrite {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "bspatch cancelled"));
        }
        self.inner
            .write(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner
            .flush()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

struct BspatchFactory {
    diff: Arc<PreparedItem>,
    dictionary: Arc<PreparedItem>,
    result_length: u64,
    cancelled: Arc<AtomicBool>,
}

impl SequentialReaderFactory for BspatchFactory {
    fn make_sequential_reader(&self) -> Result<BoxedSequentialReader> {
        let channel = WriterToReaderChannel::new(self.result_length);
        let reader = ChannelReader::new(channel.clone());

        let diff = self.diff.clone();
        let dictionary = self.dictionary.clone();
        let result_length = self.result_length;
        let cancelled = self.cancelled.clone();
        let worker_channel = channel.clone();

        thread::spawn(move || {
            match run_patch(&diff, &dictionary, result_length, worker_channel.clone(), cancelled) {
                Ok(()) => worker_channel.cancel(),
                Err(e) => {
                    log::error!("bspatch_decompression producer failed: {}", e);
                    worker_channel.fail(e.to_string());
                }
            }
        });

        Ok(Box::new(reader))
    }
}

/// Both ingredients are pulled in fully with `make_reader` (random access),
/// matching the original C++ recipe, which hands `bspatch` an in-memory
/// patch and dictionary rather than streaming either.
fn run_patch(
    diff: &PreparedItem,
    dictionary: &PreparedItem,
    result_length: u64,
    channel: Arc<WriterToReaderChannel>,
    cancelled: Arc<AtomicBool>,
) -> Result<()> {
    let diff_bytes = diff.make_reader()?.read_all()?;
    let dictionary_bytes = dictionary.make_reader()?.read_all()?;

    let patcher = Bspatch::new(&diff_bytes).map_err(|e| {
        DiffError::from_io(ErrorKind::DiffBspatchFailure, "failed to parse bsdiff patch header", e)
    })?;

    let writer = CancellableChannelWrite {
        inner: ChannelWriter::new(channel),
        cancelled,
    };
    let written = patcher
        .apply(&dictionary_bytes, writer)
        .map_err(|e| DiffError::from_io(ErrorKind::DiffBspatchFailure, "bspatch apply failed", e))?;

    if written != result_length {
        return Err(DiffError::new(
            ErrorKind::DiffBspatchFailure,
            format!("bspatch produced {} bytes, expected {}", written, result_length),
        ));
    }
    Ok(())
}

/// `bspatch_decompression`: exactly 2 item params, `[diff, dictionary]`, no
/// number params.
pub struct BspatchDecompressionRecipe {
    result: Item,
    diff: Item,
    dictionary: Item,
    item_params: Vec<Item>,
}

impl BspatchDecompressionRecipe {
    pub fn new(result: Item, number_params: Vec<u64>, item_params: Vec<Item>) -> Result<Self> {
        expect_counts(names::BSPATCH_DECOMPRESSION, &number_params, 0, &item_params, 2..=2)?;
        Ok(Self {
            result,
            diff: item_params[0].clone(),
            dictionary: item_params[1].clone(),
            item_params,
        })
    }
}

impl Recipe for BspatchDecompressionRecipe {
    fn name(&self) -> &str {
        names::BSPATCH_DECOMPRESSION
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
        mut prepared_items: Vec<Arc<PreparedItem>>,
    ) -> Result<Arc<PreparedItem>> {
        if prepared_items.len() != 2 {
            return Err(DiffError::new(
                ErrorKind::DiffRecipeInvalidParameterCount,
                format!(
                    "bspatch_decompression: expected exactly 2 prepared ingredients, got {}",
                    prepared_items.len()
                ),
            ));
        }
        let dictionary = prepared_items.remove(1);
        let diff = prepared_items.remove(0);

        let factory = Arc::new(BspatchFactory {
            diff: diff.clone(),
            dictionary: dictionary.clone(),
            result_length: self.result.length(),
            cancelled: kitchen.cancellation_token(),
        });

        Ok(PreparedItem::from_sequential_factory(
            self.result.clone(),
            factory,
            vec![diff, dictionary],
        ))
    }
}

pub struct BspatchDecompressionTemplate;

impl RecipeTemplate for BspatchDecompressionTemplate {
    fn name(&self) -> &str {
        names::BSPATCH_DECOMPRESSION
    }

    fn create(
        &self,
        result: Item,
        number_params: Vec<u64>,
        item_params: Vec<Item>,
    ) -> Result<Arc<dyn Recipe>> {
        Ok(Arc::new(BspatchDecompressionRecipe::new(
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
    use qbsdiff::Bsdiff;

    fn make_patch(source: &[u8], target: &[u8]) -> Vec<u8> {
        let mut patch = Vec::new();
        Bsdiff::new(source, target).compare(&mut patch).unwrap();
        patch
    }

    #[test]
    fn patches_a_dictionary_into_the_target() {
        let dictionary = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let target = {
            let mut v = dictionary.clone();
            v.extend_from_slice(b" -- with an appended tail that bsdiff must encode");
            v
        };
        let patch = make_patch(&dictionary, &target);

        let diff_item = Item::new(patch.len() as u64);
        let dictionary_item = Item::new(dictionary.len() as u64);
        let result_item = Item::new(target.len() as u64);

        let recipe = BspatchDecompressionRecipe::new(
            result_item,
            vec![],
            vec![diff_item.clone(), dictionary_item.clone()],
        )
        .unwrap();

        let diff_prepared = PreparedItem::from_reader(diff_item, Arc::new(BufferReader::new(patch)));
        let dictionary_prepared =
            PreparedItem::from_reader(dictionary_item, Arc::new(BufferReader::new(dictionary)));

        let kitchen = Kitchen::new();
        let prepared = recipe
            .prepare(&kitchen, vec![diff_prepared, dictionary_prepared])
            .unwrap();
        let out = prepared.make_sequential_reader().unwrap().read_to_end().unwrap();
        assert_eq!(out, target);
    }

    #[test]
    fn rejects_wrong_item_param_count() {
        let result = Item::new(10);
        let err = match BspatchDecompressionRecipe::new(result, vec![], vec![Item::new(1)]) {
            Ok(_) => panic!("expected a wrong item param count to be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::DiffRecipeInvalidParameterCount);
    }
}
