//! Prepared items: the materialized providers of bytes for an item.
//!
//! A prepared item is one of four concrete kinds (the fifth, "recipe
//! result", is a transient marker that `Recipe::prepare` always replaces
//! before pantry insertion — see `crate::recipe`, which never constructs
//! `PreparedItem` directly with it).

use std::sync::Arc;

use crate::error::{DiffError, ErrorKind, Result};
use crate::io::sequential::SequentialReaderFactory;
use crate::io::{BoxedSequentialReader, ReaderAsSequential, SequentialReader, SequentialWriter, SharedReader};
use crate::item::Item;
use crate::slicing::SliceSlot;

mod sequential_chain;
mod sequential_take;

use sequential_chain::SequentialChain;
use sequential_take::SequentialTake;

enum Kind {
    /// Kind 1: a random-access reader.
    Reader(SharedReader),
    /// Kind 2: a forward-only factory, plus ingredients kept alive for as
    /// long as this prepared item is retained.
    SequentialOnly {
        factory: Arc<dyn SequentialReaderFactory>,
        _ingredients: Vec<Arc<PreparedItem>>,
    },
    /// Kind 3: `(parent, offset, length)`. `slot` is `Some` only when
    /// `parent` cannot make a random-access reader on its own, i.e. when
    /// this slice depends on the streaming-slice machinery.
    Slice {
        parent: Arc<PreparedItem>,
        offset: u64,
        length: u64,
        slot: Option<Arc<SliceSlot>>,
    },
    /// Kind 4: concatenation of ingredient prepared items.
    Chain(Vec<Arc<PreparedItem>>),
}

/// A materialized byte provider for an [`Item`].
pub struct PreparedItem {
    item: Item,
    kind: Kind,
}

impl PreparedItem {
    pub fn from_reader(item: Item, reader: SharedReader) -> Arc<Self> {
        Arc::new(Self {
            item,
            kind: Kind::Reader(reader),
        })
    }

    pub fn from_sequential_factory(
        item: Item,
        factory: Arc<dyn SequentialReaderFactory>,
        ingredients: Vec<Arc<PreparedItem>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            item,
            kind: Kind::SequentialOnly {
                factory,
                _ingredients: ingredients,
            },
        })
    }

    /// Builds a slice prepared item. `slot` must be `Some` (freshly
    /// registered with the kitchen's slicing coordinator) whenever `parent`
    /// cannot currently produce a random-access reader.
    pub fn from_slice(
        item: Item,
        parent: Arc<PreparedItem>,
        offset: u64,
        length: u64,
        slot: Option<Arc<SliceSlot>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            item,
            kind: Kind::Slice {
                parent,
                offset,
                length,
                slot,
            },
        })
    }

    pub fn from_chain(item: Item, ingredients: Vec<Arc<PreparedItem>>) -> Arc<Self> {
        Arc::new(Self {
            item,
            kind: Kind::Chain(ingredients),
        })
    }

    pub fn get_item_definition(&self) -> &Item {
        &self.item
    }

    /// True iff `make_reader` can currently succeed without depending on
    /// the streaming-slice machinery. Purely structural: every kind's
    /// composition is immutable once constructed, so this never changes
    /// over the prepared item's lifetime.
    pub fn can_make_reader(&self) -> bool {
        match &self.kind {
            Kind::Reader(_) => true,
            Kind::SequentialOnly { .. } => false,
            Kind::Slice { parent, .. } => parent.can_make_reader(),
            Kind::Chain(items) => items.iter().all(|i| i.can_make_reader()),
        }
    }

    pub fn make_reader(&self) -> Result<SharedReader> {
        match &self.kind {
            Kind::Reader(r) => Ok(r.clone()),
            Kind::SequentialOnly { .. } => Err(DiffError::new(
                ErrorKind::DiffSlicingInvalidState,
                "item is sequential-only; no streaming slice was requested on it directly",
            )),
            Kind::Slice {
                parent,
                offset,
                length,
                slot,
            } => {
                if parent.can_make_reader() {
                    crate::io::slice(parent.make_reader()?, *offset, *length)
                } else {
                    let slot = slot.as_ref().ok_or_else(|| {
                        DiffError::new(
                            ErrorKind::DiffSlicingInvalidState,
                            "slice has a sequential-only parent but was never registered for streaming",
                        )
                    })?;
                    slot.wait_for_reader()
                }
            }
            Kind::Chain(items) => {
                let readers = items
                    .iter()
                    .map(|i| i.make_reader())
                    .collect::<Result<Vec<_>>>()?;
                Ok(crate::io::chain(readers))
            }
        }
    }

    pub fn make_sequential_reader(&self) -> Result<BoxedSequentialReader> {
        match &self.kind {
            Kind::Reader(r) => Ok(Box::new(ReaderAsSequential::new(r.clone()))),
            Kind::SequentialOnly { factory, .. } => factory.make_sequential_reader(),
            Kind::Slice {
                parent,
                offset,
                length,
                ..
            } => {
                if parent.can_make_reader() {
                    let sliced = crate::io::slice(parent.make_reader()?, *offset, *length)?;
                    Ok(Box::new(ReaderAsSequential::new(sliced)))
                } else {
                    let mut upstream = parent.make_sequential_reader()?;
                    upstream.skip(*offset)?;
                    Ok(Box::new(SequentialTake::new(upstream, *length)))
                }
            }
            Kind::Chain(items) => {
                let streams = items
                    .iter()
                    .map(|i| i.make_sequential_reader())
                    .collect::<Result<Vec<_>>>()?;
                let total = items.iter().map(|i| i.item.length()).sum();
                Ok(Box::new(SequentialChain::new(streams, total)))
            }
        }
    }

    pub fn write(&self, writer: &mut dyn SequentialWriter) -> Result<()> {
        let mut reader = self.make_sequential_reader()?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read_some(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n])?;
        }
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::BufferReader;
    use crate::io::reader::ReaderExt;
    use crate::item::Item;
    use std::sync::Arc as StdArc;

    fn reader_item(bytes: &[u8]) -> (Item, StdArc<PreparedItem>) {
        let item = Item::new(bytes.len() as u64);
        let prepared = PreparedItem::from_reader(item.clone(), StdArc::new(BufferReader::new(bytes.to_vec())));
        (item, prepared)
    }

    #[test]
    fn reader_kind_supports_random_access_and_sequential() {
        let (_item, prepared) = reader_item(b"hello world");
        assert!(prepared.can_make_reader());
        assert_eq!(prepared.make_reader().unwrap().read_all().unwrap(), b"hello world");
        assert_eq!(prepared.make_sequential_reader().unwrap().read_to_end().unwrap(), b"hello world");
    }

    #[test]
    fn slice_of_random_access_parent_is_direct() {
        let (_item, parent) = reader_item(b"abcdefghij");
        let slice_item = Item::new(4);
        let slice = PreparedItem::from_slice(slice_item, parent, 3, 4, None);
        assert!(slice.can_make_reader());
        assert_eq!(slice.make_reader().unwrap().read_all().unwrap(), b"defg");
    }

    #[test]
    fn chain_of_readers_concatenates() {
        let (_a, pa) = reader_item(b"ab");
        let (_b, pb) = reader_item(b"cd");
        let chain_item = Item::new(4);
        let chained = PreparedItem::from_chain(chain_item, vec![pa, pb]);
        assert!(chained.can_make_reader());
        assert_eq!(chained.make_reader().unwrap().read_all().unwrap(), b"abcd");
    }

    #[test]
    fn write_copies_whole_item() {
        let (_item, prepared) = reader_item(b"copy me");
        let mut writer = crate::io::VecWriter::new();
        prepared.write(&mut writer).unwrap();
        assert_eq!(writer.into_inner(), b"copy me");
    }
}
