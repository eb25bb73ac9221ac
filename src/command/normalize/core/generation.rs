// This software is released under the MIT license.
// See file LICENSE for full license details.
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use min_max_heap::MinMaxHeap;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::fileformat::{MateSlot, Read};
use crate::runtime::{NormalizeError, Result};

// Spill files are read back once; favour speed over ratio
const SPILL_COMPRESSION_LEVEL: u32 = 1;
const SPILL_BUFFER_SIZE: usize = 64 * 1024;

pub type Entry = (String, MateSlot);

///////////////////////////////
/// One spilled page: key-sorted entries, gzip-compressed bincode.
/// Each entry is framed as `Some((key, slot))`, the file ends with `None`.
#[derive(Debug, Clone)]
pub struct Generation {
    pub path: PathBuf,
    pub entries: u64,
    pub bytes: u64,
}

pub struct GenerationWriter {
    encoder: GzEncoder<BufWriter<File>>,
    path: PathBuf,
    entries: u64,
    bytes: u64,
    last_key: Option<String>,
}

impl GenerationWriter {
    pub fn create(path: &Path) -> Result<GenerationWriter> {
        let file = File::create(path)?;
        let writer = BufWriter::with_capacity(SPILL_BUFFER_SIZE, file);
        Ok(GenerationWriter {
            encoder: GzEncoder::new(writer, Compression::new(SPILL_COMPRESSION_LEVEL)),
            path: path.to_path_buf(),
            entries: 0,
            bytes: 0,
            last_key: None,
        })
    }

    /// Keys must arrive in ascending order
    pub fn write_entry(&mut self, key: &str, slot: &MateSlot, bytes: u64) -> Result<()> {
        if let Some(last) = &self.last_key {
            if last.as_str() > key {
                return Err(NormalizeError::config(format!(
                    "spill file {} written out of order ('{}' after '{}')",
                    self.path.display(),
                    key,
                    last
                )));
            }
        }
        bincode::serialize_into(&mut self.encoder, &Some((key, slot)))?;
        self.entries += 1;
        self.bytes += bytes;
        self.last_key = Some(key.to_string());
        Ok(())
    }

    pub fn finish(mut self) -> Result<Generation> {
        bincode::serialize_into(&mut self.encoder, &None::<(&str, &MateSlot)>)?;
        let mut writer = self.encoder.finish()?;
        writer.flush()?;
        debug!(
            "Wrote spill file {} with {} entries",
            self.path.display(),
            self.entries
        );
        Ok(Generation {
            path: self.path,
            entries: self.entries,
            bytes: self.bytes,
        })
    }
}

/// Streams the entries of one Generation back in key order
pub struct GenerationReader {
    decoder: GzDecoder<BufReader<File>>,
    done: bool,
}

impl GenerationReader {
    pub fn open(generation: &Generation) -> Result<GenerationReader> {
        let file = File::open(&generation.path)?;
        Ok(GenerationReader {
            decoder: GzDecoder::new(BufReader::with_capacity(SPILL_BUFFER_SIZE, file)),
            done: false,
        })
    }
}

impl Iterator for GenerationReader {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match bincode::deserialize_from::<_, Option<Entry>>(&mut self.decoder) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(NormalizeError::from(e)))
            }
        }
    }
}

///////////////////////////////
/// Heap item; ordered by key, then by source so equal keys pop in source order
struct MergeHead {
    key: String,
    source: usize,
    slot: MateSlot,
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

pub type EntrySource = Box<dyn Iterator<Item = Result<Entry>>>;

/// K-way merge of key-sorted sources. Entries sharing a key are combined
/// into one MateSlot; a slot filled by two sources is a duplicate mate.
pub struct MergedEntries {
    sources: Vec<EntrySource>,
    heap: MinMaxHeap<MergeHead>,
    failed: bool,
}

impl MergedEntries {
    pub fn new(sources: Vec<EntrySource>) -> Result<MergedEntries> {
        let mut merged = MergedEntries {
            heap: MinMaxHeap::with_capacity(sources.len()),
            sources,
            failed: false,
        };
        for source in 0..merged.sources.len() {
            merged.refill(source)?;
        }
        Ok(merged)
    }

    fn refill(&mut self, source: usize) -> Result<()> {
        if let Some(entry) = self.sources[source].next() {
            let (key, slot) = entry?;
            self.heap.push(MergeHead { key, source, slot });
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        let head = match self.heap.pop_min() {
            Some(head) => head,
            None => return Ok(None),
        };
        let MergeHead { key, source, mut slot } = head;
        self.refill(source)?;

        while self.heap.peek_min().map(|h| h.key == key).unwrap_or(false) {
            if let Some(other) = self.heap.pop_min() {
                self.refill(other.source)?;
                combine_slots(&key, &mut slot, other.slot)?;
            }
        }
        Ok(Some((key, slot)))
    }
}

impl Iterator for MergedEntries {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Move the mates of `other` into `slot`
pub fn combine_slots(key: &str, slot: &mut MateSlot, other: MateSlot) -> Result<()> {
    for (ordinal, mate) in other.into_iter().enumerate() {
        if let Some(mate) = mate {
            if slot[ordinal].is_some() {
                return Err(NormalizeError::duplicate_mate(key, ordinal));
            }
            slot[ordinal] = Some(mate);
        }
    }
    Ok(())
}

/// Orphaned reads parked on disk until all pairs are written
pub fn write_orphan(writer: &mut GenerationWriter, key: &str, read: Read) -> Result<()> {
    let bytes = read.estimated_bytes();
    let slot: MateSlot = [Some(read), None];
    writer.write_entry(key, &slot, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileformat::read::plain_read;

    fn entry(key: &str, ordinal: usize) -> Entry {
        let token = (ordinal + 1).to_string();
        let read = plain_read(&format!("{}/{}", key, token), "ACGT", &token);
        let mut slot: MateSlot = [None, None];
        slot[ordinal] = Some(read);
        (key.to_string(), slot)
    }

    fn source(entries: Vec<Entry>) -> EntrySource {
        Box::new(entries.into_iter().map(Ok))
    }

    #[test]
    fn spill_file_roundtrip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen_0.bin.gz");
        let mut writer = GenerationWriter::create(&path).unwrap();
        for (key, slot) in [entry("a", 0), entry("b", 1), entry("c", 0)] {
            writer.write_entry(&key, &slot, 10).unwrap();
        }
        let generation = writer.finish().unwrap();
        assert_eq!(generation.entries, 3);
        assert_eq!(generation.bytes, 30);

        let keys: Vec<String> = GenerationReader::open(&generation)
            .unwrap()
            .map(|e| e.unwrap().0)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn spill_file_rejects_unsorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GenerationWriter::create(&dir.path().join("g")).unwrap();
        let (k, s) = entry("b", 0);
        writer.write_entry(&k, &s, 1).unwrap();
        let (k, s) = entry("a", 0);
        assert!(writer.write_entry(&k, &s, 1).is_err());
    }

    #[test]
    fn merge_combines_mates_across_sources() {
        let merged: Vec<Entry> = MergedEntries::new(vec![
            source(vec![entry("a", 0), entry("c", 0)]),
            source(vec![entry("b", 1), entry("c", 1)]),
            source(vec![entry("a", 1), entry("d", 1)]),
        ])
        .unwrap()
        .map(|e| e.unwrap())
        .collect();

        let keys: Vec<&str> = merged.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
        assert!(merged[0].1.iter().all(|m| m.is_some()));
        assert!(merged[1].1[0].is_none());
        assert!(merged[2].1.iter().all(|m| m.is_some()));
    }

    #[test]
    fn merge_detects_duplicate_mate() {
        let result: Result<Vec<Entry>> = MergedEntries::new(vec![
            source(vec![entry("a", 0)]),
            source(vec![entry("a", 0)]),
        ])
        .unwrap()
        .collect();
        assert!(matches!(result, Err(NormalizeError::DuplicateMate { .. })));
    }
}
