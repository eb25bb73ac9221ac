// This software is released under the MIT license.
// See file LICENSE for full license details.
use log::{debug, info, warn};
use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

use super::emit::FastqEmitter;
use super::generation::{
    write_orphan, EntrySource, Generation, GenerationReader, GenerationWriter, MergedEntries,
};
use crate::command::constants::{
    NORMALIZE_DEFAULT_ABANDON_BYTES, NORMALIZE_DEFAULT_PAGE_BYTES,
    NORMALIZE_DEFAULT_PAGE_ENTRIES_PAIRED, NORMALIZE_DEFAULT_PAGE_ENTRIES_SINGLE,
    NORMALIZE_TEMP_PREFIX,
};
use crate::fileformat::{MateSlot, Read};
use crate::runtime::{NormalizeError, Result};

/// Bookkeeping cost of one map entry besides its reads
pub const ENTRY_OVERHEAD_BYTES: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillThresholds {
    /// Spill once this many keys are buffered; 0 disables
    pub page_entries: u64,
    /// Spill once the buffered estimate reaches this; 0 disables
    pub page_bytes: u64,
    /// Give up once this much has been spilled; 0 means unlimited
    pub abandon_bytes: u64,
}

impl SpillThresholds {
    pub fn for_inputs(num_inputs: usize) -> SpillThresholds {
        SpillThresholds {
            page_entries: if num_inputs > 1 {
                NORMALIZE_DEFAULT_PAGE_ENTRIES_PAIRED
            } else {
                NORMALIZE_DEFAULT_PAGE_ENTRIES_SINGLE
            },
            page_bytes: NORMALIZE_DEFAULT_PAGE_BYTES,
            abandon_bytes: NORMALIZE_DEFAULT_ABANDON_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpillAccounting {
    pub entries_in_memory: u64,
    pub bytes_in_memory: u64,
    pub bytes_spilled_cumulative: u64,
    pub abandon_limit_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Reading,
    Draining,
    Done,
    Failed,
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Init => "initialized",
            EngineState::Reading => "reading",
            EngineState::Draining => "draining",
            EngineState::Done => "done",
            EngineState::Failed => "failed",
        }
    }
}

///////////////////////////////
/// Maps the pair index tokens of a run to slot ordinals, first come first served
#[derive(Debug, Clone, Default)]
pub struct IndexOrdinals {
    tokens: Vec<String>,
}

impl IndexOrdinals {
    pub fn ordinal_of(&mut self, token: &str) -> Result<usize> {
        if let Some(pos) = self.tokens.iter().position(|t| t == token) {
            return Ok(pos);
        }
        if self.tokens.len() == 2 {
            return Err(NormalizeError::UnexpectedIndexToken {
                token: token.to_string(),
                known: self.tokens.clone(),
            });
        }
        self.tokens.push(token.to_string());
        Ok(self.tokens.len() - 1)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// What finalize wrote out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub pairs: u64,
    pub orphans: u64,
    pub singles: u64,
    pub reads: u64,
    pub bases: u64,
}

///////////////////////////////
/// Buffers reads by pair key until their mates show up, spilling sorted
/// pages to a private temp directory under memory pressure.
///
/// Single writer: the engine is owned by one task and is not Sync-shared.
pub struct PairingEngine {
    state: EngineState,
    entries: BTreeMap<String, MateSlot>,
    ordinals: IndexOrdinals,
    thresholds: SpillThresholds,
    accounting: SpillAccounting,
    generations: Vec<Generation>,
    tempdir: Option<TempDir>,
    reads_appended: u64,
}

impl PairingEngine {
    pub fn new(thresholds: SpillThresholds, path_tmp: Option<&Path>) -> Result<PairingEngine> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(NORMALIZE_TEMP_PREFIX);
        let tempdir = match path_tmp {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!("Spill directory: {}", tempdir.path().display());

        Ok(PairingEngine {
            state: EngineState::Init,
            entries: BTreeMap::new(),
            ordinals: IndexOrdinals::default(),
            thresholds,
            accounting: SpillAccounting {
                abandon_limit_bytes: thresholds.abandon_bytes,
                ..Default::default()
            },
            generations: Vec::new(),
            tempdir: Some(tempdir),
            reads_appended: 0,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn accounting(&self) -> SpillAccounting {
        self.accounting
    }

    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    pub fn reads_appended(&self) -> u64 {
        self.reads_appended
    }

    pub fn index_tokens(&self) -> &[String] {
        self.ordinals.tokens()
    }

    fn enter_reading(&mut self, operation: &'static str) -> Result<()> {
        match self.state {
            EngineState::Init => {
                self.state = EngineState::Reading;
                Ok(())
            }
            EngineState::Reading => Ok(()),
            other => Err(NormalizeError::InvalidState {
                state: other.name(),
                operation,
            }),
        }
    }

    /// Buffer one read under its pair key
    pub fn append(&mut self, read: Read) -> Result<()> {
        self.enter_reading("append a read")?;
        let result = self.insert(read);
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn insert(&mut self, read: Read) -> Result<()> {
        let ordinal = self.ordinals.ordinal_of(&read.pair_index_token)?;
        let bytes = read.estimated_bytes();

        let slot = match self.entries.entry(read.pair_key().to_string()) {
            MapEntry::Occupied(occupied) => occupied.into_mut(),
            MapEntry::Vacant(vacant) => {
                self.accounting.entries_in_memory += 1;
                self.accounting.bytes_in_memory += vacant.key().len() as u64 + ENTRY_OVERHEAD_BYTES;
                vacant.insert([None, None])
            }
        };
        if slot[ordinal].is_some() {
            return Err(NormalizeError::duplicate_mate(read.pair_key(), ordinal));
        }
        slot[ordinal] = Some(read);

        self.accounting.bytes_in_memory += bytes;
        self.reads_appended += 1;
        Ok(())
    }

    pub fn should_spill(&self) -> bool {
        let t = &self.thresholds;
        (t.page_entries > 0 && self.accounting.entries_in_memory >= t.page_entries)
            || (t.page_bytes > 0 && self.accounting.bytes_in_memory >= t.page_bytes)
    }

    /// Write the buffered map as a new Generation and clear it
    pub fn spill(&mut self) -> Result<()> {
        self.enter_reading("spill")?;
        let result = self.write_generation();
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn write_generation(&mut self) -> Result<()> {
        let limit = self.accounting.abandon_limit_bytes;
        if limit > 0 && self.accounting.bytes_spilled_cumulative >= limit {
            return Err(NormalizeError::MemoryLimitExceeded {
                spilled_bytes: self.accounting.bytes_spilled_cumulative,
                limit_bytes: limit,
            });
        }
        if self.entries.is_empty() {
            return Ok(());
        }

        let path = self
            .spill_dir()?
            .join(format!("generation_{}.bin.gz", self.generations.len()));
        let mut writer = GenerationWriter::create(&path)?;
        let entries = std::mem::take(&mut self.entries);
        for (key, slot) in entries.iter() {
            let bytes: u64 = slot.iter().flatten().map(|r| r.estimated_bytes()).sum();
            writer.write_entry(key, slot, bytes)?;
        }
        let generation = writer.finish()?;

        self.accounting.bytes_spilled_cumulative += self.accounting.bytes_in_memory;
        info!(
            "Spilled generation {} ({} keys, ~{} bytes; {} bytes spilled so far)",
            self.generations.len(),
            generation.entries,
            self.accounting.bytes_in_memory,
            self.accounting.bytes_spilled_cumulative
        );
        self.accounting.entries_in_memory = 0;
        self.accounting.bytes_in_memory = 0;
        self.generations.push(generation);
        Ok(())
    }

    fn spill_dir(&self) -> Result<&Path> {
        match &self.tempdir {
            Some(dir) => Ok(dir.path()),
            None => Err(NormalizeError::InvalidState {
                state: self.state.name(),
                operation: "use the spill directory",
            }),
        }
    }

    /// Terminal failure: drop buffered reads and delete all spill files
    pub fn fail(&mut self) {
        self.state = EngineState::Failed;
        self.entries.clear();
        self.accounting.entries_in_memory = 0;
        self.accounting.bytes_in_memory = 0;
        self.release_generations();
    }

    fn release_generations(&mut self) {
        self.generations.clear();
        if let Some(dir) = self.tempdir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove spill directory {}: {}", path.display(), e);
            }
        }
    }

    /// Merge the spilled Generations with what is still in memory and emit
    /// everything: complete pairs in ascending key order, then orphans in
    /// ascending key order. Every pair and orphan takes the next counter.
    pub fn finalize<W: Write>(&mut self, emitter: &mut FastqEmitter<W>) -> Result<EmitStats> {
        match self.state {
            EngineState::Init | EngineState::Reading => self.state = EngineState::Draining,
            other => {
                return Err(NormalizeError::InvalidState {
                    state: other.name(),
                    operation: "finalize",
                })
            }
        }
        let result = self.drain(emitter);
        match result {
            Ok(_) => {
                self.state = EngineState::Done;
                self.release_generations();
            }
            Err(_) => self.fail(),
        }
        result
    }

    fn drain<W: Write>(&mut self, emitter: &mut FastqEmitter<W>) -> Result<EmitStats> {
        info!(
            "Finalizing: {} spilled generation(s), {} keys in memory",
            self.generations.len(),
            self.accounting.entries_in_memory
        );

        let mut sources: Vec<EntrySource> = Vec::with_capacity(self.generations.len() + 1);
        for generation in self.generations.iter() {
            sources.push(Box::new(GenerationReader::open(generation)?));
        }
        let remainder = std::mem::take(&mut self.entries);
        self.accounting.entries_in_memory = 0;
        self.accounting.bytes_in_memory = 0;
        sources.push(Box::new(remainder.into_iter().map(Ok::<_, NormalizeError>)));

        let orphan_path = self.spill_dir()?.join("orphans.bin.gz");
        let mut orphans = GenerationWriter::create(&orphan_path)?;

        for entry in MergedEntries::new(sources)? {
            let (key, [first, second]) = entry?;
            match (first, second) {
                (Some(first), Some(second)) => emitter.emit_pair(&key, &first, &second)?,
                (Some(read), None) | (None, Some(read)) => write_orphan(&mut orphans, &key, read)?,
                (None, None) => {}
            }
        }

        let orphans = orphans.finish()?;
        for entry in GenerationReader::open(&orphans)? {
            let (key, slot) = entry?;
            for read in slot.iter().flatten() {
                emitter.emit_orphan(&key, read)?;
            }
        }
        emitter.flush()?;

        Ok(emitter.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileformat::read::plain_read;

    fn thresholds(page_entries: u64, abandon_bytes: u64) -> SpillThresholds {
        SpillThresholds {
            page_entries,
            page_bytes: 0,
            abandon_bytes,
        }
    }

    fn engine(page_entries: u64) -> PairingEngine {
        PairingEngine::new(thresholds(page_entries, 0), None).unwrap()
    }

    fn mate(key: &str, token: &str) -> Read {
        plain_read(&format!("{}/{}", key, token), "ACGT", token)
    }

    fn run(engine: &mut PairingEngine, reads: Vec<Read>) -> Result<(EmitStats, String, String)> {
        for read in reads {
            engine.append(read)?;
            if engine.should_spill() {
                engine.spill()?;
            }
        }
        let mut emitter = FastqEmitter::new(vec![Vec::new(), Vec::new()], None, true)?;
        let stats = engine.finalize(&mut emitter)?;
        let mut outputs = emitter.into_inner();
        let second = String::from_utf8(outputs.pop().unwrap()).unwrap();
        let first = String::from_utf8(outputs.pop().unwrap()).unwrap();
        Ok((stats, first, second))
    }

    fn names(fastq: &str) -> Vec<&str> {
        fastq.lines().step_by(4).collect()
    }

    #[test]
    fn pairs_then_orphans_in_key_order() {
        let mut engine = engine(0);
        let reads = vec![
            mate("C", "1"),
            mate("A", "1"),
            mate("B", "1"),
            mate("A", "2"),
            mate("C", "2"),
        ];
        let (stats, first, second) = run(&mut engine, reads).unwrap();
        assert_eq!(stats.pairs, 2);
        assert_eq!(stats.orphans, 1);
        assert_eq!(names(&first), vec!["@A/1", "@C/1", "@B"]);
        assert_eq!(names(&second), vec!["@A/2", "@C/2"]);
        assert_eq!(engine.state(), EngineState::Done);
    }

    #[test]
    fn spilling_keeps_partition() {
        let mut reads = Vec::new();
        for i in 0..50 {
            reads.push(mate(&format!("r{:03}", i), "1"));
        }
        for i in (0..50).rev().filter(|i| i % 3 != 0) {
            reads.push(mate(&format!("r{:03}", i), "2"));
        }

        let mut unspilled = engine(0);
        let (expected, first_a, second_a) = run(&mut unspilled, reads.clone()).unwrap();

        let mut spilled = engine(7);
        let (stats, first_b, second_b) = run(&mut spilled, reads).unwrap();
        assert_eq!(stats, expected);
        assert_eq!(stats.pairs, 33);
        assert_eq!(stats.orphans, 17);
        assert_eq!(first_a, first_b);
        assert_eq!(second_a, second_b);
    }

    #[test]
    fn spill_clears_memory_and_counts_bytes() {
        let mut engine = engine(2);
        engine.append(mate("A", "1")).unwrap();
        engine.append(mate("B", "1")).unwrap();
        assert!(engine.should_spill());
        let before = engine.accounting().bytes_in_memory;
        engine.spill().unwrap();
        let acc = engine.accounting();
        assert_eq!(acc.entries_in_memory, 0);
        assert_eq!(acc.bytes_in_memory, 0);
        assert_eq!(acc.bytes_spilled_cumulative, before);
        assert_eq!(engine.generations().len(), 1);
    }

    #[test]
    fn duplicate_mate_is_fatal() {
        let mut engine = engine(0);
        engine.append(mate("A", "1")).unwrap();
        let err = engine.append(mate("A", "1")).unwrap_err();
        assert!(matches!(err, NormalizeError::DuplicateMate { ordinal: 0, .. }));
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.append(mate("B", "1")).is_err());
    }

    #[test]
    fn duplicate_mate_across_generations_is_fatal() {
        let mut engine = engine(1);
        let result = run(&mut engine, vec![mate("A", "1"), mate("A", "1")]);
        assert!(matches!(result, Err(NormalizeError::DuplicateMate { .. })));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[test]
    fn third_index_token_is_fatal() {
        let mut engine = engine(0);
        engine.append(mate("A", "1")).unwrap();
        engine.append(mate("B", "2")).unwrap();
        let err = engine.append(mate("C", "3")).unwrap_err();
        match err {
            NormalizeError::UnexpectedIndexToken { token, known } => {
                assert_eq!(token, "3");
                assert_eq!(known, vec!["1".to_string(), "2".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn abandon_limit_stops_spilling() {
        let mut engine = PairingEngine::new(thresholds(1, 1), None).unwrap();
        engine.append(mate("A", "1")).unwrap();
        engine.spill().unwrap();
        engine.append(mate("B", "1")).unwrap();
        let err = engine.spill().unwrap_err();
        assert!(err.is_memory_limit());
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.generations().is_empty());
    }

    #[test]
    fn failure_removes_spill_directory() {
        let parent = tempfile::tempdir().unwrap();
        let mut engine = PairingEngine::new(thresholds(1, 0), Some(parent.path())).unwrap();
        engine.append(mate("A", "1")).unwrap();
        engine.spill().unwrap();
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 1);
        engine.fail();
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn finalize_twice_is_rejected() {
        let mut engine = engine(0);
        let mut emitter = FastqEmitter::new(vec![Vec::new()], None, false).unwrap();
        engine.finalize(&mut emitter).unwrap();
        assert!(matches!(
            engine.finalize(&mut emitter),
            Err(NormalizeError::InvalidState { .. })
        ));
    }
}
