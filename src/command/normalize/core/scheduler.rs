// This software is released under the MIT license.
// See file LICENSE for full license details.
use crossbeam::channel::{Receiver, Sender};
use log::{debug, info, warn};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::pairing::PairingEngine;
use crate::command::constants::NORMALIZE_PROGRESS_INTERVAL;
use crate::fileformat::{FastqParser, Normalizer, ParserOptions, Read};
use crate::runtime::{NormalizeError, Result};

/// What a producer hands to the consumer
pub enum ProducerMessage {
    Batch(Vec<Read>),
    Failed(NormalizeError),
    Done,
}

/// One input stream and its position among the inputs (0-based)
pub struct ReadSource {
    pub stream: usize,
    pub reader: Box<dyn BufRead + Send>,
}

/// Per-read transforms applied by producers before the hand-off
#[derive(Clone, Debug)]
pub struct ReadTransform {
    pub normalizer: Normalizer,
    pub convert_uracil: bool,
}

impl ReadTransform {
    pub fn apply(&self, read: &mut Read) {
        self.normalizer.apply(&mut read.qualities);
        if self.convert_uracil {
            read.convert_uracil();
        }
    }
}

///////////////////////////////
/// Runs one producer thread per input stream. The calling thread is the only
/// consumer: it pulls batches round-robin in input order and is the sole
/// user of the pairing engine.
pub struct Scheduler {
    pub parser_options: ParserOptions,
    pub transform: ReadTransform,
    pub batch_size: usize,
    pub channel_capacity: usize,
}

impl Scheduler {
    /// Feed every input into the engine. On failure all producers are
    /// drained and stopped first, then the first error is returned.
    pub fn run(&self, sources: Vec<ReadSource>, engine: &mut PairingEngine) -> Result<()> {
        if sources.is_empty() {
            return Err(NormalizeError::config("no input streams given"));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_pool = threadpool::ThreadPool::new(sources.len());
        let mut receivers: Vec<Option<(usize, Receiver<ProducerMessage>)>> = Vec::with_capacity(sources.len());

        for source in sources {
            let (tx, rx) = crossbeam::channel::bounded::<ProducerMessage>(self.channel_capacity.max(1));
            receivers.push(Some((source.stream, rx)));

            let options = self.parser_options.clone();
            let transform = self.transform.clone();
            let batch_size = self.batch_size.max(1);
            let cancel = Arc::clone(&cancel);

            debug!("Starting reader for input stream {}", source.stream + 1);
            thread_pool.execute(move || {
                produce(source, options, transform, batch_size, &cancel, &tx);
            });
        }

        let mut first_error: Option<NormalizeError> = None;
        let mut appended: u64 = 0;
        while receivers.iter().any(|r| r.is_some()) {
            for slot in receivers.iter_mut() {
                let Some((stream, rx)) = slot.as_ref() else {
                    continue;
                };
                let stream = *stream;
                match rx.recv() {
                    Ok(ProducerMessage::Batch(reads)) => {
                        if first_error.is_some() {
                            continue;
                        }
                        if let Err(e) = consume_batch(engine, reads, &mut appended) {
                            warn!("Stopping all readers: {}", e);
                            cancel.store(true, Ordering::SeqCst);
                            first_error = Some(e);
                        }
                    }
                    Ok(ProducerMessage::Failed(e)) => {
                        warn!("Reader for input stream {} failed: {}", stream + 1, e);
                        cancel.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e);
                        *slot = None;
                    }
                    Ok(ProducerMessage::Done) => {
                        debug!("Input stream {} finished", stream + 1);
                        *slot = None;
                    }
                    Err(_) => {
                        // sender gone without Done: cancelled or panicked
                        if first_error.is_none() {
                            cancel.store(true, Ordering::SeqCst);
                            first_error = Some(NormalizeError::ProducerLost { stream: stream + 1 });
                        }
                        *slot = None;
                    }
                }
            }
        }
        thread_pool.join();

        match first_error {
            Some(e) => {
                engine.fail();
                Err(e)
            }
            None => {
                info!("Read {} reads from {} input stream(s)", appended, receivers.len());
                Ok(())
            }
        }
    }
}

fn consume_batch(engine: &mut PairingEngine, reads: Vec<Read>, appended: &mut u64) -> Result<()> {
    for read in reads {
        engine.append(read)?;
        if engine.should_spill() {
            engine.spill()?;
        }
        *appended += 1;
        if *appended % NORMALIZE_PROGRESS_INTERVAL == 0 {
            debug!("reads appended: {}", appended);
        }
    }
    Ok(())
}

//////////
/// Producer loop: parse, normalize and send reads in batches
fn produce(
    source: ReadSource,
    options: ParserOptions,
    transform: ReadTransform,
    batch_size: usize,
    cancel: &AtomicBool,
    tx: &Sender<ProducerMessage>,
) {
    let token = (source.stream + 1).to_string();
    let mut parser = FastqParser::new(source.reader, options, token);
    let mut batch: Vec<Read> = Vec::with_capacity(batch_size);

    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        match parser.next_read() {
            Ok(Some(mut read)) => {
                transform.apply(&mut read);
                batch.push(read);
                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(ProducerMessage::Batch(full)).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                if !batch.is_empty() && tx.send(ProducerMessage::Batch(batch)).is_err() {
                    return;
                }
                debug!(
                    "Input stream {} exhausted after {} reads",
                    source.stream + 1,
                    parser.reads_parsed()
                );
                let _ = tx.send(ProducerMessage::Done);
                return;
            }
            Err(e) => {
                let _ = tx.send(ProducerMessage::Failed(e));
                return;
            }
        }
    }
}
