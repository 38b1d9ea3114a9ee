//! End-to-end conversion: one archive in, one chronological document out.
//!
//! Reading and sequencing run on the calling thread. With `jobs > 1`,
//! normalizing and rendering run batch by batch on a rayon pool; results are
//! collected in input order, so output and diagnostics do not depend on the
//! thread count.

use std::path::Path;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, Result};
use crate::export::html::HtmlEmitter;
use crate::export::pdf::{PdfEmitter, PdfOptions};
use crate::export::{self, OutputFormat};
use crate::model::message::{OrderedMessage, RawMessage};
use crate::parser::mbox::{MboxReader, MAX_MESSAGE_SIZE, READ_BUFFER_SIZE};
use crate::parser::message::{normalize, Normalized};
use crate::render::{render, RenderOptions, Rendered};
use crate::report::{FailureSink, RunSummary};
use crate::sequence::Sequencer;

/// Messages handed to the pool at a time.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Everything a run needs besides the input and output paths.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub format: OutputFormat,
    /// Worker threads; 0 or 1 runs everything on the calling thread.
    pub jobs: usize,
    pub batch_size: usize,
    pub read_buffer_size: usize,
    pub max_message_size: usize,
    pub render: RenderOptions,
    pub pdf: PdfOptions,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pdf,
            jobs: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            read_buffer_size: READ_BUFFER_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            render: RenderOptions::default(),
            pdf: PdfOptions::default(),
        }
    }
}

/// Stage reported to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Counts are archive bytes.
    Reading,
    /// Counts are messages.
    Rendering,
    /// Writing the document; counts are 0 of 1, then 1 of 1.
    Writing,
}

/// Progress callback: phase, done, total.
pub type Progress<'a> = &'a dyn Fn(Phase, u64, u64);

/// Convert `input` into a single document at `output`.
///
/// Fatal problems (missing archive, unwritable output, zero usable messages)
/// are errors and leave `output` untouched. Everything else ends up in the
/// returned summary.
pub fn convert(
    input: &Path,
    output: &Path,
    options: &ConvertOptions,
    progress: Option<Progress<'_>>,
) -> Result<RunSummary> {
    let report = |phase: Phase, done: u64, total: u64| {
        if let Some(cb) = progress {
            cb(phase, done, total);
        }
    };

    info!(
        input = %input.display(),
        output = %output.display(),
        format = ?options.format,
        jobs = options.jobs,
        "Starting conversion"
    );

    export::preflight(output)?;
    let mut reader =
        MboxReader::with_limits(input, options.read_buffer_size, options.max_message_size)?;
    let file_size = reader.file_size();
    let pool = build_pool(options.jobs);
    let batch_size = options.batch_size.max(1);

    let mut sink = FailureSink::new();
    let mut sequencer = Sequencer::new();
    let mut batch: Vec<RawMessage> = Vec::with_capacity(batch_size);

    report(Phase::Reading, 0, file_size);
    while let Some(raw) = reader.next() {
        let raw = raw?;
        sink.note_found();
        batch.push(raw);
        if batch.len() >= batch_size {
            absorb(normalize_batch(&batch, pool.as_ref()), &mut sink, &mut sequencer);
            batch.clear();
            report(Phase::Reading, reader.bytes_read(), file_size);
        }
    }
    absorb(normalize_batch(&batch, pool.as_ref()), &mut sink, &mut sequencer);
    drop(batch);
    report(Phase::Reading, file_size, file_size);

    info!(
        found = sink.found(),
        usable = sequencer.len(),
        skipped = sink.skipped_count(),
        "Archive read"
    );

    if sequencer.is_empty() {
        warn!(input = %input.display(), "No message could be used, nothing written");
        return Err(ConvertError::NothingToRender(input.to_path_buf()));
    }

    let date_range = sequencer.date_range();
    let ordered = sequencer.finish();
    let total = ordered.len();

    let mut fragments = Vec::with_capacity(total);
    let mut pending = ordered.into_iter();
    report(Phase::Rendering, 0, total as u64);
    loop {
        let chunk: Vec<OrderedMessage> = pending.by_ref().take(batch_size).collect();
        if chunk.is_empty() {
            break;
        }
        for rendered in render_batch(chunk, &options.render, pool.as_ref()) {
            if let Some(diagnostic) = rendered.diagnostic {
                sink.record(diagnostic);
            }
            fragments.push(rendered.fragment);
        }
        report(Phase::Rendering, fragments.len() as u64, total as u64);
    }

    report(Phase::Writing, 0, 1);
    match options.format {
        OutputFormat::Pdf => PdfEmitter::new(options.pdf.clone()).emit(&fragments, output)?,
        OutputFormat::Html => HtmlEmitter::new(options.pdf.title.clone()).emit(&fragments, output)?,
    }
    report(Phase::Writing, 1, 1);

    let mut summary = sink.into_summary(Some(output.to_path_buf()));
    if let Some((oldest, newest)) = date_range {
        summary.oldest = Some(oldest);
        summary.newest = Some(newest);
    }

    info!(
        found = summary.found,
        rendered = summary.rendered,
        degraded = summary.degraded,
        skipped = summary.skipped,
        "Conversion finished"
    );
    Ok(summary)
}

fn build_pool(jobs: usize) -> Option<ThreadPool> {
    if jobs <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => {
            debug!(threads = jobs, "Worker pool ready");
            Some(pool)
        }
        Err(e) => {
            warn!(error = %e, "Could not start worker threads, running sequentially");
            None
        }
    }
}

fn normalize_batch(batch: &[RawMessage], pool: Option<&ThreadPool>) -> Vec<Normalized> {
    match pool {
        Some(pool) => pool.install(|| batch.par_iter().map(normalize).collect()),
        None => batch.iter().map(normalize).collect(),
    }
}

fn render_batch(
    chunk: Vec<OrderedMessage>,
    options: &RenderOptions,
    pool: Option<&ThreadPool>,
) -> Vec<Rendered> {
    match pool {
        Some(pool) => pool.install(|| {
            chunk
                .into_par_iter()
                .map(|ordered| render(ordered, options))
                .collect()
        }),
        None => chunk
            .into_iter()
            .map(|ordered| render(ordered, options))
            .collect(),
    }
}

/// Fold one batch of results into the run state, in archive order.
fn absorb(results: Vec<Normalized>, sink: &mut FailureSink, sequencer: &mut Sequencer) {
    for result in results {
        match result {
            Normalized::Ok {
                message,
                diagnostics,
            } => {
                sink.extend(diagnostics);
                sequencer.push(*message);
            }
            Normalized::Skipped(diagnostic) => sink.record(diagnostic),
        }
    }
}
