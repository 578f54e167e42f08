//! The generation loop: every record, every page, strictly in sequence.
//!
//! Per (record, page) the states are `pending -> skipped` when the
//! artifact already exists, or `pending -> generating -> saved | failed`.
//! Page and record errors are logged and the loop moves on; only a panic
//! escaping the loop or an unusable output root fails the job, and the
//! spreadsheet is flushed in every case. File reads, image decoding and
//! writes run on the blocking pool.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bookgen_core::book::{Book, Page};
use bookgen_core::conditioning::build_units;
use bookgen_core::naming::{artifact_path, clamp_dimension};
use bookgen_core::record::Record;
use bookgen_core::swap::SwapOptions;
use bookgen_core::template::TemplateVars;
use bookgen_forge::messages::{ConditioningGraph, GenerateRequest, SwapRequest};
use bookgen_forge::ImageService;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::blocking::run_blocking;
use crate::error::PipelineError;
use crate::images::{decode_b64, load_image_b64, save_b64_image, sha256_hex, PoseCache};
use crate::ingest::collect_records;
use crate::joblog::{JobLog, LogTag};
use crate::sheet::SheetWriter;

// ---------------------------------------------------------------------------
// Run context, events and summary
// ---------------------------------------------------------------------------

/// Progress notifications sent from a running job to its registry entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RecordStarted {
        /// 1-based position in the record list.
        position: usize,
        total: usize,
        name: String,
    },
    PageSaved {
        record: String,
        page: u32,
        path: PathBuf,
    },
}

/// Everything a runner needs besides the book itself.
pub struct RunContext {
    pub job_id: String,
    pub log: JobLog,
    pub events: mpsc::Sender<RunEvent>,
    /// Used when the book does not set its own output root.
    pub default_output_root: PathBuf,
}

impl RunContext {
    async fn emit(&self, event: RunEvent) {
        // A closed channel only means nobody is listening any more.
        let _ = self.events.send(event).await;
    }
}

/// Counters reported when a run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub records: usize,
    /// Records whose pages all existed before the run.
    pub records_complete: usize,
    pub pages_saved: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub swaps_applied: usize,
    pub swap_failures: usize,
}

/// A way of turning a book into artifacts.
///
/// [`ApiRunner`] drives the synthesis HTTP service. Other transports plug
/// in here without touching the job registry.
#[async_trait]
pub trait BookRunner: Send + Sync {
    async fn run(&self, book: &Book, ctx: &RunContext) -> Result<RunSummary, PipelineError>;
}

// ---------------------------------------------------------------------------
// ApiRunner
// ---------------------------------------------------------------------------

/// Runs a book against an [`ImageService`].
pub struct ApiRunner {
    service: Arc<dyn ImageService>,
}

impl ApiRunner {
    pub fn new(service: Arc<dyn ImageService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl BookRunner for ApiRunner {
    async fn run(&self, book: &Book, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        book.validate()?;
        let log = &ctx.log;
        let settings = &book.settings;
        let pages = book.ordered_pages();
        let output_root = settings.output_root_or(&ctx.default_output_root);
        log.info(format!(
            "job {} book {} with {} pages, output {}",
            ctx.job_id,
            book.id,
            pages.len(),
            output_root.display()
        ));

        let records = {
            let (settings, log) = (settings.clone(), log.clone());
            run_blocking(move || collect_records(&settings, &log)).await?
        };

        let mut sheet = match settings.spreadsheet() {
            Some(path) if settings.supports_write_back() => {
                let path = path.to_path_buf();
                let page_count = pages.len();
                let prefix = settings.page_label_prefix.clone();
                let out_column = settings.out_column().map(str::to_string);
                let task_log = log.clone();
                run_blocking(move || {
                    Ok(SheetWriter::open(&path, page_count, &prefix, out_column.as_deref(), &task_log))
                })
                .await?
            }
            _ => SheetWriter::disabled(log),
        };

        if let Err(e) = tokio::fs::create_dir_all(&output_root).await {
            log.error(format!("cannot create {}: {e}", output_root.display()));
            flush(&sheet, log).await;
            return Err(PipelineError::JobFailure(e.to_string()));
        }

        let swap_ready = if pages.iter().any(|p| p.use_swap) {
            let available = self.service.swap_available().await;
            if available {
                log.line(LogTag::Swap, "swap service available");
            } else {
                log.warn("swap requested but the swap service is unavailable; pages keep their generated image");
            }
            available
        } else {
            false
        };

        let mut pass = RecordPass {
            service: self.service.as_ref(),
            book,
            pages: &pages,
            ctx,
            output_root: &output_root,
            swap_ready,
            poses: PoseCache::new(),
            summary: RunSummary {
                records: records.len(),
                ..Default::default()
            },
        };

        let outcome = AssertUnwindSafe(pass.run_all(&records, &mut sheet))
            .catch_unwind()
            .await;
        flush(&sheet, log).await;

        match outcome {
            Ok(()) => {
                let s = &pass.summary;
                log.line(
                    LogTag::Done,
                    format!(
                        "{} records: {} pages saved, {} skipped, {} failed",
                        s.records, s.pages_saved, s.pages_skipped, s.pages_failed
                    ),
                );
                Ok(pass.summary)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log.error(format!("job aborted: {reason}"));
                Err(PipelineError::JobFailure(reason))
            }
        }
    }
}

async fn flush(sheet: &SheetWriter, log: &JobLog) {
    if let Err(e) = sheet.save_async().await {
        log.warn(e.to_string());
    }
}

async fn artifact_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

// ---------------------------------------------------------------------------
// One pass over the records
// ---------------------------------------------------------------------------

struct RecordPass<'a> {
    service: &'a dyn ImageService,
    book: &'a Book,
    pages: &'a [&'a Page],
    ctx: &'a RunContext,
    output_root: &'a Path,
    swap_ready: bool,
    poses: PoseCache,
    summary: RunSummary,
}

impl RecordPass<'_> {
    async fn run_all(&mut self, records: &[Record], sheet: &mut SheetWriter) {
        for (i, record) in records.iter().enumerate() {
            self.process_record(i + 1, records.len(), record, sheet).await;
        }
    }

    async fn process_record(
        &mut self,
        position: usize,
        total: usize,
        record: &Record,
        sheet: &mut SheetWriter,
    ) {
        let ctx = self.ctx;
        let log = &ctx.log;
        let label = if record.group.is_empty() {
            record.name.clone()
        } else {
            format!("{} ({})", record.name, record.group)
        };
        log.line(LogTag::Record, format!("{position}/{total} {label}"));
        ctx.emit(RunEvent::RecordStarted {
            position,
            total,
            name: record.name.clone(),
        })
        .await;

        let targets: Vec<PathBuf> = self
            .pages
            .iter()
            .map(|p| artifact_path(self.output_root, &record.group, &record.name, p.index))
            .collect();
        let mut outputs = Vec::with_capacity(targets.len());
        for target in &targets {
            let found = artifact_exists(target).await;
            outputs.push(if found { path_string(target) } else { String::new() });
        }

        if outputs.iter().all(|o| !o.is_empty()) {
            log.line(LogTag::Skip, format!("{label}: all {} pages exist", targets.len()));
            self.summary.pages_skipped += targets.len();
            self.summary.records_complete += 1;
            write_back(sheet, record, &outputs, log).await;
            return;
        }

        // Loaded once; every page of the record reuses it.
        let face_path = record.face_image_path.clone();
        let face = match run_blocking(move || load_image_b64(&face_path)).await {
            Ok(face) => face,
            Err(e) => {
                let pending = outputs.iter().filter(|o| o.is_empty()).count();
                log.error(format!(
                    "{label}: face image {} unreadable: {e}",
                    record.face_image_path.display()
                ));
                self.summary.pages_skipped += outputs.len() - pending;
                self.summary.pages_failed += pending;
                write_back(sheet, record, &outputs, log).await;
                return;
            }
        };
        let vars = TemplateVars::for_record(record);

        let pages = self.pages;
        for (k, page) in pages.iter().enumerate() {
            let target = &targets[k];
            if !outputs[k].is_empty() {
                log.line(LogTag::Skip, format!("page {} exists: {}", page.index, target.display()));
                self.summary.pages_skipped += 1;
                continue;
            }

            match self.render_page(page, target, &face, &vars).await {
                Ok(()) => {
                    outputs[k] = path_string(target);
                    self.summary.pages_saved += 1;
                    ctx.emit(RunEvent::PageSaved {
                        record: record.name.clone(),
                        page: page.index,
                        path: target.clone(),
                    })
                    .await;
                }
                Err(e) => {
                    log.error(format!("{label} page {}: {e}", page.index));
                    self.summary.pages_failed += 1;
                }
            }
        }

        write_back(sheet, record, &outputs, log).await;
    }

    async fn render_page(
        &mut self,
        page: &Page,
        target: &Path,
        face: &str,
        vars: &TemplateVars,
    ) -> Result<(), PipelineError> {
        let ctx = self.ctx;
        let book = self.book;
        let log = &ctx.log;
        log.line(LogTag::Page, format!("page {} -> {}", page.index, target.display()));

        let pose = match page.pose_source(&book.settings) {
            Some(source) if page.use_conditioning => self.poses.get(source, log).await,
            _ => None,
        };
        let units = build_units(
            face,
            pose.as_deref(),
            page.use_conditioning,
            &page.face_unit,
            &page.pose_unit,
        );

        let request = GenerateRequest {
            prompt: vars.render(&page.prompt),
            negative_prompt: vars.render(&page.negative_prompt),
            width: clamp_dimension(page.width),
            height: clamp_dimension(page.height),
            sampler: page.sampler.clone(),
            steps: page.steps,
            cfg_scale: page.cfg_scale,
            seed: page.seed,
            checkpoint_override: page.checkpoint_override().map(str::to_string),
            conditioning_graph: ConditioningGraph::from_units(units),
            styles: page.styles.clone(),
        };

        let generated = self
            .service
            .generate(&request)
            .await
            .map_err(PipelineError::SynthesisFailure)?;
        let image = if page.use_swap {
            self.apply_swap(page, face, generated).await
        } else {
            generated
        };

        let dest = target.to_path_buf();
        run_blocking(move || save_b64_image(&image, &dest)).await?;
        log.line(LogTag::Ok, format!("page {} saved {}", page.index, target.display()));
        Ok(())
    }

    /// Swap the record's face into `generated`. Any failure keeps
    /// `generated`.
    async fn apply_swap(&mut self, page: &Page, face: &str, generated: String) -> String {
        let ctx = self.ctx;
        let log = &ctx.log;
        if !self.swap_ready {
            log.line(LogTag::Swap, format!("page {}: swap unavailable, skipped", page.index));
            return generated;
        }

        let options = SwapOptions::from_value(&page.swap_options).unwrap_or_else(|e| {
            log.warn(format!("page {}: {e}; using default swap options", page.index));
            SwapOptions::default()
        });
        let request = SwapRequest::new(face, &generated, &options);

        let swapped = match self.service.swap(&request).await {
            Ok(swapped) => swapped,
            Err(e) => {
                let e = PipelineError::SwapFailure(e);
                log.warn(format!("page {}: {e}; keeping generated image", page.index));
                self.summary.swap_failures += 1;
                return generated;
            }
        };

        let (before, after) = (generated.clone(), swapped.clone());
        let unchanged = run_blocking(move || {
            let after = decode_b64(&after)?;
            Ok(decode_b64(&before)
                .ok()
                .map(|before| sha256_hex(&before) == sha256_hex(&after)))
        })
        .await;
        let unchanged = match unchanged {
            Ok(Some(unchanged)) => unchanged,
            Ok(None) => return swapped,
            Err(e) => {
                log.warn(format!("page {}: swap result undecodable: {e}; keeping generated image", page.index));
                self.summary.swap_failures += 1;
                return generated;
            }
        };

        if unchanged {
            log.line(
                LogTag::Swap,
                format!("page {}: swap changed nothing (no face detected?)", page.index),
            );
        } else {
            log.line(LogTag::Swap, format!("page {}: face swapped", page.index));
        }
        self.summary.swaps_applied += 1;
        swapped
    }
}

/// Refresh one record's row and flush immediately.
async fn write_back(sheet: &mut SheetWriter, record: &Record, outputs: &[String], log: &JobLog) {
    let Some(row) = record.source_row else {
        return;
    };
    if !sheet.is_active() {
        return;
    }
    sheet.write_record_pages(row, outputs);
    match sheet.save_async().await {
        Ok(()) => log.line(LogTag::Sheet, format!("row {row} updated")),
        Err(e) => log.warn(e.to_string()),
    }
}
