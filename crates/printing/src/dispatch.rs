use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use printbot_reaper::ResourceReaper;
use thiserror::Error;

use crate::display::TextStyle;
use crate::job::{
    FileKind, FinalizedJob, JobContent, Margin, Orientation, PaperId, PaperSize, PrintJobId,
    PrintJobOptions,
};
use crate::layout::{normalize_text, MonospaceMeasure, Paginator, PrintableArea};
use crate::platform::{DeviceJob, JobGuard, PrintDevice};
use crate::render::{NativeDocumentPrinter, PageRenderer, RenderError};

/// Font size used when a text job reaches the dispatcher without one.
pub const DEFAULT_FONT_SIZE: u32 = 12;

/// Everything that can go wrong between a finalized job and paper.
/// 從確認的作業到實際列印之間可能發生的錯誤。
#[derive(Debug, Error)]
pub enum PrintError {
    #[error("failed to download submission: {0}")]
    DownloadFailed(String),
    #[error("text does not fit on a page at offset {offset} ({pages_printed} page(s) printed)")]
    OversizedContent { offset: usize, pages_printed: u32 },
    #[error("print device failure: {0}")]
    PrintDeviceFailure(String),
    #[error("rendering failed: {0}")]
    RenderFailed(#[from] RenderError),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl PrintError {
    /// Short text suitable for the person who submitted the job.
    pub fn user_message(&self) -> &'static str {
        match self {
            PrintError::DownloadFailed(_) => "Sorry, I could not download your file.",
            PrintError::OversizedContent { .. } => {
                "Part of your text did not fit on a page and was not printed."
            }
            PrintError::PrintDeviceFailure(_) => "Printing failed. Please try again later.",
            PrintError::RenderFailed(_) => "Sorry, I could not prepare your document for printing.",
            PrintError::UnsupportedFormat(_) => "Sorry, this file type is not supported.",
        }
    }
}

fn device_failure(err: impl Display) -> PrintError {
    PrintError::PrintDeviceFailure(err.to_string())
}

/// Route a job took through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    Text,
    Image,
    NativeDocument,
    RenderedPages,
}

/// Summary of a completed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// `None` when the job never reached the device (native documents and
    /// empty text).
    pub job_id: Option<PrintJobId>,
    pub path: DispatchPath,
    pub pages: u32,
    /// `false` when a native document printed with its own page setup.
    pub orientation_applied: bool,
}

/// Turns a finalized job into device output. Implemented by [`PrintDispatcher`]
/// and by test doubles in the session layer.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job: &FinalizedJob) -> Result<DispatchReport, PrintError>;
}

/// Page geometry and naming shared by every job.
/// 所有作業共用的頁面設定。
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    pub paper: PaperSize,
    pub margins: Margin,
    /// Zoom factor used when rasterizing paginated documents.
    pub render_scale: f32,
    pub job_name: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            paper: PaperId::A4.size(),
            margins: Margin::uniform(36.0),
            render_scale: 2.0,
            job_name: "Print Job".to_string(),
        }
    }
}

/// Serializes every job onto one [`PrintDevice`].
///
/// The device lock is held for the whole job, so pages of concurrent
/// dispatches never interleave.
/// 將所有作業依序送往同一台裝置；整個作業期間持有裝置鎖。
pub struct PrintDispatcher<D: PrintDevice> {
    device: D,
    device_lock: Mutex<()>,
    options: DispatchOptions,
    renderer: Option<Arc<dyn PageRenderer>>,
    documents: Option<Arc<dyn NativeDocumentPrinter>>,
    reaper: Option<ResourceReaper>,
}

impl<D> PrintDispatcher<D>
where
    D: PrintDevice,
    D::Error: Display,
{
    pub fn new(device: D, options: DispatchOptions) -> Self {
        Self {
            device,
            device_lock: Mutex::new(()),
            options,
            renderer: None,
            documents: None,
            reaper: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_document_printer(mut self, printer: Arc<dyn NativeDocumentPrinter>) -> Self {
        self.documents = Some(printer);
        self
    }

    /// Rendered page images are handed to `reaper` once printed.
    pub fn with_reaper(mut self, reaper: ResourceReaper) -> Self {
        self.reaper = Some(reaper);
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    fn job_options(&self, orientation: Orientation) -> PrintJobOptions {
        PrintJobOptions::new(
            self.options.job_name.clone(),
            self.options.paper,
            orientation,
            self.options.margins,
        )
    }

    fn printable_area(&self, orientation: Orientation) -> PrintableArea {
        PrintableArea::from_paper(self.options.paper, orientation, self.options.margins)
    }

    /// Opens a job, lets `body` fill its pages and finishes it. Any failure
    /// aborts the job before the error is returned.
    fn run_job<F>(&self, options: &PrintJobOptions, body: F) -> Result<u32, PrintError>
    where
        F: FnOnce(&mut JobGuard<D::Job>) -> Result<(), PrintError>,
    {
        let job = self.device.begin_job(options).map_err(device_failure)?;
        let mut guard = JobGuard::new(job);
        if let Err(err) = body(&mut guard) {
            error!("{} failed: {err}", options.job_id);
            guard.abort(&err.to_string());
            return Err(err);
        }
        let pages = guard.finish().map_err(device_failure)?;
        info!("{} finished with {pages} page(s)", options.job_id);
        Ok(pages)
    }

    fn print_text(
        &self,
        body: &str,
        font_size: Option<u32>,
        orientation: Orientation,
    ) -> Result<DispatchReport, PrintError> {
        let font_size = font_size.unwrap_or_else(|| {
            debug!("No font size chosen; using {DEFAULT_FONT_SIZE}pt");
            DEFAULT_FONT_SIZE
        });
        let text = normalize_text(body);
        let area = self.printable_area(orientation);
        let measure = MonospaceMeasure::for_font_size(font_size as f32);
        let pagination = Paginator::new(&measure).paginate(&text, area);

        let mut report = DispatchReport {
            job_id: None,
            path: DispatchPath::Text,
            pages: 0,
            orientation_applied: true,
        };
        if !pagination.slices.is_empty() {
            let options = self.job_options(orientation);
            let rect = area.rect(self.options.margins);
            let style = TextStyle::page_body(font_size as f32);
            report.pages = self.run_job(&options, |guard| {
                for slice in &pagination.slices {
                    guard
                        .page(|page| page.draw_text(slice.text(&text), rect, &style))
                        .map_err(device_failure)?;
                }
                Ok(())
            })?;
            report.job_id = Some(options.job_id);
        }

        match pagination.halted_at {
            Some(offset) => {
                warn!(
                    "Text did not fit at offset {offset}; printed {} page(s)",
                    report.pages
                );
                Err(PrintError::OversizedContent {
                    offset,
                    pages_printed: report.pages,
                })
            }
            None => Ok(report),
        }
    }

    /// Prints each image scaled to fit, one per page.
    fn print_images(
        &self,
        images: &[PathBuf],
        orientation: Orientation,
        path: DispatchPath,
    ) -> Result<DispatchReport, PrintError> {
        let area = self.printable_area(orientation).rect(self.options.margins);
        let mut placements = Vec::with_capacity(images.len());
        for image in images {
            let (width, height) = image::image_dimensions(image).map_err(|err| {
                PrintError::UnsupportedFormat(format!("{}: {err}", image.display()))
            })?;
            placements.push((image.as_path(), area.fit_aspect(width, height)));
        }

        let options = self.job_options(orientation);
        let pages = self.run_job(&options, |guard| {
            for (image, rect) in &placements {
                guard
                    .page(|page| page.draw_image(image, *rect))
                    .map_err(device_failure)?;
            }
            Ok(())
        })?;
        Ok(DispatchReport {
            job_id: Some(options.job_id),
            path,
            pages,
            orientation_applied: true,
        })
    }

    fn print_rendered(
        &self,
        source: &Path,
        orientation: Orientation,
    ) -> Result<DispatchReport, PrintError> {
        let renderer = self.renderer.as_ref().ok_or_else(|| {
            PrintError::UnsupportedFormat("no page renderer is configured".to_string())
        })?;
        let pages = renderer.render_pages_as_images(source, self.options.render_scale)?;
        let _release = RenderedPages {
            pages: &pages,
            reaper: self.reaper.as_ref(),
        };
        self.print_images(&pages, orientation, DispatchPath::RenderedPages)
    }

    fn print_native(
        &self,
        source: &Path,
        orientation: Orientation,
    ) -> Result<DispatchReport, PrintError> {
        let printer = self.documents.as_ref().ok_or_else(|| {
            PrintError::UnsupportedFormat("no document printer is configured".to_string())
        })?;
        let orientation_applied = printer.print_native_document(source, orientation)?;
        Ok(DispatchReport {
            job_id: None,
            path: DispatchPath::NativeDocument,
            pages: 0,
            orientation_applied,
        })
    }
}

impl<D> JobDispatcher for PrintDispatcher<D>
where
    D: PrintDevice,
    D::Error: Display,
{
    fn dispatch(&self, job: &FinalizedJob) -> Result<DispatchReport, PrintError> {
        let _device = self
            .device_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        info!(
            "Dispatching job for user {} ({})",
            job.user_id, job.orientation
        );

        match &job.content {
            JobContent::Text { body } => self.print_text(body, job.font_size, job.orientation),
            JobContent::File { path, kind } => match kind {
                FileKind::Image => self.print_images(
                    std::slice::from_ref(path),
                    job.orientation,
                    DispatchPath::Image,
                ),
                FileKind::NativeDocument => self.print_native(path, job.orientation),
                FileKind::PaginatedDocument => self.print_rendered(path, job.orientation),
            },
        }
    }
}

/// Schedules rendered page images for deletion when dropped.
struct RenderedPages<'a> {
    pages: &'a [PathBuf],
    reaper: Option<&'a ResourceReaper>,
}

impl Drop for RenderedPages<'_> {
    fn drop(&mut self) {
        match self.reaper {
            Some(reaper) => {
                for page in self.pages {
                    reaper.schedule(page.clone());
                }
            }
            None => {
                if !self.pages.is_empty() {
                    warn!(
                        "No reaper configured; leaving {} rendered page(s) on disk",
                        self.pages.len()
                    );
                }
            }
        }
    }
}
