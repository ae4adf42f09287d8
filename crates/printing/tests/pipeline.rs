use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use printbot_printing::{
    DeviceJob, DispatchOptions, DispatchPath, FileKind, FinalizedJob, JobContent, JobDispatcher,
    Orientation, PageRenderer, PdfSpoolDevice, PrintDevice, PrintDispatcher, PrintError,
    PrintJobId, PrintJobOptions, PrintableArea, Rect, RenderError, TextStyle,
};
use printbot_reaper::{FsRemover, ResourceReaper, RetryPolicy};
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    BeginJob(PrintJobId),
    BeginPage(PrintJobId),
    Text(PrintJobId, String),
    Image(PrintJobId, PathBuf, Rect),
    EndPage(PrintJobId),
    Finish(PrintJobId),
    Abort(PrintJobId, String),
}

impl Event {
    fn job(&self) -> PrintJobId {
        match self {
            Event::BeginJob(id)
            | Event::BeginPage(id)
            | Event::Text(id, _)
            | Event::Image(id, _, _)
            | Event::EndPage(id)
            | Event::Finish(id)
            | Event::Abort(id, _) => *id,
        }
    }
}

#[derive(Clone, Default)]
struct RecordingDevice {
    events: Arc<Mutex<Vec<Event>>>,
    /// Fail the draw call on this (1-based) page.
    fail_on_page: Option<u32>,
    draw_delay: Duration,
}

impl RecordingDevice {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

struct RecordingJob {
    id: PrintJobId,
    pages_begun: u32,
    device: RecordingDevice,
}

impl RecordingJob {
    fn record(&self, event: Event) {
        self.device.events.lock().unwrap().push(event);
    }

    fn check_failure(&self) -> Result<(), String> {
        if self.device.fail_on_page == Some(self.pages_begun) {
            return Err(format!("paper jam on page {}", self.pages_begun));
        }
        thread::sleep(self.device.draw_delay);
        Ok(())
    }
}

impl PrintDevice for RecordingDevice {
    type Error = String;
    type Job = RecordingJob;

    fn begin_job(&self, options: &PrintJobOptions) -> Result<Self::Job, Self::Error> {
        let job = RecordingJob {
            id: options.job_id,
            pages_begun: 0,
            device: self.clone(),
        };
        job.record(Event::BeginJob(options.job_id));
        Ok(job)
    }
}

impl DeviceJob for RecordingJob {
    type Error = String;

    fn begin_page(&mut self) -> Result<(), Self::Error> {
        self.pages_begun += 1;
        self.record(Event::BeginPage(self.id));
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), Self::Error> {
        self.record(Event::EndPage(self.id));
        Ok(())
    }

    fn draw_text(&mut self, text: &str, _rect: Rect, _style: &TextStyle) -> Result<(), Self::Error> {
        self.check_failure()?;
        self.record(Event::Text(self.id, text.to_string()));
        Ok(())
    }

    fn draw_image(&mut self, image: &Path, rect: Rect) -> Result<(), Self::Error> {
        self.check_failure()?;
        self.record(Event::Image(self.id, image.to_path_buf(), rect));
        Ok(())
    }

    fn finish(self) -> Result<(), Self::Error> {
        self.record(Event::Finish(self.id));
        Ok(())
    }

    fn abort(self, reason: &str) {
        self.record(Event::Abort(self.id, reason.to_string()));
    }
}

/// Writes `pages` small PNGs and returns them in page order.
struct FakeRenderer {
    dir: PathBuf,
    pages: u32,
}

impl PageRenderer for FakeRenderer {
    fn render_pages_as_images(&self, source: &Path, _scale: f32) -> Result<Vec<PathBuf>, RenderError> {
        let stem = source.file_stem().unwrap().to_string_lossy().into_owned();
        let mut out = Vec::new();
        for page in 1..=self.pages {
            let path = self.dir.join(format!("{stem}-page-{page}.png"));
            image::RgbImage::new(60, 80).save(&path).unwrap();
            out.push(path);
        }
        Ok(out)
    }
}

fn long_text(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|index| format!("Paragraph {index} talks about printing things on paper."))
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_job(user_id: i64, body: String) -> FinalizedJob {
    FinalizedJob {
        user_id,
        content: JobContent::Text { body },
        font_size: Some(20),
        orientation: Orientation::Portrait,
    }
}

fn fast_reaper() -> ResourceReaper {
    ResourceReaper::spawn(RetryPolicy::new(3, Duration::ZERO), Arc::new(FsRemover)).unwrap()
}

#[test]
fn long_text_spans_multiple_pages_in_one_job() {
    let device = RecordingDevice::default();
    let dispatcher = PrintDispatcher::new(device.clone(), DispatchOptions::default());
    let body = long_text(80);

    let report = dispatcher.dispatch(&text_job(1, body.clone())).unwrap();
    assert_eq!(report.path, DispatchPath::Text);
    assert!(report.pages > 1, "expected several pages, got {}", report.pages);

    let events = device.events();
    assert!(matches!(events.first(), Some(Event::BeginJob(_))));
    assert!(matches!(events.last(), Some(Event::Finish(_))));

    let printed: String = events
        .iter()
        .filter_map(|event| match event {
            Event::Text(_, text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(printed, body);
}

#[test]
fn image_is_scaled_to_fit_the_printable_area() {
    let dir = tempdir().unwrap();
    let photo = dir.path().join("photo.png");
    image::RgbImage::new(200, 100).save(&photo).unwrap();

    let device = RecordingDevice::default();
    let options = DispatchOptions::default();
    let area = PrintableArea::from_paper(options.paper, Orientation::Landscape, options.margins);
    let dispatcher = PrintDispatcher::new(device.clone(), options);

    let report = dispatcher
        .dispatch(&FinalizedJob {
            user_id: 3,
            content: JobContent::file(&photo, FileKind::Image),
            font_size: None,
            orientation: Orientation::Landscape,
        })
        .unwrap();
    assert_eq!(report.pages, 1);

    let rect = device
        .events()
        .into_iter()
        .find_map(|event| match event {
            Event::Image(_, _, rect) => Some(rect),
            _ => None,
        })
        .unwrap();
    // Landscape A4 is narrower than 2:1, so width is the limit.
    assert!((rect.size.width - area.width_pt).abs() < 0.01);
    assert!((rect.size.height - area.width_pt / 2.0).abs() < 0.01);
    assert!(rect.size.height <= area.height_pt);
}

#[test]
fn rendered_pages_are_printed_in_order_and_reaped() {
    let dir = tempdir().unwrap();
    let device = RecordingDevice::default();
    let reaper = fast_reaper();
    let dispatcher = PrintDispatcher::new(device.clone(), DispatchOptions::default())
        .with_renderer(Arc::new(FakeRenderer {
            dir: dir.path().to_path_buf(),
            pages: 3,
        }))
        .with_reaper(reaper.clone());

    let report = dispatcher
        .dispatch(&FinalizedJob {
            user_id: 4,
            content: JobContent::file(dir.path().join("report.pdf"), FileKind::PaginatedDocument),
            font_size: None,
            orientation: Orientation::Portrait,
        })
        .unwrap();
    assert_eq!(report.path, DispatchPath::RenderedPages);
    assert_eq!(report.pages, 3);

    let images: Vec<PathBuf> = device
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Image(_, path, _) => Some(path),
            _ => None,
        })
        .collect();
    let names: Vec<_> = images
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["report-page-1.png", "report-page-2.png", "report-page-3.png"]
    );

    reaper.flush();
    assert!(images.iter().all(|path| !path.exists()));
}

#[test]
fn device_failure_aborts_the_job_and_still_reaps_pages() {
    let dir = tempdir().unwrap();
    let device = RecordingDevice {
        fail_on_page: Some(2),
        ..RecordingDevice::default()
    };
    let reaper = fast_reaper();
    let dispatcher = PrintDispatcher::new(device.clone(), DispatchOptions::default())
        .with_renderer(Arc::new(FakeRenderer {
            dir: dir.path().to_path_buf(),
            pages: 3,
        }))
        .with_reaper(reaper.clone());

    let err = dispatcher
        .dispatch(&FinalizedJob {
            user_id: 5,
            content: JobContent::file(dir.path().join("scan.pdf"), FileKind::PaginatedDocument),
            font_size: None,
            orientation: Orientation::Portrait,
        })
        .unwrap_err();
    assert!(matches!(err, PrintError::PrintDeviceFailure(ref message) if message.contains("paper jam")));

    let events = device.events();
    assert!(matches!(events.last(), Some(Event::Abort(_, reason)) if reason.contains("paper jam")));
    assert!(!events.iter().any(|event| matches!(event, Event::Finish(_))));

    reaper.flush();
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn concurrent_dispatches_never_interleave_on_the_device() {
    let device = RecordingDevice {
        draw_delay: Duration::from_millis(2),
        ..RecordingDevice::default()
    };
    let dispatcher = Arc::new(PrintDispatcher::new(device.clone(), DispatchOptions::default()));

    let handles: Vec<_> = (0..4)
        .map(|user| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.dispatch(&text_job(user, long_text(60))).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let events = device.events();
    let mut finished = Vec::new();
    let mut current = None;
    for event in &events {
        match event {
            Event::BeginJob(id) => {
                assert!(current.is_none(), "job {id} started inside another job");
                current = Some(*id);
            }
            Event::Finish(id) => {
                assert_eq!(current, Some(*id));
                finished.push(*id);
                current = None;
            }
            other => assert_eq!(Some(other.job()), current),
        }
    }
    assert_eq!(finished.len(), 4);
}

#[test]
fn spool_device_writes_a_pdf_per_job() {
    let dir = tempdir().unwrap();
    let spool = dir.path().join("spool");
    let dispatcher = PrintDispatcher::new(PdfSpoolDevice::new(&spool), DispatchOptions::default());

    let report = dispatcher.dispatch(&text_job(9, long_text(80))).unwrap();
    assert!(report.pages > 1);

    let files: Vec<_> = fs::read_dir(&spool)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let bytes = fs::read(&files[0]).unwrap();
    let marker = format!("/Type /Pages /Count {}", report.pages);
    assert!(bytes
        .windows(marker.len())
        .any(|window| window == marker.as_bytes()));
}
