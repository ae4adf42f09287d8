//! Print device that spools each job into a PDF file and optionally hands
//! the file to a submit command such as `lp`.
//! （將列印作業輸出為 PDF 檔並可交由送印指令處理的裝置。）

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{info, warn};
use thiserror::Error;

use crate::command::{CommandError, CommandTemplate};
use crate::display::{Rect, TextStyle};
use crate::job::{PrintJobId, PrintJobOptions};
use crate::layout::{wrap_lines, MonospaceMeasure};
use crate::platform::{DeviceJob, PrintDevice};

/// Errors raised by [`PdfSpoolDevice`].
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to load image: {0}")]
    Image(#[from] image::ImageError),
    #[error("a page is already open")]
    PageAlreadyOpen,
    #[error("no page is open")]
    NoOpenPage,
    #[error("submitting spooled job failed: {0}")]
    Submit(#[from] CommandError),
}

/// Writes every finished job to `<spool_dir>/<timestamp>-print-job-<n>.pdf`.
/// 將每個完成的作業寫入列印佇列目錄。
#[derive(Debug, Clone)]
pub struct PdfSpoolDevice {
    spool_dir: PathBuf,
    submit: Option<CommandTemplate>,
}

impl PdfSpoolDevice {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            submit: None,
        }
    }

    /// Runs `command` with `{input}` set to the spooled PDF after each job.
    pub fn with_submit(mut self, command: CommandTemplate) -> Self {
        self.submit = Some(command);
        self
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }
}

impl PrintDevice for PdfSpoolDevice {
    type Error = SpoolError;
    type Job = PdfSpoolJob;

    fn begin_job(&self, options: &PrintJobOptions) -> Result<Self::Job, Self::Error> {
        fs::create_dir_all(&self.spool_dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let path = self
            .spool_dir
            .join(format!("{stamp}-{}.pdf", options.job_id));
        info!("Starting {} '{}' -> {}", options.job_id, options.name, path.display());
        Ok(PdfSpoolJob {
            job_id: options.job_id,
            path,
            page_size: options.page_size_pt(),
            pages: Vec::new(),
            open: None,
            submit: self.submit.clone(),
        })
    }
}

#[derive(Default)]
struct SpoolPage {
    content: Vec<u8>,
    images: Vec<EmbeddedImage>,
}

struct EmbeddedImage {
    width: u32,
    height: u32,
    /// zlib-compressed RGB samples
    data: Vec<u8>,
}

/// Job handle produced by [`PdfSpoolDevice`]; pages are kept in memory until
/// [`DeviceJob::finish`].
pub struct PdfSpoolJob {
    job_id: PrintJobId,
    path: PathBuf,
    page_size: (f32, f32),
    pages: Vec<SpoolPage>,
    open: Option<SpoolPage>,
    submit: Option<CommandTemplate>,
}

impl PdfSpoolJob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_page(&mut self) -> Result<&mut SpoolPage, SpoolError> {
        self.open.as_mut().ok_or(SpoolError::NoOpenPage)
    }
}

impl DeviceJob for PdfSpoolJob {
    type Error = SpoolError;

    fn begin_page(&mut self) -> Result<(), Self::Error> {
        if self.open.is_some() {
            return Err(SpoolError::PageAlreadyOpen);
        }
        self.open = Some(SpoolPage::default());
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), Self::Error> {
        let page = self.open.take().ok_or(SpoolError::NoOpenPage)?;
        self.pages.push(page);
        Ok(())
    }

    fn draw_text(&mut self, text: &str, rect: Rect, style: &TextStyle) -> Result<(), Self::Error> {
        let page_height = self.page_size.1;
        let size = style.font_size_pt;
        let measure = MonospaceMeasure::for_font_size(size);
        let page = self.open_page()?;

        for (index, line) in wrap_lines(text, measure.columns(rect.size.width))
            .into_iter()
            .enumerate()
        {
            let top = rect.origin.y + index as f32 * measure.line_height_pt;
            if top + size > rect.bottom() + 0.01 {
                break;
            }
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            page.content.extend_from_slice(
                format!(
                    "BT\n/F1 {} Tf\n1 0 0 1 {} {} Tm\n(",
                    fmt_float(size),
                    fmt_float(rect.origin.x),
                    fmt_float(page_height - top - size)
                )
                .as_bytes(),
            );
            push_escaped_text(&mut page.content, line);
            page.content.extend_from_slice(b") Tj\nET\n");
        }
        Ok(())
    }

    fn draw_image(&mut self, source: &Path, rect: Rect) -> Result<(), Self::Error> {
        let page_height = self.page_size.1;
        let bitmap = image::open(source)?.to_rgb8();
        let (width, height) = bitmap.dimensions();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bitmap.as_raw())?;
        let data = encoder.finish()?;

        let page = self.open_page()?;
        let name = format!("Im{}", page.images.len());
        page.images.push(EmbeddedImage {
            width,
            height,
            data,
        });
        page.content.extend_from_slice(
            format!(
                "q\n{} 0 0 {} {} {} cm\n/{name} Do\nQ\n",
                fmt_float(rect.size.width),
                fmt_float(rect.size.height),
                fmt_float(rect.origin.x),
                fmt_float(page_height - rect.origin.y - rect.size.height)
            )
            .as_bytes(),
        );
        Ok(())
    }

    fn finish(mut self) -> Result<(), Self::Error> {
        if let Some(page) = self.open.take() {
            warn!("{} finished with an open page; closing it", self.job_id);
            self.pages.push(page);
        }
        if self.pages.is_empty() {
            info!("{} has no pages; nothing spooled", self.job_id);
            return Ok(());
        }

        let bytes = render_pdf(&self.pages, self.page_size);
        let partial = self.path.with_extension("pdf.part");
        fs::write(&partial, bytes)?;
        fs::rename(&partial, &self.path)?;
        info!(
            "{} spooled {} page(s) to {}",
            self.job_id,
            self.pages.len(),
            self.path.display()
        );

        if let Some(submit) = &self.submit {
            let input = self.path.to_string_lossy();
            submit.run(&[("input", input.as_ref())])?;
            info!("{} submitted via {}", self.job_id, submit.program);
        }
        Ok(())
    }

    fn abort(self, reason: &str) {
        warn!(
            "{} aborted after {} page(s): {reason}",
            self.job_id,
            self.pages.len()
        );
    }
}

fn render_pdf(pages: &[SpoolPage], (page_width, page_height): (f32, f32)) -> Vec<u8> {
    let mut builder = PdfBuilder::default();
    let catalog = builder.reserve();
    let pages_object = builder.reserve();
    let font_object = builder.add_object(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
    );

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let mut xobjects = String::new();
        for (index, image) in page.images.iter().enumerate() {
            let object = builder.add_stream(
                &format!(
                    "/Type /XObject /Subtype /Image /Width {} /Height {} \
                     /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode",
                    image.width, image.height
                ),
                &image.data,
            );
            xobjects.push_str(&format!("/Im{index} {object} 0 R "));
        }
        let resources = if xobjects.is_empty() {
            format!("/Font << /F1 {font_object} 0 R >>")
        } else {
            format!("/Font << /F1 {font_object} 0 R >> /XObject << {xobjects}>>")
        };

        let content = builder.add_stream("", &page.content);
        let page_object = builder.add_object(format!(
            "<< /Type /Page /Parent {pages_object} 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << {resources} >> /Contents {content} 0 R >>",
            width = fmt_float(page_width),
            height = fmt_float(page_height),
        ));
        kids.push(format!("{page_object} 0 R"));
    }

    builder.set(
        pages_object,
        format!(
            "<< /Type /Pages /Count {} /Kids [{}] >>",
            kids.len(),
            kids.join(" ")
        ),
    );
    builder.set(
        catalog,
        format!("<< /Type /Catalog /Pages {pages_object} 0 R >>"),
    );
    builder.finish(catalog)
}

fn fmt_float(value: f32) -> String {
    format!("{:.3}", value)
}

/// Writes `text` as a WinAnsi literal string body.
fn push_escaped_text(out: &mut Vec<u8>, text: &str) {
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(ch as u8);
            }
            '\t' => out.push(b' '),
            ' '..='~' | '\u{A0}'..='\u{FF}' => out.push(ch as u32 as u8),
            c if c.is_control() => {}
            _ => out.push(b'?'),
        }
    }
}

#[derive(Default)]
struct PdfBuilder {
    objects: Vec<Vec<u8>>,
}

impl PdfBuilder {
    /// Allocates an object number to be filled in later with [`PdfBuilder::set`].
    fn reserve(&mut self) -> usize {
        self.objects.push(Vec::new());
        self.objects.len()
    }

    fn set(&mut self, number: usize, body: impl Into<Vec<u8>>) {
        self.objects[number - 1] = body.into();
    }

    fn add_object(&mut self, body: impl Into<Vec<u8>>) -> usize {
        self.objects.push(body.into());
        self.objects.len()
    }

    fn add_stream(&mut self, dictionary: &str, stream: &[u8]) -> usize {
        let mut body = if dictionary.is_empty() {
            format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes()
        } else {
            format!("<< {dictionary} /Length {} >>\nstream\n", stream.len()).into_bytes()
        };
        body.extend_from_slice(stream);
        body.extend_from_slice(b"\nendstream");
        self.add_object(body)
    }

    fn finish(self, root: usize) -> Vec<u8> {
        let mut output = Vec::new();
        output.extend_from_slice(b"%PDF-1.4\n%\xFF\xFF\xFF\xFF\n");
        let mut offsets = Vec::with_capacity(self.objects.len());

        for (index, body) in self.objects.iter().enumerate() {
            offsets.push(output.len());
            output.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
            output.extend_from_slice(body);
            output.extend_from_slice(b"\nendobj\n");
        }

        let xref_start = output.len();
        output.extend_from_slice(
            format!("xref\n0 {}\n0000000000 65535 f \n", self.objects.len() + 1).as_bytes(),
        );
        for offset in offsets {
            output.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        output.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {root} 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
                self.objects.len() + 1
            )
            .as_bytes(),
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Margin, Orientation, PaperId};
    use tempfile::tempdir;

    fn options() -> PrintJobOptions {
        PrintJobOptions::new(
            "Print Job",
            PaperId::A4.size(),
            Orientation::Portrait,
            Margin::uniform(36.0),
        )
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    #[test]
    fn spools_text_and_image_pages() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("photo.png");
        image::RgbImage::new(4, 2).save(&image_path).unwrap();

        let device = PdfSpoolDevice::new(dir.path().join("spool"));
        let mut job = device.begin_job(&options()).unwrap();
        let path = job.path().to_path_buf();

        job.begin_page().unwrap();
        job.draw_text(
            "Hello (world)",
            Rect::new(36.0, 36.0, 500.0, 700.0),
            &TextStyle::page_body(12.0),
        )
        .unwrap();
        job.end_page().unwrap();
        job.begin_page().unwrap();
        job.draw_image(&image_path, Rect::new(36.0, 36.0, 400.0, 200.0))
            .unwrap();
        job.end_page().unwrap();
        job.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(contains(&bytes, "/Type /Pages /Count 2"));
        assert!(contains(&bytes, "(Hello \\(world\\)) Tj"));
        assert!(contains(&bytes, "/Subtype /Image /Width 4 /Height 2"));
        assert!(contains(&bytes, "/Im0 Do"));
        assert!(bytes.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn aborted_job_leaves_no_file() {
        let dir = tempdir().unwrap();
        let device = PdfSpoolDevice::new(dir.path());
        let mut job = device.begin_job(&options()).unwrap();
        job.begin_page().unwrap();
        job.abort("printer offline");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn page_protocol_is_enforced() {
        let dir = tempdir().unwrap();
        let mut job = PdfSpoolDevice::new(dir.path()).begin_job(&options()).unwrap();
        assert!(matches!(job.end_page(), Err(SpoolError::NoOpenPage)));
        job.begin_page().unwrap();
        assert!(matches!(job.begin_page(), Err(SpoolError::PageAlreadyOpen)));
    }

    #[test]
    fn text_is_clipped_to_the_rectangle() {
        let dir = tempdir().unwrap();
        let mut job = PdfSpoolDevice::new(dir.path()).begin_job(&options()).unwrap();
        job.begin_page().unwrap();
        // Two lines of 12pt text need 26.4pt; only the first fits.
        job.draw_text(
            "first\nsecond",
            Rect::new(0.0, 0.0, 300.0, 20.0),
            &TextStyle::page_body(12.0),
        )
        .unwrap();
        let content = &job.open.as_ref().unwrap().content;
        assert!(contains(content, "(first) Tj"));
        assert!(!contains(content, "(second) Tj"));
    }

    #[test]
    fn non_latin_text_is_replaced() {
        let mut out = Vec::new();
        push_escaped_text(&mut out, "caf\u{e9} \u{4e2d}\\");
        assert_eq!(out, b"caf\xe9 ?\\\\".to_vec());
    }

    #[cfg(unix)]
    #[test]
    fn submit_command_receives_spooled_path() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("submitted.txt");
        let device = PdfSpoolDevice::new(dir.path().join("spool")).with_submit(
            CommandTemplate::new("sh").with_args([
                "-c".to_string(),
                format!("printf '%s' {{input}} > {}", log.display()),
            ]),
        );
        let mut job = device.begin_job(&options()).unwrap();
        let path = job.path().to_path_buf();
        job.begin_page().unwrap();
        job.draw_text("x", Rect::new(0.0, 0.0, 100.0, 100.0), &TextStyle::page_body(11.0))
            .unwrap();
        job.end_page().unwrap();
        job.finish().unwrap();

        assert_eq!(fs::read_to_string(log).unwrap(), path.to_string_lossy());
    }
}
