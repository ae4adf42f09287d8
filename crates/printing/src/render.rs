use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::command::{CommandError, CommandTemplate};
use crate::job::Orientation;

/// Time limit applied to the built-in external commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(180);

/// Failure while turning a document into printable pages.
/// 將文件轉為可列印頁面時發生的錯誤。
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("renderer produced no pages for {0}")]
    NoPages(PathBuf),
    #[error("failed to collect rendered pages: {0}")]
    Io(#[from] io::Error),
}

/// Rasterizes a paginated document into one image per page.
///
/// The returned files belong to the caller, which hands them to the reaper
/// once they have been printed.
pub trait PageRenderer: Send + Sync {
    fn render_pages_as_images(&self, source: &Path, scale: f32) -> Result<Vec<PathBuf>, RenderError>;
}

/// Sends a document straight to the application that understands its format.
///
/// Returns `true` when `orientation` was handed to the printer, `false` when
/// the document printed with its own page setup.
pub trait NativeDocumentPrinter: Send + Sync {
    fn print_native_document(
        &self,
        source: &Path,
        orientation: Orientation,
    ) -> Result<bool, RenderError>;
}

/// Resolution of a rendered page at the given zoom factor.
pub fn dpi_for_scale(scale: f32) -> u32 {
    (72.0 * scale.max(0.1)).round() as u32
}

/// [`PageRenderer`] backed by an external rasterizer such as `pdftoppm`.
///
/// Placeholders: `{input}`, `{output}` (file prefix without extension),
/// `{scale}` and `{dpi}`.
/// 透過外部轉檔程式（如 `pdftoppm`）輸出頁面影像。
#[derive(Debug)]
pub struct CommandRenderer {
    command: CommandTemplate,
    output_dir: PathBuf,
    sequence: AtomicU64,
}

impl CommandRenderer {
    pub fn new(command: CommandTemplate, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            sequence: AtomicU64::new(1),
        }
    }

    /// `pdftoppm -png -r {dpi} {input} {output}`
    pub fn pdftoppm(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            CommandTemplate::new("pdftoppm")
                .with_args(["-png", "-r", "{dpi}", "{input}", "{output}"])
                .with_timeout(DEFAULT_COMMAND_TIMEOUT),
            output_dir,
        )
    }

    fn collect_pages(&self, prefix: &str) -> io::Result<Vec<PathBuf>> {
        let mut pages = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with(prefix) && is_page_image(&path) {
                pages.push(path);
            }
        }
        pages.sort_by_key(|path| (page_number(path), path.clone()));
        Ok(pages)
    }
}

impl PageRenderer for CommandRenderer {
    fn render_pages_as_images(&self, source: &Path, scale: f32) -> Result<Vec<PathBuf>, RenderError> {
        fs::create_dir_all(&self.output_dir)?;
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("document");
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let prefix = format!("{stem}-{sequence}-page");
        let output = self.output_dir.join(&prefix);

        let input = source.to_string_lossy();
        let output = output.to_string_lossy();
        let scale_arg = scale.to_string();
        let dpi = dpi_for_scale(scale).to_string();
        let run = self.command.run(&[
            ("input", input.as_ref()),
            ("output", output.as_ref()),
            ("scale", scale_arg.as_str()),
            ("dpi", dpi.as_str()),
        ]);

        if let Err(err) = run {
            // Half-written pages never reached the caller, so they are ours to drop.
            for page in self.collect_pages(&prefix).unwrap_or_default() {
                if let Err(remove_err) = fs::remove_file(&page) {
                    warn!("Could not remove partial page {}: {remove_err}", page.display());
                }
            }
            return Err(err.into());
        }

        let pages = self.collect_pages(&prefix)?;
        if pages.is_empty() {
            return Err(RenderError::NoPages(source.to_path_buf()));
        }
        info!("Rendered {} page(s) from {}", pages.len(), source.display());
        Ok(pages)
    }
}

fn is_page_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Trailing page number of `prefix-07.png`-style names.
fn page_number(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('-').next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Converts the document with LibreOffice, then submits the PDF with CUPS
/// `lp` using the IPP orientation code.
const LIBREOFFICE_SCRIPT: &str = r#"set -e
out=$(mktemp -d)
trap 'rm -rf "$out"' EXIT
soffice --headless --convert-to pdf --outdir "$out" "$1" >/dev/null
lp -o orientation-requested="$3" "$out"/*.pdf >/dev/null"#;

/// [`NativeDocumentPrinter`] that launches an office application in print mode.
///
/// Placeholders: `{input}`, `{orientation}` (`portrait` or `landscape`) and
/// `{orientation_code}` (IPP `orientation-requested`, 3 or 4).
#[derive(Debug, Clone)]
pub struct CommandDocumentPrinter {
    command: CommandTemplate,
}

impl CommandDocumentPrinter {
    pub fn new(command: CommandTemplate) -> Self {
        if !honors_orientation(&command) {
            warn!(
                "Native printer {} takes no orientation; documents keep their own page setup",
                command.program
            );
        }
        Self { command }
    }

    /// `soffice --convert-to pdf` followed by `lp -o orientation-requested=...`.
    pub fn libreoffice() -> Self {
        Self::new(
            CommandTemplate::new("sh")
                .with_args([
                    "-c",
                    LIBREOFFICE_SCRIPT,
                    "printbot-native",
                    "{input}",
                    "{orientation}",
                    "{orientation_code}",
                ])
                .with_timeout(DEFAULT_COMMAND_TIMEOUT),
        )
    }

    pub fn honors_orientation(&self) -> bool {
        honors_orientation(&self.command)
    }
}

fn honors_orientation(command: &CommandTemplate) -> bool {
    command
        .args
        .iter()
        .any(|arg| arg.contains("{orientation}") || arg.contains("{orientation_code}"))
}

fn orientation_code(orientation: Orientation) -> &'static str {
    match orientation {
        Orientation::Portrait => "3",
        Orientation::Landscape => "4",
    }
}

impl NativeDocumentPrinter for CommandDocumentPrinter {
    fn print_native_document(
        &self,
        source: &Path,
        orientation: Orientation,
    ) -> Result<bool, RenderError> {
        let input = source.to_string_lossy();
        self.command.run(&[
            ("input", input.as_ref()),
            ("orientation", orientation.as_str()),
            ("orientation_code", orientation_code(orientation)),
        ])?;

        let applied = self.honors_orientation();
        if applied {
            info!(
                "Sent {} to the native document printer ({orientation})",
                source.display()
            );
        } else {
            warn!(
                "Sent {} to the native document printer without the requested {orientation} orientation",
                source.display()
            );
        }
        Ok(applied)
    }
}
