use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrintJobId(u64);

impl PrintJobId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PrintJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrintJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "print-job-{}", self.0)
    }
}

/// Orientation of a print page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    /// Lowercase token used on buttons and in command placeholders.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Orientation::Portrait => "Portrait",
            Orientation::Landscape => "Landscape",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(format!("unknown orientation '{other}'")),
        }
    }
}

/// Margin values expressed in points (1/72").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margin {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Margin {
    pub const fn zero() -> Self {
        Self::uniform(0.0)
    }

    pub const fn uniform(value: f32) -> Self {
        Self {
            top: value,
            bottom: value,
            left: value,
            right: value,
        }
    }
}

/// Supported paper identifiers for quick selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperId {
    A4,
    Letter,
    Legal,
    A3,
}

impl PaperId {
    pub const fn size(&self) -> PaperSize {
        match self {
            PaperId::A4 => PaperSize::new(PaperId::A4, 210.0, 297.0),
            PaperId::Letter => PaperSize::new(PaperId::Letter, 215.9, 279.4),
            PaperId::Legal => PaperSize::new(PaperId::Legal, 215.9, 355.6),
            PaperId::A3 => PaperSize::new(PaperId::A3, 297.0, 420.0),
        }
    }
}

/// Represents a paper size in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    pub id: PaperId,
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PaperSize {
    pub const fn new(id: PaperId, width_mm: f32, height_mm: f32) -> Self {
        Self {
            id,
            width_mm,
            height_mm,
        }
    }

    /// Page dimensions in points with the long edge placed per `orientation`.
    pub const fn to_points(&self, orientation: Orientation) -> (f32, f32) {
        const MM_PER_INCH: f32 = 25.4;
        let width_pt = self.width_mm / MM_PER_INCH * 72.0;
        let height_pt = self.height_mm / MM_PER_INCH * 72.0;
        match orientation {
            Orientation::Portrait => (width_pt, height_pt),
            Orientation::Landscape => (height_pt, width_pt),
        }
    }
}

/// Options supplied when requesting a print job from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJobOptions {
    pub job_id: PrintJobId,
    pub name: String,
    pub paper: PaperSize,
    pub orientation: Orientation,
    pub margins: Margin,
}

impl PrintJobOptions {
    pub fn new(
        name: impl Into<String>,
        paper: PaperSize,
        orientation: Orientation,
        margins: Margin,
    ) -> Self {
        Self {
            job_id: PrintJobId::new(),
            name: name.into(),
            paper,
            orientation,
            margins,
        }
    }

    pub fn page_size_pt(&self) -> (f32, f32) {
        self.paper.to_points(self.orientation)
    }
}

/// How a submitted file has to be printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Raster image printed scaled-to-fit on one page.
    Image,
    /// Word-processor document printed by its own application.
    NativeDocument,
    /// Multi-page document rasterized page by page before printing.
    PaginatedDocument,
}

impl FileKind {
    /// Classifies a file by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "jpg" | "jpeg" | "png" => Some(FileKind::Image),
            "docx" | "doc" => Some(FileKind::NativeDocument),
            "pdf" => Some(FileKind::PaginatedDocument),
            _ => None,
        }
    }
}

/// Content carried by a session and, once finalized, by a print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobContent {
    Text { body: String },
    File { path: PathBuf, kind: FileKind },
}

impl JobContent {
    pub fn text(body: impl Into<String>) -> Self {
        JobContent::Text { body: body.into() }
    }

    pub fn file(path: impl Into<PathBuf>, kind: FileKind) -> Self {
        JobContent::File {
            path: path.into(),
            kind,
        }
    }

    /// On-disk artifact owned by this content, if any.
    pub fn artifact(&self) -> Option<&Path> {
        match self {
            JobContent::Text { .. } => None,
            JobContent::File { path, .. } => Some(path),
        }
    }
}

/// Every choice a user made, frozen at the moment the orientation was picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedJob {
    pub user_id: i64,
    pub content: JobContent,
    pub font_size: Option<u32>,
    pub orientation: Orientation,
}
