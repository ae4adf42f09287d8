//! Print pipeline: text pagination, device abstraction, PDF spooling and the
//! dispatcher that routes finalized jobs to a device.
//! 列印流程：文字分頁、裝置抽象、PDF 佇列與作業派送。

pub mod command;
pub mod dispatch;
pub mod display;
pub mod job;
pub mod layout;
pub mod platform;
pub mod render;
pub mod spool;

pub use command::{CommandError, CommandOutput, CommandTemplate};
pub use dispatch::{
    DispatchOptions, DispatchPath, DispatchReport, JobDispatcher, PrintDispatcher, PrintError,
    DEFAULT_FONT_SIZE,
};
pub use display::{Point, Rect, Size, TextAlign, TextFlags, TextStyle};
pub use job::{
    FileKind, FinalizedJob, JobContent, Margin, Orientation, PaperId, PaperSize, PrintJobId,
    PrintJobOptions,
};
pub use layout::{
    normalize_text, wrap_lines, MonospaceMeasure, PageSlice, Pagination, Paginator,
    PrintableArea, TextMeasure,
};
pub use platform::{DeviceJob, JobGuard, PrintDevice};
pub use render::{
    dpi_for_scale, CommandDocumentPrinter, CommandRenderer, NativeDocumentPrinter, PageRenderer,
    RenderError, DEFAULT_COMMAND_TIMEOUT,
};
pub use spool::{PdfSpoolDevice, PdfSpoolJob, SpoolError};
