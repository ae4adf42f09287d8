use std::path::Path;

use log::warn;

use crate::display::{Rect, TextStyle};
use crate::job::PrintJobOptions;
#[cfg(test)]
use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Handle returned when a device begins a job. At most one page is open at a time.
/// 裝置開始列印作業後回傳的控制物件，同一時間只會有一個開啟中的頁面。
pub trait DeviceJob {
    type Error;

    fn begin_page(&mut self) -> Result<(), Self::Error>;
    fn end_page(&mut self) -> Result<(), Self::Error>;
    fn draw_text(&mut self, text: &str, rect: Rect, style: &TextStyle) -> Result<(), Self::Error>;
    fn draw_image(&mut self, image: &Path, rect: Rect) -> Result<(), Self::Error>;
    fn finish(self) -> Result<(), Self::Error>;
    fn abort(self, reason: &str);
}

/// Abstraction over the physical or virtual printer.
/// 實體或虛擬印表機的抽象介面。
pub trait PrintDevice: Send + Sync {
    type Error;
    type Job: DeviceJob<Error = Self::Error>;

    fn begin_job(&self, options: &PrintJobOptions) -> Result<Self::Job, Self::Error>;
}

/// Owns an open [`DeviceJob`] and aborts it when dropped unfinished, so every
/// job that was started is either finished or aborted.
/// 持有進行中的列印作業；若未完成即被釋放則自動中止。
pub struct JobGuard<J: DeviceJob> {
    job: Option<J>,
    pages: u32,
}

impl<J: DeviceJob> JobGuard<J> {
    pub fn new(job: J) -> Self {
        Self {
            job: Some(job),
            pages: 0,
        }
    }

    /// Opens a page, lets `draw` fill it, then closes it.
    pub fn page<F>(&mut self, draw: F) -> Result<(), J::Error>
    where
        F: FnOnce(&mut J) -> Result<(), J::Error>,
    {
        if let Some(job) = self.job.as_mut() {
            job.begin_page()?;
            draw(job)?;
            job.end_page()?;
            self.pages += 1;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<u32, J::Error> {
        if let Some(job) = self.job.take() {
            job.finish()?;
        }
        Ok(self.pages)
    }

    pub fn abort(mut self, reason: &str) {
        if let Some(job) = self.job.take() {
            job.abort(reason);
        }
    }
}

impl<J: DeviceJob> Drop for JobGuard<J> {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            warn!("Print job dropped before completion; aborting");
            job.abort("job dropped before completion");
        }
    }
}

/// Single drawing call captured by the mock device.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedDraw {
    Text { text: String, rect: Rect, size_pt: f32 },
    Image { path: PathBuf, rect: Rect },
}

/// Recorded job metadata produced by the mock device.
/// 模擬裝置所記錄的列印作業中繼資料。
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub options: PrintJobOptions,
    pub pages: Vec<Vec<RecordedDraw>>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

/// In-memory implementation of [`PrintDevice`] used for tests.
/// 測試使用的記憶體內部列印裝置實作。
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockPrintDevice {
    jobs: Arc<Mutex<Vec<RecordedJob>>>,
}

#[cfg(test)]
impl MockPrintDevice {
    pub fn drain_jobs(&self) -> Vec<RecordedJob> {
        self.jobs.lock().expect("lock poisoned").drain(..).collect()
    }
}

#[cfg(test)]
pub struct MockDeviceJob {
    options: PrintJobOptions,
    pages: Vec<Vec<RecordedDraw>>,
    open: Option<Vec<RecordedDraw>>,
    sink: Arc<Mutex<Vec<RecordedJob>>>,
}

#[cfg(test)]
impl PrintDevice for MockPrintDevice {
    type Error = String;
    type Job = MockDeviceJob;

    fn begin_job(&self, options: &PrintJobOptions) -> Result<Self::Job, Self::Error> {
        Ok(MockDeviceJob {
            options: options.clone(),
            pages: Vec::new(),
            open: None,
            sink: self.jobs.clone(),
        })
    }
}

#[cfg(test)]
impl MockDeviceJob {
    fn open_page(&mut self) -> Result<&mut Vec<RecordedDraw>, String> {
        self.open.as_mut().ok_or_else(|| "no open page".to_string())
    }
}

#[cfg(test)]
impl DeviceJob for MockDeviceJob {
    type Error = String;

    fn begin_page(&mut self) -> Result<(), Self::Error> {
        if self.open.is_some() {
            return Err("page already open".into());
        }
        self.open = Some(Vec::new());
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), Self::Error> {
        let page = self.open.take().ok_or("no open page")?;
        self.pages.push(page);
        Ok(())
    }

    fn draw_text(&mut self, text: &str, rect: Rect, style: &TextStyle) -> Result<(), Self::Error> {
        self.open_page()?.push(RecordedDraw::Text {
            text: text.to_string(),
            rect,
            size_pt: style.font_size_pt,
        });
        Ok(())
    }

    fn draw_image(&mut self, image: &Path, rect: Rect) -> Result<(), Self::Error> {
        self.open_page()?.push(RecordedDraw::Image {
            path: image.to_path_buf(),
            rect,
        });
        Ok(())
    }

    fn finish(self) -> Result<(), Self::Error> {
        let mut guard = self.sink.lock().expect("lock poisoned");
        guard.push(RecordedJob {
            options: self.options,
            pages: self.pages,
            aborted: false,
            abort_reason: None,
        });
        Ok(())
    }

    fn abort(self, reason: &str) {
        let mut guard = self.sink.lock().expect("lock poisoned");
        guard.push(RecordedJob {
            options: self.options,
            pages: Vec::new(),
            aborted: true,
            abort_reason: Some(reason.to_string()),
        });
    }
}
