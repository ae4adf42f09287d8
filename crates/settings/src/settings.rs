use std::path::PathBuf;
use std::time::Duration;

use printbot_printing::{CommandTemplate, DispatchOptions, Margin, PaperId};
use printbot_reaper::RetryPolicy;
use serde::{Deserialize, Serialize};

pub const SETTINGS_VERSION: u32 = 1;

const MAX_MARGIN_PT: f32 = 144.0;
const FONT_SIZE_RANGE: std::ops::RangeInclusive<u32> = 6..=72;
const RENDER_SCALE_RANGE: std::ops::RangeInclusive<f32> = 0.5..=8.0;
const MAX_ATTEMPTS_LIMIT: u32 = 50;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Everything the bot reads at startup.
/// 機器人啟動時讀取的全部設定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub printing: PrintingSettings,
    #[serde(default)]
    pub reaper: ReaperSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub commands: CommandSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            transport: TransportSettings::default(),
            storage: StorageSettings::default(),
            printing: PrintingSettings::default(),
            reaper: ReaperSettings::default(),
            session: SessionSettings::default(),
            commands: CommandSettings::default(),
        }
    }
}

impl BotSettings {
    /// Pulls out-of-range values back to their defaults.
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = SETTINGS_VERSION;
        }
        self.transport.sanitize();
        self.storage.sanitize();
        self.printing.sanitize();
        self.reaper.sanitize();
        self.session.sanitize();
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            paper: self.printing.paper.size(),
            margins: Margin::uniform(self.printing.margin_pt),
            render_scale: self.printing.render_scale,
            job_name: self.printing.job_name.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reaper.max_attempts,
            Duration::from_millis(self.reaper.backoff_ms),
        )
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.session.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Users allowed to talk to the bot. Empty means nobody.
    #[serde(default)]
    pub authorized_users: Vec<i64>,
}

impl TransportSettings {
    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized_users.contains(&user_id)
    }

    fn sanitize(&mut self) {
        self.authorized_users.sort_unstable();
        self.authorized_users.dedup();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Downloads and rendered pages land here.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Output directory of the PDF spool device.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("printbot")
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            spool_dir: default_spool_dir(),
        }
    }
}

impl StorageSettings {
    fn sanitize(&mut self) {
        if self.temp_dir.as_os_str().is_empty() {
            self.temp_dir = default_temp_dir();
        }
        if self.spool_dir.as_os_str().is_empty() {
            self.spool_dir = default_spool_dir();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintingSettings {
    #[serde(default = "default_paper")]
    pub paper: PaperId,
    /// Uniform page margin in points.
    #[serde(default = "default_margin_pt")]
    pub margin_pt: f32,
    /// Sizes offered for text jobs.
    #[serde(default = "default_font_sizes")]
    pub font_sizes: Vec<u32>,
    #[serde(default = "default_render_scale")]
    pub render_scale: f32,
    #[serde(default = "default_job_name")]
    pub job_name: String,
}

fn default_paper() -> PaperId {
    PaperId::A4
}

fn default_margin_pt() -> f32 {
    36.0
}

fn default_font_sizes() -> Vec<u32> {
    (11..=20).collect()
}

fn default_render_scale() -> f32 {
    2.0
}

fn default_job_name() -> String {
    "Print Job".to_string()
}

impl Default for PrintingSettings {
    fn default() -> Self {
        Self {
            paper: default_paper(),
            margin_pt: default_margin_pt(),
            font_sizes: default_font_sizes(),
            render_scale: default_render_scale(),
            job_name: default_job_name(),
        }
    }
}

impl PrintingSettings {
    fn sanitize(&mut self) {
        if !self.margin_pt.is_finite() || !(0.0..=MAX_MARGIN_PT).contains(&self.margin_pt) {
            self.margin_pt = default_margin_pt();
        }

        self.font_sizes.retain(|size| FONT_SIZE_RANGE.contains(size));
        self.font_sizes.sort_unstable();
        self.font_sizes.dedup();
        if self.font_sizes.is_empty() {
            self.font_sizes = default_font_sizes();
        }

        if !RENDER_SCALE_RANGE.contains(&self.render_scale) {
            self.render_scale = default_render_scale();
        }

        if self.job_name.trim().is_empty() {
            self.job_name = default_job_name();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    printbot_reaper::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    printbot_reaper::DEFAULT_BACKOFF.as_millis() as u64
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl ReaperSettings {
    fn sanitize(&mut self) {
        if self.max_attempts == 0 {
            self.max_attempts = default_max_attempts();
        }
        self.max_attempts = self.max_attempts.min(MAX_ATTEMPTS_LIMIT);
        self.backoff_ms = self.backoff_ms.min(MAX_BACKOFF_MS);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Sessions idle longer than this are cancelled. Unset keeps them forever.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl SessionSettings {
    fn sanitize(&mut self) {
        if self.idle_timeout_secs == Some(0) {
            self.idle_timeout_secs = None;
        }
    }
}

/// External commands; unset entries fall back to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Rasterizes paginated documents (`{input}`, `{output}`, `{dpi}`, `{scale}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_renderer: Option<CommandTemplate>,
    /// Prints word-processor documents (`{input}`, `{orientation}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_printer: Option<CommandTemplate>,
    /// Hands each spooled PDF to the system queue (`{input}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spool_submit: Option<CommandTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatcher_defaults() {
        let settings = BotSettings::default();
        assert_eq!(settings.dispatch_options(), DispatchOptions::default());
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.idle_timeout(), None);
        assert_eq!(settings.printing.font_sizes, (11..=20).collect::<Vec<_>>());
    }

    #[test]
    fn sanitize_restores_out_of_range_values() {
        let mut settings = BotSettings::default();
        settings.version = 0;
        settings.printing.margin_pt = -4.0;
        settings.printing.font_sizes = vec![14, 2, 12, 14, 400];
        settings.printing.render_scale = f32::NAN;
        settings.printing.job_name = "  ".into();
        settings.reaper.max_attempts = 0;
        settings.reaper.backoff_ms = 3_600_000;
        settings.session.idle_timeout_secs = Some(0);
        settings.transport.authorized_users = vec![9, 3, 9];
        settings.sanitize();

        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.printing.margin_pt, 36.0);
        assert_eq!(settings.printing.font_sizes, vec![12, 14]);
        assert_eq!(settings.printing.render_scale, 2.0);
        assert_eq!(settings.printing.job_name, "Print Job");
        assert_eq!(settings.reaper.max_attempts, 10);
        assert_eq!(settings.reaper.backoff_ms, 60_000);
        assert_eq!(settings.session.idle_timeout_secs, None);
        assert_eq!(settings.transport.authorized_users, vec![3, 9]);
    }

    #[test]
    fn empty_font_sizes_fall_back() {
        let mut printing = PrintingSettings {
            font_sizes: vec![1, 99],
            ..PrintingSettings::default()
        };
        printing.sanitize();
        assert_eq!(printing.font_sizes, default_font_sizes());
    }

    #[test]
    fn allow_list_is_exact() {
        let mut transport = TransportSettings {
            authorized_users: vec![42, 7],
        };
        transport.sanitize();
        assert!(transport.is_authorized(7));
        assert!(transport.is_authorized(42));
        assert!(!transport.is_authorized(8));
        assert!(!TransportSettings::default().is_authorized(7));
    }
}
