use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use printbot_printing::{DispatchPath, DispatchReport, FileKind, FinalizedJob, JobContent, Orientation, PrintError};
use thiserror::Error;

use crate::registry::SessionRegistry;
use crate::session::UserId;
use crate::wizard::{Choice, ConfigurationWizard, Prompt, WizardOutcome};

pub const WELCOME_MESSAGE: &str =
    "Welcome! Send me a text, image, Word file (.docx), or PDF, and I'll print it.";
pub const UNAUTHORIZED_MESSAGE: &str = "Sorry, you are not authorized to use this bot.";
pub const CANCELLED_MESSAGE: &str = "Printing canceled.";
pub const UNSUPPORTED_MESSAGE: &str = "Unsupported file format.";

/// Kind of content a user sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Text,
    Document,
    Photo,
}

/// Inbound content event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub user_id: UserId,
    pub kind: SubmissionKind,
    /// Message body for text, a transport file reference otherwise.
    pub payload: String,
    /// Original file name of a document.
    pub file_name: Option<String>,
}

impl Submission {
    pub fn text(user_id: UserId, body: impl Into<String>) -> Self {
        Self {
            user_id,
            kind: SubmissionKind::Text,
            payload: body.into(),
            file_name: None,
        }
    }

    pub fn document(user_id: UserId, reference: impl Into<String>, file_name: Option<String>) -> Self {
        Self {
            user_id,
            kind: SubmissionKind::Document,
            payload: reference.into(),
            file_name,
        }
    }

    pub fn photo(user_id: UserId, reference: impl Into<String>) -> Self {
        Self {
            user_id,
            kind: SubmissionKind::Photo,
            payload: reference.into(),
            file_name: None,
        }
    }
}

/// Which question a button answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    FontSize,
    Confirmation,
    Orientation,
}

/// Inbound button press with its raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserChoice {
    pub user_id: UserId,
    pub kind: ChoiceKind,
    pub value: String,
}

impl UserChoice {
    pub fn new(user_id: UserId, kind: ChoiceKind, value: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            value: value.into(),
        }
    }

    /// Parses the raw value; `None` for values no prompt ever offers.
    pub fn parse(&self) -> Option<Choice> {
        let value = self.value.trim();
        match self.kind {
            ChoiceKind::FontSize => value.parse().ok().map(Choice::FontSize),
            ChoiceKind::Confirmation => match value {
                "yes" => Some(Choice::Confirmation(true)),
                "no" => Some(Choice::Confirmation(false)),
                _ => None,
            },
            ChoiceKind::Orientation => value.parse::<Orientation>().ok().map(Choice::Orientation),
        }
    }
}

/// Outbound side of the chat transport.
pub trait Transport: Send + Sync {
    fn prompt(&self, user_id: UserId, prompt: &Prompt);
    fn notify(&self, user_id: UserId, message: &str);
}

/// Failure while fetching a submitted file.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("file reference '{0}' does not exist")]
    NotFound(String),
    #[error("download failed: {0}")]
    Io(#[from] io::Error),
}

/// Fetches a transport file reference into a local path.
pub trait Downloader: Send + Sync {
    fn download(&self, reference: &str, destination: &Path) -> Result<(), DownloadError>;
}

/// Treats references as local paths and copies them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileDownloader;

impl Downloader for LocalFileDownloader {
    fn download(&self, reference: &str, destination: &Path) -> Result<(), DownloadError> {
        let source = Path::new(reference);
        if !source.is_file() {
            return Err(DownloadError::NotFound(reference.to_string()));
        }
        fs::copy(source, destination)?;
        Ok(())
    }
}

/// Keeps ASCII letters, digits, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    const MAX_LEN: usize = 64;
    let base = Path::new(name)
        .file_name()
        .and_then(|base| base.to_str())
        .unwrap_or(name);
    let mut cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.len() > MAX_LEN {
        // Keep the extension, it decides how the file is printed.
        let extension = Path::new(&cleaned)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let keep = MAX_LEN.saturating_sub(extension.len());
        cleaned = format!("{}{extension}", &cleaned[..keep]);
    }
    if cleaned.trim_matches(['.', '_']).is_empty() {
        return "file".to_string();
    }
    cleaned
}

/// Stored name of a photo: `image` plus the source's image extension, or
/// `image.jpg` when the reference carries none.
pub fn photo_file_name(reference: &str) -> String {
    let extension = Path::new(reference)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some(ext @ ("jpg" | "jpeg" | "png")) => format!("image.{ext}"),
        _ => "image.jpg".to_string(),
    }
}

/// Message shown after a successful dispatch.
pub fn completion_message(job: &FinalizedJob, report: &DispatchReport) -> String {
    let orientation = job.orientation.label();
    match report.path {
        DispatchPath::Text => format!(
            "Text printed successfully with font size {} pt and orientation {orientation}!",
            job.font_size.unwrap_or(printbot_printing::DEFAULT_FONT_SIZE)
        ),
        DispatchPath::Image => {
            format!("Image printed successfully with orientation {orientation}!")
        }
        DispatchPath::NativeDocument if report.orientation_applied => format!(
            "Word document printed successfully with original formatting and orientation {orientation}!"
        ),
        DispatchPath::NativeDocument => {
            "Word document printed successfully with original formatting!".to_string()
        }
        DispatchPath::RenderedPages => {
            format!("PDF printed successfully with orientation {orientation}!")
        }
    }
}

/// Entry point for transport events: creates sessions from submissions and
/// feeds button presses to the wizard.
/// 傳輸層事件的進入點。
pub struct SubmissionRouter {
    wizard: ConfigurationWizard,
    transport: Arc<dyn Transport>,
    downloader: Arc<dyn Downloader>,
    temp_dir: PathBuf,
    sequence: AtomicU64,
}

impl SubmissionRouter {
    pub fn new(
        wizard: ConfigurationWizard,
        transport: Arc<dyn Transport>,
        downloader: Arc<dyn Downloader>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            wizard,
            transport,
            downloader,
            temp_dir: temp_dir.into(),
            sequence: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.wizard.registry()
    }

    pub fn wizard(&self) -> &ConfigurationWizard {
        &self.wizard
    }

    pub fn handle_start(&self, user_id: UserId) {
        info!("Received /start from user {user_id}");
        self.transport.notify(user_id, WELCOME_MESSAGE);
    }

    pub fn handle_submission(&self, submission: Submission) {
        let user_id = submission.user_id;
        match submission.kind {
            SubmissionKind::Text => {
                debug!("Text from user {user_id}: {} byte(s)", submission.payload.len());
                let prompt = self.wizard.start(user_id, JobContent::text(submission.payload));
                self.transport.prompt(user_id, &prompt);
            }
            SubmissionKind::Document => {
                let name = submission
                    .file_name
                    .clone()
                    .unwrap_or_else(|| file_name_of(&submission.payload));
                self.accept_file(user_id, &submission.payload, &name, &format!("Received {name}."));
            }
            SubmissionKind::Photo => {
                let name = photo_file_name(&submission.payload);
                self.accept_file(user_id, &submission.payload, &name, "Received image.");
            }
        }
    }

    pub fn handle_choice(&self, choice: UserChoice) {
        let user_id = choice.user_id;
        let Some(parsed) = choice.parse() else {
            debug!("Ignoring unparseable {:?} value '{}' from user {user_id}", choice.kind, choice.value);
            return;
        };

        match self.wizard.handle(user_id, parsed) {
            WizardOutcome::Ignored => {}
            WizardOutcome::Prompt(prompt) => self.transport.prompt(user_id, &prompt),
            WizardOutcome::Cancelled => self.transport.notify(user_id, CANCELLED_MESSAGE),
            WizardOutcome::Printed { job, report } => {
                self.transport
                    .notify(user_id, &completion_message(&job, &report));
            }
            WizardOutcome::Failed { error, .. } => {
                self.transport.notify(user_id, error.user_message());
            }
        }
    }

    /// Cancels idle sessions and tells their users.
    pub fn expire_idle(&self, max_idle: std::time::Duration) -> Vec<UserId> {
        let expired = self.registry().expire_idle(max_idle);
        for user_id in &expired {
            self.transport.notify(*user_id, CANCELLED_MESSAGE);
        }
        expired
    }

    fn accept_file(&self, user_id: UserId, reference: &str, name: &str, received: &str) {
        let Some(kind) = FileKind::from_path(Path::new(name)) else {
            warn!("User {user_id} sent unsupported file '{name}'");
            self.transport.notify(user_id, UNSUPPORTED_MESSAGE);
            return;
        };

        let path = match self.download(user_id, reference, name) {
            Ok(path) => path,
            Err(err) => {
                let err = PrintError::DownloadFailed(err.to_string());
                error!("Download for user {user_id} failed: {err}");
                self.transport.notify(user_id, err.user_message());
                return;
            }
        };
        info!("Stored {name} from user {user_id} at {}", path.display());

        let prompt = self
            .wizard
            .start(user_id, JobContent::file(path, kind))
            .with_message(format!("{received} Confirm printing?"));
        self.transport.prompt(user_id, &prompt);
    }

    fn download(&self, user_id: UserId, reference: &str, name: &str) -> Result<PathBuf, DownloadError> {
        fs::create_dir_all(&self.temp_dir)?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self
            .temp_dir
            .join(format!("{user_id}-{sequence}-{}", sanitize_file_name(name)));
        if let Err(err) = self.downloader.download(reference, &path) {
            if path.exists() {
                self.registry().reaper().schedule(&path);
            }
            return Err(err);
        }
        Ok(path)
    }
}

fn file_name_of(reference: &str) -> String {
    Path::new(reference)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| reference.to_string())
}
