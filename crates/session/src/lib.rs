//! Per-user print sessions: the registry that owns them, the configuration
//! wizard that walks a user through font size and orientation, and the router
//! that turns transport events into wizard steps.
//! 每位使用者的列印工作階段與設定流程。

pub mod registry;
pub mod router;
pub mod session;
pub mod wizard;

pub use registry::SessionRegistry;
pub use router::{
    completion_message, photo_file_name, sanitize_file_name, ChoiceKind, DownloadError, Downloader,
    LocalFileDownloader, Submission, SubmissionKind, SubmissionRouter, Transport, UserChoice,
    CANCELLED_MESSAGE, UNAUTHORIZED_MESSAGE, UNSUPPORTED_MESSAGE, WELCOME_MESSAGE,
};
pub use session::{Session, Stage, UserId};
pub use wizard::{
    confirmation_prompt, font_size_prompt, orientation_prompt, Choice, ConfigurationWizard,
    Prompt, PromptOption, WizardOutcome, DEFAULT_FONT_SIZES,
};
