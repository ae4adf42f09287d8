use std::path::Path;
use std::time::{Duration, Instant};

use printbot_printing::{FinalizedJob, JobContent, Orientation};

/// Numeric user id assigned by the chat transport.
pub type UserId = i64;

/// Where a session is in the configuration dialog.
/// 工作階段在設定對話中的階段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    AwaitingFontSize,
    AwaitingConfirmation,
    AwaitingOrientation,
    Dispatching,
    Done,
    Cancelled,
}

impl Stage {
    /// First stage for freshly submitted `content`.
    pub fn initial_for(content: &JobContent) -> Self {
        match content {
            JobContent::Text { .. } => Stage::AwaitingFontSize,
            JobContent::File { .. } => Stage::AwaitingConfirmation,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Cancelled)
    }
}

/// One user's in-flight print request.
/// 單一使用者進行中的列印請求。
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: UserId,
    pub content: JobContent,
    /// Only ever set for text content.
    pub font_size: Option<u32>,
    pub orientation: Option<Orientation>,
    pub stage: Stage,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(user_id: UserId, content: JobContent) -> Self {
        let stage = Stage::initial_for(&content);
        Self {
            user_id,
            content,
            font_size: None,
            orientation: None,
            stage,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Downloaded file owned by this session, if any.
    pub fn artifact(&self) -> Option<&Path> {
        self.content.artifact()
    }

    /// Freezes every choice made so far together with `orientation`.
    pub fn finalize(&self, orientation: Orientation) -> FinalizedJob {
        FinalizedJob {
            user_id: self.user_id,
            content: self.content.clone(),
            font_size: self.font_size,
            orientation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printbot_printing::FileKind;

    #[test]
    fn initial_stage_depends_on_content() {
        let text = Session::new(1, JobContent::text("hi"));
        assert_eq!(text.stage, Stage::AwaitingFontSize);
        assert!(text.artifact().is_none());

        let file = Session::new(1, JobContent::file("/tmp/1-1-a.pdf", FileKind::PaginatedDocument));
        assert_eq!(file.stage, Stage::AwaitingConfirmation);
        assert_eq!(file.artifact(), Some(Path::new("/tmp/1-1-a.pdf")));
    }

    #[test]
    fn finalize_carries_session_choices() {
        let mut session = Session::new(42, JobContent::text("body"));
        session.font_size = Some(14);
        let job = session.finalize(Orientation::Landscape);
        assert_eq!(job.user_id, 42);
        assert_eq!(job.font_size, Some(14));
        assert_eq!(job.orientation, Orientation::Landscape);
        assert_eq!(job.content, JobContent::text("body"));
    }

    #[test]
    fn only_done_and_cancelled_are_terminal() {
        assert!(Stage::Done.is_terminal());
        assert!(Stage::Cancelled.is_terminal());
        assert!(!Stage::Dispatching.is_terminal());
        assert!(!Stage::AwaitingOrientation.is_terminal());
    }
}
