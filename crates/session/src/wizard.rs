use std::sync::Arc;

use log::{debug, error, info};
use printbot_printing::{
    DispatchReport, FinalizedJob, JobContent, JobDispatcher, Orientation, PrintError,
};

use crate::registry::SessionRegistry;
use crate::session::{Session, Stage, UserId};

/// Font sizes offered when nothing else is configured.
pub const DEFAULT_FONT_SIZES: [u32; 10] = [11, 12, 13, 14, 15, 16, 17, 18, 19, 20];

/// A parsed button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    FontSize(u32),
    Confirmation(bool),
    Orientation(Orientation),
}

/// One selectable option in a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOption {
    pub label: String,
    pub value: String,
}

impl PromptOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Question sent to the user, with options laid out in rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub message: String,
    pub options: Vec<Vec<PromptOption>>,
}

impl Prompt {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.options.iter().flatten().map(|option| option.value.as_str())
    }
}

/// Rows of three, with a lone leftover folded into the last row.
pub fn font_size_prompt(sizes: &[u32]) -> Prompt {
    let mut rows: Vec<Vec<PromptOption>> = sizes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .map(|size| PromptOption::new(format!("{size} pt"), size.to_string()))
                .collect()
        })
        .collect();
    if rows.len() > 1 && rows.last().is_some_and(|row| row.len() == 1) {
        if let Some(leftover) = rows.pop() {
            if let Some(last) = rows.last_mut() {
                last.extend(leftover);
            }
        }
    }
    Prompt {
        message: "Please select a font size:".to_string(),
        options: rows,
    }
}

pub fn confirmation_prompt() -> Prompt {
    Prompt {
        message: "Confirm printing?".to_string(),
        options: vec![vec![
            PromptOption::new("Yes", "yes"),
            PromptOption::new("No", "no"),
        ]],
    }
}

pub fn orientation_prompt() -> Prompt {
    Prompt {
        message: "Please select orientation:".to_string(),
        options: vec![[Orientation::Portrait, Orientation::Landscape]
            .into_iter()
            .map(|orientation| PromptOption::new(orientation.label(), orientation.as_str()))
            .collect()],
    }
}

/// What a choice did to the session.
#[derive(Debug)]
pub enum WizardOutcome {
    /// Wrong stage, unknown value or no session.
    Ignored,
    /// Accepted; the user has to answer `Prompt` next.
    Prompt(Prompt),
    Cancelled,
    Printed {
        job: FinalizedJob,
        report: DispatchReport,
    },
    Failed {
        job: FinalizedJob,
        error: PrintError,
    },
}

/// Drives sessions through
/// `AwaitingFontSize | AwaitingConfirmation -> AwaitingOrientation -> Dispatching -> Done`.
/// 依使用者的選擇推進工作階段的狀態機。
pub struct ConfigurationWizard {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<dyn JobDispatcher>,
    font_sizes: Vec<u32>,
}

impl ConfigurationWizard {
    pub fn new(registry: Arc<SessionRegistry>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            font_sizes: DEFAULT_FONT_SIZES.to_vec(),
        }
    }

    pub fn with_font_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.font_sizes = sizes;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn font_sizes(&self) -> &[u32] {
        &self.font_sizes
    }

    /// Opens a session for `content` and returns its first question.
    pub fn start(&self, user_id: UserId, content: JobContent) -> Prompt {
        let session = self.registry.put(user_id, content);
        info!("User {user_id} started a session in {:?}", session.stage);
        self.prompt_for(session.stage)
            .unwrap_or_else(confirmation_prompt)
    }

    /// Question matching a waiting stage.
    pub fn prompt_for(&self, stage: Stage) -> Option<Prompt> {
        match stage {
            Stage::AwaitingFontSize => Some(font_size_prompt(&self.font_sizes)),
            Stage::AwaitingConfirmation => Some(confirmation_prompt()),
            Stage::AwaitingOrientation => Some(orientation_prompt()),
            Stage::Dispatching | Stage::Done | Stage::Cancelled => None,
        }
    }

    /// Applies `choice` to the user's session. Choices that do not match the
    /// current stage are ignored.
    pub fn handle(&self, user_id: UserId, choice: Choice) -> WizardOutcome {
        self.registry
            .advance(user_id, |session| self.apply(session, choice))
            .unwrap_or_else(|| {
                debug!("No active session for user {user_id}; ignoring {choice:?}");
                WizardOutcome::Ignored
            })
    }

    fn apply(&self, session: &mut Session, choice: Choice) -> WizardOutcome {
        match (session.stage, choice) {
            (Stage::AwaitingFontSize, Choice::FontSize(size)) => {
                if !self.font_sizes.contains(&size) {
                    debug!("User {} picked unoffered size {size}", session.user_id);
                    return WizardOutcome::Ignored;
                }
                session.font_size = Some(size);
                session.orientation = None;
                session.stage = Stage::AwaitingOrientation;
                WizardOutcome::Prompt(orientation_prompt())
            }
            (Stage::AwaitingConfirmation, Choice::Confirmation(true)) => {
                session.orientation = None;
                session.stage = Stage::AwaitingOrientation;
                WizardOutcome::Prompt(orientation_prompt())
            }
            (Stage::AwaitingConfirmation, Choice::Confirmation(false)) => {
                info!("User {} cancelled printing", session.user_id);
                session.stage = Stage::Cancelled;
                WizardOutcome::Cancelled
            }
            (Stage::AwaitingOrientation, Choice::Orientation(orientation)) => {
                session.orientation = Some(orientation);
                session.stage = Stage::Dispatching;
                let job = session.finalize(orientation);
                let result = self.dispatcher.dispatch(&job);
                session.stage = Stage::Done;
                match result {
                    Ok(report) => WizardOutcome::Printed { job, report },
                    Err(error) => {
                        error!("Printing for user {} failed: {error}", session.user_id);
                        WizardOutcome::Failed { job, error }
                    }
                }
            }
            (stage, choice) => {
                debug!(
                    "Ignoring {choice:?} from user {} in stage {stage:?}",
                    session.user_id
                );
                WizardOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_font_sizes_use_three_rows() {
        let prompt = font_size_prompt(&DEFAULT_FONT_SIZES);
        let rows: Vec<Vec<&str>> = prompt
            .options
            .iter()
            .map(|row| row.iter().map(|option| option.value.as_str()).collect())
            .collect();
        assert_eq!(
            rows,
            vec![
                vec!["11", "12", "13"],
                vec!["14", "15", "16"],
                vec!["17", "18", "19", "20"],
            ]
        );
        assert_eq!(prompt.options[0][0].label, "11 pt");
    }

    #[test]
    fn single_size_is_a_single_row() {
        let prompt = font_size_prompt(&[12]);
        assert_eq!(prompt.options.len(), 1);
        assert_eq!(prompt.values().collect::<Vec<_>>(), vec!["12"]);
    }

    #[test]
    fn fixed_prompts_offer_expected_values() {
        assert_eq!(
            confirmation_prompt().values().collect::<Vec<_>>(),
            vec!["yes", "no"]
        );
        let orientation = orientation_prompt();
        assert_eq!(orientation.message, "Please select orientation:");
        assert_eq!(
            orientation.values().collect::<Vec<_>>(),
            vec!["portrait", "landscape"]
        );
    }
}
