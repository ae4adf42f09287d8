//! JSON-lines chat transport over stdin/stdout.
//!
//! Every inbound line is one event; every outbound line is a prompt or a
//! notice addressed to one user.
//! 以標準輸入/輸出逐行 JSON 模擬聊天傳輸層。

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use printbot_session::{
    ChoiceKind, Prompt, Submission, SubmissionRouter, Transport, UserChoice, UserId,
    UNAUTHORIZED_MESSAGE,
};
use printbot_settings::TransportSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Start {
        user_id: UserId,
    },
    Text {
        user_id: UserId,
        text: String,
    },
    Document {
        user_id: UserId,
        path: String,
        #[serde(default)]
        file_name: Option<String>,
    },
    Photo {
        user_id: UserId,
        path: String,
    },
    Choice {
        user_id: UserId,
        kind: ChoiceName,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceName {
    FontSize,
    Confirmation,
    Orientation,
}

impl From<ChoiceName> for ChoiceKind {
    fn from(name: ChoiceName) -> Self {
        match name {
            ChoiceName::FontSize => ChoiceKind::FontSize,
            ChoiceName::Confirmation => ChoiceKind::Confirmation,
            ChoiceName::Orientation => ChoiceKind::Orientation,
        }
    }
}

impl Inbound {
    pub fn user_id(&self) -> UserId {
        match self {
            Inbound::Start { user_id }
            | Inbound::Text { user_id, .. }
            | Inbound::Document { user_id, .. }
            | Inbound::Photo { user_id, .. }
            | Inbound::Choice { user_id, .. } => *user_id,
        }
    }

    fn deliver(self, router: &SubmissionRouter) {
        match self {
            Inbound::Start { user_id } => router.handle_start(user_id),
            Inbound::Text { user_id, text } => {
                router.handle_submission(Submission::text(user_id, text))
            }
            Inbound::Document {
                user_id,
                path,
                file_name,
            } => router.handle_submission(Submission::document(user_id, path, file_name)),
            Inbound::Photo { user_id, path } => {
                router.handle_submission(Submission::photo(user_id, path))
            }
            Inbound::Choice {
                user_id,
                kind,
                value,
            } => router.handle_choice(UserChoice::new(user_id, kind.into(), value)),
        }
    }
}

#[derive(Debug, Serialize)]
struct OptionLine<'a> {
    label: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Prompt {
        user_id: UserId,
        message: &'a str,
        options: Vec<Vec<OptionLine<'a>>>,
    },
    Notify {
        user_id: UserId,
        message: &'a str,
    },
}

/// Writes one JSON object per line to the wrapped writer.
pub struct ConsoleTransport<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> ConsoleTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, line: &Outbound<'_>) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = write_line(&mut *out, line) {
            warn!("Failed to write transport line: {err}");
        }
    }
}

fn write_line(out: &mut impl Write, line: &Outbound<'_>) -> io::Result<()> {
    serde_json::to_writer(&mut *out, line)?;
    out.write_all(b"\n")?;
    out.flush()
}

impl<W: Write + Send> Transport for ConsoleTransport<W> {
    fn prompt(&self, user_id: UserId, prompt: &Prompt) {
        let options = prompt
            .options
            .iter()
            .map(|row| {
                row.iter()
                    .map(|option| OptionLine {
                        label: &option.label,
                        value: &option.value,
                    })
                    .collect()
            })
            .collect();
        self.emit(&Outbound::Prompt {
            user_id,
            message: &prompt.message,
            options,
        });
    }

    fn notify(&self, user_id: UserId, message: &str) {
        self.emit(&Outbound::Notify { user_id, message });
    }
}

/// Runs one worker thread per user so a user's events are handled in order
/// while different users proceed in parallel.
pub struct EventPump {
    router: Arc<SubmissionRouter>,
    transport: Arc<dyn Transport>,
    access: TransportSettings,
    idle_timeout: Option<Duration>,
    workers: HashMap<UserId, (Sender<Inbound>, JoinHandle<()>)>,
}

impl EventPump {
    pub fn new(
        router: Arc<SubmissionRouter>,
        transport: Arc<dyn Transport>,
        access: TransportSettings,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            router,
            transport,
            access,
            idle_timeout,
            workers: HashMap::new(),
        }
    }

    /// Reads events until `input` is exhausted, then waits for every worker.
    pub fn run(mut self, input: impl BufRead) -> Result<()> {
        for (index, line) in input.lines().enumerate() {
            let line = line.context("failed to read transport input")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Inbound>(&line) {
                Ok(event) => self.accept(event)?,
                Err(err) => warn!("Skipping malformed event on line {}: {err}", index + 1),
            }
        }
        self.shutdown();
        Ok(())
    }

    fn accept(&mut self, event: Inbound) -> Result<()> {
        if let Some(max_idle) = self.idle_timeout {
            self.router.expire_idle(max_idle);
        }

        let user_id = event.user_id();
        if !self.access.is_authorized(user_id) {
            info!("Rejected event from unauthorized user {user_id}");
            self.transport.notify(user_id, UNAUTHORIZED_MESSAGE);
            return Ok(());
        }

        if !self.workers.contains_key(&user_id) {
            let worker = self.spawn_worker(user_id)?;
            self.workers.insert(user_id, worker);
        }
        if let Some((queue, _)) = self.workers.get(&user_id) {
            if queue.send(event).is_err() {
                warn!("Worker for user {user_id} is gone; dropping event");
            }
        }
        Ok(())
    }

    fn spawn_worker(&self, user_id: UserId) -> Result<(Sender<Inbound>, JoinHandle<()>)> {
        let (queue, events) = mpsc::channel::<Inbound>();
        let router = Arc::clone(&self.router);
        let handle = thread::Builder::new()
            .name(format!("printbot-user-{user_id}"))
            .spawn(move || {
                for event in events {
                    event.deliver(&router);
                }
            })
            .with_context(|| format!("failed to start worker for user {user_id}"))?;
        debug!("Started worker for user {user_id}");
        Ok((queue, handle))
    }

    fn shutdown(self) {
        for (user_id, (queue, handle)) in self.workers {
            drop(queue);
            if handle.join().is_err() {
                warn!("Worker for user {user_id} panicked");
            }
        }
        self.router.registry().reaper().flush();
    }
}
