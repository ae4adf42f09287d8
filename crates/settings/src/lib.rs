//! Bot settings: the JSON schema, its defaults and the file store.

pub mod settings;
pub mod storage;

pub use settings::{
    BotSettings, CommandSettings, PrintingSettings, ReaperSettings, SessionSettings,
    StorageSettings, TransportSettings, SETTINGS_VERSION,
};
pub use storage::{SettingsError, SettingsStore};
