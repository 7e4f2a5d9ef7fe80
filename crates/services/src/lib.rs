#![forbid(unsafe_code)]

pub mod app_services;
pub mod autosave;
pub mod config;
pub mod error;
pub mod gate;
pub mod help;
pub mod help_queue;
pub mod notify;
pub mod submission;

pub use classroom_core::Clock;

pub use app_services::AppServices;
pub use autosave::{AutosaveCoordinator, AutosaveSession, SaveState};
pub use config::EngineConfig;
pub use error::{
    AppServicesError, AutosaveError, HelpError, HelpQueueError, SubmissionServiceError,
};
pub use gate::WriteGates;
pub use help::{HelpEvent, HelpService};
pub use help_queue::{
    HelpQueueRow, HelpQueueService, HelpQueueSnapshot, HelpQueueWatch, HelpRequest,
};
pub use notify::{CollectingNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use submission::{SubmissionService, SubmissionView};
