use std::sync::Arc;

use classroom_core::model::Viewer;
use storage::repository::Storage;

use crate::Clock;
use crate::autosave::AutosaveCoordinator;
use crate::config::EngineConfig;
use crate::error::{AppServicesError, HelpQueueError};
use crate::gate::WriteGates;
use crate::help::HelpService;
use crate::help_queue::{HelpQueueService, HelpQueueWatch};
use crate::notify::{Notifier, TracingNotifier};
use crate::submission::SubmissionService;

/// Assembles the engine's services over one storage backend.
///
/// All writers share one set of [`WriteGates`], so autosave and submit never
/// overlap on the same submission.
#[derive(Clone)]
pub struct AppServices {
    config: EngineConfig,
    storage: Storage,
    autosave: Arc<AutosaveCoordinator>,
    help: Arc<HelpService>,
    help_queue: Arc<HelpQueueService>,
    submissions: Arc<SubmissionService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if connecting or migrating fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: EngineConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(
            storage,
            clock,
            config,
            Arc::new(TracingNotifier),
        ))
    }

    #[must_use]
    pub fn from_storage(
        storage: Storage,
        clock: Clock,
        config: EngineConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let gates = Arc::new(WriteGates::new());

        let autosave = Arc::new(
            AutosaveCoordinator::new(
                clock.clone(),
                config.autosave_debounce,
                Arc::clone(&storage.tasks),
                Arc::clone(&storage.submissions),
            )
            .with_notifier(Arc::clone(&notifier))
            .with_gates(Arc::clone(&gates)),
        );
        let help = Arc::new(
            HelpService::new(
                clock.clone(),
                config.max_help_message_len,
                Arc::clone(&storage.tasks),
                Arc::clone(&storage.submissions),
            )
            .with_notifier(Arc::clone(&notifier)),
        );
        let help_queue = Arc::new(
            HelpQueueService::new(clock.clone(), Arc::clone(&storage.submissions))
                .with_notifier(notifier),
        );
        let submissions = Arc::new(
            SubmissionService::new(
                clock,
                Arc::clone(&storage.tasks),
                Arc::clone(&storage.submissions),
            )
            .with_gates(gates),
        );

        Self {
            config,
            storage,
            autosave,
            help,
            help_queue,
            submissions,
        }
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn autosave(&self) -> Arc<AutosaveCoordinator> {
        Arc::clone(&self.autosave)
    }

    #[must_use]
    pub fn help(&self) -> Arc<HelpService> {
        Arc::clone(&self.help)
    }

    #[must_use]
    pub fn help_queue(&self) -> Arc<HelpQueueService> {
        Arc::clone(&self.help_queue)
    }

    #[must_use]
    pub fn submissions(&self) -> Arc<SubmissionService> {
        Arc::clone(&self.submissions)
    }

    /// Start the teacher's help-queue poller at the configured interval,
    /// refreshing early on help events.
    ///
    /// # Errors
    ///
    /// Returns `HelpQueueError::Forbidden` for anyone but a teacher.
    pub fn watch_help_queue(
        &self,
        viewer: &Viewer,
    ) -> Result<HelpQueueWatch, HelpQueueError> {
        self.help_queue.watch(
            viewer,
            self.config.help_poll_interval,
            Some(self.help.subscribe()),
        )
    }
}
