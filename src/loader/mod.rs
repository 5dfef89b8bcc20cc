//! Loader lifecycle.
//!
//! The controller drives one emulation module through a fixed sequence:
//!
//! ```text
//! Idle -> DownloadingScript -> InitializingModule -> Ready
//!      -> MountingArchive -> Launching -> Running
//! ```
//!
//! Any unrecoverable error moves it to `Failed`. There are no restarts.

pub mod status;

use crate::config::{ConfigError, LoaderConfig};
use crate::fetch::{resolve_url, Fetch, FetchError, Progress};
use crate::module::{Arg, CallError, EmulationModule, ModuleError, ValueType};
use crate::mount::{self, MountError};
use status::{StatusMessage, StatusSink};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Default name of the module's program entry point.
pub const ENTRY_EXPORT: &str = "dosbox_main";

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    DownloadingScript,
    InitializingModule,
    /// Module is initialized and waiting for a program to run.
    Ready,
    MountingArchive,
    Launching,
    Running,
    Failed,
}

impl LoaderState {
    /// The only state this one may advance to, other than `Failed`.
    pub fn next(self) -> Option<LoaderState> {
        use LoaderState::*;
        match self {
            Idle => Some(DownloadingScript),
            DownloadingScript => Some(InitializingModule),
            InitializingModule => Some(Ready),
            Ready => Some(MountingArchive),
            MountingArchive => Some(Launching),
            Launching => Some(Running),
            Running | Failed => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoaderState::Running | LoaderState::Failed)
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Idle => "idle",
            LoaderState::DownloadingScript => "downloading script",
            LoaderState::InitializingModule => "initializing module",
            LoaderState::Ready => "ready",
            LoaderState::MountingArchive => "mounting archive",
            LoaderState::Launching => "launching",
            LoaderState::Running => "running",
            LoaderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the loader.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(FetchError),

    #[error("{0}")]
    ModuleInit(#[from] ModuleError),

    #[error("mount failed: {0}")]
    Mount(MountError),

    #[error("program execution failed: {0}")]
    Execution(CallError),

    #[error("cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: LoaderState },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<FetchError> for LoaderError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => LoaderError::Cancelled,
            other => LoaderError::Transport(other),
        }
    }
}

impl From<MountError> for LoaderError {
    fn from(err: MountError) -> Self {
        match err {
            MountError::Fetch(fetch) => fetch.into(),
            MountError::Cancelled => LoaderError::Cancelled,
            other => LoaderError::Mount(other),
        }
    }
}

/// Called once the driver is loaded, with the outcome.
pub type OnLoad = Box<dyn FnMut(Result<(), &LoaderError>)>;

/// Called with the program name just before it starts.
pub type OnRun = Box<dyn FnMut(&str)>;

/// Caller hooks.
#[derive(Default)]
pub struct LoaderOptions {
    pub onload: Option<OnLoad>,
    pub onrun: Option<OnRun>,
}

impl LoaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hook invoked after module initialization.
    pub fn on_load(mut self, hook: impl FnMut(Result<(), &LoaderError>) + 'static) -> Self {
        self.onload = Some(Box::new(hook));
        self
    }

    /// Set the hook invoked before program execution.
    pub fn on_run(mut self, hook: impl FnMut(&str) + 'static) -> Self {
        self.onrun = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for LoaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("onload", &self.onload.is_some())
            .field("onrun", &self.onrun.is_some())
            .finish()
    }
}

/// Owns the loader lifecycle for one module.
pub struct Controller<M, F, S> {
    module: M,
    fetcher: F,
    status: S,
    config: LoaderConfig,
    base_url: Option<Url>,
    options: LoaderOptions,
    state: LoaderState,
    cancel: CancellationToken,
}

impl<M, F, S> Controller<M, F, S>
where
    M: EmulationModule,
    F: Fetch,
    S: StatusSink,
{
    /// Create a controller in the `Idle` state.
    pub fn new(
        module: M,
        fetcher: F,
        status: S,
        config: LoaderConfig,
        options: LoaderOptions,
    ) -> Result<Self, LoaderError> {
        config.validate()?;
        let base_url = config.base_url()?;

        Ok(Self {
            module,
            fetcher,
            status,
            config,
            base_url,
            options,
            state: LoaderState::Idle,
            cancel: CancellationToken::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// The driven module.
    pub fn module(&self) -> &M {
        &self.module
    }

    /// The status sink.
    pub fn status(&self) -> &S {
        &self.status
    }

    /// Mutable access to the status sink.
    pub fn status_mut(&mut self) -> &mut S {
        &mut self.status
    }

    /// Active configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Token that aborts the current and any later operation when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the current operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Download the driver script and initialize the module.
    ///
    /// The `onload` hook receives the outcome either way, once. A call in
    /// the wrong state is rejected without reaching the hook.
    pub async fn start(&mut self) -> Result<(), LoaderError> {
        let outcome = self.load_driver().await;
        if let Err(err) = &outcome {
            self.fail(err);
            if matches!(err, LoaderError::InvalidState { .. }) {
                return outcome;
            }
        }

        if let Some(onload) = self.options.onload.as_mut() {
            onload(outcome.as_ref().map(|_| ()));
        }
        outcome
    }

    /// Mount the archive at `archive_url` and start `program` from it.
    pub async fn run(&mut self, archive_url: &str, program: &str) -> Result<(), LoaderError> {
        let outcome = self.mount_and_launch(archive_url, program).await;
        if let Err(err) = &outcome {
            self.fail(err);
        }
        outcome
    }

    async fn load_driver(&mut self) -> Result<(), LoaderError> {
        self.expect_state(LoaderState::Idle, "start the loader")?;
        self.status.show_loader();

        let url = resolve_url(self.base_url.as_ref(), &self.config.script_url)?;
        self.advance(LoaderState::DownloadingScript);

        let label = format!("Loading {}", self.config.driver_name);
        self.module.set_status(&label);
        self.status.update_message(&StatusMessage::new(label.as_str()));

        let status = &mut self.status;
        let script = self
            .fetcher
            .fetch(&url, &self.cancel, &mut |progress: Progress| {
                status.update_message(&StatusMessage::with_progress(label.as_str(), progress));
            })
            .await?;

        self.advance(LoaderState::InitializingModule);
        self.status.update_message(&StatusMessage::new("Initializing dosbox"));

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoaderError::Cancelled),
            ready = self.module.initialize(&script) => ready?,
        }

        self.advance(LoaderState::Ready);
        Ok(())
    }

    async fn mount_and_launch(&mut self, archive_url: &str, program: &str) -> Result<(), LoaderError> {
        self.expect_state(LoaderState::Ready, "run a program")?;

        let url = resolve_url(self.base_url.as_ref(), archive_url)?;
        self.advance(LoaderState::MountingArchive);

        let label = format!("Mount {program}");
        self.status
            .update_message(&StatusMessage::with_progress(label.as_str(), Progress::default()));

        let status = &mut self.status;
        let mounted = mount::fetch_and_mount(
            &self.fetcher,
            &mut self.module,
            &url,
            &self.config.extract_export,
            &self.cancel,
            &mut |progress: Progress| {
                status.update_message(&StatusMessage::with_progress(label.as_str(), progress));
            },
        )
        .await?;
        debug!(bytes = mounted, "archive mounted");

        self.advance(LoaderState::Launching);
        self.status
            .update_message(&StatusMessage::new(format!("Launching {program}")));

        if let Some(onrun) = self.options.onrun.as_mut() {
            onrun(program);
        }

        match self
            .module
            .call(&self.config.entry_export, ValueType::Number, &[Arg::Str(program)])
        {
            Ok(value) => debug!(?value, "entry point returned"),
            Err(CallError::Unwind) => debug!("entry point unwound, program continues in the main loop"),
            Err(err) => return Err(LoaderError::Execution(err)),
        }

        self.advance(LoaderState::Running);
        self.status.hide_loader();
        Ok(())
    }

    fn expect_state(&self, expected: LoaderState, operation: &'static str) -> Result<(), LoaderError> {
        if self.state != expected {
            return Err(LoaderError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn advance(&mut self, to: LoaderState) {
        debug_assert_eq!(self.state.next(), Some(to), "non-linear transition");
        info!(from = %self.state, to = %to, "loader state");
        self.state = to;
    }

    fn fail(&mut self, err: &LoaderError) {
        match err {
            // A misuse leaves the lifecycle where it was.
            LoaderError::InvalidState { .. } => {
                warn!("{err}");
                return;
            }
            LoaderError::Cancelled => warn!(state = %self.state, "{err}"),
            _ => error!(state = %self.state, "{err}"),
        }
        self.state = LoaderState::Failed;
    }
}

impl<M, F, S> fmt::Debug for Controller<M, F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
