//! The session flow controller.
//!
//! Two states, driven by two user actions:
//!
//! ```text
//!   Uploading --(upload ok, then proceed)--> Visualizing
//!   Visualizing --(go back)--> Uploading
//! ```
//!
//! Every render is rebuilt from the [`Session`] alone; the controller holds
//! configuration only.

use tracing::{info, warn};

use crate::error::{FlowError, RelayError};
use crate::explorer::{Explorer, ExplorerSpec, GraphicWalker};
use crate::loader::{self, ACCEPTED_EXTENSIONS, UploadedFile};
use crate::preview::{Preview, PreviewOptions};
use crate::relay::{RelayOutcome, RelayPolicy};
use crate::session::{Notice, Session};

/// Title of the visualization page.
pub const EXPLORER_TITLE: &str = "Use Pygwalker In Streamlit";

pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully!";

pub const UPLOAD_ERROR_MESSAGE: &str = "Error loading the file. Please ensure it's a valid CSV or Excel file.";

/// Which screen a session is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Uploading,
    Visualizing,
}

impl Screen {
    pub fn of(session: &Session) -> Self {
        if session.viewing() {
            Screen::Visualizing
        } else {
            Screen::Uploading
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadView {
    pub accept: &'static [&'static str],
    pub source: Option<String>,
    pub preview: Option<Preview>,
    pub notices: Vec<Notice>,
}

#[derive(Clone, Debug)]
pub struct VisualizeView {
    pub title: &'static str,
    pub wide: bool,
    pub source: Option<String>,
    /// The widget description, or why the explorer could not render.
    pub explorer: Result<ExplorerSpec, String>,
    pub notices: Vec<Notice>,
}

#[derive(Clone, Debug)]
pub enum View {
    Upload(UploadView),
    Visualize(VisualizeView),
}

impl View {
    pub fn screen(&self) -> Screen {
        match self {
            View::Upload(_) => Screen::Uploading,
            View::Visualize(_) => Screen::Visualizing,
        }
    }

    pub fn notices(&self) -> &[Notice] {
        match self {
            View::Upload(v) => &v.notices,
            View::Visualize(v) => &v.notices,
        }
    }
}

/// What a successful upload produced.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadSummary {
    pub rows: usize,
    pub columns: usize,
    pub relay: Option<crate::relay::RelayAck>,
}

pub struct FlowController<E: Explorer = GraphicWalker> {
    preview: PreviewOptions,
    explorer: E,
    relay_policy: RelayPolicy,
}

impl Default for FlowController<GraphicWalker> {
    fn default() -> Self {
        Self::new(PreviewOptions::default(), GraphicWalker::default(), RelayPolicy::Disabled)
    }
}

impl<E: Explorer> FlowController<E> {
    pub fn new(preview: PreviewOptions, explorer: E, relay_policy: RelayPolicy) -> Self {
        Self {
            preview,
            explorer,
            relay_policy,
        }
    }

    pub fn relay_policy(&self) -> RelayPolicy {
        self.relay_policy
    }

    pub fn explorer(&self) -> &E {
        &self.explorer
    }

    /// Build the view for the current session and consume its pending notices.
    pub fn render(&self, session: &mut Session) -> View {
        let view = self.render_view(session);
        session.take_notices();
        view
    }

    /// Build the view without touching the session.
    pub fn render_view(&self, session: &Session) -> View {
        let notices = session.notices().to_vec();
        let source = session.source().map(str::to_string);

        match (session.viewing(), session.dataset()) {
            (true, Some(dataset)) => {
                let explorer = self.explorer.prepare(dataset).map_err(|e| {
                    warn!(error = %e, "explorer could not render dataset");
                    e.to_string()
                });
                View::Visualize(VisualizeView {
                    title: EXPLORER_TITLE,
                    wide: true,
                    source,
                    explorer,
                    notices,
                })
            }
            (_, dataset) => View::Upload(UploadView {
                accept: &ACCEPTED_EXTENSIONS,
                source,
                preview: dataset.map(|d| Preview::build(d, &self.preview)),
                notices,
            }),
        }
    }

    /// Handle a file chosen on the upload view.
    ///
    /// On success the dataset replaces whatever the session held. On any
    /// failure the session's dataset and screen are left exactly as they
    /// were and an error notice explains why.
    ///
    /// # Arguments
    /// * `session` - The session to update
    /// * `file` - The uploaded file
    /// * `relay` - Outcome of the relay hop, `RelayOutcome::Skipped` when none ran
    ///
    /// # Errors
    /// * `FlowError::WrongState` while the session is visualizing
    /// * `FlowError::Relay` when the relay policy is gating and the relay did not acknowledge
    /// * `FlowError::Load` for an unsupported or unreadable file
    pub fn upload(
        &self,
        session: &mut Session,
        file: &UploadedFile,
        relay: RelayOutcome,
    ) -> Result<UploadSummary, FlowError> {
        if session.viewing() {
            return Err(FlowError::WrongState("visualizing"));
        }

        let ack = match self.check_relay(session, relay) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(file = %file.name, error = %e, "upload blocked by relay");
                session.push_notice(Notice::error(format!("Could not relay the file: {}", e)));
                return Err(e.into());
            }
        };

        let dataset = match file.format().and_then(|format| loader::load(&file.bytes, format)) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(file = %file.name, error = %e, "upload rejected");
                session.push_notice(Notice::error(format!("{} ({})", UPLOAD_ERROR_MESSAGE, e)));
                return Err(e.into());
            }
        };

        let summary = UploadSummary {
            rows: dataset.height(),
            columns: dataset.width(),
            relay: ack,
        };
        info!(file = %file.name, rows = summary.rows, columns = summary.columns, "dataset loaded");

        session.load(dataset, file.name.clone());
        session.push_notice(Notice::success(UPLOAD_SUCCESS_MESSAGE));
        Ok(summary)
    }

    fn check_relay(
        &self,
        session: &mut Session,
        relay: RelayOutcome,
    ) -> Result<Option<crate::relay::RelayAck>, RelayError> {
        match (self.relay_policy, relay) {
            (RelayPolicy::Disabled, _) => Ok(None),
            (RelayPolicy::Gating, RelayOutcome::Skipped) => Err(RelayError::Disabled),
            (RelayPolicy::Gating, RelayOutcome::Failed(e)) => Err(e),
            (_, RelayOutcome::Acknowledged(ack)) => {
                session.push_notice(Notice::info(format!("Relay service received {}", ack.describe())));
                Ok(Some(ack))
            }
            (RelayPolicy::Advisory, RelayOutcome::Failed(e)) => {
                session.push_notice(Notice::error(format!("Could not relay the file: {}", e)));
                Ok(None)
            }
            (RelayPolicy::Advisory, RelayOutcome::Skipped) => Ok(None),
        }
    }

    /// Move from the upload view to the explorer.
    pub fn proceed(&self, session: &mut Session) -> Result<(), FlowError> {
        if session.start_viewing() {
            info!(source = ?session.source(), "visualizing dataset");
            Ok(())
        } else {
            session.push_notice(Notice::error("Upload a file before proceeding to visualization."));
            Err(FlowError::NoDataset)
        }
    }

    /// Drop the dataset and return to the upload view. Always succeeds.
    pub fn go_back(&self, session: &mut Session) {
        session.reset();
        info!("returned to upload screen");
    }
}

/// Convenience for callers that only have a file name and bytes.
pub fn upload_without_relay<E: Explorer>(
    controller: &FlowController<E>,
    session: &mut Session,
    name: &str,
    bytes: &[u8],
) -> Result<UploadSummary, FlowError> {
    controller.upload(session, &UploadedFile::new(name, bytes), RelayOutcome::Skipped)
}
