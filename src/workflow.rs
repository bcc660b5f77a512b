use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Wire types ──────────────────────────────────────────────────────────────

/// A selected rectangle as handed to the action workflow: geometry as
/// fractions of the image frame, plus everything the workflow may want to
/// show or edit. `deleted` is always false outbound; it only carries meaning
/// on the way back, inside [`ActionResult`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelativeRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub id: Option<u64>,
    pub part_number: Option<String>,
    pub transition_image_path: Option<String>,
    #[serde(default)]
    pub part_number_registered: bool,
    #[serde(default)]
    pub transition_image_registered: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// Outcome of an action workflow. A partial update: `None` fields leave the
/// target rectangle unchanged. `deleted: true` wins over everything else.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub id: Option<u64>,
    pub part_number: Option<String>,
    pub transition_image_path: Option<String>,
    pub part_number_registered: Option<bool>,
    pub transition_image_registered: Option<bool>,
    #[serde(default)]
    pub deleted: bool,
}

impl ActionResult {
    pub fn deletion() -> Self {
        Self {
            deleted: true,
            ..Self::default()
        }
    }
}

// ── Workflow boundary ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("action workflow failed: {0}")]
    Failed(String),
    #[error("action workflow went away without producing a result")]
    Abandoned,
}

/// Channel the engine polls for the workflow's eventual answer.
pub type ActionReceiver = mpsc::Receiver<Result<ActionResult, WorkflowError>>;

/// The external action workflow: takes a selected rectangle in relative
/// coordinates and eventually answers with a partial update or a deletion.
/// Injected into the engine at construction time.
pub trait ActionWorkflow {
    fn begin(&mut self, rect: RelativeRect) -> ActionReceiver;
}
