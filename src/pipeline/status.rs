use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStatus {
    /// No session yet: no connection, or the connection is still opening.
    Initializing,
    AwaitingApplication,
    ModelError,
    LayoutError,
    AwaitingLayout,
    Ready,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        PipelineStatus::Initializing
    }
}

impl PipelineStatus {
    /// Text shown in place of the chart. Empty once the chart is ready.
    pub fn message(&self) -> &'static str {
        match self {
            PipelineStatus::Initializing | PipelineStatus::AwaitingApplication => "Fetching app...",
            PipelineStatus::ModelError => "Oops, there was some problems fetching the model",
            PipelineStatus::LayoutError => "Oops, there was some problems fetching the layout",
            PipelineStatus::AwaitingLayout => "Fetching layout...",
            PipelineStatus::Ready => "",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusInputs {
    pub session_ready: bool,
    pub app_ready: bool,
    pub model_error: bool,
    pub layout_error: bool,
    pub layout_ready: bool,
}

/// Picks the single status to display. Earlier checks mask later ones.
pub fn project_status(inputs: &StatusInputs) -> PipelineStatus {
    if !inputs.app_ready {
        if inputs.session_ready {
            PipelineStatus::AwaitingApplication
        } else {
            PipelineStatus::Initializing
        }
    } else if inputs.model_error {
        PipelineStatus::ModelError
    } else if inputs.layout_error {
        PipelineStatus::LayoutError
    } else if !inputs.layout_ready {
        PipelineStatus::AwaitingLayout
    } else {
        PipelineStatus::Ready
    }
}
