use async_trait::async_trait;

use crate::error::Result;

use super::{
    CONFIRM_LABELS, DELETE_LABELS, GENERATE_LABELS, LOCAL_DUBBING_LABELS, REPLACE_LABELS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// The page controls the upload protocol needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRole {
    LocalDubbing,
    Generate,
    Replace,
    /// Removes the previously attached audio.
    Delete,
    /// Confirms the delete dialog.
    Confirm,
}

impl ControlRole {
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            ControlRole::LocalDubbing => LOCAL_DUBBING_LABELS,
            ControlRole::Generate => GENERATE_LABELS,
            ControlRole::Replace => REPLACE_LABELS,
            ControlRole::Delete => DELETE_LABELS,
            ControlRole::Confirm => CONFIRM_LABELS,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ControlRole::LocalDubbing => "Local Dubbing button",
            ControlRole::Generate => "Generate button",
            ControlRole::Replace => "Replace button",
            ControlRole::Delete => "audio delete button",
            ControlRole::Confirm => "delete confirmation",
        }
    }
}

/// Opaque reference to an element found by a [`PageDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle(pub String);

/// Capabilities the sequencer needs from the automation target.
///
/// Lookups return `Ok(None)` when nothing usable is on the page yet; `Err`
/// is reserved for losing the page altogether
/// ([`DubsplitError::Communication`](crate::error::DubsplitError::Communication)).
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn find_file_input(&self, kind: MediaKind) -> Result<Option<ControlHandle>>;

    /// Find an enabled, visible control whose label matches one of `labels`.
    async fn find_control(
        &self,
        role: ControlRole,
        labels: &[&str],
    ) -> Result<Option<ControlHandle>>;

    async fn attach_file(&self, input: &ControlHandle, file_name: &str, data: &[u8])
        -> Result<()>;

    async fn activate(&self, control: &ControlHandle) -> Result<()>;
}
