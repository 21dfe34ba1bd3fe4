//! Request handler lifecycle states (§3).

/// States a [`crate::application::services::RequestHandler`] passes through.
/// `Finished` is reachable from every non-terminal state via error
/// transitions; `Released` follows once the event loop has re-entered after
/// the reply was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Queued,
    CheckingCache,
    AwaitingDownload,
    AwaitingExtraction,
    PostProcessing,
    Finished,
    Released,
}

impl HandlerState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, HandlerState::Finished | HandlerState::Released)
    }
}
