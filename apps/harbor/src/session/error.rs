#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("can't find session: {0}")]
    SessionNotFound(String),
    #[error("can't find window: {0}")]
    WindowNotFound(String),
    #[error("can't find pane: {0}")]
    PaneNotFound(String),
    #[error("duplicate session: {0}")]
    DuplicateSession(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("bad name: {0}")]
    InvalidName(String),
    #[error("no space for new pane")]
    CannotSplit,
    #[error("no current session")]
    NoCurrentSession,
}
