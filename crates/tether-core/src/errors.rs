/// Errors raised on the session path.
///
/// Classifies failures the way collaborators need to react to them: a
/// `NotConnected`/`SendFailed` is reported to the requesting controller and
/// is never fatal; `ConnectFailed` is treated as a transient closure and
/// feeds the reconnect schedule.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not connected to the upstream network")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("upstream connect failed: {0}")]
    ConnectFailed(String),
}
