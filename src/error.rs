//! Error types for lash.

use thiserror::Error;

/// Common error type for the sandbox runtime.
///
/// The first seven variants are the bridge error taxonomy: every failure
/// crossing the host/guest boundary is one of these, and they survive the
/// round trip through the Lua error machinery (see [`LashError::from_lua`]).
#[derive(Error, Debug, Clone)]
pub enum LashError {
    /// The sandbox deadline expired, or the per-evaluation deadline was hit.
    #[error("script timeout")]
    Timeout,

    /// An allocation guard or the engine memory limit fired.
    #[error("memory error: {0}")]
    OutOfMemory(String),

    /// A module, command, or other named resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Authentication or privilege escalation failed; carries the host's message.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A per-evaluation call budget was exhausted.
    #[error("limit reached: {0}")]
    Limit(String),

    /// A privileged call targeted something that is not invokable.
    #[error("not a function: {0}")]
    NotCallable(String),

    /// Opaque pass-through from the storage or SQL layer.
    #[error("data layer error: {0}")]
    Data(String),

    /// Network fetch error.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Guest script error (syntax or uncaught runtime error).
    #[error("script error: {0}")]
    Script(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LashError {
    fn from(e: std::io::Error) -> Self {
        LashError::Io(e.to_string())
    }
}

impl LashError {
    /// Convert into an `mlua::Error` for raising inside a bridge callback.
    ///
    /// The original value is kept as the external cause so [`from_lua`]
    /// can recover the variant on the way back out.
    ///
    /// [`from_lua`]: LashError::from_lua
    pub fn into_lua(self) -> mlua::Error {
        mlua::Error::external(self)
    }

    /// Recover a `LashError` from an error raised during guest execution.
    ///
    /// Walks callback-error chains to find the external cause raised by a
    /// bridge function; engine memory faults map to [`LashError::OutOfMemory`];
    /// anything else is an uncaught guest error.
    pub fn from_lua(err: &mlua::Error) -> LashError {
        match err {
            mlua::Error::CallbackError { cause, .. } => Self::from_lua(cause),
            mlua::Error::ExternalError(e) => match e.downcast_ref::<LashError>() {
                Some(lash) => lash.clone(),
                None => LashError::Script(e.to_string()),
            },
            mlua::Error::MemoryError(m) => LashError::OutOfMemory(m.clone()),
            mlua::Error::WithContext { cause, .. } => Self::from_lua(cause),
            other => LashError::Script(other.to_string()),
        }
    }
}

impl From<mlua::Error> for LashError {
    fn from(e: mlua::Error) -> Self {
        LashError::from_lua(&e)
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, LashError>;
