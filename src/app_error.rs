use core::fmt;
use tracing::error;

/// Errors raised by any component of the control loop.
///
/// None of these are fatal: every call site logs the variant via `disp()`
/// and falls back to "skip this tick's action", per the error table in
/// the design notes.
#[derive(Debug, Clone)]
pub enum AppError {
    EngineConnect,
    EngineTransient(String),
    EngineSemantic(String),
    ConfigIo(String),
    ConfigParse(String),
    MaxDocksExpr(String),
    ImagePull(String),
    InspectParse(String),
    Sentinel(String),
}

impl AppError {
    /// Log the error at the appropriate level for its kind.
    pub fn disp(&self) {
        match self {
            Self::EngineConnect => error!("unable to reach the container engine"),
            Self::EngineTransient(s) => error!(%s, "container engine call failed after retries"),
            Self::EngineSemantic(s) => error!(%s, "container engine rejected the request"),
            Self::ConfigIo(s) => error!(%s, "could not read configuration file"),
            Self::ConfigParse(s) => error!(%s, "could not parse configuration file"),
            Self::MaxDocksExpr(s) => error!(%s, "max_docks expression is invalid, falling back to zero"),
            Self::ImagePull(s) => error!(%s, "could not pull docker image"),
            Self::InspectParse(s) => error!(%s, "could not parse container inspect response"),
            Self::Sentinel(s) => error!(%s, "sentinel file operation failed"),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EngineConnect => write!(f, "unable to reach the container engine"),
            Self::EngineTransient(s) => write!(f, "engine call failed after retries: {s}"),
            Self::EngineSemantic(s) => write!(f, "engine rejected the request: {s}"),
            Self::ConfigIo(s) => write!(f, "could not read configuration file: {s}"),
            Self::ConfigParse(s) => write!(f, "could not parse configuration file: {s}"),
            Self::MaxDocksExpr(s) => write!(f, "max_docks expression is invalid: {s}"),
            Self::ImagePull(s) => write!(f, "could not pull docker image: {s}"),
            Self::InspectParse(s) => write!(f, "could not parse container inspect response: {s}"),
            Self::Sentinel(s) => write!(f, "sentinel file operation failed: {s}"),
        }
    }
}
