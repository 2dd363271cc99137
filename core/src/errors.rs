use thiserror::Error;
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("Database unavailable")] DbUnavailable,
    #[error("Unknown provider")] UnknownProvider,
    #[error("Instance not found")] InstanceNotFound,
    #[error("Session is not open for arbitration")] NotArbitrable,
    #[error("Invalid handoff destination")] BadDestination,
    #[error("Unknown error")] Unknown,
}
impl ArenaError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DbUnavailable => "DB-1001",
            Self::UnknownProvider => "PRV-1001",
            Self::InstanceNotFound => "INS-1001",
            Self::NotArbitrable => "ARB-1001",
            Self::BadDestination => "ARB-1002",
            Self::Unknown => "GEN-1000",
        }
    }
    pub fn explain(&self) -> &'static str {
        match self {
            Self::DbUnavailable => "The application could not access the SQLite database.",
            Self::UnknownProvider => "No catalog entry exists for the requested provider key.",
            Self::InstanceNotFound => "No configured AI instance matches the requested ID.",
            Self::NotArbitrable => "The session has not produced an outcome yet, so it cannot be crowned or dismissed.",
            Self::BadDestination => "The instance's handoff destination is not a valid URL.",
            Self::Unknown => "An unspecified error occurred.",
        }
    }
}
