use {crate::message::ParticipantId, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    /// A second wait was registered while one is still pending for the same
    /// participant. This is a programming defect, never a user condition.
    #[error("registry invariant violated: a wait is already pending for participant {participant}")]
    WaitAlreadyPending { participant: ParticipantId },

    /// The destination chat or channel does not exist or rejects the bot.
    #[error("destination unavailable: {destination}")]
    DestinationUnavailable { destination: String },

    /// Another consumer is fetching updates with the same credentials.
    #[error("update source conflict: {message}")]
    SourceConflict { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn destination_unavailable(destination: impl std::fmt::Display) -> Self {
        Self::DestinationUnavailable {
            destination: destination.to_string(),
        }
    }

    /// Whether this error signals a broken internal invariant that must stop
    /// the process rather than be reported to a participant.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::WaitAlreadyPending { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
