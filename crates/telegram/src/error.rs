use {
    hoarder_intake::Destination,
    teloxide::{ApiError, RequestError},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Telegram(#[from] RequestError),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Whether Telegram refused the request because the chat cannot be reached.
pub(crate) fn is_destination_unavailable(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Api(
            ApiError::ChatNotFound
                | ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
        )
    )
}

/// Translate a failed send into the intake's error type.
pub(crate) fn send_error(error: RequestError, to: &Destination) -> hoarder_intake::Error {
    if is_destination_unavailable(&error) {
        hoarder_intake::Error::destination_unavailable(to)
    } else {
        hoarder_intake::Error::external(format!("telegram send to {to} failed"), error)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_not_found_maps_to_destination_unavailable() {
        let to = Destination::Channel("@market".into());
        let err = send_error(RequestError::Api(ApiError::ChatNotFound), &to);
        assert!(matches!(
            err,
            hoarder_intake::Error::DestinationUnavailable { ref destination } if destination == "@market"
        ));
    }

    #[test]
    fn other_errors_stay_external() {
        let err = send_error(
            RequestError::Api(ApiError::MessageTextIsEmpty),
            &Destination::Chat(1),
        );
        assert!(matches!(err, hoarder_intake::Error::External { .. }));
    }
}
