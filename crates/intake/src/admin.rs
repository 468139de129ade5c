//! Commands accepted in the administrative chat.

use {thiserror::Error, tracing::{info, warn}};

use crate::{
    replacements::{ReplacementTable, Replacements, TableError},
    texts::Texts,
};

/// Why an admin command was refused. The message is sent back verbatim.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Error: {0}")]
    Invalid(#[from] TableError),
    #[error("Error: /replacements needs a JSON object, e.g. /replacements {{\"ipx\": \"iPX\"}}")]
    MissingPayload,
    #[error("Error: the replacements could not be saved: {0}")]
    Persist(#[source] crate::Error),
}

pub const SAVED: &str = "Saved.";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    Replacements(&'a str),
}

/// Split `/name@bot rest` into the bare command name and its argument.
fn parse(text: &str) -> Option<Command<'_>> {
    let text = text.trim();
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    let name = head.strip_prefix('/')?;
    let name = name.split_once('@').map_or(name, |(n, _)| n);
    match name {
        "help" | "start" => Some(Command::Help),
        "replacements" => Some(Command::Replacements(rest)),
        _ => None,
    }
}

/// Handle one message from the admin chat. `None` means no reply.
pub async fn handle(
    text: &str,
    texts: &Texts,
    replacements: &Replacements,
) -> Option<Result<String, AdminError>> {
    let command = parse(text)?;
    Some(match command {
        Command::Help => Ok(texts.help.clone()),
        Command::Replacements(payload) => replace(payload, replacements).await,
    })
}

async fn replace(payload: &str, replacements: &Replacements) -> Result<String, AdminError> {
    if payload.is_empty() {
        return Err(AdminError::MissingPayload);
    }
    let table = ReplacementTable::from_json(payload).inspect_err(|e| {
        warn!(error = %e, "rejected replacements payload");
    })?;
    let entries = table.len();
    replacements
        .replace(table)
        .await
        .map_err(AdminError::Persist)?;
    info!(entries, "replacements set by admin");
    Ok(SAVED.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::replacements::ReplacementStore, rstest::rstest};

    #[rstest]
    #[case("/help", Some(Command::Help))]
    #[case("/start", Some(Command::Help))]
    #[case("/help@hoarder_bot", Some(Command::Help))]
    #[case("/replacements {\"a\":\"b\"}", Some(Command::Replacements("{\"a\":\"b\"}")))]
    #[case("/replacements@hoarder_bot  {}", Some(Command::Replacements("{}")))]
    #[case("/replacements", Some(Command::Replacements("")))]
    #[case("hello", None)]
    #[case("/unknown", None)]
    #[case("help", None)]
    fn parses_commands(#[case] text: &str, #[case] expected: Option<Command<'_>>) {
        assert_eq!(parse(text), expected);
    }

    #[tokio::test]
    async fn help_returns_help_text() {
        let texts = Texts::default();
        let r = Replacements::in_memory(ReplacementTable::default());
        let reply = handle("/help", &texts, &r).await.unwrap().unwrap();
        assert_eq!(reply, texts.help);
    }

    #[tokio::test]
    async fn unknown_text_gets_no_reply() {
        let r = Replacements::in_memory(ReplacementTable::default());
        assert!(handle("good morning", &Texts::default(), &r).await.is_none());
    }

    #[tokio::test]
    async fn valid_replacements_are_saved_and_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replacements.json");
        let r = Replacements::load(ReplacementStore::new(&path)).unwrap();

        let reply = handle(r#"/replacements {"ipx": "iPX"}"#, &Texts::default(), &r)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, SAVED);
        assert_eq!(r.normalize("my IPX device"), "my iPX device");
        assert!(path.exists());
    }

    #[rstest]
    #[case("/replacements not json", "not valid JSON")]
    #[case("/replacements [\"a\"]", "must be a JSON object")]
    #[case("/replacements {\"a\": 1}", "at least one")]
    #[case("/replacements", "needs a JSON object")]
    #[tokio::test]
    async fn invalid_payload_leaves_table_untouched(#[case] text: &str, #[case] expected: &str) {
        let r = Replacements::in_memory(ReplacementTable::from_json(r#"{"a":"A"}"#).unwrap());
        let err = handle(text, &Texts::default(), &r)
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains(expected), "{err}");
        assert_eq!(r.normalize("a"), "A");
    }
}
