//! Config validation.
//!
//! Flags unknown or misspelled keys against the shape of the default config,
//! type errors, and settings the bot cannot run with.

use std::path::{Path, PathBuf};

use {hoarder_intake::Destination, secrecy::ExposeSecret, serde_json::Value};

use crate::{loader, schema::HoarderConfig};

/// Telegram refuses media groups larger than this.
pub const MAX_GROUP_SIZE: usize = 10;

/// The meeting step offers pickup or an in-person meeting.
pub const MEETING_OPTIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "value" or "file-ref".
    pub category: &'static str,
    /// Dotted path, e.g. "intake.publish_to".
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(loader::find_config_file);

    let Some(actual_path) = config_path else {
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        )];
        diagnostics.extend(check_config(&HoarderConfig::default()));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let diagnostics = match loader::load_config_value(&actual_path) {
        Ok(value) => validate_value(&value),
        Err(e) => vec![Diagnostic::new(
            Severity::Error,
            "syntax",
            "",
            format!("{e:#}"),
        )],
    };
    ValidationResult {
        diagnostics,
        config_path: Some(actual_path),
    }
}

/// Validate an already parsed config tree.
#[must_use]
pub fn validate_value(value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    match serde_json::to_value(HoarderConfig::default()) {
        Ok(shape) => check_unknown_fields(value, &shape, "", &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "unknown-field",
            "",
            format!("skipped unknown-field check: {e}"),
        )),
    }

    match serde_json::from_value::<HoarderConfig>(value.clone()) {
        Ok(config) => diagnostics.extend(check_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    diagnostics
}

/// Walk `value` alongside the default config and flag keys it does not know.
fn check_unknown_fields(
    value: &Value,
    shape: &Value,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (Value::Object(table), Value::Object(known)) = (value, shape) else {
        return;
    };
    let known_keys: Vec<&str> = known.keys().map(String::as_str).collect();

    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match known.get(key) {
            Some(child_shape) => check_unknown_fields(child, child_shape, &path, diagnostics),
            None => {
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

/// Settings that parse but cannot work.
#[must_use]
pub fn check_config(config: &HoarderConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let intake = &config.intake;

    if config.telegram.token.expose_secret().trim().is_empty() {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "telegram.token",
            "bot token is empty",
        ));
    }
    if config.telegram.poll_timeout_secs == 0 {
        out.push(Diagnostic::new(
            Severity::Info,
            "value",
            "telegram.poll_timeout_secs",
            "0 disables long polling",
        ));
    }

    if intake.admin_chat_id == 0 {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "intake.admin_chat_id",
            "no admin chat configured; admin commands are unavailable",
        ));
    }

    let destination_missing = match &intake.publish_to {
        Destination::Chat(id) => *id == 0,
        Destination::Channel(name) => name.trim_start_matches('@').trim().is_empty(),
    };
    if destination_missing {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "intake.publish_to",
            "publish destination is empty",
        ));
    }

    if intake.publish_interval_secs == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "intake.publish_interval_secs",
            "publish interval must be positive",
        ));
    }

    if intake.min_attachments > intake.max_attachments {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "intake.min_attachments",
            format!(
                "min_attachments ({}) exceeds max_attachments ({})",
                intake.min_attachments, intake.max_attachments
            ),
        ));
    }
    if intake.max_attachments > MAX_GROUP_SIZE {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "intake.max_attachments",
            format!("Telegram media groups hold at most {MAX_GROUP_SIZE} photos"),
        ));
    }

    if intake.texts.meeting_options.is_empty() {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "intake.texts.meeting_options",
            "at least one meeting option is required",
        ));
    } else if intake.texts.meeting_options.len() != MEETING_OPTIONS {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "intake.texts.meeting_options",
            format!(
                "expected {MEETING_OPTIONS} meeting options, got {}",
                intake.texts.meeting_options.len()
            ),
        ));
    }

    out
}
