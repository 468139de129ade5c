//! The listing form: the ordered steps a participant walks through and the
//! rendering of the collected fields into the published post.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    error::{Error, Result},
    message::{AttachmentRef, LogicalMessage},
    texts::Texts,
    transport::Keyboard,
};

/// Ordinal choices for the two rank steps.
pub const RANKS: [&str; 5] = ["1", "2", "3", "4", "5"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    Operability,
    Appearance,
    Components,
    Price,
    Meeting,
    Attachments,
    Remarks,
    Confirm,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Operability => "operability",
            Self::Appearance => "appearance",
            Self::Components => "components",
            Self::Price => "price",
            Self::Meeting => "meeting",
            Self::Attachments => "attachments",
            Self::Remarks => "remarks",
            Self::Confirm => "confirm",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Rank(u8),
    Price(u64),
    Attachments(Vec<AttachmentRef>),
    /// An optional field the participant skipped.
    Absent,
    Confirmed,
}

/// Field values collected so far in one conversation.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    values: BTreeMap<Field, FieldValue>,
}

impl Draft {
    pub fn set(&mut self, field: Field, value: FieldValue) {
        self.values.insert(field, value);
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    fn text(&self, field: Field) -> Result<&str> {
        match self.get(field) {
            Some(FieldValue::Text(t)) => Ok(t),
            other => Err(missing(field, other)),
        }
    }

    fn rank(&self, field: Field) -> Result<u8> {
        match self.get(field) {
            Some(FieldValue::Rank(r)) => Ok(*r),
            other => Err(missing(field, other)),
        }
    }
}

fn missing(field: Field, found: Option<&FieldValue>) -> Error {
    Error::message(format!("draft field {field} holds {found:?}"))
}

// ── Step descriptors ────────────────────────────────────────────────────────

/// Predicate over an inbound message with the notice sent when it fails.
pub struct Validator {
    pub failure: String,
    check: Box<dyn Fn(&LogicalMessage) -> bool + Send + Sync>,
}

impl Validator {
    pub fn new(
        failure: impl Into<String>,
        check: impl Fn(&LogicalMessage) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            failure: failure.into(),
            check: Box::new(check),
        }
    }

    pub fn text_present(failure: impl Into<String>) -> Self {
        Self::new(failure, LogicalMessage::has_text)
    }

    /// Accept only one of `options`, matched exactly.
    pub fn one_of(options: Vec<String>, failure: impl Into<String>) -> Self {
        Self::new(failure, move |m| {
            m.text().is_some_and(|t| options.iter().any(|o| o == t))
        })
    }

    /// Digits only, and small enough to fit a `u64`.
    pub fn price(failure: impl Into<String>) -> Self {
        Self::new(failure, |m| {
            m.text().is_some_and(|t| {
                t.bytes().all(|b| b.is_ascii_digit()) && t.parse::<u64>().is_ok()
            })
        })
    }

    pub fn check(&self, message: &LogicalMessage) -> bool {
        (self.check)(message)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Turns an accepted message into a field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Text,
    /// Text run through the replacement table.
    Normalized,
    Rank,
    Price,
    /// Text, unless it is exactly `skip`.
    OptionalText { skip: String },
    Confirmed,
}

impl Transform {
    /// `None` only if the message slipped past validators it should not have.
    pub fn apply(
        &self,
        message: &LogicalMessage,
        normalize: &dyn Fn(&str) -> String,
    ) -> Option<FieldValue> {
        let text = message.text();
        match self {
            Self::Text => text.map(|t| FieldValue::Text(t.to_string())),
            Self::Normalized => text.map(|t| FieldValue::Text(normalize(t))),
            Self::Rank => text.and_then(|t| t.parse().ok()).map(FieldValue::Rank),
            Self::Price => text.and_then(|t| t.parse().ok()).map(FieldValue::Price),
            Self::OptionalText { skip } => text.map(|t| {
                if t == skip {
                    FieldValue::Absent
                } else {
                    FieldValue::Text(t.to_string())
                }
            }),
            Self::Confirmed => Some(FieldValue::Confirmed),
        }
    }
}

/// Rules of the attachment sub-step.
#[derive(Debug, Clone)]
pub struct CollectPolicy {
    pub min: usize,
    pub max: usize,
    pub continue_label: String,
    /// Sent after each accepted delivery; `{count}` and `{max}` are filled.
    pub more_prompt: String,
    pub required: String,
    pub not_enough: String,
    pub too_many: String,
}

#[derive(Debug)]
pub enum StepKind {
    /// One accepted message produces the value.
    Single {
        validators: Vec<Validator>,
        transform: Transform,
    },
    /// Attachments accumulate over several messages.
    Collect(CollectPolicy),
}

#[derive(Debug)]
pub struct Step {
    pub field: Field,
    pub prompt: String,
    /// Choice buttons; the cancel button is added when the prompt is sent.
    pub keyboard: Keyboard,
    /// Send the rendered post after the prompt.
    pub preview: bool,
    pub kind: StepKind,
}

impl Step {
    fn single(
        field: Field,
        prompt: &str,
        keyboard: Keyboard,
        validators: Vec<Validator>,
        transform: Transform,
    ) -> Self {
        Self {
            field,
            prompt: prompt.to_string(),
            keyboard,
            preview: false,
            kind: StepKind::Single {
                validators,
                transform,
            },
        }
    }
}

// ── Form ────────────────────────────────────────────────────────────────────

/// The finished, immutable listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub attachments: Vec<AttachmentRef>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLimits {
    pub min: usize,
    pub max: usize,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self { min: 1, max: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct Form {
    texts: Arc<Texts>,
    limits: AttachmentLimits,
}

impl Form {
    pub fn new(texts: Arc<Texts>, limits: AttachmentLimits) -> Self {
        Self { texts, limits }
    }

    pub fn texts(&self) -> &Texts {
        &self.texts
    }


    /// The step sequence, in the order it is walked.
    pub fn steps(&self) -> Vec<Step> {
        let t = &*self.texts;
        let ranks: Vec<String> = RANKS.iter().map(|r| r.to_string()).collect();
        let rank_keyboard = Keyboard::new().row(ranks.clone());
        let meeting_keyboard = t
            .meeting_options
            .iter()
            .fold(Keyboard::new(), |kb, option| kb.row([option.as_str()]));
        let continue_keyboard = Keyboard::single(t.continue_button.as_str());

        vec![
            Step::single(
                Field::Name,
                &t.ask_name,
                Keyboard::new(),
                vec![Validator::text_present(&t.send_text)],
                Transform::Normalized,
            ),
            Step::single(
                Field::Operability,
                &t.ask_operability,
                rank_keyboard.clone(),
                vec![Validator::one_of(ranks.clone(), &t.press_one_of_buttons)],
                Transform::Rank,
            ),
            Step::single(
                Field::Appearance,
                &t.ask_appearance,
                rank_keyboard,
                vec![Validator::one_of(ranks, &t.press_one_of_buttons)],
                Transform::Rank,
            ),
            Step::single(
                Field::Components,
                &t.ask_components,
                Keyboard::new(),
                vec![Validator::text_present(&t.send_text)],
                Transform::Text,
            ),
            Step::single(
                Field::Price,
                &t.ask_price,
                Keyboard::new(),
                vec![Validator::price(&t.invalid_price)],
                Transform::Price,
            ),
            Step::single(
                Field::Meeting,
                &t.ask_meeting,
                meeting_keyboard,
                vec![Validator::one_of(
                    t.meeting_options.clone(),
                    &t.press_one_of_buttons,
                )],
                Transform::Text,
            ),
            Step {
                field: Field::Attachments,
                prompt: crate::texts::fill(&t.ask_attachments, &[
                    ("min", self.limits.min),
                    ("max", self.limits.max),
                ]),
                keyboard: Keyboard::new(),
                preview: false,
                kind: StepKind::Collect(CollectPolicy {
                    min: self.limits.min,
                    max: self.limits.max,
                    continue_label: t.continue_button.clone(),
                    more_prompt: t.ask_more_attachments.clone(),
                    required: t.attachment_required.clone(),
                    not_enough: crate::texts::fill(&t.not_enough_attachments, &[(
                        "min",
                        self.limits.min,
                    )]),
                    too_many: crate::texts::fill(&t.too_many_attachments, &[(
                        "max",
                        self.limits.max,
                    )]),
                }),
            },
            Step::single(
                Field::Remarks,
                &t.ask_remarks,
                continue_keyboard.clone(),
                vec![Validator::text_present(&t.send_text)],
                Transform::OptionalText {
                    skip: t.continue_button.clone(),
                },
            ),
            Step {
                preview: true,
                ..Step::single(
                    Field::Confirm,
                    &t.review,
                    continue_keyboard,
                    vec![Validator::one_of(
                        vec![t.continue_button.clone()],
                        &t.press_one_of_buttons,
                    )],
                    Transform::Confirmed,
                )
            },
        ]
    }

    /// Render the post body from the draft. Fields up to and including the
    /// attachments must be present; remarks are optional.
    pub fn compose(&self, handle: &str, draft: &Draft) -> Result<Submission> {
        let t = &*self.texts;
        let attachments = match draft.get(Field::Attachments) {
            Some(FieldValue::Attachments(a)) => a.clone(),
            other => return Err(missing(Field::Attachments, other)),
        };
        if attachments.len() < self.limits.min || attachments.len() > self.limits.max {
            return Err(Error::message(format!(
                "{} attachments outside of {}..={}",
                attachments.len(),
                self.limits.min,
                self.limits.max
            )));
        }
        let price = match draft.get(Field::Price) {
            Some(FieldValue::Price(p)) => *p,
            other => return Err(missing(Field::Price, other)),
        };
        let max_rank = RANKS.len();

        let mut text = format!(
            "{}: @{}\n\n",
            escape_html(&t.label_seller),
            escape_html(handle)
        );
        let mut line = |label: &str, value: String| {
            text.push_str(&format!("<b>{}:</b> {value}\n", escape_html(label)));
        };
        line(&t.label_name, escape_html(draft.text(Field::Name)?));
        line(
            &t.label_operability,
            format!("{}/{max_rank}", draft.rank(Field::Operability)?),
        );
        line(
            &t.label_appearance,
            format!("{}/{max_rank}", draft.rank(Field::Appearance)?),
        );
        line(&t.label_components, escape_html(draft.text(Field::Components)?));
        line(&t.label_price, format!("{price} {}", escape_html(&t.currency)));
        line(&t.label_meeting, escape_html(draft.text(Field::Meeting)?));
        if let Some(FieldValue::Text(remarks)) = draft.get(Field::Remarks) {
            line(&t.label_remarks, escape_html(remarks));
        }

        Ok(Submission {
            attachments,
            text: text.trim_end().to_string(),
        })
    }
}

/// Escape HTML special characters.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
