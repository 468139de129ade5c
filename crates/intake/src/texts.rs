use serde::{Deserialize, Serialize};

/// Every participant-facing string: prompts, notices, button labels and the
/// field labels of the published post.
///
/// All fields have defaults, so a config only lists what it overrides.
/// Prompts are sent as HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Texts {
    // Buttons
    pub entry_button: String,
    pub cancel_button: String,
    pub continue_button: String,
    /// The two meeting methods offered at the meeting step.
    pub meeting_options: Vec<String>,

    // Outside a conversation
    pub greeting: String,
    pub press_button_to_start: String,
    pub no_handle: String,
    pub cancelled: String,
    pub queued: String,
    pub not_for_groups: String,
    pub help: String,

    // Prompts
    pub ask_name: String,
    pub ask_operability: String,
    pub ask_appearance: String,
    pub ask_components: String,
    pub ask_price: String,
    pub ask_meeting: String,
    /// `{min}` and `{max}` are substituted.
    pub ask_attachments: String,
    /// `{count}` and `{max}` are substituted.
    pub ask_more_attachments: String,
    pub ask_remarks: String,
    pub review: String,

    // Retry notices
    pub send_text: String,
    pub invalid_price: String,
    pub press_one_of_buttons: String,
    pub attachment_required: String,
    /// `{min}` is substituted.
    pub not_enough_attachments: String,
    /// `{max}` is substituted.
    pub too_many_attachments: String,

    // Post labels
    pub label_seller: String,
    pub label_name: String,
    pub label_operability: String,
    pub label_appearance: String,
    pub label_components: String,
    pub label_price: String,
    pub label_meeting: String,
    pub label_remarks: String,
    pub currency: String,
}

impl Default for Texts {
    fn default() -> Self {
        Self {
            entry_button: "Offer an item".into(),
            cancel_button: "Cancel".into(),
            continue_button: "Continue".into(),
            meeting_options: vec!["Pickup".into(), "Meet in person".into()],

            greeting: "You can offer an item for the flea market channel by pressing the \
                       button below."
                .into(),
            press_button_to_start: "Press the button to start composing a listing.".into(),
            no_handle: "You have no username set. Buyers need it to contact you once the \
                        listing is published. Set one in your Telegram profile settings and \
                        try again."
                .into(),
            cancelled: "Cancelled. Press the button below to start over.".into(),
            queued: "Your listing has been queued for publishing. Press the button below to \
                     compose another one."
                .into(),
            not_for_groups: "This bot is not meant to be used in group chats.".into(),
            help: "Commands:\n\
                   • <code>/replacements {\"word\": \"replacement\"}</code> - set the device \
                   name replacements. The previous set is overwritten.\n\
                   • <code>/help</code> - show this message"
                .into(),

            ask_name: "You can press Cancel at any time.\n\nEnter the full device name and its \
                       colour:"
                .into(),
            ask_operability: "Rate how well the device works, from 1 to 5.\n\n\
                              <i>5 means like new, 1 means it barely works.</i>"
                .into(),
            ask_appearance: "Rate the appearance of the device, from 1 to 5.".into(),
            ask_components: "List the accessories that come with the device. If there are \
                             none, say so.\n\n<i>Example: box, spare coil and a USB-C \
                             cable.</i>"
                .into(),
            ask_price: "Enter the price as a plain number:".into(),
            ask_meeting: "How would you like to meet?".into(),
            ask_attachments: "Send between {min} and {max} photos of the device.".into(),
            ask_more_attachments: "Got {count} of {max} photos. Send more or press Continue."
                .into(),
            ask_remarks: "Add any other details, or press Continue if there are none:".into(),
            review: "Your listing is ready! It will be published once you confirm. This is \
                     how it will look:"
                .into(),

            send_text: "Please send text.".into(),
            invalid_price: "The price must be a whole number with no other characters. Leave \
                            the currency out."
                .into(),
            press_one_of_buttons: "Please press one of the buttons.".into(),
            attachment_required: "Please send a photo of the device.".into(),
            not_enough_attachments: "Send at least {min} photo(s) before continuing.".into(),
            too_many_attachments: "That is more than {max} photos. Everything sent so far was \
                                   discarded, please start the photos over."
                .into(),

            label_seller: "Seller".into(),
            label_name: "Name".into(),
            label_operability: "Operability".into(),
            label_appearance: "Appearance".into(),
            label_components: "Components".into(),
            label_price: "Price".into(),
            label_meeting: "Meeting".into(),
            label_remarks: "Remarks".into(),
            currency: "RUB".into(),
        }
    }
}

/// Substitute `{key}` placeholders in `template`.
pub fn fill(template: &str, vars: &[(&str, usize)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), &value.to_string())
    })
}
