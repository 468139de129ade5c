use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{form::AttachmentLimits, queue::DrainOrder, texts::Texts, transport::Destination};

/// Settings of the intake pipeline, the `[intake]` table of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Chat whose members may run admin commands.
    pub admin_chat_id: i64,
    /// Channel (`@name`) or chat id that receives published listings.
    pub publish_to: Destination,
    /// Seconds between two publisher ticks.
    pub publish_interval_secs: u64,
    pub replacements_path: PathBuf,
    pub min_attachments: usize,
    pub max_attachments: usize,
    pub drain_order: DrainOrder,
    pub texts: Texts,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        let limits = AttachmentLimits::default();
        Self {
            admin_chat_id: 0,
            publish_to: Destination::default(),
            publish_interval_secs: 3600,
            replacements_path: PathBuf::from("replacements.json"),
            min_attachments: limits.min,
            max_attachments: limits.max,
            drain_order: DrainOrder::default(),
            texts: Texts::default(),
        }
    }
}

impl IntakeConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn attachment_limits(&self) -> AttachmentLimits {
        AttachmentLimits {
            min: self.min_attachments,
            max: self.max_attachments,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let cfg: IntakeConfig = toml::from_str(
            r#"
            admin_chat_id = -1001
            publish_to = "@market"
            drain_order = "fifo"

            [texts]
            entry_button = "Sell"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.admin_chat_id, -1001);
        assert_eq!(cfg.publish_to, Destination::Channel("@market".into()));
        assert_eq!(cfg.drain_order, DrainOrder::Fifo);
        assert_eq!(cfg.publish_interval(), Duration::from_secs(3600));
        assert_eq!(cfg.attachment_limits(), AttachmentLimits { min: 1, max: 3 });
        assert_eq!(cfg.texts.entry_button, "Sell");
        assert_eq!(cfg.texts.cancel_button, "Cancel");
    }

    #[test]
    fn numeric_destination_is_a_chat() {
        let cfg: IntakeConfig = toml::from_str("publish_to = -100200").unwrap();
        assert_eq!(cfg.publish_to, Destination::Chat(-100_200));
    }
}
