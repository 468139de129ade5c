use {
    hoarder_intake::IntakeConfig,
    hoarder_telegram::TelegramConfig,
    serde::{Deserialize, Serialize},
};

/// Root of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HoarderConfig {
    pub telegram: TelegramConfig,
    pub intake: IntakeConfig,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, hoarder_intake::Destination, secrecy::ExposeSecret};

    #[test]
    fn full_toml() {
        let cfg: HoarderConfig = toml::from_str(
            r#"
            [telegram]
            token = "123:ABC"
            poll_timeout_secs = 10

            [intake]
            admin_chat_id = -100200
            publish_to = "@market"
            publish_interval_secs = 600
            max_attachments = 5

            [intake.texts]
            entry_button = "Sell"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.telegram.token.expose_secret(), "123:ABC");
        assert_eq!(cfg.telegram.poll_timeout_secs, 10);
        assert_eq!(cfg.intake.admin_chat_id, -100_200);
        assert_eq!(cfg.intake.publish_to, Destination::Channel("@market".into()));
        assert_eq!(cfg.intake.max_attachments, 5);
        assert_eq!(cfg.intake.min_attachments, 1);
        assert_eq!(cfg.intake.texts.entry_button, "Sell");
        assert_eq!(cfg.intake.texts.cancel_button, "Cancel");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg: HoarderConfig = toml::from_str("").unwrap();
        assert!(cfg.telegram.token.expose_secret().is_empty());
        assert_eq!(cfg.intake.publish_interval_secs, 3600);
    }
}
