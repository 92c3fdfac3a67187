//! User and operator notifications for auto-completed deposits.
//!
//! All sends and edits are best-effort: failures are logged and never
//! propagated into the reconcile loop.

use async_trait::async_trait;
use rust_decimal::Decimal;
use teloxide::prelude::*;
use teloxide::types::MessageId;

/// Notification seam used by the confirmation orchestrator. The mailbox
/// watcher itself has no teloxide dependency beyond this trait's
/// `TelegramNotifier` implementation.
#[async_trait]
pub trait DepositNotifier: Send + Sync {
    /// Tell the user their deposit was credited.
    async fn notify_deposit_completed(&self, user_id: i64, amount: Decimal, elapsed_secs: i64);

    /// Update the operator-facing request message with an auto-completed
    /// badge.
    async fn edit_operator_message(&self, chat_id: i64, message_id: i64, text: &str);
}

/// Message shown to the user after auto-completion.
pub fn format_completed_user_message(amount: Decimal, elapsed_secs: i64) -> String {
    format!(
        "✅ Платёж получен!\n\nСумма {} сом зачислена на ваш игровой счёт.\nВремя обработки: {} сек.",
        amount, elapsed_secs
    )
}

/// Badge appended to the operator message after auto-completion.
pub fn format_operator_badge(amount: Decimal, elapsed_secs: i64) -> String {
    format!("🤖 Авто-зачисление: {} сом за {} сек.", amount, elapsed_secs)
}

/// teloxide-backed notifier.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DepositNotifier for TelegramNotifier {
    async fn notify_deposit_completed(&self, user_id: i64, amount: Decimal, elapsed_secs: i64) {
        let text = format_completed_user_message(amount, elapsed_secs);
        if let Err(e) = self.bot.send_message(ChatId(user_id), text).await {
            log::error!("Failed to notify user {} about completed deposit: {}", user_id, e);
        }
    }

    async fn edit_operator_message(&self, chat_id: i64, message_id: i64, text: &str) {
        let chat = ChatId(chat_id);
        let msg = MessageId(message_id as i32);

        // Request messages usually carry the requisite card as a photo, so
        // the caption edit is tried first; plain-text messages have no
        // caption and need the text edit instead.
        let caption_result = self
            .bot
            .edit_message_caption(chat, msg)
            .caption(text.to_string())
            .await;

        if let Err(caption_err) = caption_result {
            if let Err(text_err) = self.bot.edit_message_text(chat, msg, text.to_string()).await {
                log::error!(
                    "Failed to edit operator message {}/{}: caption: {}; text: {}",
                    chat_id,
                    message_id,
                    caption_err,
                    text_err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn user_message_contains_amount_and_elapsed() {
        let text = format_completed_user_message(dec!(503.37), 74);
        assert!(text.contains("503.37"), "amount must be shown: {text}");
        assert!(text.contains("74"), "elapsed seconds must be shown: {text}");
    }

    #[test]
    fn operator_badge_contains_amount_and_elapsed() {
        let text = format_operator_badge(dec!(100.00), 5);
        assert!(text.contains("100.00"));
        assert!(text.contains("5"));
        assert!(text.contains("Авто"), "badge must be visibly automatic: {text}");
    }
}
