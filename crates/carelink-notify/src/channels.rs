use tracing::warn;

use carelink_types::api::ReminderChannel;

/// Outbound notification senders. Each channel is a configured webhook; a
/// send is fire-and-forget and reports only a boolean outcome.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    email_url: Option<String>,
    sms_url: Option<String>,
    whatsapp_url: Option<String>,
}

impl Notifier {
    pub fn new(
        email_url: Option<String>,
        sms_url: Option<String>,
        whatsapp_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            email_url,
            sms_url,
            whatsapp_url,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None, None)
    }

    /// Deliver `body` to `recipient` over the given channel. Returns false on
    /// any failure, including an unconfigured channel.
    pub async fn send(&self, channel: ReminderChannel, recipient: &str, body: &str) -> bool {
        let url = match channel {
            ReminderChannel::Email => &self.email_url,
            ReminderChannel::Sms => &self.sms_url,
            ReminderChannel::Whatsapp => &self.whatsapp_url,
        };

        let Some(url) = url else {
            warn!("{} channel not configured, dropping notification", channel.as_str());
            return false;
        };

        let payload = serde_json::json!({ "to": recipient, "body": body });
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("{} send to {} returned {}", channel.as_str(), recipient, resp.status());
                false
            }
            Err(e) => {
                warn!("{} send to {} failed: {}", channel.as_str(), recipient, e);
                false
            }
        }
    }
}
