//! Best-effort alert delivery

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::models::alert::Alert;
use crate::notify::config::NotificationConfig;
use crate::notify::senders::{AlertSender, SenderFactory};

/// Fans every alert out to all configured channels. Delivery failures are
/// logged and never reach the caller.
pub struct NotificationDispatcher {
    senders: Vec<Box<dyn AlertSender>>,
}

impl NotificationDispatcher {
    /// Build the dispatcher for one run
    pub fn initialize(config: &NotificationConfig, factory: &dyn SenderFactory) -> Self {
        let senders = factory.build(config);

        if senders.is_empty() {
            warn!("No notification channels configured; alerts will not be sent");
        } else {
            let channels: Vec<&str> = senders.iter().map(|s| s.channel()).collect();
            info!("Notification channels: {}", channels.join(", "));
        }

        Self { senders }
    }

    /// Attempt delivery on every channel concurrently. Returns how many
    /// channels accepted the alert.
    pub async fn send(&self, alert: &Alert) -> usize {
        if self.senders.is_empty() {
            debug!("Skipping alert '{}': no channels", alert.title);
            return 0;
        }

        let results = join_all(self.senders.iter().map(|sender| async move {
            (sender.channel(), sender.send(alert).await)
        }))
        .await;

        let mut delivered = 0;
        for (channel, result) in results {
            match result {
                Ok(()) => {
                    debug!(channel = channel, "Alert '{}' delivered", alert.title);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(channel = channel, "Failed to deliver alert '{}': {}", alert.title, e);
                }
            }
        }
        delivered
    }
}
