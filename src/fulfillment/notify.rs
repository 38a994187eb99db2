//! Customer notifications.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

pub const SUBJECT: &str = "Your photos";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// The "your photos are ready" message pointing at an archive link.
    pub fn archive_ready(from: &str, to: &str, link: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: SUBJECT.to_string(),
            body: format!(
                "Thank you for your purchase!\n\n\
                 Your photos are ready to download here:\n{link}\n"
            ),
        }
    }
}

/// Outbound mail delivery. Failures are reported once and never retried.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Mailer that records each notification in the log instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_ready_carries_link() {
        let n = Notification::archive_ready("shop@x", "client@y", "http://x/media/zips/a.zip");
        assert_eq!(n.subject, "Your photos");
        assert_eq!(n.to, "client@y");
        assert!(n.body.contains("http://x/media/zips/a.zip"));
    }

    #[tokio::test]
    async fn tracing_mailer_accepts() {
        let n = Notification::archive_ready("a", "b", "c");
        TracingMailer.send(&n).await.unwrap();
    }
}
