use std::{sync::Arc, time::Duration};

use crate::{
    domain::{GroupDescriptor, RecipientId},
    errors::Error,
    messaging::port::MessagingPort,
    Result,
};

/// MessagingPort decorator that bounds the wait for a transport acknowledgement.
///
/// An ack that never arrives would otherwise stall the inbound event that is
/// waiting on it, and with it every event queued behind. Timeouts surface as
/// `SendFailed` so callers treat them like any other failed send.
pub struct TimeoutMessenger {
    inner: Arc<dyn MessagingPort>,
    timeout: Duration,
}

impl TimeoutMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl MessagingPort for TimeoutMessenger {
    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.inner.send_text(to, text)).await {
            Ok(res) => res,
            Err(_) => Err(Error::send_failed(
                to,
                format!("no acknowledgement within {:?}", self.timeout),
            )),
        }
    }

    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
        match tokio::time::timeout(self.timeout, self.inner.list_groups()).await {
            Ok(res) => res,
            Err(_) => Err(Error::External(format!(
                "group listing timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait::async_trait]
    impl MessagingPort for Stalled {
        async fn send_text(&self, _to: &RecipientId, _text: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
            std::future::pending().await
        }
    }

    struct Refusing;

    #[async_trait::async_trait]
    impl MessagingPort for Refusing {
        async fn send_text(&self, _to: &RecipientId, _text: &str) -> Result<()> {
            Err(Error::NotConnected)
        }

        async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn stalled_send_becomes_send_failed() {
        let m = TimeoutMessenger::new(Arc::new(Stalled), Duration::from_millis(10));
        let to = RecipientId::new("a@s.whatsapp.net").unwrap();

        let err = m.send_text(&to, "hi").await.unwrap_err();
        match err {
            Error::SendFailed { recipient, .. } => assert_eq!(recipient, to),
            other => panic!("expected SendFailed, got {other:?}"),
        }
        assert!(m.list_groups().await.is_err());
    }

    #[tokio::test]
    async fn inner_errors_pass_through_unchanged() {
        let m = TimeoutMessenger::new(Arc::new(Refusing), Duration::from_secs(5));
        let to = RecipientId::new("a@s.whatsapp.net").unwrap();

        assert!(matches!(
            m.send_text(&to, "hi").await,
            Err(Error::NotConnected)
        ));
        assert!(m.list_groups().await.unwrap().is_empty());
    }
}
