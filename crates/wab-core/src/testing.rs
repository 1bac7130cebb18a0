//! Port fakes shared by the unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    domain::{GroupDescriptor, RecipientId},
    errors::Error,
    messaging::port::MessagingPort,
    Result,
};

#[derive(Default)]
pub struct FakeMessenger {
    calls: Mutex<usize>,
    sends: Mutex<Vec<(RecipientId, String)>>,
    failing_calls: Mutex<HashSet<usize>>,
    failing_recipients: Mutex<HashSet<RecipientId>>,
    groups: Mutex<Vec<GroupDescriptor>>,
}

impl FakeMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the `n`th send call (zero-based) with `NotConnected`.
    pub fn fail_call(&self, n: usize) {
        self.failing_calls.lock().unwrap().insert(n);
    }

    pub fn fail_recipient(&self, to: &RecipientId) {
        self.failing_recipients.lock().unwrap().insert(to.clone());
    }

    pub fn heal(&self) {
        self.failing_calls.lock().unwrap().clear();
        self.failing_recipients.lock().unwrap().clear();
    }

    pub fn set_groups(&self, groups: Vec<GroupDescriptor>) {
        *self.groups.lock().unwrap() = groups;
    }

    pub fn sent(&self) -> Vec<(RecipientId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &RecipientId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(r, _)| r == to)
            .map(|(_, t)| t)
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<()> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = *calls;
            *calls += 1;
            n
        };
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;

        if self.failing_calls.lock().unwrap().contains(&call) {
            return Err(Error::NotConnected);
        }
        if self.failing_recipients.lock().unwrap().contains(to) {
            return Err(Error::send_failed(to, "rejected by fake"));
        }
        self.sends
            .lock()
            .unwrap()
            .push((to.clone(), text.to_string()));
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
        Ok(self.groups.lock().unwrap().clone())
    }
}

pub fn rid(s: &str) -> RecipientId {
    RecipientId::new(s).unwrap()
}
