//! Outbound delivery of reports. [EmailSender] is the only capability the scheduler needs,
//! [emailjs::EmailJsSender] is the production realization.

pub mod emailjs;

use anyhow::Result;
use async_trait::async_trait;

use crate::{daemon::storage::entities::DestinationConfig, report::Report};

/// Sends a composed report. An `Err` means the message was not accepted and may be retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, destination: &DestinationConfig, report: &Report) -> Result<()>;
}
