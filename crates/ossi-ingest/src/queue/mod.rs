//! Notification queue access
//!
//! [`NotificationQueue`] covers the two operations the scheduler needs:
//! receive one message and acknowledge (delete) it.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::notification::NotificationMessage;

pub mod memory;
pub mod mns;

pub use memory::MemoryQueue;
pub use mns::MnsClient;

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Wait up to `wait` (backend default when `None`) for one message.
    /// `Ok(None)` means no message was available.
    async fn receive(&self, wait: Option<Duration>) -> Result<Option<NotificationMessage>>;

    /// Delete a received message so it is not delivered again.
    async fn acknowledge(&self, message: &NotificationMessage) -> Result<()>;
}
