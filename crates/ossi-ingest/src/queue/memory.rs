//! In-memory notification queue
//!
//! Received messages stay in flight until acknowledged; [`MemoryQueue::redeliver`]
//! makes unacknowledged ones visible again, the way a visibility timeout
//! would.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::NotificationQueue;
use crate::error::{IngestError, Result};
use crate::notification::NotificationMessage;

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<NotificationMessage>,
    in_flight: Vec<NotificationMessage>,
    acknowledged: Vec<String>,
    receives: usize,
    next_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| IngestError::queue("memory queue lock poisoned"))
    }

    /// Enqueue a message body; returns its receipt handle.
    pub fn publish(&self, body: impl Into<String>) -> Result<String> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        let handle = format!("receipt-{id}");
        state.visible.push_back(NotificationMessage {
            message_id: format!("message-{id}"),
            receipt_handle: handle.clone(),
            body: body.into(),
            dequeue_count: 0,
        });
        Ok(handle)
    }

    /// Move unacknowledged in-flight messages back to the queue.
    pub fn redeliver(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let pending: Vec<_> = state.in_flight.drain(..).collect();
        let count = pending.len();
        state.visible.extend(pending);
        Ok(count)
    }

    /// Receipt handles acknowledged so far, in order
    pub fn acknowledged(&self) -> Vec<String> {
        self.lock().map(|s| s.acknowledged.clone()).unwrap_or_default()
    }

    pub fn visible_len(&self) -> usize {
        self.lock().map(|s| s.visible.len()).unwrap_or_default()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or_default()
    }

    /// Number of receive calls, including empty ones
    pub fn receive_calls(&self) -> usize {
        self.lock().map(|s| s.receives).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn receive(&self, _wait: Option<Duration>) -> Result<Option<NotificationMessage>> {
        let mut state = self.lock()?;
        state.receives += 1;

        let Some(mut message) = state.visible.pop_front() else {
            return Ok(None);
        };
        message.dequeue_count += 1;
        state.in_flight.push(message.clone());
        Ok(Some(message))
    }

    async fn acknowledge(&self, message: &NotificationMessage) -> Result<()> {
        let mut state = self.lock()?;
        let position = state
            .in_flight
            .iter()
            .position(|m| m.receipt_handle == message.receipt_handle)
            .ok_or_else(|| {
                IngestError::queue(format!("unknown receipt handle {}", message.receipt_handle))
            })?;
        state.in_flight.remove(position);
        state.acknowledged.push(message.receipt_handle.clone());
        Ok(())
    }
}
