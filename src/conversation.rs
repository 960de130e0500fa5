//! Waiting for the next message of a given user in a given chat.
//!
//! A flow registers a waiter and awaits it from a spawned task; the
//! dispatcher offers every incoming message to [`InputWaiter::offer`] before
//! command routing, and a consumed message goes no further.

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    /// a newer wait for the same chat and user took over
    Replaced,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::TimedOut => write!(f, "timed out waiting for input"),
            WaitError::Replaced => write!(f, "wait replaced by a newer one"),
        }
    }
}

impl std::error::Error for WaitError {}

type WaitKey = (i64, i64);

pub struct InputWaiter<T> {
    pending: Mutex<HashMap<WaitKey, oneshot::Sender<T>>>,
}

impl<T> Default for InputWaiter<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Send + 'static> InputWaiter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// resolves with the next value offered for (chat, user) or times out
    pub async fn wait_for_input(&self, chat_id: i64, user_id: i64, timeout: Duration) -> Result<T, WaitError> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert((chat_id, user_id), tx);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Replaced),
            Err(_) => {
                self.remove_if_closed(chat_id, user_id);
                Err(WaitError::TimedOut)
            }
        }
    }

    /// true when someone is waiting on (chat, user)
    pub fn is_waiting(&self, chat_id: i64, user_id: i64) -> bool {
        self.pending
            .lock()
            .map(|pending| {
                pending
                    .get(&(chat_id, user_id))
                    .is_some_and(|tx| !tx.is_closed())
            })
            .unwrap_or(false)
    }

    /// hands the value to a waiting flow; gives it back when nobody is waiting
    pub fn offer(&self, chat_id: i64, user_id: i64, value: T) -> Result<(), T> {
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&(chat_id, user_id)),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                debug!("Delivering input for chat {} user {}", chat_id, user_id);
                tx.send(value)
            }
            None => Err(value),
        }
    }

    fn remove_if_closed(&self, chat_id: i64, user_id: i64) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending
                .get(&(chat_id, user_id))
                .is_some_and(|tx| tx.is_closed())
            {
                pending.remove(&(chat_id, user_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_offer_resolves_wait() {
        let waiter = Arc::new(InputWaiter::<String>::new());
        let task = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait_for_input(1, 2, Duration::from_secs(5)).await })
        };

        while !waiter.is_waiting(1, 2) {
            tokio::task::yield_now().await;
        }
        assert_eq!(waiter.offer(1, 3, "other user".to_string()), Err("other user".to_string()));
        assert!(waiter.offer(1, 2, "hello".to_string()).is_ok());
        assert_eq!(task.await.unwrap(), Ok("hello".to_string()));
        assert!(!waiter.is_waiting(1, 2));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let waiter = InputWaiter::<String>::new();
        let result = waiter.wait_for_input(1, 2, Duration::from_millis(20)).await;
        assert_eq!(result, Err(WaitError::TimedOut));
        assert!(!waiter.is_waiting(1, 2));
        assert_eq!(waiter.offer(1, 2, "late".to_string()), Err("late".to_string()));
    }

    #[tokio::test]
    async fn test_newer_wait_replaces_older() {
        let waiter = Arc::new(InputWaiter::<String>::new());
        let first = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait_for_input(1, 2, Duration::from_secs(5)).await })
        };
        while !waiter.is_waiting(1, 2) {
            tokio::task::yield_now().await;
        }

        let second = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait_for_input(1, 2, Duration::from_secs(5)).await })
        };

        assert_eq!(first.await.unwrap(), Err(WaitError::Replaced));
        while !waiter.is_waiting(1, 2) {
            tokio::task::yield_now().await;
        }
        assert!(waiter.offer(1, 2, "second".to_string()).is_ok());
        assert_eq!(second.await.unwrap(), Ok("second".to_string()));
    }
}
