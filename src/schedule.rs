//! Timers owned by views.
//!
//! A `ScheduledTask` runs its callback on the tokio runtime and is torn down
//! when cancelled or dropped, so a view that goes away takes its timers with
//! it.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::logging::log_timer;

pub const TYPEWRITER_TICK: Duration = Duration::from_millis(35);
pub const REPLY_DELAY: Duration = Duration::from_millis(1000);

pub struct ScheduledTask {
    name: &'static str,
    delay: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `f` once after `delay`.
    pub fn after<F>(name: &'static str, delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        log_timer(name, "scheduled", delay.as_millis() as u64);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
            log_timer(name, "fired", delay.as_millis() as u64);
        });
        Self { name, delay, handle: Some(handle) }
    }

    /// Run `f` every `period`, first after one period, until it returns false.
    pub fn every<F>(name: &'static str, period: Duration, mut f: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        log_timer(name, "scheduled", period.as_millis() as u64);
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if !f() {
                    break;
                }
            }
            log_timer(name, "fired", period.as_millis() as u64);
        });
        Self { name, delay: period, handle: Some(handle) }
    }

    /// Stop the task. Returns false when it had already finished.
    pub fn cancel(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        let live = !handle.is_finished();
        handle.abort();
        if live {
            log_timer(self.name, "cancelled", self.delay.as_millis() as u64);
        }
        live
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Reveals a text one character per tick.
pub struct Typewriter {
    full: String,
    rx: watch::Receiver<String>,
    _task: ScheduledTask,
}

impl Typewriter {
    pub fn start(text: &str) -> Self {
        Self::with_tick(text, TYPEWRITER_TICK)
    }

    pub fn with_tick(text: &str, tick: Duration) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let (tx, rx) = watch::channel(String::new());
        let mut shown = 0usize;
        let task = ScheduledTask::every("typewriter", tick, move || {
            if shown >= chars.len() {
                return false;
            }
            shown += 1;
            tx.send_replace(chars[..shown].iter().collect());
            shown < chars.len()
        });
        Self { full: text.to_string(), rx, _task: task }
    }

    pub fn shown(&self) -> String {
        self.rx.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow() == self.full
    }

    /// Wait for the full text. Returns what was shown if the task stopped
    /// early.
    pub async fn finished(&mut self) -> String {
        let full = self.full.clone();
        let done = match self.rx.wait_for(|s| *s == full).await {
            Ok(s) => Some(s.clone()),
            Err(_) => None,
        };
        done.unwrap_or_else(|| self.shown())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Append an assistant message to `log` after `delay`.
pub fn delayed_reply(
    log: Arc<watch::Sender<Vec<ChatMessage>>>,
    content: String,
    delay: Duration,
) -> ScheduledTask {
    ScheduledTask::after("chat_reply", delay, move || {
        log.send_modify(|messages| messages.push(ChatMessage { role: Role::Assistant, content }));
    })
}

/// Assistant panel: user turns are appended at once, answers after a delay.
pub struct Chat {
    log: Arc<watch::Sender<Vec<ChatMessage>>>,
    reply: String,
    pending: Vec<ScheduledTask>,
}

impl Chat {
    pub fn new(greeting: &str, reply: &str) -> Self {
        let greeting = ChatMessage { role: Role::Assistant, content: greeting.to_string() };
        let (tx, _) = watch::channel(vec![greeting]);
        Self { log: Arc::new(tx), reply: reply.to_string(), pending: Vec::new() }
    }

    /// Blank input is ignored.
    pub fn send(&mut self, input: &str) -> bool {
        if input.trim().is_empty() {
            return false;
        }
        self.pending.retain(|t| !t.is_finished());
        let user = ChatMessage { role: Role::User, content: input.to_string() };
        self.log.send_modify(|messages| messages.push(user));
        self.pending.push(delayed_reply(self.log.clone(), self.reply.clone(), REPLY_DELAY));
        true
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.log.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.log.subscribe()
    }

    pub fn pending_replies(&self) -> usize {
        self.pending.iter().filter(|t| !t.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let task = ScheduledTask::after("t", Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let task = ScheduledTask::after("t", Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typewriter_reveals_and_stops() {
        let mut tw = Typewriter::start("Grid");
        assert_eq!(tw.shown(), "");
        tokio::time::sleep(Duration::from_millis(36)).await;
        assert_eq!(tw.shown(), "G");
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(tw.shown(), "Gr");
        assert_eq!(tw.finished().await, "Grid");
        assert!(tw.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_reply_after_delay() {
        let mut chat = Chat::new("Hello!", "Load is normal.");
        assert!(!chat.send("  "));
        assert!(chat.send("How is load?"));
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.pending_replies(), 1);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(chat.messages().len(), 2);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let messages = chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "Load is normal.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_chat_drops_pending_reply() {
        let mut chat = Chat::new("Hello!", "late");
        let rx = chat.subscribe();
        chat.send("hi");
        drop(chat);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.borrow().len(), 2);
    }
}
