//! Landing headline and market assistant. No backend queries; both parts run
//! on timers owned by the page, so dropping the page stops them.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::query::{Fingerprint, QueryCache};
use crate::schedule::{Chat, ChatMessage, Typewriter};

use super::Page;

pub const VIEW: &str = "assistant";

pub const HEADLINE: &str = "Hello, I'm VOLT. Your intelligent ERCOT market analytics platform.";

const GREETING: &str = "Hello! I'm your ERCOT market assistant. Ask me about load forecasts, \
                        prices, weather impacts, or market patterns.";

const CANNED_REPLY: &str = "Based on current conditions, ERCOT system load is at 55,700 MW \
                            with all zones operating normally. The South zone shows slightly \
                            elevated prices due to transmission congestion. Weather forecast \
                            indicates temperatures will remain above 80°F through the week, \
                            supporting continued high demand.";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssistantView {
    pub headline: String,
    pub headline_done: bool,
    pub messages: Vec<ChatMessage>,
    pub awaiting_reply: bool,
}

pub struct AssistantPage {
    headline: Typewriter,
    chat: Chat,
}

impl Default for AssistantPage {
    fn default() -> Self {
        Self::new()
    }
}

impl AssistantPage {
    /// Starts the headline reveal; needs a running tokio runtime.
    pub fn new() -> Self {
        Self::with_headline(Typewriter::start(HEADLINE))
    }

    fn with_headline(headline: Typewriter) -> Self {
        Self { headline, chat: Chat::new(GREETING, CANNED_REPLY) }
    }

    pub fn send(&mut self, input: &str) -> bool {
        self.chat.send(input)
    }

    pub fn view(&self) -> AssistantView {
        AssistantView {
            headline: self.headline.shown(),
            headline_done: self.headline.is_done(),
            messages: self.chat.messages(),
            awaiting_reply: self.chat.pending_replies() > 0,
        }
    }
}

#[async_trait]
impl Page for AssistantPage {
    fn name(&self) -> &'static str {
        VIEW
    }

    fn sync(&mut self, _cache: &QueryCache) -> bool {
        false
    }

    async fn settle(&mut self) {}

    fn fingerprints(&self) -> Vec<Fingerprint> {
        Vec::new()
    }

    fn render(&mut self) -> Value {
        serde_json::to_value(self.view()).unwrap_or(Value::Null)
    }
}
