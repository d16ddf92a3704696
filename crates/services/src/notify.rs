use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use course_core::model::{LearnerId, MessageRef};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NotifyError;

//
// ─── GATEWAY CONTRACT ──────────────────────────────────────────────────────────
//

/// Abstract delivery capability of the chat transport.
///
/// The engine only ever needs to deliver a lesson, deliver a question with
/// selectable options, post a plain notice, and withdraw a previously
/// delivered lesson message. Everything else about the transport stays on
/// the other side of this trait.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver lesson content; returns a handle for later withdrawal.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the transport refuses or the call fails.
    async fn send_lesson(
        &self,
        learner: LearnerId,
        lesson: u32,
        content: &str,
    ) -> Result<MessageRef, NotifyError>;

    /// Deliver a question with its selectable options.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the transport refuses or the call fails.
    async fn send_question(
        &self,
        learner: LearnerId,
        lesson: u32,
        question: &str,
        options: &[String],
    ) -> Result<(), NotifyError>;

    /// Deliver a plain text notice (completion, exam score, wait state).
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the transport refuses or the call fails.
    async fn send_notice(&self, learner: LearnerId, text: &str) -> Result<(), NotifyError>;

    /// Withdraw a previously delivered message. Callers treat this as
    /// best-effort and only log failures.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the transport refuses or the call fails.
    async fn withdraw(&self, learner: LearnerId, message: &MessageRef) -> Result<(), NotifyError>;
}

//
// ─── BOT API GATEWAY ───────────────────────────────────────────────────────────
//

#[derive(Clone, Debug)]
pub struct BotApiConfig {
    pub api_url: String,
    pub token: String,
}

impl BotApiConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let token = env::var("COURSE_BOT_TOKEN").ok()?;
        if token.trim().is_empty() {
            return None;
        }
        let api_url = env::var("COURSE_BOT_API_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".into());
        Some(Self { api_url, token })
    }
}

#[derive(Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Serialize)]
struct ReplyMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineButton<'a>>>,
}

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: u64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup<'a>>,
}

#[derive(Serialize)]
struct DeleteMessagePayload {
    chat_id: u64,
    message_id: i64,
}

#[derive(Deserialize)]
struct SentMessageBody {
    message_id: i64,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessageBody>,
}

/// Bot-API adapter for a Telegram-shaped chat transport.
#[derive(Clone)]
pub struct BotApiGateway {
    client: Client,
    config: BotApiConfig,
}

impl BotApiGateway {
    /// Build a gateway with a bounded request timeout.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Http` if the HTTP client cannot be constructed.
    pub fn new(config: BotApiConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_url.trim_end_matches('/'),
            self.config.token
        )
    }

    async fn call(&self, method: &str, payload: &impl Serialize) -> Result<ApiResponse, NotifyError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status()));
        }

        let body: ApiResponse = response.json().await?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.description.unwrap_or_else(|| "no description".into()),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl NotificationGateway for BotApiGateway {
    async fn send_lesson(
        &self,
        learner: LearnerId,
        lesson: u32,
        content: &str,
    ) -> Result<MessageRef, NotifyError> {
        let text = format!("Lesson {lesson}\n\n{content}");
        let payload = SendMessagePayload {
            chat_id: learner.value(),
            text: &text,
            reply_markup: None,
        };
        let body = self.call("sendMessage", &payload).await?;
        let message_id = body
            .result
            .map(|m| m.message_id)
            .ok_or_else(|| NotifyError::Rejected("sendMessage returned no message".into()))?;
        Ok(MessageRef::new(message_id.to_string()))
    }

    async fn send_question(
        &self,
        learner: LearnerId,
        lesson: u32,
        question: &str,
        options: &[String],
    ) -> Result<(), NotifyError> {
        let text = format!("Question for lesson {lesson}\n\n{question}");
        let keyboard: Vec<Vec<InlineButton<'_>>> = options
            .iter()
            .map(|option| {
                vec![InlineButton {
                    text: option,
                    callback_data: option,
                }]
            })
            .collect();
        let payload = SendMessagePayload {
            chat_id: learner.value(),
            text: &text,
            reply_markup: (!keyboard.is_empty()).then_some(ReplyMarkup {
                inline_keyboard: keyboard,
            }),
        };
        self.call("sendMessage", &payload).await?;
        Ok(())
    }

    async fn send_notice(&self, learner: LearnerId, text: &str) -> Result<(), NotifyError> {
        let payload = SendMessagePayload {
            chat_id: learner.value(),
            text,
            reply_markup: None,
        };
        self.call("sendMessage", &payload).await?;
        Ok(())
    }

    async fn withdraw(&self, learner: LearnerId, message: &MessageRef) -> Result<(), NotifyError> {
        let message_id: i64 = message
            .as_str()
            .parse()
            .map_err(|_| NotifyError::Rejected(format!("bad message ref: {message}")))?;
        let payload = DeleteMessagePayload {
            chat_id: learner.value(),
            message_id,
        };
        self.call("deleteMessage", &payload).await?;
        debug!(learner = %learner, message = %message, "withdrew lesson message");
        Ok(())
    }
}

//
// ─── RECORDING GATEWAY ─────────────────────────────────────────────────────────
//

/// Everything a recording gateway has delivered, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    Lesson {
        learner: LearnerId,
        lesson: u32,
        content: String,
    },
    Question {
        learner: LearnerId,
        lesson: u32,
        question: String,
        options: Vec<String>,
    },
    Notice {
        learner: LearnerId,
        text: String,
    },
    Withdrawn {
        learner: LearnerId,
        message: MessageRef,
    },
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<SentNotification>,
    failing: bool,
    next_ref: u64,
}

/// In-process gateway that records every call. Used by tests and by the
/// daemon when no transport credentials are configured.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries recorded so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.state.lock().expect("recording lock").sent.clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.state.lock().expect("recording lock").sent.len()
    }

    /// Make every subsequent delivery fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().expect("recording lock").failing = failing;
    }

    fn record(&self, notification: SentNotification) -> Result<u64, NotifyError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| NotifyError::Rejected(e.to_string()))?;
        if state.failing {
            return Err(NotifyError::Rejected("injected delivery failure".into()));
        }
        state.next_ref += 1;
        let assigned = state.next_ref;
        state.sent.push(notification);
        Ok(assigned)
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send_lesson(
        &self,
        learner: LearnerId,
        lesson: u32,
        content: &str,
    ) -> Result<MessageRef, NotifyError> {
        let assigned = self.record(SentNotification::Lesson {
            learner,
            lesson,
            content: content.to_owned(),
        })?;
        Ok(MessageRef::new(assigned.to_string()))
    }

    async fn send_question(
        &self,
        learner: LearnerId,
        lesson: u32,
        question: &str,
        options: &[String],
    ) -> Result<(), NotifyError> {
        self.record(SentNotification::Question {
            learner,
            lesson,
            question: question.to_owned(),
            options: options.to_vec(),
        })?;
        Ok(())
    }

    async fn send_notice(&self, learner: LearnerId, text: &str) -> Result<(), NotifyError> {
        self.record(SentNotification::Notice {
            learner,
            text: text.to_owned(),
        })?;
        Ok(())
    }

    async fn withdraw(&self, learner: LearnerId, message: &MessageRef) -> Result<(), NotifyError> {
        self.record(SentNotification::Withdrawn {
            learner,
            message: message.clone(),
        })?;
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_gateway_logs_deliveries_in_order() {
        let gateway = RecordingGateway::new();
        let learner = LearnerId::new(1);

        let message = gateway.send_lesson(learner, 1, "content").await.unwrap();
        gateway
            .send_question(learner, 1, "q?", &["a".into(), "b".into()])
            .await
            .unwrap();
        gateway.withdraw(learner, &message).await.unwrap();

        let sent = gateway.sent();
        assert_eq!(sent.len(), 3);
        assert!(matches!(sent[0], SentNotification::Lesson { lesson: 1, .. }));
        assert!(matches!(
            sent[2],
            SentNotification::Withdrawn { .. }
        ));
    }

    #[tokio::test]
    async fn recording_gateway_injects_failures() {
        let gateway = RecordingGateway::new();
        gateway.set_failing(true);

        let err = gateway
            .send_notice(LearnerId::new(1), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(_)));
        assert_eq!(gateway.sent_count(), 0);

        gateway.set_failing(false);
        gateway.send_notice(LearnerId::new(1), "hello").await.unwrap();
        assert_eq!(gateway.sent_count(), 1);
    }

    #[test]
    fn bot_api_url_shape() {
        let gateway = BotApiGateway::new(BotApiConfig {
            api_url: "https://api.telegram.org/".into(),
            token: "123:abc".into(),
        })
        .unwrap();
        assert_eq!(
            gateway.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
