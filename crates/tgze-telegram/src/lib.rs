//! Telegram adapter (teloxide).
//!
//! This crate implements the `tgze-core` ChatTransport over Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::{debug, warn};

mod convert;
pub mod router;

use tgze_core::{
    domain::{ChatId, ChatInfo, ChatMemberInfo, MessageId, MessageRef, Update, UserId},
    errors::Error,
    ports::{AudioUpload, ChatTransport, VideoUpload},
    Result,
};

/// Telegram refuses thumbnails above this size.
const MAX_THUMBNAIL_BYTES: usize = 200 << 10;

/// Whole-request limit for bot calls; uploads of the largest allowed file
/// go through the same client.
const BOT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// teloxide's client settings, minus its 17 s request timeout.
fn bot_client() -> Result<reqwest::Client> {
    teloxide::net::default_reqwest_settings()
        .timeout(BOT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("telegram bot client: {e}")))
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramTransport {
    /// `api_base` is the Bot API root, e.g. `https://api.telegram.org`.
    pub fn new(token: &str, api_base: &str) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_string();
        let url = reqwest::Url::parse(&format!("{api_base}/"))
            .map_err(|e| Error::Config(format!("TgApiUrlBase `{api_base}`: {e}")))?;
        let bot = Bot::with_client(token, bot_client()?).set_api_url(url);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("telegram http client: {e}")))?;
        Ok(Self {
            bot,
            http,
            api_base,
            token: token.to_string(),
        })
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn msg_ref(msg: &Message) -> MessageRef {
        MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        }
    }

    fn map_err(e: RequestError) -> Error {
        match e {
            RequestError::Api(ApiError::ChatNotFound) => {
                Error::NotFound("telegram: chat not found".to_string())
            }
            RequestError::Api(ApiError::Unknown(ref m)) if m.contains("chat not found") => {
                Error::NotFound(format!("telegram: {m}"))
            }
            RequestError::Network(e) => Error::Transport(format!("telegram network error: {e}")),
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        warn!(retry_after = ?d, "telegram rate limit");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    /// Best-effort: a missing or oversized thumbnail only costs the preview.
    async fn thumbnail(&self, url: Option<&str>) -> Option<InputFile> {
        let url = url.filter(|u| !u.is_empty())?;
        let resp = match self.http.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(url, status = %r.status(), "thumbnail fetch");
                return None;
            }
            Err(e) => {
                warn!(url, "thumbnail fetch: {e}");
                return None;
            }
        };
        match resp.bytes().await {
            Ok(b) if b.len() <= MAX_THUMBNAIL_BYTES => {
                Some(InputFile::memory(b.to_vec()).file_name("thumb.jpg"))
            }
            Ok(b) => {
                debug!(url, bytes = b.len(), "thumbnail too large, skipping");
                None
            }
            Err(e) => {
                warn!(url, "thumbnail body: {e}");
                None
            }
        }
    }
}

fn secs(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let offset = i32::try_from(offset)
            .map_err(|_| Error::Transport(format!("update offset {offset} out of range")))?;
        let updates = self
            .with_retry(|| self.bot.get_updates().offset(offset))
            .await?;
        Ok(updates.into_iter().map(convert::update).collect())
    }

    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true);
                if let Some(id) = reply_to {
                    req = req.reply_to_message_id(Self::tg_msg_id(id));
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(&msg))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    /// teloxide 0.12 predates reactions, so this posts the method directly.
    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        let url = format!("{}/bot{}/setMessageReaction", self.api_base, self.token);
        let body = serde_json::json!({
            "chat_id": msg.chat_id.0,
            "message_id": msg.message_id.0,
            "reaction": [{"type": "emoji", "emoji": emoji}],
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("setMessageReaction: {}", e.without_url())))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "setMessageReaction status {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn send_audio(&self, chat_id: ChatId, audio: AudioUpload) -> Result<MessageRef> {
        let thumb = self.thumbnail(audio.thumbnail_url.as_deref()).await;
        let file = InputFile::file(audio.path.clone());
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_audio(Self::tg_chat(chat_id), file.clone())
                    .caption(audio.caption.clone())
                    .performer(audio.performer.clone())
                    .title(audio.title.clone())
                    .duration(secs(audio.duration));
                if let Some(t) = &thumb {
                    req = req.thumb(t.clone());
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(&msg))
    }

    async fn send_video(&self, chat_id: ChatId, video: VideoUpload) -> Result<MessageRef> {
        let thumb = self.thumbnail(video.thumbnail_url.as_deref()).await;
        let file = InputFile::file(video.path.clone());
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_video(Self::tg_chat(chat_id), file.clone())
                    .caption(video.caption.clone())
                    .duration(secs(video.duration))
                    .supports_streaming(true);
                if let Some(w) = video.width {
                    req = req.width(w);
                }
                if let Some(h) = video.height {
                    req = req.height(h);
                }
                if let Some(t) = &thumb {
                    req = req.thumb(t.clone());
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(&msg))
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo> {
        let chat = self
            .with_retry(|| self.bot.get_chat(Self::tg_chat(chat_id)))
            .await?;
        Ok(convert::chat(&chat))
    }

    async fn get_chat_administrators(&self, chat_id: ChatId) -> Result<Vec<ChatMemberInfo>> {
        let admins = self
            .with_retry(|| self.bot.get_chat_administrators(Self::tg_chat(chat_id)))
            .await?;
        Ok(admins.iter().map(convert::member).collect())
    }

    async fn promote_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let user = teloxide::types::UserId(user_id.0 as u64);
        self.with_retry(|| {
            self.bot
                .promote_chat_member(Self::tg_chat(chat_id), user)
                .can_manage_chat(true)
                .can_post_messages(true)
                .can_edit_messages(true)
                .can_delete_messages(true)
                .can_invite_users(true)
                .can_promote_members(true)
        })
        .await?;
        Ok(())
    }
}
