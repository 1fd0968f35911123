use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{
    domain::{
        ChatId, ChatInfo, ChatMemberInfo, FormatDescriptor, MessageId, MessageRef, Update,
        UserId, VideoInfo,
    },
    Result,
};

/// Audio upload with caption and player metadata.
#[derive(Clone, Debug)]
pub struct AudioUpload {
    pub path: PathBuf,
    pub caption: String,
    pub performer: String,
    pub title: String,
    pub duration: Duration,
    pub thumbnail_url: Option<String>,
}

/// Video upload with caption and dimensions.
#[derive(Clone, Debug)]
pub struct VideoUpload {
    pub path: PathBuf,
    pub caption: String,
    pub duration: Duration,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumbnail_url: Option<String>,
}

/// Hexagonal port for the chat transport (Telegram Bot API today).
///
/// Text is sent in HTML parse mode; callers escape user-visible content.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch updates with id >= `offset`.
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>>;

    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef>;
    async fn delete_message(&self, msg: MessageRef) -> Result<()>;
    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()>;

    async fn send_audio(&self, chat_id: ChatId, audio: AudioUpload) -> Result<MessageRef>;
    async fn send_video(&self, chat_id: ChatId, video: VideoUpload) -> Result<MessageRef>;

    /// Fails with `Error::NotFound` when the chat does not exist (anymore).
    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo>;
    async fn get_chat_administrators(&self, chat_id: ChatId) -> Result<Vec<ChatMemberInfo>>;
    async fn promote_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;
}

/// An open byte stream for one format.
pub struct MediaStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Size announced by the source, if any.
    pub size: Option<u64>,
}

/// Video metadata / stream extraction capability.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn video(&self, id: &str) -> Result<VideoInfo>;
    async fn open(&self, video: &VideoInfo, format: &FormatDescriptor) -> Result<MediaStream>;
}

/// One external re-encode, input file to output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// 0 = keep/omit video settings.
    pub video_bitrate_kbps: u64,
    /// 0 = keep/omit audio settings.
    pub audio_bitrate_kbps: u64,
}

/// External encoder. Runs to completion; success means the output file exists.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, req: &TranscodeRequest) -> Result<()>;
}
