use std::sync::Arc;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
    pub invite_link: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub id: UserId,
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMemberInfo {
    pub user: UserInfo,
    pub status: String,
}

/// A message-like update payload (message, edit, channel post).
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub chat: ChatInfo,
    pub from: Option<UserInfo>,
    pub text: String,
}

impl IncomingMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.id,
        }
    }
}

/// The bot's own membership in a chat changed.
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub from: UserInfo,
    pub chat: ChatInfo,
    pub old_member: ChatMemberInfo,
    pub new_member: ChatMemberInfo,
}

#[derive(Clone, Debug)]
pub enum UpdateKind {
    Message(IncomingMessage),
    EditedMessage(IncomingMessage),
    ChannelPost(IncomingMessage),
    EditedChannelPost(IncomingMessage),
    MembershipChange(MembershipChange),
    /// Anything else; `raw` is the verbatim rendering of the payload.
    Unsupported { raw: String },
}

/// A discrete event delivered by the chat transport. Immutable once received.
#[derive(Clone, Debug)]
pub struct Update {
    pub id: i64,
    pub kind: UpdateKind,
}

/// Playlist context shared by every video of one playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistContext {
    pub id: String,
    pub title: String,
    pub size: usize,
}

/// A reference to one video, optionally positioned inside a playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoRef {
    pub id: String,
    pub position: Option<u32>,
    pub playlist: Option<Arc<PlaylistContext>>,
}

impl VideoRef {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: None,
            playlist: None,
        }
    }
}

/// Resolved playlist. Videos keep the order the API delivered them in.
#[derive(Clone, Debug)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub item_count: u32,
    pub videos: Vec<VideoRef>,
}

/// Requested delivery kind for a video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Metadata for one retrievable encoding of a video.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormatDescriptor {
    /// Source-specific format identifier.
    pub format_id: String,
    /// Bits per second.
    pub bitrate: u64,
    /// Container/codec tag, e.g. `audio/mp4; codecs="mp4a.40.2"`.
    pub mime_type: String,
    pub quality_label: Option<String>,
    pub audio_quality: Option<String>,
    pub audio_channels: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub content_length: Option<u64>,
    pub language: Option<String>,
    pub audio_track_role: Option<String>,
    pub url: String,
    pub http_headers: Vec<(String, String)>,
}

impl FormatDescriptor {
    pub fn has_audio(&self) -> bool {
        self.audio_channels.map(|c| c > 0).unwrap_or(false) || self.audio_quality.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub publish_date: Option<chrono::NaiveDate>,
    pub duration: std::time::Duration,
    pub thumbnail_url: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}
