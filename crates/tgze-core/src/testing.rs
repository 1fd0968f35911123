//! In-memory port implementations for unit tests.

use std::{
    collections::HashMap,
    path::PathBuf,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
        Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::{
    domain::{
        ChatId, ChatInfo, ChatKind, ChatMemberInfo, FormatDescriptor, IncomingMessage, MessageId,
        MessageRef, Update, UpdateKind, UserId, UserInfo, VideoInfo,
    },
    errors::Error,
    playlist::{PlaylistApi, PlaylistItem, PlaylistItemsPage, PlaylistSummary},
    ports::{
        AudioUpload, ChatTransport, MediaStream, TranscodeRequest, Transcoder, VideoSource,
        VideoUpload,
    },
    state::StoreDocument,
    store::DocumentStore,
    Result,
};

/// Everything the fake transport was asked to do, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Html {
        chat_id: ChatId,
        html: String,
        reply_to: Option<MessageId>,
    },
    Deleted(MessageRef),
    Reaction(MessageRef),
    Audio {
        chat_id: ChatId,
        caption: String,
        performer: String,
        bytes: u64,
    },
    Video {
        chat_id: ChatId,
        caption: String,
        width: Option<u32>,
        height: Option<u32>,
        bytes: u64,
    },
    Promoted {
        chat_id: ChatId,
        user_id: UserId,
    },
}

#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<Sent>>,
    pub updates: Mutex<Vec<Update>>,
    pub offsets: Mutex<Vec<i64>>,
    pub poll_fails: AtomicBool,
    pub upload_fails: AtomicBool,
    /// Chats known to `get_chat`; anything else is "chat not found".
    pub chats: Mutex<HashMap<i64, ChatInfo>>,
    pub admins: Mutex<HashMap<i64, Vec<ChatMemberInfo>>>,
    /// Channels where promotion fails.
    pub promote_denied: Mutex<Vec<i64>>,
    /// Paths handed to uploads, to check cleanup afterwards.
    pub uploaded_paths: Mutex<Vec<PathBuf>>,
    next_message_id: AtomicI32,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn html_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Html { chat_id: c, html, .. } if c == chat_id => Some(html),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Audio { .. } | Sent::Video { .. }))
            .collect()
    }

    fn push(&self, s: Sent) {
        self.sent.lock().unwrap().push(s);
    }

    fn next_ref(&self, chat_id: ChatId) -> MessageRef {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1000;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    fn file_len(&self, path: &PathBuf) -> Result<u64> {
        self.uploaded_paths.lock().unwrap().push(path.clone());
        Ok(std::fs::metadata(path)?.len())
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.offsets.lock().unwrap().push(offset);
        if self.poll_fails.load(Ordering::SeqCst) {
            return Err(Error::Transport("poll failed".to_string()));
        }
        // Replays the whole queue regardless of offset, like an
        // at-least-once transport redelivering a batch.
        Ok(self.updates.lock().unwrap().clone())
    }

    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        self.push(Sent::Html {
            chat_id,
            html: html.to_string(),
            reply_to,
        });
        Ok(self.next_ref(chat_id))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.push(Sent::Deleted(msg));
        Ok(())
    }

    async fn set_reaction(&self, msg: MessageRef, _emoji: &str) -> Result<()> {
        self.push(Sent::Reaction(msg));
        Ok(())
    }

    async fn send_audio(&self, chat_id: ChatId, audio: AudioUpload) -> Result<MessageRef> {
        let bytes = self.file_len(&audio.path)?;
        if self.upload_fails.load(Ordering::SeqCst) {
            return Err(Error::Transport("upload rejected".to_string()));
        }
        self.push(Sent::Audio {
            chat_id,
            caption: audio.caption,
            performer: audio.performer,
            bytes,
        });
        Ok(self.next_ref(chat_id))
    }

    async fn send_video(&self, chat_id: ChatId, video: VideoUpload) -> Result<MessageRef> {
        let bytes = self.file_len(&video.path)?;
        if self.upload_fails.load(Ordering::SeqCst) {
            return Err(Error::Transport("upload rejected".to_string()));
        }
        self.push(Sent::Video {
            chat_id,
            caption: video.caption,
            width: video.width,
            height: video.height,
            bytes,
        });
        Ok(self.next_ref(chat_id))
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo> {
        self.chats
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chat {} not found", chat_id.0)))
    }

    async fn get_chat_administrators(&self, chat_id: ChatId) -> Result<Vec<ChatMemberInfo>> {
        Ok(self
            .admins
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn promote_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        if self.promote_denied.lock().unwrap().contains(&chat_id.0) {
            return Err(Error::Transport("not enough rights".to_string()));
        }
        self.push(Sent::Promoted { chat_id, user_id });
        Ok(())
    }
}

/// Serves one catalog per video id; streams are `payload` bytes.
#[derive(Default)]
pub struct FakeSource {
    pub videos: Mutex<HashMap<String, VideoInfo>>,
    pub payload: Vec<u8>,
    /// Announce a zero-length stream.
    pub announce_zero: bool,
    /// Reset the connection once `payload` has been read.
    pub break_after_payload: bool,
    pub opened: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_videos(videos: Vec<VideoInfo>, payload: Vec<u8>) -> Self {
        Self {
            videos: Mutex::new(videos.into_iter().map(|v| (v.id.clone(), v)).collect()),
            payload,
            ..Self::default()
        }
    }
}

#[async_trait]
impl VideoSource for FakeSource {
    async fn video(&self, id: &str) -> Result<VideoInfo> {
        self.videos
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Extraction(format!("video {id} is unavailable")))
    }

    async fn open(&self, video: &VideoInfo, format: &FormatDescriptor) -> Result<MediaStream> {
        self.opened
            .lock()
            .unwrap()
            .push(format!("{}:{}", video.id, format.format_id));
        let size = if self.announce_zero {
            Some(0)
        } else {
            Some(self.payload.len() as u64)
        };
        let body = std::io::Cursor::new(self.payload.clone());
        let reader: Box<dyn AsyncRead + Send + Unpin> = if self.break_after_payload {
            Box::new(body.chain(ResetReader))
        } else {
            Box::new(body)
        };
        Ok(MediaStream { reader, size })
    }
}

struct ResetReader;

impl AsyncRead for ResetReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

/// Writes a small output file, or fails when asked to.
#[derive(Default)]
pub struct FakeTranscoder {
    pub requests: Mutex<Vec<TranscodeRequest>>,
    pub fails: AtomicBool,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, req: &TranscodeRequest) -> Result<()> {
        self.requests.lock().unwrap().push(req.clone());
        if self.fails.load(Ordering::SeqCst) {
            return Err(Error::Transfer("encoder exited with status 1".to_string()));
        }
        tokio::fs::write(&req.output, b"transcoded").await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub doc: Mutex<StoreDocument>,
    pub puts: Mutex<Vec<StoreDocument>>,
    pub put_fails: AtomicBool,
    /// 1-based put attempts that fail once.
    pub failing_puts: Mutex<Vec<usize>>,
    pub put_attempts: AtomicUsize,
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn get(&self) -> Result<StoreDocument> {
        Ok(self.doc.lock().unwrap().clone())
    }

    async fn put(&self, doc: &StoreDocument) -> Result<()> {
        let attempt = self.put_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.put_fails.load(Ordering::SeqCst)
            || self.failing_puts.lock().unwrap().contains(&attempt)
        {
            return Err(Error::Store("store response status 500".to_string()));
        }
        self.puts.lock().unwrap().push(doc.clone());
        *self.doc.lock().unwrap() = doc.clone();
        Ok(())
    }
}

/// Serves pages keyed by the token they answer.
pub struct FakePlaylistApi {
    pub playlists: Vec<PlaylistSummary>,
    pub pages: Vec<(String, PlaylistItemsPage)>,
    pub calls: Mutex<Vec<String>>,
}

impl FakePlaylistApi {
    /// `(token, video ids, next token)` per page; positions count up from 0.
    pub fn new(pages: Vec<(&str, Vec<&str>, &str)>) -> Self {
        let mut position = 0;
        let pages = pages
            .into_iter()
            .map(|(token, ids, next)| {
                let items = ids
                    .into_iter()
                    .map(|id| {
                        position += 1;
                        PlaylistItem {
                            video_id: id.to_string(),
                            position: position - 1,
                        }
                    })
                    .collect();
                (
                    token.to_string(),
                    PlaylistItemsPage {
                        items,
                        next_page_token: next.to_string(),
                    },
                )
            })
            .collect();
        Self {
            playlists: vec![PlaylistSummary {
                title: "Mix".to_string(),
                thumbnail_url: None,
                item_count: 0,
            }],
            pages,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PlaylistApi for FakePlaylistApi {
    async fn playlists(&self, _id: &str) -> Result<Vec<PlaylistSummary>> {
        Ok(self.playlists.clone())
    }

    async fn playlist_items(&self, _id: &str, page_token: &str) -> Result<PlaylistItemsPage> {
        self.calls.lock().unwrap().push(page_token.to_string());
        self.pages
            .iter()
            .find(|(t, _)| t == page_token)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| Error::Extraction(format!("unknown token {page_token}")))
    }
}

// ============== Builders ==============

pub fn audio_format(id: &str, kbps: u64, content_length: Option<u64>) -> FormatDescriptor {
    FormatDescriptor {
        format_id: id.to_string(),
        bitrate: kbps * 1024,
        mime_type: "audio/mp4; codecs=\"mp4a.40.2\"".to_string(),
        audio_quality: Some("AUDIO_QUALITY_MEDIUM".to_string()),
        audio_channels: Some(2),
        content_length,
        url: format!("https://media.example/{id}"),
        ..FormatDescriptor::default()
    }
}

pub fn video_format(id: &str, kbps: u64, content_length: Option<u64>) -> FormatDescriptor {
    FormatDescriptor {
        format_id: id.to_string(),
        bitrate: kbps * 1024,
        mime_type: "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"".to_string(),
        quality_label: Some("360p".to_string()),
        audio_quality: Some("AUDIO_QUALITY_LOW".to_string()),
        audio_channels: Some(2),
        width: Some(640),
        height: Some(360),
        content_length,
        url: format!("https://media.example/{id}"),
        ..FormatDescriptor::default()
    }
}

pub fn video_info(id: &str, secs: u64, formats: Vec<FormatDescriptor>) -> VideoInfo {
    VideoInfo {
        id: id.to_string(),
        title: format!("Title {id}"),
        author: "Author".to_string(),
        publish_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 9),
        duration: Duration::from_secs(secs),
        thumbnail_url: None,
        formats,
    }
}

pub fn chat(id: i64, kind: ChatKind, title: Option<&str>) -> ChatInfo {
    ChatInfo {
        id: ChatId(id),
        kind,
        title: title.map(str::to_string),
        username: None,
        invite_link: None,
    }
}

pub fn message(update_id: i64, chat: ChatInfo, from: Option<i64>, text: &str) -> Update {
    let msg = IncomingMessage {
        id: MessageId(update_id as i32),
        from: from.map(|id| UserInfo {
            id: UserId(id),
            username: Some(format!("user{id}")),
        }),
        chat,
        text: text.to_string(),
    };
    let kind = if msg.chat.kind == ChatKind::Channel {
        UpdateKind::ChannelPost(msg)
    } else {
        UpdateKind::Message(msg)
    };
    Update { id: update_id, kind }
}
