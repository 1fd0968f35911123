//! Per-message media relay: link → video refs → select → transfer, in order.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tracing::{error, info, warn};

use crate::{
    config::Settings,
    domain::{IncomingMessage, MediaKind, VideoRef},
    errors::Error,
    formats::{select_format, SelectionParams},
    formatting::escape_html,
    links::{LinkExtractor, MediaLink},
    playlist::PlaylistResolver,
    ports::{ChatTransport, Transcoder, VideoSource},
    transfer::{TransferJob, TransferPipeline},
    Result,
};

/// Reaction put on a trigger message after a successful delivery.
pub const SUCCESS_REACTION: &str = "👍";

#[derive(Clone, Debug)]
pub struct RelayOptions {
    pub max_file_size_bytes: u64,
    pub audio_bitrate_kbps: u64,
    pub languages: Vec<String>,
    pub playlist_pause: Duration,
    pub playlist_pause_threshold: usize,
}

impl RelayOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_file_size_bytes: settings.tg_max_file_size_bytes,
            audio_bitrate_kbps: settings.tg_audio_bitrate_kbps,
            languages: settings.download_languages(),
            playlist_pause: settings.playlist_pause(),
            playlist_pause_threshold: settings.tg_playlist_pause_threshold,
        }
    }
}

/// What happened to one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    NoLink,
    Delivered(usize),
    /// The error text that was replied to the trigger message.
    Failed(String),
}

/// Whether to wait after item `index` (0-based) of `total`.
pub fn pause_after(index: usize, total: usize, threshold: usize) -> bool {
    total > threshold && index + 1 < total
}

pub struct MediaRelay {
    links: LinkExtractor,
    playlists: PlaylistResolver,
    source: Arc<dyn VideoSource>,
    transport: Arc<dyn ChatTransport>,
    pipeline: TransferPipeline,
    options: RelayOptions,
}

impl MediaRelay {
    pub fn new(
        links: LinkExtractor,
        playlists: PlaylistResolver,
        source: Arc<dyn VideoSource>,
        transcoder: Option<Arc<dyn Transcoder>>,
        transport: Arc<dyn ChatTransport>,
        temp_dir: impl Into<PathBuf>,
        options: RelayOptions,
    ) -> Self {
        let pipeline = TransferPipeline::new(
            Arc::clone(&source),
            transcoder,
            Arc::clone(&transport),
            temp_dir,
            options.audio_bitrate_kbps,
        );
        Self {
            links,
            playlists,
            source,
            transport,
            pipeline,
            options,
        }
    }

    /// Relay every video linked from `msg`, stopping at the first failure.
    ///
    /// Failures are replied to the trigger message; the returned outcome is
    /// informational. Only transport failures while reporting surface as `Err`.
    pub async fn handle(
        &self,
        msg: &IncomingMessage,
        is_channel_post: bool,
        previous_text: Option<&str>,
    ) -> Result<RelayOutcome> {
        let Some(link) = self.links.extract(&msg.text) else {
            return Ok(RelayOutcome::NoLink);
        };
        let kind = self
            .links
            .delivery_kind(&msg.text, msg.chat.title.as_deref(), previous_text);

        let delivered = match self.resolve(&link).await {
            Ok(videos) => self.deliver(msg, kind, &videos).await,
            Err(e) => Err(e),
        };

        match delivered {
            Ok(n) => {
                let trigger = msg.message_ref();
                if is_channel_post {
                    if let Err(e) = self.transport.delete_message(trigger).await {
                        warn!(chat = trigger.chat_id.0, "delete trigger message: {e}");
                    }
                } else if let Err(e) = self.transport.set_reaction(trigger, SUCCESS_REACTION).await {
                    warn!(chat = trigger.chat_id.0, "set reaction: {e}");
                }
                Ok(RelayOutcome::Delivered(n))
            }
            Err(e) => {
                error!(chat = msg.chat.id.0, "relay failed: {e}");
                let text = e.to_string();
                self.transport
                    .send_html(
                        msg.chat.id,
                        &escape_html(&format!("ERROR {text}")),
                        Some(msg.id),
                    )
                    .await?;
                Ok(RelayOutcome::Failed(text))
            }
        }
    }

    async fn resolve(&self, link: &MediaLink) -> Result<Vec<VideoRef>> {
        match link {
            MediaLink::Video(id) => Ok(vec![VideoRef::single(id.clone())]),
            MediaLink::Playlist(id) => {
                let info = self.playlists.resolve(id).await?;
                info!(playlist = %id, videos = info.videos.len(), "playlist resolved");
                Ok(info.videos)
            }
        }
    }

    async fn deliver(
        &self,
        msg: &IncomingMessage,
        kind: MediaKind,
        videos: &[VideoRef],
    ) -> Result<usize> {
        let total = videos.len();
        for (index, video) in videos.iter().enumerate() {
            let info = self.source.video(&video.id).await?;
            let params = SelectionParams {
                kind,
                ceiling_bytes: self.options.max_file_size_bytes,
                duration: info.duration,
                languages: &self.options.languages,
                audio_bitrate_kbps: self.options.audio_bitrate_kbps,
            };
            let selection = select_format(&info.formats, &params)
                .map_err(|e| Error::Extraction(format!("youtu.be/{}: {e}", video.id)))?;

            self.pipeline
                .run(TransferJob {
                    chat_id: msg.chat.id,
                    video,
                    info: &info,
                    kind,
                    selection,
                })
                .await?;

            if pause_after(index, total, self.options.playlist_pause_threshold)
                && !self.options.playlist_pause.is_zero()
            {
                tokio::time::sleep(self.options.playlist_pause).await;
            }
        }
        Ok(total)
    }
}
