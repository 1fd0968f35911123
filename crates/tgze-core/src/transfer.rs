//! Download → optional transcode → upload for one video.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{info, warn};

use crate::{
    domain::{ChatId, MediaKind, MessageRef, VideoInfo, VideoRef},
    errors::Error,
    formats::Selection,
    formatting::{file_timestamp, format_duration, truncate_chars, CAPTION_MAX_CHARS},
    pacing::PacedReader,
    ports::{AudioUpload, ChatTransport, TranscodeRequest, Transcoder, VideoSource, VideoUpload},
    Result,
};

/// A temp file removed when dropped, whichever way the job ends.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file without blocking the runtime.
    pub async fn remove(mut self) {
        let path = std::mem::take(&mut self.path);
        report_removal(&path, tokio::fs::remove_file(&path).await);
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        // Error paths only: a single unlink, run inline.
        report_removal(&self.path, std::fs::remove_file(&self.path));
    }
}

fn report_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "remove temp file: {e}"),
    }
}

/// One video to deliver, with the format already chosen.
#[derive(Clone, Debug)]
pub struct TransferJob<'a> {
    pub chat_id: ChatId,
    pub video: &'a VideoRef,
    pub info: &'a VideoInfo,
    pub kind: MediaKind,
    pub selection: Selection,
}

#[derive(Clone)]
pub struct TransferPipeline {
    source: Arc<dyn VideoSource>,
    transcoder: Option<Arc<dyn Transcoder>>,
    transport: Arc<dyn ChatTransport>,
    temp_dir: PathBuf,
    audio_bitrate_kbps: u64,
}

impl TransferPipeline {
    pub fn new(
        source: Arc<dyn VideoSource>,
        transcoder: Option<Arc<dyn Transcoder>>,
        transport: Arc<dyn ChatTransport>,
        temp_dir: impl Into<PathBuf>,
        audio_bitrate_kbps: u64,
    ) -> Self {
        Self {
            source,
            transcoder,
            transport,
            temp_dir: temp_dir.into(),
            audio_bitrate_kbps,
        }
    }

    pub async fn run(&self, job: TransferJob<'_>) -> Result<MessageRef> {
        let id = job.video.id.as_str();
        let format = &job.selection.format;
        let target = job.selection.transcode_kbps;
        let label = kind_label(job.kind);

        // 1. open, unless the transcode this job needs cannot run
        let transcoder = match (target, self.transcoder.as_ref()) {
            (0, _) => None,
            (_, Some(t)) => Some(t),
            (_, None) => {
                return Err(Error::Transfer(format!(
                    "youtu.be/{id} needs transcoding to {target}kbps but no encoder is configured"
                )))
            }
        };
        let stream = self.source.open(job.info, format).await?;
        if job.kind == MediaKind::Audio && stream.size == Some(0) {
            return Err(Error::Transfer(format!(
                "youtu.be/{id} {label}: stream size is zero"
            )));
        }
        info!(
            video = %id,
            kind = label,
            size_mb = stream.size.unwrap_or(0) >> 20,
            bitrate_kbps = format.bitrate >> 10,
            quality = format.quality_label.as_deref().unwrap_or(""),
            language = format.language.as_deref().unwrap_or(""),
            duration = %format_duration(job.info.duration),
            "downloading"
        );

        // 2-3. copy into a temp file, then close both ends
        let downloaded = TempArtifact::new(self.temp_dir.join(format!(
            "{}.{id}.{}",
            file_timestamp(Utc::now()),
            extension(job.kind)
        )));
        let reader: Box<dyn AsyncRead + Send + Unpin> =
            if job.kind == MediaKind::Audio && target > 0 {
                Box::new(PacedReader::new(stream.reader, target))
            } else {
                stream.reader
            };
        let started = Instant::now();
        copy_to_file(reader, downloaded.path())
            .await
            .map_err(|e| Error::Transfer(format!("download youtu.be/{id} {label}: {e}")))?;
        info!(video = %id, elapsed_s = started.elapsed().as_secs(), "downloaded");

        let mut caption = base_caption(&job, format_note(&job));

        // 4. transcode
        let upload_file = if let Some(transcoder) = transcoder {
            let (video_kbps, audio_kbps, name) = match job.kind {
                MediaKind::Audio => (0, target, format!("a{target}k.m4a")),
                MediaKind::Video => (
                    target,
                    self.audio_bitrate_kbps,
                    format!("v{target}k.a{}k.mp4", self.audio_bitrate_kbps),
                ),
            };
            let transcoded = TempArtifact::new(self.temp_dir.join(format!(
                "{}.{id}.{name}",
                file_timestamp(Utc::now())
            )));
            let req = TranscodeRequest {
                input: downloaded.path().to_path_buf(),
                output: transcoded.path().to_path_buf(),
                video_bitrate_kbps: video_kbps,
                audio_bitrate_kbps: audio_kbps,
            };
            info!(video = %id, video_kbps, audio_kbps, "transcoding");
            transcoder.transcode(&req).await.map_err(|e| {
                Error::Transfer(format!("transcode `{}`: {e}", req.input.display()))
            })?;

            caption.push('\n');
            caption.push_str(&match job.kind {
                MediaKind::Audio => format!("(transcoded to audio:{audio_kbps}kbps)"),
                MediaKind::Video => {
                    format!("(transcoded to video:{video_kbps}kbps audio:{audio_kbps}kbps)")
                }
            });
            downloaded.remove().await;
            transcoded
        } else {
            downloaded
        };

        // 5. upload
        let caption = truncate_chars(&caption, CAPTION_MAX_CHARS);
        let sent = match job.kind {
            MediaKind::Audio => {
                self.transport
                    .send_audio(
                        job.chat_id,
                        AudioUpload {
                            path: upload_file.path().to_path_buf(),
                            caption,
                            performer: job.info.author.clone(),
                            title: job.info.title.clone(),
                            duration: job.info.duration,
                            thumbnail_url: job.info.thumbnail_url.clone(),
                        },
                    )
                    .await?
            }
            MediaKind::Video => {
                self.transport
                    .send_video(
                        job.chat_id,
                        VideoUpload {
                            path: upload_file.path().to_path_buf(),
                            caption,
                            duration: job.info.duration,
                            width: format.width,
                            height: format.height,
                            thumbnail_url: job.info.thumbnail_url.clone(),
                        },
                    )
                    .await?
            }
        };

        // 6. remove the uploaded file
        upload_file.remove().await;
        Ok(sent)
    }
}

async fn copy_to_file(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    path: &Path,
) -> std::io::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let n = tokio::io::copy(&mut reader, &mut file).await?;
    drop(reader);
    file.flush().await?;
    file.sync_all().await?;
    Ok(n)
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

fn extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "m4a",
        MediaKind::Video => "mp4",
    }
}

/// Bitrate for audio, quality label for video.
fn format_note(job: &TransferJob<'_>) -> String {
    match job.kind {
        MediaKind::Audio => format!("{}kbps", job.selection.format.bitrate / 1024),
        MediaKind::Video => job
            .selection
            .format
            .quality_label
            .clone()
            .unwrap_or_default(),
    }
}

/// Upload caption without the transcode note.
fn base_caption(job: &TransferJob<'_>, note: String) -> String {
    let info = job.info;
    let mut first = info.title.clone();
    if let Some(date) = info.publish_date {
        first.push(' ');
        first.push_str(&date.format("%Y/%m/%d").to_string());
    }

    let mut out = format!(
        "{first}\nyoutu.be/{} {} {note}",
        job.video.id,
        format_duration(info.duration)
    );
    if let (Some(pos), Some(list)) = (job.video.position, job.video.playlist.as_ref()) {
        if !list.title.is_empty() {
            out.push_str(&format!("\n{}/{} {}", pos + 1, list.size, list.title));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::PlaylistContext,
        testing::{
            audio_format, video_format, video_info, FakeSource, FakeTranscoder, FakeTransport,
            Sent,
        },
    };
    use std::sync::atomic::Ordering;

    const CHAT: ChatId = ChatId(-100);

    struct Harness {
        dir: tempfile::TempDir,
        source: Arc<FakeSource>,
        transcoder: Arc<FakeTranscoder>,
        transport: Arc<FakeTransport>,
    }

    impl Harness {
        fn new(payload: &[u8]) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                source: Arc::new(FakeSource::with_videos(vec![], payload.to_vec())),
                transcoder: Arc::new(FakeTranscoder::default()),
                transport: Arc::new(FakeTransport::default()),
            }
        }

        fn pipeline(&self, with_encoder: bool) -> TransferPipeline {
            let transcoder: Option<Arc<dyn Transcoder>> = if with_encoder {
                Some(self.transcoder.clone())
            } else {
                None
            };
            TransferPipeline::new(
                self.source.clone(),
                transcoder,
                self.transport.clone(),
                self.dir.path(),
                60,
            )
        }

        fn leftover_files(&self) -> usize {
            std::fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    fn selection(format: crate::domain::FormatDescriptor, kbps: u64) -> Selection {
        Selection {
            format,
            transcode_kbps: kbps,
        }
    }

    #[tokio::test]
    async fn audio_upload_carries_metadata_and_cleans_up() {
        let h = Harness::new(b"0123456789");
        let info = video_info("abc123", 245, vec![]);
        let video = VideoRef::single("abc123");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Audio,
            selection: selection(audio_format("140", 128, Some(10)), 0),
        };

        h.pipeline(true).run(job).await.unwrap();

        match &h.transport.uploads()[..] {
            [Sent::Audio {
                caption,
                performer,
                bytes,
                ..
            }] => {
                assert_eq!(caption, "Title abc123 2024/03/09\nyoutu.be/abc123 4m5s 128kbps");
                assert_eq!(performer, "Author");
                assert_eq!(*bytes, 10);
            }
            other => panic!("unexpected uploads: {other:?}"),
        }
        assert!(h.transcoder.requests.lock().unwrap().is_empty());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn video_transcode_replaces_the_download() {
        let h = Harness::new(&[1u8; 64]);
        let info = video_info("v1", 60, vec![]);
        let context = Arc::new(PlaylistContext {
            id: "PL".to_string(),
            title: "Mix".to_string(),
            size: 5,
        });
        let video = VideoRef {
            id: "v1".to_string(),
            position: Some(2),
            playlist: Some(context),
        };
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Video,
            selection: selection(video_format("18", 900, Some(64)), 700),
        };

        h.pipeline(true).run(job).await.unwrap();

        let reqs = h.transcoder.requests.lock().unwrap().clone();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].video_bitrate_kbps, 700);
        assert_eq!(reqs[0].audio_bitrate_kbps, 60);
        let out_name = reqs[0].output.file_name().unwrap().to_string_lossy().to_string();
        assert!(out_name.ends_with(".v1.v700k.a60k.mp4"), "{out_name}");

        match &h.transport.uploads()[..] {
            [Sent::Video {
                caption,
                width,
                bytes,
                ..
            }] => {
                assert_eq!(
                    caption,
                    "Title v1 2024/03/09\nyoutu.be/v1 1m0s 360p\n3/5 Mix\n(transcoded to video:700kbps audio:60kbps)"
                );
                assert_eq!(*width, Some(640));
                assert_eq!(*bytes, b"transcoded".len() as u64);
            }
            other => panic!("unexpected uploads: {other:?}"),
        }
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn audio_transcode_is_paced_and_annotated() {
        // 2048 bytes at 8 kbps (1024 B/s) → two seconds of pacing.
        let h = Harness::new(&[0u8; 2048]);
        let info = video_info("a1", 10_000, vec![]);
        let video = VideoRef::single("a1");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Audio,
            selection: selection(audio_format("139", 48, None), 8),
        };

        let start = tokio::time::Instant::now();
        h.pipeline(true).run(job).await.unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(1990));

        let reqs = h.transcoder.requests.lock().unwrap().clone();
        assert_eq!(reqs[0].video_bitrate_kbps, 0);
        assert_eq!(reqs[0].audio_bitrate_kbps, 8);
        match &h.transport.uploads()[..] {
            [Sent::Audio { caption, .. }] => {
                assert!(caption.ends_with("\n(transcoded to audio:8kbps)"), "{caption}")
            }
            other => panic!("unexpected uploads: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_upload_still_removes_temp_files() {
        let h = Harness::new(b"data");
        h.transport.upload_fails.store(true, Ordering::SeqCst);
        let info = video_info("x", 30, vec![]);
        let video = VideoRef::single("x");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Audio,
            selection: selection(audio_format("140", 128, Some(4)), 0),
        };

        let err = h.pipeline(true).run(job).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        // The file existed when the upload was attempted, and is gone now.
        assert_eq!(h.transport.uploaded_paths.lock().unwrap().len(), 1);
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn failed_transcode_removes_the_download() {
        let h = Harness::new(b"data");
        h.transcoder.fails.store(true, Ordering::SeqCst);
        let info = video_info("x", 30, vec![]);
        let video = VideoRef::single("x");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Video,
            selection: selection(video_format("18", 900, None), 300),
        };

        let err = h.pipeline(true).run(job).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(m) if m.contains("transcode")));
        assert!(h.transport.uploads().is_empty());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn transcode_without_encoder_fails() {
        let h = Harness::new(b"data");
        let info = video_info("x", 30, vec![]);
        let video = VideoRef::single("x");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Video,
            selection: selection(video_format("18", 900, None), 300),
        };

        let err = h.pipeline(false).run(job).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(m) if m.contains("no encoder")));
        assert!(h.source.opened.lock().unwrap().is_empty());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paced_audio_without_encoder_fails_before_downloading() {
        // 64 KiB at 64 kbps would pace for eight seconds.
        let h = Harness::new(&[0u8; 64 << 10]);
        let info = video_info("x", 3_600, vec![]);
        let video = VideoRef::single("x");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Audio,
            selection: selection(audio_format("140", 128, None), 64),
        };

        let start = tokio::time::Instant::now();
        let err = h.pipeline(false).run(job).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(m) if m.contains("transcoding to 64kbps")));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        assert!(h.source.opened.lock().unwrap().is_empty());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn broken_stream_fails_the_download_and_cleans_up() {
        let mut source = FakeSource::with_videos(vec![], vec![7u8; 4096]);
        source.break_after_payload = true;
        let mut h = Harness::new(b"");
        h.source = Arc::new(source);
        let info = video_info("b", 30, vec![]);
        let video = VideoRef::single("b");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Video,
            selection: selection(video_format("18", 900, None), 0),
        };

        let err = h.pipeline(true).run(job).await.unwrap_err();
        assert!(
            matches!(&err, Error::Transfer(m) if m.starts_with("download youtu.be/b video") && m.contains("connection reset")),
            "{err:?}"
        );
        assert!(h.transport.uploads().is_empty());
        assert!(h.transcoder.requests.lock().unwrap().is_empty());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn removed_artifact_is_not_removed_again_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.m4a");
        std::fs::write(&path, b"x").unwrap();

        TempArtifact::new(&path).remove().await;
        assert!(!path.exists());

        // A missing file is not an error either way.
        TempArtifact::new(&path).remove().await;
        drop(TempArtifact::new(&path));
    }

    #[tokio::test]
    async fn zero_sized_audio_stream_is_rejected() {
        let mut source = FakeSource::with_videos(vec![], b"x".to_vec());
        source.announce_zero = true;
        let mut h = Harness::new(b"");
        h.source = Arc::new(source);
        let info = video_info("z", 30, vec![]);
        let video = VideoRef::single("z");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Audio,
            selection: selection(audio_format("140", 128, None), 0),
        };

        let err = h.pipeline(true).run(job).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(m) if m.contains("stream size is zero")));
        assert_eq!(h.leftover_files(), 0);
    }

    #[test]
    fn long_captions_are_cut_to_the_limit() {
        let mut info = video_info("id", 1, vec![]);
        info.title = "x".repeat(2000);
        let video = VideoRef::single("id");
        let job = TransferJob {
            chat_id: CHAT,
            video: &video,
            info: &info,
            kind: MediaKind::Audio,
            selection: selection(audio_format("140", 128, None), 0),
        };
        let c = truncate_chars(&base_caption(&job, format_note(&job)), CAPTION_MAX_CHARS);
        assert_eq!(c.chars().count(), CAPTION_MAX_CHARS);
    }
}
