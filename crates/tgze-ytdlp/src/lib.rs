//! yt-dlp adapter (video metadata and format streams).
//!
//! Metadata comes from `yt-dlp -J`; the chosen format is then fetched
//! directly over HTTP so the relay controls pacing and size.

use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use tgze_core::{
    domain::{FormatDescriptor, VideoInfo},
    errors::Error,
    ports::{MediaStream, VideoSource},
    Result,
};

const STDERR_PREVIEW_CHARS: usize = 2000;

#[derive(Clone, Debug)]
pub struct YtDlpSource {
    program: PathBuf,
    user_agent: String,
    http: reqwest::Client,
}

impl YtDlpSource {
    pub fn new(program: impl Into<PathBuf>, user_agent: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("yt-dlp http client: {e}")))?;
        Ok(Self {
            program: program.into(),
            user_agent: user_agent.into(),
            http,
        })
    }
}

#[async_trait]
impl VideoSource for YtDlpSource {
    async fn video(&self, id: &str) -> Result<VideoInfo> {
        let url = format!("https://www.youtube.com/watch?v={id}");
        debug!(program = %self.program.display(), %url, "yt-dlp -J");

        let out = Command::new(&self.program)
            .args(["-J", "--no-warnings", "--no-playlist", url.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Extraction(format!("start {}: {e}", self.program.display())))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = stderr.trim().chars().take(STDERR_PREVIEW_CHARS).collect();
            return Err(Error::Extraction(format!(
                "yt-dlp exited with {} for {id}: {tail}",
                out.status
            )));
        }

        let info = parse_info(&out.stdout)?;
        info!(
            video = %info.id,
            formats = info.formats.len(),
            duration = ?info.duration,
            "video metadata"
        );
        Ok(info)
    }

    async fn open(&self, video: &VideoInfo, format: &FormatDescriptor) -> Result<MediaStream> {
        let mut req = self.http.get(&format.url);
        for (k, v) in &format.http_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req = req.header(reqwest::header::USER_AGENT, self.user_agent.as_str());

        let resp = req.send().await.map_err(|e| {
            Error::Transfer(format!(
                "GET {} format {}: {}",
                video.id,
                format.format_id,
                e.without_url()
            ))
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!(
                "GET {} format {}: status {status}",
                video.id, format.format_id
            )));
        }

        let size = resp.content_length().or(format.content_length);
        debug!(video = %video.id, format = %format.format_id, ?size, "stream opened");

        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(MediaStream {
            reader: Box::new(StreamReader::new(Box::pin(stream))),
            size,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    #[serde(default)]
    title: String,
    uploader: Option<String>,
    channel: Option<String>,
    upload_date: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    url: Option<String>,
    protocol: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    tbr: Option<f64>,
    abr: Option<f64>,
    audio_channels: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    format_note: Option<String>,
    language: Option<String>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
}

fn codec(c: &Option<String>) -> Option<&str> {
    c.as_deref().filter(|c| !c.is_empty() && *c != "none")
}

/// Parse `yt-dlp -J` output. Formats without a direct HTTP url are dropped.
fn parse_info(json: &[u8]) -> Result<VideoInfo> {
    let raw: RawInfo = serde_json::from_slice(json)
        .map_err(|e| Error::Extraction(format!("yt-dlp json: {e}")))?;

    // Language tags only matter when there is more than one audio track.
    let languages: HashSet<&str> = raw
        .formats
        .iter()
        .filter(|f| codec(&f.acodec).is_some())
        .filter_map(|f| f.language.as_deref())
        .collect();
    let multi_language = languages.len() > 1;

    let formats = raw
        .formats
        .iter()
        .filter_map(|f| format(f, multi_language))
        .collect();

    Ok(VideoInfo {
        author: raw.uploader.or(raw.channel).unwrap_or_default(),
        publish_date: raw
            .upload_date
            .as_deref()
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y%m%d").ok()),
        duration: Duration::from_secs_f64(raw.duration.unwrap_or_default().max(0.0)),
        thumbnail_url: raw.thumbnail,
        id: raw.id,
        title: raw.title,
        formats,
    })
}

fn format(f: &RawFormat, multi_language: bool) -> Option<FormatDescriptor> {
    let url = f.url.as_deref().filter(|u| !u.is_empty())?;
    if !f.protocol.as_deref().unwrap_or("https").starts_with("http") {
        return None;
    }

    let vcodec = codec(&f.vcodec);
    let acodec = codec(&f.acodec);
    let kind = match (vcodec, acodec) {
        (Some(_), _) => "video",
        (None, Some(_)) => "audio",
        (None, None) => return None,
    };
    let container = match f.ext.as_deref() {
        Some("m4a") | Some("mp4") => "mp4",
        Some(other) => other,
        None => return None,
    };
    let codecs: Vec<&str> = [vcodec, acodec].into_iter().flatten().collect();
    let mime_type = format!("{kind}/{container}; codecs=\"{}\"", codecs.join(", "));

    let note = f.format_note.as_deref().unwrap_or_default();
    let quality_label = vcodec.and_then(|_| {
        if note.ends_with('p') || note.contains("p60") {
            Some(note.to_string())
        } else {
            f.height.map(|h| format!("{h}p"))
        }
    });
    let audio_quality = acodec.map(|_| {
        match f.abr.unwrap_or_default() {
            a if a > 0.0 && a < 64.0 => "AUDIO_QUALITY_LOW",
            a if a >= 160.0 => "AUDIO_QUALITY_HIGH",
            _ => "AUDIO_QUALITY_MEDIUM",
        }
        .to_string()
    });
    let audio_channels = acodec.map(|_| f.audio_channels.unwrap_or(2));

    let language = match (&f.language, multi_language) {
        (Some(lang), true) => Some(format!("{lang} {note}").trim().to_lowercase()),
        _ => None,
    };
    let audio_track_role = ["original", "dubbed", "descriptive"]
        .into_iter()
        .find(|r| multi_language && note.to_lowercase().contains(r))
        .map(str::to_string);

    Some(FormatDescriptor {
        format_id: f.format_id.clone(),
        bitrate: (f.tbr.unwrap_or_default().max(0.0) * 1000.0) as u64,
        mime_type,
        quality_label,
        audio_quality,
        audio_channels,
        width: f.width,
        height: f.height,
        content_length: f.filesize.or(f.filesize_approx),
        language,
        audio_track_role,
        url: url.to_string(),
        http_headers: f
            .http_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}
