use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

pub const DEFAULT_VIDEO_RE: &str =
    r"(?:youtube.com/watch\?v=|youtu.be/|youtube.com/shorts/|youtube.com/live/)([0-9A-Za-z_-]+)";
pub const DEFAULT_PLAYLIST_RE: &str = r"youtube.com/playlist\?list=([0-9A-Za-z_-]+)";

/// Process bootstrap configuration, read from the environment.
///
/// Everything else lives in the remote document (see [`Settings`]).
#[derive(Clone, Debug)]
pub struct Config {
    pub store_url: String,
    pub temp_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let store_url = env_str("TGZE_STORE_URL")
            .and_then(non_empty)
            .or_else(|| env_str("YssUrl").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TGZE_STORE_URL environment variable is required".to_string())
            })?;

        let temp_dir = env_path("TGZE_TEMP_DIR").unwrap_or_else(|| env::temp_dir().join("tgze"));
        fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            store_url,
            temp_dir,
        })
    }
}

/// Relay settings, stored in the remote document next to the ledger.
///
/// Key names match the document layout the relay has always used.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "DEBUG")]
    pub debug: bool,

    #[serde(rename = "Interval", with = "duration_opt")]
    pub interval: Option<Duration>,

    #[serde(rename = "TgApiUrlBase")]
    pub tg_api_url_base: String,
    #[serde(rename = "TgToken")]
    pub tg_token: String,
    /// Operator chat: receives reports, unsupported updates and the sigterm notice.
    #[serde(rename = "TgZeChatId")]
    pub tg_operator_chat_id: i64,
    #[serde(rename = "TgUpdateLogMaxSize")]
    pub tg_update_log_max_size: usize,

    #[serde(rename = "TgCommandChannels")]
    pub tg_command_channels: String,
    #[serde(rename = "TgCommandChannelsPromoteAdmin")]
    pub tg_command_channels_promote_admin: String,

    #[serde(rename = "TgQuest1")]
    pub tg_quest1: String,
    #[serde(rename = "TgQuest1Key")]
    pub tg_quest1_key: String,
    #[serde(rename = "TgQuest2")]
    pub tg_quest2: String,
    #[serde(rename = "TgQuest2Key")]
    pub tg_quest2_key: String,
    #[serde(rename = "TgQuest3")]
    pub tg_quest3: String,
    #[serde(rename = "TgQuest3Key")]
    pub tg_quest3_key: String,

    #[serde(rename = "TgMaxFileSizeBytes")]
    pub tg_max_file_size_bytes: u64,
    #[serde(rename = "TgAudioBitrateKbps")]
    pub tg_audio_bitrate_kbps: u64,
    #[serde(rename = "TgVideoChatTitlePrefix")]
    pub tg_video_chat_title_prefix: String,
    #[serde(rename = "TgPlaylistPause", with = "duration_opt")]
    pub tg_playlist_pause: Option<Duration>,
    #[serde(rename = "TgPlaylistPauseThreshold")]
    pub tg_playlist_pause_threshold: usize,

    /// Empty disables transcoding.
    #[serde(rename = "FfmpegPath")]
    pub ffmpeg_path: String,
    #[serde(rename = "FfmpegGlobalOptions")]
    pub ffmpeg_global_options: Vec<String>,

    #[serde(rename = "YtKey")]
    pub yt_key: String,
    #[serde(rename = "YtMaxResults")]
    pub yt_max_results: u32,
    #[serde(rename = "YtHttpClientUserAgent")]
    pub yt_http_client_user_agent: String,
    #[serde(rename = "YtDlpPath")]
    pub yt_dlp_path: String,
    #[serde(rename = "YtRe")]
    pub yt_re: String,
    #[serde(rename = "YtListRe")]
    pub yt_list_re: String,
    #[serde(rename = "YtDownloadLanguages")]
    pub yt_download_languages: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            interval: None,
            tg_api_url_base: "https://api.telegram.org".to_string(),
            tg_token: String::new(),
            tg_operator_chat_id: 0,
            tg_update_log_max_size: 1080,
            tg_command_channels: String::new(),
            tg_command_channels_promote_admin: String::new(),
            tg_quest1: String::new(),
            tg_quest1_key: String::new(),
            tg_quest2: String::new(),
            tg_quest2_key: String::new(),
            tg_quest3: String::new(),
            tg_quest3_key: String::new(),
            tg_max_file_size_bytes: 47 << 20,
            tg_audio_bitrate_kbps: 60,
            tg_video_chat_title_prefix: "vi".to_string(),
            tg_playlist_pause: Some(Duration::from_secs(11)),
            tg_playlist_pause_threshold: 3,
            ffmpeg_path: "/bin/ffmpeg".to_string(),
            ffmpeg_global_options: vec!["-v".to_string(), "error".to_string()],
            yt_key: String::new(),
            yt_max_results: 50,
            yt_http_client_user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.4 Safari/605.1.15".to_string(),
            yt_dlp_path: "yt-dlp".to_string(),
            yt_re: DEFAULT_VIDEO_RE.to_string(),
            yt_list_re: DEFAULT_PLAYLIST_RE.to_string(),
            yt_download_languages: ["english", "german", "russian", "ukrainian"]
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Check the settings required to run; everything failing here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("TgToken", self.tg_token.as_str()),
            ("TgCommandChannels", self.tg_command_channels.as_str()),
            (
                "TgCommandChannelsPromoteAdmin",
                self.tg_command_channels_promote_admin.as_str(),
            ),
            ("YtKey", self.yt_key.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{key} is empty")));
            }
        }

        if self.tg_operator_chat_id == 0 {
            return Err(Error::Config("TgZeChatId is empty".to_string()));
        }
        if self.interval.map(|d| d.is_zero()).unwrap_or(true) {
            return Err(Error::Config("Interval is empty".to_string()));
        }
        if self.tg_update_log_max_size == 0 {
            return Err(Error::Config("TgUpdateLogMaxSize must be positive".to_string()));
        }

        compile_pattern("YtRe", &self.yt_re)?;
        compile_pattern("YtListRe", &self.yt_list_re)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval.unwrap_or(Duration::from_secs(60))
    }

    pub fn playlist_pause(&self) -> Duration {
        self.tg_playlist_pause.unwrap_or_default()
    }

    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        non_empty(self.ffmpeg_path.clone()).map(PathBuf::from)
    }

    pub fn download_languages(&self) -> Vec<String> {
        self.yt_download_languages
            .iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

pub fn compile_pattern(key: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("compile {key} `{pattern}`: {e}")))
}

/// Durations are written as humantime strings (`1m`, `11s`); integer
/// nanoseconds are accepted on read for documents written by older relays.
mod duration_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Nanos(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_str(&humantime::format_duration(*d).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Nanos(n)) => Ok(Some(Duration::from_nanos(n))),
            Some(Raw::Text(t)) if t.trim().is_empty() => Ok(None),
            Some(Raw::Text(t)) => humantime::parse_duration(t.trim())
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
