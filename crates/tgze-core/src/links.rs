//! Link extraction and delivery-kind heuristics for incoming message text.

use regex::Regex;

use crate::{
    config::{compile_pattern, Settings},
    domain::MediaKind,
    Result,
};

/// A media reference found in a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaLink {
    Video(String),
    Playlist(String),
}

#[derive(Clone, Debug)]
pub struct LinkExtractor {
    video_re: Regex,
    playlist_re: Regex,
    video_title_prefix: String,
}

impl LinkExtractor {
    pub fn new(video_pattern: &str, playlist_pattern: &str, video_title_prefix: &str) -> Result<Self> {
        Ok(Self {
            video_re: compile_pattern("YtRe", video_pattern)?,
            playlist_re: compile_pattern("YtListRe", playlist_pattern)?,
            video_title_prefix: video_title_prefix.trim().to_lowercase(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.yt_re,
            &settings.yt_list_re,
            &settings.tg_video_chat_title_prefix,
        )
    }

    /// First capture group of the playlist pattern, else of the video pattern.
    pub fn extract(&self, text: &str) -> Option<MediaLink> {
        if let Some(id) = first_capture(&self.playlist_re, text) {
            return Some(MediaLink::Playlist(id));
        }
        first_capture(&self.video_re, text).map(MediaLink::Video)
    }

    /// Audio unless the message, its chat or the previous message asks for video.
    pub fn delivery_kind(
        &self,
        text: &str,
        chat_title: Option<&str>,
        previous_text: Option<&str>,
    ) -> MediaKind {
        let lower = text.to_lowercase();
        let token = lower.starts_with("video ") || lower.ends_with(" video");
        let previous = previous_text
            .map(|p| p.eq_ignore_ascii_case("video"))
            .unwrap_or(false);
        let titled = !self.video_title_prefix.is_empty()
            && chat_title
                .map(|t| t.to_lowercase().starts_with(&self.video_title_prefix))
                .unwrap_or(false);

        if token || previous || titled {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LinkExtractor {
        LinkExtractor::from_settings(&Settings::default()).unwrap()
    }

    #[test]
    fn bare_short_link_is_an_audio_video_ref() {
        let x = extractor();
        let text = "https://youtu.be/abc123";
        assert_eq!(x.extract(text), Some(MediaLink::Video("abc123".to_string())));
        assert_eq!(x.delivery_kind(text, None, None), MediaKind::Audio);
    }

    #[test]
    fn video_prefix_selects_video_delivery() {
        let x = extractor();
        let text = "video https://youtu.be/abc123";
        assert_eq!(x.extract(text), Some(MediaLink::Video("abc123".to_string())));
        assert_eq!(x.delivery_kind(text, None, None), MediaKind::Video);
        assert_eq!(
            x.delivery_kind("https://youtu.be/abc123 Video", None, None),
            MediaKind::Video
        );
    }

    #[test]
    fn other_link_shapes_are_recognized() {
        let x = extractor();
        for (text, id) in [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1", "dQw4w9WgXcQ"),
            ("see youtube.com/shorts/Zx_-9 now", "Zx_-9"),
            ("https://youtube.com/live/L1ve", "L1ve"),
        ] {
            assert_eq!(x.extract(text), Some(MediaLink::Video(id.to_string())));
        }
        assert_eq!(x.extract("no links here"), None);
    }

    #[test]
    fn playlist_takes_precedence() {
        let x = extractor();
        let text = "https://youtu.be/abc123 https://www.youtube.com/playlist?list=PLx_1";
        assert_eq!(x.extract(text), Some(MediaLink::Playlist("PLx_1".to_string())));
    }

    #[test]
    fn chat_title_and_previous_message_select_video() {
        let x = extractor();
        let text = "https://youtu.be/abc123";
        assert_eq!(x.delivery_kind(text, Some("Videos daily"), None), MediaKind::Video);
        assert_eq!(x.delivery_kind(text, Some("music"), None), MediaKind::Audio);
        assert_eq!(x.delivery_kind(text, None, Some("VIDEO")), MediaKind::Video);
        assert_eq!(x.delivery_kind(text, None, Some("video please")), MediaKind::Audio);
    }

    #[test]
    fn word_inside_text_does_not_count() {
        let x = extractor();
        assert_eq!(
            x.delivery_kind("videos https://youtu.be/abc123", None, None),
            MediaKind::Audio
        );
    }
}
