//! Format selection under an upload-size ceiling.
//!
//! Given a catalog of encodings, pick the richest one that fits, or the
//! leanest one together with a re-encode bitrate expected to fit.

use std::time::Duration;

use crate::domain::{FormatDescriptor, MediaKind};

/// Inputs besides the catalog.
#[derive(Clone, Debug)]
pub struct SelectionParams<'a> {
    pub kind: MediaKind,
    /// Hard upload ceiling in bytes.
    pub ceiling_bytes: u64,
    pub duration: Duration,
    /// Lowercase substrings; a tagged format must contain one of them.
    pub languages: &'a [String],
    /// Audio bitrate reserved next to a video re-encode.
    pub audio_bitrate_kbps: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub format: FormatDescriptor,
    /// 0 = upload as is. For audio: audio kbps; for video: video kbps.
    pub transcode_kbps: u64,
}

impl Selection {
    pub fn needs_transcode(&self) -> bool {
        self.transcode_kbps > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no suitable {0:?} format found")]
    NoCandidates(MediaKind),
    #[error("size ceiling of {ceiling_bytes} bytes is too small for {duration_secs}s")]
    CeilingTooSmall { ceiling_bytes: u64, duration_secs: u64 },
}

fn matches_kind(f: &FormatDescriptor, kind: MediaKind) -> bool {
    if !f.has_audio() || !f.mime_type.contains("/mp4") {
        return false;
    }
    match kind {
        MediaKind::Audio => f.mime_type.starts_with("audio/mp4"),
        MediaKind::Video => {
            f.mime_type.starts_with("video/mp4")
                && f.quality_label.as_deref().is_some_and(|q| !q.is_empty())
                && f.audio_quality.as_deref().is_some_and(|q| !q.is_empty())
        }
    }
}

fn language_eligible(f: &FormatDescriptor, languages: &[String]) -> bool {
    let Some(lang) = f.language.as_deref().filter(|l| !l.trim().is_empty()) else {
        return true;
    };
    let lang = lang.to_lowercase();
    languages.iter().any(|l| lang.contains(l.as_str()))
}

/// Declared content length, else the bitrate estimate over the duration.
pub fn effective_size(f: &FormatDescriptor, duration: Duration) -> u64 {
    match f.content_length {
        Some(len) if len > 0 => len,
        _ => (f.bitrate / 8).saturating_mul(duration.as_secs()),
    }
}

/// Pick a format for `params.kind`. Pure: same inputs, same decision.
pub fn select_format(
    catalog: &[FormatDescriptor],
    params: &SelectionParams<'_>,
) -> Result<Selection, SelectError> {
    let mut smallest: Option<&FormatDescriptor> = None;
    let mut best_fit: Option<&FormatDescriptor> = None;

    let eligible = catalog
        .iter()
        .filter(|f| matches_kind(f, params.kind))
        .filter(|f| language_eligible(f, params.languages));

    for f in eligible {
        if smallest.map(|s| f.bitrate < s.bitrate).unwrap_or(true) {
            smallest = Some(f);
        }
        let fits = effective_size(f, params.duration) < params.ceiling_bytes;
        if fits && best_fit.map(|b| f.bitrate > b.bitrate).unwrap_or(true) {
            best_fit = Some(f);
        }
    }

    if let Some(f) = best_fit {
        return Ok(Selection {
            format: f.clone(),
            transcode_kbps: 0,
        });
    }

    let fallback = smallest.ok_or(SelectError::NoCandidates(params.kind))?;
    let target = transcode_target_kbps(params);
    if target == 0 {
        return Err(SelectError::CeilingTooSmall {
            ceiling_bytes: params.ceiling_bytes,
            duration_secs: params.duration.as_secs(),
        });
    }

    Ok(Selection {
        format: fallback.clone(),
        transcode_kbps: target,
    })
}

/// Re-encode bitrate (kbps) expected to land under the ceiling.
///
/// The duration is padded by one second so the estimate stays under budget.
/// For video, the paired audio stream's share is reserved first.
pub fn transcode_target_kbps(params: &SelectionParams<'_>) -> u64 {
    let secs = params.duration.as_secs() + 1;
    let budget_bytes = match params.kind {
        MediaKind::Audio => params.ceiling_bytes,
        MediaKind::Video => {
            let reserved = params.audio_bitrate_kbps.saturating_mul(1024).saturating_mul(secs) / 8;
            params.ceiling_bytes.saturating_sub(reserved)
        }
    };
    (budget_bytes.saturating_mul(8) / secs) / 1024
}

/// Estimated output size for a re-encode, including the reserved audio share.
pub fn estimated_transcode_bytes(params: &SelectionParams<'_>, target_kbps: u64) -> u64 {
    let secs = params.duration.as_secs() + 1;
    let audio = match params.kind {
        MediaKind::Audio => 0,
        MediaKind::Video => params.audio_bitrate_kbps,
    };
    (target_kbps + audio) * 1024 * secs / 8
}
