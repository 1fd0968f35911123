use std::path::PathBuf;

use crate::{errors::Error, ports::TranscodeRequest, Result};

/// Encoder settings from the relay document.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub program: PathBuf,
    pub global_options: Vec<String>,
}

/// A concrete encoder invocation (used by the ffmpeg runner).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderConfig {
    /// Build encoder args for a request.
    ///
    /// Layout: global options, input, output container, optional video codec
    /// and bitrate, optional audio codec and bitrate, output path.
    pub fn build_invocation(&self, req: &TranscodeRequest) -> Result<EncoderInvocation> {
        if req.video_bitrate_kbps == 0 && req.audio_bitrate_kbps == 0 {
            return Err(Error::Transfer(
                "empty both video and audio target bitrates".to_string(),
            ));
        }

        let mut args = self.global_options.clone();
        args.push("-i".to_string());
        args.push(req.input.display().to_string());
        args.push("-f".to_string());
        args.push("mp4".to_string());

        if req.video_bitrate_kbps > 0 {
            args.push("-c:v".to_string());
            args.push("h264".to_string());
            args.push("-b:v".to_string());
            args.push(format!("{}k", req.video_bitrate_kbps));
        }
        if req.audio_bitrate_kbps > 0 {
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            args.push("-b:a".to_string());
            args.push(format!("{}k", req.audio_bitrate_kbps));
        }

        args.push(req.output.display().to_string());

        Ok(EncoderInvocation {
            program: self.program.clone(),
            args,
        })
    }
}
