//! ffmpeg adapter (re-encode to a target bitrate).
//!
//! Runs one `ffmpeg` process per request and waits for it to finish.

use async_trait::async_trait;

use std::{collections::VecDeque, process::Stdio, time::Instant};

use tgze_core::{
    errors::Error,
    ports::{TranscodeRequest, Transcoder},
    transcode::EncoderConfig,
    Result,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, info, warn};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    cfg: EncoderConfig,
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            match self.lines.pop_front() {
                Some(front) => self.bytes = self.bytes.saturating_sub(front.len() + 1),
                None => break,
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl FfmpegTranscoder {
    pub fn new(cfg: EncoderConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, req: &TranscodeRequest) -> Result<()> {
        let inv = self.cfg.build_invocation(req)?;
        debug!(program = %inv.program.display(), args = ?inv.args, "ffmpeg");

        let started = Instant::now();
        let mut child = Command::new(&inv.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transfer(format!("start {}: {e}", inv.program.display())))?;

        let mut tail = StderrTail::default();
        if let Some(stderr) = child.stderr.take() {
            // Drain to EOF: metadata in stderr is not always UTF-8, and a
            // closed pipe kills ffmpeg on its next write.
            let mut r = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match r.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        warn!("ffmpeg: {line}");
                        tail.push_line(line);
                    }
                    Err(e) => {
                        warn!("read ffmpeg stderr: {e}");
                        break;
                    }
                }
            }
        }
        let status = child.wait().await?;

        if !status.success() {
            let stderr = tail.snapshot();
            let mut msg = format!("ffmpeg exited with {status}");
            if !stderr.trim().is_empty() {
                msg.push_str("\nstderr (tail):\n");
                msg.push_str(&stderr);
            }
            return Err(Error::Transfer(msg));
        }

        let size = tokio::fs::metadata(&req.output)
            .await
            .map_err(|e| {
                Error::Transfer(format!("ffmpeg output {}: {e}", req.output.display()))
            })?
            .len();
        info!(
            output = %req.output.display(),
            bytes = size,
            elapsed = ?started.elapsed(),
            "transcoded"
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    /// Run `body` through `/bin/sh`; the script path rides in the global options.
    fn script(dir: &Path, body: &str) -> FfmpegTranscoder {
        let path = dir.join("fake-ffmpeg.sh");
        std::fs::write(&path, format!("{body}\n")).unwrap();
        FfmpegTranscoder::new(EncoderConfig {
            program: PathBuf::from("/bin/sh"),
            global_options: vec![path.display().to_string()],
        })
    }

    fn request(dir: &Path) -> TranscodeRequest {
        TranscodeRequest {
            input: dir.join("in.m4a"),
            output: dir.join("out.m4a"),
            video_bitrate_kbps: 0,
            audio_bitrate_kbps: 48,
        }
    }

    #[tokio::test]
    async fn writes_the_last_argument() {
        let dir = tempfile::tempdir().unwrap();
        // The output path is always the last argument.
        let ffmpeg = script(dir.path(), r#"for a; do last="$a"; done; echo ok > "$last""#);
        let req = request(dir.path());

        ffmpeg.transcode(&req).await.unwrap();
        assert_eq!(std::fs::read_to_string(&req.output).unwrap(), "ok\n");
    }

    #[tokio::test]
    async fn failure_carries_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = script(dir.path(), "echo 'Invalid data found' >&2; exit 1");

        let err = ffmpeg
            .transcode(&request(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(m) if m.contains("Invalid data found")));
    }

    #[tokio::test]
    async fn success_without_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = script(dir.path(), "exit 0");

        let err = ffmpeg
            .transcode(&request(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(m) if m.contains("output")));
    }

    #[tokio::test]
    async fn non_utf8_stderr_is_drained() {
        let dir = tempfile::tempdir().unwrap();
        // Enough output after the bad line to overflow the pipe buffer.
        let ffmpeg = script(
            dir.path(),
            r#"printf 'title: tag \377\n' >&2
i=0; while [ $i -lt 20000 ]; do echo "frame=$i" >&2; i=$((i+1)); done
for a; do last="$a"; done; echo ok > "$last""#,
        );
        let req = request(dir.path());

        ffmpeg.transcode(&req).await.unwrap();
        assert_eq!(std::fs::read_to_string(&req.output).unwrap(), "ok\n");
    }

    #[tokio::test]
    async fn non_utf8_stderr_lands_in_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = script(dir.path(), r#"printf 'bad \377 byte\nlast words\n' >&2; exit 1"#);

        let err = ffmpeg
            .transcode(&request(dir.path()))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, Error::Transfer(m) if m.contains("bad \u{fffd} byte") && m.contains("last words")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = FfmpegTranscoder::new(EncoderConfig {
            program: dir.path().join("nope"),
            global_options: Vec::new(),
        });
        let err = ffmpeg.transcode(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let mut tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_MAX_LINES + 5) {
            tail.push_line(format!("line {i}"));
        }
        let snap = tail.snapshot();
        assert!(!snap.contains("line 0\n"));
        assert!(snap.ends_with(&format!("line {}", STDERR_TAIL_MAX_LINES + 4)));
    }
}
