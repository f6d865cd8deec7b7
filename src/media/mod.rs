use anyhow::Context;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::{DownloadError, Result};

/// Half-open time range in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

/// One invocation of the media processor
#[derive(Debug, Clone, PartialEq)]
pub struct MediaJob {
    /// Local path or URL to read from
    pub input: OsString,

    /// Image attached as the cover stream
    pub cover: Option<PathBuf>,

    /// Copy codec streams instead of re-encoding
    pub codec_copy: bool,

    /// Part of the input to keep
    pub range: Option<TimeRange>,

    /// ID3 tags written to the output
    pub tags: Vec<(String, String)>,

    pub output: PathBuf,
}

impl MediaJob {
    /// Read a stream (manifest or direct URL) into one local file
    pub fn fetch_stream(url: &str, output: &Path) -> Self {
        Self {
            input: OsString::from(url),
            cover: None,
            codec_copy: false,
            range: None,
            tags: Vec::new(),
            output: output.to_path_buf(),
        }
    }

    /// Cut `range` out of `input` without re-encoding
    pub fn cut(input: &Path, range: TimeRange, output: &Path) -> Self {
        Self {
            input: input.as_os_str().to_os_string(),
            cover: None,
            codec_copy: true,
            range: Some(range),
            tags: Vec::new(),
            output: output.to_path_buf(),
        }
    }

    /// Copy `input` into `output` with tags and an optional cover image
    pub fn tag(input: &Path, cover: Option<&Path>, tags: Vec<(String, String)>, output: &Path) -> Self {
        Self {
            input: input.as_os_str().to_os_string(),
            cover: cover.map(Path::to_path_buf),
            codec_copy: true,
            range: None,
            tags,
            output: output.to_path_buf(),
        }
    }

    /// Command line arguments for ffmpeg
    pub fn ffmpeg_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into(), "-i".into(), self.input.clone()];

        if let Some(cover) = &self.cover {
            args.push("-i".into());
            args.push(cover.as_os_str().to_os_string());
            for map in ["0:0", "1:0"] {
                args.push("-map".into());
                args.push(map.into());
            }
        }

        if self.codec_copy {
            args.push("-codec".into());
            args.push("copy".into());
        }

        if let Some(range) = self.range {
            args.push("-ss".into());
            args.push(range.start.to_string().into());
            args.push("-to".into());
            args.push(range.end.to_string().into());
        }

        if !self.tags.is_empty() {
            args.push("-id3v2_version".into());
            args.push("3".into());
            for (key, value) in &self.tags {
                args.push("-metadata".into());
                args.push(format!("{}={}", key, value).into());
            }
        }

        args.push(self.output.as_os_str().to_os_string());
        args
    }
}

/// Trait for the external tool that remuxes, cuts and tags audio
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Run the job; the output file exists when this returns `Ok`
    async fn process(&self, job: &MediaJob) -> Result<()>;

    /// Name of the tool
    fn tool_name(&self) -> &'static str;
}

/// ffmpeg-backed media processor
pub struct Ffmpeg {
    path: String,
}

impl Ffmpeg {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl MediaProcessor for Ffmpeg {
    async fn process(&self, job: &MediaJob) -> Result<()> {
        let args = job.ffmpeg_args();
        tracing::debug!(
            "Running {} {}",
            self.path,
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );

        let output = Command::new(&self.path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(DownloadError::ExternalToolFailure {
                tool: self.path.clone(),
                status: output.status.to_string(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            }
            .into());
        }

        Ok(())
    }

    fn tool_name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_fetch_stream_args() {
        let job = MediaJob::fetch_stream("https://s.example/a.m3u8", Path::new("/w/Book.mp3"));
        assert_eq!(
            strings(job.ffmpeg_args()),
            ["-y", "-hide_banner", "-i", "https://s.example/a.m3u8", "/w/Book.mp3"]
        );
    }

    #[test]
    fn test_cut_args() {
        let job = MediaJob::cut(
            Path::new("/w/full.mp3"),
            TimeRange { start: 0.0, end: 120.5 },
            Path::new("/w/Ch 1_no_meta.mp3"),
        );
        assert_eq!(
            strings(job.ffmpeg_args()),
            [
                "-y", "-hide_banner", "-i", "/w/full.mp3", "-codec", "copy", "-ss", "0", "-to",
                "120.5", "/w/Ch 1_no_meta.mp3",
            ]
        );
    }

    #[test]
    fn test_tag_args_with_cover() {
        let job = MediaJob::tag(
            Path::new("/w/cut.mp3"),
            Some(Path::new("/w/cover.jpg")),
            vec![("title".to_string(), "Ch 1".to_string()), ("album".to_string(), "Test Book".to_string())],
            Path::new("/out/Ch 1.mp3"),
        );
        assert_eq!(
            strings(job.ffmpeg_args()),
            [
                "-y", "-hide_banner", "-i", "/w/cut.mp3", "-i", "/w/cover.jpg", "-map", "0:0", "-map",
                "1:0", "-codec", "copy", "-id3v2_version", "3", "-metadata", "title=Ch 1",
                "-metadata", "album=Test Book", "/out/Ch 1.mp3",
            ]
        );
    }

    #[test]
    fn test_tag_args_without_cover_have_no_map() {
        let job = MediaJob::tag(
            Path::new("/w/cut.mp3"),
            None,
            vec![("artist".to_string(), "A_B".to_string())],
            Path::new("/out/x.mp3"),
        );
        let args = strings(job.ffmpeg_args());
        assert!(!args.iter().any(|a| a == "-map"));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let ffmpeg = Ffmpeg::new("definitely-not-an-ffmpeg-binary");
        let job = MediaJob::fetch_stream("in", Path::new("out.mp3"));
        assert!(ffmpeg.process(&job).await.is_err());
    }
}
