//! The fallback-chain invoker: tries each configured strategy in order until
//! one produces a plausible audio file, reading it into memory and deleting
//! the scratch file on every path.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{error, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{AppError, AppResult, StrategyError};

use super::{default_strategies, watch_url, AudioExtractor, ExtractionStrategy, StrategyKind};

/// Extraction invoker backed by external extractor binaries.
pub struct ToolchainExtractor {
    config: Config,
    http: reqwest::Client,
    strategies: Vec<ExtractionStrategy>,
}

impl ToolchainExtractor {
    pub fn new(config: Config) -> Result<Self> {
        let strategies = default_strategies(&config);
        Self::with_strategies(config, strategies)
    }

    /// Used by tests to substitute the strategy chain.
    pub fn with_strategies(config: Config, strategies: Vec<ExtractionStrategy>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.strategy_timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        Ok(Self {
            config,
            http,
            strategies,
        })
    }

    /// Runs one strategy to completion, leaving its output at `output`.
    async fn run_strategy(
        &self,
        strategy: &ExtractionStrategy,
        url: &str,
        output: &Path,
    ) -> Result<(), StrategyError> {
        match &strategy.kind {
            StrategyKind::Extractor { tool, .. } => {
                let args = strategy.command_args(output, url, self.config.cookie_file.as_ref());
                run_tool(tool, &args).await
            }
            StrategyKind::ResolveThenTranscode { tool } => {
                self.resolve_then_transcode(tool, url, output).await
            }
        }
    }

    /// The manual path: ask the extractor only for a direct stream URL, fetch
    /// it ourselves, then convert to mp3 locally.
    async fn resolve_then_transcode(
        &self,
        tool: &str,
        url: &str,
        output: &Path,
    ) -> Result<(), StrategyError> {
        let resolve_args: Vec<String> = vec![
            "-f".into(),
            "bestaudio/best".into(),
            "--get-url".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            url.into(),
        ];

        let stdout = run_tool_capture(tool, &resolve_args).await?;
        let stream_url = stdout
            .lines()
            .find(|line| Url::parse(line.trim()).is_ok())
            .map(|line| line.trim().to_string())
            .ok_or(StrategyError::NoStreamUrl)?;

        // Own temp file for the raw download, removed on drop.
        let download = tempfile::Builder::new()
            .prefix("stream-")
            .suffix(".dl")
            .tempfile_in(&self.config.scratch_dir)?
            .into_temp_path();

        let response = self
            .http
            .get(&stream_url)
            .send()
            .await
            .map_err(|e| StrategyError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StrategyError::Download(format!(
                "stream fetch returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StrategyError::Download(e.to_string()))?;
        tokio::fs::write(&download, &body).await?;

        let transcode_args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            download.to_string_lossy().into_owned(),
            "-vn".into(),
            "-acodec".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            "192k".into(),
            output.to_string_lossy().into_owned(),
        ];

        run_tool(&self.config.ffmpeg_bin, &transcode_args).await
    }

    /// Validates and reads a finished attempt's output. Rejects files below
    /// the plausibility floor so a tool that exits zero with an empty or
    /// error-placeholder file does not count as success.
    async fn read_output(&self, path: &Path) -> Result<Bytes, StrategyError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| StrategyError::MissingOutput)?;

        if meta.len() < self.config.min_audio_bytes {
            return Err(StrategyError::TooSmall {
                size: meta.len(),
                floor: self.config.min_audio_bytes,
            });
        }

        let data = tokio::fs::read(path).await?;
        Ok(Bytes::from(data))
    }

    fn scratch_path(&self, media_id: &str, strategy: &ExtractionStrategy) -> std::io::Result<TempPath> {
        Ok(tempfile::Builder::new()
            .prefix(&format!("{media_id}-{}-", strategy.name))
            .suffix(".mp3")
            .tempfile_in(&self.config.scratch_dir)?
            .into_temp_path())
    }
}

#[async_trait]
impl AudioExtractor for ToolchainExtractor {
    async fn extract(&self, media_id: &str) -> AppResult<Bytes> {
        let url = watch_url(media_id);
        let timeout = Duration::from_secs(self.config.strategy_timeout_secs);
        let mut last_error: Option<StrategyError> = None;

        for strategy in &self.strategies {
            info!("🎵 [{}] trying strategy '{}'", media_id, strategy.name);

            // One unique temp path per attempt; dropping it at the end of the
            // iteration deletes the file on success and failure alike.
            let output = match self.scratch_path(media_id, strategy) {
                Ok(path) => path,
                Err(e) => {
                    warn!("⚠️ [{}] scratch file creation failed: {}", media_id, e);
                    last_error = Some(StrategyError::Io(e));
                    continue;
                }
            };

            let attempt = tokio::time::timeout(timeout, self.run_strategy(strategy, &url, &output));

            let failure = match attempt.await {
                Err(_) => StrategyError::TimedOut(self.config.strategy_timeout_secs),
                Ok(Err(e)) => e,
                Ok(Ok(())) => match self.read_output(&output).await {
                    Ok(payload) => {
                        info!(
                            "✅ [{}] strategy '{}' produced {} bytes",
                            media_id,
                            strategy.name,
                            payload.len()
                        );
                        return Ok(payload);
                    }
                    Err(e) => e,
                },
            };

            warn!(
                "⚠️ [{}] strategy '{}' failed: {}",
                media_id, strategy.name, failure
            );
            last_error = Some(failure);
        }

        error!(
            "❌ [{}] all {} extraction strategies exhausted",
            media_id,
            self.strategies.len()
        );

        Err(AppError::Extraction {
            attempts: self.strategies.len(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no strategies configured".to_string()),
        })
    }
}

/// Checks that a tool responds to its version flag and returns the first
/// line of output. Used by the status/debug endpoints and the CLI health
/// check. Extractor binaries take `--version`; ffmpeg takes `-version`.
pub async fn probe_tool_version(tool: &str, version_flag: &str) -> Result<String, StrategyError> {
    let stdout = run_tool_capture(tool, &[version_flag.to_string()]).await?;
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Runs a tool to completion, discarding stdout.
async fn run_tool(tool: &str, args: &[String]) -> Result<(), StrategyError> {
    run_tool_capture(tool, args).await.map(|_| ())
}

/// Runs a tool to completion and returns its stdout. Spawn failures mean the
/// tool is missing entirely; non-zero exits carry a stderr excerpt.
async fn run_tool_capture(tool: &str, args: &[String]) -> Result<String, StrategyError> {
    let output = Command::new(tool)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| StrategyError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(StrategyError::Failed {
            tool: tool.to_string(),
            stderr: stderr_excerpt(&output.stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() > 500 {
        // The cut may land inside a multi-byte character (tool stderr is not
        // guaranteed ASCII); advance to the next boundary before slicing.
        let mut cut = trimmed.len() - 500;
        while !trimmed.is_char_boundary(cut) {
            cut += 1;
        }
        format!("...{}", &trimmed[cut..])
    } else {
        trimmed.to_string()
    }
}
