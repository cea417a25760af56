use anyhow::Result;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Server
    pub port: u16,
    pub frontend_origin: String,

    // Cache
    pub cache_ttl_secs: u64,
    pub cache_sweep_secs: u64,

    // Rate limiting (audio path only)
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,

    // Extraction tools
    pub ytdlp_bin: String,
    pub fallback_bin: String,
    pub ffmpeg_bin: String,

    // Extraction limits
    pub strategy_timeout_secs: u64,
    pub min_audio_bytes: u64,

    // Paths
    pub scratch_dir: PathBuf,
    pub cookie_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let scratch_dir: PathBuf = std::env::var("SCRATCH_DIR")
            .unwrap_or_else(|_| "/tmp/open-audio-proxy".to_string())
            .into();

        let config = Self {
            // Server
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()?,
            frontend_origin: std::env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            // Cache
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
            cache_sweep_secs: std::env::var("CACHE_SWEEP_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()?,

            // Rate limiting
            rate_limit_max: std::env::var("RATE_LIMIT_MAX")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            rate_limit_window_secs: std::env::var("RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "900".to_string()) // 15 minutes
                .parse()?,

            // Tools
            ytdlp_bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            fallback_bin: std::env::var("FALLBACK_BIN")
                .unwrap_or_else(|_| "youtube-dl".to_string()),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),

            // Limits
            strategy_timeout_secs: std::env::var("STRATEGY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,
            min_audio_bytes: std::env::var("MIN_AUDIO_BYTES")
                .unwrap_or_else(|_| "10240".to_string()) // 10 KiB plausibility floor
                .parse()?,

            scratch_dir,
            cookie_file: None,
        };

        std::fs::create_dir_all(&config.scratch_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Decodes `YOUTUBE_COOKIES_B64` (if set) and writes the cookie file once
    /// into the scratch directory. Strategies that support cookies pick the
    /// path up from the returned config.
    pub fn provision_cookies(self) -> Result<Self> {
        let Ok(encoded) = std::env::var("YOUTUBE_COOKIES_B64") else {
            return Ok(self);
        };
        self.provision_cookies_from(&encoded)
    }

    fn provision_cookies_from(mut self, encoded: &str) -> Result<Self> {
        if encoded.trim().is_empty() {
            return Ok(self);
        }

        match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(decoded) => {
                let path = self.scratch_dir.join("cookies.txt");
                std::fs::write(&path, decoded)?;
                info!("🍪 Cookie file written to {}", path.display());
                self.cookie_file = Some(path);
            }
            Err(e) => {
                warn!("⚠️ YOUTUBE_COOKIES_B64 is not valid base64, ignoring: {}", e);
            }
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("Cache TTL must be greater than 0");
        }

        if self.cache_sweep_secs == 0 {
            anyhow::bail!("Cache sweep interval must be greater than 0");
        }

        if self.rate_limit_max == 0 {
            anyhow::bail!("Rate limit max must be greater than 0");
        }

        if self.rate_limit_window_secs == 0 {
            anyhow::bail!("Rate limit window must be greater than 0");
        }

        if self.strategy_timeout_secs == 0 {
            anyhow::bail!("Strategy timeout must be greater than 0");
        }

        if self.min_audio_bytes == 0 {
            anyhow::bail!("Minimum audio byte floor must be greater than 0");
        }

        if self.ytdlp_bin.trim().is_empty() {
            anyhow::bail!("Extractor binary path cannot be empty");
        }

        Ok(())
    }

    /// Safe summary for startup logging, excludes anything derived from
    /// secrets.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Server: port {}, origin {}\n  \
            Cache: {}s TTL, sweep every {}s\n  \
            Rate limit: {} req / {}s window\n  \
            Tools: {} (fallback {}), transcode via {}\n  \
            Extraction: {}s per-strategy timeout, {} byte floor, cookies: {}",
            self.port,
            self.frontend_origin,
            self.cache_ttl_secs,
            self.cache_sweep_secs,
            self.rate_limit_max,
            self.rate_limit_window_secs,
            self.ytdlp_bin,
            self.fallback_bin,
            self.ffmpeg_bin,
            self.strategy_timeout_secs,
            self.min_audio_bytes,
            self.cookie_file.is_some(),
        )
    }
}

/// Default values, chosen to match a small single-instance deployment.
impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            frontend_origin: "*".to_string(),
            cache_ttl_secs: 3600,
            cache_sweep_secs: 600,
            rate_limit_max: 60,
            rate_limit_window_secs: 900,
            ytdlp_bin: "yt-dlp".to_string(),
            fallback_bin: "youtube-dl".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            strategy_timeout_secs: 120,
            min_audio_bytes: 10240,
            scratch_dir: "/tmp/open-audio-proxy".into(),
            cookie_file: None,
        }
    }
}
