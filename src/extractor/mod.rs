//! Audio extraction via external command-line tools.
//!
//! The invoker walks an ordered list of [`ExtractionStrategy`] values until
//! one materializes a plausible audio file on disk. Strategies are pure
//! configuration; all temp-file handling, timeouts and success checks live in
//! one loop inside [`invoker::ToolchainExtractor`].

pub mod invoker;
pub mod singleflight;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::Config;
use crate::error::AppResult;

pub use invoker::ToolchainExtractor;
pub use singleflight::SingleFlight;

/// Media identifiers are fixed-length opaque tokens: 11 characters from the
/// URL-safe alphabet. Anything else is rejected before extraction.
static MEDIA_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid media id pattern"));

pub fn is_valid_media_id(id: &str) -> bool {
    MEDIA_ID_RE.is_match(id)
}

/// Builds the upstream watch URL for an (already validated) identifier.
pub fn watch_url(media_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={media_id}")
}

/// How one strategy obtains audio.
#[derive(Debug, Clone)]
pub enum StrategyKind {
    /// Run an extractor binary that downloads and converts in one shot.
    Extractor {
        tool: String,
        /// Extra arguments appended after the common set.
        extra_args: Vec<String>,
        /// Attach the provisioned cookie file when one exists.
        use_cookies: bool,
    },
    /// Resolve a direct stream URL with the extractor, download it over HTTP,
    /// then transcode locally with ffmpeg.
    ResolveThenTranscode { tool: String },
}

/// One fully parameterized attempt at obtaining audio. Pure data; consumed by
/// the invoker loop.
#[derive(Debug, Clone)]
pub struct ExtractionStrategy {
    pub name: &'static str,
    pub kind: StrategyKind,
}

impl ExtractionStrategy {
    /// Argument list for an `Extractor`-kind strategy. The common prefix asks
    /// for mp3 output at the given path; strategy extras follow so they can
    /// override defaults.
    pub fn command_args(&self, output: &Path, url: &str, cookie_file: Option<&PathBuf>) -> Vec<String> {
        let StrategyKind::Extractor {
            extra_args,
            use_cookies,
            ..
        } = &self.kind
        else {
            return Vec::new();
        };

        let mut args: Vec<String> = vec![
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            "0".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--force-overwrites".into(),
            "-o".into(),
            output.to_string_lossy().into_owned(),
        ];

        args.extend(extra_args.iter().cloned());

        if *use_cookies {
            if let Some(cookies) = cookie_file {
                args.push("--cookies".into());
                args.push(cookies.to_string_lossy().into_owned());
            }
        }

        args.push(url.to_string());
        args
    }
}

/// The fixed fallback chain. Order matters: cheap default first, then
/// progressively more explicit parameterizations, then the secondary binary,
/// and finally the manual resolve + download + transcode path.
pub fn default_strategies(config: &Config) -> Vec<ExtractionStrategy> {
    vec![
        ExtractionStrategy {
            name: "default",
            kind: StrategyKind::Extractor {
                tool: config.ytdlp_bin.clone(),
                extra_args: vec![],
                use_cookies: false,
            },
        },
        ExtractionStrategy {
            name: "format-filtered",
            kind: StrategyKind::Extractor {
                tool: config.ytdlp_bin.clone(),
                extra_args: vec![
                    "-f".into(),
                    "bestaudio[ext=m4a]/bestaudio/best".into(),
                    "--extractor-args".into(),
                    "youtube:player_client=android".into(),
                ],
                use_cookies: false,
            },
        },
        ExtractionStrategy {
            name: "raw-flags",
            kind: StrategyKind::Extractor {
                tool: config.ytdlp_bin.clone(),
                extra_args: vec![
                    "-f".into(),
                    "bestaudio/best".into(),
                    "--geo-bypass".into(),
                    "--force-ipv4".into(),
                    "--user-agent".into(),
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
                    "--add-header".into(),
                    "Accept-Language:en-US,en;q=0.9".into(),
                ],
                use_cookies: true,
            },
        },
        ExtractionStrategy {
            name: "secondary-tool",
            kind: StrategyKind::Extractor {
                tool: config.fallback_bin.clone(),
                extra_args: vec!["-f".into(), "bestaudio/best".into()],
                use_cookies: false,
            },
        },
        ExtractionStrategy {
            name: "manual",
            kind: StrategyKind::ResolveThenTranscode {
                tool: config.ytdlp_bin.clone(),
            },
        },
    ]
}

/// Produces an audio payload for a validated media identifier. The HTTP layer
/// depends on this trait so tests can substitute a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, media_id: &str) -> AppResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn valid_media_ids() {
        assert!(is_valid_media_id("dQw4w9WgXcQ"));
        assert!(is_valid_media_id("a-b_c-d_e-f"));
    }

    #[test]
    fn invalid_media_ids() {
        assert!(!is_valid_media_id(""));
        assert!(!is_valid_media_id("short"));
        assert!(!is_valid_media_id("dQw4w9WgXcQQ")); // 12 chars
        assert!(!is_valid_media_id("dQw4w9WgXc!"));
        assert!(!is_valid_media_id("dQw4w9WgXc "));
        assert!(!is_valid_media_id("../../../etc"));
    }

    #[test]
    fn watch_url_embeds_id() {
        assert_eq!(
            watch_url("dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn chain_order_is_fixed() {
        let strategies = default_strategies(&Config::default());
        let names: Vec<&str> = strategies.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "default",
                "format-filtered",
                "raw-flags",
                "secondary-tool",
                "manual"
            ]
        );
    }

    #[test]
    fn command_args_include_output_and_url() {
        let config = Config::default();
        let strategy = &default_strategies(&config)[0];
        let args = strategy.command_args(Path::new("/tmp/x.mp3"), "https://u", None);

        assert!(args.contains(&"--extract-audio".to_string()));
        assert_eq!(args[args.len() - 1], "https://u");
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "/tmp/x.mp3");
    }

    #[test]
    fn cookies_only_attached_when_provisioned() {
        let config = Config::default();
        let strategy = default_strategies(&config)
            .into_iter()
            .find(|s| s.name == "raw-flags")
            .unwrap();

        let without = strategy.command_args(Path::new("/tmp/x.mp3"), "https://u", None);
        assert!(!without.contains(&"--cookies".to_string()));

        let cookie_path = PathBuf::from("/tmp/cookies.txt");
        let with = strategy.command_args(Path::new("/tmp/x.mp3"), "https://u", Some(&cookie_path));
        let i = with.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(with[i + 1], "/tmp/cookies.txt");
    }

    #[test]
    fn default_strategy_omits_cookies_even_when_present() {
        let config = Config::default();
        let strategy = &default_strategies(&config)[0];
        let cookie_path = PathBuf::from("/tmp/cookies.txt");
        let args = strategy.command_args(Path::new("/tmp/x.mp3"), "https://u", Some(&cookie_path));
        assert!(!args.contains(&"--cookies".to_string()));
    }
}
