//! Streamlink-backed recorder.
//!
//! Runs `streamlink --stdout <url> <quality>` and copies its output into a
//! timestamped `.ts` file under the configured output directory. The active
//! stream is registered under the target's stream key, so closing it from
//! the registry stops the copy loop and kills the process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    CloseSignal, Recorder, RecorderBuilder, RecorderContext, RecorderError, RecorderOutcome,
    RecorderResult, StreamHandle, StreamRegistry,
};
use crate::config::Identity;

const DEFAULT_QUALITY: &str = "best";
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builds a [`StreamlinkRecorder`] for any platform streamlink supports.
#[derive(Debug, Clone)]
pub struct StreamlinkBuilder {
    binary_path: String,
}

impl StreamlinkBuilder {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

impl Default for StreamlinkBuilder {
    fn default() -> Self {
        Self::new("streamlink")
    }
}

impl StreamlinkBuilder {
    /// Resolve capture settings for one record.
    fn configure(&self, ctx: RecorderContext) -> StreamlinkRecorder {
        let record = &ctx.record;

        let url = inherited_str(&ctx, "url")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.platform.watch_url(record.identity.id()));
        let quality = inherited_str(&ctx, "quality")
            .unwrap_or(DEFAULT_QUALITY)
            .to_string();
        let proxy = record
            .option_str("proxy")
            .or(ctx.config.proxy.as_deref())
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let output_dir = record
            .option_str("output")
            .or(ctx.config.output.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        StreamlinkRecorder {
            binary_path: self.binary_path.clone(),
            identity: record.identity.clone(),
            name: record.name.clone(),
            url,
            quality,
            proxy,
            output_dir,
            streams: ctx.streams,
        }
    }
}

/// Look up `key` on the record, falling back to the top-level config.
///
/// The flat config omits per-record values equal to the inherited global,
/// so the top-level value applies whenever the record has none.
fn inherited_str<'a>(ctx: &'a RecorderContext, key: &str) -> Option<&'a str> {
    ctx.record
        .option_str(key)
        .or_else(|| ctx.config.extra.get(key).and_then(Value::as_str))
}

impl RecorderBuilder for StreamlinkBuilder {
    fn build(&self, ctx: RecorderContext) -> crate::Result<Box<dyn Recorder>> {
        Ok(Box::new(self.configure(ctx)))
    }
}

/// Records one target by piping streamlink's stdout into a file.
#[derive(Debug)]
pub struct StreamlinkRecorder {
    binary_path: String,
    identity: Identity,
    name: String,
    url: String,
    quality: String,
    proxy: Option<String>,
    output_dir: PathBuf,
    streams: StreamRegistry,
}

impl StreamlinkRecorder {
    fn build_args(&self) -> Vec<String> {
        let mut args = vec!["--stdout".to_string()];

        if let Some(ref proxy) = self.proxy {
            args.extend(["--http-proxy".to_string(), proxy.clone()]);
        }

        // Stream URL must be the first positional argument followed by quality
        args.push(self.url.clone());
        args.push(self.quality.clone());

        args
    }

    fn output_path(&self, started_at: DateTime<Local>) -> PathBuf {
        let name: String = self
            .name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect();
        self.output_dir.join(format!(
            "{}_{}.ts",
            name,
            started_at.format("%Y%m%d_%H%M%S")
        ))
    }
}

async fn ensure_output_dir(dir: &Path) -> Result<(), RecorderError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        RecorderError::new(format!(
            "Failed to create output directory {}: {}",
            dir.display(),
            e
        ))
    })
}

#[async_trait]
impl Recorder for StreamlinkRecorder {
    async fn run(self: Box<Self>, cancel: CancellationToken) -> RecorderResult {
        ensure_output_dir(&self.output_dir).await?;

        let args = self.build_args();
        debug!(identity = %self.identity, ?args, "Starting streamlink");

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RecorderError::new(format!("Failed to spawn {}: {}", self.binary_path, e))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::new("Failed to capture streamlink stdout"))?;

        let path = self.output_path(Local::now());
        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            RecorderError::new(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let source = CloseSignal::new();
        let sink = CloseSignal::new();
        let key = self.identity.stream_key();
        let registered = self
            .streams
            .register(key.clone(), StreamHandle::new(source.clone(), sink.clone()));

        info!(
            identity = %self.identity,
            url = %self.url,
            path = %path.display(),
            "Recording started"
        );

        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut written: u64 = 0;
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(RecorderOutcome::Cancelled),
                _ = source.closed() => break Ok(RecorderOutcome::Cancelled),
                _ = sink.closed() => break Ok(RecorderOutcome::Cancelled),
                read = stdout.read(&mut buffer) => match read {
                    Ok(0) => break Ok(RecorderOutcome::Completed),
                    Ok(n) => {
                        if let Err(e) = file.write_all(&buffer[..n]).await {
                            break Err(RecorderError::new(format!(
                                "Failed to write {}: {}",
                                path.display(),
                                e
                            )));
                        }
                        written += n as u64;
                    }
                    Err(e) => break Err(RecorderError::new(format!(
                        "Failed to read streamlink output: {}",
                        e
                    ))),
                },
            }
        };

        if let Err(e) = child.start_kill() {
            debug!(identity = %self.identity, "streamlink already exited: {}", e);
        }
        let _ = child.wait().await;
        if let Err(e) = file.flush().await {
            warn!(path = %path.display(), "Failed to flush recording: {}", e);
        }
        self.streams.unregister(&key, &registered);

        match &result {
            Ok(outcome) => info!(
                identity = %self.identity,
                bytes = written,
                ?outcome,
                "Recording finished"
            ),
            Err(e) => warn!(identity = %self.identity, bytes = written, "Recording failed: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DesiredSet, RecorderConfig, ResolvedRecord};
    use crate::recorder::Platform;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn context(record: ResolvedRecord, config: RecorderConfig) -> RecorderContext {
        RecorderContext {
            platform: record.identity.platform().parse().unwrap(),
            config: Arc::new(config),
            record,
            streams: StreamRegistry::new(),
        }
    }

    fn recorder(ctx: RecorderContext) -> StreamlinkRecorder {
        StreamlinkBuilder::default().configure(ctx)
    }

    #[test]
    fn test_build_args_with_defaults() {
        let record = ResolvedRecord::new(Identity::new("Twitch", "u2"), "u2");
        let config = RecorderConfig {
            proxy: Some("http://127.0.0.1:8080".to_string()),
            ..Default::default()
        };

        let args = recorder(context(record, config)).build_args();
        assert_eq!(
            args,
            vec![
                "--stdout",
                "--http-proxy",
                "http://127.0.0.1:8080",
                "https://www.twitch.tv/u2",
                "best",
            ]
        );
    }

    #[test]
    fn test_record_options_override_globals() {
        let record = ResolvedRecord::new(Identity::new("Huya", "u3"), "u3")
            .with_option("quality", "720p")
            .with_option("proxy", "socks5://proxy:1080")
            .with_option("url", "https://www.huya.com/custom");
        let config = RecorderConfig {
            proxy: Some("http://global".to_string()),
            ..Default::default()
        };

        let args = recorder(context(record, config)).build_args();
        assert_eq!(
            args,
            vec![
                "--stdout",
                "--http-proxy",
                "socks5://proxy:1080",
                "https://www.huya.com/custom",
                "720p",
            ]
        );
    }

    #[test]
    fn test_global_quality_is_inherited() {
        let yaml = "quality: 720p\ngroups:\n  - platform: Douyu\n    users:\n      - id: x\n      - id: y\n        quality: source\n";
        let flat = config_compiler::compile_str(yaml).unwrap();
        let config: RecorderConfig = serde_json::from_value(flat.into_value()).unwrap();
        let desired = DesiredSet::from_config(&config);
        let config = Arc::new(config);

        let quality = |id: &str| {
            let record = desired.get(&Identity::new("Douyu", id)).unwrap().clone();
            let ctx = RecorderContext {
                platform: Platform::Douyu,
                config: config.clone(),
                record,
                streams: StreamRegistry::new(),
            };
            recorder(ctx).build_args().last().cloned().unwrap()
        };

        assert_eq!(quality("x"), "720p");
        assert_eq!(quality("y"), "source");
    }

    #[test]
    fn test_output_path() {
        let record = ResolvedRecord::new(Identity::new("Douyu", "9999"), "a/b: show")
            .with_option("output", "/rec/douyu");
        let recorder = recorder(context(record, RecorderConfig::default()));
        let started = Local.with_ymd_and_hms(2024, 3, 9, 21, 5, 7).unwrap();

        assert_eq!(
            recorder.output_path(started),
            PathBuf::from("/rec/douyu/a_b_ show_20240309_210507.ts")
        );
    }

    #[test]
    fn test_builder_accepts_every_platform() {
        let builder = StreamlinkBuilder::default();
        for platform in Platform::all() {
            let record = ResolvedRecord::new(Identity::new(platform.to_string(), "x"), "x");
            assert!(builder.build(context(record, RecorderConfig::default())).is_ok());
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let record = ResolvedRecord::new(Identity::new("Twitch", "u2"), "u2")
            .with_option("output", dir.path().to_string_lossy().to_string());
        let ctx = context(record, RecorderConfig::default());
        let streams = ctx.streams.clone();
        let recorder = StreamlinkBuilder::new("/nonexistent/streamlink")
            .build(ctx)
            .unwrap();

        let err = recorder.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.message.contains("Failed to spawn"));
        assert!(streams.is_empty());
    }
}
