mod chat;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use config::{AppConfig, ConfigStore};
use core_types::{ProviderKind, RandomChooser};
use provider_http::{HttpChatProvider, LocalResponder, ProviderEndpoint, StreamPacing};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::chat::ChatRepl;

#[derive(Parser)]
#[command(name = "misaki", about = "Chat with a Tokyo guide companion")]
struct Opt {
    /// directory holding config.json.
    #[arg(long, env = "MISAKI_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// overrides the provider selected in config.json.
    #[arg(long)]
    provider: Option<ProviderArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    Local,
    #[value(name = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl From<ProviderArg> for ProviderKind {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Local => ProviderKind::Local,
            ProviderArg::OpenAi => ProviderKind::OpenAi,
            ProviderArg::Anthropic => ProviderKind::Anthropic,
            ProviderArg::Gemini => ProviderKind::Gemini,
        }
    }
}

fn main() -> ExitCode {
    let opt = Opt::parse();

    let mut data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.push("misaki");
    if let Err(err) = fs::create_dir_all(&data_dir) {
        eprintln!("failed to prepare data dir: {err}");
    }
    let _log_guard = init_local_logger(&data_dir.join("logs"));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to create tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(opt, &data_dir)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err:#}");
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(opt: Opt, data_dir: &Path) -> Result<()> {
    let config_store = match opt.config_dir {
        Some(dir) => ConfigStore::from_dir(dir),
        None => ConfigStore::from_default_location()?,
    };
    let mut config = match config_store.load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err:#}");
            AppConfig::default()
        }
    };
    if let Some(provider) = opt.provider {
        config.provider = provider.into();
    }

    let provider = build_provider(&config);
    info!(
        provider = %provider.kind(),
        config = %config_store.path().display(),
        "starting chat"
    );

    let repl = ChatRepl::open(config, provider, &data_dir.join("misaki.db"))
        .await
        .context("failed to start chat session")?;
    repl.run().await
}

fn build_provider(config: &AppConfig) -> HttpChatProvider {
    let streaming = &config.streaming;
    let local = LocalResponder::new(
        Arc::new(RandomChooser),
        streaming.local_latency_ms.min..streaming.local_latency_ms.max,
    );
    let pacing = StreamPacing {
        local_char_delay: streaming.local_char_delay(),
        remote_char_delay: streaming.remote_char_delay(),
    };

    let provider = match config.provider_settings(config.provider) {
        Some(settings) if config.provider != ProviderKind::Local => {
            let mut endpoint = ProviderEndpoint::new(&settings.base_url, &settings.model);
            endpoint.extra_headers = settings.extra_headers.clone();
            if let Some(api_key) = settings.api_key() {
                endpoint = endpoint.with_api_key(api_key);
            }
            HttpChatProvider::for_kind(config.provider, endpoint)
        }
        _ => HttpChatProvider::local(),
    };
    provider.with_local_responder(local).with_pacing(pacing)
}

fn init_local_logger(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "misaki.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,app_cli=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_override() {
        let opt = Opt::try_parse_from(["misaki", "--provider", "openai", "--config-dir", "/tmp/x"])
            .expect("parse");
        assert!(matches!(opt.provider, Some(ProviderArg::OpenAi)));
        assert_eq!(opt.config_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn local_selection_builds_local_provider() {
        let config = AppConfig::default();
        assert_eq!(build_provider(&config).kind(), ProviderKind::Local);
    }

    #[test]
    fn remote_selection_uses_configured_shape() {
        let config = AppConfig {
            provider: ProviderKind::Anthropic,
            ..AppConfig::default()
        };
        assert_eq!(build_provider(&config).kind(), ProviderKind::Anthropic);
    }
}
