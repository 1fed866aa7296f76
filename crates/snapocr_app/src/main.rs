mod cli;
mod logging;
mod persistence;
mod render;
mod runner;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::LevelFilter;
use snapocr_core::BatchParams;
use snapocr_engine::{
    AppConfig, BatchMode, BatchSettings, CancellationToken, Coordinator, FileExporter,
    HttpOcrClient, InputKind, OcrClient, OcrRequest, OcrSettings, TranslateSettings,
    TranslationClient,
};
use snapocr_logging::{ocr_info, ocr_warn};
use tokio::runtime::Runtime;

use crate::cli::{Cli, Command, ConfigAction, ModeArg};
use crate::runner::{run_batch, BatchRequest, EffectRunner};

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(destination) = cli.log.destination() {
        let level = if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        logging::initialize(destination, level);
    }

    match cli.command {
        Command::Config { action } => run_config(&cli.config, action),
        Command::Batch {
            files,
            mode,
            output_dir,
            format,
            concurrency,
            model,
            force,
        } => {
            let config = load_config(&cli.config, model.as_deref())?;
            let args = BatchArgs {
                files,
                mode,
                output_dir,
                format,
                concurrency,
                model,
                force,
            };
            run_batch_command(&config, args)
        }
        Command::Ocr {
            file,
            model,
            screenshot,
        } => {
            let config = load_config(&cli.config, model.as_deref())?;
            run_ocr(&config, &file, model, screenshot)
        }
        Command::Translate { text, mode, to } => {
            let config = load_config(&cli.config, None)?;
            run_translate(&config, text, &mode, &to)
        }
    }
}

fn load_config(path: &Path, requested_model: Option<&str>) -> Result<AppConfig> {
    let mut config = AppConfig::load(path)?;
    config.apply_env_overrides(requested_model);
    config.validate()?;
    ocr_info!("Loaded config from {:?}", path);
    Ok(config)
}

fn runtime() -> Result<Runtime> {
    Runtime::new().context("failed to start the async runtime")
}

struct BatchArgs {
    files: Vec<PathBuf>,
    mode: ModeArg,
    output_dir: Option<PathBuf>,
    format: Option<String>,
    concurrency: Option<usize>,
    model: Option<String>,
    force: bool,
}

fn run_batch_command(config: &AppConfig, args: BatchArgs) -> Result<()> {
    let mode = BatchMode::from(args.mode);
    let defaults = config.batch.for_mode(mode);
    let params = BatchParams {
        model: args.model,
        output_dir: args
            .output_dir
            .unwrap_or_else(|| defaults.output_dir.clone()),
        format: args.format.unwrap_or_else(|| defaults.format.clone()),
        max_concurrency: args.concurrency.unwrap_or(defaults.max_concurrency),
    };

    let runtime = runtime()?;
    let client = HttpOcrClient::new(config, OcrSettings::default())?;
    let coordinator = Coordinator::new(
        runtime.handle().clone(),
        Arc::new(client),
        Arc::new(FileExporter::new()),
        BatchSettings::default(),
    );
    let mut runner = EffectRunner::new(coordinator, mode);

    let stop_requested = Arc::new(AtomicBool::new(false));
    let flag = stop_requested.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ocr_warn!("Ctrl-C received; stopping batch");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let view = run_batch(
        &mut runner,
        BatchRequest {
            inputs: args.files,
            params,
            force: args.force,
        },
        &stop_requested,
        &mut |line: &str| println!("{line}"),
    );

    if let Some(reason) = view.last_error {
        bail!("batch rejected: {reason}");
    }
    if view.counts.error > 0 {
        bail!(
            "{} of {} files failed",
            view.counts.error,
            view.counts.total()
        );
    }
    Ok(())
}

fn run_ocr(config: &AppConfig, file: &Path, model: Option<String>, screenshot: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let (model, optimize_for_small) = if screenshot {
        (config.screenshot_model.clone(), true)
    } else {
        (model.unwrap_or_else(|| config.current_model.clone()), false)
    };

    let runtime = runtime()?;
    let client = HttpOcrClient::new(config, OcrSettings::default())?;
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let request = OcrRequest {
        bytes: &bytes,
        kind: InputKind::from_path(file),
        model: Some(&model),
        optimize_for_small,
    };
    let document = runtime.block_on(client.recognize(request, &cancel))?;
    if document.has_content() {
        println!("{}", document.text());
    } else {
        eprintln!("no text recognized");
    }
    Ok(())
}

fn run_translate(config: &AppConfig, text: Option<String>, mode: &str, to: &str) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read text from stdin")?;
            buffer
        }
    };
    if text.trim().is_empty() {
        bail!("nothing to translate");
    }

    let runtime = runtime()?;
    let client = TranslationClient::new(config.translation.clone(), TranslateSettings::default())?;
    let translated = runtime.block_on(client.translate(text.trim(), mode, to))?;
    println!("{translated}");
    Ok(())
}

fn run_config(path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = AppConfig::load(path)?;
            config.apply_env_overrides(None);
            mask_secrets(&mut config);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            let written = AppConfig::default().save(path)?;
            println!("wrote {}", written.display());
        }
        ConfigAction::Validate => {
            let mut config = AppConfig::load(path)?;
            config.apply_env_overrides(None);
            config.validate()?;
            println!("{}: ok", path.display());
        }
    }
    Ok(())
}

fn mask_secrets(config: &mut AppConfig) {
    for endpoint in config.models.values_mut() {
        if !endpoint.token.is_empty() {
            endpoint.token = "****".to_string();
        }
    }
    if !config.translation.api_key.is_empty() {
        config.translation.api_key = "****".to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked() {
        let mut config = AppConfig::default();
        config.translation.api_key = "sk-secret".to_string();
        if let Some(endpoint) = config.models.values_mut().next() {
            endpoint.token = "tok".to_string();
        }
        mask_secrets(&mut config);
        assert_eq!(config.translation.api_key, "****");
        assert!(config
            .models
            .values()
            .all(|endpoint| endpoint.token.is_empty() || endpoint.token == "****"));
    }
}
