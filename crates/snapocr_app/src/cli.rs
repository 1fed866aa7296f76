use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use snapocr_engine::BatchMode;

use crate::logging::LogDestination;

#[derive(Parser, Debug)]
#[command(name = "snapocr")]
#[command(about = "Batch OCR through a remote recognition service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (JSON); defaults are used when it does not exist
    #[arg(long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    /// Where log output goes
    #[arg(long, value_enum, default_value = "file", global = true)]
    pub log: LogTarget,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recognize a set of files and export one result per file
    Batch {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Which batch defaults to use
        #[arg(short, long, value_enum, default_value = "images")]
        mode: ModeArg,

        /// Output directory (default: from config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Export format label: txt, json, csv, md, html, xlsx, layout, latex, code, docx, pdf
        #[arg(short, long)]
        format: Option<String>,

        /// Concurrent OCR requests, 1..=20 (default: from config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Model name (default: current model from config)
        #[arg(long)]
        model: Option<String>,

        /// Reprocess files that already succeeded in an earlier run
        #[arg(long)]
        force: bool,
    },

    /// Recognize one file and print the text
    Ocr {
        #[arg(required = true)]
        file: PathBuf,

        /// Model name (default: current model from config)
        #[arg(long)]
        model: Option<String>,

        /// Use the screenshot model with small-text tuning
        #[arg(long)]
        screenshot: bool,
    },

    /// Send text through a translation prompt
    Translate {
        /// Text to translate; read from stdin when omitted
        text: Option<String>,

        /// Prompt mode registered in the config
        #[arg(long, default_value = "translate")]
        mode: String,

        /// Target language substituted for ${tolang}
        #[arg(long, default_value = "English")]
        to: String,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective configuration with tokens masked
    Show,
    /// Write the defaults to the config path unless a file exists there
    Init,
    /// Load and validate the configuration
    Validate,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Images,
    Docs,
}

impl From<ModeArg> for BatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Images => BatchMode::Images,
            ModeArg::Docs => BatchMode::Docs,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
    Off,
}

impl LogTarget {
    pub fn destination(self) -> Option<LogDestination> {
        match self {
            LogTarget::File => Some(LogDestination::File),
            LogTarget::Terminal => Some(LogDestination::Terminal),
            LogTarget::Both => Some(LogDestination::Both),
            LogTarget::Off => None,
        }
    }
}
