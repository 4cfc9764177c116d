// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::bridge::NumberMode;

#[derive(Parser, Debug)]
#[command(name = "kubelua")]
#[command(author, version, about = "Script Kubernetes resources from a Lua shell")]
pub struct Args {
    /// Kubernetes context to use (defaults to the kubeconfig current context)
    #[arg(short, long, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Initial namespace; "*" selects all namespaces
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Evaluate a Lua chunk and exit
    #[arg(short, long, value_name = "CHUNK")]
    pub eval: Option<String>,

    /// Run a Lua script and exit
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// How numbers in resource objects are handed to scripts
    #[arg(long, value_enum)]
    pub number_mode: Option<NumberMode>,

    /// Format for printing plain Lua tables
    #[arg(short, long, value_enum, default_value = "json")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn is_batch(&self) -> bool {
        self.eval.is_some() || self.file.is_some()
    }
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}
