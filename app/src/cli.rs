use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sb_subscribe::ProvidersConfig;

#[derive(Parser, Debug)]
#[command(name = "sb-subscribe")]
#[command(about = "Aggregate proxy subscriptions into a sing-box config", long_about = None)]
pub struct Args {
    /// Providers document (JSON)
    #[arg(long, default_value = "providers.json")]
    pub config: PathBuf,
    /// Inline providers document; takes precedence over --config
    #[arg(long = "temp-json-data", value_name = "JSON")]
    pub temp_json_data: Option<String>,
    /// Template path or http(s) URL, overrides config_template
    #[arg(long)]
    pub template: Option<String>,
    /// Output path, overrides save_config_path
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
    /// Emit the node list only
    #[arg(long)]
    pub nodes_only: bool,
}

impl Args {
    /// Load the providers document and apply command-line overrides.
    pub fn providers(&self) -> Result<ProvidersConfig> {
        let inline = self
            .temp_json_data
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "{}");
        let mut config = match inline {
            Some(json) => ProvidersConfig::from_json(json).context("parse --temp-json-data")?,
            None => {
                let text = std::fs::read_to_string(&self.config)
                    .with_context(|| format!("read {}", self.config.display()))?;
                ProvidersConfig::from_json(&text)
                    .with_context(|| format!("parse {}", self.config.display()))?
            }
        };
        if let Some(t) = &self.template {
            config.config_template = Some(t.clone());
        }
        if self.nodes_only {
            config.only_nodes = true;
        }
        Ok(config)
    }

    pub fn output_path(&self, config: &ProvidersConfig) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.save_config_path))
    }
}
