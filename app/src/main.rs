//! sb-subscribe — entrypoint
//! - tracing 初始化
//! - 读取 providers 配置（文件或 --temp-json-data）
//! - 拉取订阅、合并模板，写出 sing-box 配置

mod cli;
mod save;
mod tracing_init;

use anyhow::Context;
use clap::Parser;
use sb_subscribe::http::ReqwestHttpClient;
use sb_subscribe::Output;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    tracing_init::init_tracing_once();

    let config = args.providers()?;
    let client = ReqwestHttpClient::new().context("build http client")?;
    let output = sb_subscribe::generate(&config, &client)?;
    if let Output::Nodes(nodes) = &output {
        tracing::info!(nodes = nodes.len(), "node list generated");
    }

    let json = output.to_pretty_json().context("serialize output")?;
    let path = args.output_path(&config);
    let written = save::save_output(&path, &json, config.auto_backup)?;
    tracing::info!(path = %written.display(), "config written");
    Ok(())
}
