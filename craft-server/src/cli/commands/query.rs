//! One-shot `add` and `split` queries against the configured engine

use crate::cli::{
    commands::{build_service, EngineArgs},
    config::Config,
    error::{CliError, CliResult},
};
use clap::Args;
use infini_craft::Symbol;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct AddCommand {
    /// First symbol
    pub first: String,

    /// Second symbol
    pub second: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct SplitCommand {
    /// Symbol to split
    pub symbol: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

fn symbol(value: String) -> CliResult<Symbol> {
    Symbol::new(value).map_err(|e| CliError::InvalidArgument(e.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn add(cmd: AddCommand, mut config: Config) -> CliResult<()> {
    cmd.engine.apply(&mut config);
    let first = symbol(cmd.first)?;
    let second = symbol(cmd.second)?;

    let service = build_service(&config)?;
    let result = service.combine(&first, &second).await?;
    print_json(&result)
}

pub async fn split(cmd: SplitCommand, mut config: Config) -> CliResult<()> {
    cmd.engine.apply(&mut config);
    let symbol = symbol(cmd.symbol)?;

    let service = build_service(&config)?;
    let pair = service.split(&symbol).await?;
    print_json(&pair)
}
