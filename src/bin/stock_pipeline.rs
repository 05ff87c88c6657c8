use stock_pipeline::config::Config;
use stock_pipeline::pipeline::{Pipeline, DAILY_LOOKBACK_DAYS};
use stock_pipeline::services::exporter::{Exporter, PostgresSink};
use stock_pipeline::services::fetcher::Fetcher;
use stock_pipeline::services::loader::Loader;
use stock_pipeline::services::quality::QualityGate;
use stock_pipeline::services::transformer::{DbtTransformer, Transformer};
use stock_pipeline::sources::yahoo::YahooSource;
use stock_pipeline::warehouse;

use anyhow::{anyhow, Context};
use clap::{App, Arg, ArgMatches, SubCommand};
use log::{info, warn};
use std::sync::Arc;

const INITIAL_LOOKBACK_DAYS: u32 = 365;

fn lookback_arg(default: &'static str) -> Arg<'static> {
    Arg::with_name("lookback-days")
        .short('l')
        .long("lookback-days")
        .value_name("DAYS")
        .help("Number of calendar days to fetch, ending today")
        .takes_value(true)
        .default_value(default)
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = matches
        .value_of(name)
        .ok_or_else(|| anyhow!("missing value for --{}", name))?;
    raw.parse::<T>()
        .with_context(|| format!("invalid value for --{}: {}", name, raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let app = App::new("stock_pipeline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Daily stock price pipeline: fetch, load into DuckDB, transform with dbt, check")
        .subcommand(
            SubCommand::with_name("fetch")
                .about("Fetch daily bars for every configured symbol into Parquet files")
                .arg(lookback_arg("365")),
        )
        .subcommand(SubCommand::with_name("load").about("Upsert every Parquet file in DATA_DIR into DuckDB"))
        .subcommand(SubCommand::with_name("transform").about("Run dbt models and tests"))
        .subcommand(SubCommand::with_name("check").about("Run the row-count quality checks"))
        .subcommand(
            SubCommand::with_name("run")
                .about("Run fetch, load, transform and check with retries")
                .arg(lookback_arg("7")),
        )
        .subcommand(SubCommand::with_name("export").about("Copy mart and staging tables to PostgreSQL"))
        .subcommand(
            SubCommand::with_name("explore")
                .about("Show the latest rows of the raw price table")
                .arg(
                    Arg::with_name("symbol")
                        .short('s')
                        .long("symbol")
                        .value_name("SYMBOL")
                        .help("Only show this symbol")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("limit")
                        .short('n')
                        .long("limit")
                        .value_name("LIMIT")
                        .help("Maximum number of rows to display")
                        .takes_value(true)
                        .default_value("10"),
                ),
        );

    let matches = app.get_matches();
    let config = Config::from_env()?;

    match matches.subcommand() {
        Some(("fetch", sub)) => {
            let lookback: u32 = parse_number(sub, "lookback-days")?;
            let fetcher = Fetcher::new(&config, Arc::new(YahooSource::new()?));
            let report = fetcher.run_ingestion(lookback).await;
            for (symbol, reason) in &report.failed {
                warn!("{} failed: {}", symbol, reason);
            }
        }
        Some(("load", _)) => {
            let rows = Loader::new(&config).load(None)?;
            info!("raw.stock_prices holds {} rows", rows);
        }
        Some(("transform", _)) => {
            DbtTransformer::new(&config).transform().await?;
        }
        Some(("check", _)) => {
            let report = QualityGate::new(&config).run()?;
            for (name, count) in &report.counts {
                println!("{:<10} {}", name, count);
            }
        }
        Some(("run", sub)) => {
            let lookback: u32 = parse_number(sub, "lookback-days")?;
            let source = Arc::new(YahooSource::new()?);
            let transformer = Arc::new(DbtTransformer::new(&config));
            let mut pipeline = Pipeline::new(config, source, transformer)?.with_lookback_days(lookback);
            pipeline.run().await?;
        }
        Some(("export", _)) => {
            let sink = PostgresSink::connect(&config.pg_conn)
                .await
                .context("could not connect to PostgreSQL")?;
            Exporter::new(&config).export(&sink).await?;
        }
        Some(("explore", sub)) => {
            let limit: usize = parse_number(sub, "limit")?;
            let connection = warehouse::open(&config.db_path)?;
            let bars = warehouse::latest_bars(&connection, sub.value_of("symbol"), limit)?;
            if bars.is_empty() {
                println!("No rows in {}", warehouse::RAW_TABLE);
                return Ok(());
            }
            println!(
                "{:<8} {:<10} {:>10} {:>10} {:>10} {:>10} {:>12}",
                "Symbol", "Date", "Open", "High", "Low", "Close", "Volume"
            );
            println!("{:-<76}", "");
            for bar in &bars {
                println!(
                    "{:<8} {:<10} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12}",
                    bar.symbol, bar.trade_date, bar.open, bar.high, bar.low, bar.close, bar.volume
                );
            }
        }
        _ => {
            info!(
                "No command specified. Use --help for usage information (initial backfill: fetch --lookback-days {}, daily run: run --lookback-days {}).",
                INITIAL_LOOKBACK_DAYS, DAILY_LOOKBACK_DAYS
            );
        }
    }

    Ok(())
}
