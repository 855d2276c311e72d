// Copyright 2018-2021 Hivemind Developers.
// This file is part of hivemind.

// hivemind is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// hivemind is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with hivemind.  If not, see <http://www.gnu.org/licenses/>.

//! Runtime configuration, merged from CLI flags, an optional TOML file
//! and the environment. CLI wins over file, file wins over defaults.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Parser)]
#[command(name = "hivemind", about = "Social blockchain indexer")]
pub struct CliOpts {
	/// Path to a TOML configuration file.
	#[arg(long)]
	pub config: Option<PathBuf>,
	/// Connection string for the relational store.
	#[arg(long, env = "DATABASE_URL")]
	pub database_url: Option<String>,
	/// Upstream JSON-RPC endpoint. Suffix `#appbase` enables the appbase
	/// call convention.
	#[arg(long, env = "STEEMD_URL")]
	pub steemd_url: Option<String>,
	/// RPC parallelism for batch requests.
	#[arg(long, env = "MAX_WORKERS")]
	pub max_workers: Option<usize>,
	/// JSON-RPC batch size.
	#[arg(long, env = "MAX_BATCH")]
	pub max_batch: Option<usize>,
	/// Live-tail reorg buffer, in blocks.
	#[arg(long, env = "TRAIL_BLOCKS")]
	pub trail_blocks: Option<usize>,
	/// API server port (served by a separate process; parsed here so a
	/// shared config file round-trips).
	#[arg(long, env = "PORT")]
	pub port: Option<u16>,
	#[arg(long, env = "LOG_LEVEL")]
	pub log_level: Option<String>,
	/// Optional file to mirror logs into.
	#[arg(long)]
	pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TomlConfig {
	database_url: Option<String>,
	steemd_url: Option<String>,
	max_workers: Option<usize>,
	max_batch: Option<usize>,
	trail_blocks: Option<usize>,
	port: Option<u16>,
	log_level: Option<String>,
	log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub database_url: String,
	pub steemd_url: String,
	pub max_workers: usize,
	pub max_batch: usize,
	pub trail_blocks: usize,
	pub port: u16,
	pub log_level: log::LevelFilter,
	pub log_file: Option<PathBuf>,
}

impl Config {
	pub fn load() -> Result<Self> {
		Self::merge(CliOpts::parse())
	}

	fn merge(cli: CliOpts) -> Result<Self> {
		let file = cli.config.as_deref().map(Self::parse_file).transpose()?.unwrap_or_default();

		let database_url = cli
			.database_url
			.or(file.database_url)
			.ok_or_else(|| Error::Config("database_url is required".into()))?;
		let steemd_url =
			cli.steemd_url.or(file.steemd_url).ok_or_else(|| Error::Config("steemd_url is required".into()))?;

		let conf = Self {
			database_url,
			steemd_url,
			max_workers: cli.max_workers.or(file.max_workers).unwrap_or(1),
			max_batch: cli.max_batch.or(file.max_batch).unwrap_or(100),
			trail_blocks: cli.trail_blocks.or(file.trail_blocks).unwrap_or(2),
			port: cli.port.or(file.port).unwrap_or(8080),
			log_level: parse_level(cli.log_level.or(file.log_level).as_deref().unwrap_or("INFO"))?,
			log_file: cli.log_file.or(file.log_file),
		};
		conf.validate()?;
		Ok(conf)
	}

	fn parse_file(path: &Path) -> Result<TomlConfig> {
		let toml_str = std::fs::read_to_string(path)?;
		toml::from_str(toml_str.as_str()).map_err(|e| Error::Config(e.to_string()))
	}

	fn validate(&self) -> Result<()> {
		if self.max_workers == 0 || self.max_workers > 500 {
			return Err(Error::Config(format!("max_workers out of range: {}", self.max_workers)));
		}
		if self.max_batch == 0 || self.max_batch > 5000 {
			return Err(Error::Config(format!("max_batch out of range: {}", self.max_batch)));
		}
		if self.trail_blocks >= 25 {
			return Err(Error::Config(format!("trail_blocks out of range: {}", self.trail_blocks)));
		}
		Ok(())
	}
}

fn parse_level(level: &str) -> Result<log::LevelFilter> {
	match level.to_ascii_uppercase().as_str() {
		"OFF" => Ok(log::LevelFilter::Off),
		"ERROR" => Ok(log::LevelFilter::Error),
		"WARN" => Ok(log::LevelFilter::Warn),
		"INFO" => Ok(log::LevelFilter::Info),
		"DEBUG" => Ok(log::LevelFilter::Debug),
		"TRACE" => Ok(log::LevelFilter::Trace),
		_ => Err(Error::Config(format!("invalid log level: {}", level))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cli(args: &[&str]) -> CliOpts {
		CliOpts::parse_from(std::iter::once("hivemind").chain(args.iter().copied()))
	}

	#[test]
	fn defaults_applied() {
		let conf = Config::merge(cli(&[
			"--database-url",
			"postgres://localhost/hive",
			"--steemd-url",
			"https://api.steemit.com",
		]))
		.unwrap();
		assert_eq!(conf.max_workers, 1);
		assert_eq!(conf.max_batch, 100);
		assert_eq!(conf.trail_blocks, 2);
		assert_eq!(conf.port, 8080);
		assert_eq!(conf.log_level, log::LevelFilter::Info);
	}

	#[test]
	fn rejects_out_of_range() {
		let res = Config::merge(cli(&[
			"--database-url",
			"postgres://localhost/hive",
			"--steemd-url",
			"https://api.steemit.com",
			"--trail-blocks",
			"25",
		]));
		assert!(matches!(res, Err(Error::Config(_))));
	}

}
