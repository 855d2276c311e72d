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

use std::{fmt, io};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Hivemind Error Enum
#[derive(Debug, Error)]
pub enum Error {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Fmt(#[from] fmt::Error),

	// encoding error
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),
	#[error("timestamp parse error: {0}")]
	Time(#[from] chrono::ParseError),
	#[error("hex decode error: {0}")]
	Hex(#[from] hex::FromHexError),

	// database error
	#[error("sqlx error: {0}")]
	Sql(#[from] sqlx::Error),
	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),

	// upstream node error
	#[error("http transport: {0}")]
	Http(#[from] reqwest::Error),
	#[error("rpc node: {0}")]
	Rpc(String),

	/// The node returned a block that does not link to our stored head.
	/// Not recoverable from within the sync loop; requires head truncation.
	#[error("fork at block {num}: have {have}, node returned previous {got}")]
	UnlinkableBlock { num: u32, have: String, got: String },

	/// A custom-json op failed schema or permission validation.
	/// Always dropped at the dispatcher, never aborts a block.
	#[error("op validation: {0}")]
	Op(String),

	#[error("config: {0}")]
	Config(String),
}

impl Error {
	/// Shorthand for op-validation failures.
	pub fn op<S: Into<String>>(msg: S) -> Self {
		Error::Op(msg.into())
	}
}
