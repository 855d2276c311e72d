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

//! Hivemind: a social blockchain indexer. Pulls blocks from an upstream
//! JSON-RPC node, extracts the social operation subset (accounts,
//! posts, votes, follows, reblogs, community ops) and projects it into
//! a PostgreSQL store shaped for discussion-feed queries.

#![forbid(unsafe_code)]

pub mod config;
pub mod database;
mod error;
pub mod indexer;
pub mod logger;
pub mod rpc;
pub mod sync;
pub mod types;

pub use self::config::Config;
pub use self::error::{Error, Result};
