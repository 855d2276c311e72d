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

//! IO for the PostgreSQL database holding the projected chain state.

pub mod batch;
pub mod queries;

use std::time::Duration;

use sqlx::{
	pool::PoolConnection,
	postgres::{PgConnection, PgPool, PgPoolOptions, Postgres},
	Connection,
};

use crate::error::Result;

pub type DbConn = PoolConnection<Postgres>;
pub type DbTransaction = sqlx::Transaction<'static, Postgres>;

/// Run all migrations against the database at `url`.
pub async fn migrate(url: &str) -> Result<()> {
	let mut conn = PgConnection::connect(url).await?;
	sqlx::migrate!("./migrations").run(&mut conn).await?;
	Ok(())
}

#[derive(Clone)]
pub struct Database {
	/// pool of database connections
	pool: PgPool,
	url: String,
}

impl Database {
	/// Connect to the database.
	pub async fn new(url: String) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.min_connections(4)
			.max_connections(28)
			.idle_timeout(Duration::from_secs(60))
			.connect(url.as_str())
			.await?;
		Ok(Self { pool, url })
	}

	pub async fn conn(&self) -> Result<DbConn> {
		self.pool.acquire().await.map_err(Into::into)
	}

	pub async fn begin(&self) -> Result<DbTransaction> {
		self.pool.begin().await.map_err(Into::into)
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	pub fn url(&self) -> &str {
		&self.url
	}
}
