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

//! Common SQL queries abstracted into rust functions.

use chrono::NaiveDateTime;
use sqlx::PgConnection;

use crate::error::Result;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockRow {
	pub num: i32,
	pub hash: String,
	pub prev: Option<String>,
	pub txs: i16,
	pub ops: i16,
	pub created_at: NaiveDateTime,
}

/// Highest stored block number; 0 on an empty store.
pub async fn head_block_num(conn: &mut PgConnection) -> Result<u32> {
	let max: (Option<i32>,) = sqlx::query_as("SELECT MAX(num) FROM hive_blocks").fetch_one(&mut *conn).await?;
	Ok(max.0.unwrap_or(0) as u32)
}

pub async fn head_block(conn: &mut PgConnection) -> Result<Option<BlockRow>> {
	sqlx::query_as("SELECT num, hash, prev, txs, ops, created_at FROM hive_blocks ORDER BY num DESC LIMIT 1")
		.fetch_optional(&mut *conn)
		.await
		.map_err(Into::into)
}

/// Timestamp of the stored head block.
pub async fn head_block_date(conn: &mut PgConnection) -> Result<Option<NaiveDateTime>> {
	Ok(head_block(conn).await?.map(|b| b.created_at))
}

pub async fn block_by_num(conn: &mut PgConnection, num: u32) -> Result<Option<BlockRow>> {
	sqlx::query_as("SELECT num, hash, prev, txs, ops, created_at FROM hive_blocks WHERE num = $1")
		.bind(num as i32)
		.fetch_optional(&mut *conn)
		.await
		.map_err(Into::into)
}

pub async fn delete_block(conn: &mut PgConnection, num: u32) -> Result<u64> {
	sqlx::query("DELETE FROM hive_blocks WHERE num = $1")
		.bind(num as i32)
		.execute(&mut *conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

/// The initial sync is complete once the post cache has been built.
pub async fn is_initial_sync(conn: &mut PgConnection) -> Result<bool> {
	let row: Option<(i32,)> =
		sqlx::query_as("SELECT 1 FROM hive_posts_cache LIMIT 1").fetch_optional(&mut *conn).await?;
	Ok(row.is_none())
}
