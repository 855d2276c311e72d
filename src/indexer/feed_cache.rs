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

//! Feed cache: the (account, post) pairs backing blog and feed queries.
//! One entry per own root post and one per reblog.

use chrono::NaiveDateTime;
use sqlx::PgConnection;

use crate::error::Result;

pub async fn insert(conn: &mut PgConnection, post_id: i32, account_id: i32, date: NaiveDateTime) -> Result<()> {
	sqlx::query(
		"INSERT INTO hive_feed_cache (account_id, post_id, created_at) VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
	)
	.bind(account_id)
	.bind(post_id)
	.bind(date)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

pub async fn delete(conn: &mut PgConnection, post_id: i32, account_id: i32) -> Result<()> {
	sqlx::query("DELETE FROM hive_feed_cache WHERE account_id = $1 AND post_id = $2")
		.bind(account_id)
		.bind(post_id)
		.execute(&mut *conn)
		.await?;
	Ok(())
}

/// Regenerate the whole table from authoritative post + reblog data.
/// Used once at the end of the initial sync.
pub async fn rebuild(conn: &mut PgConnection) -> Result<u64> {
	log::info!("[INIT] rebuilding feed cache");
	sqlx::query("TRUNCATE hive_feed_cache").execute(&mut *conn).await?;
	let posts = sqlx::query(
		r#"
        INSERT INTO hive_feed_cache (account_id, post_id, created_at)
             SELECT hive_accounts.id, hive_posts.id, hive_posts.created_at
               FROM hive_posts
               JOIN hive_accounts ON hive_posts.author = hive_accounts.name
              WHERE depth = 0 AND is_deleted = FALSE
        ON CONFLICT DO NOTHING
    "#,
	)
	.execute(&mut *conn)
	.await?
	.rows_affected();
	let reblogs = sqlx::query(
		r#"
        INSERT INTO hive_feed_cache (account_id, post_id, created_at)
             SELECT account_id, post_id, created_at FROM hive_reblogs
        ON CONFLICT DO NOTHING
    "#,
	)
	.execute(&mut *conn)
	.await?
	.rows_affected();
	log::info!("[INIT] feed cache: {} posts, {} reblogs", posts, reblogs);
	Ok(posts + reblogs)
}
