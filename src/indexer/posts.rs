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

//! Post registry. Comment ops either create a post row (resolving
//! parent, depth, category and community membership) or are pure edits,
//! which leave the row untouched; the cached-post engine picks up the
//! content change. Deletes are soft.

use chrono::NaiveDateTime;
use sqlx::PgConnection;

use crate::{
	error::Result,
	indexer::{accounts::Accounts, community},
	types::{CommentOp, DeleteCommentOp},
};

/// A post row created (or revived) by `register`.
#[derive(Debug, Clone)]
pub struct NewPost {
	pub id: i32,
	pub author: String,
	pub permlink: String,
	pub depth: i16,
}

/// Id of a non-deleted post.
pub async fn get_id(conn: &mut PgConnection, author: &str, permlink: &str) -> Result<Option<i32>> {
	let row: Option<(i32,)> =
		sqlx::query_as("SELECT id FROM hive_posts WHERE author = $1 AND permlink = $2 AND is_deleted = FALSE")
			.bind(author)
			.bind(permlink)
			.fetch_optional(&mut *conn)
			.await?;
	Ok(row.map(|r| r.0))
}

async fn get_any(conn: &mut PgConnection, author: &str, permlink: &str) -> Result<Option<(i32, bool)>> {
	sqlx::query_as("SELECT id, is_deleted FROM hive_posts WHERE author = $1 AND permlink = $2")
		.bind(author)
		.bind(permlink)
		.fetch_optional(&mut *conn)
		.await
		.map_err(Into::into)
}

/// Insert rows for new `(author, permlink)` pairs, ignoring pure edits.
/// A previously deleted pair is revived in place, keeping its id.
pub async fn register(
	conn: &mut PgConnection,
	accounts: &Accounts,
	ops: &[CommentOp],
	date: NaiveDateTime,
) -> Result<Vec<NewPost>> {
	let mut created = Vec::new();
	for op in ops {
		let existing = get_any(conn, &op.author, &op.permlink).await?;
		if let Some((_, false)) = existing {
			// pure edit
			continue;
		}

		let (parent_id, depth, category, community) = if op.is_root() {
			let category = op.parent_permlink.clone();
			let community = if community::is_community_name(&category)
				&& community::is_post_valid(conn, accounts, &category, &op.author, true).await?
			{
				Some(category.clone())
			} else {
				None
			};
			(None, 0i16, category, community)
		} else {
			let parent: Option<(i32, i16, String, Option<String>)> = sqlx::query_as(
				"SELECT id, depth, category, community FROM hive_posts \
                 WHERE author = $1 AND permlink = $2 AND is_deleted = FALSE",
			)
			.bind(&op.parent_author)
			.bind(&op.parent_permlink)
			.fetch_optional(&mut *conn)
			.await?;
			let (pid, pdepth, pcategory, pcommunity) = match parent {
				Some(parent) => parent,
				None => {
					log::warn!(
						"comment {}/{} has unknown parent {}/{}; skipping",
						op.author,
						op.permlink,
						op.parent_author,
						op.parent_permlink
					);
					continue;
				}
			};
			let community = match pcommunity {
				Some(c) => {
					if community::is_post_valid(conn, accounts, &c, &op.author, false).await? {
						Some(c)
					} else {
						None
					}
				}
				None => None,
			};
			(Some(pid), pdepth + 1, pcategory, community)
		};

		let id = match existing {
			Some((id, true)) => {
				// revived post keeps its id and original created_at
				sqlx::query(
					"UPDATE hive_posts SET is_deleted = FALSE, parent_id = $1, depth = $2, \
                     category = $3, community = $4 WHERE id = $5",
				)
				.bind(parent_id)
				.bind(depth)
				.bind(&category)
				.bind(&community)
				.bind(id)
				.execute(&mut *conn)
				.await?;
				id
			}
			_ => {
				let row: (i32,) = sqlx::query_as(
					"INSERT INTO hive_posts (parent_id, author, permlink, category, community, depth, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     ON CONFLICT (author, permlink) DO UPDATE SET is_deleted = FALSE \
                     RETURNING id",
				)
				.bind(parent_id)
				.bind(&op.author)
				.bind(&op.permlink)
				.bind(&category)
				.bind(&community)
				.bind(depth)
				.bind(date)
				.fetch_one(&mut *conn)
				.await?;
				row.0
			}
		};
		created.push(NewPost { id, author: op.author.clone(), permlink: op.permlink.clone(), depth });
	}
	Ok(created)
}

/// Soft-delete posts, dropping their cache and feed entries.
/// Returns `(id, "author/permlink")` for every post actually deleted.
pub async fn delete(conn: &mut PgConnection, ops: &[DeleteCommentOp]) -> Result<Vec<(i32, String)>> {
	let mut deleted = Vec::new();
	for op in ops {
		let id = match get_id(conn, &op.author, &op.permlink).await? {
			Some(id) => id,
			None => continue,
		};
		sqlx::query("UPDATE hive_posts SET is_deleted = TRUE WHERE id = $1").bind(id).execute(&mut *conn).await?;
		sqlx::query("DELETE FROM hive_posts_cache WHERE post_id = $1").bind(id).execute(&mut *conn).await?;
		sqlx::query("DELETE FROM hive_feed_cache WHERE post_id = $1").bind(id).execute(&mut *conn).await?;
		deleted.push((id, format!("{}/{}", op.author, op.permlink)));
	}
	Ok(deleted)
}

/// Resolve `"author/permlink"` urls to `(id, author, permlink, depth)`
/// tuples. Unknown or deleted posts are dropped with a warning.
pub async fn urls_to_tuples(conn: &mut PgConnection, urls: &[String]) -> Result<Vec<(i32, String, String, i16)>> {
	let mut tuples = Vec::with_capacity(urls.len());
	for chunk in urls.chunks(500) {
		let (authors, permlinks): (Vec<String>, Vec<String>) = chunk
			.iter()
			.filter_map(|url| url.split_once('/'))
			.map(|(a, p)| (a.to_owned(), p.to_owned()))
			.unzip();
		let rows: Vec<(i32, String, String, i16)> = sqlx::query_as(
			"SELECT id, author, permlink, depth FROM hive_posts \
             WHERE (author, permlink) IN (SELECT UNNEST($1::text[]), UNNEST($2::text[])) \
               AND is_deleted = FALSE",
		)
		.bind(&authors)
		.bind(&permlinks)
		.fetch_all(&mut *conn)
		.await?;
		tuples.extend(rows);
	}
	let found: hashbrown::HashSet<String> =
		tuples.iter().map(|(_, author, permlink, _)| format!("{}/{}", author, permlink)).collect();
	for url in urls {
		if !found.contains(url) {
			log::warn!("url does not resolve to a post: {}", url);
		}
	}
	Ok(tuples)
}
