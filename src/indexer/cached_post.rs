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

//! Cached-post engine. Keeps the denormalized presentation snapshot of
//! every non-deleted post in step with the upstream node: content and
//! payout state are authoritative upstream, ranking scores are derived
//! locally. Dirty urls accumulate per block and flush in batches.

use chrono::{Datelike, NaiveDateTime, Utc};
use hashbrown::HashMap;
use serde_json::Value;
use sqlx::PgConnection;

use crate::{
	database::batch::Batch,
	error::{Error, Result},
	indexer::{accounts::Accounts, feed_cache, posts, truncate},
	rpc::SteemClient,
};

/// Trend decay constant, in seconds.
const TIMESCALE_TREND: f64 = 480_000.0;
/// Hot decay constant, in seconds.
const TIMESCALE_HOT: f64 = 10_000.0;

/// Why a post is dirty. Higher levels never downgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyLevel {
	Upvote,
	Update,
	Payout,
	Insert,
}

#[derive(Debug, Clone)]
struct DirtyEntry {
	author: String,
	permlink: String,
	pid: Option<i32>,
	depth: Option<i16>,
	level: DirtyLevel,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushCounts {
	pub insert: usize,
	pub update: usize,
	pub payout: usize,
	pub upvote: usize,
}

impl FlushCounts {
	fn bump(&mut self, level: DirtyLevel) {
		match level {
			DirtyLevel::Insert => self.insert += 1,
			DirtyLevel::Update => self.update += 1,
			DirtyLevel::Payout => self.payout += 1,
			DirtyLevel::Upvote => self.upvote += 1,
		}
	}
}

#[derive(Default)]
pub struct CachedPost {
	dirty: HashMap<String, DirtyEntry>,
}

impl CachedPost {
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark a post touched by the current block. Levels only escalate;
	/// a known post id or depth is kept once learned.
	pub fn dirty(&mut self, author: &str, permlink: &str, pid: Option<i32>, level: DirtyLevel) {
		let url = format!("{}/{}", author, permlink);
		let entry = self.dirty.entry(url).or_insert_with(|| DirtyEntry {
			author: author.to_owned(),
			permlink: permlink.to_owned(),
			pid: None,
			depth: None,
			level,
		});
		entry.level = entry.level.max(level);
		if entry.pid.is_none() {
			entry.pid = pid;
		}
	}

	/// Forget a pending url (the post was deleted this block).
	pub fn undirty(&mut self, url: &str) {
		self.dirty.remove(url);
	}

	/// Mark every post missing its cache row. Used by the initial cache
	/// build and by cleanup after an unclean stop.
	pub async fn dirty_missing(&mut self, conn: &mut PgConnection) -> Result<usize> {
		let rows: Vec<(i32, String, String, i16)> = sqlx::query_as(
			"SELECT id, author, permlink, depth FROM hive_posts p \
             WHERE is_deleted = FALSE \
               AND NOT EXISTS (SELECT 1 FROM hive_posts_cache c WHERE c.post_id = p.id)",
		)
		.fetch_all(&mut *conn)
		.await?;
		let count = rows.len();
		for (id, author, permlink, depth) in rows {
			self.dirty(&author, &permlink, Some(id), DirtyLevel::Insert);
			if let Some(entry) = self.dirty.get_mut(&format!("{}/{}", author, permlink)) {
				entry.depth = Some(depth);
			}
		}
		Ok(count)
	}

	/// Mark posts whose payout window closed at or before `date`.
	pub async fn dirty_paidouts(&mut self, conn: &mut PgConnection, date: NaiveDateTime) -> Result<usize> {
		let rows: Vec<(i32, String, String)> = sqlx::query_as(
			"SELECT post_id, author, permlink FROM hive_posts_cache \
             WHERE is_paidout = FALSE AND payout_at <= $1",
		)
		.bind(date)
		.fetch_all(&mut *conn)
		.await?;
		let count = rows.len();
		for (id, author, permlink) in rows {
			self.dirty(&author, &permlink, Some(id), DirtyLevel::Payout);
		}
		Ok(count)
	}

	/// Refresh every dirty post from upstream content and write the
	/// snapshot rows. Authors of refreshed posts are marked dirty on the
	/// accounts accumulator.
	pub async fn flush(
		&mut self,
		client: &SteemClient,
		conn: &mut PgConnection,
		accounts: &mut Accounts,
	) -> Result<FlushCounts> {
		let mut counts = FlushCounts::default();
		if self.dirty.is_empty() {
			return Ok(counts);
		}
		let mut entries: Vec<DirtyEntry> = self.dirty.drain().map(|(_, e)| e).collect();

		// resolve ids for urls only known by name
		let unresolved: Vec<String> = entries
			.iter()
			.filter(|e| e.pid.is_none() || e.depth.is_none())
			.map(|e| format!("{}/{}", e.author, e.permlink))
			.collect();
		if !unresolved.is_empty() {
			let resolved: HashMap<String, (i32, i16)> = posts::urls_to_tuples(conn, &unresolved)
				.await?
				.into_iter()
				.map(|(id, author, permlink, depth)| (format!("{}/{}", author, permlink), (id, depth)))
				.collect();
			for entry in &mut entries {
				if entry.pid.is_none() || entry.depth.is_none() {
					if let Some((id, depth)) = resolved.get(&format!("{}/{}", entry.author, entry.permlink)) {
						entry.pid = Some(*id);
						entry.depth = Some(*depth);
					}
				}
			}
			// urls that still don't resolve belong to deleted posts
			entries.retain(|e| e.pid.is_some());
		}
		if entries.is_empty() {
			return Ok(counts);
		}

		let pairs: Vec<(String, String)> =
			entries.iter().map(|e| (e.author.clone(), e.permlink.clone())).collect();
		let contents = client.get_content_batch(&pairs).await?;

		let mut batch = Batch::new(
			"posts_cache",
			r#"
            INSERT INTO "hive_posts_cache" (
                post_id, author, permlink, title, preview, img_url, payout, promoted,
                created_at, payout_at, updated_at, is_paidout, is_nsfw, rshares, votes,
                json, sc_trend, sc_hot
            ) VALUES
            "#,
			r#"
            ON CONFLICT (post_id) DO UPDATE SET
                title = EXCLUDED.title, preview = EXCLUDED.preview, img_url = EXCLUDED.img_url,
                payout = EXCLUDED.payout, promoted = EXCLUDED.promoted, payout_at = EXCLUDED.payout_at,
                updated_at = EXCLUDED.updated_at, is_paidout = EXCLUDED.is_paidout,
                is_nsfw = EXCLUDED.is_nsfw, rshares = EXCLUDED.rshares, votes = EXCLUDED.votes,
                json = EXCLUDED.json, sc_trend = EXCLUDED.sc_trend, sc_hot = EXCLUDED.sc_hot
            "#,
		);

		for (entry, content) in entries.iter().zip(contents.iter()) {
			let author = content.get("author").and_then(Value::as_str).unwrap_or("");
			if author.is_empty() {
				// cache inconsistency: post exists here but not upstream
				log::warn!("post {}/{} missing from upstream; skipping", entry.author, entry.permlink);
				continue;
			}
			let pid = entry.pid.ok_or_else(|| Error::Rpc("unresolved post id survived filtering".into()))?;
			let row = CacheRow::from_content(pid, content)?;

			counts.bump(entry.level);
			accounts.dirty(&entry.author);

			// own root posts enter the author's blog feed on first cache
			if entry.level == DirtyLevel::Insert && entry.depth == Some(0) {
				if let Some(account_id) = accounts.get_id(&entry.author) {
					feed_cache::insert(conn, pid, account_id, row.created_at).await?;
				}
			}

			batch.reserve(18)?;
			if batch.current_num_arguments() > 0 {
				batch.append(",");
			}
			batch.append("(");
			batch.bind(row.post_id)?;
			batch.append(",");
			batch.bind(row.author)?;
			batch.append(",");
			batch.bind(row.permlink)?;
			batch.append(",");
			batch.bind(row.title)?;
			batch.append(",");
			batch.bind(row.preview)?;
			batch.append(",");
			batch.bind(row.img_url)?;
			batch.append(",");
			batch.bind(row.payout)?;
			batch.append(",");
			batch.bind(row.promoted)?;
			batch.append(",");
			batch.bind(row.created_at)?;
			batch.append(",");
			batch.bind(row.payout_at)?;
			batch.append(",");
			batch.bind(row.updated_at)?;
			batch.append(",");
			batch.bind(row.is_paidout)?;
			batch.append(",");
			batch.bind(row.is_nsfw)?;
			batch.append(",");
			batch.bind(row.rshares)?;
			batch.append(",");
			batch.bind(row.votes)?;
			batch.append(",");
			batch.bind(row.json)?;
			batch.append(",");
			batch.bind(row.sc_trend)?;
			batch.append(",");
			batch.bind(row.sc_hot)?;
			batch.append(")");
		}
		batch.execute(&mut *conn).await?;

		Ok(counts)
	}
}

struct CacheRow {
	post_id: i32,
	author: String,
	permlink: String,
	title: String,
	preview: String,
	img_url: String,
	payout: f64,
	promoted: f64,
	created_at: NaiveDateTime,
	payout_at: NaiveDateTime,
	updated_at: NaiveDateTime,
	is_paidout: bool,
	is_nsfw: bool,
	rshares: i64,
	votes: String,
	json: String,
	sc_trend: f64,
	sc_hot: f64,
}

impl CacheRow {
	fn from_content(post_id: i32, content: &Value) -> Result<Self> {
		let text = |key: &str| content.get(key).and_then(Value::as_str).unwrap_or("");
		let time = |key: &str| -> Result<NaiveDateTime> {
			Ok(text(key).parse().map_err(|_| Error::Rpc(format!("content has bad timestamp in `{}`", key)))?)
		};

		let created_at = time("created")?;
		let cashout = time("cashout_time")?;
		let last_payout = time("last_payout")?;
		// a cashout time before the epoch marks a completed payout
		let is_paidout = cashout.year() < 1970;
		let payout_at = if is_paidout { last_payout } else { cashout };

		let payout = amount(text("pending_payout_value"))
			+ amount(text("total_payout_value"))
			+ amount(text("curator_payout_value"));

		let json = text("json_metadata").to_owned();
		let meta: Value = serde_json::from_str(&json).unwrap_or(Value::Null);
		let img_url = meta
			.get("image")
			.and_then(|i| i.get(0))
			.and_then(Value::as_str)
			.map(|s| truncate(s, 1024))
			.unwrap_or_default();
		let is_nsfw = meta
			.get("tags")
			.and_then(Value::as_array)
			.map(|tags| tags.iter().any(|t| t.as_str() == Some("nsfw")))
			.unwrap_or(false);

		let rshares = int_field(content, "net_rshares");
		let votes = vote_csv(content);
		let sc_trend = score(rshares, created_at, TIMESCALE_TREND);
		let sc_hot = score(rshares, created_at, TIMESCALE_HOT);

		Ok(Self {
			post_id,
			author: text("author").to_owned(),
			permlink: text("permlink").to_owned(),
			title: truncate(text("title"), 255),
			preview: truncate(text("body"), 1024),
			img_url,
			payout,
			promoted: amount(text("promoted")),
			created_at,
			payout_at,
			updated_at: Utc::now().naive_utc(),
			is_paidout,
			is_nsfw,
			rshares,
			votes,
			json,
			sc_trend,
			sc_hot,
		})
	}
}

/// Time-decayed ranking score: higher rshares score higher, and between
/// equal rshares the newer post wins.
pub fn score(rshares: i64, created: NaiveDateTime, timescale: f64) -> f64 {
	let mod_score = rshares as f64 / 10_000_000.0;
	let order = mod_score.abs().max(1.0).log10();
	let sign = if mod_score > 0.0 {
		1.0
	} else if mod_score < 0.0 {
		-1.0
	} else {
		0.0
	};
	sign * order + created.and_utc().timestamp() as f64 / timescale
}

/// Parse the numeric part of `"1.234 SBD"`; 0 on junk.
fn amount(asset: &str) -> f64 {
	asset.split_whitespace().next().and_then(|a| a.parse().ok()).unwrap_or(0.0)
}

fn int_field(content: &Value, key: &str) -> i64 {
	match content.get(key) {
		Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
		Some(Value::String(s)) => s.parse().unwrap_or(0),
		_ => 0,
	}
}

/// Flatten active votes to one `voter,rshares,percent,reputation` line
/// per vote.
fn vote_csv(content: &Value) -> String {
	let raw_num = |vote: &Value, key: &str| match vote.get(key) {
		Some(Value::Number(n)) => n.to_string(),
		Some(Value::String(s)) => s.clone(),
		_ => "0".to_owned(),
	};
	content
		.get("active_votes")
		.and_then(Value::as_array)
		.map(|votes| {
			votes
				.iter()
				.map(|vote| {
					format!(
						"{},{},{},{}",
						vote.get("voter").and_then(Value::as_str).unwrap_or(""),
						raw_num(vote, "rshares"),
						raw_num(vote, "percent"),
						raw_num(vote, "reputation"),
					)
				})
				.collect::<Vec<_>>()
				.join("\n")
		})
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn date(s: &str) -> NaiveDateTime {
		s.parse().unwrap()
	}

	#[test]
	fn score_is_monotonic_in_rshares() {
		let created = date("2020-01-01T00:00:00");
		let low = score(1_000_000_000, created, TIMESCALE_TREND);
		let high = score(100_000_000_000, created, TIMESCALE_TREND);
		assert!(high > low);
	}

	#[test]
	fn equal_rshares_newer_post_scores_higher() {
		let older = score(5_000_000_000, date("2020-01-01T00:00:00"), TIMESCALE_TREND);
		let newer = score(5_000_000_000, date("2020-01-02T00:00:00"), TIMESCALE_TREND);
		assert!(newer > older);
	}

	#[test]
	fn zero_and_negative_rshares_are_finite() {
		let created = date("2020-01-01T00:00:00");
		assert!(score(0, created, TIMESCALE_TREND).is_finite());
		assert!(score(-1_000_000_000, created, TIMESCALE_TREND) < score(0, created, TIMESCALE_TREND));
	}

	#[test]
	fn dirty_levels_escalate_but_never_downgrade() {
		let mut cache = CachedPost::new();
		cache.dirty("alice", "post", None, DirtyLevel::Upvote);
		cache.dirty("alice", "post", Some(7), DirtyLevel::Insert);
		cache.dirty("alice", "post", None, DirtyLevel::Update);
		let entry = &cache.dirty["alice/post"];
		assert_eq!(entry.level, DirtyLevel::Insert);
		assert_eq!(entry.pid, Some(7));
	}

	#[test]
	fn undirty_forgets_deleted_posts() {
		let mut cache = CachedPost::new();
		cache.dirty("alice", "post", None, DirtyLevel::Update);
		cache.undirty("alice/post");
		assert!(cache.dirty.is_empty());
	}

	fn content(cashout: &str, last_payout: &str) -> Value {
		json!({
			"author": "alice",
			"permlink": "my-post",
			"title": "Title",
			"body": "Body text",
			"json_metadata": r#"{"tags": ["test", "nsfw"], "image": ["https://img.example/1.png"]}"#,
			"created": "2020-01-01T00:00:00",
			"cashout_time": cashout,
			"last_payout": last_payout,
			"pending_payout_value": "1.000 SBD",
			"total_payout_value": "2.000 SBD",
			"curator_payout_value": "0.500 SBD",
			"promoted": "0.000 SBD",
			"net_rshares": "123456789",
			"active_votes": [
				{"voter": "bob", "rshares": "123", "percent": 10000, "reputation": "99"}
			]
		})
	}

	#[test]
	fn pending_post_rows() {
		let row = CacheRow::from_content(1, &content("2020-01-08T00:00:00", "1970-01-01T00:00:00")).unwrap();
		assert!(!row.is_paidout);
		assert_eq!(row.payout_at, date("2020-01-08T00:00:00"));
		assert!((row.payout - 3.5).abs() < 1e-9);
		assert!(row.is_nsfw);
		assert_eq!(row.img_url, "https://img.example/1.png");
		assert_eq!(row.rshares, 123456789);
		assert_eq!(row.votes, "bob,123,10000,99");
	}

	#[test]
	fn paidout_post_uses_last_payout() {
		let row = CacheRow::from_content(1, &content("1969-12-31T23:59:59", "2020-01-08T00:00:00")).unwrap();
		assert!(row.is_paidout);
		assert_eq!(row.payout_at, date("2020-01-08T00:00:00"));
	}
}
