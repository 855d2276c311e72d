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

//! Account registry and metadata accumulator. Owns the process-wide
//! id<->name map and a dirty set of names pending a metadata refresh
//! from the upstream node.

use chrono::NaiveDateTime;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use serde_json::Value;
use sqlx::PgConnection;

use crate::{
	database::batch::Batch,
	error::Result,
	indexer::{community, truncate},
	rpc::SteemClient,
};

/// Names are refreshed from the node in chunks of this many.
const REFRESH_CHUNK: usize = 1000;

#[derive(Default)]
pub struct Accounts {
	ids: HashMap<String, i32>,
	dirty: HashSet<String>,
}

impl Accounts {
	pub fn new() -> Self {
		Self::default()
	}

	/// Prefetch the full id<->name map. Called once at startup; kept in
	/// sync by `register` afterwards.
	pub async fn load_ids(&mut self, conn: &mut PgConnection) -> Result<usize> {
		let rows: Vec<(i32, String)> = sqlx::query_as("SELECT id, name FROM hive_accounts").fetch_all(&mut *conn).await?;
		self.ids = rows.into_iter().map(|(id, name)| (name, id)).collect();
		log::info!("[SYNC] loaded {} account ids", self.ids.len());
		Ok(self.ids.len())
	}

	pub fn get_id(&self, name: &str) -> Option<i32> {
		self.ids.get(name).copied()
	}

	pub fn exists(&self, name: &str) -> bool {
		self.ids.contains_key(name)
	}

	/// Insert any names not seen before, assigning monotonic ids, and
	/// auto-register communities for names matching the community
	/// pattern. Returns the newly created names.
	pub async fn register(
		&mut self,
		conn: &mut PgConnection,
		names: &[String],
		date: NaiveDateTime,
	) -> Result<Vec<String>> {
		let unseen: Vec<String> = names
			.iter()
			.filter(|name| !name.is_empty() && !self.ids.contains_key(*name))
			.unique()
			.cloned()
			.collect();
		if unseen.is_empty() {
			return Ok(unseen);
		}

		let mut batch = Batch::new(
			"accounts",
			r#"INSERT INTO "hive_accounts" (name, created_at) VALUES "#,
			"ON CONFLICT (name) DO NOTHING",
		);
		for name in &unseen {
			batch.reserve(2)?;
			if batch.current_num_arguments() > 0 {
				batch.append(",");
			}
			batch.append("(");
			batch.bind(name.as_str())?;
			batch.append(",");
			batch.bind(date)?;
			batch.append(")");
		}
		batch.execute(&mut *conn).await?;

		// read ids back; covers names that raced an earlier insert
		let rows: Vec<(i32, String)> = sqlx::query_as("SELECT id, name FROM hive_accounts WHERE name = ANY($1)")
			.bind(&unseen)
			.fetch_all(&mut *conn)
			.await?;
		for (id, name) in rows {
			self.ids.insert(name, id);
		}

		community::register(conn, self, &unseen, date).await?;
		Ok(unseen)
	}

	/// Mark a name for a metadata refresh on the next flush.
	pub fn dirty(&mut self, name: &str) {
		if !name.is_empty() {
			self.dirty.insert(name.to_owned());
		}
	}

	/// Mark the `limit` least-recently-refreshed accounts dirty.
	pub async fn dirty_oldest(&mut self, conn: &mut PgConnection, limit: i64) -> Result<usize> {
		let rows: Vec<(String,)> =
			sqlx::query_as("SELECT name FROM hive_accounts ORDER BY last_synced_at ASC NULLS FIRST LIMIT $1")
				.bind(limit)
				.fetch_all(&mut *conn)
				.await?;
		let count = rows.len();
		for (name,) in rows {
			self.dirty.insert(name);
		}
		Ok(count)
	}

	/// Refresh dirty accounts from the node. `period > 1` restricts the
	/// refresh to the names whose id falls into the current block's
	/// time-bucket, spreading the cost across live blocks.
	pub async fn flush(
		&mut self,
		client: &SteemClient,
		conn: &mut PgConnection,
		period: u32,
		current_block: u32,
	) -> Result<usize> {
		let subset: Vec<String> = if period <= 1 {
			self.dirty.drain().collect()
		} else {
			let bucket = (current_block % period) as i32;
			let selected: Vec<String> = self
				.dirty
				.iter()
				.filter(|name| self.ids.get(*name).map_or(true, |id| id.rem_euclid(period as i32) == bucket))
				.cloned()
				.collect();
			for name in &selected {
				self.dirty.remove(name);
			}
			selected
		};
		if subset.is_empty() {
			return Ok(0);
		}

		let mut updated = 0;
		for chunk in subset.chunks(REFRESH_CHUNK) {
			for account in client.get_accounts(chunk).await? {
				self.update_account(conn, &account).await?;
				updated += 1;
			}
		}
		Ok(updated)
	}

	async fn update_account(&self, conn: &mut PgConnection, account: &Value) -> Result<()> {
		let name = match account.get("name").and_then(Value::as_str) {
			Some(name) if !name.is_empty() => name,
			_ => {
				log::warn!("skipping unnamed account record: {}", account);
				return Ok(());
			}
		};
		let json_metadata = account.get("json_metadata").and_then(Value::as_str).unwrap_or("");
		let profile = parse_profile(json_metadata);
		let reputation = rep_log10(raw_reputation(account));

		sqlx::query(
			r#"
            UPDATE hive_accounts
               SET display_name = $1, about = $2, reputation = $3,
                   json_metadata = $4, last_synced_at = NOW()
             WHERE name = $5
        "#,
		)
		.bind(&profile.name)
		.bind(&profile.about)
		.bind(reputation)
		.bind(json_metadata)
		.bind(name)
		.execute(&mut *conn)
		.await?;
		Ok(())
	}
}

#[derive(Debug, Default, PartialEq)]
struct Profile {
	name: Option<String>,
	about: Option<String>,
}

fn parse_profile(json_metadata: &str) -> Profile {
	let meta: Value = match serde_json::from_str(json_metadata) {
		Ok(meta) => meta,
		Err(_) => return Profile::default(),
	};
	let profile = meta.get("profile");
	let read = |key: &str, max: usize| {
		profile
			.and_then(|p| p.get(key))
			.and_then(Value::as_str)
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| truncate(s, max))
	};
	Profile { name: read("name", 20), about: read("about", 160) }
}

fn raw_reputation(account: &Value) -> i64 {
	match account.get("reputation") {
		Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
		Some(Value::String(s)) => s.parse().unwrap_or(0),
		_ => 0,
	}
}

/// Convert a raw chain reputation into the familiar display scale
/// (centered at 25, ~9 points per order of magnitude).
fn rep_log10(raw: i64) -> f64 {
	if raw == 0 {
		return 25.0;
	}
	let sign = if raw > 0 { 1.0 } else { -1.0 };
	let out = ((raw.abs() as f64).log10() - 9.0).max(0.0) * sign;
	((out * 9.0 + 25.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reputation_display_scale() {
		assert_eq!(rep_log10(0), 25.0);
		// 1e9 raw is the floor of the scale
		assert_eq!(rep_log10(1_000_000_000), 25.0);
		// each order of magnitude above adds 9 points
		assert_eq!(rep_log10(10_000_000_000), 34.0);
		assert_eq!(rep_log10(100_000_000_000), 43.0);
		assert!(rep_log10(-10_000_000_000) < 25.0);
	}

	#[test]
	fn profile_extraction_tolerates_junk() {
		assert_eq!(parse_profile("not json"), Profile::default());
		assert_eq!(parse_profile("{}"), Profile::default());
		let p = parse_profile(r#"{"profile": {"name": "  Alice  ", "about": "hello"}}"#);
		assert_eq!(p.name.as_deref(), Some("Alice"));
		assert_eq!(p.about.as_deref(), Some("hello"));
	}

	#[test]
	fn profile_fields_are_truncated() {
		let long = "x".repeat(500);
		let p = parse_profile(&format!(r#"{{"profile": {{"name": "{}", "about": "{}"}}}}"#, long, long));
		assert_eq!(p.name.unwrap().chars().count(), 20);
		assert_eq!(p.about.unwrap().chars().count(), 160);
	}
}
