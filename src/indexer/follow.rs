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

//! Follow and reblog projection. Follow edges are tri-state (follow,
//! ignore, cleared); follower/following counts are maintained on the
//! account rows as deltas rather than recounted. Edge mutations and
//! count deltas accumulate in memory and flush atomically with the
//! surrounding block transaction.

use chrono::NaiveDateTime;
use hashbrown::HashMap;
use sqlx::PgConnection;

use crate::{
	database::batch::Batch,
	error::{Error, Result},
	indexer::{accounts::Accounts, feed_cache},
	types::{FollowParams, ReblogParams},
};

pub const STATE_CLEARED: i16 = 0;
pub const STATE_FOLLOW: i16 = 1;
pub const STATE_IGNORE: i16 = 2;

#[derive(Debug, Clone, Copy)]
struct PendingEdge {
	state: i16,
	date: NaiveDateTime,
}

#[derive(Debug, Default, Clone, Copy)]
struct CountDelta {
	followers: i32,
	following: i32,
}

#[derive(Default)]
pub struct Follow {
	edges: HashMap<(i32, i32), PendingEdge>,
	deltas: HashMap<i32, CountDelta>,
}

impl Follow {
	pub fn new() -> Self {
		Self::default()
	}

	/// Apply a follow/unfollow/ignore op to the pending state.
	pub async fn process_follow(
		&mut self,
		conn: &mut PgConnection,
		accounts: &Accounts,
		actor: &str,
		params: &FollowParams,
		date: NaiveDateTime,
	) -> Result<()> {
		if actor != params.follower {
			return Err(Error::op(format!("follow actor `{}` is not follower `{}`", actor, params.follower)));
		}
		let follower = accounts
			.get_id(&params.follower)
			.ok_or_else(|| Error::op(format!("unknown follower `{}`", params.follower)))?;
		let following = accounts
			.get_id(&params.following)
			.ok_or_else(|| Error::op(format!("unknown following `{}`", params.following)))?;
		if follower == following {
			return Err(Error::op("accounts cannot follow themselves"));
		}

		let new_state = match params.what.first().map(String::as_str) {
			None => STATE_CLEARED,
			Some("blog") => STATE_FOLLOW,
			Some("ignore") => STATE_IGNORE,
			Some(other) => return Err(Error::op(format!("unknown follow mode `{}`", other))),
		};

		let key = (follower, following);
		let old_state = match self.edges.get(&key) {
			Some(edge) => edge.state,
			None => self.stored_state(conn, follower, following).await?,
		};
		if old_state == new_state {
			return Ok(());
		}
		self.edges.insert(key, PendingEdge { state: new_state, date });
		apply_count_deltas(&mut self.deltas, follower, following, old_state, new_state);
		Ok(())
	}

	async fn stored_state(&self, conn: &mut PgConnection, follower: i32, following: i32) -> Result<i16> {
		let row: Option<(i16,)> =
			sqlx::query_as("SELECT state FROM hive_follows WHERE follower = $1 AND following = $2")
				.bind(follower)
				.bind(following)
				.fetch_optional(&mut *conn)
				.await?;
		Ok(row.map(|r| r.0).unwrap_or(STATE_CLEARED))
	}

	/// Apply a reblog (or un-reblog) op. Reblogs are materialized
	/// immediately into the reblog and feed-cache tables; only root
	/// posts can be reblogged.
	pub async fn process_reblog(
		&mut self,
		conn: &mut PgConnection,
		accounts: &Accounts,
		actor: &str,
		params: &ReblogParams,
		date: NaiveDateTime,
	) -> Result<()> {
		if actor != params.account {
			return Err(Error::op(format!("reblog actor `{}` is not account `{}`", actor, params.account)));
		}
		let account_id = accounts
			.get_id(&params.account)
			.ok_or_else(|| Error::op(format!("unknown account `{}`", params.account)))?;
		let post: Option<(i32, i16)> = sqlx::query_as(
			"SELECT id, depth FROM hive_posts WHERE author = $1 AND permlink = $2 AND is_deleted = FALSE",
		)
		.bind(&params.author)
		.bind(&params.permlink)
		.fetch_optional(&mut *conn)
		.await?;
		let post_id = match post {
			Some((id, 0)) => id,
			Some(_) => return Err(Error::op("only root posts can be reblogged")),
			None => {
				return Err(Error::op(format!("reblog of unknown post {}/{}", params.author, params.permlink)))
			}
		};

		if params.delete.as_deref() == Some("delete") {
			sqlx::query("DELETE FROM hive_reblogs WHERE account_id = $1 AND post_id = $2")
				.bind(account_id)
				.bind(post_id)
				.execute(&mut *conn)
				.await?;
			feed_cache::delete(conn, post_id, account_id).await?;
		} else {
			sqlx::query(
				"INSERT INTO hive_reblogs (account_id, post_id, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
			)
			.bind(account_id)
			.bind(post_id)
			.bind(date)
			.execute(&mut *conn)
			.await?;
			feed_cache::insert(conn, post_id, account_id, date).await?;
		}
		Ok(())
	}

	/// Apply pending edge mutations and count deltas. Returns how many
	/// edges were written.
	pub async fn flush(&mut self, conn: &mut PgConnection) -> Result<usize> {
		let n = self.edges.len();
		if n > 0 {
			let mut batch = Batch::new(
				"follows",
				r#"INSERT INTO "hive_follows" (follower, following, state, created_at) VALUES "#,
				"ON CONFLICT (following, follower) DO UPDATE SET state = EXCLUDED.state",
			);
			for ((follower, following), edge) in self.edges.drain() {
				batch.reserve(4)?;
				if batch.current_num_arguments() > 0 {
					batch.append(",");
				}
				batch.append("(");
				batch.bind(follower)?;
				batch.append(",");
				batch.bind(following)?;
				batch.append(",");
				batch.bind(edge.state)?;
				batch.append(",");
				batch.bind(edge.date)?;
				batch.append(")");
			}
			batch.execute(&mut *conn).await?;
		}

		for (account, delta) in self.deltas.drain() {
			sqlx::query(
				"UPDATE hive_accounts SET followers = GREATEST(0, followers + $1), \
                 following = GREATEST(0, following + $2) WHERE id = $3",
			)
			.bind(delta.followers)
			.bind(delta.following)
			.bind(account)
			.execute(&mut *conn)
			.await?;
		}
		Ok(n)
	}
}

/// Only state=1 edges contribute to follower/following counts. Ignore
/// edges and cleared edges are invisible to the counters.
fn apply_count_deltas(
	deltas: &mut HashMap<i32, CountDelta>,
	follower: i32,
	following: i32,
	old_state: i16,
	new_state: i16,
) {
	if new_state == STATE_FOLLOW {
		deltas.entry(following).or_default().followers += 1;
		deltas.entry(follower).or_default().following += 1;
	} else if old_state == STATE_FOLLOW {
		deltas.entry(following).or_default().followers -= 1;
		deltas.entry(follower).or_default().following -= 1;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn follow_then_unfollow_cancels_counts() {
		let mut deltas = HashMap::new();
		// alice (10) follows bob (11), then clears
		apply_count_deltas(&mut deltas, 10, 11, STATE_CLEARED, STATE_FOLLOW);
		assert_eq!(deltas[&11].followers, 1);
		assert_eq!(deltas[&10].following, 1);
		apply_count_deltas(&mut deltas, 10, 11, STATE_FOLLOW, STATE_CLEARED);
		assert_eq!(deltas[&11].followers, 0);
		assert_eq!(deltas[&10].following, 0);
	}

	#[test]
	fn ignore_does_not_count() {
		let mut deltas = HashMap::new();
		apply_count_deltas(&mut deltas, 10, 11, STATE_CLEARED, STATE_IGNORE);
		assert!(deltas.get(&11).map_or(true, |d| d.followers == 0));
		// follow -> ignore drops the counted edge
		apply_count_deltas(&mut deltas, 12, 11, STATE_FOLLOW, STATE_IGNORE);
		assert_eq!(deltas[&11].followers, -1);
	}

	#[test]
	fn follow_to_ignore_to_follow_round_trips() {
		let mut deltas = HashMap::new();
		apply_count_deltas(&mut deltas, 10, 11, STATE_CLEARED, STATE_FOLLOW);
		apply_count_deltas(&mut deltas, 10, 11, STATE_FOLLOW, STATE_IGNORE);
		apply_count_deltas(&mut deltas, 10, 11, STATE_IGNORE, STATE_FOLLOW);
		assert_eq!(deltas[&11].followers, 1);
		assert_eq!(deltas[&10].following, 1);
	}
}
