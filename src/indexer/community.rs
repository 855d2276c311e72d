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

//! Community registration and governance ops.
//!
//! Communities piggyback on accounts: an account whose name matches
//! `hive-[123]\d{4,6}` *is* a community, sharing the account's id. The
//! governance surface arrives as `custom_json` ops which are validated
//! (schema, referenced entities, permissions) and applied here. A
//! validation failure drops the op; it never aborts the block.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::PgConnection;

use crate::{
	error::{Error, Result},
	indexer::{accounts::Accounts, posts},
};

pub const ROLE_MUTED: i16 = -2;
pub const ROLE_GUEST: i16 = 0;
pub const ROLE_MEMBER: i16 = 2;
pub const ROLE_MOD: i16 = 4;
pub const ROLE_ADMIN: i16 = 6;
pub const ROLE_OWNER: i16 = 8;

pub const TYPE_TOPIC: u8 = 1;
pub const TYPE_JOURNAL: u8 = 2;
pub const TYPE_COUNCIL: u8 = 3;

const SETTINGS_KEYS: &[&str] =
	&["title", "about", "description", "flag_text", "language", "nsfw", "bg_color", "bg_color2", "primary_tag"];

/// Check a name against the community pattern `hive-[123]\d{4,6}`.
pub fn is_community_name(name: &str) -> bool {
	let digits = match name.strip_prefix("hive-") {
		Some(rest) => rest,
		None => return false,
	};
	if !(5..=7).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return false;
	}
	matches!(digits.as_bytes()[0], b'1' | b'2' | b'3')
}

/// Community type, derived from the first digit of the name.
pub fn type_id(name: &str) -> u8 {
	debug_assert!(is_community_name(name));
	name.as_bytes()[5] - b'0'
}

/// Block processing hook: called with newly registered account names.
/// Any valid community names among them get a community row and an
/// owner role, co-identified with the account id.
pub async fn register(
	conn: &mut PgConnection,
	accounts: &Accounts,
	names: &[String],
	date: NaiveDateTime,
) -> Result<()> {
	for name in names {
		if !is_community_name(name) {
			continue;
		}
		let id = match accounts.get_id(name) {
			Some(id) => id,
			None => {
				log::warn!("community {} has no account id; skipping", name);
				continue;
			}
		};
		sqlx::query(
			r#"
            INSERT INTO hive_communities (id, name, type_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
        "#,
		)
		.bind(id)
		.bind(name)
		.bind(type_id(name) as i16)
		.bind(date)
		.execute(&mut *conn)
		.await?;
		sqlx::query(
			r#"
            INSERT INTO hive_roles (community_id, account_id, role_id, created_at)
            VALUES ($1, $1, $2, $3)
            ON CONFLICT (community_id, account_id) DO UPDATE SET role_id = EXCLUDED.role_id
        "#,
		)
		.bind(id)
		.bind(ROLE_OWNER)
		.bind(date)
		.execute(&mut *conn)
		.await?;
		log::info!("registered community {} (id {})", name, id);
	}
	Ok(())
}

pub async fn get_id(conn: &mut PgConnection, name: &str) -> Result<Option<i32>> {
	let row: Option<(i32,)> = sqlx::query_as("SELECT id FROM hive_communities WHERE name = $1")
		.bind(name)
		.fetch_optional(&mut *conn)
		.await?;
	Ok(row.map(|r| r.0))
}

/// Role of an account within a community; implicit guest when absent.
pub async fn get_user_role(conn: &mut PgConnection, community_id: i32, account_id: i32) -> Result<i16> {
	let row: Option<(i16,)> =
		sqlx::query_as("SELECT role_id FROM hive_roles WHERE community_id = $1 AND account_id = $2 LIMIT 1")
			.bind(community_id)
			.bind(account_id)
			.fetch_optional(&mut *conn)
			.await?;
	Ok(row.map(|r| r.0).unwrap_or(ROLE_GUEST))
}

/// Re-derive every community's pending payout from its posts' cached
/// payout state. Swept periodically; not part of block processing.
pub async fn recalc_pending_payouts(conn: &mut PgConnection) -> Result<u64> {
	sqlx::query(
		r#"
        UPDATE hive_communities SET pending_payout = COALESCE(totals.total, 0)
          FROM (SELECT p.community AS name, SUM(c.payout) AS total
                  FROM hive_posts_cache c
                  JOIN hive_posts p ON p.id = c.post_id
                 WHERE c.is_paidout = FALSE AND p.community IS NOT NULL
              GROUP BY p.community) AS totals
         WHERE hive_communities.name = totals.name
    "#,
	)
	.execute(&mut *conn)
	.await
	.map(|d| d.rows_affected())
	.map_err(Into::into)
}

async fn is_subscribed(conn: &mut PgConnection, community_id: i32, account_id: i32) -> Result<bool> {
	let row: Option<(i32,)> =
		sqlx::query_as("SELECT 1 FROM hive_subscriptions WHERE community_id = $1 AND account_id = $2")
			.bind(community_id)
			.bind(account_id)
			.fetch_optional(&mut *conn)
			.await?;
	Ok(row.is_some())
}

async fn is_pinned(conn: &mut PgConnection, post_id: i32) -> Result<bool> {
	let row: Option<(bool,)> = sqlx::query_as("SELECT is_pinned FROM hive_posts WHERE id = $1")
		.bind(post_id)
		.fetch_optional(&mut *conn)
		.await?;
	Ok(row.map(|r| r.0).unwrap_or(false))
}

/// Community posting rules, checked when a comment lands in a community
/// category. Journal communities restrict root posts to members;
/// council communities restrict posts and comments to members; topic
/// communities only exclude muted accounts.
pub async fn is_post_valid(
	conn: &mut PgConnection,
	accounts: &Accounts,
	community: &str,
	author: &str,
	is_root: bool,
) -> Result<bool> {
	let community_id = match get_id(conn, community).await? {
		Some(id) => id,
		None => return Ok(false),
	};
	let account_id = match accounts.get_id(author) {
		Some(id) => id,
		None => return Ok(false),
	};
	let role = get_user_role(conn, community_id, account_id).await?;

	match type_id(community) {
		TYPE_JOURNAL if is_root => Ok(role >= ROLE_MEMBER),
		TYPE_COUNCIL => Ok(role >= ROLE_MEMBER),
		_ => Ok(role >= ROLE_GUEST),
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
	UpdateSettings,
	Subscribe,
	Unsubscribe,
	SetRole,
	SetUserTitle,
	MutePost,
	UnmutePost,
	PinPost,
	UnpinPost,
	FlagPost,
}

impl Action {
	fn from_name(name: &str) -> Result<Self> {
		Ok(match name {
			"updateSettings" => Action::UpdateSettings,
			"subscribe" => Action::Subscribe,
			"unsubscribe" => Action::Unsubscribe,
			"setRole" => Action::SetRole,
			"setUserTitle" => Action::SetUserTitle,
			"mutePost" => Action::MutePost,
			"unmutePost" => Action::UnmutePost,
			"pinPost" => Action::PinPost,
			"unpinPost" => Action::UnpinPost,
			"flagPost" => Action::FlagPost,
			other => return Err(Error::op(format!("invalid action `{}`", other))),
		})
	}

	fn name(&self) -> &'static str {
		match self {
			Action::UpdateSettings => "updateSettings",
			Action::Subscribe => "subscribe",
			Action::Unsubscribe => "unsubscribe",
			Action::SetRole => "setRole",
			Action::SetUserTitle => "setUserTitle",
			Action::MutePost => "mutePost",
			Action::UnmutePost => "unmutePost",
			Action::PinPost => "pinPost",
			Action::UnpinPost => "unpinPost",
			Action::FlagPost => "flagPost",
		}
	}

	/// Exact required-key set; missing or extra keys fail validation.
	fn schema(&self) -> &'static [&'static str] {
		match self {
			Action::UpdateSettings => &["community", "settings"],
			Action::Subscribe | Action::Unsubscribe => &["community"],
			Action::SetRole => &["community", "account", "role"],
			Action::SetUserTitle => &["community", "title"],
			Action::MutePost | Action::UnmutePost | Action::FlagPost => {
				&["community", "account", "permlink", "notes"]
			}
			Action::PinPost | Action::UnpinPost => &["community", "account", "permlink"],
		}
	}
}

fn role_id_from_name(role: &str) -> Result<i16> {
	Ok(match role {
		"owner" => ROLE_OWNER,
		"admin" => ROLE_ADMIN,
		"mod" => ROLE_MOD,
		"member" => ROLE_MEMBER,
		"guest" => ROLE_GUEST,
		"muted" => ROLE_MUTED,
		other => return Err(Error::op(format!("invalid role `{}`", other))),
	})
}

fn read_key_str<'a>(op: &'a Value, key: &str) -> Result<&'a str> {
	match op.get(key) {
		Some(Value::String(s)) if !s.is_empty() => Ok(s),
		Some(Value::String(_)) => Err(Error::op(format!("key `{}` was blank", key))),
		Some(_) => Err(Error::op(format!("key `{}` was not a string", key))),
		None => Err(Error::op(format!("missing key `{}`", key))),
	}
}

/// Pure permission matrix. `target_role`/`new_role` only apply to
/// `setRole`; `pinned`/`subscribed` carry the current state for the
/// actions that need it.
fn check_permission(
	action: Action,
	actor_role: i16,
	target_is_actor: bool,
	target_role: i16,
	new_role: i16,
	pinned: bool,
	subscribed: bool,
) -> Result<()> {
	let require = |cond: bool, msg: &str| if cond { Ok(()) } else { Err(Error::op(msg)) };
	match action {
		Action::SetRole => {
			require(actor_role >= ROLE_MOD, "only mods and up can alter roles")?;
			require(actor_role > new_role, "cannot promote to or above own rank")?;
			if !target_is_actor {
				require(target_role < actor_role, "cannot modify a higher-role user")?;
				require(target_role != new_role, "role would not change")?;
			}
			Ok(())
		}
		Action::UpdateSettings => require(actor_role >= ROLE_ADMIN, "only admins can update settings"),
		Action::SetUserTitle => require(actor_role >= ROLE_MOD, "only mods can set user titles"),
		Action::MutePost => require(actor_role >= ROLE_MOD, "only mods can mute posts"),
		Action::UnmutePost => require(actor_role >= ROLE_MOD, "only mods can unmute posts"),
		Action::PinPost => {
			require(actor_role >= ROLE_MOD, "only mods can pin posts")?;
			require(!pinned, "post is already pinned")
		}
		Action::UnpinPost => {
			require(actor_role >= ROLE_MOD, "only mods can unpin posts")?;
			require(pinned, "post is not pinned")
		}
		Action::FlagPost => require(actor_role > ROLE_MUTED, "muted users cannot flag posts"),
		Action::Subscribe => require(!subscribed, "already subscribed"),
		Action::Unsubscribe => require(subscribed, "not subscribed"),
	}
}

/// A community custom-json op, validated then applied.
struct CommunityOp {
	date: NaiveDateTime,
	action: Action,
	actor: String,
	actor_id: i32,
	community: String,
	community_id: i32,
	account: Option<String>,
	account_id: Option<i32>,
	permlink: Option<String>,
	post_id: Option<i32>,
	role_id: Option<i16>,
	notes: Option<String>,
	title: Option<String>,
	settings: Option<String>,
}

/// Validate and apply one community op envelope (`[action, params]`).
pub async fn process_op(
	conn: &mut PgConnection,
	accounts: &Accounts,
	actor: &str,
	raw: &Value,
	date: NaiveDateTime,
) -> Result<()> {
	let op = validate(conn, accounts, actor, raw, date).await?;
	apply(conn, &op).await
}

async fn validate(
	conn: &mut PgConnection,
	accounts: &Accounts,
	actor: &str,
	raw: &Value,
	date: NaiveDateTime,
) -> Result<CommunityOp> {
	let items = raw.as_array().ok_or_else(|| Error::op("op json must be a list"))?;
	if items.len() != 2 {
		return Err(Error::op("op json must have 2 elements"));
	}
	let action = Action::from_name(items[0].as_str().ok_or_else(|| Error::op("op json[0] must be a string"))?)?;
	let params = &items[1];
	if !params.is_object() {
		return Err(Error::op("op json[1] must be a dict"));
	}

	let schema = action.schema();
	// exact match: reject missing and extraneous keys
	for key in params.as_object().map(|o| o.keys()).into_iter().flatten() {
		if !schema.contains(&key.as_str()) {
			return Err(Error::op(format!("extraneous key `{}`", key)));
		}
	}

	let actor_id = accounts.get_id(actor).ok_or_else(|| Error::op(format!("actor `{}` not found", actor)))?;

	let community = read_key_str(params, "community")?.to_owned();
	if !is_community_name(&community) {
		return Err(Error::op(format!("invalid community name `{}`", community)));
	}
	let community_id = get_id(conn, &community)
		.await?
		.ok_or_else(|| Error::op(format!("community `{}` does not exist", community)))?;

	let mut op = CommunityOp {
		date,
		action,
		actor: actor.to_owned(),
		actor_id,
		community,
		community_id,
		account: None,
		account_id: None,
		permlink: None,
		post_id: None,
		role_id: None,
		notes: None,
		title: None,
		settings: None,
	};

	if schema.contains(&"account") {
		let account = read_key_str(params, "account")?;
		let account_id =
			accounts.get_id(account).ok_or_else(|| Error::op(format!("account `{}` not found", account)))?;
		op.account = Some(account.to_owned());
		op.account_id = Some(account_id);
	}

	if schema.contains(&"permlink") {
		let account = op.account.as_deref().ok_or_else(|| Error::op("permlink requires a named account"))?;
		let permlink = read_key_str(params, "permlink")?;
		let post_id = posts::get_id(conn, account, permlink)
			.await?
			.ok_or_else(|| Error::op(format!("invalid post: {}/{}", account, permlink)))?;
		let post_community: (Option<String>,) =
			sqlx::query_as("SELECT community FROM hive_posts WHERE id = $1 LIMIT 1")
				.bind(post_id)
				.fetch_one(&mut *conn)
				.await?;
		if post_community.0.as_deref() != Some(op.community.as_str()) {
			return Err(Error::op("post does not belong to community"));
		}
		op.permlink = Some(permlink.to_owned());
		op.post_id = Some(post_id);
	}

	if schema.contains(&"role") {
		op.role_id = Some(role_id_from_name(read_key_str(params, "role")?)?);
	}

	if schema.contains(&"notes") {
		let notes = read_key_str(params, "notes")?;
		if notes.chars().count() > 120 {
			return Err(Error::op("notes must be under 120 characters"));
		}
		let notes = notes.trim();
		if notes.is_empty() {
			return Err(Error::op("notes cannot be blank"));
		}
		op.notes = Some(notes.to_owned());
	}

	if schema.contains(&"title") {
		let title = read_key_str(params, "title")?.trim().to_owned();
		if title.chars().count() > 32 {
			return Err(Error::op("user title must be under 32 characters"));
		}
		op.title = Some(title);
	}

	if schema.contains(&"settings") {
		op.settings = Some(read_settings(params.get("settings").ok_or_else(|| Error::op("missing key `settings`"))?)?);
	}

	// permissions, against current store state
	let actor_role = get_user_role(conn, community_id, actor_id).await?;
	let target_is_actor = op.account_id.map_or(true, |id| id == actor_id);
	let target_role = match op.account_id {
		Some(id) if !target_is_actor => get_user_role(conn, community_id, id).await?,
		_ => actor_role,
	};
	let pinned = match op.post_id {
		Some(id) => is_pinned(conn, id).await?,
		None => false,
	};
	let subscribed = match action {
		Action::Subscribe | Action::Unsubscribe => is_subscribed(conn, community_id, actor_id).await?,
		_ => false,
	};
	check_permission(action, actor_role, target_is_actor, target_role, op.role_id.unwrap_or(ROLE_GUEST), pinned, subscribed)?;

	Ok(op)
}

/// Settings arrive either as a JSON object or a JSON-encoded string of
/// one. Only the allowed keys are accepted, all with string values.
fn read_settings(raw: &Value) -> Result<String> {
	match raw {
		Value::Object(obj) => read_settings_object(obj),
		Value::String(s) => {
			let parsed: Value =
				serde_json::from_str(s).map_err(|e| Error::op(format!("settings not json: {}", e)))?;
			match parsed.as_object() {
				Some(obj) => read_settings_object(obj),
				None => Err(Error::op("settings must be an object")),
			}
		}
		_ => Err(Error::op("settings must be an object")),
	}
}

fn read_settings_object(obj: &serde_json::Map<String, Value>) -> Result<String> {
	let mut out = serde_json::Map::new();
	for (key, value) in obj {
		if !SETTINGS_KEYS.contains(&key.as_str()) {
			return Err(Error::op(format!("unknown settings key `{}`", key)));
		}
		match value {
			Value::String(s) if !s.is_empty() => {
				out.insert(key.clone(), Value::String(s.clone()));
			}
			_ => return Err(Error::op(format!("settings key `{}` must be a non-blank string", key))),
		}
	}
	Ok(Value::Object(out).to_string())
}

async fn apply(conn: &mut PgConnection, op: &CommunityOp) -> Result<()> {
	match op.action {
		Action::UpdateSettings => {
			sqlx::query("UPDATE hive_communities SET settings = $1 WHERE id = $2")
				.bind(op.settings.as_deref().unwrap_or("{}"))
				.bind(op.community_id)
				.execute(&mut *conn)
				.await?;
		}
		Action::Subscribe => {
			sqlx::query("INSERT INTO hive_subscriptions (community_id, account_id, created_at) VALUES ($1, $2, $3)")
				.bind(op.community_id)
				.bind(op.actor_id)
				.bind(op.date)
				.execute(&mut *conn)
				.await?;
			sqlx::query("UPDATE hive_communities SET subscribers = subscribers + 1 WHERE id = $1")
				.bind(op.community_id)
				.execute(&mut *conn)
				.await?;
		}
		Action::Unsubscribe => {
			sqlx::query("DELETE FROM hive_subscriptions WHERE community_id = $1 AND account_id = $2")
				.bind(op.community_id)
				.bind(op.actor_id)
				.execute(&mut *conn)
				.await?;
			sqlx::query("UPDATE hive_communities SET subscribers = GREATEST(0, subscribers - 1) WHERE id = $1")
				.bind(op.community_id)
				.execute(&mut *conn)
				.await?;
		}
		Action::SetRole => {
			sqlx::query(
				r#"
                INSERT INTO hive_roles (community_id, account_id, role_id, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (community_id, account_id) DO UPDATE SET role_id = EXCLUDED.role_id
            "#,
			)
			.bind(op.community_id)
			.bind(op.account_id)
			.bind(op.role_id)
			.bind(op.date)
			.execute(&mut *conn)
			.await?;
		}
		Action::SetUserTitle => {
			sqlx::query(
				r#"
                INSERT INTO hive_roles (community_id, account_id, title, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (community_id, account_id) DO UPDATE SET title = EXCLUDED.title
            "#,
			)
			.bind(op.community_id)
			.bind(op.actor_id)
			.bind(op.title.as_deref().unwrap_or(""))
			.bind(op.date)
			.execute(&mut *conn)
			.await?;
		}
		Action::MutePost | Action::UnmutePost => {
			sqlx::query("UPDATE hive_posts SET is_muted = $1 WHERE id = $2")
				.bind(op.action == Action::MutePost)
				.bind(op.post_id)
				.execute(&mut *conn)
				.await?;
		}
		Action::PinPost | Action::UnpinPost => {
			sqlx::query("UPDATE hive_posts SET is_pinned = $1 WHERE id = $2")
				.bind(op.action == Action::PinPost)
				.bind(op.post_id)
				.execute(&mut *conn)
				.await?;
		}
		Action::FlagPost => {
			sqlx::query(
				r#"
                INSERT INTO hive_flags (account, community, author, permlink, comment, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
            "#,
			)
			.bind(&op.actor)
			.bind(&op.community)
			.bind(op.account.as_deref().unwrap_or(""))
			.bind(op.permlink.as_deref().unwrap_or(""))
			.bind(op.notes.as_deref().unwrap_or(""))
			.bind(op.date)
			.execute(&mut *conn)
			.await?;
		}
	}

	// append-only audit trail
	sqlx::query("INSERT INTO hive_modlog (account, community, action, created_at) VALUES ($1, $2, $3, $4)")
		.bind(&op.actor)
		.bind(&op.community)
		.bind(op.action.name())
		.bind(op.date)
		.execute(&mut *conn)
		.await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn community_name_pattern() {
		assert!(is_community_name("hive-123456"));
		assert!(is_community_name("hive-10000"));
		assert!(is_community_name("hive-3999999"));
		assert!(!is_community_name("hive-4123456")); // bad type digit
		assert!(!is_community_name("hive-1234")); // too short
		assert!(!is_community_name("hive-12345678")); // too long
		assert!(!is_community_name("hive-12a456"));
		assert!(!is_community_name("alice"));
		assert!(!is_community_name("hive-"));
	}

	#[test]
	fn type_derived_from_name() {
		assert_eq!(type_id("hive-123456"), TYPE_TOPIC);
		assert_eq!(type_id("hive-223456"), TYPE_JOURNAL);
		assert_eq!(type_id("hive-323456"), TYPE_COUNCIL);
	}

	#[test]
	fn set_role_requires_mod() {
		// guest cannot set roles (scenario: carol with role 0)
		let res = check_permission(Action::SetRole, ROLE_GUEST, false, ROLE_GUEST, ROLE_MOD, false, false);
		assert!(res.is_err());
		// owner can promote bob to mod
		check_permission(Action::SetRole, ROLE_OWNER, false, ROLE_GUEST, ROLE_MOD, false, false).unwrap();
	}

	#[test]
	fn set_role_cannot_reach_own_rank() {
		let res = check_permission(Action::SetRole, ROLE_MOD, false, ROLE_GUEST, ROLE_MOD, false, false);
		assert!(res.is_err());
		// and cannot touch a peer or superior
		let res = check_permission(Action::SetRole, ROLE_MOD, false, ROLE_ADMIN, ROLE_MEMBER, false, false);
		assert!(res.is_err());
		// no-op role change rejected
		let res = check_permission(Action::SetRole, ROLE_OWNER, false, ROLE_MOD, ROLE_MOD, false, false);
		assert!(res.is_err());
	}

	#[test]
	fn pin_state_gates() {
		assert!(check_permission(Action::PinPost, ROLE_MOD, true, ROLE_MOD, ROLE_GUEST, true, false).is_err());
		check_permission(Action::PinPost, ROLE_MOD, true, ROLE_MOD, ROLE_GUEST, false, false).unwrap();
		assert!(check_permission(Action::UnpinPost, ROLE_MOD, true, ROLE_MOD, ROLE_GUEST, false, false).is_err());
		check_permission(Action::UnpinPost, ROLE_MOD, true, ROLE_MOD, ROLE_GUEST, true, false).unwrap();
	}

	#[test]
	fn subscription_state_gates() {
		check_permission(Action::Subscribe, ROLE_GUEST, true, ROLE_GUEST, ROLE_GUEST, false, false).unwrap();
		assert!(check_permission(Action::Subscribe, ROLE_GUEST, true, ROLE_GUEST, ROLE_GUEST, false, true).is_err());
		check_permission(Action::Unsubscribe, ROLE_GUEST, true, ROLE_GUEST, ROLE_GUEST, false, true).unwrap();
		assert!(check_permission(Action::Unsubscribe, ROLE_GUEST, true, ROLE_GUEST, ROLE_GUEST, false, false).is_err());
	}

	#[test]
	fn muted_cannot_flag() {
		assert!(check_permission(Action::FlagPost, ROLE_MUTED, true, ROLE_MUTED, ROLE_GUEST, false, false).is_err());
		check_permission(Action::FlagPost, ROLE_GUEST, true, ROLE_GUEST, ROLE_GUEST, false, false).unwrap();
	}

	#[test]
	fn settings_reject_unknown_keys() {
		assert!(read_settings(&serde_json::json!({"title": "My Community"})).is_ok());
		assert!(read_settings(&serde_json::json!({"evil": "x"})).is_err());
		assert!(read_settings(&serde_json::json!("{\"title\": \"via string\"}")).is_ok());
		assert!(read_settings(&serde_json::json!(42)).is_err());
	}

	#[test]
	fn role_names_map() {
		assert_eq!(role_id_from_name("owner").unwrap(), ROLE_OWNER);
		assert_eq!(role_id_from_name("muted").unwrap(), ROLE_MUTED);
		assert!(role_id_from_name("emperor").is_err());
	}
}
