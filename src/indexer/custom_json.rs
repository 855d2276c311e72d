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

//! Routing for `custom_json` operations. The op's `id` selects the
//! subtype; anything unrecognized is silently dropped. Payload parse
//! failures surface as op-validation errors, which the block processor
//! logs and drops without aborting the block.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::PgConnection;

use crate::{
	error::{Error, Result},
	indexer::{accounts::Accounts, community, follow::Follow},
	types::{CustomJsonOp, FollowParams, ReblogParams},
};

/// Fully parsed custom-json payload.
#[derive(Debug)]
pub enum CustomOp {
	Follow(FollowParams),
	Reblog(ReblogParams),
	/// One envelope (`[action, params]`) per item.
	Community(Vec<Value>),
	Unknown,
}

/// Parse a custom-json op into its typed payload.
pub fn parse(op: &CustomJsonOp) -> Result<CustomOp> {
	match op.id.as_str() {
		"follow" => {
			let payload = parse_json(&op.json)?;
			match envelope(&payload)? {
				("follow", params) => Ok(CustomOp::Follow(from_params(params)?)),
				// legacy: reblogs ride the follow id as well
				("reblog", params) => Ok(CustomOp::Reblog(from_params(params)?)),
				(other, _) => Err(Error::op(format!("unknown follow subtype `{}`", other))),
			}
		}
		"reblog" => {
			let payload = parse_json(&op.json)?;
			match envelope(&payload)? {
				("reblog", params) => Ok(CustomOp::Reblog(from_params(params)?)),
				(other, _) => Err(Error::op(format!("unknown reblog subtype `{}`", other))),
			}
		}
		"community" => {
			let payload = parse_json(&op.json)?;
			let items = payload.as_array().ok_or_else(|| Error::op("community payload must be a list"))?;
			if items.is_empty() {
				return Err(Error::op("community payload is empty"));
			}
			// either a single envelope or a list of envelopes
			if items[0].is_string() {
				Ok(CustomOp::Community(vec![payload.clone()]))
			} else {
				Ok(CustomOp::Community(items.clone()))
			}
		}
		_ => Ok(CustomOp::Unknown),
	}
}

fn parse_json(json: &str) -> Result<Value> {
	serde_json::from_str(json).map_err(|e| Error::op(format!("payload not json: {}", e)))
}

/// Split an `[op_name, params]` envelope. A bare params object is
/// accepted as a legacy follow form.
fn envelope(payload: &Value) -> Result<(&str, &Value)> {
	match payload {
		Value::Array(items) if items.len() == 2 => {
			let name = items[0].as_str().ok_or_else(|| Error::op("envelope[0] must be a string"))?;
			if !items[1].is_object() {
				return Err(Error::op("envelope[1] must be a dict"));
			}
			Ok((name, &items[1]))
		}
		Value::Object(_) => Ok(("follow", payload)),
		_ => Err(Error::op("payload must be an [op, params] list")),
	}
}

fn from_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T> {
	serde_json::from_value(params.clone()).map_err(|e| Error::op(format!("bad payload: {}", e)))
}

/// Route one custom-json op to its handler. Community payloads apply
/// item by item; an invalid item is dropped without affecting the rest.
pub async fn dispatch(
	conn: &mut PgConnection,
	accounts: &Accounts,
	follow: &mut Follow,
	op: &CustomJsonOp,
	date: NaiveDateTime,
) -> Result<()> {
	let actor = match op.actor() {
		Some(actor) => actor.to_owned(),
		None => return Err(Error::op("custom op carries no auths")),
	};
	match parse(op)? {
		CustomOp::Follow(params) => follow.process_follow(conn, accounts, &actor, &params, date).await,
		CustomOp::Reblog(params) => follow.process_reblog(conn, accounts, &actor, &params, date).await,
		CustomOp::Community(items) => {
			for item in items {
				match community::process_op(conn, accounts, &actor, &item, date).await {
					Err(Error::Op(e)) => log::warn!("dropping community op from {}: {}", actor, e),
					other => other?,
				}
			}
			Ok(())
		}
		CustomOp::Unknown => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn op(id: &str, json: &str) -> CustomJsonOp {
		CustomJsonOp {
			id: id.to_owned(),
			required_auths: vec![],
			required_posting_auths: vec!["alice".to_owned()],
			json: json.to_owned(),
		}
	}

	#[test]
	fn follow_envelope_parses() {
		let parsed =
			parse(&op("follow", r#"["follow", {"follower": "alice", "following": "bob", "what": ["blog"]}]"#))
				.unwrap();
		match parsed {
			CustomOp::Follow(params) => {
				assert_eq!(params.follower, "alice");
				assert_eq!(params.following, "bob");
				assert_eq!(params.what, vec!["blog"]);
			}
			other => panic!("expected follow, got {:?}", other),
		}
	}

	#[test]
	fn unfollow_has_empty_what() {
		let parsed =
			parse(&op("follow", r#"["follow", {"follower": "alice", "following": "bob", "what": []}]"#)).unwrap();
		match parsed {
			CustomOp::Follow(params) => assert!(params.what.is_empty()),
			other => panic!("expected follow, got {:?}", other),
		}
	}

	#[test]
	fn reblog_rides_the_follow_id() {
		let parsed =
			parse(&op("follow", r#"["reblog", {"account": "alice", "author": "bob", "permlink": "p"}]"#)).unwrap();
		assert!(matches!(parsed, CustomOp::Reblog(_)));
	}

	#[test]
	fn community_payload_single_and_multi() {
		let single = parse(&op("community", r#"["subscribe", {"community": "hive-123456"}]"#)).unwrap();
		match single {
			CustomOp::Community(items) => assert_eq!(items.len(), 1),
			other => panic!("expected community, got {:?}", other),
		}
		let multi = parse(&op(
			"community",
			r#"[["subscribe", {"community": "hive-123456"}], ["unsubscribe", {"community": "hive-123456"}]]"#,
		))
		.unwrap();
		match multi {
			CustomOp::Community(items) => assert_eq!(items.len(), 2),
			other => panic!("expected community, got {:?}", other),
		}
	}

	#[test]
	fn unknown_ids_are_dropped_silently() {
		assert!(matches!(parse(&op("sm_battle", "{}")).unwrap(), CustomOp::Unknown));
	}

	#[test]
	fn garbage_json_is_an_op_error() {
		assert!(matches!(parse(&op("follow", "not json")), Err(Error::Op(_))));
		assert!(matches!(parse(&op("follow", "[1, 2, 3]")), Err(Error::Op(_))));
	}
}
