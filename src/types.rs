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

//! Chain data as decoded from the upstream node's JSON responses, plus
//! the typed operation subset this indexer projects into the store.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// A full signed block as returned by `get_block`.
#[derive(Clone, Debug, Deserialize)]
pub struct BlockData {
	pub block_id: String,
	pub previous: String,
	pub timestamp: NaiveDateTime,
	#[serde(default)]
	pub transactions: Vec<TransactionData>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransactionData {
	/// `[op_name, op_body]` pairs, in application order.
	#[serde(default)]
	pub operations: Vec<(String, Value)>,
}

impl BlockData {
	/// Block height, big-endian hex encoded in the first 4 bytes of the id.
	pub fn num(&self) -> Result<u32> {
		block_num_from_id(&self.block_id)
	}

	pub fn op_count(&self) -> usize {
		self.transactions.iter().map(|tx| tx.operations.len()).sum()
	}
}

/// Decode a block height from a block id (`block_id[..8]` as big-endian hex).
pub fn block_num_from_id(block_id: &str) -> Result<u32> {
	let prefix = block_id.get(..8).ok_or_else(|| Error::Rpc(format!("truncated block_id: {}", block_id)))?;
	let bytes = hex::decode(prefix)?;
	Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Minimal header used to seed the live stream and verify stored heads.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockHead {
	pub num: u32,
	pub hash: String,
	pub date: NaiveDateTime,
}

/// A `comment` operation: root post or reply, creation or edit.
#[derive(Clone, Debug, Deserialize)]
pub struct CommentOp {
	pub author: String,
	pub permlink: String,
	#[serde(default)]
	pub parent_author: String,
	#[serde(default)]
	pub parent_permlink: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub body: String,
	#[serde(default)]
	pub json_metadata: String,
}

impl CommentOp {
	pub fn is_root(&self) -> bool {
		self.parent_author.is_empty()
	}

	pub fn url(&self) -> String {
		format!("{}/{}", self.author, self.permlink)
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeleteCommentOp {
	pub author: String,
	pub permlink: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VoteOp {
	pub voter: String,
	pub author: String,
	pub permlink: String,
	#[serde(default)]
	pub weight: i32,
}

impl VoteOp {
	pub fn url(&self) -> String {
		format!("{}/{}", self.author, self.permlink)
	}
}

/// The on-chain key/value carrier for application-level events.
#[derive(Clone, Debug, Deserialize)]
pub struct CustomJsonOp {
	pub id: String,
	#[serde(default)]
	pub required_auths: Vec<String>,
	#[serde(default)]
	pub required_posting_auths: Vec<String>,
	pub json: String,
}

impl CustomJsonOp {
	/// The account this op is attributed to: the first posting auth,
	/// falling back to the first active auth.
	pub fn actor(&self) -> Option<&str> {
		self.required_posting_auths
			.first()
			.or_else(|| self.required_auths.first())
			.map(|s| s.as_str())
	}
}

/// Payload of a follow/unfollow/ignore custom-json op.
#[derive(Clone, Debug, Deserialize)]
pub struct FollowParams {
	pub follower: String,
	pub following: String,
	/// `["blog"]` = follow, `["ignore"]` = mute, `[]` = clear.
	#[serde(default)]
	pub what: Vec<String>,
}

/// Payload of a reblog custom-json op.
#[derive(Clone, Debug, Deserialize)]
pub struct ReblogParams {
	pub account: String,
	pub author: String,
	pub permlink: String,
	/// `"delete"` undoes a previous reblog.
	#[serde(default)]
	pub delete: Option<String>,
}

/// Pull account names created by an operation, if any. Covers the
/// legacy mining ops as well as the account-creation family.
pub fn created_account_names(op_type: &str, body: &Value) -> Vec<String> {
	match op_type {
		"pow" => body.get("worker_account").and_then(Value::as_str).map(str::to_owned).into_iter().collect(),
		"pow2" => {
			// pow2 nests the account under work[1].input.worker_account
			body.get("work")
				.and_then(|w| w.get(1))
				.and_then(|w| w.get("input"))
				.and_then(|i| i.get("worker_account"))
				.and_then(Value::as_str)
				.map(str::to_owned)
				.into_iter()
				.collect()
		}
		"account_create" | "account_create_with_delegation" => {
			body.get("new_account_name").and_then(Value::as_str).map(str::to_owned).into_iter().collect()
		}
		_ => Vec::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn block_num_decodes_from_id_prefix() {
		// 0x004c4b40 == 5_000_000
		assert_eq!(block_num_from_id("004c4b40deadbeef").unwrap(), 5_000_000);
		assert_eq!(block_num_from_id("00000001aa").unwrap(), 1);
		assert!(block_num_from_id("abc").is_err());
	}

	#[test]
	fn block_decodes_from_condenser_json() {
		let block: BlockData = serde_json::from_value(json!({
			"block_id": "0000006400000000000000000000000000000000",
			"previous": "0000006300000000000000000000000000000000",
			"timestamp": "2017-03-30T00:34:30",
			"transactions": [
				{"operations": [["vote", {"voter": "alice", "author": "bob", "permlink": "p", "weight": 10000}]]}
			]
		}))
		.unwrap();
		assert_eq!(block.num().unwrap(), 100);
		assert_eq!(block.op_count(), 1);
	}

	#[test]
	fn account_names_extracted_per_op_type() {
		let create = json!({"new_account_name": "alice"});
		assert_eq!(created_account_names("account_create", &create), vec!["alice"]);

		let pow = json!({"worker_account": "miner"});
		assert_eq!(created_account_names("pow", &pow), vec!["miner"]);

		let pow2 = json!({"work": ["pow2", {"input": {"worker_account": "miner2"}}]});
		assert_eq!(created_account_names("pow2", &pow2), vec!["miner2"]);

		assert!(created_account_names("transfer", &json!({})).is_empty());
	}

	#[test]
	fn custom_json_actor_prefers_posting_auth() {
		let op = CustomJsonOp {
			id: "follow".into(),
			required_auths: vec!["active".into()],
			required_posting_auths: vec!["posting".into()],
			json: "[]".into(),
		};
		assert_eq!(op.actor(), Some("posting"));
	}
}
