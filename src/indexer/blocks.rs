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

//! Single-block projection. Decodes a block's operations, routes them
//! through the accumulators and the custom-op dispatcher, all within
//! the caller's transaction.
//!
//! Within a block, account registration is batched first, then post
//! registration, then custom-json ops in document order. Comments,
//! follows and reblogs only reference accounts/posts that already exist
//! or were created earlier in the same block, so the reordering is
//! unobservable.

use sqlx::PgConnection;

use crate::{
	database::queries,
	error::{Error, Result},
	indexer::{
		accounts::Accounts,
		cached_post::{CachedPost, DirtyLevel},
		custom_json,
		follow::Follow,
		posts,
	},
	rpc::SteemClient,
	types::{self, BlockData, CommentOp, CustomJsonOp, DeleteCommentOp, VoteOp},
};

pub struct BlockSummary {
	pub num: u32,
	pub tx_count: usize,
}

/// Project one decoded block into the store.
pub async fn process(
	conn: &mut PgConnection,
	accounts: &mut Accounts,
	follow: &mut Follow,
	cached: &mut CachedPost,
	block: &BlockData,
	is_initial_sync: bool,
) -> Result<BlockSummary> {
	let num = insert(conn, block).await?;
	let date = block.timestamp;

	let mut account_names: Vec<String> = Vec::new();
	let mut comments: Vec<CommentOp> = Vec::new();
	let mut deletes: Vec<DeleteCommentOp> = Vec::new();
	let mut votes: Vec<VoteOp> = Vec::new();
	let mut customs: Vec<CustomJsonOp> = Vec::new();

	for tx in &block.transactions {
		for (op_type, body) in &tx.operations {
			match op_type.as_str() {
				"pow" | "pow2" | "account_create" | "account_create_with_delegation" => {
					account_names.extend(types::created_account_names(op_type, body));
				}
				"comment" => match serde_json::from_value(body.clone()) {
					Ok(op) => comments.push(op),
					Err(e) => log::warn!("undecodable comment op in block {}: {}", num, e),
				},
				"delete_comment" => match serde_json::from_value(body.clone()) {
					Ok(op) => deletes.push(op),
					Err(e) => log::warn!("undecodable delete op in block {}: {}", num, e),
				},
				"vote" => match serde_json::from_value(body.clone()) {
					Ok(op) => votes.push(op),
					Err(e) => log::warn!("undecodable vote op in block {}: {}", num, e),
				},
				"custom_json" => match serde_json::from_value(body.clone()) {
					Ok(op) => customs.push(op),
					Err(e) => log::warn!("undecodable custom op in block {}: {}", num, e),
				},
				_ => {}
			}
		}
	}

	let new_accounts = accounts.register(conn, &account_names, date).await?;
	let new_posts = posts::register(conn, accounts, &comments, date).await?;
	let deleted = posts::delete(conn, &deletes).await?;

	if !is_initial_sync {
		for name in &new_accounts {
			accounts.dirty(name);
		}
		for op in &comments {
			accounts.dirty(&op.author);
			cached.dirty(&op.author, &op.permlink, None, DirtyLevel::Update);
		}
		for post in &new_posts {
			cached.dirty(&post.author, &post.permlink, Some(post.id), DirtyLevel::Insert);
		}
		for (_, url) in &deleted {
			cached.undirty(url);
		}
		for op in &votes {
			accounts.dirty(&op.author);
			cached.dirty(&op.author, &op.permlink, None, DirtyLevel::Upvote);
		}
	}

	for op in &customs {
		match custom_json::dispatch(conn, accounts, follow, op, date).await {
			Err(Error::Op(e)) => log::warn!("dropping custom op in block {}: {}", num, e),
			other => other?,
		}
	}

	Ok(BlockSummary { num, tx_count: block.transactions.len() })
}

/// Insert the block row. Idempotent: replaying an already-stored block
/// is a no-op at the row level.
async fn insert(conn: &mut PgConnection, block: &BlockData) -> Result<u32> {
	let num = block.num()?;
	sqlx::query(
		"INSERT INTO hive_blocks (num, hash, prev, txs, ops, created_at) VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (num) DO NOTHING",
	)
	.bind(num as i32)
	.bind(&block.block_id)
	.bind(&block.previous)
	.bind(block.transactions.len() as i16)
	.bind(block.op_count() as i16)
	.bind(block.timestamp)
	.execute(&mut *conn)
	.await?;
	Ok(num)
}

/// Recovery check: walk the stored head back until it matches the
/// upstream chain at the same height. Runs before re-entering the sync
/// loop on a non-initial start.
pub async fn verify_head(conn: &mut PgConnection, client: &SteemClient) -> Result<()> {
	loop {
		let head = match queries::head_block(conn).await? {
			Some(head) => head,
			None => return Ok(()),
		};
		let upstream = client.get_block_simple(head.num as u32).await?;
		if upstream.hash == head.hash {
			return Ok(());
		}
		log::warn!(
			"[FORK] stored block {} hash {} does not match upstream {}; truncating",
			head.num,
			head.hash,
			upstream.hash
		);
		queries::delete_block(conn, head.num as u32).await?;
	}
}
