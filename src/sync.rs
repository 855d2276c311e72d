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

//! Sync orchestration: checkpoint replay, fast-sync against the
//! irreversible head, then the live tail. The orchestrator owns every
//! accumulator and the single writer connection; an interrupt is
//! trapped between batches and shuts down with follow edges flushed.

use std::{
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Instant,
};

use std::io::BufRead;

use sqlx::PgConnection;

use crate::{
	config::Config,
	database::{self, queries, Database},
	error::Result,
	indexer::{
		accounts::Accounts,
		blocks,
		cached_post::CachedPost,
		community, feed_cache,
		follow::Follow,
	},
	rpc::SteemClient,
	types::BlockData,
};

/// Blocks per fast-sync fetch/transaction.
const SYNC_BATCH: u32 = 1000;

/// Live tail hands back to fast-sync past this many blocks behind.
const MAX_GAP: u32 = 40;

/// Live-mode account refresh spreads across this many blocks.
const LIVE_ACCOUNT_PERIOD: u32 = 8;

/// Refresh chain state once a minute (20 blocks at 3s).
const CHAIN_STATE_INTERVAL: u32 = 20;

/// Sweep stale accounts once an hour (1200 blocks at 3s).
const STALE_ACCOUNT_INTERVAL: u32 = 1200;

pub struct Sync {
	conf: Config,
	db: Database,
	client: SteemClient,
	accounts: Accounts,
	follow: Follow,
	cached: CachedPost,
	running: Arc<AtomicBool>,
	initial: bool,
}

/// Run the indexer until interrupted or a fatal fork error surfaces.
pub async fn run(conf: Config, running: Arc<AtomicBool>) -> Result<()> {
	database::migrate(&conf.database_url).await?;
	let db = Database::new(conf.database_url.clone()).await?;
	let client = SteemClient::from_config(&conf)?;
	let mut sync = Sync {
		conf,
		db,
		client,
		accounts: Accounts::new(),
		follow: Follow::new(),
		cached: CachedPost::new(),
		running,
		initial: false,
	};

	{
		let mut conn = sync.db.conn().await?;
		sync.accounts.load_ids(&mut conn).await?;
		sync.initial = queries::is_initial_sync(&mut conn).await?;
	}

	if sync.initial {
		log::info!("[INIT] *** initial fast sync ***");
		sync.sync_from_checkpoints(1000).await?;
		sync.sync_from_steemd().await?;
		if !sync.running() {
			return Ok(());
		}
		log::info!("[INIT] *** initial cache build ***");
		sync.cache_missing_posts().await?;
		{
			let mut conn = sync.db.conn().await?;
			feed_cache::rebuild(&mut conn).await?;
		}
		sync.initial = false;
	} else {
		// recover from a fork, then clean up after any unclean stop
		{
			let mut conn = sync.db.conn().await?;
			blocks::verify_head(&mut conn, &sync.client).await?;
		}
		sync.cache_missing_posts().await?;
	}

	loop {
		// sync up to the irreversible block
		sync.sync_from_steemd().await?;
		if !sync.running() {
			break;
		}

		// take care of the payout backlog
		sync.flush_payouts().await?;

		// start listening
		sync.listen_steemd().await?;
		if !sync.running() {
			break;
		}
	}
	log::info!("[SYNC] stopped cleanly");
	Ok(())
}

impl Sync {
	fn running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	/// Replay blocks from local `checkpoints/<N>.json.lst` files, one
	/// JSON block per line, skipping whatever the store already has.
	async fn sync_from_checkpoints(&mut self, chunk_size: usize) -> Result<()> {
		let dir = Path::new("checkpoints");
		if !dir.is_dir() {
			return Ok(());
		}
		let files = checkpoint_files(dir)?;

		let mut last_block = {
			let mut conn = self.db.conn().await?;
			queries::head_block_num(&mut conn).await?
		};
		let mut last_read = 0u32;
		for (num, path) in files {
			if last_block < num {
				log::info!("[SYNC] load {} -- last block: {}", path.display(), last_block);
				let file = std::fs::File::open(&path)?;
				let reader = std::io::BufReader::new(file);
				// each line is one block; skip the ones we already have
				let skip = (last_block - last_read) as usize;
				let mut batch: Vec<BlockData> = Vec::with_capacity(chunk_size);
				for line in reader.lines().skip(skip) {
					let line = line?;
					if line.trim().is_empty() {
						continue;
					}
					batch.push(serde_json::from_str(&line)?);
					if batch.len() == chunk_size {
						self.process_multi(&batch).await?;
						batch.clear();
					}
				}
				if !batch.is_empty() {
					self.process_multi(&batch).await?;
				}
				last_block = num;
			}
			last_read = num;
		}
		Ok(())
	}

	/// Apply a batch of blocks in one transaction.
	async fn process_multi(&mut self, batch: &[BlockData]) -> Result<()> {
		let mut tx = self.db.begin().await?;
		for block in batch {
			blocks::process(&mut tx, &mut self.accounts, &mut self.follow, &mut self.cached, block, self.initial)
				.await?;
		}
		self.follow.flush(&mut tx).await?;
		tx.commit().await?;
		Ok(())
	}

	/// Fast-sync in `SYNC_BATCH`-sized transactions up to the
	/// irreversible head. An interrupt is trapped between batches: the
	/// follow accumulator is already flushed per batch, the accounts
	/// flush is skipped (reconstructible), and the cached-post flush is
	/// best effort.
	async fn sync_from_steemd(&mut self) -> Result<()> {
		let mut lbound = {
			let mut conn = self.db.conn().await?;
			queries::head_block_num(&mut conn).await? + 1
		};
		let ubound = self.client.last_irreversible().await?;
		if ubound <= lbound {
			return Ok(());
		}
		log::info!("[SYNC] start block {}, +{} to sync", lbound, ubound - lbound);

		let mut aborted = false;
		while lbound < ubound {
			let to = (lbound + SYNC_BATCH).min(ubound);
			let started = Instant::now();
			let blocks = self.client.get_blocks_range(lbound, to).await?;
			let fetched = started.elapsed();
			self.process_multi(&blocks).await?;
			let total = started.elapsed().as_secs_f64().max(1e-6);
			let date = blocks.last().map(|b| b.timestamp.to_string()).unwrap_or_default();
			log::info!(
				"[SYNC] got block {} @ {} ({:.0} rps, {:.0} wps)",
				to - 1,
				date,
				blocks.len() as f64 / fetched.as_secs_f64().max(1e-6),
				blocks.len() as f64 / total,
			);
			lbound = to;
			if !self.running() {
				aborted = true;
				break;
			}
		}

		if !self.initial {
			let mut tx = self.db.begin().await?;
			self.follow.flush(&mut tx).await?;
			if !aborted {
				// low importance; accounts are swept regularly
				self.accounts.flush(&self.client, &mut tx, 1, 0).await?;
			}
			// at worst this loses presentational deltas that the next
			// payout or edit refreshes
			self.cached.flush(&self.client, &mut tx, &mut self.accounts).await?;
			tx.commit().await?;
		}
		if aborted {
			log::warn!("[SYNC] aborted");
		}
		Ok(())
	}

	/// Build cache rows for any post that lacks one, until none remain.
	async fn cache_missing_posts(&mut self) -> Result<()> {
		let gap = {
			let mut conn = self.db.conn().await?;
			self.cached.dirty_missing(&mut conn).await?
		};
		log::info!("[INIT] {} missing post cache entries", gap);
		loop {
			let mut tx = self.db.begin().await?;
			let counts = self.cached.flush(&self.client, &mut tx, &mut self.accounts).await?;
			tx.commit().await?;
			if counts.insert == 0 {
				break;
			}
			let mut conn = self.db.conn().await?;
			self.cached.dirty_missing(&mut conn).await?;
		}
		Ok(())
	}

	/// Sweep and refresh posts whose payout window has closed.
	async fn flush_payouts(&mut self) -> Result<()> {
		let mut tx = self.db.begin().await?;
		if let Some(date) = queries::head_block_date(&mut tx).await? {
			self.cached.dirty_paidouts(&mut tx, date).await?;
			self.cached.flush(&self.client, &mut tx, &mut self.accounts).await?;
		}
		tx.commit().await?;
		Ok(())
	}

	/// Tail the chain live, one transaction per block. Returns when the
	/// stream hands back control (gap too large, fork in trail) so the
	/// caller can fast-sync.
	async fn listen_steemd(&mut self) -> Result<()> {
		let start_from = {
			let mut conn = self.db.conn().await?;
			queries::head_block_num(&mut conn).await? + 1
		};
		let mut stream = self.client.stream_blocks(start_from, self.conf.trail_blocks, MAX_GAP).await?;

		while let Some(block) = stream.next().await? {
			let started = Instant::now();
			let mut tx = self.db.begin().await?;
			let summary =
				blocks::process(&mut tx, &mut self.accounts, &mut self.follow, &mut self.cached, &block, false)
					.await?;
			let follows = self.follow.flush(&mut tx).await?;
			let accts = self.accounts.flush(&self.client, &mut tx, LIVE_ACCOUNT_PERIOD, summary.num).await?;
			self.cached.dirty_paidouts(&mut tx, block.timestamp).await?;
			let cnt = self.cached.flush(&self.client, &mut tx, &mut self.accounts).await?;
			tx.commit().await?;

			let ms = started.elapsed().as_millis();
			log::info!(
				"[LIVE] got block {} at {} -- {} txs, {} posts, {} edits, {} payouts, {} votes, {} accounts, {} follows -- {}ms{}",
				summary.num,
				block.timestamp,
				summary.tx_count,
				cnt.insert,
				cnt.update,
				cnt.payout,
				cnt.upvote,
				accts,
				follows,
				ms,
				if ms > 1000 { " SLOW" } else { "" }
			);

			// once an hour, re-sync the stalest account metadata and
			// community payout totals
			if summary.num % STALE_ACCOUNT_INTERVAL == 0 {
				{
					let mut conn = self.db.conn().await?;
					self.accounts.dirty_oldest(&mut conn, 10_000).await?;
					community::recalc_pending_payouts(&mut conn).await?;
				}
				let mut tx = self.db.begin().await?;
				self.accounts.flush(&self.client, &mut tx, 1, summary.num).await?;
				tx.commit().await?;
			}

			// once a minute, refresh chain props
			if summary.num % CHAIN_STATE_INTERVAL == 0 {
				let mut conn = self.db.conn().await?;
				update_chain_state(&self.client, &mut conn).await?;
			}

			if !self.running() {
				break;
			}
		}
		Ok(())
	}
}

/// Refetch dynamic global properties and derived prices into the
/// singleton state row.
async fn update_chain_state(client: &SteemClient, conn: &mut PgConnection) -> Result<u32> {
	let state = client.gdgp_extended().await?;
	let block_num = state.head_block_number()?;
	sqlx::query(
		"UPDATE hive_state SET block_num = $1, steem_per_mvest = $2, usd_per_steem = $3, \
         sbd_per_steem = $4, dgpo = $5",
	)
	.bind(block_num as i32)
	.bind(state.steem_per_mvest)
	.bind(state.usd_per_steem)
	.bind(state.sbd_per_steem)
	.bind(state.dgpo.to_string())
	.execute(&mut *conn)
	.await?;
	Ok(block_num)
}

/// Scan a checkpoint directory for `<block_num>.json.lst` files,
/// ordered by block number.
fn checkpoint_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
	let mut files = Vec::new();
	for entry in std::fs::read_dir(dir)? {
		let path = entry?.path();
		let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
		if let Some(stem) = name.strip_suffix(".json.lst") {
			if let Ok(num) = stem.parse::<u32>() {
				files.push((num, path));
			}
		}
	}
	files.sort_by_key(|(num, _)| *num);
	Ok(files)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn checkpoint_files_sorted_and_filtered() {
		let dir = tempfile::tempdir().unwrap();
		for name in &["1000.json.lst", "500.json.lst", "2000.json.lst", "readme.txt", "x.json.lst"] {
			std::fs::write(dir.path().join(name), b"").unwrap();
		}
		let files = checkpoint_files(dir.path()).unwrap();
		let nums: Vec<u32> = files.iter().map(|(n, _)| *n).collect();
		assert_eq!(nums, vec![500, 1000, 2000]);
	}
}
