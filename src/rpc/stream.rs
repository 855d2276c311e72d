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

//! Live-tail block streaming. Paces itself against the chain's 3-second
//! slot cadence, buffers `trail` blocks for reorg safety, and hands
//! control back to the caller (fast-sync) when it falls too far behind
//! or sees a fork inside the trail buffer.

use std::{
	collections::VecDeque,
	time::{Duration, Instant},
};

use crate::{
	error::{Error, Result},
	types::{BlockData, BlockHead},
};

use super::SteemClient;

/// Wall-clock time per chain slot.
const BLOCK_INTERVAL: Duration = Duration::from_secs(3);

/// Where the stream pulls blocks from. Implemented by [`SteemClient`];
/// tests substitute a scripted source.
#[async_trait::async_trait]
pub trait BlockSource {
	async fn head(&self) -> Result<u32>;
	async fn header(&self, num: u32) -> Result<BlockHead>;
	async fn fetch(&self, num: u32) -> Result<Option<BlockData>>;
}

#[async_trait::async_trait]
impl BlockSource for &SteemClient {
	async fn head(&self) -> Result<u32> {
		self.head_block().await
	}

	async fn header(&self, num: u32) -> Result<BlockHead> {
		self.get_block_simple(num).await
	}

	async fn fetch(&self, num: u32) -> Result<Option<BlockData>> {
		self.get_block(num).await
	}
}

impl SteemClient {
	/// Start a live tail at `start_from`. Yields blocks strictly in
	/// order, each delayed by `trail_blocks` successors.
	pub async fn stream_blocks(
		&self,
		start_from: u32,
		trail_blocks: usize,
		max_gap: u32,
	) -> Result<BlockStream<&SteemClient>> {
		BlockStream::new(self, start_from, trail_blocks, max_gap).await
	}
}

pub struct BlockStream<S: BlockSource> {
	source: S,
	last: BlockHead,
	head_num: u32,
	start_head: u32,
	next_expected: Instant,
	/// Inter-slot tuning in seconds, bounded to [0, 3].
	lag: f64,
	queue: VecDeque<BlockData>,
	trail: usize,
	max_gap: u32,
}

impl<S: BlockSource> BlockStream<S> {
	pub async fn new(source: S, start_from: u32, trail: usize, max_gap: u32) -> Result<Self> {
		debug_assert!(trail < 25);
		let last = source.header(start_from - 1).await?;
		let head_num = source.head().await?;
		Ok(Self {
			source,
			last,
			head_num,
			start_head: head_num,
			next_expected: Instant::now(),
			lag: 0.0,
			queue: VecDeque::new(),
			trail,
			max_gap,
		})
	}

	/// Produce the next trailing block.
	///
	/// `Ok(None)` means the stream ended deliberately: either the gap to
	/// the head grew past `max_gap`, or a fork was detected while the
	/// trail buffer still held unemitted blocks. The caller re-enters
	/// fast-sync in both cases. A fork with an empty trail buffer means
	/// the store itself no longer links and is unrecoverable here.
	pub async fn next(&mut self) -> Result<Option<BlockData>> {
		loop {
			let lag = Duration::from_secs_f64(self.lag);

			// advance the schedule for any slots we slept through
			let now = Instant::now();
			while now >= self.next_expected + lag {
				self.head_num += 1;
				self.next_expected += BLOCK_INTERVAL;
				let gap = self.head_num.saturating_sub(self.last.num);
				log::info!("[LIVE] {} blocks behind...", gap);
				if gap > self.max_gap {
					log::warn!("[LIVE] gap too large: {}", gap);
					return Ok(None);
				}
			}

			// caught up; wait out the current slot
			if self.head_num == self.last.num {
				let wait = (self.next_expected + lag).saturating_duration_since(Instant::now());
				tokio::time::sleep(wait).await;
				self.head_num += 1;
				self.next_expected += BLOCK_INTERVAL;
			}

			let block_num = self.last.num + 1;
			let block = match self.source.fetch(block_num).await? {
				None => {
					self.lag = (self.lag + 0.25).min(3.0);
					log::info!("[LIVE] block {} not available. head:{} lag:{:.3}", block_num, self.head_num, self.lag);
					tokio::time::sleep(Duration::from_millis(500)).await;
					continue;
				}
				Some(block) => {
					self.lag = (self.lag - 0.001).max(0.0);
					block
				}
			};
			self.last.num = block_num;

			// if the block doesn't link, we're forked
			if self.last.hash != block.previous {
				if !self.queue.is_empty() {
					log::warn!("[FORK] fork within trail buffer; emptying to retry from fast-sync");
					return Ok(None);
				}
				return Err(Error::UnlinkableBlock {
					num: block_num,
					have: self.last.hash.clone(),
					got: block.previous.clone(),
				});
			}
			self.last.hash = block.block_id.clone();

			// detect missed slots, adjust the schedule
			let miss_secs = (block.timestamp - self.last.date).num_seconds() - 3;
			if miss_secs > 0 && block_num >= self.start_head {
				log::info!("[LIVE] {} missed blocks", miss_secs / 3);
				self.next_expected += Duration::from_secs(miss_secs as u64);
			}
			self.last.date = block.timestamp;

			// buffer the yield until `trail` successors have arrived
			self.queue.push_back(block);
			if self.queue.len() > self.trail {
				return Ok(self.queue.pop_front());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::NaiveDateTime;
	use hashbrown::HashMap;

	struct Scripted {
		head: u32,
		blocks: HashMap<u32, BlockData>,
	}

	fn hash_for(num: u32) -> String {
		format!("{:08x}{:032x}", num, num)
	}

	fn date_for(num: u32) -> NaiveDateTime {
		"2020-01-01T00:00:00".parse::<NaiveDateTime>().unwrap() + chrono::Duration::seconds(3 * num as i64)
	}

	fn block_for(num: u32, prev: &str) -> BlockData {
		serde_json::from_value(serde_json::json!({
			"block_id": hash_for(num),
			"previous": prev,
			"timestamp": date_for(num).format("%Y-%m-%dT%H:%M:%S").to_string(),
			"transactions": [],
		}))
		.unwrap()
	}

	/// Linked blocks `lo..=hi`, optionally capped with a forked block.
	fn script(lo: u32, hi: u32, forked_tip: bool) -> Scripted {
		let mut blocks = HashMap::new();
		for num in lo..=hi {
			blocks.insert(num, block_for(num, &hash_for(num - 1)));
		}
		if forked_tip {
			blocks.insert(hi + 1, block_for(hi + 1, "ff00000000000000"));
		}
		// head far enough ahead that the stream never sleeps on a slot
		Scripted { head: hi + 100, blocks }
	}

	#[async_trait::async_trait]
	impl BlockSource for &Scripted {
		async fn head(&self) -> Result<u32> {
			Ok(self.head)
		}

		async fn header(&self, num: u32) -> Result<BlockHead> {
			Ok(BlockHead { num, hash: hash_for(num), date: date_for(num) })
		}

		async fn fetch(&self, num: u32) -> Result<Option<BlockData>> {
			Ok(self.blocks.get(&num).cloned())
		}
	}

	#[tokio::test]
	async fn yields_in_order_delayed_by_trail() {
		let source = script(10, 15, true);
		// max_gap above the scripted head distance so the stream only
		// ends on the forked tip
		let mut stream = BlockStream::new(&source, 10, 2, 1000).await.unwrap();

		let mut yielded = Vec::new();
		while let Some(block) = stream.next().await.unwrap() {
			yielded.push(block.num().unwrap());
		}
		// 6 linked blocks, trail of 2 -> only the first 4 are emitted,
		// strictly in order
		assert_eq!(yielded, vec![10, 11, 12, 13]);
	}

	#[tokio::test]
	async fn fork_in_trail_ends_stream_without_partial_blocks() {
		let source = script(10, 12, true);
		let mut stream = BlockStream::new(&source, 10, 2, 1000).await.unwrap();

		// blocks 10..=12 arrive; queue holds 11,12 after yielding 10
		assert_eq!(stream.next().await.unwrap().unwrap().num().unwrap(), 10);
		// block 13 does not link; trail still buffered -> graceful end
		assert!(stream.next().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn fork_with_empty_trail_is_fatal() {
		let source = script(10, 10, false);
		let mut tampered = Scripted { head: source.head, blocks: source.blocks.clone() };
		tampered.blocks.insert(10, block_for(10, "ff00000000000000"));
		let mut stream = BlockStream::new(&tampered, 10, 0, 1000).await.unwrap();

		match stream.next().await {
			Err(Error::UnlinkableBlock { num, .. }) => assert_eq!(num, 10),
			other => panic!("expected unlinkable block, got {:?}", other.map(|b| b.map(|b| b.block_id))),
		}
	}

	#[tokio::test]
	async fn oversized_gap_aborts_to_fast_sync() {
		// head 3000 blocks ahead of where we start tailing
		let mut source = script(10, 12, false);
		source.head = 3000;
		let mut stream = BlockStream::new(&source, 10, 0, 40).await.unwrap();
		// gap (head - last) exceeds max_gap immediately
		assert!(stream.next().await.unwrap().is_none());
	}
}
