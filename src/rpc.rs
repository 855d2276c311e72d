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

//! Client for the upstream JSON-RPC node: batched calls, indefinite
//! retry with linear backoff, block range assembly and the derived
//! global-property units.

mod stats;
pub mod stream;
mod transport;

use std::time::{Duration, Instant};

use futures::stream::{self as futstream, StreamExt, TryStreamExt};
use hashbrown::HashMap;
use serde_json::{json, Value};

use self::stats::ClientStats;
use self::transport::{is_empty_response, HttpTransport};
use crate::{
	config::Config,
	error::{Error, Result},
	types::{BlockData, BlockHead},
};

/// Snapshot of the chain's dynamic global properties plus the derived
/// price/vesting units stored in `hive_state`.
#[derive(Clone, Debug)]
pub struct ChainSnapshot {
	pub dgpo: Value,
	pub steem_per_mvest: f64,
	pub usd_per_steem: f64,
	pub sbd_per_steem: f64,
}

impl ChainSnapshot {
	pub fn head_block_number(&self) -> Result<u32> {
		field_u32(&self.dgpo, "head_block_number")
	}
}

pub struct SteemClient {
	transport: HttpTransport,
	max_batch: usize,
	max_workers: usize,
	stats: ClientStats,
}

impl SteemClient {
	pub fn new(url: &str, max_batch: usize, max_workers: usize) -> Result<Self> {
		if url.is_empty() {
			return Err(Error::Config("steemd_url is empty".into()));
		}
		let (url, appbase) = match url.strip_suffix("#appbase") {
			Some(stripped) => (stripped.to_owned(), true),
			None => (url.to_owned(), false),
		};
		log::info!("[STEEM] init url:{} batch:{} workers:{} appbase:{}", url, max_batch, max_workers, appbase);
		Ok(Self {
			transport: HttpTransport::new(url, appbase)?,
			max_batch,
			max_workers,
			stats: ClientStats::new(),
		})
	}

	pub fn from_config(conf: &Config) -> Result<Self> {
		Self::new(&conf.steemd_url, conf.max_batch, conf.max_workers)
	}

	/// Perform a single upstream call, retrying forever with linear
	/// backoff (`tries / 10` seconds). Empty responses are retried for
	/// every method except `get_block`, which legitimately returns null
	/// for blocks that have not been produced yet.
	async fn exec(&self, method: &'static str, params: Value) -> Result<Value> {
		let start = Instant::now();
		let mut tries = 0u32;
		let result = loop {
			let attempt = match self.transport.exec(method, params.clone()).await {
				Ok(value) if method != "get_block" && is_empty_response(&value) => {
					Err(Error::Rpc(format!("empty response for {}", method)))
				}
				other => other,
			};
			match attempt {
				Ok(value) => break value,
				Err(e) if is_retriable(&e) => {
					tries += 1;
					log::warn!("{} failure, retry in {:.1}s -- {}", method, tries as f64 / 10.0, e);
					tokio::time::sleep(backoff(tries)).await;
				}
				Err(e) => return Err(e),
			}
		};
		let batch_size = match (method, &params) {
			("get_accounts", Value::Array(outer)) => {
				outer.first().and_then(Value::as_array).map(Vec::len).unwrap_or(1)
			}
			_ => 1,
		};
		self.stats.log(method, start.elapsed().as_secs_f64() * 1000.0, batch_size);
		Ok(result)
	}

	/// Perform a positional batch call, coalesced into JSON-RPC batches
	/// of at most `max_batch` items and fanned across at most
	/// `max_workers` in-flight requests. Results are assembled in
	/// submission order.
	async fn exec_batch(&self, method: &'static str, params: Vec<Value>) -> Result<Vec<Value>> {
		let start = Instant::now();
		let total = params.len();
		let chunks: Vec<Vec<Value>> = params.chunks(self.max_batch).map(|c| c.to_vec()).collect();

		let results: Vec<Vec<Value>> = if self.max_workers == 1 {
			let mut out = Vec::with_capacity(chunks.len());
			for chunk in chunks {
				out.push(self.exec_batch_with_retry(method, chunk).await?);
			}
			out
		} else {
			let futs = chunks.into_iter().map(|chunk| self.exec_batch_with_retry(method, chunk));
			futstream::iter(futs).buffered(self.max_workers).try_collect().await?
		};

		self.stats.log(method, start.elapsed().as_secs_f64() * 1000.0, total);
		Ok(results.into_iter().flatten().collect())
	}

	async fn exec_batch_with_retry(&self, method: &'static str, params: Vec<Value>) -> Result<Vec<Value>> {
		let mut tries = 0u32;
		loop {
			match self.transport.exec_batch(method, &params).await {
				Ok(results) => return Ok(results),
				Err(e) if is_retriable(&e) => {
					tries += 1;
					log::warn!("batch {} failure, retry in {:.1}s -- {}", method, tries as f64 / 10.0, e);
					tokio::time::sleep(backoff(tries)).await;
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Fetch full account objects. The node is expected to return one
	/// object per requested name; short responses are retried.
	pub async fn get_accounts(&self, names: &[String]) -> Result<Vec<Value>> {
		if names.is_empty() {
			return Ok(Vec::new());
		}
		let mut tries = 0u32;
		loop {
			let result = self.exec("get_accounts", json!([names])).await?;
			match result {
				Value::Array(accounts) if accounts.len() == names.len() => return Ok(accounts),
				other => {
					tries += 1;
					let got = other.as_array().map(Vec::len).unwrap_or(0);
					log::warn!("requested {} accounts got {}, retry in {:.1}s", names.len(), got, tries as f64 / 10.0);
					tokio::time::sleep(backoff(tries)).await;
				}
			}
		}
	}

	/// Fetch post bodies for `(author, permlink)` pairs, batched.
	/// Missing posts come back with an empty author; callers filter.
	pub async fn get_content_batch(&self, pairs: &[(String, String)]) -> Result<Vec<Value>> {
		let params: Vec<Value> = pairs.iter().map(|(author, permlink)| json!([author, permlink])).collect();
		let posts = self.exec_batch("get_content", params).await?;
		for post in &posts {
			if post.get("author").is_none() {
				return Err(Error::Rpc(format!("invalid get_content entry: {}", post)));
			}
		}
		Ok(posts)
	}

	pub async fn get_block(&self, num: u32) -> Result<Option<BlockData>> {
		let value = self.exec("get_block", json!([num])).await?;
		if is_empty_response(&value) {
			return Ok(None);
		}
		Ok(Some(serde_json::from_value(value)?))
	}

	pub async fn get_block_simple(&self, num: u32) -> Result<BlockHead> {
		let block =
			self.get_block(num).await?.ok_or_else(|| Error::Rpc(format!("block {} not yet produced", num)))?;
		Ok(BlockHead { num: block.num()?, hash: block.block_id, date: block.timestamp })
	}

	/// Fetch the half-open range `[lbound, ubound)`, re-requesting until
	/// every block is present and deduplicating on the decoded id.
	pub async fn get_blocks_range(&self, lbound: u32, ubound: u32) -> Result<Vec<BlockData>> {
		let mut blocks: HashMap<u32, BlockData> = HashMap::new();
		loop {
			let missing: Vec<u32> = (lbound..ubound).filter(|n| !blocks.contains_key(n)).collect();
			if missing.is_empty() {
				break;
			}
			let params: Vec<Value> = missing.iter().map(|n| json!([n])).collect();
			for value in self.exec_batch("get_block", params).await? {
				if value.get("block_id").is_none() {
					log::warn!("invalid block returned: {}", value);
					continue;
				}
				let block: BlockData = match serde_json::from_value(value) {
					Ok(b) => b,
					Err(e) => {
						log::warn!("undecodable block returned: {}", e);
						continue;
					}
				};
				let num = block.num()?;
				if blocks.insert(num, block).is_some() {
					log::warn!("batch get_block returned dupe {}", num);
				}
			}
			let still_missing = (lbound..ubound).filter(|n| !blocks.contains_key(n)).count();
			if still_missing > 0 {
				log::warn!("API missed {} blocks in [{}, {}), retrying", still_missing, lbound, ubound);
				tokio::time::sleep(Duration::from_secs(3)).await;
			}
		}
		Ok((lbound..ubound)
			.map(|n| blocks.remove(&n).expect("loop exits only once every requested block is present"))
			.collect())
	}

	async fn gdgp(&self) -> Result<Value> {
		let props = self.exec("get_dynamic_global_properties", json!([])).await?;
		if props.get("time").is_none() {
			return Err(Error::Rpc(format!("gdgp invalid resp: {}", props)));
		}
		Ok(props)
	}

	pub async fn head_time(&self) -> Result<chrono::NaiveDateTime> {
		let props = self.gdgp().await?;
		let time = props.get("time").and_then(Value::as_str).ok_or_else(|| Error::Rpc("gdgp missing time".into()))?;
		Ok(time.parse()?)
	}

	pub async fn head_block(&self) -> Result<u32> {
		field_u32(&self.gdgp().await?, "head_block_number")
	}

	pub async fn last_irreversible(&self) -> Result<u32> {
		field_u32(&self.gdgp().await?, "last_irreversible_block_num")
	}

	/// Global properties plus derived units, with deprecated dgpo keys
	/// stripped before storage.
	pub async fn gdgp_extended(&self) -> Result<ChainSnapshot> {
		let mut dgpo = self.gdgp().await?;
		if let Some(obj) = dgpo.as_object_mut() {
			for key in &[
				"total_pow",
				"num_pow_witnesses",
				"confidential_supply",
				"confidential_sbd_supply",
				"total_reward_fund_steem",
				"total_reward_shares2",
			] {
				obj.remove(*key);
			}
		}
		let steem_per_mvest = steem_per_mvest(&dgpo)?;
		let usd_per_steem = self.feed_price().await?;
		let sbd_per_steem = self.order_book_price().await?;
		Ok(ChainSnapshot { dgpo, steem_per_mvest, usd_per_steem, sbd_per_steem })
	}

	/// Median feed price: SBD amount per STEEM, from the witness feed.
	async fn feed_price(&self) -> Result<f64> {
		let feed = self.exec("get_feed_history", json!([])).await?;
		let median = feed
			.get("current_median_history")
			.ok_or_else(|| Error::Rpc("feed history missing current_median_history".into()))?;
		let mut sbd = None;
		let mut steem = None;
		for key in &["base", "quote"] {
			let raw = median.get(*key).and_then(Value::as_str).ok_or_else(|| Error::Rpc("bad feed unit".into()))?;
			let (amount, symbol) = split_asset(raw)?;
			match symbol {
				"SBD" => sbd = Some(amount),
				"STEEM" => steem = Some(amount),
				other => return Err(Error::Rpc(format!("unexpected feed symbol {}", other))),
			}
		}
		match (sbd, steem) {
			(Some(sbd), Some(steem)) if steem > 0.0 => Ok(sbd / steem),
			_ => Err(Error::Rpc("incomplete feed price".into())),
		}
	}

	/// Internal market mid-price from the top of the order book.
	async fn order_book_price(&self) -> Result<f64> {
		let orders = self.exec("get_order_book", json!([1])).await?;
		let ask = order_real_price(&orders, "asks")?;
		let bid = order_real_price(&orders, "bids")?;
		Ok((ask + bid) / 2.0)
	}
}

fn is_retriable(e: &Error) -> bool {
	matches!(e, Error::Http(_) | Error::Rpc(_))
}

fn backoff(tries: u32) -> Duration {
	Duration::from_secs_f64(tries as f64 / 10.0)
}

fn field_u32(value: &Value, key: &str) -> Result<u32> {
	value
		.get(key)
		.and_then(Value::as_u64)
		.map(|n| n as u32)
		.ok_or_else(|| Error::Rpc(format!("gdgp missing {}", key)))
}

/// Split `"12.345 STEEM"` into amount and symbol.
fn split_asset(raw: &str) -> Result<(f64, &str)> {
	let mut parts = raw.split_whitespace();
	let amount = parts
		.next()
		.and_then(|a| a.parse::<f64>().ok())
		.ok_or_else(|| Error::Rpc(format!("bad asset string: {}", raw)))?;
	let symbol = parts.next().ok_or_else(|| Error::Rpc(format!("bad asset string: {}", raw)))?;
	Ok((amount, symbol))
}

fn steem_per_mvest(dgpo: &Value) -> Result<f64> {
	let fund = dgpo
		.get("total_vesting_fund_steem")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::Rpc("dgpo missing total_vesting_fund_steem".into()))?;
	let shares = dgpo
		.get("total_vesting_shares")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::Rpc("dgpo missing total_vesting_shares".into()))?;
	let (steem, _) = split_asset(fund)?;
	let (vests, _) = split_asset(shares)?;
	let mvests = vests / 1e6;
	if mvests <= 0.0 {
		return Err(Error::Rpc("zero total vesting shares".into()));
	}
	Ok(steem / mvests)
}

fn order_real_price(orders: &Value, side: &str) -> Result<f64> {
	let price = orders
		.get(side)
		.and_then(|s| s.get(0))
		.and_then(|o| o.get("real_price"))
		.ok_or_else(|| Error::Rpc(format!("order book missing {}", side)))?;
	match price {
		Value::String(s) => s.parse().map_err(|_| Error::Rpc(format!("bad real_price: {}", s))),
		Value::Number(n) => n.as_f64().ok_or_else(|| Error::Rpc("bad real_price".into())),
		other => Err(Error::Rpc(format!("bad real_price: {}", other))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn asset_strings_split() {
		assert_eq!(split_asset("12.345 STEEM").unwrap(), (12.345, "STEEM"));
		assert_eq!(split_asset("0.500 SBD").unwrap(), (0.5, "SBD"));
		assert!(split_asset("garbage").is_err());
	}

	#[test]
	fn steem_per_mvest_derivation() {
		let dgpo = json!({
			"total_vesting_fund_steem": "1000.000 STEEM",
			"total_vesting_shares": "2000000.000000 VESTS",
		});
		// 1000 STEEM / 2 MVESTS
		assert!((steem_per_mvest(&dgpo).unwrap() - 500.0).abs() < 1e-9);
	}

	#[test]
	fn order_book_prices_accept_strings_and_numbers() {
		let orders = json!({
			"asks": [{"real_price": "0.98"}],
			"bids": [{"real_price": 0.96}],
		});
		assert!((order_real_price(&orders, "asks").unwrap() - 0.98).abs() < 1e-9);
		assert!((order_real_price(&orders, "bids").unwrap() - 0.96).abs() < 1e-9);
	}

	#[tokio::test]
	async fn appbase_suffix_is_stripped() {
		let client = SteemClient::new("https://api.steemit.com#appbase", 100, 1).unwrap();
		assert!(client.transport.is_appbase());
		assert_eq!(client.transport.url(), "https://api.steemit.com");
	}
}
