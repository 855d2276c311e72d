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

//! Per-method upstream call accounting. Purely observational: flags
//! calls running over par and dumps a cumulative table periodically.

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Assumed HTTP overhead (ms); subtracted prior to the par check.
const PAR_HTTP_OVERHEAD: f64 = 75.0;

/// Reporting threshold (multiple of par).
const PAR_THRESHOLD: f64 = 1.1;

/// Dump accumulated stats every 30 minutes of cumulative call time.
const DUMP_EVERY_MS: f64 = 30.0 * 60.0 * 1000.0;

/// Per-item time budget (ms) for critical calls.
fn par_ms(method: &str) -> f64 {
	match method {
		"get_dynamic_global_properties" => 20.0,
		"get_block" => 50.0,
		"get_blocks_batch" => 5.0,
		"get_accounts" => 3.0,
		"get_content" => 4.0,
		"get_order_book" => 20.0,
		"get_feed_history" => 20.0,
		_ => 50.0,
	}
}

#[derive(Default)]
struct Inner {
	// method -> (total ms, total items)
	stats: HashMap<&'static str, (f64, u64)>,
	total_ms: f64,
	fastest: Option<f64>,
}

#[derive(Default)]
pub struct ClientStats {
	inner: Mutex<Inner>,
}

impl ClientStats {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn log(&self, method: &'static str, ms: f64, batch_size: usize) {
		Self::check_timing(method, ms, batch_size);
		let mut inner = self.inner.lock();
		let entry = inner.stats.entry(method).or_insert((0.0, 0));
		entry.0 += ms;
		entry.1 += batch_size as u64;
		inner.total_ms += ms;
		if inner.fastest.map_or(true, |f| ms < f) {
			inner.fastest = Some(ms);
		}
		if inner.total_ms > DUMP_EVERY_MS {
			Self::print(&inner);
			*inner = Inner::default();
		}
	}

	fn check_timing(method: &str, ms: f64, batch_size: usize) {
		let method = if method == "get_block" && batch_size > 1 { "get_blocks_batch" } else { method };
		let per = (ms - PAR_HTTP_OVERHEAD) / batch_size as f64;
		let over = per / par_ms(method);
		if over >= PAR_THRESHOLD {
			log::warn!("[STEEM][{}ms] {}[{}] -- {:.1}x par ({:.0}/{:.0})", ms as u64, method, batch_size, over, per, par_ms(method));
		}
	}

	fn print(inner: &Inner) {
		if inner.stats.is_empty() {
			return;
		}
		log::info!("[STEEM] total call time: {}s", (inner.total_ms / 1000.0) as u64);
		let mut rows: Vec<_> = inner.stats.iter().collect();
		rows.sort_by(|a, b| b.1 .0.partial_cmp(&a.1 .0).unwrap_or(std::cmp::Ordering::Equal));
		for (method, (ms, items)) in rows.into_iter().take(40) {
			log::info!(
				"{:5.1}% {:9}ms {:7.2}avg {:8}x -- {}",
				100.0 * ms / inner.total_ms,
				*ms as u64,
				ms / *items as f64,
				items,
				method
			);
		}
		if let Some(fastest) = inner.fastest {
			log::info!("[STEEM] fastest call was {:.3}ms", fastest);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accumulates_per_method() {
		let stats = ClientStats::new();
		stats.log("get_block", 10.0, 1);
		stats.log("get_block", 20.0, 1);
		stats.log("get_accounts", 5.0, 100);
		let inner = stats.inner.lock();
		assert_eq!(inner.stats["get_block"], (30.0, 2));
		assert_eq!(inner.stats["get_accounts"], (5.0, 100));
		assert_eq!(inner.total_ms, 35.0);
		assert_eq!(inner.fastest, Some(5.0));
	}
}
