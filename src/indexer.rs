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

//! Chain-state projection: per-entity accumulators, the custom-op
//! dispatcher and the single-block processor.

pub mod accounts;
pub mod blocks;
pub mod cached_post;
pub mod community;
pub mod custom_json;
pub mod feed_cache;
pub mod follow;
pub mod posts;

/// Clip a string to `max_chars` characters (not bytes; column widths
/// are declared in characters).
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
	s.chars().take(max_chars).collect()
}
