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

//! Plain HTTP JSON-RPC transport with positional batch support.
//! The upstream node (or a jussi proxy in front of it) accepts both the
//! bare and the appbase (`call("condenser_api", ..)`) conventions.

use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Shared connection pool size towards the upstream node.
const POOL_MAX_IDLE: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct RpcRequest<'a> {
	jsonrpc: &'static str,
	id: u64,
	method: &'a str,
	params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
	#[serde(default)]
	id: u64,
	#[serde(default)]
	result: Option<Value>,
	#[serde(default)]
	error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
	#[serde(default)]
	code: i64,
	#[serde(default)]
	message: String,
}

pub struct HttpTransport {
	client: reqwest::Client,
	url: String,
	appbase: bool,
	next_id: AtomicU64,
}

impl HttpTransport {
	pub fn new(url: String, appbase: bool) -> Result<Self> {
		let client = reqwest::Client::builder()
			.pool_max_idle_per_host(POOL_MAX_IDLE)
			.timeout(REQUEST_TIMEOUT)
			.build()?;
		Ok(Self { client, url, appbase, next_id: AtomicU64::new(1) })
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn is_appbase(&self) -> bool {
		self.appbase
	}

	fn request<'a>(&self, method: &'a str, params: Value) -> RpcRequest<'a> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		if self.appbase {
			RpcRequest {
				jsonrpc: "2.0",
				id,
				method: "call",
				params: Value::Array(vec!["condenser_api".into(), method.into(), params]),
			}
		} else {
			RpcRequest { jsonrpc: "2.0", id, method, params }
		}
	}

	/// Perform a single call. A null `result` is passed through; callers
	/// decide whether empty is legitimate for the method.
	pub async fn exec(&self, method: &str, params: Value) -> Result<Value> {
		let body = self.request(method, params);
		let resp: RpcResponse = self.client.post(&self.url).json(&body).send().await?.json().await?;
		if let Some(err) = resp.error {
			return Err(Error::Rpc(format!("{} failed ({}): {}", method, err.code, err.message)));
		}
		Ok(resp.result.unwrap_or(Value::Null))
	}

	/// Perform a JSON-RPC batch call: one request object per parameter
	/// set, all for the same method. Results are returned in submission
	/// order regardless of how the node ordered its response.
	pub async fn exec_batch(&self, method: &str, params: &[Value]) -> Result<Vec<Value>> {
		let requests: Vec<RpcRequest> = params.iter().map(|p| self.request(method, p.clone())).collect();
		let first_id = requests.first().map(|r| r.id).unwrap_or(0);
		let responses: Vec<RpcResponse> = self.client.post(&self.url).json(&requests).send().await?.json().await?;
		if responses.len() != requests.len() {
			return Err(Error::Rpc(format!(
				"batch {}: sent {} requests, got {} responses",
				method,
				requests.len(),
				responses.len()
			)));
		}

		let mut ordered: Vec<Option<Value>> = vec![None; requests.len()];
		for resp in responses {
			if let Some(err) = resp.error {
				return Err(Error::Rpc(format!("batch {} failed ({}): {}", method, err.code, err.message)));
			}
			let index = resp.id.wrapping_sub(first_id) as usize;
			if index >= ordered.len() {
				return Err(Error::Rpc(format!("batch {}: unknown response id {}", method, resp.id)));
			}
			ordered[index] = Some(resp.result.unwrap_or(Value::Null));
		}
		Ok(ordered.into_iter().map(|v| v.unwrap_or(Value::Null)).collect())
	}
}

/// Truthiness in the upstream sense: null, `[]`, `{}` and `""` all count
/// as an empty response.
pub fn is_empty_response(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::Array(a) => a.is_empty(),
		Value::Object(o) => o.is_empty(),
		Value::String(s) => s.is_empty(),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn empty_response_detection() {
		assert!(is_empty_response(&Value::Null));
		assert!(is_empty_response(&json!([])));
		assert!(is_empty_response(&json!({})));
		assert!(is_empty_response(&json!("")));
		assert!(!is_empty_response(&json!(0)));
		assert!(!is_empty_response(&json!({"head_block_number": 1})));
	}
}
