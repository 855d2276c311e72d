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

//! A method of dynamic multi-row queries with SQLx.
//! Based on the gist by @mehcode (Github):
//! https://gist.github.com/mehcode/c476922be0290a4f8502d18701cc8c74

use sqlx::{
	encode::Encode,
	postgres::{PgArguments, PgConnection, Postgres},
	Arguments, Type,
};

use crate::error::Result;

// Maximum bind arguments per statement. Postgres caps a single
// statement at 65535 parameters; splitting well below that keeps each
// statement's planning time flat.
const CHUNK_MAX: usize = 5_000;

pub struct Chunk {
	query: String,
	pub arguments: PgArguments,
	pub args_len: usize,
}

impl Chunk {
	fn new(sql: &str) -> Self {
		let mut query = String::with_capacity(1024 * 8);
		query.push_str(sql);

		Self { query, arguments: PgArguments::default(), args_len: 0 }
	}

	pub fn append(&mut self, sql: &str) {
		self.query.push_str(sql);
	}

	pub fn bind<'a, T: 'a>(&mut self, value: T) -> Result<()>
	where
		T: Encode<'a, Postgres> + Type<Postgres> + Send,
	{
		self.arguments.add(value);
		self.query.push('$');
		let mut buf = itoa::Buffer::new();
		self.query.push_str(buf.format(self.args_len + 1));
		self.args_len += 1;

		Ok(())
	}

	async fn execute(self, conn: &mut PgConnection) -> Result<u64> {
		let Self { query, arguments, .. } = self;
		let done = sqlx::query_with(query.as_str(), arguments).execute(conn).await?;
		Ok(done.rows_affected())
	}
}

pub struct Batch {
	#[allow(unused)]
	name: &'static str,
	leading: String,
	trailing: String,
	chunks: Vec<Chunk>,
	index: usize,
	len: usize,
}

impl Batch {
	pub fn new(name: &'static str, leading: &str, trailing: &str) -> Self {
		Self {
			name,
			leading: leading.to_owned(),
			trailing: trailing.to_owned(),
			chunks: vec![Chunk::new(leading)],
			index: 0,
			len: 0,
		}
	}

	// ensure there is enough room for N more arguments
	pub fn reserve(&mut self, arguments: usize) -> Result<()> {
		self.len += 1;

		if self.chunks[self.index].args_len + arguments > CHUNK_MAX {
			self.chunks.push(Chunk::new(&self.leading));
			self.index += 1;
		}

		Ok(())
	}

	pub fn append(&mut self, sql: &str) {
		self.chunks[self.index].append(sql);
	}

	pub fn bind<'a, T: 'a>(&mut self, value: T) -> Result<()>
	where
		T: Encode<'a, Postgres> + Type<Postgres> + Send,
	{
		self.chunks[self.index].bind(value)
	}

	pub async fn execute(self, conn: &mut PgConnection) -> Result<u64> {
		let mut rows_affected = 0;
		if self.len > 0 {
			for mut chunk in self.chunks {
				chunk.append(&self.trailing);
				let done = chunk.execute(&mut *conn).await?;
				rows_affected += done;
			}
		}

		Ok(rows_affected)
	}

	pub fn current_num_arguments(&self) -> usize {
		self.chunks[self.index].args_len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}
