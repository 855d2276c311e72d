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

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
	let conf = hivemind::Config::load()?;
	hivemind::logger::init(conf.log_level, conf.log_file.as_deref())?;
	log::info!("[HIVE] welcome to hivemind");

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("Error setting Ctrl-C handler");

	hivemind::sync::run(conf, running).await?;
	Ok(())
}
