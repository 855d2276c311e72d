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

//! logging

use std::{io, path::Path};

use fern::colors::{Color, ColoredLevelConfig};

pub fn init(std: log::LevelFilter, file: Option<&Path>) -> io::Result<()> {
	let colors = ColoredLevelConfig::new()
		.info(Color::Green)
		.warn(Color::Yellow)
		.error(Color::Red)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	let stdout_dispatcher = fern::Dispatch::new()
		.level(std)
		.level_for("sqlx", log::LevelFilter::Error)
		.level_for("hyper", log::LevelFilter::Warn)
		.level_for("reqwest", log::LevelFilter::Warn)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {} {}",
				chrono::Local::now().format("[%H:%M]"),
				colors.color(record.level()),
				message,
			))
		})
		.chain(std::io::stdout());

	let mut dispatcher = fern::Dispatch::new().chain(stdout_dispatcher);

	if let Some(path) = file {
		let file_dispatcher = fern::Dispatch::new()
			.level(log::LevelFilter::Debug)
			.level_for("sqlx", log::LevelFilter::Warn)
			.level_for("hyper", log::LevelFilter::Warn)
			.level_for("reqwest", log::LevelFilter::Warn)
			.format(move |out, message, record| {
				out.finish(format_args!(
					"{} [{}][{}] {}",
					chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
					record.target(),
					record.level(),
					message,
				))
			})
			.chain(fern::log_file(path)?);
		dispatcher = dispatcher.chain(file_dispatcher);
	}

	dispatcher.apply().expect("Could not init logging");
	Ok(())
}
