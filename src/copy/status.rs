//! Copy status counters and the human-readable progress text

use crate::protocol::ListData;

/// Running counters for one copy or cut operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyStatus {
	/// Files written and verified
	pub count_file: usize,
	pub written_size: u64,
	pub total_size: u64,
	/// Integrity, read and write failures plus walk errors
	pub failures: usize,
	pub cut: bool,
}

impl CopyStatus {
	pub fn new(total_size: u64, cut: bool) -> Self {
		CopyStatus { total_size, cut, ..CopyStatus::default() }
	}

	pub fn file_written(&mut self, size: u64) {
		self.count_file += 1;
		self.written_size += size;
	}

	pub fn failed(&mut self) {
		self.failures += 1;
	}

	pub fn percent(&self) -> String {
		if self.written_size == 0 || self.total_size == 0 {
			return "0.00%".to_string();
		}
		let percent = self.written_size as f64 / self.total_size as f64 * 100.0;
		if percent > 99.99 {
			"100.00%".to_string()
		} else {
			format!("{:.2}%", percent)
		}
	}

	/// Final status line of an operation
	pub fn message(&self) -> String {
		let verb = if self.cut { "Cutting" } else { "Copying" };
		format!(
			"{} {} complete. {} file{} written at size {} ({} bytes) with {} integrity failure{}.",
			verb,
			self.percent(),
			commas(self.count_file as u64),
			plural(self.count_file),
			pretty_bytes(self.written_size),
			commas(self.written_size),
			self.failures,
			plural(self.failures)
		)
	}
}

/// Status line sent before the transfer starts
pub fn preparing_message(data: &ListData) -> String {
	format!(
		"Preparing to transfer {} director{} and {} file{} at size {}.",
		commas(data.directories as u64),
		if data.directories == 1 { "y" } else { "ies" },
		commas(data.files as u64),
		plural(data.files),
		pretty_bytes(data.size)
	)
}

fn plural(count: usize) -> &'static str {
	if count == 1 {
		""
	} else {
		"s"
	}
}

/// Thousands separators: 1234567 -> "1,234,567"
pub fn commas(value: u64) -> String {
	let digits = value.to_string();
	let mut out = String::with_capacity(digits.len() + digits.len() / 3);
	for (index, ch) in digits.chars().enumerate() {
		if index > 0 && (digits.len() - index) % 3 == 0 {
			out.push(',');
		}
		out.push(ch);
	}
	out
}

/// Size with a binary unit: 1536 -> "1.50KB"
pub fn pretty_bytes(bytes: u64) -> String {
	const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];
	if bytes < 1024 {
		return format!("{}B", bytes);
	}
	let mut value = bytes as f64;
	let mut unit = 0;
	value /= 1024.0;
	while value >= 1024.0 && unit < UNITS.len() - 1 {
		value /= 1024.0;
		unit += 1;
	}
	format!("{:.2}{}", value, UNITS[unit])
}


// vim: ts=4
