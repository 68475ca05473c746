/// Source text of the parsed macro and where it sits in the engine's span space.
#[derive(Debug, Clone)]
pub(crate) struct ScriptSource {
	span_start: usize,
	text: String,
}

impl ScriptSource {
	pub(crate) fn new(span_start: usize, text: &str) -> Self {
		Self {
			span_start,
			text: text.to_string(),
		}
	}

	/// Returns true when the global span offset falls inside this source.
	pub(crate) fn contains(&self, offset: usize) -> bool {
		offset >= self.span_start && offset < self.span_start + self.text.len()
	}

	/// Converts a global span offset into a 1-based `(line, column)` pair.
	///
	/// Columns count characters, not bytes. Offsets past the end clamp to the
	/// last position.
	pub(crate) fn position(&self, offset: usize) -> (u32, u32) {
		let mut rel = offset.saturating_sub(self.span_start).min(self.text.len());
		while !self.text.is_char_boundary(rel) {
			rel -= 1;
		}

		let before = &self.text[..rel];
		let line_start = before.rfind('\n').map_or(0, |i| i + 1);
		let line = before.matches('\n').count() + 1;
		let column = before[line_start..].chars().count() + 1;
		(saturating_u32(line), saturating_u32(column))
	}
}

fn saturating_u32(n: usize) -> u32 {
	u32::try_from(n).unwrap_or(u32::MAX)
}
