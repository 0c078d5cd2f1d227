//! Output helpers for the CLI.

use std::io::{self, Write};

/// Writes a task's captured output, leaving `out` untouched when empty.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_output(out: &mut impl Write, captured: &[u8]) -> io::Result<()> {
    if captured.is_empty() {
        return Ok(());
    }
    out.write_all(captured)
}
