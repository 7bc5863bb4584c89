//! Hex + ASCII rendering of relayed byte chunks
//!
//! Every chunk that crosses a bridge is logged at DEBUG level through
//! [`dump`]. The layout mirrors a classic `hexdump -C` row, narrowed to the
//! 20-byte rows that fit a phone-width log viewer:
//!
//! ```text
//!                                  41 54 5a 0d | ATZ.
//! ```

use std::fmt::Write;

/// Number of input bytes rendered per row
pub const ROW_WIDTH: usize = 20;

/// Width of the hex field of a full row (20 tokens of 2 chars + 19 spaces)
const HEX_FIELD_WIDTH: usize = ROW_WIDTH * 3 - 1;

/// Render `bytes` as `ceil(len / 20)` rows of `hex | ascii`, one per line.
///
/// Bytes outside the printable range `0x20..=0x7E` are shown as `.` in the
/// ASCII field. Short rows are right-aligned so the separators line up.
pub fn dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(ROW_WIDTH) * (HEX_FIELD_WIDTH + 24));

    for row in bytes.chunks(ROW_WIDTH) {
        let mut hex = String::with_capacity(HEX_FIELD_WIDTH);
        let mut ascii = String::with_capacity(ROW_WIDTH);

        for (col, &b) in row.iter().enumerate() {
            if col > 0 {
                hex.push(' ');
            }
            let _ = write!(hex, "{:02x}", b);
            ascii.push(printable(b));
        }

        let _ = writeln!(
            out,
            "{:>hex_width$} | {:>ascii_width$}",
            hex,
            ascii,
            hex_width = HEX_FIELD_WIDTH,
            ascii_width = ROW_WIDTH
        );
    }

    out
}

/// Uppercase, space separated hex on a single line (`02 01 06`).
pub fn dump_compact(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn printable(b: u8) -> char {
    if (0x20..=0x7E).contains(&b) {
        b as char
    } else {
        '.'
    }
}
