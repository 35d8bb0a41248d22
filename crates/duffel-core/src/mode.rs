//! Permission-bit helpers.
//!
//! Modes are carried as the low nine permission bits, so `0o644` means
//! the same thing everywhere and file-type bits never leak through.

/// Mask a raw st_mode down to its permission bits.
pub fn normalize_mode(raw: u32) -> u32 {
    raw & 0o777
}

/// Render permission bits as a three-digit octal string, e.g. `"644"`.
pub fn format_mode(mode: u32) -> String {
    format!("{:03o}", normalize_mode(mode))
}

/// Parse an octal permission string such as `"644"` or `"0755"`.
pub fn parse_mode(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    u32::from_str_radix(s, 8).ok().map(normalize_mode)
}

/// Permission bits of an entry.
#[cfg(unix)]
pub fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    normalize_mode(metadata.permissions().mode())
}

/// Permission bits of an entry. Non-Unix platforms only track the
/// read-only flag.
#[cfg(not(unix))]
pub fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o555
    } else {
        0o777
    }
}
