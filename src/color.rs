//! Terminal color helpers for the diagnose and verify output.
//!
//! Colors are suppressed when stdout is not a TTY or `NO_COLOR` is set.

use std::io::IsTerminal;
use std::sync::OnceLock;

use qr_envelope::FileStatus;

static ENABLED: OnceLock<bool> = OnceLock::new();

pub fn enabled() -> bool {
    *ENABLED.get_or_init(|| {
        std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
    })
}

fn wrap(code: &str, s: &str) -> String {
    if enabled() {
        format!("\x1b[{}m{}\x1b[0m", code, s)
    } else {
        s.to_string()
    }
}

pub fn bold(s: &str) -> String       { wrap("1",    s) }
pub fn dim(s: &str) -> String        { wrap("2",    s) }
pub fn green(s: &str) -> String      { wrap("32",   s) }
pub fn yellow(s: &str) -> String     { wrap("33",   s) }
pub fn red(s: &str) -> String        { wrap("31",   s) }
pub fn bold_cyan(s: &str) -> String  { wrap("1;36", s) }

/// Coverage label for one chunk group.
pub fn coverage(complete: bool, consistent: bool) -> String {
    match (consistent, complete) {
        (false, _) => red("INCONSISTENT"),
        (true, true) => green("COMPLETE"),
        (true, false) => yellow("INCOMPLETE"),
    }
}

/// Report status, colored by severity.
pub fn status(s: FileStatus) -> String {
    match s {
        FileStatus::Complete => green("complete"),
        FileStatus::Partial => yellow("partial"),
        FileStatus::Incomplete => yellow("incomplete"),
        FileStatus::Inconsistent => red("inconsistent"),
        FileStatus::ReconstructionFailed => red("reconstruction_failed"),
        FileStatus::SaveFailed => red("save_failed"),
    }
}

/// Count visible characters, ignoring ANSI escape sequences.
pub fn visible_len(s: &str) -> usize {
    let mut len = 0usize;
    let mut in_esc = false;
    for c in s.chars() {
        match c {
            '\x1b' => in_esc = true,
            'm' if in_esc => in_esc = false,
            _ if in_esc => {}
            _ => len += 1,
        }
    }
    len
}

/// Right-pad `s` to `width` visible characters.
pub fn rpad(s: &str, width: usize) -> String {
    let vlen = visible_len(s);
    if vlen >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - vlen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_len_skips_escapes() {
        assert_eq!(visible_len("\x1b[1;36mCOMPLETE\x1b[0m"), 8);
        assert_eq!(visible_len("plain"), 5);
    }

    #[test]
    fn test_rpad_uses_visible_width() {
        let padded = rpad("\x1b[32mok\x1b[0m", 6);
        assert_eq!(visible_len(&padded), 6);
        assert!(padded.ends_with("    "));
    }

    #[test]
    fn test_coverage_labels() {
        assert!(coverage(true, true).contains("COMPLETE"));
        assert!(coverage(false, true).contains("INCOMPLETE"));
        assert!(coverage(true, false).contains("INCONSISTENT"));
    }
}
