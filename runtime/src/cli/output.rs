//! Shared CLI output: colors, check lines and the global output flags.

use std::io::IsTerminal;

/// Color is on for a terminal unless NO_COLOR or `--no-color` says otherwise.
pub fn color_enabled() -> bool {
    if std::env::var("NO_COLOR").is_ok() || std::env::var("PRICEFETCH_NO_COLOR").is_ok() {
        return false;
    }
    std::io::stderr().is_terminal()
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Colored string builder.
pub struct Styled {
    use_color: bool,
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

impl Styled {
    pub fn new() -> Self {
        Self {
            use_color: color_enabled(),
        }
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    pub fn ok_sym(&self) -> &str {
        if self.use_color {
            "\x1b[32m\u{2713}\x1b[0m"
        } else {
            "OK"
        }
    }

    pub fn fail_sym(&self) -> &str {
        if self.use_color {
            "\x1b[31m\u{2717}\x1b[0m"
        } else {
            "!!"
        }
    }

    pub fn warn_sym(&self) -> &str {
        if self.use_color {
            "\x1b[33m\u{26a0}\x1b[0m"
        } else {
            "??"
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color {
            format!("{code}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        self.paint(GREEN, s)
    }

    pub fn red(&self, s: &str) -> String {
        self.paint(RED, s)
    }

    pub fn yellow(&self, s: &str) -> String {
        self.paint(YELLOW, s)
    }

    pub fn dim(&self, s: &str) -> String {
        self.paint(DIM, s)
    }

    pub fn bold(&self, s: &str) -> String {
        self.paint(BOLD, s)
    }
}

pub fn print_header(s: &Styled) {
    eprintln!(
        "  {} {}",
        s.bold("pricefetch"),
        s.dim(&format!("v{}", env!("CARGO_PKG_VERSION")))
    );
    eprintln!();
}

pub fn print_section(s: &Styled, title: &str) {
    eprintln!("  {}", s.bold(title));
}

/// One check result: symbol, padded label, value.
pub fn print_check(symbol: &str, label: &str, value: &str) {
    eprintln!("{}", check_line(symbol, label, value));
}

fn check_line(symbol: &str, label: &str, value: &str) -> String {
    format!("    {symbol} {label:<16} {value}")
}

/// Indented fix hint under a check.
pub fn print_detail(msg: &str) {
    eprintln!("                        {msg}");
}

pub fn print_status(s: &Styled, status: &str, msg: &str) {
    eprintln!();
    eprintln!("  {}: {status} ({msg})", s.bold("Status"));
}

/// "850ms", "4.2s", "3m 05s".
pub fn format_elapsed(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

pub fn is_quiet() -> bool {
    std::env::var("PRICEFETCH_QUIET").is_ok()
}

pub fn is_json() -> bool {
    std::env::var("PRICEFETCH_JSON").is_ok()
}

pub fn print_json(value: &serde_json::Value) {
    if let Ok(s) = serde_json::to_string_pretty(value) {
        println!("{s}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_symbols_and_paint() {
        let s = Styled::plain();
        assert_eq!(s.ok_sym(), "OK");
        assert_eq!(s.fail_sym(), "!!");
        assert_eq!(s.bold("x"), "x");
    }

    #[test]
    fn test_check_line_pads_label() {
        assert_eq!(check_line("OK", "Chromium:", "found"), "    OK Chromium:        found");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(850), "850ms");
        assert_eq!(format_elapsed(4_200), "4.2s");
        assert_eq!(format_elapsed(185_000), "3m 05s");
    }
}
