//! Terminal output helpers shared by the subcommands.
//!
//! Thin wrappers over `colored` so every command prints status lines,
//! headers, and key-value rows the same way.

use colored::Colorize;

/// Status line with a blue marker.
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Status line with a green check.
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Status line with a yellow warning sign.
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Indented, dimmed detail line.
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Bold title with a dimmed rule underneath, preceded by a blank line.
pub fn header(title: &str) {
    let rule = "─".repeat(title.len());
    println!();
    println!("{}", title.bold());
    println!("{}", rule.dimmed());
}

/// Cyan sub-heading, preceded by a blank line.
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Indented `key: value` row with the key dimmed.
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}
