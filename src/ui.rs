use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fmt::Write;
use std::time::Duration;

// RGB tuples for `colored`'s `.truecolor()`
pub mod rgb {
    pub const DEEP_TEAL: (u8, u8, u8) = (0, 150, 136);
    pub const SKY_BLUE: (u8, u8, u8) = (100, 181, 246);
    pub const AMBER: (u8, u8, u8) = (255, 193, 7);
    pub const SUCCESS_GREEN: (u8, u8, u8) = (80, 250, 123);
    pub const ERROR_RED: (u8, u8, u8) = (255, 99, 99);
    pub const DIM_WHITE: (u8, u8, u8) = (180, 180, 190);
}

/// Track quiet mode state
static QUIET_MODE: std::sync::LazyLock<Mutex<bool>> =
    std::sync::LazyLock::new(|| Mutex::new(false));

/// Enable or disable quiet mode
pub fn set_quiet_mode(enabled: bool) {
    let mut quiet_mode = QUIET_MODE.lock();
    *quiet_mode = enabled;
}

/// Check if quiet mode is enabled
pub fn is_quiet_mode() -> bool {
    *QUIET_MODE.lock()
}

pub fn create_spinner(message: &str) -> ProgressBar {
    // Don't create a spinner in quiet mode
    if is_quiet_mode() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan.bold} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Bar over a known number of tenders
pub fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    if is_quiet_mode() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})")
    {
        pb.set_style(style.progress_chars("━╸─"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn print_info(message: &str) {
    if !is_quiet_mode() {
        println!("{}", message.cyan().bold());
    }
}

pub fn print_warning(message: &str) {
    if !is_quiet_mode() {
        println!("{}", message.yellow().bold());
    }
}

pub fn print_error(message: &str) {
    // Always print errors, even in quiet mode
    eprintln!("{}", message.red().bold());
}

pub fn print_success(message: &str) {
    if !is_quiet_mode() {
        println!("{}", message.green().bold());
    }
}

pub fn print_version(version: &str) {
    if !is_quiet_mode() {
        println!(
            "{} {} {}",
            "📑 procurement-ai".cyan().bold(),
            "version".dimmed(),
            version.green()
        );
    }
}

/// Print content with decorative borders
pub fn print_bordered_content(content: &str) {
    if !is_quiet_mode() {
        let (r, g, b) = rgb::DEEP_TEAL;
        let border = "━".repeat(60);
        println!("{}", border.truecolor(r, g, b));
        println!("{content}");
        println!("{}", border.truecolor(r, g, b));
    }
}

/// Print a simple message (respects quiet mode)
pub fn print_message(message: &str) {
    if !is_quiet_mode() {
        println!("{message}");
    }
}

/// Print an empty line (respects quiet mode)
pub fn print_newline() {
    if !is_quiet_mode() {
        println!();
    }
}

/// Section heading with a teal to blue gradient
pub fn print_heading(title: &str) {
    if !is_quiet_mode() {
        println!("\n{}", create_gradient_text(title).bold());
    }
}

/// Create gradient text from deep teal to sky blue
pub fn create_gradient_text(text: &str) -> String {
    let gradient = [
        rgb::DEEP_TEAL,
        (30, 160, 170),
        (60, 170, 205),
        rgb::SKY_BLUE,
    ];

    apply_gradient(text, &gradient)
}

fn apply_gradient(text: &str, gradient: &[(u8, u8, u8)]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let chars_len = chars.len();
    let gradient_len = gradient.len();

    let mut result = String::new();

    if chars_len == 0 || gradient_len == 0 {
        return result;
    }

    for (i, c) in chars.iter().enumerate() {
        let index = if chars_len == 1 {
            0
        } else {
            i * (gradient_len - 1) / (chars_len - 1)
        };
        let (r, g, b) = gradient.get(index).copied().unwrap_or(rgb::DIM_WHITE);
        let _ = write!(result, "{}", c.to_string().truecolor(r, g, b));
    }

    result
}

/// Colour a 0-10 score: green at or above `good`, amber above half of it, red below
pub fn color_score(score: f64, good: f64) -> String {
    let text = format!("{score:.1}");
    let (r, g, b) = if score >= good {
        rgb::SUCCESS_GREEN
    } else if score >= good / 2.0 {
        rgb::AMBER
    } else {
        rgb::ERROR_RED
    };
    text.truecolor(r, g, b).bold().to_string()
}

/// Ten-cell bar for a 0-10 score
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
pub fn score_bar(score: f64) -> String {
    let filled = score.clamp(0.0, 10.0).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bar_is_clamped() {
        assert_eq!(score_bar(7.4).chars().filter(|c| *c == '█').count(), 7);
        assert_eq!(score_bar(42.0).chars().count(), 10);
        assert_eq!(score_bar(-3.0).chars().filter(|c| *c == '░').count(), 10);
    }

    #[test]
    fn gradient_keeps_every_character() {
        colored::control::set_override(false);
        assert_eq!(create_gradient_text("Tender"), "Tender");
        assert_eq!(create_gradient_text(""), "");
    }
}
