/// telegram rejects messages above this many UTF-16 code units
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

pub struct MessageFormatter;

impl MessageFormatter {
    pub fn escape_html(text: &str) -> String {
        html_escape::encode_text(text).to_string()
    }

    /// counts UTF-16 code units as Telegram does for message length limits
    pub fn count_utf16_code_units(text: &str) -> usize {
        text.encode_utf16().count()
    }

    /// splits on line boundaries, falling back to word boundaries for oversized lines
    pub fn split_message_into_chunks(text: &str, max_length: usize) -> Vec<String> {
        if Self::count_utf16_code_units(text) <= max_length {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            let line_len = Self::count_utf16_code_units(line) + 1;

            if Self::count_utf16_code_units(&current) + line_len > max_length && !current.is_empty() {
                chunks.push(current.trim_end().to_string());
                current.clear();
            }

            if line_len <= max_length {
                current.push_str(line);
                current.push('\n');
                continue;
            }

            for word in line.split_whitespace() {
                let word_len = Self::count_utf16_code_units(word) + 1;
                if Self::count_utf16_code_units(&current) + word_len > max_length && !current.is_empty() {
                    chunks.push(current.trim_end().to_string());
                    current.clear();
                }
                current.push_str(word);
                current.push(' ');
            }
            current.push('\n');
        }

        if !current.trim().is_empty() {
            chunks.push(current.trim_end().to_string());
        }

        chunks
    }

    /// "1.5 GB" style sizes with binary units, "N/A" when unknown
    pub fn format_file_size(bytes: Option<i64>) -> String {
        let Some(bytes) = bytes.filter(|b| *b > 0) else {
            return "N/A".to_string();
        };

        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }

        if unit == 0 {
            format!("{} B", bytes)
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }

    /// thousands separators: 1234567 -> "1,234,567"
    pub fn format_number(value: i64) -> String {
        let digits = value.unsigned_abs().to_string();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push(',');
            }
            out.push(ch);
        }
        if value < 0 {
            format!("-{}", out)
        } else {
            out
        }
    }

    pub fn percentage(part: i64, total: i64) -> f64 {
        if total <= 0 {
            0.0
        } else {
            part as f64 * 100.0 / total as f64
        }
    }

    /// ten-cell bar of filled and empty blocks
    pub fn progress_bar(percent: f64) -> String {
        let filled = ((percent.clamp(0.0, 100.0) / 10.0).round()) as usize;
        format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
    }

    /// cuts to `max_chars` characters, appending "..." when shortened
    pub fn truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
