//! Run-ID generation: a deterministic, filesystem
//! and URL safe identifier derived from start time, optional numeric run id,
//! and sanitized labels.

use std::time::SystemTime;

const MAX_ID_BYTES: usize = 96;

pub fn generate_id(start_time: SystemTime, run_id: i64, labels: &str) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = start_time.into();
    let mut id = datetime.format("%Y-%m-%d-%H%M%S").to_string();
    if run_id != 0 {
        id.push('_');
        id.push_str(&run_id.to_string());
    }
    let sanitized = sanitize_labels(labels);
    if !sanitized.is_empty() {
        id.push('_');
        id.push_str(&sanitized);
    }
    truncate_to_bytes(&id, MAX_ID_BYTES)
}

/// Preserves `[a-zA-Z0-9]`, collapses any run of other characters to a
/// single `_`, and trims a trailing `_`.
fn sanitize_labels(labels: &str) -> String {
    let mut out = String::with_capacity(labels.len());
    let mut last_was_sep = false;
    for c in labels.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn truncate_to_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn start_time() -> SystemTime {
        // 2001-01-02T03:04:05Z
        SystemTime::UNIX_EPOCH + Duration::from_secs(978404645)
    }

    #[test]
    fn matches_the_documented_example() {
        let id = generate_id(start_time(), 0, "A!@#$%^&*()-+=/'B");
        assert_eq!(id, "2001-01-02-030405_A_B");
    }

    #[test]
    fn run_id_zero_is_omitted_but_nonzero_is_included() {
        let without = generate_id(start_time(), 0, "");
        assert_eq!(without, "2001-01-02-030405");
        let with = generate_id(start_time(), 42, "");
        assert_eq!(with, "2001-01-02-030405_42");
    }

    #[test]
    fn long_labels_truncate_to_96_bytes() {
        let labels: String = "a".repeat(90);
        let id = generate_id(start_time(), 0, &labels);
        assert!(id.len() <= MAX_ID_BYTES);
        assert!(id.starts_with("2001-01-02-030405_"));
    }

    #[test]
    fn all_punctuation_labels_sanitize_to_empty() {
        let id = generate_id(start_time(), 0, "!!!###");
        assert_eq!(id, "2001-01-02-030405");
    }
}
