use std::path::{Path, PathBuf};

use url::Url;
use wayback_core::{Timestamp, TimestampFormat};

const MAX_SEGMENT_LEN: usize = 120;

/// `{root}/{host}/{path segments...}/{timestamp}.snapshot`.
///
/// The query string, if any, is folded into the last segment so that
/// `page?id=1` and `page?id=2` land in different directories.
pub fn snapshot_path(root: &Path, url: &Url, timestamp: Timestamp, format: TimestampFormat) -> PathBuf {
    let mut path = root.to_path_buf();
    path.push(sanitize_segment(url.host_str().unwrap_or("unknown-host")));

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        match segments.last_mut() {
            Some(last) => {
                last.push('?');
                last.push_str(query);
            }
            None => segments.push(format!("?{query}")),
        }
    }
    for segment in &segments {
        path.push(sanitize_segment(segment));
    }

    path.push(format!("{}.snapshot", timestamp.format(format)));
    path
}

fn sanitize_segment(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned = cleaned.replace('.', "_");
    }
    let trimmed = cleaned.trim_end_matches([' ', '.']);
    let mut final_name = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };
    if final_name.len() > MAX_SEGMENT_LEN {
        let mut cut = MAX_SEGMENT_LEN;
        while !final_name.is_char_boundary(cut) {
            cut -= 1;
        }
        final_name.truncate(cut);
    }
    if is_reserved_windows_name(&final_name) {
        final_name.push('_');
    }
    final_name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem))
}
