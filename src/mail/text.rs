//! Text helpers for header values, bodies and file names.

use std::sync::LazyLock;

use regex::Regex;

/// Longest file name handed to the case service.
pub const MAX_FILE_NAME: usize = 80;

/// Characters that cannot appear in a stored file name.
const BAD_FILENAME_CHARS: &[char] = &['"', '*', ':', '/', '\\', '?', '<', '>', '|'];

static FIRST_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]").unwrap());

/// Strip characters that are not allowed in XML 1.0 documents.
///
/// Below 0x20 only tab, newline and carriage return survive; U+FFFE and
/// U+FFFF are removed as well.
pub fn clean_xml(s: &str) -> String {
    s.chars().filter(|&c| is_xml_char(c)).collect()
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

pub fn remove_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Replace characters that are unsafe in file names with `_`.
pub fn replace_bad_filename_chars(s: &str) -> String {
    s.chars()
        .map(|c| if BAD_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Cap a file name at [`MAX_FILE_NAME`] characters, keeping the extension
/// when it fits inside the cap.
pub fn truncate_filename(name: &str) -> String {
    let len = name.chars().count();
    if len <= MAX_FILE_NAME {
        return name.to_string();
    }

    match name.rfind('.') {
        Some(dot) => {
            let ext_len = name[dot..].chars().count();
            if ext_len >= MAX_FILE_NAME {
                name.chars().take(MAX_FILE_NAME).collect()
            } else {
                let stem: String = name.chars().take(MAX_FILE_NAME - ext_len).collect();
                format!("{stem}{}", &name[dot..])
            }
        }
        None => name.chars().take(MAX_FILE_NAME).collect(),
    }
}

/// Build a file name out of a message subject.
///
/// Leading punctuation is dropped, whitespace removed and unsafe
/// characters replaced. Subjects with nothing alphanumeric become
/// `MSG_<epoch millis>`.
pub fn subject_to_filename(subject: &str) -> String {
    let subject: String = if subject.chars().count() > 75 {
        subject.chars().take(74).collect()
    } else {
        subject.to_string()
    };

    let Some(start) = FIRST_ALPHANUMERIC.find(&subject).map(|m| m.start()) else {
        return format!("MSG_{}", chrono::Utc::now().timestamp_millis());
    };

    replace_bad_filename_chars(&remove_whitespace(&subject[start..]))
}
