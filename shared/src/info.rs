//! Backslash-delimited key/value strings ("\key\value\key\value") used for
//! userinfo and the server/system info configstrings.

/// Longest info string either side will accept.
pub const MAX_INFO_STRING: usize = 1024;

/// Returns the value for `key`, or an empty string when absent.
/// Lookup is case-insensitive on the key.
pub fn value_for_key(info: &str, key: &str) -> String {
    let mut parts = info.split('\\');
    // leading backslash produces an empty first part
    if info.starts_with('\\') {
        parts.next();
    }
    loop {
        let k = match parts.next() {
            Some(k) => k,
            None => return String::new(),
        };
        let v = parts.next().unwrap_or("");
        if k.eq_ignore_ascii_case(key) {
            return v.to_string();
        }
    }
}

/// Removes `key` (and its value) from `info`.
pub fn remove_key(info: &str, key: &str) -> String {
    let mut out = String::with_capacity(info.len());
    let mut parts = info.split('\\');
    if info.starts_with('\\') {
        parts.next();
    }
    while let Some(k) = parts.next() {
        let v = match parts.next() {
            Some(v) => v,
            None => break,
        };
        if !k.eq_ignore_ascii_case(key) {
            out.push('\\');
            out.push_str(k);
            out.push('\\');
            out.push_str(v);
        }
    }
    out
}

/// Sets `key` to `value`, replacing any existing entry. Returns `None`
/// when the key or value is illegal or the result would not fit.
pub fn set_value_for_key(info: &str, key: &str, value: &str) -> Option<String> {
    if key.is_empty() || key.contains('\\') || key.contains('"') {
        return None;
    }
    if value.contains('\\') || value.contains('"') {
        return None;
    }
    let mut out = remove_key(info, key);
    if value.is_empty() {
        return Some(out);
    }
    if out.len() + key.len() + value.len() + 2 >= MAX_INFO_STRING {
        return None;
    }
    out.push('\\');
    out.push_str(key);
    out.push('\\');
    out.push_str(value);
    Some(out)
}

/// Checks a client-supplied info string before any key is trusted.
pub fn validate(info: &str) -> bool {
    info.len() < MAX_INFO_STRING && !info.contains('"') && !info.contains(';')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_set() {
        let info = set_value_for_key("", "name", "player").unwrap();
        let info = set_value_for_key(&info, "rate", "25000").unwrap();
        assert_eq!(value_for_key(&info, "name"), "player");
        assert_eq!(value_for_key(&info, "RATE"), "25000");
        assert_eq!(value_for_key(&info, "missing"), "");
    }

    #[test]
    fn set_replaces_existing() {
        let info = "\\name\\old\\rate\\5000";
        let info = set_value_for_key(info, "name", "new").unwrap();
        assert_eq!(value_for_key(&info, "name"), "new");
        assert_eq!(value_for_key(&info, "rate"), "5000");
    }

    #[test]
    fn remove_drops_only_target() {
        let info = "\\a\\1\\b\\2\\c\\3";
        let out = remove_key(info, "b");
        assert_eq!(value_for_key(&out, "a"), "1");
        assert_eq!(value_for_key(&out, "b"), "");
        assert_eq!(value_for_key(&out, "c"), "3");
    }

    #[test]
    fn illegal_characters_rejected() {
        assert!(set_value_for_key("", "na\\me", "x").is_none());
        assert!(set_value_for_key("", "name", "x\"y").is_none());
        assert!(!validate("\\name\\pl\"ayer"));
        assert!(!validate("\\cmd\\a;rcon"));
    }

    #[test]
    fn oversized_set_rejected() {
        let big = "x".repeat(MAX_INFO_STRING);
        assert!(set_value_for_key("", "k", &big).is_none());
    }
}
