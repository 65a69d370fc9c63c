/// Normalizes a key prefix: no leading slash, exactly one trailing slash.
/// An empty prefix stays empty.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Translates source paths into target keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapper {
    source_prefix: String,
    target_prefix: String,
}

impl KeyMapper {
    pub fn new(source_prefix: &str, target_prefix: &str) -> Self {
        Self {
            source_prefix: normalize_prefix(source_prefix),
            target_prefix: normalize_prefix(target_prefix),
        }
    }

    /// Strips the source prefix and prepends the target prefix.
    pub fn target_key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        let relative = path.strip_prefix(&self.source_prefix).unwrap_or(path);
        format!("{}{}", self.target_prefix, relative)
    }
}
