//! `os-release` metadata.

use indexmap::IndexMap;

/// Parsed `/etc/os-release` key/value pairs, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: IndexMap<String, String>,
}

impl OsRelease {
    /// Parse os-release content.
    ///
    /// Blank lines and `#` comments are skipped. Any other line must be
    /// `KEY=VALUE` with an upper-case key, and an `ID` must be present.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut fields = IndexMap::new();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("line {}: expected KEY=VALUE", lineno + 1));
            };
            let key = key.trim();
            if key.is_empty()
                || !key
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
            {
                return Err(format!("line {}: invalid key '{key}'", lineno + 1));
            }
            fields.insert(key.to_string(), unquote(value.trim()));
        }
        if !fields.contains_key("ID") {
            return Err("missing ID".to_string());
        }
        Ok(Self { fields })
    }

    /// Build from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `ID`, or `unknown`
    #[must_use]
    pub fn id(&self) -> &str {
        self.get("ID").unwrap_or("unknown")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.get("NAME").unwrap_or_else(|| self.id())
    }

    #[must_use]
    pub fn version_id(&self) -> &str {
        self.get("VERSION_ID").unwrap_or("unknown")
    }

    #[must_use]
    pub fn pretty_name(&self) -> Option<&str> {
        self.get("PRETTY_NAME")
    }

    #[must_use]
    pub fn home_url(&self) -> Option<&str> {
        self.get("HOME_URL")
    }

    /// Render in os-release syntax, quoting every value.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            let escaped = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('$', "\\$")
                .replace('`', "\\`");
            out.push_str(&format!("{key}=\"{escaped}\"\n"));
        }
        out
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == b'\'' && last == b'\'' {
            return value[1..value.len() - 1].to_string();
        }
        if first == b'"' && last == b'"' {
            let mut out = String::with_capacity(value.len());
            let mut chars = value[1..value.len() - 1].chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            return out;
        }
    }
    value.to_string()
}
