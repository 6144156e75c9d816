//! Email address parsing (RFC 5322 §3.4).

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`), or the raw field value when
    /// the syntax could not be understood.
    pub address: String,
}

impl EmailAddress {
    /// An address that carries the raw value untouched.
    pub fn opaque(raw: &str) -> Self {
        Self {
            display_name: String::new(),
            address: raw.trim().to_string(),
        }
    }

    /// Parse a single email address from a header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// If parsing fails, the raw string is stored as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        // "Display Name <address>" or "<address>"
        if let (Some(angle_start), Some(angle_end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if angle_end > angle_start {
                let address = trimmed[angle_start + 1..angle_end].trim().to_string();
                let display_name = strip_quotes(&trimmed[..angle_start]);
                return Self {
                    display_name,
                    address,
                };
            }
        }

        // Bare address, or something we do not understand: keep it as-is
        Self::opaque(trimmed)
    }

    /// Parse a comma-separated list of addresses.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`.
    /// Order and duplicates are preserved. When quotes or angle brackets are
    /// left unbalanced the whole value is returned as one opaque address.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        if raw.trim().is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut angle_depth: i32 = 0;
        let mut escaped = false;

        for ch in raw.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_quotes => {
                    escaped = true;
                    current.push(ch);
                }
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    angle_depth += 1;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    angle_depth -= 1;
                    current.push(ch);
                }
                ',' if !in_quotes && angle_depth == 0 => {
                    segments.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            }
            if angle_depth < 0 {
                break;
            }
        }

        if in_quotes || angle_depth != 0 {
            return vec![Self::opaque(raw)];
        }
        segments.push(current);

        segments
            .iter()
            .map(|s| Self::parse(s))
            .filter(|a| !a.address.is_empty() || !a.display_name.is_empty())
            .collect()
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }

    /// Case-insensitive substring test over the whole `Name <address>` form,
    /// so a needle may span the name and the address.
    ///
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.display().to_lowercase().contains(needle)
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().replace("\\\"", "\"")
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
