//! Built-in password options for sites with unusual password rules.

use crate::models::SiteRecord;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Character constraints for a derived password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordOptions {
    pub allowed_chars: String,
    pub required_chars: String,
    pub password_len: u32,
}

/// Defaults in effect before per-site options existed
pub const DEFAULT_ALLOWED: &str = "a-zA-Z0-9_.";
pub const DEFAULT_REQUIRED: &str = "";
pub const DEFAULT_LEN: u32 = 24;

impl Default for PasswordOptions {
    fn default() -> Self {
        PasswordOptions {
            allowed_chars: DEFAULT_ALLOWED.to_string(),
            required_chars: DEFAULT_REQUIRED.to_string(),
            password_len: DEFAULT_LEN,
        }
    }
}

impl PasswordOptions {
    /// Whether these are exactly the frozen defaults
    ///
    /// Byte-for-byte comparison: `a-zA-Z0-9._` is a different option set
    /// even though it flattens to the same alphabet.
    pub fn is_default(&self) -> bool {
        is_default(&self.allowed_chars, &self.required_chars, self.password_len)
    }
}

/// Whether the given options exactly match the frozen defaults
pub fn is_default(allowed_chars: &str, required_chars: &str, password_len: u32) -> bool {
    allowed_chars == DEFAULT_ALLOWED
        && required_chars == DEFAULT_REQUIRED
        && password_len == DEFAULT_LEN
}

impl SiteRecord {
    pub fn options(&self) -> PasswordOptions {
        PasswordOptions {
            allowed_chars: self.allowed_chars.clone(),
            required_chars: self.required_chars.clone(),
            password_len: self.password_len,
        }
    }

    pub fn has_default_options(&self) -> bool {
        is_default(&self.allowed_chars, &self.required_chars, self.password_len)
    }
}

/// Options for a known site, keyed by its canonical domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub domain: &'static str,
    pub options: PasswordOptions,
}

struct RawPreset {
    domain: &'static str,
    aliases: &'static [&'static str],
    required: Option<&'static str>,
    allowed: Option<&'static str>,
    len: Option<u32>,
}

const fn raw(domain: &'static str) -> RawPreset {
    RawPreset {
        domain,
        aliases: &[],
        required: None,
        allowed: None,
        len: None,
    }
}

impl RawPreset {
    const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    const fn required(mut self, required: &'static str) -> Self {
        self.required = Some(required);
        self
    }

    const fn allowed(mut self, allowed: &'static str) -> Self {
        self.allowed = Some(allowed);
        self
    }

    const fn len(mut self, len: u32) -> Self {
        self.len = Some(len);
        self
    }
}

const RAW: &[RawPreset] = &[
    raw("avid.com").required("@"),
    raw("davidstea.com").required("@"),
    raw("easyjet.com").len(20),
    raw("facebook.com").aliases(&["fb.com"]),
    raw("hrblock.com").required("$"),
    raw("italki.com").len(20),
    raw("google.com").aliases(&["accounts.google.com", "gmail.com", "youtube.com"]),
    raw("live.com").aliases(&["signup.live.com"]).required("@"),
    raw("nic.ru").allowed("a-zA-Z0-9"),
    // Three or more repeated characters are rejected by the site
    raw("nintendo.com")
        .aliases(&["accounts.nintendo.com"])
        .required("@")
        .len(20),
    raw("nyumlc.org").len(20),
    raw("parcelpending.com").required("$@"),
    raw("paypal.com").required("@").len(20),
    raw("pokemon.com").required("@"),
    raw("redislabs.com").required("$"),
    raw("rentcafe.com").required("@"),
    raw("spectrum.net").len(20),
    raw("teladoc.com").required("#"),
    raw("yahoo.com").aliases(&["login.yahoo.com"]),
    raw("ybr.com").required("@").len(20),
];

fn presets() -> &'static HashMap<&'static str, Preset> {
    static PRESETS: OnceLock<HashMap<&'static str, Preset>> = OnceLock::new();

    PRESETS.get_or_init(|| {
        let mut map = HashMap::new();
        for entry in RAW {
            let preset = Preset {
                domain: entry.domain,
                options: PasswordOptions {
                    allowed_chars: entry.allowed.unwrap_or(DEFAULT_ALLOWED).to_string(),
                    required_chars: entry.required.unwrap_or(DEFAULT_REQUIRED).to_string(),
                    password_len: entry.len.unwrap_or(DEFAULT_LEN),
                },
            };
            for name in std::iter::once(&entry.domain).chain(entry.aliases) {
                map.insert(*name, preset.clone());
            }
        }
        map
    })
}

/// Find the preset for a domain or one of its aliases
pub fn lookup(domain: &str) -> Option<&'static Preset> {
    presets().get(domain)
}

/// Every canonical preset, sorted by domain
pub fn all() -> Vec<&'static Preset> {
    let mut list: Vec<&Preset> = presets()
        .iter()
        .filter(|(name, preset)| **name == preset.domain)
        .map(|(_, preset)| preset)
        .collect();
    list.sort_by_key(|p| p.domain);
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PasswordOptions::default();
        assert!(options.is_default());
        assert_eq!(options.password_len, 24);
        assert!(!is_default("a-zA-Z0-9._", "", 24));
        assert!(!is_default(DEFAULT_ALLOWED, "", 23));
    }

    #[test]
    fn test_alias_lookup() {
        let preset = lookup("gmail.com").unwrap();
        assert_eq!(preset.domain, "google.com");
        assert!(preset.options.is_default());
    }

    #[test]
    fn test_preset_overrides_merge_with_defaults() {
        let paypal = &lookup("paypal.com").unwrap().options;
        assert_eq!(paypal.required_chars, "@");
        assert_eq!(paypal.password_len, 20);
        assert_eq!(paypal.allowed_chars, DEFAULT_ALLOWED);

        let nic = &lookup("nic.ru").unwrap().options;
        assert_eq!(nic.allowed_chars, "a-zA-Z0-9");
        assert_eq!(nic.password_len, 24);

        assert!(lookup("accounts.nintendo.com").is_some());
        assert!(lookup("example.com").is_none());
    }

    #[test]
    fn test_all_lists_canonical_domains_once() {
        let list = all();
        assert_eq!(list.len(), RAW.len());
        assert!(list.windows(2).all(|w| w[0].domain < w[1].domain));
    }
}
