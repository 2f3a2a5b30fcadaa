//! Route rule model.
//!
//! A rule pairs a match predicate with the interface label traffic should
//! leave through. Rules are evaluated first-to-last by the routing engine;
//! a rule whose predicate is entirely empty is a catch-all.
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use failure::Fail;
use regex::{escape, Regex};
use serde::{Deserialize, Serialize};

use crate::model::model::{L4Protocol, Label};

/// A single routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub interface: Label,
    #[serde(rename = "match", default)]
    pub matcher: RuleMatch,
}

fn enabled_default() -> bool {
    true
}

impl RouteRule {
    pub fn catch_all(id: &str, name: &str, interface: Label) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            enabled: true,
            interface,
            matcher: RuleMatch::default(),
        }
    }
}

/// Match predicate of a rule. Every non-empty clause must accept the
/// destination for the rule to match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// accepted for forward compatibility, ignored by the TCP-only core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<L4Protocol>,
}

impl RuleMatch {
    pub fn is_catch_all(&self) -> bool {
        self.domains.is_empty() && self.ips.is_empty() && self.ports.is_empty()
    }

    pub fn matches(&self, host: &str, port: u16) -> bool {
        if self.is_catch_all() {
            return true;
        }

        if !self.domains.is_empty() && !self.domains.iter().any(|pat| domain_match(pat, host)) {
            return false;
        }

        if !self.ips.is_empty() {
            match host_ip(host) {
                Some(ip) => {
                    if !self.ips.iter().any(|pat| pat.contains(&ip)) {
                        return false;
                    }
                }
                // A name can never satisfy an ip-only rule. With a domain
                // clause present the ip clause is skipped instead.
                None => {
                    if self.domains.is_empty() {
                        return false;
                    }
                }
            }
        }

        if !self.ports.is_empty() && !self.ports.contains(&port) {
            return false;
        }

        true
    }
}

/// Parse `host` as an IP literal, tolerating the bracketed IPv6 form.
pub fn host_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// Case-insensitive domain pattern match.
///
/// `*.suffix` accepts any name below `suffix` and the bare `suffix`
/// itself; anything else containing metacharacters is treated as a shell
/// glob, a plain pattern as literal equality.
pub fn domain_match(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();

    if pattern == host {
        return true;
    }

    if pattern.starts_with("*.") {
        // "*.example.com" -> ".example.com"
        let dotted = &pattern[1..];
        return host.ends_with(dotted) || host == pattern[2..];
    }

    match glob_regex(&pattern) {
        Ok(re) => re.is_match(&host),
        Err(_) => false,
    }
}

/// Translate a shell glob (`*`, `?`, `[…]`) into an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::with_capacity(pattern.len() + 4);
    translated.push_str(r"\A");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            '[' => {
                translated.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    translated.push('^');
                }
                // copy the class body through; an unterminated class fails
                // regex compilation and the pattern matches nothing
                while let Some(cc) = chars.next() {
                    translated.push(cc);
                    if cc == ']' {
                        break;
                    }
                }
            }
            c => translated.push_str(&escape(&c.to_string())),
        }
    }
    translated.push_str(r"\z");
    Regex::new(&translated)
}

/// CIDR block or single address, as written in a rule's `ips` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPattern {
    /// e.g. `10.0.0.0/8`
    Cidr { addr: IpAddr, prefix: u8 },
    /// bare address, equality match
    Addr(IpAddr),
}

impl IpPattern {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self, ip) {
            (IpPattern::Addr(addr), ip) => addr == ip,
            (
                IpPattern::Cidr {
                    addr: IpAddr::V4(net),
                    prefix,
                },
                IpAddr::V4(ip),
            ) => {
                let bmask = if *prefix == 0 {
                    0
                } else {
                    !0u32 << (32 - u32::from(*prefix))
                };
                u32::from(*net) & bmask == u32::from(*ip) & bmask
            }
            (
                IpPattern::Cidr {
                    addr: IpAddr::V6(net),
                    prefix,
                },
                IpAddr::V6(ip),
            ) => {
                let bmask = if *prefix == 0 {
                    0
                } else {
                    !0u128 << (128 - u32::from(*prefix))
                };
                u128::from(*net) & bmask == u128::from(*ip) & bmask
            }
            _ => false,
        }
    }
}

impl fmt::Display for IpPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpPattern::Cidr { addr, prefix } => write!(f, "{}/{}", addr, prefix),
            IpPattern::Addr(addr) => write!(f, "{}", addr),
        }
    }
}

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
#[fail(display = "invalid ip pattern: {}", text)]
pub struct InvalidIpPattern {
    pub text: String,
}

impl FromStr for IpPattern {
    type Err = InvalidIpPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidIpPattern { text: s.to_owned() };
        match s.find('/') {
            Some(pos) => {
                let addr: IpAddr = s[..pos].parse().map_err(|_| invalid())?;
                let prefix: u8 = s[pos + 1..].parse().map_err(|_| invalid())?;
                let max = match addr {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                if prefix > max {
                    return Err(invalid());
                }
                Ok(IpPattern::Cidr { addr, prefix })
            }
            None => {
                let addr: IpAddr = s.parse().map_err(|_| invalid())?;
                Ok(IpPattern::Addr(addr))
            }
        }
    }
}

mod format {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    impl Serialize for IpPattern {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for IpPattern {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(|err: InvalidIpPattern| {
                de::Error::invalid_value(de::Unexpected::Str(&err.text), &"an ip or cidr entry")
            })
        }
    }
}
