//! Reader for the OpenSSH client config file (`~/.ssh/config`).
//!
//! Only the keywords that matter for opening a tunnel are retained:
//! `HostName`, `User`, `Port` and `IdentityFile`. Everything else is parsed
//! for syntax and otherwise ignored.

use crate::utils::error::{Result, TunnelError};
use crate::utils::paths::expand_tilde;
use std::path::{Path, PathBuf};

/// Values from the SSH config that apply to one host alias
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshHostConfig {
    /// `HostName`, or the alias itself when none is configured
    pub hostname: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Every matching `IdentityFile`, in file order, tilde-expanded
    pub identity_files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct HostBlock {
    patterns: Vec<String>,
    /// `Match` blocks are kept so their options do not leak into the
    /// preceding `Host` block, but they never apply
    is_match: bool,
    options: Vec<(String, String)>,
}

impl HostBlock {
    fn global() -> Self {
        Self {
            patterns: vec!["*".to_string()],
            is_match: false,
            options: Vec::new(),
        }
    }

    fn applies_to(&self, alias: &str) -> bool {
        if self.is_match {
            return false;
        }

        let alias = alias.to_lowercase();
        let mut matched = false;
        for pattern in &self.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if wildcard_match(&negated.to_lowercase(), &alias) {
                    return false;
                }
            } else if wildcard_match(&pattern.to_lowercase(), &alias) {
                matched = true;
            }
        }
        matched
    }
}

/// Parsed SSH client configuration
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<HostBlock>,
}

impl SshConfig {
    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TunnelError::SshConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::parse_from(&content, path)?;
        tracing::debug!("Loaded {} host block(s) from {:?}", config.blocks.len(), path);
        Ok(config)
    }

    /// Parse config text
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_from(content, Path::new("<inline>"))
    }

    fn parse_from(content: &str, path: &Path) -> Result<Self> {
        let parse_error = |line_no: usize, reason: String| TunnelError::SshConfigParse {
            path: path.to_path_buf(),
            reason: format!("line {}: {}", line_no, reason),
        };

        let mut blocks = vec![HostBlock::global()];

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, value) = split_keyword(line);
            if value.is_empty() {
                return Err(parse_error(line_no, format!("missing value for '{}'", keyword)));
            }
            let keyword = keyword.to_lowercase();

            match keyword.as_str() {
                "host" => {
                    let patterns = split_args(value).map_err(|e| parse_error(line_no, e))?;
                    blocks.push(HostBlock {
                        patterns,
                        is_match: false,
                        options: Vec::new(),
                    });
                }
                "match" => {
                    blocks.push(HostBlock {
                        patterns: Vec::new(),
                        is_match: true,
                        options: Vec::new(),
                    });
                }
                _ => {
                    let value = unquote(value).map_err(|e| parse_error(line_no, e))?;
                    if keyword == "port" && value.parse::<u16>().map_or(true, |p| p == 0) {
                        return Err(parse_error(line_no, format!("invalid port '{}'", value)));
                    }
                    if keyword == "include" {
                        tracing::debug!("Ignoring Include directive at line {}", line_no);
                        continue;
                    }
                    if let Some(block) = blocks.last_mut() {
                        block.options.push((keyword, value));
                    }
                }
            }
        }

        Ok(Self { blocks })
    }

    /// Collect the settings that apply to `alias`.
    ///
    /// The first value found wins, except `IdentityFile` which accumulates.
    pub fn lookup(&self, alias: &str) -> SshHostConfig {
        let mut hostname: Option<String> = None;
        let mut result = SshHostConfig::default();

        for block in self.blocks.iter().filter(|b| b.applies_to(alias)) {
            for (keyword, value) in &block.options {
                match keyword.as_str() {
                    "hostname" if hostname.is_none() => hostname = Some(expand_tokens(value, alias)),
                    "user" if result.user.is_none() => result.user = Some(value.clone()),
                    "port" if result.port.is_none() => result.port = value.parse().ok(),
                    "identityfile" => result
                        .identity_files
                        .push(expand_tilde(Path::new(&expand_tokens(value, alias)))),
                    _ => {}
                }
            }
        }

        result.hostname = hostname.unwrap_or_else(|| alias.to_string());
        result
    }
}

/// Split `Keyword value` or `Keyword=value`
fn split_keyword(line: &str) -> (&str, &str) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let keyword = &line[..end];
    let mut rest = line[end..].trim_start();
    if let Some(stripped) = rest.strip_prefix('=') {
        rest = stripped.trim_start();
    }
    (keyword, rest.trim_end())
}

fn unquote(value: &str) -> std::result::Result<String, String> {
    match value.strip_prefix('"') {
        Some(inner) => inner
            .strip_suffix('"')
            .map(str::to_string)
            .ok_or_else(|| "unterminated quote".to_string()),
        None => Ok(value.to_string()),
    }
}

/// Split a whitespace-separated argument list, honouring double quotes
fn split_args(value: &str) -> std::result::Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in value.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

/// Expand `%h` (the alias) and `%%`
fn expand_tokens(value: &str, alias: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(alias),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Glob match supporting `*` and `?`
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_ti = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# work machines
Host db1
    HostName 10.0.0.5
    User alice
    IdentityFile ~/.ssh/db1_ed25519

Host *.prod !legacy.prod
    User deploy
    Port 2222

Host legacy.prod
    HostName old-%h.internal

Match exec "true"
    User nobody

Host *
    User fallback
    IdentityFile=/etc/ssh/shared_key
"#;

    #[test]
    fn test_lookup_explicit_alias() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let host = config.lookup("db1");

        assert_eq!(host.hostname, "10.0.0.5");
        assert_eq!(host.user.as_deref(), Some("alice"));
        assert_eq!(host.port, None);
        assert_eq!(host.identity_files.len(), 2);
        assert_eq!(host.identity_files[1], PathBuf::from("/etc/ssh/shared_key"));
    }

    #[test]
    fn test_lookup_wildcard_and_negation() {
        let config = SshConfig::parse(SAMPLE).unwrap();

        let api = config.lookup("api.prod");
        assert_eq!(api.hostname, "api.prod");
        assert_eq!(api.user.as_deref(), Some("deploy"));
        assert_eq!(api.port, Some(2222));

        let legacy = config.lookup("legacy.prod");
        assert_eq!(legacy.hostname, "old-legacy.prod.internal");
        assert_eq!(legacy.user.as_deref(), Some("fallback"));
        assert_eq!(legacy.port, None);
    }

    #[test]
    fn test_match_block_never_applies() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let other = config.lookup("unrelated");
        assert_eq!(other.user.as_deref(), Some("fallback"));
    }

    #[test]
    fn test_global_options_before_first_host() {
        let config = SshConfig::parse("User root\nHost a\n  User alice\n").unwrap();
        assert_eq!(config.lookup("a").user.as_deref(), Some("root"));
    }

    #[test]
    fn test_invalid_port_is_parse_error() {
        let err = SshConfig::parse("Host a\n  Port banana\n").unwrap_err();
        match err {
            TunnelError::SshConfigParse { reason, .. } => assert!(reason.contains("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let err = SshConfig::load(Path::new("/nonexistent/dbtunnel/ssh_config")).unwrap_err();
        assert!(matches!(err, TunnelError::SshConfigParse { .. }));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("db?", "db1"));
        assert!(!wildcard_match("db?", "db12"));
        assert!(wildcard_match("*.example.com", "a.b.example.com"));
        assert!(!wildcard_match("*.example.com", "example.org"));
    }

    #[test]
    fn test_split_keyword_forms() {
        assert_eq!(split_keyword("HostName 10.0.0.5"), ("HostName", "10.0.0.5"));
        assert_eq!(split_keyword("Port=2222"), ("Port", "2222"));
        assert_eq!(split_keyword("User = bob"), ("User", "bob"));
    }
}
