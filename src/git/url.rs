use std::{
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

const GIT_SUFFIX: &str = ".git";

/// Strips a trailing `.git` from `string`, if present.
pub fn strip_git_suffix(string: &str) -> &str {
    string.strip_suffix(GIT_SUFFIX).unwrap_or(string)
}

/// Location of a git remote, in any of the forms git accepts: `scheme://host/path`,
/// scp-like `user@host:path`, or a local path.
///
/// Equality and hashing ignore syntax git does not care about, so
/// `git@github.com:org/repo.git`, `ssh://git@github.com/org/repo` and
/// `https://github.com/org/repo.git` are all the same remote. A non-default port is part of the
/// identity, and a local path never equals a remote one.
#[derive(Debug, Clone)]
pub struct GitUrl {
    url: String,
    host: Option<String>,
    path: String,
}

impl GitUrl {
    pub fn new(url: impl Into<String>) -> GitUrl {
        let url = url.into();
        let (host, path) = normalize(&url);
        GitUrl { url, host, path }
    }

    /// The location exactly as it should be handed to git.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Lowercased host, with the port when it is not the scheme's default. `None` for local
    /// repositories.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Path without trailing `/` or `.git`. Starts with `/` for remotes.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host/path`, or just the path for local repositories, without user or `.git`.
    pub fn normalized(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}{}", self.path),
            None => self.path.clone(),
        }
    }

    /// Last path component, e.g. `repo` for `https://example.com/org/repo.git`.
    pub fn name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|component| !component.is_empty())
            .or(self.host.as_deref())
            .unwrap_or(&self.path)
    }

    /// Resolves a `./` or `../` relative location, as `.gitmodules` may declare, against the
    /// remote of the enclosing repository. Other locations are returned unchanged.
    pub fn resolved_against(&self, base: &GitUrl) -> GitUrl {
        let mut rest = self.url.as_str();
        if !(rest.starts_with("./") || rest.starts_with("../")) {
            return self.clone();
        }

        let mut resolved = base.url.trim_end_matches('/').to_owned();
        loop {
            if let Some(stripped) = rest.strip_prefix("./") {
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix("../") {
                rest = stripped;
                resolved = parent_location(&resolved);
            } else {
                break;
            }
        }

        if resolved.ends_with(':') || resolved.ends_with('/') {
            GitUrl::new(format!("{resolved}{rest}"))
        } else {
            GitUrl::new(format!("{resolved}/{rest}"))
        }
    }
}

/// Drops the last path component of `location`. The scheme and host of URLs and the `host:` of
/// scp-like locations are kept.
fn parent_location(location: &str) -> String {
    if let Some(index) = location.find("://") {
        let (prefix, rest) = location.split_at(index + 3);
        return match rest.rfind('/') {
            Some(slash) => format!("{prefix}{}", &rest[..slash]),
            None => location.to_owned(),
        };
    }
    if let Some(slash) = location.rfind('/') {
        return location[..slash.max(1)].to_owned();
    }
    match location.split_once(':') {
        Some((authority, _)) if !is_local_path(location) => format!("{authority}:"),
        _ => ".".to_owned(),
    }
}

/// Splits `url` into its host (`None` for local paths) and normalized path.
fn normalize(url: &str) -> (Option<String>, String) {
    let url = url.trim();

    if let Some((scheme, rest)) = url.split_once("://") {
        if scheme.eq_ignore_ascii_case("file") {
            return (None, normalize_path(rest));
        }
        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };
        return (
            Some(host_of(authority, default_port(scheme))),
            normalize_path(path),
        );
    }

    if is_local_path(url) {
        return (None, normalize_path(url));
    }

    // scp-like syntax: [user@]host:path
    match url.split_once(':') {
        Some((authority, path)) => {
            let path = normalize_path(path);
            (
                Some(host_of(authority, None)),
                format!("/{}", path.trim_start_matches('/')),
            )
        }
        None => (None, normalize_path(url)),
    }
}

fn is_local_path(url: &str) -> bool {
    url.starts_with('/') || url.starts_with('.') || url.starts_with('~') || !url.contains(':')
}

fn default_port(scheme: &str) -> Option<&'static str> {
    match scheme.to_ascii_lowercase().as_str() {
        "ssh" | "git+ssh" | "ssh+git" => Some("22"),
        "git" => Some("9418"),
        "http" => Some("80"),
        "https" => Some("443"),
        "ftp" => Some("21"),
        "ftps" => Some("990"),
        _ => None,
    }
}

fn host_of(authority: &str, default_port: Option<&str>) -> String {
    let host = match authority.rsplit_once('@') {
        Some((_user, host)) => host,
        None => authority,
    };
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
            if port.is_empty() || Some(port) == default_port {
                name
            } else {
                host
            }
        }
        _ => host,
    };
    host.to_ascii_lowercase()
}

fn normalize_path(path: &str) -> String {
    let path = path.trim_end_matches('/');
    strip_git_suffix(path).to_owned()
}

impl PartialEq for GitUrl {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.path == other.path
    }
}

impl Eq for GitUrl {}

impl Hash for GitUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.path.hash(state);
    }
}

impl Display for GitUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(strip_git_suffix(&self.url))
    }
}

impl From<&str> for GitUrl {
    fn from(url: &str) -> Self {
        GitUrl::new(url)
    }
}

impl From<String> for GitUrl {
    fn from(url: String) -> Self {
        GitUrl::new(url)
    }
}

impl FromStr for GitUrl {
    type Err = std::convert::Infallible;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        Ok(GitUrl::new(url))
    }
}

impl AsRef<str> for GitUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    use pretty_assertions::assert_eq;

    fn hash_of(url: &GitUrl) -> u64 {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn git_suffix_does_not_affect_identity() {
        for (with_suffix, without_suffix) in [
            (
                "https://github.com/org/repo.git",
                "https://github.com/org/repo",
            ),
            ("git@github.com:org/repo.git", "git@github.com:org/repo"),
            ("/srv/mirrors/repo.git", "/srv/mirrors/repo"),
        ] {
            let a = GitUrl::new(with_suffix);
            let b = GitUrl::new(without_suffix);
            assert_eq!(a, b);
            assert_eq!(hash_of(&a), hash_of(&b));
        }
    }

    #[test]
    fn transports_to_the_same_host_are_equal() {
        let https = GitUrl::new("https://github.com/org/repo");
        let ssh = GitUrl::new("ssh://git@github.com:22/org/repo.git");
        let scp = GitUrl::new("git@GitHub.com:org/repo.git");
        assert_eq!(https.normalized(), "github.com/org/repo");
        assert_eq!(https, ssh);
        assert_eq!(https, scp);
    }

    #[test]
    fn local_paths() {
        assert_eq!(GitUrl::new("file:///srv/repo.git"), GitUrl::new("/srv/repo"));
        assert_eq!(GitUrl::new("/srv/repo/").normalized(), "/srv/repo");
        assert_ne!(GitUrl::new("/srv/repo"), GitUrl::new("/srv/other"));
    }

    #[test]
    fn non_default_ports_are_distinct_remotes() {
        let custom = GitUrl::new("ssh://git@host:2222/org/repo");
        assert_eq!(custom.host(), Some("host:2222"));
        assert_eq!(custom.normalized(), "host:2222/org/repo");
        assert_ne!(custom, GitUrl::new("https://host/org/repo"));
        assert_eq!(GitUrl::new("https://host:443/org/repo"), GitUrl::new("https://host/org/repo"));
        assert_eq!(GitUrl::new("git://host:9418/org/repo").host(), Some("host"));
        assert_ne!(GitUrl::new("http://host:8080/repo"), GitUrl::new("http://host/repo"));
    }

    #[test]
    fn local_paths_never_equal_remotes() {
        let local = GitUrl::new("srv/lib");
        let remote = GitUrl::new("https://srv/lib");
        assert_eq!(local.host(), None);
        assert_eq!(remote.host(), Some("srv"));
        assert_ne!(local, remote);
    }

    #[test]
    fn resolves_relative_submodule_locations() {
        let cases = [
            ("https://example.com/org/app.git", "../lib.git", "https://example.com/org/lib.git"),
            ("https://example.com/org/app/", "./lib", "https://example.com/org/app/lib"),
            ("https://example.com/org/app", "../../other/lib", "https://example.com/other/lib"),
            ("git@example.com:org/app.git", "../lib", "git@example.com:org/lib"),
            ("git@example.com:app.git", "../lib", "git@example.com:lib"),
            ("/srv/repos/app", "../lib", "/srv/repos/lib"),
            ("/app", "../lib", "/lib"),
        ];
        for (base, relative, expected) in cases {
            let resolved = GitUrl::new(relative).resolved_against(&GitUrl::new(base));
            assert_eq!(resolved.as_str(), expected, "{relative} against {base}");
        }

        let absolute = GitUrl::new("https://example.com/lib.git");
        assert_eq!(
            absolute
                .resolved_against(&GitUrl::new("https://example.com/org/app"))
                .as_str(),
            "https://example.com/lib.git"
        );
    }

    #[test]
    fn display_and_name_strip_suffix() {
        let url = GitUrl::new("https://github.com/org/repo.git");
        assert_eq!(url.to_string(), "https://github.com/org/repo");
        assert_eq!(url.as_str(), "https://github.com/org/repo.git");
        assert_eq!(url.name(), "repo");
    }
}
