use crate::SvnError;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A repository URL as announced by a client.
///
/// Supported schemes are `svn://` and `svn+ssh://` (tunneled sessions). The
/// authority is kept exactly as the client wrote it so URLs derived from it
/// (the repository root URL) compare equal to the ones the client builds.
pub struct SvnUrl {
    /// `svn` or `svn+ssh`, lowercased.
    pub scheme: String,
    /// Authority exactly as given (`[user@]host[:port]`).
    pub authority: String,
    /// Hostname (or IP) portion of the URL, without brackets.
    pub host: String,
    /// Explicit port, or the scheme default.
    pub port: u16,
    /// Percent-decoded path, always starting with `/`, without trailing `/`
    /// (except for the bare root).
    pub path: String,
}

impl SvnUrl {
    /// Parses a `svn://` or `svn+ssh://` URL.
    ///
    /// # Examples
    ///
    /// ```
    /// # use svnserve::SvnUrl;
    /// let url = SvnUrl::parse("svn://example.com/repo/my%20dir/").unwrap();
    /// assert_eq!(url.host, "example.com");
    /// assert_eq!(url.port, 3690);
    /// assert_eq!(url.path, "/repo/my dir");
    /// ```
    pub fn parse(input: &str) -> Result<Self, SvnError> {
        let input = input.trim();
        let (scheme, rest, default_port) = if let Some(rest) = strip_scheme(input, "svn+ssh://")
        {
            ("svn+ssh", rest, 22u16)
        } else if let Some(rest) = strip_scheme(input, "svn://") {
            ("svn", rest, 3690u16)
        } else {
            return Err(SvnError::InvalidUrl(format!(
                "only svn:// and svn+ssh:// URLs are supported: {input}"
            )));
        };
        let (authority, raw_path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let hostport = authority
            .rsplit_once('@')
            .map_or(authority, |(_, hostport)| hostport);

        let (host, port) = if let Some(hostport) = hostport.strip_prefix('[') {
            let Some(end) = hostport.find(']') else {
                return Err(SvnError::InvalidUrl(format!("invalid url: {input}")));
            };
            let host = &hostport[..end];
            let port = match hostport[end + 1..].strip_prefix(':') {
                Some(port) => parse_port(port, input)?,
                None if hostport[end + 1..].is_empty() => default_port,
                None => return Err(SvnError::InvalidUrl(format!("invalid url: {input}"))),
            };
            (host.to_string(), port)
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), parse_port(port, input)?),
                None => (hostport.to_string(), default_port),
            }
        };

        if host.trim().is_empty() {
            return Err(SvnError::InvalidUrl(format!(
                "missing host in url: {input}"
            )));
        }

        let decoded = percent_decode(raw_path)
            .ok_or_else(|| SvnError::InvalidUrl(format!("invalid escape in url: {input}")))?;
        let trimmed = decoded.trim_end_matches('/');
        let path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            host,
            port,
            path,
        })
    }

    /// URL for `fs_path` (an absolute path such as `/repo`) on the same
    /// authority.
    pub fn with_path(&self, fs_path: &str) -> String {
        let path = fs_path.trim_end_matches('/');
        format!(
            "{}://{}{}",
            self.scheme,
            self.authority,
            percent_encode_path(path)
        )
    }
}

impl std::fmt::Display for SvnUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.with_path(&self.path))
    }
}

impl std::str::FromStr for SvnUrl {
    type Err = SvnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn strip_scheme<'a>(input: &'a str, scheme: &str) -> Option<&'a str> {
    if input.len() >= scheme.len() && input[..scheme.len()].eq_ignore_ascii_case(scheme) {
        Some(&input[scheme.len()..])
    } else {
        None
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16, SvnError> {
    port.parse::<u16>()
        .map_err(|_| SvnError::InvalidUrl(format!("invalid port in url: {input}")))
}

/// Resolves `url` against `root_url`, returning the repository-relative path.
///
/// Returns `None` when `url` is not inside the repository.
pub(crate) fn relative_to_root(root_url: &str, url: &str) -> Option<String> {
    let root = root_url.trim_end_matches('/');
    let url = url.trim().trim_end_matches('/');
    let (root_scheme, root_rest) = root.split_once("://")?;
    let (scheme, rest) = url.split_once("://")?;
    if !root_scheme.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let tail = rest.strip_prefix(root_rest)?;
    if !(tail.is_empty() || tail.starts_with('/')) {
        return None;
    }
    let decoded = percent_decode(tail)?;
    Some(decoded.trim_matches('/').to_string())
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn percent_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || b"/-_.~!$&'()*+,;=:@".contains(&b) {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
