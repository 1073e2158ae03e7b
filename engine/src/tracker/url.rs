/// A parsed tracker announce URL. Only plain HTTP is supported; the
/// core's HTTP client is a consumed collaborator, not implemented here,
/// but this module still needs to pull apart host/port/path so the
/// Receiver can open the right socket.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TrackerUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, PartialEq)]
pub enum TrackerUrlError {
    InvalidUrl,
    UnsupportedScheme,
    InvalidPort,
}

impl TrackerUrl {
    pub fn parse(url: &str) -> Result<Self, TrackerUrlError> {
        let without_scheme = url
            .strip_prefix("http://")
            .ok_or(TrackerUrlError::UnsupportedScheme)?;

        let (authority, path) = match without_scheme.split_once('/') {
            Some((authority, rest)) => (authority, format!("/{}", rest)),
            None => (without_scheme, "/".to_string()),
        };

        if authority.is_empty() {
            return Err(TrackerUrlError::InvalidUrl);
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| TrackerUrlError::InvalidPort)?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), 80),
        };

        Ok(Self { host, port, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_default_port() {
        let url = TrackerUrl::parse("http://tracker.example/announce").unwrap();
        assert_eq!(url.host, "tracker.example");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/announce");
    }

    #[test]
    fn parses_explicit_port() {
        let url = TrackerUrl::parse("http://tracker.example:6969/announce").unwrap();
        assert_eq!(url.port, 6969);
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert_eq!(
            TrackerUrl::parse("udp://tracker.example/announce"),
            Err(TrackerUrlError::UnsupportedScheme)
        );
    }

    #[test]
    fn defaults_to_root_path() {
        let url = TrackerUrl::parse("http://tracker.example:80").unwrap();
        assert_eq!(url.path, "/");
    }
}
