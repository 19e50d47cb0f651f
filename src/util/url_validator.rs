use thiserror::Error;
use url::Url;

/// Errors raised when validating the configured upstream endpoint.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP was used for a non-local host.
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

/// Validates the base URL of the upstream jobs API.
///
/// The publisher credential travels in the query string, so plain HTTP is only
/// accepted for loopback hosts (local test servers).
///
/// # Examples
///
/// ```
/// use jobfeeder::util::validate_base_url;
///
/// assert!(validate_base_url("https://api.whatjobs.com/api/v1/jobs.xml").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8080/jobs.xml").is_ok());
/// assert!(validate_base_url("http://api.example.com/jobs.xml").is_err());
/// assert!(validate_base_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => Ok(url),
        "http" => {
            let is_local = matches!(
                url.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("[::1]")
            );
            if is_local {
                Ok(url)
            } else {
                Err(UrlValidationError::InsecureBaseUrl)
            }
        }
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Render a URL for logging with the value of `param` masked.
pub fn redact_query_param(url: &Url, param: &str) -> String {
    if !url.query_pairs().any(|(key, _)| key == param) {
        return url.to_string();
    }

    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == param {
                "[REDACTED]".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
