//! Utility functions for common operations.
//!
//! - **Client IP**: choosing the public caller address reported upstream
//! - **URL validation**: endpoint checks and credential redaction for logs
//! - **Text processing**: sanitizing upstream titles and descriptions

mod client_ip;
mod text;
mod url_validator;

pub use client_ip::{is_public_ip, resolve_client_ip, FALLBACK_CLIENT_IP};
pub use text::{sanitize_body, sanitize_text_field, strip_control_chars};
pub use url_validator::{redact_query_param, validate_base_url, UrlValidationError};
