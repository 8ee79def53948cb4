//! Hostname lookup and `{fqdn}` / `{hostname}` template substitution.

use std::ffi::CStr;

/// The system hostname as reported by `gethostname(2)`, or `localhost`.
#[must_use]
pub fn system_hostname() -> String {
    let mut buf = [0u8; 256];

    // SAFETY: buf is valid for buf.len() bytes and gethostname never writes past it.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }

    CStr::from_bytes_until_nul(&buf)
        .ok()
        .and_then(|name| name.to_str().ok())
        .filter(|name| !name.is_empty())
        .map_or_else(|| "localhost".to_string(), str::to_string)
}

/// The first label of the system hostname.
#[must_use]
pub fn short_hostname() -> String {
    let full = system_hostname();
    full.split('.').next().unwrap_or(&full).to_string()
}

/// Expand `{fqdn}` and `{hostname}` in `template`.
///
/// `None` expands to the fully-qualified name.
#[must_use]
pub fn fill_hostname_template(template: Option<&str>) -> String {
    let template = template.unwrap_or("{fqdn}");
    if !template.contains('{') {
        return template.to_string();
    }

    template
        .replace("{fqdn}", &system_hostname())
        .replace("{hostname}", &short_hostname())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_passes_through() {
        assert_eq!(fill_hostname_template(Some("mail.example.com")), "mail.example.com");
    }

    #[test]
    fn test_placeholders_expand() {
        let fqdn = system_hostname();
        assert_eq!(fill_hostname_template(None), fqdn);
        assert_eq!(
            fill_hostname_template(Some("relay.{hostname}")),
            format!("relay.{}", short_hostname())
        );
        assert!(!short_hostname().contains('.'));
    }
}
