//! Path helpers for locally configured key files.

/// Expands a leading `~/` in a configured key path to `$HOME`.
///
/// Paths without the prefix, or any path when `HOME` is unset, come back
/// unchanged.
///
/// ```
/// # use prbranch::remote::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/preview.pem"), format!("{home}/.ssh/preview.pem"));
/// assert_eq!(expand_tilde("keys/preview.pem"), "keys/preview.pem");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => format!("{}/{rest}", home.to_string_lossy()),
        _ => path.to_owned(),
    }
}
