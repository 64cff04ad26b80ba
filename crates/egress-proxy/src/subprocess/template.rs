//! Secret substitution into the daemon config template
//!
//! The template carries one `${NAME}` placeholder (by default
//! `${WARP_PRIVATE_KEY}`). The rendered file holds key material, so it lives
//! in an owner-only temp file that is removed when [`RenderedConfig`] drops.

use crate::error::{ProxyError, Result};
use regex::{NoExpand, Regex};
use secrecy::{ExposeSecret, SecretString};
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// Read the secret from `var`.
///
/// Empty values count as missing.
pub fn secret_from_env(var: &str) -> Result<SecretString> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::new(value.into_boxed_str())),
        _ => Err(ProxyError::MissingSecret(var.to_string())),
    }
}

/// Substitute `secret` for every `${var}` in `template`.
///
/// The secret is inserted literally; `$` and `\` in it carry no meaning.
pub fn render(template: &str, var: &str, secret: &SecretString) -> Result<String> {
    let secret = secret.expose_secret();
    if secret.contains(['\n', '\r']) {
        return Err(ProxyError::InvalidSecret(var.to_string()));
    }

    let placeholder = Regex::new(&regex::escape(&format!("${{{}}}", var)))
        .map_err(|e| ProxyError::config("secret_var", e.to_string()))?;
    if !placeholder.is_match(template) {
        tracing::warn!(
            placeholder = %format!("${{{}}}", var),
            "config template has no secret placeholder"
        );
    }

    Ok(placeholder.replace_all(template, NoExpand(secret)).into_owned())
}

/// A rendered config on disk, deleted on drop.
#[derive(Debug)]
pub struct RenderedConfig {
    file: NamedTempFile,
}

impl RenderedConfig {
    /// Render `template_path` and write it to a fresh 0600 temp file.
    pub fn write(template_path: &Path, var: &str, secret: &SecretString) -> Result<Self> {
        if !template_path.is_file() {
            return Err(ProxyError::TemplateMissing(template_path.to_path_buf()));
        }
        let template = std::fs::read_to_string(template_path)?;
        let rendered = render(&template, var, secret)?;

        let mut file = tempfile::Builder::new()
            .prefix("wireproxy-")
            .suffix(".conf")
            .permissions(Permissions::from_mode(0o600))
            .tempfile()?;
        file.write_all(rendered.as_bytes())?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), "rendered proxy config");
        Ok(Self { file })
    }

    /// Location of the rendered file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now, reporting failures.
    pub fn remove(self) -> Result<()> {
        self.file.close()?;
        Ok(())
    }
}
