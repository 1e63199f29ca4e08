//! Versioned archive URL resolution.

use url::Url;

use crate::error::{TapError, TapResult};

/// Placeholder substituted with the schema version in source templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Google Cloud Storage: gs://sdm-schemas/w.2025.43.tar.gz
    Gcs { bucket: String, object: String },
    /// HTTP(S): https://github.com/lsst/sdm_schemas/archive/refs/tags/w.2025.43.tar.gz
    Http { url: Url },
}

impl ArtifactSource {
    /// Substitute `version` into `template` and parse the result.
    pub fn resolve(template: &str, version: &str) -> TapResult<Self> {
        Self::parse(&render(template, version))
    }

    /// Parse a concrete archive URL.
    ///
    /// Only `gs`, `http` and `https` are accepted; anything else is
    /// rejected before any network activity.
    pub fn parse(url: &str) -> TapResult<Self> {
        let parsed = Url::parse(url).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => TapError::UnsupportedScheme {
                scheme: String::new(),
            },
            other => TapError::InvalidUrl {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;

        match parsed.scheme() {
            "gs" => {
                let bucket = parsed
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| TapError::InvalidUrl {
                        url: url.to_string(),
                        reason: "missing bucket name".to_string(),
                    })?
                    .to_string();
                let object = parsed.path().trim_start_matches('/').to_string();
                if object.is_empty() {
                    return Err(TapError::InvalidUrl {
                        url: url.to_string(),
                        reason: "missing object path".to_string(),
                    });
                }
                Ok(ArtifactSource::Gcs { bucket, object })
            }
            "http" | "https" => Ok(ArtifactSource::Http { url: parsed }),
            other => Err(TapError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ArtifactSource::Gcs { .. } => "gs",
            ArtifactSource::Http { url } if url.scheme() == "http" => "http",
            ArtifactSource::Http { .. } => "https",
        }
    }

    /// The URL in string form, for diagnostics.
    pub fn url(&self) -> String {
        match self {
            ArtifactSource::Gcs { bucket, object } => format!("gs://{bucket}/{object}"),
            ArtifactSource::Http { url } => url.to_string(),
        }
    }
}

/// Replace every `{version}` placeholder in `template`.
pub fn render(template: &str, version: &str) -> String {
    template.replace(VERSION_PLACEHOLDER, version)
}
