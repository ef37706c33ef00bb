//! Image reference parsing.
//!
//! Parses references like `registry.local:5000/vms/builder:v3` into
//! structured components. A canonical reference doubles as the image's
//! subdirectory path inside the local layout, so parsing also validates
//! that every component is safe to use on the filesystem.

use std::path::PathBuf;

use diskferry_core::error::{FerryError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Registry hostname (e.g., "registry.local:5000", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "vms/builder", "library/test-vm")
    pub repository: String,
    /// Tag (e.g., "latest", "v3")
    pub tag: String,
}

impl ImageRef {
    /// Parse an image reference string, applying registry and tag defaults.
    ///
    /// Supports formats:
    /// - `test-vm` → docker.io/library/test-vm:latest
    /// - `test-vm:1.0` → docker.io/library/test-vm:1.0
    /// - `org/test-vm:1.0` → docker.io/org/test-vm:1.0
    /// - `registry.local:5000/org/test-vm:1.0` (unchanged)
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(FerryError::InvalidInput(
                "empty image reference".to_string(),
            ));
        }
        if reference.contains('@') {
            return Err(FerryError::InvalidInput(format!(
                "digest references are not supported: '{}'",
                reference
            )));
        }

        // Split tag on the last colon after the last slash
        let (name, tag) = match reference.rfind('/') {
            Some(slash_pos) => match reference[slash_pos + 1..].rfind(':') {
                Some(colon_pos) => {
                    let colon_pos = slash_pos + 1 + colon_pos;
                    (&reference[..colon_pos], Some(&reference[colon_pos + 1..]))
                }
                None => (reference, None),
            },
            None => match reference.rfind(':') {
                // A trailing all-digit component after ':' with no slash would
                // be a port, but a bare "host:port" is not a valid reference.
                Some(colon_pos) => (&reference[..colon_pos], Some(&reference[colon_pos + 1..])),
                None => (reference, None),
            },
        };

        let (registry, repository) = Self::split_registry_repository(name)?;
        let tag = tag.unwrap_or(DEFAULT_TAG).to_string();

        let parsed = Self {
            registry,
            repository,
            tag,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse a canonical reference: registry, repository and tag must all be
    /// explicit. Used when mapping local layout directories back to
    /// references.
    pub fn parse_canonical(reference: &str) -> Result<Self> {
        let slash_pos = reference.find('/').ok_or_else(|| {
            FerryError::InvalidInput(format!("reference '{}' has no registry", reference))
        })?;
        let first = &reference[..slash_pos];
        if !(first.contains('.') || first.contains(':') || first == "localhost") {
            return Err(FerryError::InvalidInput(format!(
                "reference '{}' has no registry",
                reference
            )));
        }
        if !reference[slash_pos..].contains(':') {
            return Err(FerryError::InvalidInput(format!(
                "reference '{}' has no tag",
                reference
            )));
        }
        Self::parse(reference)
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        // The first component is a registry hostname when it contains a dot
        // or a port, or is "localhost".
        if let Some(slash_pos) = name.find('/') {
            let first = &name[..slash_pos];
            if first.contains('.') || first.contains(':') || first == "localhost" {
                let repo = &name[slash_pos + 1..];
                if repo.is_empty() {
                    return Err(FerryError::InvalidInput(format!(
                        "empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), repo.to_string()));
            }
        }

        // No registry detected — use the default
        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// Reject components that would escape or corrupt the local layout.
    fn validate(&self) -> Result<()> {
        let components = std::iter::once(self.registry.as_str())
            .chain(self.repository.split('/'))
            .chain(std::iter::once(self.tag.as_str()));
        for component in components {
            if component.is_empty() {
                return Err(FerryError::InvalidInput(format!(
                    "empty component in reference '{}'",
                    self
                )));
            }
            if component == "." || component == ".." {
                return Err(FerryError::InvalidInput(format!(
                    "path traversal in reference '{}'",
                    self
                )));
            }
            if component
                .chars()
                .any(|c| c.is_whitespace() || c == '\\' || c == '\0')
            {
                return Err(FerryError::InvalidInput(format!(
                    "invalid character in reference '{}'",
                    self
                )));
            }
        }
        Ok(())
    }

    /// The canonical reference string.
    pub fn full_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }

    /// Relative path of this image inside the local layout root.
    ///
    /// The final path component is `<repo-basename>:<tag>`; repository
    /// namespaces become intermediate directories.
    pub fn to_dir_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.registry);
        let mut components: Vec<&str> = self.repository.split('/').collect();
        let last = components.pop().unwrap_or_default();
        for component in components {
            path.push(component);
        }
        path.push(format!("{}:{}", last, self.tag));
        path
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageRef::parse("test-vm").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/test-vm");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageRef::parse("test-vm:1.0").unwrap();
        assert_eq!(r.repository, "library/test-vm");
        assert_eq!(r.tag, "1.0");
    }

    #[test]
    fn test_parse_custom_registry_with_port() {
        let r = ImageRef::parse("registry.local:5000/vms/builder:v3").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "vms/builder");
        assert_eq!(r.tag, "v3");
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageRef::parse("localhost/test-vm:1.0").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "test-vm");
        assert_eq!(r.tag, "1.0");
    }

    #[test]
    fn test_parse_empty_reference() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("   ").is_err());
    }

    #[test]
    fn test_parse_rejects_digest_reference() {
        let r = ImageRef::parse("test-vm@sha256:abc123");
        assert!(matches!(r, Err(FerryError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        assert!(ImageRef::parse("registry.local/../evil:1.0").is_err());
        assert!(ImageRef::parse("registry.local/repo:..").is_err());
    }

    #[test]
    fn test_parse_rejects_whitespace_component() {
        assert!(ImageRef::parse("registry.local/bad repo:1.0").is_err());
    }

    #[test]
    fn test_full_reference_round_trips() {
        let r = ImageRef::parse("registry.local:5000/vms/builder:v3").unwrap();
        assert_eq!(r.full_reference(), "registry.local:5000/vms/builder:v3");
        assert_eq!(ImageRef::parse(&r.full_reference()).unwrap(), r);
    }

    #[test]
    fn test_display_matches_full_reference() {
        let r = ImageRef::parse("test-vm:1.0").unwrap();
        assert_eq!(format!("{}", r), "docker.io/library/test-vm:1.0");
    }

    #[test]
    fn test_to_dir_path_nests_repository() {
        let r = ImageRef::parse("registry.local:5000/vms/builder:v3").unwrap();
        assert_eq!(
            r.to_dir_path(),
            PathBuf::from("registry.local:5000/vms/builder:v3")
        );

        let r = ImageRef::parse("test-vm:1.0").unwrap();
        assert_eq!(r.to_dir_path(), PathBuf::from("docker.io/library/test-vm:1.0"));
    }

    #[test]
    fn test_parse_canonical_requires_registry_and_tag() {
        assert!(ImageRef::parse_canonical("docker.io/library/test-vm:1.0").is_ok());
        assert!(ImageRef::parse_canonical("library/test-vm:1.0").is_err());
        assert!(ImageRef::parse_canonical("docker.io/library/test-vm").is_err());
    }

    #[test]
    fn test_parse_canonical_round_trips_dir_path() {
        let r = ImageRef::parse("registry.local:5000/vms/builder:v3").unwrap();
        let rel = r.to_dir_path();
        let parsed = ImageRef::parse_canonical(rel.to_str().unwrap()).unwrap();
        assert_eq!(parsed, r);
    }
}
