// Organizer policy: maps a request identifier to a cache sub-location.
// Pluggable so callers control the on-disk layout of their cache.

use crate::error::PolicyError;

/// Strategy deciding which sub-directory of the cache root a request's entry
/// lives in.
///
/// Implementations must be deterministic and side-effect free: the same
/// request identifier always maps to the same segment. The returned segment
/// is a single path component; the store sanitizes it before use, so a
/// policy returning separators or traversal sequences fails the request with
/// a policy error rather than escaping the cache root.
pub trait Organizer: Send + Sync {
    fn organize(&self, request: &str) -> Result<String, PolicyError>;
}

/// Plain functions work as organizers, mirroring the usual way a layout
/// policy is passed in.
impl<F> Organizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn organize(&self, request: &str) -> Result<String, PolicyError> {
        Ok(self(request))
    }
}

/// Default policy: every entry lands directly under the cache root.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOrganizer;

impl Organizer for DefaultOrganizer {
    fn organize(&self, _request: &str) -> Result<String, PolicyError> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_organizer_maps_everything_to_root() {
        assert_eq!(DefaultOrganizer.organize("u1").unwrap(), "");
        assert_eq!(DefaultOrganizer.organize("u2").unwrap(), "");
    }

    #[test]
    fn test_closure_organizer() {
        let by_scheme = |request: &str| {
            request.split(':').next().unwrap_or("other").to_string()
        };
        assert_eq!(by_scheme.organize("http://example.com").unwrap(), "http");
        assert_eq!(by_scheme.organize("ftp://example.com").unwrap(), "ftp");
    }
}
