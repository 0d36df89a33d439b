//! Destination resolution.
//!
//! Maps the destination labels carried on records and schedules to
//! configured server profiles. Resolution failures surface as
//! `UnknownDestination` outcomes rather than panics so a missing profile
//! only fails the records that reference it.

use std::collections::HashMap;

use airqod_core::ServerProfile;
use tracing::warn;

/// Lookup table of configured destination servers.
#[derive(Debug, Clone, Default)]
pub struct DestinationResolver {
    servers: HashMap<String, ServerProfile>,
}

impl DestinationResolver {
    /// Builds a resolver from configured profiles.
    ///
    /// Later profiles with a duplicate name replace earlier ones; the
    /// replacement is logged since it usually points at a config mistake.
    pub fn new(profiles: impl IntoIterator<Item = ServerProfile>) -> Self {
        let mut servers = HashMap::new();
        for profile in profiles {
            if servers.insert(profile.name.clone(), profile.clone()).is_some() {
                warn!(server = %profile.name, "duplicate server profile, keeping the last one");
            }
        }
        Self { servers }
    }

    /// Looks up a profile by destination label.
    pub fn resolve(&self, name: &str) -> Option<&ServerProfile> {
        self.servers.get(name)
    }

    /// Names of all configured destinations, for diagnostics.
    pub fn known_destinations(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    /// Joins a profile's base URL with a record's URL suffix.
    pub fn endpoint_url(profile: &ServerProfile, suffix: &str) -> String {
        if suffix.is_empty() {
            return profile.base_url.clone();
        }
        let base = profile.base_url.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        format!("{base}/{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use airqod_core::AuthMethod;

    use super::*;

    fn profile(name: &str, base_url: &str) -> ServerProfile {
        ServerProfile { name: name.into(), base_url: base_url.into(), auth: AuthMethod::None }
    }

    #[test]
    fn resolves_configured_servers() {
        let resolver = DestinationResolver::new([
            profile("dhis2", "https://hmis.example.org/api"),
            profile("serverA", "https://replica.example.org/api"),
        ]);

        assert_eq!(resolver.resolve("dhis2").unwrap().base_url, "https://hmis.example.org/api");
        assert!(resolver.resolve("missing").is_none());
    }

    #[test]
    fn url_join_normalizes_slashes() {
        let p = profile("dhis2", "https://hmis.example.org/api/");
        assert_eq!(
            DestinationResolver::endpoint_url(&p, "/dataValueSets"),
            "https://hmis.example.org/api/dataValueSets"
        );
        assert_eq!(DestinationResolver::endpoint_url(&p, ""), "https://hmis.example.org/api/");
    }

    #[test]
    fn duplicate_profiles_keep_the_last() {
        let resolver = DestinationResolver::new([
            profile("dhis2", "https://first.example.org"),
            profile("dhis2", "https://second.example.org"),
        ]);
        assert_eq!(resolver.resolve("dhis2").unwrap().base_url, "https://second.example.org");
    }
}
