// src/core/profile.rs

use crate::constants::{CONFIGURATION_DOMAIN, PAYLOAD_ORGANIZATION_KEY};
use crate::core::config::ProfileDefaults;
use crate::core::context::ResolutionContext;
use crate::core::enablement::Resolver;
use crate::core::export::{ExportOptions, ProfileExporter};
use crate::core::manifest::ManifestSource;
use crate::core::persistence::{PersistenceError, SettingsDocument};
use crate::core::settings::ProfileSettings;
use crate::core::value::Value;
use crate::models::{ExportStyle, PayloadType};
use std::path::Path;

/// A profile being edited: its values, the dimensions it resolves under and the state
/// it was last saved in.
#[derive(Debug)]
pub struct Profile {
    pub settings: ProfileSettings,
    pub context: ResolutionContext,
    pub export_style: ExportStyle,
    saved: Option<SettingsDocument>,
}

impl Profile {
    pub fn new(identifier: &str, display_name: &str) -> Self {
        Self {
            settings: ProfileSettings::new(identifier, display_name),
            context: ResolutionContext::default(),
            export_style: ExportStyle::default(),
            saved: None,
        }
    }

    /// Wraps settings that came from elsewhere (an import) with default dimensions.
    pub fn from_settings(settings: ProfileSettings) -> Self {
        Self {
            settings,
            context: ResolutionContext::default(),
            export_style: ExportStyle::default(),
            saved: None,
        }
    }

    /// A fresh profile named `display_name`, its identifier derived from the configured prefix.
    pub fn with_defaults(display_name: &str, defaults: &ProfileDefaults) -> Self {
        let slug: String = display_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let identifier = format!("{}.{}", defaults.identifier_prefix, slug.trim_matches('-'));

        let mut profile = Self::new(&identifier, display_name);
        if let Some(organization) = &defaults.organization {
            profile.settings.set_value(
                PAYLOAD_ORGANIZATION_KEY,
                CONFIGURATION_DOMAIN,
                PayloadType::ManifestsApple,
                0,
                Value::Str(organization.clone()),
            );
        }
        profile.context.set_distribution(defaults.distribution);
        profile.context.set_platforms(defaults.platforms);
        profile.context.set_scope(defaults.scope);
        profile.context.set_disable_optional_keys(defaults.disable_optional_keys);
        profile.export_style = defaults.export_style;
        profile
    }

    pub fn to_document(&self) -> SettingsDocument {
        SettingsDocument {
            distribution: Some(self.context.distribution()),
            platforms: Some(self.context.platforms()),
            scope: Some(self.context.scope()),
            export_style: Some(self.export_style),
            disable_optional_keys: Some(self.context.disable_optional_keys()),
            ..SettingsDocument::capture(&self.settings)
        }
    }

    /// Rebuilds a profile. Dimensions missing from the document (always the case for legacy
    /// documents) keep their defaults.
    pub fn from_document(document: &SettingsDocument) -> Self {
        let mut context = ResolutionContext::default();
        if !document.is_legacy() {
            if let Some(distribution) = document.distribution {
                context.set_distribution(distribution);
            }
            if let Some(platforms) = document.platforms {
                context.set_platforms(platforms);
            }
            if let Some(scope) = document.scope {
                context.set_scope(scope);
            }
            if let Some(disable) = document.disable_optional_keys {
                context.set_disable_optional_keys(disable);
            }
        }
        Self {
            settings: document.restore_settings(),
            context,
            export_style: document
                .export_style
                .filter(|_| !document.is_legacy())
                .unwrap_or_default(),
            saved: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let document = SettingsDocument::read(path)?;
        let mut profile = Self::from_document(&document);
        profile.saved = Some(profile.to_document());
        Ok(profile)
    }

    pub fn save(&mut self, path: &Path) -> Result<(), PersistenceError> {
        let document = self.to_document();
        document.write(path)?;
        self.saved = Some(document);
        Ok(())
    }

    /// Whether the profile differs from what was last loaded or saved.
    pub fn needs_saving(&self) -> bool {
        self.saved.as_ref() != Some(&self.to_document())
    }

    pub fn resolver<'a>(&'a mut self, manifest: &'a dyn ManifestSource) -> Resolver<'a> {
        Resolver::new(manifest, &self.settings, &mut self.context)
    }

    /// An exporter using the profile's export style.
    pub fn exporter<'a>(
        &'a mut self,
        manifest: &'a dyn ManifestSource,
        sign: bool,
        identity: Option<String>,
    ) -> ProfileExporter<'a> {
        let options = ExportOptions {
            style: self.export_style,
            sign,
            identity,
        };
        ProfileExporter::new(manifest, &self.settings, &mut self.context, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{VPN, fixture_manifest, vpn_key};
    use crate::core::enablement::EnableQuery;
    use crate::models::{Distribution, Platforms};
    use tempfile::tempdir;

    #[test]
    fn test_save_load_and_dirty_tracking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vpn.plist");
        let mut profile = Profile::new("com.example.profile", "Example");
        profile.settings.add_payload(VPN, PayloadType::ManifestsApple);
        profile.context.set_distribution(Distribution::Push);
        profile.export_style = ExportStyle::Mcx;
        assert!(profile.needs_saving());

        profile.save(&path).unwrap();
        assert!(!profile.needs_saving());

        let mut loaded = Profile::load(&path).unwrap();
        assert!(!loaded.needs_saving());
        assert_eq!(loaded.context.distribution(), Distribution::Push);
        assert_eq!(loaded.export_style, ExportStyle::Mcx);
        assert_eq!(loaded.settings.payload_count(VPN, PayloadType::ManifestsApple), 1);

        loaded
            .settings
            .set_value("Username", VPN, PayloadType::ManifestsApple, 0, Value::Str("bob".into()));
        assert!(loaded.needs_saving());
    }

    #[test]
    fn test_defaults_shape_a_new_profile() {
        let defaults = ProfileDefaults {
            organization: Some("Example Corp".into()),
            identifier_prefix: "org.acme".into(),
            platforms: Platforms::IOS,
            ..Default::default()
        };
        let mut profile = Profile::with_defaults("Wi-Fi Setup", &defaults);
        assert_eq!(profile.settings.root_identifier(), Some("org.acme.wi-fi-setup"));
        assert_eq!(profile.context.platforms(), Platforms::IOS);

        // The push-only key resolves against the profile's own context.
        let manifest = fixture_manifest();
        profile.settings.add_payload(VPN, PayloadType::ManifestsApple);
        let push_only = vpn_key(&manifest, "PushOnly");
        profile.context.set_distribution(Distribution::Push);
        assert!(profile.resolver(&manifest).is_enabled(push_only, 0, EnableQuery::default()));
    }
}
