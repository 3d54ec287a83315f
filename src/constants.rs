// src/constants.rs

/// The name of the application configuration directory (inside the system config dir).
pub const APP_DIR: &str = "profilekit";

/// The name of the application configuration file (inside the config directory).
pub const APP_CONFIG_FILENAME: &str = "config.toml";

/// Current version of the persisted settings document.
pub const SETTINGS_DOCUMENT_VERSION: u64 = 1;

/// The synthetic domain holding the profile-level metadata.
pub const CONFIGURATION_DOMAIN: &str = "com.apple.general";

/// `PayloadType` literal of a configuration profile root.
pub const ROOT_PAYLOAD_TYPE: &str = "Configuration";

/// `PayloadType` literal of a Managed Preferences (MCX) wrapped payload.
pub const MCX_PAYLOAD_TYPE: &str = "com.apple.ManagedClient.preferences";

/// Key under the domain dictionary of an MCX payload.
pub const MCX_FORCED_KEY: &str = "Forced";

/// Key holding the preference settings inside a `Forced` entry.
pub const MCX_SETTINGS_KEY: &str = "mcx_preference_settings";

/// Internal bookkeeping key marking a payload instance as enabled. Never exported.
pub const PAYLOAD_ENABLED_KEY: &str = "payloadEnabled";

pub const PAYLOAD_TYPE_KEY: &str = "PayloadType";
pub const PAYLOAD_VERSION_KEY: &str = "PayloadVersion";
pub const PAYLOAD_IDENTIFIER_KEY: &str = "PayloadIdentifier";
pub const PAYLOAD_UUID_KEY: &str = "PayloadUUID";
pub const PAYLOAD_DISPLAY_NAME_KEY: &str = "PayloadDisplayName";
pub const PAYLOAD_DESCRIPTION_KEY: &str = "PayloadDescription";
pub const PAYLOAD_ORGANIZATION_KEY: &str = "PayloadOrganization";
pub const PAYLOAD_CONTENT_KEY: &str = "PayloadContent";
pub const PAYLOAD_SCOPE_KEY: &str = "PayloadScope";

/// Keys that stay on the payload itself when its settings are wrapped for MCX delivery
/// or stripped for a plain per-domain plist.
pub const RESERVED_PAYLOAD_KEYS: &[&str] = &[
    PAYLOAD_TYPE_KEY,
    PAYLOAD_VERSION_KEY,
    PAYLOAD_IDENTIFIER_KEY,
    PAYLOAD_UUID_KEY,
    PAYLOAD_DISPLAY_NAME_KEY,
    PAYLOAD_DESCRIPTION_KEY,
    PAYLOAD_ORGANIZATION_KEY,
    PAYLOAD_ENABLED_KEY,
];
