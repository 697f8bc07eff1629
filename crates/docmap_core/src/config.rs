//! Session configuration.

/// Name of the default id generator.
pub const DEFAULT_ID_GENERATOR: &str = "uuid";

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether queries record and reuse field projections per query hash.
    pub use_field_cache: bool,

    /// Whether unread fields of persisted documents are fetched on demand.
    pub lazy_loading: bool,

    /// Name of the id generator assigning ids to inserted documents.
    pub id_generator: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_field_cache: true,
            lazy_loading: true,
            id_generator: DEFAULT_ID_GENERATOR.to_string(),
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the field cache is consulted and updated.
    #[must_use]
    pub const fn use_field_cache(mut self, value: bool) -> Self {
        self.use_field_cache = value;
        self
    }

    /// Sets whether unread fields are loaded lazily.
    #[must_use]
    pub const fn lazy_loading(mut self, value: bool) -> Self {
        self.lazy_loading = value;
        self
    }

    /// Sets the id generator by name (`uuid` or `sequence`).
    #[must_use]
    pub fn id_generator(mut self, name: impl Into<String>) -> Self {
        self.id_generator = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SessionConfig::default();
        assert!(config.use_field_cache);
        assert!(config.lazy_loading);
        assert_eq!(config.id_generator, "uuid");
    }

    #[test]
    fn builder_pattern() {
        let config = SessionConfig::new()
            .use_field_cache(false)
            .lazy_loading(false)
            .id_generator("sequence");

        assert!(!config.use_field_cache);
        assert!(!config.lazy_loading);
        assert_eq!(config.id_generator, "sequence");
    }
}
