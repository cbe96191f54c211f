//! Attribute validation capability injected into profiles

/// Decides which attribute keys a profile may store.
///
/// Keys are passed in canonical form. Until the backing registry has been
/// loaded every key is accepted so bootstrap writes are not lost.
pub trait AttributeValidator: Send + Sync {
    fn is_loaded(&self) -> bool;

    fn is_valid(&self, key: &str) -> bool;

    /// Configured default for a key, if any
    fn default_value(&self, _key: &str) -> Option<f64> {
        None
    }

    /// Every key the validator accepts once loaded
    fn known_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn permits(&self, key: &str) -> bool {
        !self.is_loaded() || self.is_valid(key)
    }
}

/// Accepts everything. Used for tools and tests with no registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveValidator;

impl AttributeValidator for PermissiveValidator {
    fn is_loaded(&self) -> bool {
        false
    }

    fn is_valid(&self, _key: &str) -> bool {
        true
    }
}
