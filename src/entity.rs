//! Domain entities managed by an operator

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;

/// Marker for any entity type an operator manages.
///
/// An entity is the typed form of one watched ConfigMap or custom resource.
/// Equality and hashing define identity inside a desired set, so two
/// resources that convert to equal entities collapse into one entry.
/// Entities that only carry the resource payload should store the name
/// (and namespace) handed to [`set_identity`](Self::set_identity) and include
/// it in `Eq`/`Hash`; otherwise two ConfigMaps with identical payloads
/// become a single desired entity.
pub trait EntityInfo: DeserializeOwned + Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Called by the default converters with the source object's metadata.
    ///
    /// The default ignores it, leaving identity to the payload alone.
    fn set_identity(&mut self, _name: &str, _namespace: Option<&str>) {}
}

/// Type tag of an entity: its display name and owning module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoType {
    /// Simple type name, e.g. `JobInfo`
    pub display_name: String,
    /// Rust module path that declares the type, e.g. `my_operator::jobs`
    pub module_path: String,
}

impl InfoType {
    /// Tag for `T`
    pub fn of<T: ?Sized>() -> Self {
        Self::from_type_name(std::any::type_name::<T>())
    }

    /// Split a fully qualified type name into display name and module path
    pub fn from_type_name(type_name: &str) -> Self {
        // generic arguments carry their own paths, ignore them
        let base = type_name.split('<').next().unwrap_or(type_name);
        match base.rsplit_once("::") {
            Some((module, name)) => Self {
                display_name: name.to_string(),
                module_path: module.to_string(),
            },
            None => Self {
                display_name: base.to_string(),
                module_path: String::new(),
            },
        }
    }

    /// Module path rendered as a DNS-style label prefix.
    ///
    /// `my_operator::jobs` becomes `my-operator.jobs`.
    pub fn package_name(&self) -> String {
        self.module_path
            .split("::")
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(".")
            .replace('_', "-")
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample;

    #[test]
    fn test_info_type_splits_path() {
        let tag = InfoType::from_type_name("my_operator::jobs::JobInfo");
        assert_eq!(tag.display_name, "JobInfo");
        assert_eq!(tag.module_path, "my_operator::jobs");
        assert_eq!(tag.package_name(), "my-operator.jobs");
    }

    #[test]
    fn test_info_type_ignores_generics() {
        let tag = InfoType::from_type_name("a::Wrapper<b::Inner>");
        assert_eq!(tag.display_name, "Wrapper");
        assert_eq!(tag.module_path, "a");
    }

    #[test]
    fn test_info_type_of_local_type() {
        let tag = InfoType::of::<Sample>();
        assert_eq!(tag.display_name, "Sample");
        assert!(tag.module_path.ends_with("entity::tests"));
    }

    #[test]
    fn test_info_type_without_module() {
        let tag = InfoType::from_type_name("u32");
        assert_eq!(tag.display_name, "u32");
        assert_eq!(tag.package_name(), "");
    }
}
