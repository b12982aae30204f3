//! Rule Discovery
//!
//! Externally implemented rules are registered explicitly in a [`RuleCatalog`]
//! under a namespace and an identifier. A rule directory then selects which
//! catalog entries are active: each file's stem names an identifier, and YAML
//! files may override the rule's slug, discount or skip flag. Files sharing a
//! stem (`SpecialType.rs` next to `SpecialType.yml`) select the rule once.
//!
//! ```yaml
//! # conditions/MoreThanOneProduct.yml
//! slug: more_than_1_products_10
//! discount: 10
//! ```

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    conditions::{ConditionError, ConditionRegistry, Rule},
    items::Item,
};

/// Errors raised while reading a rule directory.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The directory or one of its files could not be read.
    #[error("failed to read rule directory: {0}")]
    Io(#[from] io::Error),

    /// A rule override file was not valid YAML.
    #[error("failed to parse rule overrides in {path}: {source}")]
    Yaml {
        /// Offending file
        path: PathBuf,
        /// Parser error
        source: serde_norway::Error,
    },
}

/// Capability contract for externally implemented rules.
pub trait ConditionRule: Send + Sync {
    /// Decide whether the rule holds for the items.
    fn evaluate(&self, items: &[Item]) -> bool;

    /// Declared slug; the catalog identifier is used when absent.
    fn slug(&self) -> Option<&str> {
        None
    }

    /// Discount percentage contributed when the rule holds.
    fn discount(&self) -> Decimal {
        Decimal::ZERO
    }

    /// Skipped rules are never registered.
    fn skip(&self) -> bool {
        false
    }
}

type RuleFactory = Arc<dyn Fn() -> Arc<dyn ConditionRule> + Send + Sync>;

/// Explicit registration table of rule implementations.
#[derive(Clone, Default)]
pub struct RuleCatalog {
    entries: BTreeMap<(String, String), RuleFactory>,
}

impl fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl RuleCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule type constructed through [`Default`].
    pub fn register<R>(&mut self, namespace: &str, identifier: &str) -> &mut Self
    where
        R: ConditionRule + Default + 'static,
    {
        self.register_factory(namespace, identifier, || -> Arc<dyn ConditionRule> {
            Arc::new(R::default())
        })
    }

    /// Register a rule built by an arbitrary factory.
    pub fn register_factory<F>(
        &mut self,
        namespace: &str,
        identifier: &str,
        factory: F,
    ) -> &mut Self
    where
        F: Fn() -> Arc<dyn ConditionRule> + Send + Sync + 'static,
    {
        self.entries.insert(
            (namespace.to_string(), identifier.to_string()),
            Arc::new(factory),
        );

        self
    }

    /// Whether `identifier` is registered in `namespace`.
    pub fn contains(&self, namespace: &str, identifier: &str) -> bool {
        self.entries
            .contains_key(&(namespace.to_string(), identifier.to_string()))
    }

    /// Identifiers registered in `namespace`, in sorted order.
    pub fn identifiers<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .keys()
            .filter(move |(ns, _)| ns == namespace)
            .map(|(_, identifier)| identifier.as_str())
    }

    fn instantiate(&self, namespace: &str, identifier: &str) -> Option<Arc<dyn ConditionRule>> {
        self.entries
            .get(&(namespace.to_string(), identifier.to_string()))
            .map(|factory| factory())
    }
}

/// Per-rule overrides read from a YAML rule file.
#[derive(Debug, Default, Deserialize)]
struct RuleOverrides {
    slug: Option<String>,
    discount: Option<Decimal>,
    skip: Option<bool>,
}

impl RuleOverrides {
    fn merge(self, later: Self) -> Self {
        Self {
            slug: later.slug.or(self.slug),
            discount: later.discount.or(self.discount),
            skip: later.skip.or(self.skip),
        }
    }
}

impl ConditionRegistry {
    /// Register the catalog rules selected by the files in `directory`.
    ///
    /// Only the top level of the directory is read. A missing directory is not
    /// an error. Files whose stem is not registered in `namespace` are ignored.
    /// Files are grouped by stem and each group registers one rule; the
    /// group's YAML files are merged in sorted order, later keys winning.
    ///
    /// # Errors
    ///
    /// - [`ConditionError::Discovery`] if the directory or an override file
    ///   cannot be read or parsed.
    /// - [`ConditionError::DuplicateSlug`] if a discovered slug is taken.
    pub fn discover(
        &mut self,
        catalog: &RuleCatalog,
        namespace: &str,
        directory: impl AsRef<Path>,
    ) -> Result<&mut Self, ConditionError> {
        let directory = directory.as_ref();

        if !directory.is_dir() {
            debug!(directory = %directory.display(), "rule directory missing; nothing discovered");
            return Ok(self);
        }

        let mut files = fs::read_dir(directory)
            .map_err(DiscoveryError::Io)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, io::Error>>()
            .map_err(DiscoveryError::Io)?;

        files.retain(|path| path.is_file());
        files.sort();

        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

        for path in files {
            let Some(identifier) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            if identifier.starts_with('.') {
                continue;
            }

            groups.entry(identifier.to_string()).or_default().push(path);
        }

        for (identifier, paths) in &groups {
            let Some(rule) = catalog.instantiate(namespace, identifier) else {
                warn!(identifier = identifier.as_str(), namespace, "no registered rule for file");
                continue;
            };

            let overrides = paths
                .iter()
                .try_fold(RuleOverrides::default(), |merged, path| {
                    read_overrides(path).map(|overrides| merged.merge(overrides))
                })?;

            self.register_rule(identifier, rule, overrides)?;
        }

        Ok(self)
    }

    /// Register every catalog rule in `namespace` without reading the filesystem.
    ///
    /// # Errors
    ///
    /// [`ConditionError::DuplicateSlug`] if a rule's slug is taken.
    pub fn register_catalog(
        &mut self,
        catalog: &RuleCatalog,
        namespace: &str,
    ) -> Result<&mut Self, ConditionError> {
        for identifier in catalog.identifiers(namespace) {
            if let Some(rule) = catalog.instantiate(namespace, identifier) {
                self.register_rule(identifier, rule, RuleOverrides::default())?;
            }
        }

        Ok(self)
    }

    fn register_rule(
        &mut self,
        identifier: &str,
        rule: Arc<dyn ConditionRule>,
        overrides: RuleOverrides,
    ) -> Result<(), ConditionError> {
        if overrides.skip.unwrap_or_else(|| rule.skip()) {
            debug!(identifier, "discovered rule skipped");
            return Ok(());
        }

        let slug = overrides
            .slug
            .or_else(|| rule.slug().map(ToString::to_string))
            .unwrap_or_else(|| identifier.to_lowercase());

        let discount = overrides.discount.unwrap_or_else(|| rule.discount());

        self.define(
            slug,
            Rule::new(move |items| rule.evaluate(items)),
            discount,
            false,
        )?;

        Ok(())
    }
}

fn read_overrides(path: &Path) -> Result<RuleOverrides, DiscoveryError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));

    if !is_yaml {
        return Ok(RuleOverrides::default());
    }

    let contents = fs::read_to_string(path)?;

    if contents.trim().is_empty() {
        return Ok(RuleOverrides::default());
    }

    let overrides: Option<RuleOverrides> =
        serde_norway::from_str(&contents).map_err(|source| DiscoveryError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(overrides.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use testresult::TestResult;

    use crate::conditions::Condition;

    use super::*;

    const NAMESPACE: &str = "app::conditions";

    #[derive(Debug, Default)]
    struct MoreThanOneProduct;

    impl ConditionRule for MoreThanOneProduct {
        fn evaluate(&self, items: &[Item]) -> bool {
            items.len() > 1
        }

        fn slug(&self) -> Option<&str> {
            Some("more_than_1_products_10")
        }

        fn discount(&self) -> Decimal {
            dec!(10)
        }
    }

    #[derive(Debug, Default)]
    struct SpecialType;

    impl ConditionRule for SpecialType {
        fn evaluate(&self, items: &[Item]) -> bool {
            items
                .iter()
                .any(|item| item.get("type").and_then(|v| v.as_str()) == Some("special"))
        }

        fn discount(&self) -> Decimal {
            dec!(40)
        }
    }

    #[derive(Debug, Default)]
    struct Skipped;

    impl ConditionRule for Skipped {
        fn evaluate(&self, _items: &[Item]) -> bool {
            true
        }

        fn skip(&self) -> bool {
            true
        }
    }

    fn catalog() -> RuleCatalog {
        let mut catalog = RuleCatalog::new();

        catalog
            .register::<MoreThanOneProduct>(NAMESPACE, "MoreThanOneProduct")
            .register::<SpecialType>(NAMESPACE, "SpecialType")
            .register::<Skipped>(NAMESPACE, "Skipped");

        catalog
    }

    fn slugs(registry: &ConditionRegistry) -> Vec<&str> {
        registry.conditions().iter().map(Condition::slug).collect()
    }

    #[test]
    fn missing_directory_is_noop() -> TestResult {
        let dir = TempDir::new()?;
        let mut registry = ConditionRegistry::new();

        registry.discover(&catalog(), NAMESPACE, dir.path().join("absent"))?;

        assert!(registry.is_empty());

        Ok(())
    }

    #[test]
    fn discovers_registered_files_and_skips_flagged_rules() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("MoreThanOneProduct.rs"), "")?;
        fs::write(dir.path().join("SpecialType.rs"), "")?;
        fs::write(dir.path().join("Skipped.rs"), "")?;
        fs::write(dir.path().join("Unregistered.rs"), "")?;

        let mut registry = ConditionRegistry::new();
        registry.discover(&catalog(), NAMESPACE, dir.path())?;

        assert_eq!(slugs(&registry), ["more_than_1_products_10", "specialtype"]);

        let discounts: Vec<Decimal> = registry
            .conditions()
            .iter()
            .map(Condition::discount)
            .collect();

        assert_eq!(discounts, [dec!(10), dec!(40)]);

        Ok(())
    }

    #[test]
    fn does_not_recurse_into_subdirectories() -> TestResult {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("nested").join("SpecialType.rs"), "")?;

        let mut registry = ConditionRegistry::new();
        registry.discover(&catalog(), NAMESPACE, dir.path())?;

        assert!(registry.is_empty());

        Ok(())
    }

    #[test]
    fn yaml_overrides_take_precedence() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("SpecialType.yml"),
            "slug: special_40\ndiscount: 25\n",
        )?;
        fs::write(dir.path().join("Skipped.yaml"), "skip: false\nslug: revived\n")?;

        let mut registry = ConditionRegistry::new();
        registry.discover(&catalog(), NAMESPACE, dir.path())?;

        assert_eq!(slugs(&registry), ["revived", "special_40"]);
        assert_eq!(
            registry.conditions().get(1).map(Condition::discount),
            Some(dec!(25))
        );

        Ok(())
    }

    #[test]
    fn source_and_yaml_with_one_stem_register_once() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("SpecialType.rs"), "")?;
        fs::write(dir.path().join("SpecialType.yml"), "discount: 25\n")?;

        let mut registry = ConditionRegistry::new();
        registry.discover(&catalog(), NAMESPACE, dir.path())?;

        assert_eq!(slugs(&registry), ["specialtype"]);
        assert_eq!(
            registry.conditions().first().map(Condition::discount),
            Some(dec!(25))
        );

        Ok(())
    }

    #[test]
    fn yaml_files_with_one_stem_merge_in_order() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("SpecialType.yaml"), "slug: special\ndiscount: 5\n")?;
        fs::write(dir.path().join("SpecialType.yml"), "discount: 30\n")?;

        let mut registry = ConditionRegistry::new();
        registry.discover(&catalog(), NAMESPACE, dir.path())?;

        assert_eq!(slugs(&registry), ["special"]);
        assert_eq!(
            registry.conditions().first().map(Condition::discount),
            Some(dec!(30))
        );

        Ok(())
    }

    #[test]
    fn invalid_yaml_is_reported() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("SpecialType.yml"), "discount: [not, a, number\n")?;

        let mut registry = ConditionRegistry::new();
        let result = registry.discover(&catalog(), NAMESPACE, dir.path());

        assert!(matches!(
            result,
            Err(ConditionError::Discovery(DiscoveryError::Yaml { .. }))
        ));

        Ok(())
    }

    #[test]
    fn other_namespaces_are_ignored() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("SpecialType.rs"), "")?;

        let mut registry = ConditionRegistry::new();
        registry.discover(&catalog(), "other", dir.path())?;

        assert!(registry.is_empty());

        Ok(())
    }

    #[test]
    fn discovered_slug_collides_with_defined_slug() -> TestResult {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("SpecialType.rs"), "")?;

        let mut registry = ConditionRegistry::new();
        registry.define_if("specialtype", true, dec!(5))?;

        let result = registry.discover(&catalog(), NAMESPACE, dir.path());

        assert!(matches!(result, Err(ConditionError::DuplicateSlug(_))));

        Ok(())
    }

    #[test]
    fn register_catalog_enumerates_namespace() -> TestResult {
        let mut registry = ConditionRegistry::new();
        registry.register_catalog(&catalog(), NAMESPACE)?;

        assert_eq!(slugs(&registry), ["more_than_1_products_10", "specialtype"]);

        Ok(())
    }

    #[test]
    fn discovered_rule_evaluates_items() -> TestResult {
        let mut registry = ConditionRegistry::new();
        registry.register_catalog(&catalog(), NAMESPACE)?;

        let items = [Item::new().with("type", "special")];
        let matched: Vec<bool> = registry
            .conditions()
            .iter()
            .map(|condition| condition.evaluate(&items))
            .collect();

        assert_eq!(matched, [false, true]);

        Ok(())
    }

    #[test]
    fn catalog_reports_identifiers() {
        let catalog = catalog();

        assert!(catalog.contains(NAMESPACE, "Skipped"));
        assert!(!catalog.contains("other", "Skipped"));
        assert_eq!(
            catalog.identifiers(NAMESPACE).collect::<Vec<_>>(),
            ["MoreThanOneProduct", "Skipped", "SpecialType"]
        );
    }
}
