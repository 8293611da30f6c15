//! Mapping conventions.
//!
//! A [`ConventionPack`] decides, per type, how element names are derived,
//! which member becomes the document identifier, and the default
//! ignore-null/ignore-default behavior. Packs are partial: merging fills
//! only the slots the higher-priority pack left empty, so resolution is
//! explicit builder settings → the pack registered for the type → the
//! default pack.

use parking_lot::Mutex;
use tracing::debug;

/// How member names are turned into element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingStyle {
    /// Use the member name unchanged.
    AsIs,
    /// `first_name` becomes `firstName`.
    CamelCase,
    /// `firstName` becomes `first_name`.
    SnakeCase,
    /// Lowercase the member name.
    LowerCase,
}

impl NamingStyle {
    /// Apply the style to a member name.
    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::AsIs => name.to_string(),
            Self::CamelCase => {
                let mut out = String::with_capacity(name.len());
                let mut upper_next = false;
                for (i, ch) in name.chars().enumerate() {
                    if ch == '_' {
                        upper_next = i > 0;
                    } else if upper_next {
                        out.extend(ch.to_uppercase());
                        upper_next = false;
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
            Self::SnakeCase => {
                let mut out = String::with_capacity(name.len());
                for (i, ch) in name.chars().enumerate() {
                    if ch.is_uppercase() {
                        if i > 0 {
                            out.push('_');
                        }
                        out.extend(ch.to_lowercase());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
            Self::LowerCase => name.to_lowercase(),
        }
    }
}

/// How type identity is written into documents for polymorphic hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscriminatorStyle {
    /// A single string naming the concrete type.
    Scalar,
    /// An array of discriminators from the root type to the concrete type.
    Hierarchical,
}

/// A partial set of mapping conventions.
///
/// Empty slots fall through to the next pack in the resolution chain.
#[derive(Debug, Clone, Default)]
pub struct ConventionPack {
    /// Element naming style.
    pub element_naming: Option<NamingStyle>,
    /// Member names that qualify as the document identifier.
    pub id_candidates: Option<Vec<String>>,
    /// Whether null members are skipped during serialization.
    pub ignore_if_null: Option<bool>,
    /// Whether members equal to their declared default are skipped.
    pub ignore_if_default: Option<bool>,
    /// Discriminator style for types without an explicit setting.
    pub discriminator_style: Option<DiscriminatorStyle>,
    /// Element name used for the discriminator.
    pub discriminator_element: Option<String>,
}

impl ConventionPack {
    /// Create an empty pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in defaults: as-is naming, `id`/`Id`/`_id` identifier
    /// candidates, nothing ignored, scalar discriminators under `_t`.
    pub fn standard() -> Self {
        Self {
            element_naming: Some(NamingStyle::AsIs),
            id_candidates: Some(vec![
                "id".to_string(),
                "Id".to_string(),
                "_id".to_string(),
            ]),
            ignore_if_null: Some(false),
            ignore_if_default: Some(false),
            discriminator_style: Some(DiscriminatorStyle::Scalar),
            discriminator_element: Some("_t".to_string()),
        }
    }

    /// Set the element naming style.
    pub fn element_naming(mut self, style: NamingStyle) -> Self {
        self.element_naming = Some(style);
        self
    }

    /// Set the identifier candidate names.
    pub fn id_candidates(mut self, candidates: Vec<String>) -> Self {
        self.id_candidates = Some(candidates);
        self
    }

    /// Set whether null members are skipped.
    pub fn ignore_if_null(mut self, ignore: bool) -> Self {
        self.ignore_if_null = Some(ignore);
        self
    }

    /// Set whether members equal to their default are skipped.
    pub fn ignore_if_default(mut self, ignore: bool) -> Self {
        self.ignore_if_default = Some(ignore);
        self
    }

    /// Set the discriminator style.
    pub fn discriminator_style(mut self, style: DiscriminatorStyle) -> Self {
        self.discriminator_style = Some(style);
        self
    }

    /// Set the discriminator element name.
    pub fn discriminator_element(mut self, name: impl Into<String>) -> Self {
        self.discriminator_element = Some(name.into());
        self
    }

    /// Fill empty slots from a fallback pack. Slots already set win.
    pub fn merge(mut self, fallback: &ConventionPack) -> Self {
        if self.element_naming.is_none() {
            self.element_naming = fallback.element_naming;
        }
        if self.id_candidates.is_none() {
            self.id_candidates = fallback.id_candidates.clone();
        }
        if self.ignore_if_null.is_none() {
            self.ignore_if_null = fallback.ignore_if_null;
        }
        if self.ignore_if_default.is_none() {
            self.ignore_if_default = fallback.ignore_if_default;
        }
        if self.discriminator_style.is_none() {
            self.discriminator_style = fallback.discriminator_style;
        }
        if self.discriminator_element.is_none() {
            self.discriminator_element = fallback.discriminator_element.clone();
        }
        self
    }

    /// Resolve into a complete convention set, using the built-in standard
    /// pack for anything still missing.
    pub fn resolve(self) -> ResolvedConventions {
        let full = self.merge(&Self::standard());
        ResolvedConventions {
            element_naming: full.element_naming.unwrap_or(NamingStyle::AsIs),
            id_candidates: full.id_candidates.unwrap_or_default(),
            ignore_if_null: full.ignore_if_null.unwrap_or(false),
            ignore_if_default: full.ignore_if_default.unwrap_or(false),
            discriminator_style: full
                .discriminator_style
                .unwrap_or(DiscriminatorStyle::Scalar),
            discriminator_element: full
                .discriminator_element
                .unwrap_or_else(|| "_t".to_string()),
        }
    }
}

/// A fully resolved convention set, every slot filled.
#[derive(Debug, Clone)]
pub struct ResolvedConventions {
    /// Element naming style.
    pub element_naming: NamingStyle,
    /// Member names that qualify as the document identifier.
    pub id_candidates: Vec<String>,
    /// Whether null members are skipped during serialization.
    pub ignore_if_null: bool,
    /// Whether members equal to their declared default are skipped.
    pub ignore_if_default: bool,
    /// Discriminator style.
    pub discriminator_style: DiscriminatorStyle,
    /// Element name used for the discriminator.
    pub discriminator_element: String,
}

struct RegisteredPack {
    name: String,
    type_name_prefix: String,
    pack: ConventionPack,
}

/// Named convention packs with a type-name filter, checked in registration
/// order; the first matching pack wins, merged over the default pack.
pub struct ConventionRegistry {
    inner: Mutex<ConventionRegistryInner>,
}

struct ConventionRegistryInner {
    packs: Vec<RegisteredPack>,
    default_pack: ConventionPack,
}

impl ConventionRegistry {
    /// Create a registry with the standard default pack.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ConventionRegistryInner {
                packs: Vec::new(),
                default_pack: ConventionPack::standard(),
            }),
        }
    }

    /// Register a named pack for types whose name starts with the prefix.
    pub fn register(
        &self,
        name: impl Into<String>,
        type_name_prefix: impl Into<String>,
        pack: ConventionPack,
    ) {
        let name = name.into();
        let type_name_prefix = type_name_prefix.into();
        debug!(pack = %name, prefix = %type_name_prefix, "convention pack registered");
        self.inner.lock().packs.push(RegisteredPack {
            name,
            type_name_prefix,
            pack,
        });
    }

    /// Replace the default pack (merged over the built-in standard pack).
    pub fn set_default(&self, pack: ConventionPack) {
        self.inner.lock().default_pack = pack.merge(&ConventionPack::standard());
    }

    /// Resolve the conventions to apply for a type name.
    pub fn resolve_for(&self, type_name: &str) -> ResolvedConventions {
        let inner = self.inner.lock();
        let matched = inner
            .packs
            .iter()
            .find(|p| type_name.starts_with(&p.type_name_prefix))
            .map(|p| {
                debug!(pack = %p.name, ty = %type_name, "convention pack matched");
                p.pack.clone()
            })
            .unwrap_or_default();
        matched.merge(&inner.default_pack).resolve()
    }
}

impl Default for ConventionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
