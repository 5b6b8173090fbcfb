use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    document::DocumentRef,
    errors::{MapperError, Result},
    value::{Attributes, TYPE_KEY, all_blank, classify, foreign_key_for},
};

/// Shape of a declared association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    BelongsTo,
    Many,
    One,
}

impl AssociationKind {
    pub fn is_singular(self) -> bool {
        !matches!(self, AssociationKind::Many)
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssociationKind::BelongsTo => "belongs_to",
            AssociationKind::Many => "many",
            AssociationKind::One => "one",
        };
        f.write_str(label)
    }
}

/// What happens to referenced members after their owner is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependent {
    /// Load and destroy each member, running its own hooks.
    Destroy,
    /// Bulk delete in storage without loading members.
    DeleteAll,
    /// Clear the foreign key on each member and keep it persisted.
    Nullify,
}

impl FromStr for Dependent {
    type Err = MapperError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim_start_matches(':') {
            "destroy" => Ok(Dependent::Destroy),
            "delete_all" => Ok(Dependent::DeleteAll),
            "nullify" => Ok(Dependent::Nullify),
            other => Err(MapperError::InvalidOption {
                option: "dependent".to_string(),
                message: format!("expected destroy, delete_all or nullify, got `{other}`"),
            }),
        }
    }
}

/// Named function over the loaded members of an association.
pub type ExtensionFn = Arc<dyn Fn(&[DocumentRef]) -> Result<Value> + Send + Sync>;

/// Options accepted by `belongs_to`, `one` and `many`.
#[derive(Clone, Default)]
pub struct AssociationOptions {
    /// Target class name; inferred from the association name when absent.
    pub class_name: Option<String>,
    pub foreign_key: Option<String>,
    /// Polymorphic owner role (`as: :commentable`).
    pub as_role: Option<String>,
    pub polymorphic: bool,
    pub dependent: Option<Dependent>,
    /// Owner attribute holding an array of target ids.
    pub in_field: Option<String>,
    pub extensions: BTreeMap<String, ExtensionFn>,
}

const KNOWN_OPTIONS: [&str; 7] = ["class", "class_name", "foreign_key", "as", "polymorphic", "dependent", "in"];

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    pub fn as_role(mut self, role: impl Into<String>) -> Self {
        self.as_role = Some(role.into());
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn dependent(mut self, dependent: Dependent) -> Self {
        self.dependent = Some(dependent);
        self
    }

    pub fn in_array(mut self, field: impl Into<String>) -> Self {
        self.in_field = Some(field.into());
        self
    }

    pub fn extension<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[DocumentRef]) -> Result<Value> + Send + Sync + 'static,
    {
        self.extensions.insert(name.into(), Arc::new(function));
        self
    }

    /// Parses options from a loosely typed map (config files, payloads).
    ///
    /// Unknown keys are rejected so a typo never silently changes behavior.
    pub fn from_map(map: &Attributes) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "class" | "class_name" => options.class_name = Some(option_string(key, value)?),
                "foreign_key" => options.foreign_key = Some(option_string(key, value)?),
                "as" => options.as_role = Some(option_string(key, value)?),
                "in" => options.in_field = Some(option_string(key, value)?),
                "dependent" => options.dependent = Some(option_string(key, value)?.parse()?),
                "polymorphic" => {
                    options.polymorphic = value.as_bool().ok_or_else(|| MapperError::InvalidOption {
                        option: key.clone(),
                        message: "expected a boolean".to_string(),
                    })?
                }
                other => {
                    return Err(MapperError::InvalidOption {
                        option: other.to_string(),
                        message: format!("unrecognized association option; expected one of {KNOWN_OPTIONS:?}"),
                    });
                }
            }
        }
        Ok(options)
    }
}

fn option_string(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(|s| s.trim_start_matches(':').to_string())
        .ok_or_else(|| MapperError::InvalidOption {
            option: key.to_string(),
            message: "expected a string".to_string(),
        })
}

impl fmt::Debug for AssociationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationOptions")
            .field("class_name", &self.class_name)
            .field("foreign_key", &self.foreign_key)
            .field("as_role", &self.as_role)
            .field("polymorphic", &self.polymorphic)
            .field("dependent", &self.dependent)
            .field("in_field", &self.in_field)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// How the class of an associated document is determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetClass {
    /// Always the named class.
    Static(String),
    /// Read from a stored type field; `base` is used when the field is absent.
    ByStoredType { type_key: String, base: Option<String> },
}

impl TargetClass {
    pub fn base(&self) -> Option<&str> {
        match self {
            TargetClass::Static(name) => Some(name),
            TargetClass::ByStoredType { base, .. } => base.as_deref(),
        }
    }
}

/// Immutable metadata describing one association of one class.
#[derive(Debug, Clone)]
pub struct AssociationDescriptor {
    pub name: String,
    pub kind: AssociationKind,
    /// Class that declared the association.
    pub owner: String,
    pub target: TargetClass,
    pub embedded: bool,
    pub polymorphic: bool,
    /// Field linking owner and target: on the owner for `belongs_to` and
    /// `in`, on the target for referenced `one`/`many`.
    pub foreign_key: Option<String>,
    /// Field holding a class name next to the foreign key (polymorphic roles).
    pub type_key: Option<String>,
    pub options: AssociationOptions,
}

impl AssociationDescriptor {
    /// Builds the descriptor for `owner`'s declaration. `target_embeddable`
    /// reports whether the resolved target class is embeddable; it is `None`
    /// when the target is only known per record.
    pub(crate) fn new(
        kind: AssociationKind,
        name: &str,
        owner: &str,
        options: AssociationOptions,
        target_embeddable: Option<bool>,
    ) -> Result<Self> {
        let embedded = target_embeddable.unwrap_or(false);
        let class_name = options.class_name.clone().unwrap_or_else(|| classify(name));

        if embedded && kind == AssociationKind::BelongsTo {
            return Err(MapperError::InvalidOption {
                option: "class".to_string(),
                message: format!("belongs_to `{name}` cannot target embeddable class {class_name}"),
            });
        }
        if embedded && (options.in_field.is_some() || options.as_role.is_some()) {
            return Err(MapperError::InvalidOption {
                option: if options.in_field.is_some() { "in" } else { "as" }.to_string(),
                message: format!("`{name}` targets embeddable class {class_name}"),
            });
        }
        if options.in_field.is_some() && kind != AssociationKind::Many {
            return Err(MapperError::InvalidOption {
                option: "in".to_string(),
                message: format!("only `many` associations can use `in`, `{name}` is {kind}"),
            });
        }

        let polymorphic = options.polymorphic;
        let (target, foreign_key, type_key) = match kind {
            AssociationKind::BelongsTo => {
                let foreign_key = options.foreign_key.clone().unwrap_or_else(|| format!("{name}_id"));
                if polymorphic {
                    let type_key = format!("{name}_type");
                    let target = TargetClass::ByStoredType {
                        type_key: type_key.clone(),
                        base: None,
                    };
                    (target, Some(foreign_key), Some(type_key))
                } else {
                    (TargetClass::Static(class_name), Some(foreign_key), None)
                }
            }
            AssociationKind::One | AssociationKind::Many if embedded => {
                let target = if polymorphic {
                    TargetClass::ByStoredType {
                        type_key: TYPE_KEY.to_string(),
                        base: Some(class_name),
                    }
                } else {
                    TargetClass::Static(class_name)
                };
                (target, None, None)
            }
            AssociationKind::One | AssociationKind::Many => {
                if let Some(field) = &options.in_field {
                    (TargetClass::Static(class_name), Some(field.clone()), None)
                } else if let Some(role) = &options.as_role {
                    let foreign_key = options.foreign_key.clone().unwrap_or_else(|| format!("{role}_id"));
                    (TargetClass::Static(class_name), Some(foreign_key), Some(format!("{role}_type")))
                } else {
                    let foreign_key = options.foreign_key.clone().unwrap_or_else(|| foreign_key_for(owner));
                    let target = if polymorphic {
                        TargetClass::ByStoredType {
                            type_key: TYPE_KEY.to_string(),
                            base: Some(class_name),
                        }
                    } else {
                        TargetClass::Static(class_name)
                    };
                    (target, Some(foreign_key), None)
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            kind,
            owner: owner.to_string(),
            target,
            embedded,
            polymorphic,
            foreign_key,
            type_key,
            options,
        })
    }

    pub fn is_singular(&self) -> bool {
        self.kind.is_singular()
    }

    pub fn dependent(&self) -> Option<Dependent> {
        self.options.dependent
    }

    /// Whether destroying an owner must cascade into this association.
    pub fn cascades(&self) -> bool {
        self.kind == AssociationKind::Many && !self.embedded && self.options.dependent.is_some()
    }
}

/// Filter for nested elements that would create a new member.
#[derive(Clone)]
pub enum RejectIf {
    /// Skip elements whose every value (besides `_destroy`) is blank.
    AllBlank,
    Predicate(Arc<dyn Fn(&Attributes) -> bool + Send + Sync>),
}

impl RejectIf {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Attributes) -> bool + Send + Sync + 'static,
    {
        RejectIf::Predicate(Arc::new(predicate))
    }

    pub fn rejects(&self, attributes: &Attributes) -> bool {
        match self {
            RejectIf::AllBlank => all_blank(attributes),
            RejectIf::Predicate(predicate) => predicate(attributes),
        }
    }
}

impl fmt::Debug for RejectIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectIf::AllBlank => f.write_str("AllBlank"),
            RejectIf::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl FromStr for RejectIf {
    type Err = MapperError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim_start_matches(':') {
            "all_blank" => Ok(RejectIf::AllBlank),
            other => Err(MapperError::InvalidOption {
                option: "reject_if".to_string(),
                message: format!("expected all_blank, got `{other}`"),
            }),
        }
    }
}

/// Options of `accepts_nested_attributes_for`.
#[derive(Debug, Clone, Default)]
pub struct NestedAttributesOptions {
    pub allow_destroy: bool,
    pub reject_if: Option<RejectIf>,
}

impl NestedAttributesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_destroy(mut self, allow: bool) -> Self {
        self.allow_destroy = allow;
        self
    }

    pub fn reject_if(mut self, reject_if: RejectIf) -> Self {
        self.reject_if = Some(reject_if);
        self
    }

    pub(crate) fn rejects(&self, attributes: &Attributes) -> bool {
        self.reject_if.as_ref().is_some_and(|reject| reject.rejects(attributes))
    }
}
