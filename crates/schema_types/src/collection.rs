use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SchemaError;
use crate::field::{Field, FieldKind, FieldList, PasswordOptions, TextOptions};

pub type CollectionId = String;

/// Id of the built-in auth collection every project starts with.
pub const USERS_COLLECTION_ID: &str = "_pb_users_auth_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    Base,
    Auth,
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionType::Base => f.write_str("base"),
            CollectionType::Auth => f.write_str("auth"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RuleKind {
    List,
    View,
    Create,
    Update,
    Delete,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::List,
        RuleKind::View,
        RuleKind::Create,
        RuleKind::Update,
        RuleKind::Delete,
    ];

    pub fn key(self) -> &'static str {
        match self {
            RuleKind::List => "listRule",
            RuleKind::View => "viewRule",
            RuleKind::Create => "createRule",
            RuleKind::Update => "updateRule",
            RuleKind::Delete => "deleteRule",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-operation access rules. `None` locks the operation to superusers,
/// `Some("")` opens it to everyone, anything else is a filter expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub list_rule: Option<String>,
    #[serde(default)]
    pub view_rule: Option<String>,
    #[serde(default)]
    pub create_rule: Option<String>,
    #[serde(default)]
    pub update_rule: Option<String>,
    #[serde(default)]
    pub delete_rule: Option<String>,
}

impl RuleSet {
    pub fn locked() -> Self {
        Self::default()
    }

    /// Same expression for every operation.
    pub fn uniform(rule: impl Into<String>) -> Self {
        let rule = rule.into();
        Self {
            list_rule: Some(rule.clone()),
            view_rule: Some(rule.clone()),
            create_rule: Some(rule.clone()),
            update_rule: Some(rule.clone()),
            delete_rule: Some(rule),
        }
    }

    pub fn get(&self, kind: RuleKind) -> Option<&str> {
        match kind {
            RuleKind::List => self.list_rule.as_deref(),
            RuleKind::View => self.view_rule.as_deref(),
            RuleKind::Create => self.create_rule.as_deref(),
            RuleKind::Update => self.update_rule.as_deref(),
            RuleKind::Delete => self.delete_rule.as_deref(),
        }
    }

    pub fn set(&mut self, kind: RuleKind, rule: Option<String>) {
        let slot = match kind {
            RuleKind::List => &mut self.list_rule,
            RuleKind::View => &mut self.view_rule,
            RuleKind::Create => &mut self.create_rule,
            RuleKind::Update => &mut self.update_rule,
            RuleKind::Delete => &mut self.delete_rule,
        };
        *slot = rule;
    }

    pub fn with(mut self, kind: RuleKind, rule: impl Into<String>) -> Self {
        self.set(kind, Some(rule.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleKind, Option<&str>)> + '_ {
        RuleKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionType,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub fields: FieldList,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(flatten)]
    pub rules: RuleSet,
}

impl Collection {
    /// A base collection with the default `id`, `created` and `updated` fields.
    pub fn base(id: impl Into<CollectionId>, name: impl Into<String>) -> Self {
        let mut fields = FieldList::new();
        fields.add(primary_key_field());
        fields.add(Field::autodate("autodate2990389176", "created", true, false));
        fields.add(Field::autodate("autodate3332085495", "updated", true, true));
        Self {
            id: id.into(),
            name: name.into(),
            kind: CollectionType::Base,
            system: false,
            fields,
            indexes: Vec::new(),
            rules: RuleSet::locked(),
        }
    }

    /// An auth collection with the credential fields the backend requires.
    pub fn auth(id: impl Into<CollectionId>, name: impl Into<String>) -> Self {
        let mut collection = Self::base(id, name);
        collection.kind = CollectionType::Auth;
        let fields = [
            Field::new(
                "password901924565",
                "password",
                FieldKind::Password(PasswordOptions {
                    cost: 0,
                    max: 0,
                    min: 8,
                    pattern: String::new(),
                }),
            )
            .with_required(true)
            .with_system(true)
            .with_hidden(true),
            Field::new(
                "text2504183744",
                "tokenKey",
                FieldKind::Text(TextOptions {
                    autogenerate_pattern: "[a-zA-Z0-9]{50}".to_string(),
                    max: 60,
                    min: 30,
                    pattern: String::new(),
                    primary_key: false,
                }),
            )
            .with_required(true)
            .with_system(true)
            .with_hidden(true),
            Field::email("email3885137012", "email")
                .with_required(true)
                .with_system(true),
            Field::boolean("bool1547992806", "emailVisibility").with_system(true),
            Field::boolean("bool256245529", "verified").with_system(true),
        ];
        for (offset, field) in fields.into_iter().enumerate() {
            collection.fields.add_at(1 + offset, field);
        }
        let index_suffix = &collection.id;
        collection.indexes = vec![
            format!(
                "CREATE UNIQUE INDEX `idx_tokenKey_{index_suffix}` ON `{}` (`tokenKey`)",
                collection.name
            ),
            format!(
                "CREATE UNIQUE INDEX `idx_email_{index_suffix}` ON `{}` (`email`) WHERE `email` != ''",
                collection.name
            ),
        ];
        collection
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.add(field);
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.indexes.push(index.into());
        self
    }

    pub fn is_auth(&self) -> bool {
        self.kind == CollectionType::Auth
    }

    /// Matches the stable id exactly or the name case-insensitively.
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id == name_or_id || self.name.eq_ignore_ascii_case(name_or_id)
    }

    /// Structural checks that only need this collection.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::Invalid {
            collection: self.name.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("collection id is empty".to_string()));
        }
        if !is_valid_identifier(&self.name) {
            return Err(invalid(format!("invalid collection name `{}`", self.name)));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.id.trim().is_empty() {
                return Err(invalid(format!("field `{}` has an empty id", field.name)));
            }
            if !is_valid_identifier(&field.name) {
                return Err(invalid(format!("invalid field name `{}`", field.name)));
            }
            if !ids.insert(field.id.as_str()) {
                return Err(invalid(format!("duplicate field id `{}`", field.id)));
            }
            if !names.insert(field.name.to_ascii_lowercase()) {
                return Err(invalid(format!("duplicate field name `{}`", field.name)));
            }
            if let FieldKind::Select(options) = &field.kind {
                if options.values.is_empty() {
                    return Err(invalid(format!("select field `{}` has no values", field.name)));
                }
            }
        }

        if self.indexes.iter().any(|index| index.trim().is_empty()) {
            return Err(invalid("empty index definition".to_string()));
        }

        Ok(())
    }
}

fn primary_key_field() -> Field {
    Field::new(
        "text3208210256",
        "id",
        FieldKind::Text(TextOptions {
            autogenerate_pattern: "[a-z0-9]{15}".to_string(),
            max: 15,
            min: 15,
            pattern: "^[a-z0-9]+$".to_string(),
            primary_key: true,
        }),
    )
    .with_required(true)
    .with_system(true)
}

fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
