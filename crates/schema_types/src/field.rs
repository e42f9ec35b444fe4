use serde::{Deserialize, Serialize};

pub type FieldId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub presentable: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// Type tag plus type-specific constraints, serialized flat next to the
/// common field attributes (`"type": "text", "min": 0, ...`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    Text(TextOptions),
    Number(NumberOptions),
    Bool,
    Email(EmailOptions),
    Url(EmailOptions),
    Date(DateOptions),
    Autodate(AutodateOptions),
    Select(SelectOptions),
    Relation(RelationOptions),
    Json(JsonOptions),
    File(FileOptions),
    Password(PasswordOptions),
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text(_) => "text",
            FieldKind::Number(_) => "number",
            FieldKind::Bool => "bool",
            FieldKind::Email(_) => "email",
            FieldKind::Url(_) => "url",
            FieldKind::Date(_) => "date",
            FieldKind::Autodate(_) => "autodate",
            FieldKind::Select(_) => "select",
            FieldKind::Relation(_) => "relation",
            FieldKind::Json(_) => "json",
            FieldKind::File(_) => "file",
            FieldKind::Password(_) => "password",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOptions {
    #[serde(default)]
    pub autogenerate_pattern: String,
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberOptions {
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub only_int: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailOptions {
    #[serde(default)]
    pub except_domains: Option<Vec<String>>,
    #[serde(default)]
    pub only_domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateOptions {
    #[serde(default)]
    pub max: String,
    #[serde(default)]
    pub min: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutodateOptions {
    #[serde(default)]
    pub on_create: bool,
    #[serde(default)]
    pub on_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOptions {
    #[serde(default)]
    pub max_select: u32,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationOptions {
    #[serde(default)]
    pub cascade_delete: bool,
    pub collection_id: String,
    #[serde(default)]
    pub max_select: u32,
    #[serde(default)]
    pub min_select: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOptions {
    #[serde(default)]
    pub max_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOptions {
    #[serde(default)]
    pub max_select: u32,
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub mime_types: Option<Vec<String>>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub thumbs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordOptions {
    #[serde(default)]
    pub cost: u32,
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub pattern: String,
}

impl Field {
    pub fn new(id: impl Into<FieldId>, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hidden: false,
            presentable: false,
            required: false,
            system: false,
            kind,
        }
    }

    pub fn text(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Text(TextOptions::default()))
    }

    pub fn number(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Number(NumberOptions::default()))
    }

    pub fn boolean(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Bool)
    }

    pub fn email(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Email(EmailOptions::default()))
    }

    pub fn date(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Date(DateOptions::default()))
    }

    pub fn autodate(
        id: impl Into<FieldId>,
        name: impl Into<String>,
        on_create: bool,
        on_update: bool,
    ) -> Self {
        Self::new(
            id,
            name,
            FieldKind::Autodate(AutodateOptions {
                on_create,
                on_update,
            }),
        )
    }

    pub fn select<I, S>(id: impl Into<FieldId>, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            id,
            name,
            FieldKind::Select(SelectOptions {
                max_select: 1,
                values: values.into_iter().map(Into::into).collect(),
            }),
        )
    }

    pub fn relation(
        id: impl Into<FieldId>,
        name: impl Into<String>,
        collection_id: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            name,
            FieldKind::Relation(RelationOptions {
                cascade_delete: false,
                collection_id: collection_id.into(),
                max_select: 1,
                min_select: 0,
            }),
        )
    }

    pub fn json(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::Json(JsonOptions::default()))
    }

    pub fn file(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self::new(id, name, FieldKind::File(FileOptions::default()))
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_system(mut self, system: bool) -> Self {
        self.system = system;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Target collection id when this is a relation field.
    pub fn relation_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation(options) => Some(options.collection_id.as_str()),
            _ => None,
        }
    }
}

/// Ordered field list with the backend's positional insert semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldList(Vec<Field>);

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `field` at `pos` (clamped to the list length). A field with
    /// the same id is replaced in place and keeps its current position.
    pub fn add_at(&mut self, pos: usize, field: Field) {
        if let Some(existing) = self.0.iter_mut().find(|f| f.id == field.id) {
            *existing = field;
            return;
        }
        let pos = pos.min(self.0.len());
        self.0.insert(pos, field);
    }

    /// Appends, or replaces in place when the id already exists.
    pub fn add(&mut self, field: Field) {
        let len = self.0.len();
        self.add_at(len, field);
    }

    pub fn remove_by_id(&mut self, id: &str) -> Option<Field> {
        let pos = self.position_of(id)?;
        Some(self.0.remove(pos))
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Field> {
        self.0.iter().find(|f| f.id == id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Field> {
        self.0.iter().find(|f| f.name == name)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.0.iter().position(|f| f.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Field>> for FieldList {
    fn from(fields: Vec<Field>) -> Self {
        Self(fields)
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
