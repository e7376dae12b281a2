use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{EntityType, SortValue};
use crate::ValidationError;

/// Attributes the listing payload carries for display only.
const DROPPED_ATTRIBUTES: [&str; 4] = ["id", "displayProperties", "highlightedContent", "fileFormats"];

/// Identifier assigned by the remote catalog, e.g. `EPA-HQ-OAR-2021-0317-0001`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyItemId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A header or detail item with flattened attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: ItemId,
    /// Present for header records; detail records carry it when the payload does.
    pub sort_value: Option<SortValue>,
    pub attributes: Map<String, Value>,
}

impl Record {
    /// Build a record from a raw `attributes` object: display-only keys are
    /// dropped, array values are joined with spaces and the identifier is
    /// copied in under the entity's id attribute.
    pub fn from_attributes(
        entity: EntityType,
        id: ItemId,
        raw: Map<String, Value>,
        sort_key: &str,
    ) -> Self {
        let mut attributes = Map::with_capacity(raw.len() + 1);
        for (name, value) in raw {
            if DROPPED_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            attributes.insert(name, flatten_value(value));
        }
        let sort_value = attributes
            .get(sort_key)
            .and_then(Value::as_str)
            .and_then(|value| SortValue::parse(value).ok());
        attributes.insert(
            String::from(entity.id_attribute()),
            Value::String(id.as_str().to_owned()),
        );

        Self {
            id,
            sort_value,
            attributes,
        }
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

fn flatten_value(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let joined = items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            Value::String(joined)
        }
        other => other,
    }
}

/// A listing item: its identifier, sort-attribute value and attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderItem {
    pub id: ItemId,
    pub sort_value: SortValue,
    pub attributes: Map<String, Value>,
}

impl HeaderItem {
    pub fn into_record(self) -> Record {
        Record {
            id: self.id,
            sort_value: Some(self.sort_value),
            attributes: self.attributes,
        }
    }
}

impl TryFrom<Record> for HeaderItem {
    type Error = Record;

    /// Fails, handing the record back, when it has no sort value.
    fn try_from(record: Record) -> Result<Self, Self::Error> {
        match record.sort_value {
            Some(sort_value) => Ok(Self {
                id: record.id,
                sort_value,
                attributes: record.attributes,
            }),
            None => Err(record),
        }
    }
}
