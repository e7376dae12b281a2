use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Kind of item the remote catalog serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Dockets,
    Documents,
    Comments,
}

impl EntityType {
    pub const ALL: [Self; 3] = [Self::Dockets, Self::Documents, Self::Comments];

    /// Plural name used in endpoint paths and table names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dockets => "dockets",
            Self::Documents => "documents",
            Self::Comments => "comments",
        }
    }

    /// Attribute under which a flattened record carries its own identifier.
    pub const fn id_attribute(self) -> &'static str {
        match self {
            Self::Dockets => "docketId",
            Self::Documents => "documentId",
            Self::Comments => "commentId",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "docket" | "dockets" => Ok(Self::Dockets),
            "document" | "documents" => Ok(Self::Documents),
            "comment" | "comments" => Ok(Self::Comments),
            _ => Err(ValidationError::InvalidEntity {
                value: value.to_owned(),
            }),
        }
    }
}
