//! Timestamps carried by every stored document

use bson::DateTime;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Stamped by every conditional update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// Session creation time; never rewritten
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Metadata for a document first written at `at`
    pub fn created(at: DateTime) -> Self {
        Self {
            created_at: Some(at),
            updated_at: Some(at),
        }
    }
}
