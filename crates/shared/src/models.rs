use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A listing as returned by the external store. Never edited by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub neighborhood: Option<String>,
    pub property_type: String,
    pub price: f64,
    pub beds: f64,
    pub baths: f64,
    #[serde(default)]
    pub sqft: Option<f64>,
    #[serde(default)]
    pub year_built: Option<i32>,
    #[serde(default)]
    pub has_parking: bool,
    #[serde(default)]
    pub pets_allowed: bool,
    #[serde(default)]
    pub waterfront: bool,
    #[serde(default)]
    pub location: Option<Coordinate>,
    #[serde(default)]
    pub image_keys: Vec<String>,
    #[serde(default)]
    pub listed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    PriceAsc,
    PriceDesc,
    Newest,
    Largest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            created_at: now,
        }
    }

    pub fn assistant(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
            created_at: now,
        }
    }
}

/// Optional hints that enrich an image search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSearchHints {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub beds: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
}
