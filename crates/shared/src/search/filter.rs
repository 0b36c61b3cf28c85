use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::{Coordinate, SortBy};

const DROPPED_PROPERTY_TYPE: &str = "house";
const MIN_POLYGON_VERTICES: usize = 3;

const STATE_CODES: &[(&str, &str)] = &[
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("district of columbia", "DC"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
];

/// Structured search intent. Every field is independently optional.
///
/// Extraction models tend to fill unspecified numerics with `0` and booleans with
/// `false`; the accessors fold those defaults to "absent" so only real constraints reach
/// the query compiler. A request for "no parking" therefore cannot be expressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhoods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_beds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_beds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_baths: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sqft: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sqft: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_year_built: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_parking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pets_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waterfront: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<Coordinate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
}

impl FilterSpec {
    pub fn city(&self) -> &[String] {
        non_empty_list(&self.city)
    }

    pub fn state(&self) -> &[String] {
        non_empty_list(&self.state)
    }

    pub fn neighborhoods(&self) -> &[String] {
        non_empty_list(&self.neighborhoods)
    }

    pub fn types(&self) -> &[String] {
        non_empty_list(&self.types)
    }

    pub fn min_price(&self) -> Option<f64> {
        positive(self.min_price)
    }

    pub fn max_price(&self) -> Option<f64> {
        positive(self.max_price)
    }

    pub fn min_beds(&self) -> Option<f64> {
        positive(self.min_beds)
    }

    pub fn max_beds(&self) -> Option<f64> {
        positive(self.max_beds)
    }

    pub fn min_baths(&self) -> Option<f64> {
        positive(self.min_baths)
    }

    pub fn min_sqft(&self) -> Option<f64> {
        positive(self.min_sqft)
    }

    pub fn max_sqft(&self) -> Option<f64> {
        positive(self.max_sqft)
    }

    pub fn min_year_built(&self) -> Option<i32> {
        self.min_year_built.filter(|year| *year > 0)
    }

    pub fn has_parking(&self) -> bool {
        self.has_parking.unwrap_or(false)
    }

    pub fn pets_allowed(&self) -> bool {
        self.pets_allowed.unwrap_or(false)
    }

    pub fn waterfront(&self) -> bool {
        self.waterfront.unwrap_or(false)
    }

    pub fn polygon(&self) -> Option<&[Coordinate]> {
        self.polygon
            .as_deref()
            .filter(|vertices| vertices.len() >= MIN_POLYGON_VERTICES)
    }

    pub fn sort_by(&self) -> Option<SortBy> {
        self.sort_by
    }

    pub fn is_unconstrained(&self) -> bool {
        let normalized = FilterSpec {
            sort_by: None,
            ..self.normalize()
        };
        normalized == FilterSpec::default()
    }

    /// Canonical form of a raw extraction draft. Pure and idempotent.
    pub fn normalize(&self) -> FilterSpec {
        FilterSpec {
            city: canonical_tokens(self.city(), |token| Some(token)),
            state: canonical_tokens(self.state(), |token| Some(canonical_state(&token))),
            neighborhoods: canonical_tokens(self.neighborhoods(), |token| Some(token)),
            types: canonical_tokens(self.types(), canonical_property_type),
            min_price: self.min_price(),
            max_price: self.max_price(),
            min_beds: self.min_beds(),
            max_beds: self.max_beds(),
            min_baths: self.min_baths(),
            min_sqft: self.min_sqft(),
            max_sqft: self.max_sqft(),
            min_year_built: self.min_year_built(),
            has_parking: self.has_parking().then_some(true),
            pets_allowed: self.pets_allowed().then_some(true),
            waterfront: self.waterfront().then_some(true),
            polygon: self.polygon().and_then(canonical_polygon),
            sort_by: self.sort_by,
        }
    }
}

fn non_empty_list(value: &Option<Vec<String>>) -> &[String] {
    value.as_deref().unwrap_or(&[])
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite() && *value > 0.0)
}

fn canonical_tokens<F>(values: &[String], map: F) -> Option<Vec<String>>
where
    F: Fn(String) -> Option<String>,
{
    let mut canonical: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let token = value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if token.is_empty() {
            continue;
        }
        let Some(mapped) = map(token).filter(|mapped| !mapped.is_empty()) else {
            continue;
        };
        if !canonical.contains(&mapped) {
            canonical.push(mapped);
        }
    }

    if canonical.is_empty() {
        None
    } else {
        Some(canonical)
    }
}

fn canonical_state(token: &str) -> String {
    let token = token.trim_end_matches('.');
    STATE_CODES
        .iter()
        .find(|(name, code)| *name == token || code.eq_ignore_ascii_case(token))
        .map(|(_, code)| (*code).to_string())
        .unwrap_or_else(|| token.to_string())
}

fn canonical_property_type(token: String) -> Option<String> {
    let singular = match token.strip_suffix('s') {
        Some(stem) if !stem.ends_with('s') && !stem.is_empty() => stem.to_string(),
        _ => token,
    };

    if singular == DROPPED_PROPERTY_TYPE {
        None
    } else {
        Some(singular)
    }
}

fn canonical_polygon(vertices: &[Coordinate]) -> Option<Vec<Coordinate>> {
    let valid = vertices.iter().all(|vertex| {
        vertex.lat.is_finite()
            && vertex.lng.is_finite()
            && (-90.0..=90.0).contains(&vertex.lat)
            && (-180.0..=180.0).contains(&vertex.lng)
    });
    valid.then(|| vertices.to_vec())
}
