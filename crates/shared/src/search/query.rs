use serde::Serialize;

use crate::models::{Coordinate, Listing};
use crate::search::filter::FilterSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    City,
    State,
    Neighborhood,
    PropertyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    Price,
    Beds,
    Baths,
    Sqft,
    YearBuilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagField {
    HasParking,
    PetsAllowed,
    Waterfront,
}

/// Store-agnostic listing predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    All,
    And { clauses: Vec<Predicate> },
    Or { clauses: Vec<Predicate> },
    /// Case-insensitive substring match. `needle` is stored lower-cased.
    Contains { field: TextField, needle: String },
    Range {
        field: NumericField,
        min: Option<f64>,
        max: Option<f64>,
    },
    Flag { field: FlagField },
    WithinPolygon { vertices: Vec<Coordinate> },
}

impl Predicate {
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        match self {
            Self::All => true,
            Self::And { clauses } => clauses.iter().all(|clause| clause.matches(listing)),
            Self::Or { clauses } => clauses.iter().any(|clause| clause.matches(listing)),
            Self::Contains { field, needle } => text_value(listing, *field)
                .is_some_and(|value| value.to_lowercase().contains(needle.as_str())),
            Self::Range { field, min, max } => {
                numeric_value(listing, *field).is_some_and(|value| {
                    min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max)
                })
            }
            Self::Flag { field } => flag_value(listing, *field),
            Self::WithinPolygon { vertices } => listing
                .location
                .is_some_and(|point| point_in_polygon(point, vertices)),
        }
    }
}

/// Compiles a filter into a conjunction of per-field constraints. Absent fields add
/// nothing; an empty filter yields [`Predicate::All`].
pub fn compile(filter: &FilterSpec) -> Predicate {
    let mut clauses = Vec::new();

    push_any_of(&mut clauses, TextField::City, filter.city());
    push_any_of(&mut clauses, TextField::State, filter.state());
    push_any_of(&mut clauses, TextField::Neighborhood, filter.neighborhoods());
    push_any_of(&mut clauses, TextField::PropertyType, filter.types());

    push_range(&mut clauses, NumericField::Price, filter.min_price(), filter.max_price());
    push_range(&mut clauses, NumericField::Beds, filter.min_beds(), filter.max_beds());
    push_range(&mut clauses, NumericField::Baths, filter.min_baths(), None);
    push_range(&mut clauses, NumericField::Sqft, filter.min_sqft(), filter.max_sqft());
    push_range(
        &mut clauses,
        NumericField::YearBuilt,
        filter.min_year_built().map(f64::from),
        None,
    );

    for (field, enabled) in [
        (FlagField::HasParking, filter.has_parking()),
        (FlagField::PetsAllowed, filter.pets_allowed()),
        (FlagField::Waterfront, filter.waterfront()),
    ] {
        if enabled {
            clauses.push(Predicate::Flag { field });
        }
    }

    if let Some(vertices) = filter.polygon() {
        clauses.push(Predicate::WithinPolygon {
            vertices: vertices.to_vec(),
        });
    }

    match clauses.len() {
        0 => Predicate::All,
        1 => clauses.remove(0),
        _ => Predicate::And { clauses },
    }
}

fn push_any_of(clauses: &mut Vec<Predicate>, field: TextField, values: &[String]) {
    let mut alternatives = values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|needle| !needle.is_empty())
        .map(|needle| Predicate::Contains { field, needle })
        .collect::<Vec<_>>();

    match alternatives.len() {
        0 => {}
        1 => clauses.push(alternatives.remove(0)),
        _ => clauses.push(Predicate::Or {
            clauses: alternatives,
        }),
    }
}

fn push_range(clauses: &mut Vec<Predicate>, field: NumericField, min: Option<f64>, max: Option<f64>) {
    if min.is_some() || max.is_some() {
        clauses.push(Predicate::Range { field, min, max });
    }
}

fn text_value(listing: &Listing, field: TextField) -> Option<&str> {
    match field {
        TextField::City => Some(listing.city.as_str()),
        TextField::State => Some(listing.state.as_str()),
        TextField::Neighborhood => listing.neighborhood.as_deref(),
        TextField::PropertyType => Some(listing.property_type.as_str()),
    }
}

fn numeric_value(listing: &Listing, field: NumericField) -> Option<f64> {
    match field {
        NumericField::Price => Some(listing.price),
        NumericField::Beds => Some(listing.beds),
        NumericField::Baths => Some(listing.baths),
        NumericField::Sqft => listing.sqft,
        NumericField::YearBuilt => listing.year_built.map(f64::from),
    }
}

fn flag_value(listing: &Listing, field: FlagField) -> bool {
    match field {
        FlagField::HasParking => listing.has_parking,
        FlagField::PetsAllowed => listing.pets_allowed,
        FlagField::Waterfront => listing.waterfront,
    }
}

// Even-odd ray casting on lat/lng treated as planar coordinates.
fn point_in_polygon(point: Coordinate, vertices: &[Coordinate]) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut previous = vertices[vertices.len() - 1];
    for current in vertices {
        let crosses = (current.lat > point.lat) != (previous.lat > point.lat);
        if crosses {
            let intersect_lng = (previous.lng - current.lng) * (point.lat - current.lat)
                / (previous.lat - current.lat)
                + current.lng;
            if point.lng < intersect_lng {
                inside = !inside;
            }
        }
        previous = *current;
    }
    inside
}
