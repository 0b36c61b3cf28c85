use std::cmp::Ordering;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use thiserror::Error;

use crate::models::{Listing, SortBy};
use crate::search::Predicate;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("listing store is unavailable: {0}")]
    Unavailable(String),
    #[error("listing store data is invalid: {0}")]
    InvalidData(String),
    #[error("query vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Inclusive numeric range used by nearest-neighbour filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub fn around(center: f64, below: f64, above: f64) -> Self {
        Self {
            min: (center - below).max(0.0),
            max: center + above,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilters {
    /// Exact, case-insensitive city match.
    pub city: Option<String>,
    /// Exact, case-insensitive property type match.
    pub property_type: Option<String>,
    pub beds: Option<NumericRange>,
    pub price: Option<NumericRange>,
}

impl VectorFilters {
    pub fn accepts(&self, listing: &Listing) -> bool {
        self.city
            .as_deref()
            .is_none_or(|city| listing.city.eq_ignore_ascii_case(city.trim()))
            && self
                .property_type
                .as_deref()
                .is_none_or(|kind| listing.property_type.eq_ignore_ascii_case(kind.trim()))
            && self.beds.is_none_or(|range| range.contains(listing.beds))
            && self.price.is_none_or(|range| range.contains(listing.price))
    }
}

pub trait ListingStore: Send + Sync {
    fn query<'a>(
        &'a self,
        predicate: &'a Predicate,
        limit: usize,
        sort_by: Option<SortBy>,
    ) -> StoreFuture<'a, Vec<Listing>>;

    fn nearest_by_vector<'a>(
        &'a self,
        vector: &'a [f32],
        k: usize,
        filters: &'a VectorFilters,
    ) -> StoreFuture<'a, Vec<Listing>>;
}

/// Listing store over an owned snapshot, evaluating predicates in process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryListingStore {
    listings: Vec<Listing>,
}

impl InMemoryListingStore {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self { listings }
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| StoreError::Unavailable(format!("{}: {err}", path.display())))?;
        let listings = serde_json::from_str::<Vec<Listing>>(&raw)
            .map_err(|err| StoreError::InvalidData(format!("{}: {err}", path.display())))?;
        Ok(Self::new(listings))
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    fn run_query(&self, predicate: &Predicate, limit: usize, sort_by: Option<SortBy>) -> Vec<Listing> {
        let mut matches = self
            .listings
            .iter()
            .filter(|listing| predicate.matches(listing))
            .cloned()
            .collect::<Vec<_>>();

        if let Some(sort_by) = sort_by {
            matches.sort_by(|left, right| compare_for_sort(left, right, sort_by));
        }
        matches.truncate(limit);
        matches
    }

    fn run_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<Listing>, StoreError> {
        let mut scored = Vec::new();
        for listing in &self.listings {
            let Some(embedding) = listing.embedding.as_deref() else {
                continue;
            };
            if !filters.accepts(listing) {
                continue;
            }
            if embedding.len() != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: embedding.len(),
                    actual: vector.len(),
                });
            }
            scored.push((cosine_similarity(vector, embedding), listing));
        }

        scored.sort_by(|left, right| right.0.partial_cmp(&left.0).unwrap_or(Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, listing)| listing.clone())
            .collect())
    }
}

impl ListingStore for InMemoryListingStore {
    fn query<'a>(
        &'a self,
        predicate: &'a Predicate,
        limit: usize,
        sort_by: Option<SortBy>,
    ) -> StoreFuture<'a, Vec<Listing>> {
        Box::pin(async move { Ok(self.run_query(predicate, limit, sort_by)) })
    }

    fn nearest_by_vector<'a>(
        &'a self,
        vector: &'a [f32],
        k: usize,
        filters: &'a VectorFilters,
    ) -> StoreFuture<'a, Vec<Listing>> {
        Box::pin(async move { self.run_nearest(vector, k, filters) })
    }
}

fn compare_for_sort(left: &Listing, right: &Listing, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::PriceAsc => left.price.total_cmp(&right.price),
        SortBy::PriceDesc => right.price.total_cmp(&left.price),
        SortBy::Newest => right.listed_at.cmp(&left.listed_at),
        SortBy::Largest => right
            .sqft
            .unwrap_or(0.0)
            .total_cmp(&left.sqft.unwrap_or(0.0)),
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut left_norm = 0.0_f32;
    let mut right_norm = 0.0_f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}
