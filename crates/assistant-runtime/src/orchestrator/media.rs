use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use shared::media::{ObjectStore, ObjectStoreError};
use shared::models::Listing;
use shared::single_flight::{SingleFlight, SingleFlightError};

use crate::error::PipelineError;
use crate::observer::PipelineStage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingMedia {
    pub listing_id: String,
    pub urls: Vec<String>,
}

/// Presigns media reads, sharing one object-store call among concurrent requests for
/// the same object key.
pub struct MediaUrlResolver {
    object_store: Arc<dyn ObjectStore>,
    ttl: Duration,
    max_urls_per_listing: usize,
    flights: SingleFlight<String, ObjectStoreError>,
}

impl MediaUrlResolver {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        ttl: Duration,
        max_urls_per_listing: usize,
    ) -> Self {
        Self {
            object_store,
            ttl,
            max_urls_per_listing,
            flights: SingleFlight::new(),
        }
    }

    pub async fn resolve(&self, key: &str) -> Result<String, PipelineError> {
        let object_store = Arc::clone(&self.object_store);
        let ttl = self.ttl;
        let owned_key = key.to_string();
        self.flights
            .run(key, move || async move {
                object_store.presign_read(&owned_key, ttl).await
            })
            .await
            .map_err(|err| match err {
                SingleFlightError::Upstream(err) => PipelineError::object_store(err),
                SingleFlightError::Aborted { reason, .. } => {
                    PipelineError::UpstreamError {
                        stage: PipelineStage::MediaPresign,
                        message: reason,
                    }
                }
            })
    }

    /// Urls for the first images of each listing, in listing order. Listings without
    /// images are omitted.
    pub async fn media_for(&self, listings: &[Listing]) -> Result<Vec<ListingMedia>, PipelineError> {
        let per_listing = listings
            .iter()
            .filter(|listing| !listing.image_keys.is_empty())
            .map(|listing| async move {
                let urls = try_join_all(
                    listing
                        .image_keys
                        .iter()
                        .take(self.max_urls_per_listing)
                        .map(|key| self.resolve(key)),
                )
                .await?;
                Ok::<_, PipelineError>(ListingMedia {
                    listing_id: listing.id.clone(),
                    urls,
                })
            });
        try_join_all(per_listing).await
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight_count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use shared::media::{ObjectStore, ObjectStoreError, ObjectStoreFuture};
    use shared::models::Listing;

    use super::MediaUrlResolver;
    use crate::error::PipelineError;

    struct SlowPresigner {
        calls: AtomicUsize,
    }

    impl ObjectStore for SlowPresigner {
        fn presign_read<'a>(&'a self, key: &'a str, _ttl: Duration) -> ObjectStoreFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                if key.contains("missing") {
                    return Err(ObjectStoreError::InvalidKey(key.to_string()));
                }
                Ok(format!("https://media.example/{key}?sig=x"))
            })
        }
    }

    fn listing(id: &str, keys: &[&str]) -> Listing {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": id,
            "city": "austin",
            "state": "TX",
            "property_type": "condo",
            "price": 1.0,
            "beds": 1.0,
            "baths": 1.0,
            "image_keys": keys,
        }))
        .expect("listing fixture")
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_key_share_a_presign() {
        let presigner = Arc::new(SlowPresigner {
            calls: AtomicUsize::new(0),
        });
        let resolver = MediaUrlResolver::new(presigner.clone(), Duration::from_secs(60), 2);

        let (first, second) = tokio::join!(
            resolver.resolve("listings/a/front.jpg"),
            resolver.resolve("listings/a/front.jpg")
        );
        assert_eq!(first, second);
        assert_eq!(presigner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.in_flight(), 0);
    }

    #[tokio::test]
    async fn media_is_capped_per_listing_and_skips_imageless_listings() {
        let presigner = Arc::new(SlowPresigner {
            calls: AtomicUsize::new(0),
        });
        let resolver = MediaUrlResolver::new(presigner, Duration::from_secs(60), 2);
        let media = resolver
            .media_for(&[
                listing("a", &["a/1.jpg", "a/2.jpg", "a/3.jpg"]),
                listing("b", &[]),
            ])
            .await
            .expect("media should resolve");

        assert_eq!(media.len(), 1);
        assert_eq!(media[0].listing_id, "a");
        assert_eq!(
            media[0].urls,
            vec![
                "https://media.example/a/1.jpg?sig=x".to_string(),
                "https://media.example/a/2.jpg?sig=x".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn presign_failures_surface() {
        let presigner = Arc::new(SlowPresigner {
            calls: AtomicUsize::new(0),
        });
        let resolver = MediaUrlResolver::new(presigner, Duration::from_secs(60), 2);
        let err = resolver
            .media_for(&[listing("a", &["missing/1.jpg"])])
            .await
            .expect_err("presign failure must surface");
        assert!(matches!(err, PipelineError::UpstreamError { .. }));
    }
}
