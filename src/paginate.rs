//! Cursor-driven listing of every page of a GitHub collection.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::descriptor::Descriptor;
use crate::error::{ApiError, ListingError};
use crate::github::{Page, PageCursor};
use crate::ratelimit::RateLimiter;

/// Walks a paged endpoint to completion, throttled by a [`RateLimiter`].
pub struct Paginator<'a> {
    limiter: &'a RateLimiter,
    per_page: u8,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Paginator<'a> {
    pub fn new(limiter: &'a RateLimiter, per_page: u8) -> Self {
        Self {
            limiter,
            per_page: per_page.max(1),
            cancel: None,
        }
    }

    /// Stop walking pages once `cancel` is raised; what was listed so far is
    /// returned as a successful listing.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false)
    }

    /// Fetch every page of `resource` through `fetch_page`.
    ///
    /// The gate is consulted before each request, so a near-exhausted quota
    /// delays the request that would otherwise be rejected. Descriptors
    /// seen twice (pages shifting while we walk them) are kept only once.
    pub async fn list_all<T, F, Fut>(
        &self,
        resource: &'static str,
        mut fetch_page: F,
    ) -> Result<Vec<T>, ListingError<T>>
    where
        T: Descriptor,
        F: FnMut(PageCursor) -> Fut,
        Fut: Future<Output = Result<Page<T>, ApiError>>,
    {
        let mut cursor = PageCursor::first(self.per_page);
        let mut items: Vec<T> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if self.is_cancelled() {
                info!("Cancelled while listing {} at page {}", resource, cursor.page);
                break;
            }

            self.limiter.throttle().await;

            // The throttle may have slept through a cancellation.
            if self.is_cancelled() {
                info!("Cancelled while listing {} at page {}", resource, cursor.page);
                break;
            }

            debug!("Fetching {} page {}", resource, cursor.page);
            let page = match fetch_page(cursor).await {
                Ok(page) => page,
                Err(source) => {
                    if cursor.page > 1 {
                        warn!(
                            "Listing {} stopped at page {} after {} items: {}",
                            resource,
                            cursor.page,
                            items.len(),
                            source
                        );
                    }
                    return Err(ListingError {
                        resource,
                        page: cursor.page,
                        partial: items,
                        source,
                    });
                }
            };

            if let Some(rate) = page.rate {
                self.limiter.observe(rate);
            }

            for item in page.items {
                match item.key() {
                    Some(key) if !seen.insert(key.clone()) => {
                        debug!("Skipping duplicate {} entry: {}", resource, key);
                    }
                    _ => items.push(item),
                }
            }

            // A next page that does not advance would loop forever.
            if page.next_page == 0 || page.next_page <= cursor.page {
                break;
            }
            cursor.page = page.next_page;
        }

        info!("Listed {} {}", items.len(), resource);
        Ok(items)
    }
}
