//! Pagination types for page-numbered listing.
//!
//! [`PaginationParams`] selects a page and [`Page`] carries its items together with the total
//! match count and navigation metadata.

use serde::{Deserialize, Serialize};

/// A single page of results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use docmodel::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_count(100)
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// assert_eq!(page.count, 100);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total count of matching items across all pages.
    pub count: u64,
    /// The next page number (if more pages exist).
    pub next_page: Option<u64>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page with custom settings.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Converts every item, keeping the page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }

    /// Fallible [`Page::map`]: the first conversion error is returned.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self
                .items
                .into_iter()
                .map(f)
                .collect::<Result<Vec<_>, E>>()?,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        })
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
pub struct PageBuilder<T> {
    items: Vec<T>,
    count: u64,
    next_page: Option<u64>,
    previous_page: Option<u64>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    /// Sets the total count of items across all pages.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Sets the next page number (or `None` if this is the last page).
    pub fn with_next_page(mut self, next_page: Option<u64>) -> Self {
        self.next_page = next_page;
        self
    }

    /// Sets the previous page number (or `None` if this is the first page).
    pub fn with_previous_page(mut self, previous_page: Option<u64>) -> Self {
        self.previous_page = previous_page;
        self
    }

    /// Builds and returns the final [`Page`] instance.
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Parameters for page-numbered listing.
///
/// Pages are 1-indexed. Values below 1 are raised to 1, so page `0` reads the first page and
/// a page size of `0` reads one item per page.
///
/// # Example
///
/// ```ignore
/// use docmodel::page::PaginationParams;
///
/// let params = PaginationParams::new(2, 50);
/// assert_eq!(params.offset(), 50);
///
/// let clamped = PaginationParams::new(0, 0);
/// assert_eq!((clamped.page, clamped.per_page), (1, 1));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    /// The page number (1-indexed).
    pub page: u64,
    /// Number of items per page.
    pub per_page: u64,
}

impl PaginationParams {
    /// Creates new pagination parameters, raising values below 1 to 1.
    ///
    /// # Arguments
    ///
    /// * `page` - The page number (1-indexed)
    /// * `per_page` - Number of items per page
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page: page.max(1), per_page: per_page.max(1) }
    }

    /// Creates a new builder for constructing pagination parameters.
    pub fn builder() -> PaginationParamsBuilder {
        PaginationParamsBuilder::new()
    }

    /// Number of items to skip for this page.
    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page.max(1))
    }

    /// Wraps one page of items fetched with these parameters.
    ///
    /// `total` is the number of matching items across all pages.
    pub fn page_of<T>(&self, items: Vec<T>, total: u64) -> Page<T> {
        let end = self.offset() + items.len() as u64;

        Page::builder(items)
            .with_count(total)
            .with_next_page((end < total).then(|| self.page + 1))
            .with_previous_page((self.page > 1).then(|| self.page - 1))
            .build()
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

/// Builder for constructing [`PaginationParams`] instances.
pub struct PaginationParamsBuilder {
    page: Option<u64>,
    per_page: Option<u64>,
}

impl PaginationParamsBuilder {
    /// Creates a new builder with no parameters set.
    pub fn new() -> Self {
        Self { page: None, per_page: None }
    }

    /// Sets the page number (1-indexed).
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the number of items per page.
    pub fn with_per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Builds and returns the [`PaginationParams`].
    ///
    /// Uses defaults for any unset values (page=1, per_page=10).
    pub fn build(self) -> PaginationParams {
        PaginationParams::new(self.page.unwrap_or(1), self.per_page.unwrap_or(10))
    }
}

impl Default for PaginationParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_below_one_are_clamped() {
        let params = PaginationParams::new(0, 0);
        assert_eq!(params, PaginationParams { page: 1, per_page: 1 });
        assert_eq!(params.offset(), 0);

        let built = PaginationParams::builder().with_page(0).build();
        assert_eq!(built, PaginationParams { page: 1, per_page: 10 });
    }

    #[test]
    fn offset_skips_previous_pages() {
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
    }

    #[test]
    fn page_navigation() {
        let params = PaginationParams::new(2, 10);

        let middle = params.page_of((0..10).collect::<Vec<_>>(), 25);
        assert_eq!(middle.next_page, Some(3));
        assert_eq!(middle.previous_page, Some(1));
        assert_eq!(middle.count, 25);

        let last = PaginationParams::new(3, 10).page_of((0..5).collect::<Vec<_>>(), 25);
        assert_eq!(last.next_page, None);
        assert_eq!(last.previous_page, Some(2));

        let first = PaginationParams::new(1, 10).page_of(Vec::<i32>::new(), 0);
        assert_eq!(first, Page::default());
    }

    #[test]
    fn try_map_keeps_metadata() {
        let page = PaginationParams::new(1, 2).page_of(vec!["1", "2"], 3);
        let mapped = page.try_map(|s| s.parse::<i32>()).unwrap();

        assert_eq!(mapped.items, vec![1, 2]);
        assert_eq!(mapped.next_page, Some(2));
    }
}
