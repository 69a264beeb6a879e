//! Read queries
//!
//! A [`Query`] describes which records a `Read` operation returns: an optional
//! predicate over the body, optional `uid`/`origin` filters, key ordering and
//! an offset/limit window. In-memory adapters evaluate it with
//! [`Query::apply`]; adapters over a query language translate the parts they
//! can and filter the rest with [`Query::matches`].

use crate::record::{Origin, Record};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum page size accepted by [`Query::page`]
pub const MAX_PAGE_SIZE: usize = 100;

/// Body predicate
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Lowest key first
    #[default]
    KeyAscending,
    /// Highest key first
    KeyDescending,
}

/// Read query
pub struct Query<T> {
    predicate: Option<Predicate<T>>,
    uid: Option<Uuid>,
    origin: Option<Origin>,
    order: Order,
    offset: usize,
    limit: Option<usize>,
}

impl<T> Query<T> {
    /// Match every record
    pub fn all() -> Self {
        Self {
            predicate: None,
            uid: None,
            origin: None,
            order: Order::KeyAscending,
            offset: 0,
            limit: None,
        }
    }

    /// Keep records whose body satisfies `predicate`
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Keep the record with this uid
    pub fn with_uid(mut self, uid: Uuid) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Keep records of this origin
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Set result ordering
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Skip the first `offset` matches
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Return at most `limit` matches
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Select a 1-based page; `page` is raised to 1 and `page_size` clamped
    /// to `1..=MAX_PAGE_SIZE`
    pub fn page(self, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self.offset((page - 1).saturating_mul(page_size)).limit(page_size)
    }

    /// Uid filter, if any
    pub fn uid(&self) -> Option<Uuid> {
        self.uid
    }

    /// Origin filter, if any
    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    /// Requested ordering
    pub fn ordering(&self) -> Order {
        self.order
    }

    /// Window as `(offset, limit)`
    pub fn window(&self) -> (usize, Option<usize>) {
        (self.offset, self.limit)
    }

    /// Check the filters (not the window) against one record
    pub fn matches(&self, record: &Record<T>) -> bool {
        if self.uid.is_some_and(|uid| uid != record.uid) {
            return false;
        }
        if self.origin.is_some_and(|origin| origin != record.origin) {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(&record.body),
            None => true,
        }
    }

    /// Evaluate the whole query over a set of records
    pub fn apply<'a, I>(&self, records: I) -> Vec<Record<T>>
    where
        I: IntoIterator<Item = &'a Record<T>>,
        T: Clone + 'a,
    {
        let mut matched: Vec<&Record<T>> = records.into_iter().filter(|r| self.matches(r)).collect();
        match self.order {
            Order::KeyAscending => matched.sort_by_key(|r| r.key),
            Order::KeyDescending => matched.sort_by(|a, b| b.key.cmp(&a.key)),
        }
        let limit = self.limit.unwrap_or(usize::MAX);
        matched
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            uid: self.uid,
            origin: self.origin,
            order: self.order,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("uid", &self.uid)
            .field("origin", &self.origin)
            .field("order", &self.order)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Key;

    fn records() -> Vec<Record<u32>> {
        (1..=10)
            .map(|i| Record::new(i * 10).with_key(Key::new(i as u64)))
            .collect()
    }

    #[test]
    fn test_all_returns_everything_in_key_order() {
        let mut input = records();
        input.reverse();
        let out = Query::all().apply(&input);
        let keys: Vec<u64> = out.iter().filter_map(|r| r.key).map(Key::get).collect();
        assert_eq!(keys, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_filter_and_descending_limit() {
        let input = records();
        let out = Query::all()
            .filter(|v: &u32| *v >= 50)
            .order(Order::KeyDescending)
            .limit(2)
            .apply(&input);
        let bodies: Vec<u32> = out.iter().map(|r| r.body).collect();
        assert_eq!(bodies, vec![100, 90]);
    }

    #[test]
    fn test_page_clamps_inputs() {
        let q: Query<u32> = Query::all().page(0, 0);
        assert_eq!(q.window(), (0, Some(1)));

        let q: Query<u32> = Query::all().page(3, 1_000);
        assert_eq!(q.window(), (2 * MAX_PAGE_SIZE, Some(MAX_PAGE_SIZE)));

        let input = records();
        let page_two = Query::all().page(2, 4).apply(&input);
        let keys: Vec<u64> = page_two.iter().filter_map(|r| r.key).map(Key::get).collect();
        assert_eq!(keys, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let q: Query<u32> = Query::all().page(usize::MAX, 10);
        assert_eq!(q.window(), (usize::MAX, Some(10)));
        assert!(q.apply(&records()).is_empty());

        let q: Query<u32> = Query::all().page(usize::MAX / 2, MAX_PAGE_SIZE);
        assert!(q.apply(&records()).is_empty());
    }

    #[test]
    fn test_uid_and_origin_filters() {
        let mut input = records();
        input[3].origin = Origin::Local;
        let uid = input[3].uid;

        assert_eq!(Query::all().with_uid(uid).apply(&input).len(), 1);
        let local = Query::all().with_origin(Origin::Local).apply(&input);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].uid, uid);
    }
}
