//! Lazy result sequences and the reducers that drain them.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::{Result, ShapeError};

/// The lazy output of one query execution.
///
/// Nothing touches the database until the first element is pulled. Dropping the
/// sequence before it is exhausted releases the connection.
pub struct ShapedRows<'a, T> {
    inner: BoxStream<'a, Result<T>>,
}

impl<'a, T> ShapedRows<'a, T> {
    pub(crate) fn new(inner: BoxStream<'a, Result<T>>) -> Self {
        Self { inner }
    }

    /// Exactly one element; fails on zero or more than one.
    pub async fn single(mut self) -> Result<T> {
        let first = self.inner.next().await.ok_or(ShapeError::EmptyResult)??;
        match self.inner.next().await {
            None => Ok(first),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => Err(ShapeError::MultipleResults),
        }
    }

    /// The first element; fails if there is none. The rest is never pulled.
    pub async fn first(mut self) -> Result<T> {
        self.inner.next().await.ok_or(ShapeError::EmptyResult)?
    }

    /// `None` on zero elements, the element on one, an error on more.
    pub async fn single_or_default(mut self) -> Result<Option<T>> {
        let Some(first) = self.inner.next().await.transpose()? else {
            return Ok(None);
        };
        match self.inner.next().await {
            None => Ok(Some(first)),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => Err(ShapeError::MultipleResults),
        }
    }

    /// The first element, or `None` when there is none.
    pub async fn first_or_default(mut self) -> Result<Option<T>> {
        self.inner.next().await.transpose()
    }

    /// Number of elements.
    pub async fn count(self) -> Result<usize> {
        self.inner
            .try_fold(0usize, |count, _| async move { Ok::<_, ShapeError>(count + 1) })
            .await
    }

    /// All elements in order.
    pub async fn to_list(self) -> Result<Vec<T>> {
        self.inner.try_collect().await
    }

    /// One page of the sequence.
    ///
    /// With `page` set (1-based) the whole sequence is drained to count the
    /// total. With only `per_page` set, the first `per_page` elements are taken
    /// and the rest is never pulled. With neither, everything is returned.
    pub async fn paginate(mut self, page: Option<usize>, per_page: Option<usize>) -> Result<Page<T>> {
        match (page, per_page) {
            (Some(0), _) => Err(ShapeError::config("Page numbers start at 1")),
            (Some(_), None) | (Some(_), Some(0)) | (None, Some(0)) => {
                Err(ShapeError::config("A positive page size is required"))
            }
            (Some(page), Some(size)) => {
                let skip = (page - 1).saturating_mul(size);
                let mut items = Vec::new();
                let mut total = 0;
                while let Some(item) = self.inner.next().await {
                    let item = item?;
                    if total >= skip && items.len() < size {
                        items.push(item);
                    }
                    total += 1;
                }
                Ok(Page::new(items, Some(page), Some(size), total))
            }
            (None, Some(size)) => {
                let items: Vec<T> = self.inner.take(size).try_collect().await?;
                let total = items.len();
                Ok(Page::new(items, None, Some(size), total))
            }
            (None, None) => {
                let items = self.to_list().await?;
                let total = items.len();
                Ok(Page::new(items, None, None, total))
            }
        }
    }

    /// Blocking form of [`single`](Self::single).
    ///
    /// Inside a current-thread tokio runtime the calling thread cannot be parked,
    /// so this returns [`ShapeError::Internal`] instead of running the query.
    pub fn single_blocking(self) -> Result<T> {
        block_on(self.single())
    }

    /// Blocking form of [`first`](Self::first).
    ///
    /// Inside a current-thread tokio runtime the calling thread cannot be parked,
    /// so this returns [`ShapeError::Internal`] instead of running the query.
    pub fn first_blocking(self) -> Result<T> {
        block_on(self.first())
    }

    /// Blocking form of [`single_or_default`](Self::single_or_default).
    ///
    /// Inside a current-thread tokio runtime the calling thread cannot be parked,
    /// so this returns [`ShapeError::Internal`] instead of running the query.
    pub fn single_or_default_blocking(self) -> Result<Option<T>> {
        block_on(self.single_or_default())
    }

    /// Blocking form of [`first_or_default`](Self::first_or_default).
    ///
    /// Inside a current-thread tokio runtime the calling thread cannot be parked,
    /// so this returns [`ShapeError::Internal`] instead of running the query.
    pub fn first_or_default_blocking(self) -> Result<Option<T>> {
        block_on(self.first_or_default())
    }

    /// Blocking form of [`count`](Self::count).
    ///
    /// Inside a current-thread tokio runtime the calling thread cannot be parked,
    /// so this returns [`ShapeError::Internal`] instead of running the query.
    pub fn count_blocking(self) -> Result<usize> {
        block_on(self.count())
    }

    /// Blocking form of [`to_list`](Self::to_list).
    ///
    /// Inside a current-thread tokio runtime the calling thread cannot be parked,
    /// so this returns [`ShapeError::Internal`] instead of running the query.
    pub fn to_list_blocking(self) -> Result<Vec<T>> {
        block_on(self.to_list())
    }
}

impl<T> Stream for ShapedRows<'_, T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Drives `future` to completion from synchronous code.
///
/// Inside a multi-threaded runtime the worker is handed off while blocking;
/// outside any runtime a private current-thread runtime is used.
fn block_on<F, T>(future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match Handle::try_current() {
        Ok(handle) => {
            if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
                return Err(ShapeError::internal(
                    "Blocking reducers cannot run inside a current-thread runtime",
                ));
            }
            tokio::task::block_in_place(|| handle.block_on(future))
        }
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ShapeError::internal(format!("Failed to start runtime: {e}")))?
            .block_on(future),
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub total: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    fn new(items: Vec<T>, page: Option<usize>, per_page: Option<usize>, total: usize) -> Self {
        let total_pages = match per_page {
            Some(size) if size > 0 => total.div_ceil(size),
            _ => usize::from(total > 0),
        };
        Self {
            items,
            page,
            per_page,
            total,
            total_pages,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.page.is_some_and(|page| page < self.total_pages)
    }

    pub fn has_previous_page(&self) -> bool {
        self.page.is_some_and(|page| page > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rows(values: Vec<i64>) -> ShapedRows<'static, i64> {
        ShapedRows::new(stream::iter(values.into_iter().map(Ok)).boxed())
    }

    fn counted(values: Vec<i64>, pulled: Arc<AtomicUsize>) -> ShapedRows<'static, i64> {
        ShapedRows::new(
            stream::iter(values)
                .map(move |v| {
                    pulled.fetch_add(1, Ordering::SeqCst);
                    Ok(v)
                })
                .boxed(),
        )
    }

    #[tokio::test]
    async fn test_single() {
        assert_eq!(rows(vec![5]).single().await.unwrap(), 5);
        assert!(matches!(rows(vec![]).single().await, Err(ShapeError::EmptyResult)));
        assert!(matches!(
            rows(vec![1, 2]).single().await,
            Err(ShapeError::MultipleResults)
        ));
    }

    #[tokio::test]
    async fn test_single_or_default() {
        assert_eq!(rows(vec![]).single_or_default().await.unwrap(), None);
        assert_eq!(rows(vec![3]).single_or_default().await.unwrap(), Some(3));
        assert!(rows(vec![1, 2]).single_or_default().await.is_err());
    }

    #[tokio::test]
    async fn test_first_pulls_one_element() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let first = counted(vec![7, 8, 9], Arc::clone(&pulled)).first().await.unwrap();
        assert_eq!(first, 7);
        assert_eq!(pulled.load(Ordering::SeqCst), 1);

        assert_eq!(rows(vec![]).first_or_default().await.unwrap(), None);
        assert!(matches!(rows(vec![]).first().await, Err(ShapeError::EmptyResult)));
    }

    #[tokio::test]
    async fn test_count_and_to_list() {
        assert_eq!(rows(vec![1, 2, 3]).count().await.unwrap(), 3);
        assert_eq!(rows(vec![1, 2, 3]).to_list().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(rows(vec![]).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_error_propagates_through_reducers() {
        let failing = ShapedRows::new(
            stream::iter(vec![Ok(1i64), Err(ShapeError::query("boom"))]).boxed(),
        );
        assert!(matches!(failing.to_list().await, Err(ShapeError::Query(_))));
    }

    #[tokio::test]
    async fn test_paginate_second_page() {
        let page = rows((1..=7).collect()).paginate(Some(2), Some(3)).await.unwrap();
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page());
        assert!(page.has_previous_page());
    }

    #[tokio::test]
    async fn test_paginate_page_size_only_stops_early() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let page = counted((1..=10).collect(), Arc::clone(&pulled))
            .paginate(None, Some(2))
            .await
            .unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
        assert!(!page.has_next_page());
    }

    #[tokio::test]
    async fn test_paginate_rejects_bad_arguments() {
        assert!(rows(vec![1]).paginate(Some(0), Some(5)).await.is_err());
        assert!(rows(vec![1]).paginate(Some(1), None).await.is_err());
    }

    #[tokio::test]
    async fn test_paginate_huge_page_size() {
        let page = rows(vec![1, 2]).paginate(Some(1), Some(usize::MAX)).await.unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next_page());
    }

    #[test]
    fn test_blocking_outside_runtime() {
        assert_eq!(rows(vec![1, 2]).count_blocking().unwrap(), 2);
        assert_eq!(rows(vec![4]).single_blocking().unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_inside_multi_thread_runtime() {
        assert_eq!(rows(vec![1, 2, 3]).to_list_blocking().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_blocking_inside_current_thread_runtime_fails() {
        assert!(matches!(
            rows(vec![1]).first_blocking(),
            Err(ShapeError::Internal(_))
        ));
    }
}
