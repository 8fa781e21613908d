//! Exhaustive traversal over single-page reads
//!
//! Pages are fetched one after another, each carrying the cursor of the
//! previous one, so items come out in the store's page order. Nothing is
//! fetched before the consumer polls for it. A failed fetch yields the error
//! and ends the stream.

use futures_util::stream::{self, Stream, TryStreamExt};
use std::future::Future;
use tracing::debug;

use crate::Error;
use crate::store::WideColumnStore;
use crate::table::types::{Cursor, Item, Page, QueryRequest};

enum PageState {
    Start,
    Next(Cursor),
}

/// Turns a single-page fetch into a lazy stream of pages
///
/// `fetch` receives `None` for the first page, then the previous page's cursor.
pub fn pages<F, Fut>(mut fetch: F) -> impl Stream<Item = Result<Page, Error>>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page, Error>>,
{
    stream::try_unfold(Some(PageState::Start), move |state| {
        let cursor = match state {
            Some(PageState::Start) => Some(None),
            Some(PageState::Next(cursor)) => Some(Some(cursor)),
            None => None,
        };
        let fetched = cursor.map(&mut fetch);
        async move {
            let Some(fetched) = fetched else {
                return Ok(None);
            };
            let page = fetched.await?;
            debug!(items = page.items.len(), last = page.is_last(), "fetched page");
            let next = page.cursor.clone().map(PageState::Next);
            Ok(Some((page, next)))
        }
    })
}

/// Flattens a page stream into an item stream
pub fn items<P>(pages: P) -> impl Stream<Item = Result<Item, Error>>
where
    P: Stream<Item = Result<Page, Error>>,
{
    pages
        .map_ok(|page| stream::iter(page.items.into_iter().map(Ok::<Item, Error>)))
        .try_flatten()
}

/// Every item matching a query, across all pages
///
/// The filter and index of `request` are sent unchanged with every page.
pub fn query_all<'a, S: WideColumnStore>(
    store: &'a S,
    table: &'a str,
    request: QueryRequest,
) -> impl Stream<Item = Result<Item, Error>> + 'a {
    items(pages(move |cursor| {
        let request = request.clone();
        async move { store.query(table, &request, cursor).await }
    }))
}

/// Every item of a table, across all pages
pub fn scan_all<'a, S: WideColumnStore>(
    store: &'a S,
    table: &'a str,
) -> impl Stream<Item = Result<Item, Error>> + 'a {
    items(pages(move |cursor| store.scan(table, cursor)))
}
