//! Single-pass query cursors.
//!
//! A cursor wraps the lazy result sequence of one query execution. It can be
//! iterated once, drained with [`QueryCursor::get_all`], consumed with
//! [`QueryCursor::into_items`], or closed. Any later
//! attempt to read from it fails with [`QueryError::CursorExhausted`].
//!
//! # State Transition Diagram
//!
//! ```text
//! Fresh ─── iter() ───→ Iterating ─── (source drained) ──→ Exhausted
//!   │                       │
//!   ├─── get_all() ─────────┴──────── get_all() ─────────→ Exhausted
//!   └─── close() ─────→ Closed ←──── close() ────────────────┘
//! ```

use std::fmt;

use tessera_core::{QueryError, TesseraError, TesseraResult};

/// Position of a cursor in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Fresh,
    Iterating,
    Exhausted,
    Closed,
}

/// Lazy, finite, non-restartable result sequence.
pub struct QueryCursor<T> {
    state: CursorState,
    source: Option<Box<dyn Iterator<Item = T> + Send>>,
}

impl<T> QueryCursor<T> {
    pub(crate) fn new<I>(source: I) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        Self {
            state: CursorState::Fresh,
            source: Some(Box::new(source)),
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether results can still be read.
    pub fn is_open(&self) -> bool {
        matches!(self.state, CursorState::Fresh | CursorState::Iterating)
    }

    /// Start the single iteration pass.
    ///
    /// Fails if the cursor was iterated before, drained or closed. Dropping
    /// the returned iterator early leaves the rest for [`QueryCursor::get_all`].
    pub fn iter(&mut self) -> Result<CursorIter<'_, T>, QueryError> {
        if self.state != CursorState::Fresh {
            return Err(QueryError::CursorExhausted);
        }
        self.state = CursorState::Iterating;
        Ok(CursorIter { cursor: self })
    }

    /// Collect everything not yet produced and exhaust the cursor.
    pub fn get_all(&mut self) -> Result<Vec<T>, QueryError> {
        if !self.is_open() {
            return Err(QueryError::CursorExhausted);
        }
        let items = match self.source.take() {
            Some(source) => source.collect(),
            None => Vec::new(),
        };
        self.state = CursorState::Exhausted;
        Ok(items)
    }

    /// Consume the cursor, yielding whatever has not been produced yet.
    ///
    /// Fails like [`QueryCursor::get_all`] once the cursor is drained or
    /// closed.
    pub fn into_items(mut self) -> Result<CursorItems<T>, QueryError> {
        if !self.is_open() {
            return Err(QueryError::CursorExhausted);
        }
        Ok(CursorItems {
            source: self.source.take(),
        })
    }

    /// Abandon the remaining results.
    pub fn close(&mut self) {
        self.source = None;
        self.state = CursorState::Closed;
    }

    /// Transform every item while the cursor is still fresh.
    pub(crate) fn map<U, F>(mut self, f: F) -> QueryCursor<U>
    where
        T: 'static,
        U: 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let source = match self.source.take() {
            Some(source) => Some(Box::new(source.map(f)) as Box<dyn Iterator<Item = U> + Send>),
            None => None,
        };
        QueryCursor {
            state: self.state,
            source,
        }
    }

    fn advance(&mut self) -> Option<T> {
        let next = self.source.as_mut().and_then(|source| source.next());
        if next.is_none() && self.state == CursorState::Iterating {
            self.source = None;
            self.state = CursorState::Exhausted;
        }
        next
    }
}

impl<T, E> QueryCursor<Result<T, E>>
where
    E: Into<TesseraError>,
{
    /// [`QueryCursor::get_all`] for fallible items; stops at the first error.
    pub fn try_get_all(&mut self) -> TesseraResult<Vec<T>> {
        self.get_all()?
            .into_iter()
            .map(|item| item.map_err(Into::into))
            .collect()
    }
}

impl<T> fmt::Debug for QueryCursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCursor")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Borrowing iterator for the single pass of a [`QueryCursor`].
pub struct CursorIter<'a, T> {
    cursor: &'a mut QueryCursor<T>,
}

impl<T> Iterator for CursorIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.cursor.advance()
    }
}

/// Consuming iterator over the results a [`QueryCursor`] had left.
pub struct CursorItems<T> {
    source: Option<Box<dyn Iterator<Item = T> + Send>>,
}

impl<T> Iterator for CursorItems<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let next = self.source.as_mut().and_then(|source| source.next());
        if next.is_none() {
            self.source = None;
        }
        next
    }
}

impl<T> fmt::Debug for CursorItems<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorItems")
            .field("drained", &self.source.is_none())
            .finish()
    }
}
