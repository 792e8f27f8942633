//! Fixed-shape two-dimensional storage with aliasing views
//!
//! A [`Grid`] is a handle on one shared row-major store. Slicing a grid
//! never copies: the result is another handle on the same store carrying a
//! different origin, shape and step, so writes through a view land in the
//! root grid and every other view that covers the same cell.
//!
//! ```
//! use tessera::grid::{Axis, Grid};
//!
//! let grid = Grid::new(0u8, 5, 8);
//! let view = grid.view((2..5, 3..8)).unwrap();
//! view.set((0, 0), 7).unwrap();
//! assert_eq!(grid.item(2, 3).unwrap(), 7);
//!
//! let every_other = grid.view((Axis::Full, Axis::stepped(None, None, 2))).unwrap();
//! assert_eq!(every_other.shape(), (5, 4));
//! ```

mod index;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use index::{Axis, GridIndex};
use index::Band;

/// Grid addressing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("index {index} is out of bounds for an axis of length {len}")]
    IndexOutOfBounds { index: isize, len: usize },

    #[error("invalid slice: {0}")]
    InvalidSlice(&'static str),
}

/// Result of [`Grid::get`]
#[derive(Debug)]
pub enum Selection<T> {
    /// A single element (two integer axes)
    Item(T),
    /// Any other index form
    View(Grid<T>),
}

impl<T> Selection<T> {
    #[must_use]
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::View(_) => None,
        }
    }

    #[must_use]
    pub fn into_view(self) -> Option<Grid<T>> {
        match self {
            Self::Item(_) => None,
            Self::View(view) => Some(view),
        }
    }
}

/// Two-dimensional grid handle over a shared backing store.
///
/// Cloning a `Grid` clones the handle, not the data. Use
/// [`Grid::detached`] for an independent copy.
pub struct Grid<T> {
    store: Arc<RwLock<Vec<T>>>,
    /// Shape of the root store; its column count is the row stride
    root_shape: (usize, usize),
    /// Absolute (row, col) of this handle's element (0, 0)
    origin: (usize, usize),
    shape: (usize, usize),
    step: (isize, isize),
}

impl<T> Clone for Grid<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            root_shape: self.root_shape,
            origin: self.origin,
            shape: self.shape,
            step: self.step,
        }
    }
}

impl<T: Clone> Grid<T> {
    /// Create a `rows` x `cols` grid filled with `default`
    #[must_use]
    pub fn new(default: T, rows: usize, cols: usize) -> Self {
        Self::from_vec(vec![default; rows * cols], rows, cols)
    }

    /// Read one element by absolute (possibly negative) position
    pub fn item(&self, row: isize, col: isize) -> Result<T, GridError> {
        let offset = self.element_offset(row.into(), col.into())?;
        Ok(self.read()[offset].clone())
    }

    /// Read an element or a view, depending on the index form
    pub fn get(&self, index: impl Into<GridIndex>) -> Result<Selection<T>, GridError> {
        let index = index.into();
        if index.is_element() {
            let offset = self.element_offset(index.row, index.col)?;
            Ok(Selection::Item(self.read()[offset].clone()))
        } else {
            self.view(index).map(Selection::View)
        }
    }

    /// Write `value` into every addressed cell
    pub fn fill(&self, value: T) {
        let offsets: Vec<usize> = self.offsets().collect();
        let mut store = self.write();
        for offset in offsets {
            store[offset] = value.clone();
        }
    }

    /// Elements of the addressed region in row-major order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            grid: self,
            next: 0,
            end: self.len(),
        }
    }

    /// Copy the addressed region out, row-major
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        let store = self.read();
        self.offsets().map(|offset| store[offset].clone()).collect()
    }

    /// Independent grid holding a copy of the addressed region
    #[must_use]
    pub fn detached(&self) -> Self {
        Self::from_vec(self.to_vec(), self.shape.0, self.shape.1)
    }
}

impl<T> Grid<T> {
    /// Build a grid whose cell `(row, col)` is `f(row, col)`
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                data.push(f(row, col));
            }
        }
        Self::from_vec(data, rows, cols)
    }

    fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self {
            store: Arc::new(RwLock::new(data)),
            root_shape: (rows, cols),
            origin: (0, 0),
            shape: (rows, cols),
            step: (1, 1),
        }
    }

    /// `(rows, cols)` of the addressed region
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        self.shape
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.shape.0
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.shape.1
    }

    /// Number of addressed elements
    #[must_use]
    pub const fn len(&self) -> usize {
        self.shape.0 * self.shape.1
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when this handle addresses less than the whole store, or
    /// addresses it in a different order
    #[must_use]
    pub fn is_view(&self) -> bool {
        self.origin != (0, 0) || self.step != (1, 1) || self.shape != self.root_shape
    }

    /// True when both handles share a backing store
    #[must_use]
    pub fn shares_store(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    /// Aliasing view of the addressed region. Integer axes select a band of
    /// length one, so the result is always two-dimensional.
    pub fn view(&self, index: impl Into<GridIndex>) -> Result<Self, GridError> {
        let index = index.into();
        let rows = index.row.resolve(self.shape.0)?;
        let cols = index.col.resolve(self.shape.1)?;
        let step = |outer: isize, inner: isize| {
            outer
                .checked_mul(inner)
                .ok_or(GridError::InvalidSlice("composed slice step overflows"))
        };

        Ok(Self {
            store: Arc::clone(&self.store),
            root_shape: self.root_shape,
            origin: (
                self.compose(self.origin.0, self.step.0, rows),
                self.compose(self.origin.1, self.step.1, cols),
            ),
            shape: (rows.len, cols.len),
            step: (step(self.step.0, rows.step)?, step(self.step.1, cols.step)?),
        })
    }

    fn compose(&self, origin: usize, step: isize, band: Band) -> usize {
        if band.len == 0 {
            return origin;
        }
        (origin as isize + band.start as isize * step) as usize
    }

    /// Write a single element. Any non-element index form fails with
    /// [`GridError::InvalidSlice`].
    pub fn set(&self, index: impl Into<GridIndex>, value: T) -> Result<(), GridError> {
        let index = index.into();
        if !index.is_element() {
            return Err(GridError::InvalidSlice(
                "assignment requires a single-element index",
            ));
        }
        let offset = self.element_offset(index.row, index.col)?;
        self.write()[offset] = value;
        Ok(())
    }

    pub fn set_item(&self, row: isize, col: isize, value: T) -> Result<(), GridError> {
        self.set((row, col), value)
    }

    /// Read-modify-write one element while holding the store lock
    pub fn update<R>(
        &self,
        row: isize,
        col: isize,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, GridError> {
        let offset = self.element_offset(row.into(), col.into())?;
        Ok(f(&mut self.write()[offset]))
    }

    /// Run `f` against one element under a read lock, without cloning it
    pub fn inspect<R>(&self, row: isize, col: isize, f: impl FnOnce(&T) -> R) -> Result<R, GridError> {
        let offset = self.element_offset(row.into(), col.into())?;
        Ok(f(&self.read()[offset]))
    }

    /// Scan the addressed region for `value`
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let store = self.read();
        self.offsets().any(|offset| store[offset] == *value)
    }

    fn element_offset(&self, row: Axis, col: Axis) -> Result<usize, GridError> {
        let row = row.resolve(self.shape.0)?;
        let col = col.resolve(self.shape.1)?;
        Ok(self.offset(row.start, col.start))
    }

    /// Store offset of the view-relative cell `(row, col)`
    fn offset(&self, row: usize, col: usize) -> usize {
        let abs_row = self.origin.0 as isize + row as isize * self.step.0;
        let abs_col = self.origin.1 as isize + col as isize * self.step.1;
        abs_row as usize * self.root_shape.1 + abs_col as usize
    }

    fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        let cols = self.shape.1;
        (0..self.len()).map(move |i| self.offset(i / cols, i % cols))
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazy row-major iterator over a grid's addressed region.
///
/// Each step takes the store lock briefly, so writes interleaved with the
/// iteration are observed.
pub struct Iter<'a, T> {
    grid: &'a Grid<T>,
    next: usize,
    end: usize,
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.next >= self.end {
            return None;
        }
        let cols = self.grid.shape.1;
        let offset = self.grid.offset(self.next / cols, self.next % cols);
        self.next += 1;
        Some(self.grid.read()[offset].clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.end - self.next;
        (left, Some(left))
    }
}

impl<T: Clone> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T: Clone> IntoIterator for &'a Grid<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> fmt::Debug for Grid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("shape", &self.shape)
            .field("origin", &self.origin)
            .field("step", &self.step)
            .field("root_shape", &self.root_shape)
            .finish_non_exhaustive()
    }
}

impl<T: fmt::Debug> fmt::Display for Grid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.read();
        let (rows, cols) = self.shape;
        writeln!(f, "Grid {rows}x{cols}")?;
        for row in 0..rows {
            f.write_str("[")?;
            for col in 0..cols {
                if col > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{:?}", store[self.offset(row, col)])?;
            }
            f.write_str("]\n")?;
        }
        Ok(())
    }
}
