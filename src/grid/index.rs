//! Per-axis index specifiers for [`Grid`](super::Grid)
//!
//! Each axis of a grid index is addressed independently by an absolute
//! integer, a stepped range or the whole axis. Negative integers and range
//! endpoints count from the end of the axis; range endpoints are clamped to
//! the axis the way Python slices are, while integers must land inside it.

use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use super::GridError;

/// Index specifier for a single axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// Absolute position, negative values count from the end
    Index(isize),
    /// Half-open stepped range, `None` endpoints default to the axis ends
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
    /// The whole axis
    Full,
}

impl Axis {
    /// Range with an explicit step (`start:stop:step`)
    #[must_use]
    pub const fn stepped(start: Option<isize>, stop: Option<isize>, step: isize) -> Self {
        Self::Range { start, stop, step }
    }

    /// True for the integer form
    #[must_use]
    pub const fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    /// Normalize against an axis of length `len`
    pub(crate) fn resolve(self, len: usize) -> Result<Band, GridError> {
        let n = len as isize;
        match self {
            Self::Index(i) => {
                if i < -n || i >= n {
                    return Err(GridError::IndexOutOfBounds { index: i, len });
                }
                let abs = if i < 0 { i + n } else { i };
                Ok(Band {
                    start: abs as usize,
                    len: 1,
                    step: 1,
                })
            }
            Self::Full => Ok(Band {
                start: 0,
                len,
                step: 1,
            }),
            Self::Range { start, stop, step } => slice_band(start, stop, step, n),
        }
    }
}

/// Normalized window on one axis: `len` positions starting at `start`,
/// `step` apart. `start` is meaningless when `len == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Band {
    pub start: usize,
    pub len: usize,
    pub step: isize,
}

fn slice_band(
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    n: isize,
) -> Result<Band, GridError> {
    if step == 0 {
        return Err(GridError::InvalidSlice("slice step cannot be zero"));
    }

    // Clamp bounds differ by direction: a backwards walk may stop "before" 0.
    let (lower, upper) = if step > 0 { (0, n) } else { (-1, n - 1) };
    let clamp = |v: isize| {
        let v = if v < 0 { v + n } else { v };
        v.clamp(lower, upper)
    };

    let first = start.map_or(if step > 0 { lower } else { upper }, clamp);
    let last = stop.map_or(if step > 0 { upper } else { lower }, clamp);

    let stride = step.unsigned_abs();
    let len = if step > 0 && last > first {
        (last - first - 1) as usize / stride + 1
    } else if step < 0 && first > last {
        (first - last - 1) as usize / stride + 1
    } else {
        0
    };

    Ok(Band {
        start: if len == 0 { 0 } else { first as usize },
        len,
        step,
    })
}

macro_rules! axis_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for Axis {
            fn from(i: $t) -> Self {
                Self::Index(i as isize)
            }
        }

        impl From<Range<$t>> for Axis {
            fn from(r: Range<$t>) -> Self {
                Self::stepped(Some(r.start as isize), Some(r.end as isize), 1)
            }
        }

        impl From<RangeFrom<$t>> for Axis {
            fn from(r: RangeFrom<$t>) -> Self {
                Self::stepped(Some(r.start as isize), None, 1)
            }
        }

        impl From<RangeTo<$t>> for Axis {
            fn from(r: RangeTo<$t>) -> Self {
                Self::stepped(None, Some(r.end as isize), 1)
            }
        }

        impl From<$t> for GridIndex {
            fn from(i: $t) -> Self {
                Self::row(i)
            }
        }

        impl From<Range<$t>> for GridIndex {
            fn from(r: Range<$t>) -> Self {
                Self::row(r)
            }
        }

        impl From<RangeFrom<$t>> for GridIndex {
            fn from(r: RangeFrom<$t>) -> Self {
                Self::row(r)
            }
        }

        impl From<RangeTo<$t>> for GridIndex {
            fn from(r: RangeTo<$t>) -> Self {
                Self::row(r)
            }
        }
    )*};
}

axis_from_int!(i32, i64, isize, usize);

impl From<RangeFull> for Axis {
    fn from(_: RangeFull) -> Self {
        Self::Full
    }
}

/// Two-axis grid index, `(row, col)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridIndex {
    pub row: Axis,
    pub col: Axis,
}

impl GridIndex {
    #[must_use]
    pub fn new(row: impl Into<Axis>, col: impl Into<Axis>) -> Self {
        Self {
            row: row.into(),
            col: col.into(),
        }
    }

    /// Index on rows only, the column axis is taken whole
    #[must_use]
    pub fn row(row: impl Into<Axis>) -> Self {
        Self::new(row, Axis::Full)
    }

    /// Two integers address a single element, anything else a view
    #[must_use]
    pub const fn is_element(&self) -> bool {
        self.row.is_index() && self.col.is_index()
    }
}

impl From<Axis> for GridIndex {
    fn from(row: Axis) -> Self {
        Self::row(row)
    }
}

impl From<RangeFull> for GridIndex {
    fn from(_: RangeFull) -> Self {
        Self::row(Axis::Full)
    }
}

impl<A: Into<Axis>, B: Into<Axis>> From<(A, B)> for GridIndex {
    fn from((row, col): (A, B)) -> Self {
        Self::new(row, col)
    }
}
