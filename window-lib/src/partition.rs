/// One unit's slice of a larger range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub offset: usize,
    pub count: usize,
}

impl Partition {
    pub fn end(&self) -> usize {
        self.offset + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Split `[0, total)` into `divisor` contiguous sub-ranges and return the
/// one at `index`.
///
/// Every index below `divisor - 1` receives `total / divisor` elements; the
/// last index absorbs the remainder, so the union over all indices covers
/// `[0, total)` exactly once. A zero divisor (or an index at or past the
/// divisor) yields the empty `(0, 0)` partition rather than failing; role
/// loops treat the empty partition as "no work", so callers that consider
/// it an error must check up front.
pub fn partition(total: usize, divisor: usize, index: usize) -> Partition {
    if divisor == 0 || index >= divisor {
        return Partition { offset: 0, count: 0 };
    }
    let count = total / divisor;
    if index == divisor - 1 {
        Partition { offset: index * count, count: total - (divisor - 1) * count }
    } else {
        Partition { offset: index * count, count }
    }
}
