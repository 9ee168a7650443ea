//! A neutral sum type.
//!
//! `Either<L, R>` holds one of two values with no success/failure meaning
//! attached to either side. Races return it to say which racer won, and
//! [`Schedule::and_then`](crate::schedule::Schedule::and_then) uses it to
//! track which of two schedules is active.
//!
//! # Examples
//!
//! ```rust
//! use undertow::either::Either;
//!
//! let winner: Either<&str, u64> = Either::Left("cache");
//! let description = winner.fold(
//!     |source| format!("answered by {}", source),
//!     |millis| format!("origin replied in {}ms", millis),
//! );
//! assert_eq!(description, "answered by cache");
//! ```

/// A value that is either `Left(L)` or `Right(R)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    /// The left value.
    Left(L),
    /// The right value.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Returns `true` if this is `Left`.
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    /// Returns `true` if this is `Right`.
    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    /// The left value, if present.
    pub fn into_left(self) -> Option<L> {
        match self {
            Either::Left(l) => Some(l),
            Either::Right(_) => None,
        }
    }

    /// The right value, if present.
    pub fn into_right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(r) => Some(r),
        }
    }

    /// Borrow the contents.
    pub fn as_ref(&self) -> Either<&L, &R> {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(r),
        }
    }

    /// Transform the left value.
    pub fn map_left<L2, F>(self, f: F) -> Either<L2, R>
    where
        F: FnOnce(L) -> L2,
    {
        match self {
            Either::Left(l) => Either::Left(f(l)),
            Either::Right(r) => Either::Right(r),
        }
    }

    /// Transform the right value.
    pub fn map_right<R2, F>(self, f: F) -> Either<L, R2>
    where
        F: FnOnce(R) -> R2,
    {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(f(r)),
        }
    }

    /// Transform whichever side is present.
    pub fn bimap<L2, R2, F, G>(self, f: F, g: G) -> Either<L2, R2>
    where
        F: FnOnce(L) -> L2,
        G: FnOnce(R) -> R2,
    {
        match self {
            Either::Left(l) => Either::Left(f(l)),
            Either::Right(r) => Either::Right(g(r)),
        }
    }

    /// Collapse both sides into one value.
    pub fn fold<T, F, G>(self, left_fn: F, right_fn: G) -> T
    where
        F: FnOnce(L) -> T,
        G: FnOnce(R) -> T,
    {
        match self {
            Either::Left(l) => left_fn(l),
            Either::Right(r) => right_fn(r),
        }
    }

    /// Exchange the sides.
    pub fn swap(self) -> Either<R, L> {
        match self {
            Either::Left(l) => Either::Right(l),
            Either::Right(r) => Either::Left(r),
        }
    }
}

impl<T> Either<T, T> {
    /// The value, whichever side holds it.
    ///
    /// ```rust
    /// use undertow::either::Either;
    ///
    /// let first: Either<u32, u32> = Either::Right(7);
    /// assert_eq!(first.into_inner(), 7);
    /// ```
    pub fn into_inner(self) -> T {
        match self {
            Either::Left(v) | Either::Right(v) => v,
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    fn from(result: Result<R, L>) -> Self {
        match result {
            Ok(r) => Either::Right(r),
            Err(l) => Either::Left(l),
        }
    }
}

impl<L, R> From<Either<L, R>> for Result<R, L> {
    fn from(either: Either<L, R>) -> Self {
        match either {
            Either::Left(l) => Err(l),
            Either::Right(r) => Ok(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_left_leaves_right_untouched() {
        let right: Either<i32, &str> = Either::Right("kept");
        assert_eq!(right.map_left(|n| n * 2), Either::Right("kept"));

        let left: Either<i32, &str> = Either::Left(21);
        assert_eq!(left.map_left(|n| n * 2), Either::Left(42));
    }

    #[test]
    fn test_bimap_and_swap() {
        let left: Either<i32, String> = Either::Left(3);
        let mapped = left.bimap(|n| n + 1, |s| s.len());
        assert_eq!(mapped, Either::Left(4));
        assert_eq!(mapped.swap(), Either::Right(4));
    }

    #[test]
    fn test_result_conversions() {
        let from_ok: Either<&str, i32> = Ok(5).into();
        assert_eq!(from_ok, Either::Right(5));

        let back: Result<i32, &str> = Either::Left("bad").into();
        assert_eq!(back, Err("bad"));
    }

    #[test]
    fn test_accessors() {
        let e: Either<u8, char> = Either::Right('x');
        assert!(e.is_right());
        assert!(!e.is_left());
        assert_eq!(e.as_ref().into_right(), Some(&'x'));
        assert_eq!(e.into_left(), None);
    }
}
