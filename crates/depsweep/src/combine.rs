use indexmap::IndexSet;
use std::hash::Hash;

pub trait Combine {
    /// Combine two values, preferring the values in `self`.
    ///
    /// Scalars from the higher precedence layer win. Collections are merged with the higher
    /// precedence items placed first.
    #[must_use]
    fn combine(self, other: Self) -> Self;
}

macro_rules! impl_combine_or {
    ($name:ty) => {
        impl Combine for Option<$name> {
            fn combine(self, other: Option<$name>) -> Option<$name> {
                self.or(other)
            }
        }
    };
}

impl_combine_or!(String);
impl_combine_or!(bool);
impl_combine_or!(u64);
impl_combine_or!(usize);

impl<T> Combine for Option<IndexSet<T>>
where
    T: Eq + Hash,
{
    /// Combine two IndexSets by extending the set in `self` with the set in `other`, if they're
    /// both `Some`.
    fn combine(self, other: Option<IndexSet<T>>) -> Option<IndexSet<T>> {
        match (self, other) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (a, b) => a.or(b),
        }
    }
}
