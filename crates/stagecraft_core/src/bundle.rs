//! # Column Bundles
//!
//! `Context::declare` and `Context::require` are one-shot calls that accept
//! either a single column or a tuple of columns.

use std::fmt;
use std::marker::PhantomData;

use crate::column::{Column, ColumnKey, DeclaredColumn};

/// One or more column values to register with the world.
pub trait ColumnBundle: Send + 'static {
    /// Splits the bundle into individually declared columns.
    fn into_columns(self) -> Vec<DeclaredColumn>;
}

/// One or more column types a subsystem accesses every frame.
pub trait Requirement {
    /// Typed handles returned to the subsystem.
    type Handles;

    /// Keys of the required columns, in handle order.
    fn keys() -> Vec<ColumnKey>;

    /// Builds the handles. Handle `i` refers to `keys()[i]`.
    fn handles() -> Self::Handles;
}

/// Handle to a subsystem's working copy of column `C`.
pub struct Required<C> {
    index: usize,
    _marker: PhantomData<fn() -> C>,
}

impl<C> Required<C> {
    const fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// Position of the column in the subsystem's requirement.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

impl<C> Clone for Required<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Required<C> {}

impl<C> fmt::Debug for Required<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Required")
            .field("column", &std::any::type_name::<C>())
            .field("index", &self.index)
            .finish()
    }
}

impl<C: Column> ColumnBundle for C {
    fn into_columns(self) -> Vec<DeclaredColumn> {
        vec![DeclaredColumn::new(self)]
    }
}

impl<C: Column> Requirement for C {
    type Handles = Required<C>;

    fn keys() -> Vec<ColumnKey> {
        vec![ColumnKey::of::<C>()]
    }

    fn handles() -> Self::Handles {
        Required::new(0)
    }
}

macro_rules! tuple_impls {
    ($(($($name:ident : $idx:tt),+))+) => {
        $(
            impl<$($name: Column),+> ColumnBundle for ($($name,)+) {
                fn into_columns(self) -> Vec<DeclaredColumn> {
                    vec![$(DeclaredColumn::new(self.$idx)),+]
                }
            }

            impl<$($name: Column),+> Requirement for ($($name,)+) {
                type Handles = ($(Required<$name>,)+);

                fn keys() -> Vec<ColumnKey> {
                    vec![$(ColumnKey::of::<$name>()),+]
                }

                fn handles() -> Self::Handles {
                    ($(Required::new($idx),)+)
                }
            }
        )+
    };
}

tuple_impls! {
    (A: 0)
    (A: 0, B: 1)
    (A: 0, B: 1, C: 2)
    (A: 0, B: 1, C: 2, D: 3)
    (A: 0, B: 1, C: 2, D: 3, E: 4)
    (A: 0, B: 1, C: 2, D: 3, E: 4, F: 5)
    (A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6)
    (A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7)
}
