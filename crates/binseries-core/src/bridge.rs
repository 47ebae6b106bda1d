//! # Generic Dispatch Bridge
//!
//! A container that only knows its own wrapper type still has to call
//! factories that are generic over the record type (and, for indexed series,
//! over the index type too). The wrapper implements an invoker trait that
//! re-enters the callable with its concrete type parameters; the callable
//! receives the invoker back so it can reach type-specific construction.
//!
//! No business logic lives here.

use core::fmt;
use core::marker::PhantomData;

use crate::schema::Schema;

/// Requirements on a series index type.
pub trait SeriesIndex: Ord + Copy + fmt::Debug + Send + Sync + 'static {}

impl<T: Ord + Copy + fmt::Debug + Send + Sync + 'static> SeriesIndex for T {}

/// Something that knows one record type and can run a callable with it.
pub trait GenericInvoker {
    fn run_generic_method<C, A>(&self, callable: &C, arg: A) -> C::Output
    where
        C: GenericCallable<A>;
}

/// A method generic over one record type.
pub trait GenericCallable<A> {
    type Output;

    fn run<T: Schema, S: GenericInvoker>(&self, source: &S, arg: A) -> Self::Output;
}

/// Something that knows an index type and a value type.
pub trait GenericInvoker2 {
    fn run_generic_method2<C, A>(&self, callable: &C, arg: A) -> C::Output
    where
        C: GenericCallable2<A>;
}

/// A method generic over an index type and a value type.
pub trait GenericCallable2<A> {
    type Output;

    fn run<I: SeriesIndex, V: Schema, S: GenericInvoker2>(&self, source: &S, arg: A)
        -> Self::Output;
}

/// Static shape of an indexed series: record type `V` ordered by index `I`.
pub struct SeriesDescriptor<I, V> {
    name: String,
    index_of: fn(&V) -> I,
    _marker: PhantomData<fn() -> (I, V)>,
}

impl<I: SeriesIndex, V: Schema> SeriesDescriptor<I, V> {
    pub fn new(name: impl Into<String>, index_of: fn(&V) -> I) -> Self {
        Self {
            name: name.into(),
            index_of,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn index_of(&self, value: &V) -> I {
        (self.index_of)(value)
    }
}

impl<I, V> fmt::Debug for SeriesDescriptor<I, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesDescriptor")
            .field("name", &self.name)
            .field("index", &core::any::type_name::<I>())
            .field("value", &core::any::type_name::<V>())
            .finish()
    }
}

impl<I: SeriesIndex, V: Schema> GenericInvoker for SeriesDescriptor<I, V> {
    fn run_generic_method<C, A>(&self, callable: &C, arg: A) -> C::Output
    where
        C: GenericCallable<A>,
    {
        callable.run::<V, Self>(self, arg)
    }
}

impl<I: SeriesIndex, V: Schema> GenericInvoker2 for SeriesDescriptor<I, V> {
    fn run_generic_method2<C, A>(&self, callable: &C, arg: A) -> C::Output
    where
        C: GenericCallable2<A>,
    {
        callable.run::<I, V, Self>(self, arg)
    }
}
