//! Sequencing nodes (`map`, `flat_map`, `handle_error_with`) and the
//! `instrument` frame.

use crate::io::interpreter::{
    continue_into, eval, focus, unwind, Bind, Cause, Continuation, Exit, Frame, Machine, Run, Step,
};
use crate::io::IO;

pub(crate) struct MapFrame<E, X, F> {
    pub(crate) inner: IO<E, X>,
    pub(crate) f: F,
}

struct MapNext<E, A, F> {
    f: F,
    next: Box<dyn Continuation<E, A>>,
}

impl<E, X, A, F> Bind<E, A> for MapFrame<E, X, F>
where
    E: Send + 'static,
    X: Send + 'static,
    A: Send + 'static,
    F: FnOnce(X) -> A + Send + 'static,
{
    fn split(self: Box<Self>, next: Box<dyn Continuation<E, A>>) -> Box<dyn Machine> {
        let MapFrame { inner, f } = *self;
        focus(inner, Box::new(MapNext { f, next }))
    }
}

impl<E, X, A, F> Continuation<E, X> for MapNext<E, A, F>
where
    E: Send + 'static,
    X: Send + 'static,
    A: Send + 'static,
    F: FnOnce(X) -> A + Send + 'static,
{
    fn resume(self: Box<Self>, exit: Exit<E, X>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let MapNext { f, next } = *self;
        Some(match exit {
            Ok(value) => continue_into(run, move || IO::pure(f(value)), next),
            Err(cause) => unwind(Err(cause), next),
        })
    }
}

pub(crate) struct FlatMapFrame<E, X, F> {
    pub(crate) inner: IO<E, X>,
    pub(crate) f: F,
}

struct FlatMapNext<E, A, F> {
    f: F,
    next: Box<dyn Continuation<E, A>>,
}

impl<E, X, A, F> Bind<E, A> for FlatMapFrame<E, X, F>
where
    E: Send + 'static,
    X: Send + 'static,
    A: Send + 'static,
    F: FnOnce(X) -> IO<E, A> + Send + 'static,
{
    fn split(self: Box<Self>, next: Box<dyn Continuation<E, A>>) -> Box<dyn Machine> {
        let FlatMapFrame { inner, f } = *self;
        focus(inner, Box::new(FlatMapNext { f, next }))
    }
}

impl<E, X, A, F> Continuation<E, X> for FlatMapNext<E, A, F>
where
    E: Send + 'static,
    X: Send + 'static,
    A: Send + 'static,
    F: FnOnce(X) -> IO<E, A> + Send + 'static,
{
    fn resume(self: Box<Self>, exit: Exit<E, X>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let FlatMapNext { f, next } = *self;
        Some(match exit {
            Ok(value) => continue_into(run, move || f(value), next),
            Err(cause) => unwind(Err(cause), next),
        })
    }
}

/// Recovers typed errors only; cancellation passes through untouched.
pub(crate) struct HandleErrorFrame<E0, A, F> {
    pub(crate) inner: IO<E0, A>,
    pub(crate) f: F,
}

struct RecoverNext<E, A, F> {
    f: F,
    next: Box<dyn Continuation<E, A>>,
}

impl<E0, E, A, F> Bind<E, A> for HandleErrorFrame<E0, A, F>
where
    E0: Send + 'static,
    E: Send + 'static,
    A: Send + 'static,
    F: FnOnce(E0) -> IO<E, A> + Send + 'static,
{
    fn split(self: Box<Self>, next: Box<dyn Continuation<E, A>>) -> Box<dyn Machine> {
        let HandleErrorFrame { inner, f } = *self;
        focus(inner, Box::new(RecoverNext { f, next }))
    }
}

impl<E0, E, A, F> Continuation<E0, A> for RecoverNext<E, A, F>
where
    E0: Send + 'static,
    E: Send + 'static,
    A: Send + 'static,
    F: FnOnce(E0) -> IO<E, A> + Send + 'static,
{
    fn resume(self: Box<Self>, exit: Exit<E0, A>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let RecoverNext { f, next } = *self;
        Some(match exit {
            Ok(value) => unwind(Ok(value), next),
            Err(Cause::Error(error)) => continue_into(run, move || f(error), next),
            Err(Cause::Canceled) => unwind(Err(Cause::Canceled), next),
        })
    }
}

pub(crate) struct InstrumentFrame<E, A> {
    pub(crate) inner: IO<E, A>,
    pub(crate) span: tracing::Span,
}

impl<E, A> Frame<E, A> for InstrumentFrame<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, A> {
        let InstrumentFrame { inner, span } = *self;
        let _entered = span.enter();
        Step::Done(eval(inner, run))
    }
}
