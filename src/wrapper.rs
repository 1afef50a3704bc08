use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
    bind::PlanCore,
    errors::{ProvideErrorKind, RunErrorKind},
    extract::Extract,
    frame::Frame,
    outputs::{Outputs, Signature},
    provider::{Body, Kind, Provider},
};

pub(crate) type WrapBody =
    Arc<dyn Fn(&mut Frame, &Arc<PlanCore>, usize, &Arc<str>) -> Result<Frame, RunErrorKind> + Send + Sync>;

/// The continuation handed to a wrapper: calling it runs the rest of the
/// chain.
///
/// `Extra` is the tuple of values the wrapper sends downward to the inner
/// segment; `Up` is the tuple it pulls back out of the inner segment's
/// upward flow. `call` consumes the continuation, so a wrapper can invoke
/// the remainder of the chain at most once.
pub struct Next<Extra, Up> {
    frame: Frame,
    plan: Arc<PlanCore>,
    index: usize,
    up_slot: Arc<Mutex<Option<Frame>>>,
    _marker: PhantomData<fn(Extra) -> Up>,
}

impl<Extra, Up> Next<Extra, Up>
where
    Extra: Outputs,
    Up: Signature,
{
    /// Runs the inner segment with `extra` added to the downward values and
    /// returns the requested upward values.
    pub fn call(mut self, extra: Extra) -> Result<Up, RunErrorKind> {
        for (info, value) in extra.into_values() {
            self.frame.insert_raw(info, value);
        }
        let (down, up) = self.plan.execute_from(self.index, self.frame)?;
        let result = Up::from_frames(&up, &down)?;
        *self.up_slot.lock() = Some(up);
        Ok(result)
    }
}

/// A callable that can serve as a wrapper body.
///
/// Implemented for closures taking a [`Next`] continuation first and
/// [`Extract`] parameters after it, returning `Result<returns-tuple, E>`.
/// The returns tuple joins the upward flow above this wrapper.
pub trait Wrapper<Deps, Extra, Up>: Clone + Send + Sync + 'static
where
    Deps: Extract,
    Extra: Outputs,
    Up: Signature,
{
    type Returns: Outputs;
    type Error: Into<ProvideErrorKind>;

    fn wrap(&self, inner: Next<Extra, Up>, deps: Deps) -> Result<Self::Returns, Self::Error>;
}

macro_rules! impl_wrapper {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case)]
        impl<F, Extra, Up, Ret, Err, $($ty,)*> Wrapper<($($ty,)*), Extra, Up> for F
        where
            F: Fn(Next<Extra, Up>, $($ty,)*) -> Result<Ret, Err> + Clone + Send + Sync + 'static,
            Extra: Outputs,
            Up: Signature,
            Ret: Outputs,
            Err: Into<ProvideErrorKind>,
            $( $ty: Extract, )*
        {
            type Returns = Ret;
            type Error = Err;

            fn wrap(&self, inner: Next<Extra, Up>, ($($ty,)*): ($($ty,)*)) -> Result<Ret, Err> {
                self(inner, $($ty),*)
            }
        }
    };
}

all_the_tuples!(impl_wrapper);

/// Creates a wrapper provider: a callable that runs code before and after
/// the rest of the chain, injects values downward, and observes values
/// flowing upward.
#[must_use]
pub fn wrap<W, Deps, Extra, Up>(wrapper: W) -> Provider
where
    W: Wrapper<Deps, Extra, Up>,
    Deps: Extract,
    Extra: Outputs,
    Up: Signature,
{
    let mut inputs = Vec::new();
    Deps::append_types(&mut inputs);
    let mut outputs = Vec::new();
    Extra::append_types(&mut outputs);
    let mut ups = Vec::new();
    Up::append_types(&mut ups);
    let mut returns = Vec::new();
    W::Returns::append_types(&mut returns);

    let body: WrapBody = Arc::new(
        move |frame: &mut Frame, plan: &Arc<PlanCore>, index: usize, label: &Arc<str>| {
            let deps = Deps::extract(frame)?;
            let up_slot = Arc::new(Mutex::new(None));
            let inner = Next {
                frame: frame.clone(),
                plan: plan.clone(),
                index,
                up_slot: up_slot.clone(),
                _marker: PhantomData,
            };
            let returned = wrapper.wrap(inner, deps).map_err(|err| RunErrorKind::Provide {
                provider: label.clone(),
                source: err.into(),
            })?;

            // When the wrapper never invoked its continuation the upward
            // flow starts empty here.
            let mut up = up_slot.lock().take().unwrap_or_default();
            for (info, value) in returned.into_values() {
                up.insert_raw(info, value);
            }
            Ok(up)
        },
    );

    Provider::from_parts(Kind::Wrapper, inputs, outputs, ups, returns, Body::Wrap(body))
}

#[cfg(test)]
mod tests {
    use super::{wrap, Next};
    use crate::{any::TypeInfo, errors::ProvideErrorKind, extract::Cloned, provider::Kind};

    #[test]
    fn test_declared_wiring() {
        let timing = wrap(|inner: Next<(u32,), (String,)>, Cloned(base): Cloned<u8>| {
            let (text,) = inner.call((u32::from(base),))?;
            Ok::<_, ProvideErrorKind>((text.len() as i64,))
        });

        assert_eq!(timing.kind(), Kind::Wrapper);
        assert_eq!(timing.input_types(), &[TypeInfo::of::<u8>()]);
        assert_eq!(timing.output_types(), &[TypeInfo::of::<u32>()]);
        assert_eq!(&*timing.ups, &[TypeInfo::of::<String>()]);
        assert_eq!(&*timing.returns, &[TypeInfo::of::<i64>()]);
    }
}
