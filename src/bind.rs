use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info_span, trace};

use crate::{
    any::TypeInfo,
    collection::Collection,
    errors::{BindError, RunErrorKind},
    frame::Frame,
    graph::{plan, PlanInput, Step},
    outputs::{Outputs, Signature},
    provider::Body,
};

/// The immutable compiled chain: validated steps in execution order plus
/// everything needed to route external parameters.
pub(crate) struct PlanCore {
    pub(crate) steps: Vec<Step>,
    pub(crate) static_len: usize,
    pub(crate) terminal_outputs: Vec<TypeInfo>,
    pub(crate) init_args: Vec<TypeInfo>,
}

impl PlanCore {
    /// Runs the static segment against `frame`. Wrappers never partition
    /// into the static segment, so only plain bodies appear here.
    pub(crate) fn execute_static(&self, frame: &mut Frame) -> Result<(), RunErrorKind> {
        for step in &self.steps[..self.static_len] {
            trace!(step = %step.name, "Executing static step");
            match &step.body {
                Body::Value(info, value) => frame.insert_raw(*info, value.clone()),
                Body::Call(call) => call(frame, &step.name)?,
                Body::Wrap(_) => continue,
            }
        }
        Ok(())
    }

    /// Runs the chain from `index` to the end, returning the final downward
    /// frame and the upward frame. A wrapper step takes over the rest of
    /// the chain; the upward frame then comes out of its body.
    pub(crate) fn execute_from(self: &Arc<Self>, index: usize, mut frame: Frame) -> Result<(Frame, Frame), RunErrorKind> {
        let mut position = index;
        while position < self.steps.len() {
            let step = &self.steps[position];
            trace!(step = %step.name, "Executing step");
            match &step.body {
                Body::Value(info, value) => frame.insert_raw(*info, value.clone()),
                Body::Call(call) => call(&mut frame, &step.name)?,
                Body::Wrap(wrap) => {
                    let up = wrap(&mut frame, self, position + 1, &step.name)?;
                    return Ok((frame, up));
                }
            }
            position += 1;
        }

        let mut up = Frame::new();
        for info in &self.terminal_outputs {
            if let Some(value) = frame.get_raw(&info.id) {
                up.insert_raw(*info, value);
            }
        }
        Ok((frame, up))
    }
}

/// Shared state of one bound chain: the compiled plan plus the static
/// snapshot, filled in exactly once.
struct BoundInner {
    core: Arc<PlanCore>,
    state: Mutex<Option<Frame>>,
}

impl BoundInner {
    fn initialize(&self, mut frame: Frame) -> Result<Frame, RunErrorKind> {
        self.core.execute_static(&mut frame)?;
        debug!(steps = self.core.static_len, "Static segment executed");
        Ok(frame)
    }
}

/// One-time entry point of a bound chain: executes the static segment and
/// caches its results.
///
/// Calling it again is a no-op returning the first call's results, even
/// under concurrent first calls; the internal lock guarantees a single
/// physical execution.
pub struct Initializer<IArgs, IRet> {
    inner: Arc<BoundInner>,
    _marker: PhantomData<fn(IArgs) -> IRet>,
}

impl<IArgs, IRet> Clone for Initializer<IArgs, IRet> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<IArgs, IRet> Initializer<IArgs, IRet>
where
    IArgs: Outputs,
    IRet: Signature,
{
    pub fn call(&self, args: IArgs) -> Result<IRet, RunErrorKind> {
        let mut state = self.inner.state.lock();
        if state.is_none() {
            let mut frame = Frame::new();
            // Reverse insertion makes the first slot win among duplicate
            // parameter types, matching resolution order.
            for (info, value) in args.into_values().into_iter().rev() {
                frame.insert_raw(info, value);
            }
            *state = Some(self.inner.initialize(frame)?);
        }
        match &*state {
            Some(snapshot) => IRet::from_frames(snapshot, snapshot),
            None => Err(RunErrorKind::NotInitialized),
        }
    }
}

/// Per-call entry point of a bound chain: executes the run segment on top
/// of the static snapshot. Cheap to clone and safe to call concurrently.
pub struct Invoker<Args, Ret> {
    inner: Arc<BoundInner>,
    _marker: PhantomData<fn(Args) -> Ret>,
}

impl<Args, Ret> std::fmt::Debug for Invoker<Args, Ret> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker").finish_non_exhaustive()
    }
}

impl<Args, Ret> Clone for Invoker<Args, Ret> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Args, Ret> Invoker<Args, Ret>
where
    Args: Outputs,
    Ret: Signature,
{
    pub fn call(&self, args: Args) -> Result<Ret, RunErrorKind> {
        let snapshot = {
            let mut state = self.inner.state.lock();
            match &*state {
                Some(frame) => frame.clone(),
                // A chain without initialization parameters initializes
                // itself lazily on first invocation.
                None if self.inner.core.init_args.is_empty() => {
                    let frame = self.inner.initialize(Frame::new())?;
                    *state = Some(frame.clone());
                    frame
                }
                None => return Err(RunErrorKind::NotInitialized),
            }
        };

        let mut frame = snapshot;
        for (info, value) in args.into_values().into_iter().rev() {
            frame.insert_raw(info, value);
        }
        let core = &self.inner.core;
        let (down, up) = core.execute_from(core.static_len, frame)?;
        Ret::from_frames(&up, &down)
    }
}

impl Collection {
    /// Compiles this collection into a per-call invoker with the given
    /// parameter and result tuples.
    ///
    /// The chain initializes itself on the first invocation. Use
    /// [`Collection::bind_with_init`] when initialization needs its own
    /// parameters or results.
    pub fn bind<Args, Ret>(&self) -> Result<Invoker<Args, Ret>, BindError>
    where
        Args: Outputs,
        Ret: Signature,
    {
        self.bind_with_init::<(), (), Args, Ret>().map(|(_, invoker)| invoker)
    }

    /// Compiles this collection into an initializer/invoker pair.
    ///
    /// Binding is all-or-nothing: resolution, validity checking, and
    /// partitioning happen here, and the returned callables perform no
    /// further graph analysis.
    pub fn bind_with_init<IArgs, IRet, Args, Ret>(
        &self,
    ) -> Result<(Initializer<IArgs, IRet>, Invoker<Args, Ret>), BindError>
    where
        IArgs: Outputs,
        IRet: Signature,
        Args: Outputs,
        Ret: Signature,
    {
        let span = info_span!("bind", chain = %self.name());
        let _guard = span.enter();

        let mut init_args = Vec::new();
        IArgs::append_types(&mut init_args);
        let mut init_rets = Vec::new();
        IRet::append_types(&mut init_rets);
        let mut invoke_args = Vec::new();
        Args::append_types(&mut invoke_args);
        let mut invoke_rets = Vec::new();
        Ret::append_types(&mut invoke_rets);

        let entries = self.flatten();
        let planned = plan(&PlanInput {
            entries: &entries,
            init_args: &init_args,
            init_rets: &init_rets,
            invoke_args: &invoke_args,
            invoke_rets: &invoke_rets,
        })
        .map_err(|errors| BindError::new(self.name.clone(), errors))?;
        debug!(
            steps = planned.steps.len(),
            static_steps = planned.static_len,
            "Chain bound"
        );

        let inner = Arc::new(BoundInner {
            core: Arc::new(PlanCore {
                steps: planned.steps,
                static_len: planned.static_len,
                terminal_outputs: planned.terminal_outputs,
                init_args,
            }),
            state: Mutex::new(None),
        });
        Ok((
            Initializer {
                inner: inner.clone(),
                _marker: PhantomData,
            },
            Invoker {
                inner,
                _marker: PhantomData,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        collection::Collection,
        errors::{ProvideErrorKind, RunErrorKind},
        extract::Cloned,
        provider::provider,
    };

    use std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    };

    #[test]
    fn test_two_stage_invocation() {
        let chain = Collection::new("report")
            .provide(|Cloned(s): Cloned<String>| Ok::<_, ProvideErrorKind>((s.len() as i64,)))
            .provide(|Cloned(n): Cloned<i64>, Cloned(s): Cloned<String>| {
                Ok::<_, ProvideErrorKind>((format!("{n} {s}"),))
            });

        let invoker = chain.bind::<(String,), (String,)>().unwrap();
        let (report,) = invoker.call(("hello".to_string(),)).unwrap();
        assert_eq!(report, "5 hello");
    }

    #[test]
    fn test_static_segment_runs_once() {
        let counter = Arc::new(AtomicU8::new(0));
        let observed = counter.clone();
        let chain = Collection::new("counted")
            .with(
                provider(move || {
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProvideErrorKind>((40_i64,))
                })
                .cacheable(),
            )
            .provide(|Cloned(n): Cloned<i64>| Ok::<_, ProvideErrorKind>((n + 2,)));

        let (init, invoker) = chain.bind_with_init::<(), (), (), (i64,)>().unwrap();
        init.call(()).unwrap();
        init.call(()).unwrap();
        let (a,) = invoker.call(()).unwrap();
        let (b,) = invoker.call(()).unwrap();

        assert_eq!((a, b), (42, 42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoke_before_required_init_fails() {
        let chain = Collection::new("needs_init")
            .with(
                provider(|Cloned(base): Cloned<i64>| Ok::<_, ProvideErrorKind>((base * 10,))).cacheable(),
            )
            .provide(|Cloned(n): Cloned<i64>| Ok::<_, ProvideErrorKind>((n.to_string(),)));

        let (init, invoker) = chain.bind_with_init::<(i64,), (), (), (String,)>().unwrap();
        assert!(matches!(invoker.call(()), Err(RunErrorKind::NotInitialized)));

        init.call((7,)).unwrap();
        let (text,) = invoker.call(()).unwrap();
        assert_eq!(text, "70");
    }

    #[test]
    fn test_rebinding_is_independent() {
        let counter = Arc::new(AtomicU8::new(0));
        let observed = counter.clone();
        let chain = Collection::new("counted")
            .with(
                provider(move || {
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProvideErrorKind>((1_u8,))
                })
                .cacheable(),
            )
            .provide(|Cloned(n): Cloned<u8>| Ok::<_, ProvideErrorKind>((n,)));

        let first = chain.bind::<(), (u8,)>().unwrap();
        let second = chain.bind::<(), (u8,)>().unwrap();
        first.call(()).unwrap();
        second.call(()).unwrap();

        // Each bound chain owns its own static snapshot.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
