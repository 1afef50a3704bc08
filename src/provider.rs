use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    any::{ArcAny, TypeInfo},
    cache::{MemoCell, SharedMemoCell},
    errors::RunErrorKind,
    extract::{Extract, MemoInput},
    factory::Factory,
    frame::Frame,
    outputs::Outputs,
    wrapper::WrapBody,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// What a provider is, beyond its wiring surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A callable taking inputs and pushing outputs down the chain.
    Function,
    /// A constant value, available before anything else runs.
    Instance,
    /// A callable wrapping the remainder of the chain behind an inner
    /// continuation.
    Wrapper,
    /// A populate-then-post-act struct builder.
    StructBuilder,
}

/// Composition annotations. All default to off.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Flags {
    pub(crate) cacheable: bool,
    pub(crate) must_cache: bool,
    pub(crate) not_cacheable: bool,
    pub(crate) memoize: bool,
    pub(crate) required: bool,
    pub(crate) desired: bool,
    pub(crate) must_consume: bool,
    pub(crate) consumption_optional: bool,
    pub(crate) loose: bool,
    pub(crate) calls_inner: bool,
}

/// An interface-satisfaction registration: with the `loose` flag set, the
/// provider's `source` output may also satisfy consumers asking for
/// `target`, through `convert`.
#[derive(Clone)]
pub(crate) struct Coercion {
    pub(crate) source: TypeInfo,
    pub(crate) target: TypeInfo,
    pub(crate) convert: Arc<dyn Fn(&ArcAny) -> Option<ArcAny> + Send + Sync>,
}

pub(crate) type BodyFn = Arc<dyn Fn(&mut Frame, &Arc<str>) -> Result<(), RunErrorKind> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Body {
    Call(BodyFn),
    Value(TypeInfo, ArcAny),
    Wrap(WrapBody),
}

/// An immutable injectable unit: a function, constant, wrapper, or struct
/// builder, together with its declared input/output types and annotations.
///
/// Annotating never mutates: every annotation method consumes `self` and
/// returns a distinctly-annotated copy, so a provider shared between
/// collections cannot be changed behind their back.
#[derive(Clone)]
pub struct Provider {
    pub(crate) id: u64,
    pub(crate) label: Option<Arc<str>>,
    pub(crate) kind: Kind,
    pub(crate) flags: Flags,
    pub(crate) inputs: Arc<[TypeInfo]>,
    pub(crate) outputs: Arc<[TypeInfo]>,
    /// Types a wrapper pulls back out of its inner continuation.
    pub(crate) ups: Arc<[TypeInfo]>,
    /// Types a wrapper (or the terminal function) sends upward.
    pub(crate) returns: Arc<[TypeInfo]>,
    pub(crate) coercions: Vec<Coercion>,
    pub(crate) body: Body,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl Provider {
    pub(crate) fn from_parts(
        kind: Kind,
        inputs: Vec<TypeInfo>,
        outputs: Vec<TypeInfo>,
        ups: Vec<TypeInfo>,
        returns: Vec<TypeInfo>,
        body: Body,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            label: None,
            kind,
            flags: Flags::default(),
            inputs: inputs.into(),
            outputs: outputs.into(),
            ups: ups.into(),
            returns: returns.into(),
            coercions: Vec::new(),
            body,
        }
    }

    /// Gives the provider a display name for diagnostics. Unnamed providers
    /// are named after their position when a collection is flattened.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.label = Some(Arc::from(name));
        self
    }

    /// Allows placement in the static (once per chain) segment.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.flags.cacheable = true;
        self
    }

    /// Requires placement in the static segment; binding fails otherwise.
    #[must_use]
    pub fn must_cache(mut self) -> Self {
        self.flags.must_cache = true;
        self.flags.cacheable = true;
        self
    }

    /// Forbids placement in the static segment. Combining this with
    /// `must_cache` is a binding error.
    #[must_use]
    pub fn not_cacheable(mut self) -> Self {
        self.flags.not_cacheable = true;
        self
    }

    /// Forces inclusion even when no output is consumed; an unmet
    /// dependency then fails the bind.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.flags.required = true;
        self
    }

    /// Best-effort inclusion: kept unless that would create an unmet
    /// dependency, in which case the provider is silently dropped.
    #[must_use]
    pub fn desired(mut self) -> Self {
        self.flags.desired = true;
        self
    }

    /// Drops the provider whenever any of its outputs would go unconsumed.
    #[must_use]
    pub fn must_consume(mut self) -> Self {
        self.flags.must_consume = true;
        self
    }

    /// Permits a wrapper's upward return values to go unconsumed.
    #[must_use]
    pub fn consumption_optional(mut self) -> Self {
        self.flags.consumption_optional = true;
        self
    }

    /// Enables interface-satisfaction matching for this provider's
    /// registered coercions (see [`Provider::satisfies`]).
    #[must_use]
    pub fn loose(mut self) -> Self {
        self.flags.loose = true;
        self
    }

    /// Metadata promise that a wrapper always invokes its inner
    /// continuation. Carried for introspection; not load-bearing.
    #[must_use]
    pub fn calls_inner(mut self) -> Self {
        self.flags.calls_inner = true;
        self
    }

    /// Registers that the `T` output can satisfy consumers of `I` through
    /// `convert`, and marks the provider loose. `T` must be one of the
    /// provider's outputs; binding verifies this.
    #[must_use]
    pub fn satisfies<T, I, C>(mut self, convert: C) -> Self
    where
        T: Send + Sync + 'static,
        I: Send + Sync + 'static,
        C: Fn(&T) -> I + Send + Sync + 'static,
    {
        self.coercions.push(Coercion {
            source: TypeInfo::of::<T>(),
            target: TypeInfo::of::<I>(),
            convert: Arc::new(move |value: &ArcAny| {
                value.downcast_ref::<T>().map(|inner| Arc::new(convert(inner)) as ArcAny)
            }),
        });
        self.flags.loose = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn input_types(&self) -> &[TypeInfo] {
        &self.inputs
    }

    #[inline]
    #[must_use]
    pub fn output_types(&self) -> &[TypeInfo] {
        &self.outputs
    }
}

/// Creates a function provider from a closure over [`Extract`] parameters
/// returning a tuple of outputs.
#[must_use]
pub fn provider<F, Deps>(f: F) -> Provider
where
    F: Factory<Deps>,
    Deps: Extract,
{
    let mut inputs = Vec::new();
    Deps::append_types(&mut inputs);
    let mut outputs = Vec::new();
    F::Provides::append_types(&mut outputs);

    let body: BodyFn = Arc::new(move |frame: &mut Frame, label: &Arc<str>| {
        let deps = Deps::extract(frame)?;
        let produced = f.produce(deps).map_err(|err| RunErrorKind::Provide {
            provider: label.clone(),
            source: err.into(),
        })?;
        for (info, value) in produced.into_values() {
            frame.insert_raw(info, value);
        }
        Ok(())
    });

    Provider::from_parts(Kind::Function, inputs, outputs, Vec::new(), Vec::new(), Body::Call(body))
}

/// Creates a constant provider from a value built outside the chain.
/// Constants are available before the static segment starts.
#[must_use]
pub fn instance<T: Send + Sync + 'static>(value: T) -> Provider {
    let info = TypeInfo::of::<T>();
    let mut built = Provider::from_parts(
        Kind::Instance,
        Vec::new(),
        vec![info],
        Vec::new(),
        Vec::new(),
        Body::Value(info, Arc::new(value)),
    );
    built.flags.cacheable = true;
    built
}

/// Creates a function provider that executes once per distinct input
/// combination, process-wide.
///
/// The memo bucket lives inside the provider value, so clones of this
/// provider (including copies held by different collections and bound
/// chains) share one cache. Every parameter must yield a hashable key;
/// that requirement is enforced at compile time through [`MemoInput`].
#[must_use]
pub fn memoize<F, Deps>(f: F) -> Provider
where
    F: Factory<Deps>,
    Deps: Extract + MemoInput,
{
    let mut inputs = Vec::new();
    Deps::append_types(&mut inputs);
    let mut outputs = Vec::new();
    F::Provides::append_types(&mut outputs);

    let cell: SharedMemoCell<Deps::Key> = Arc::new(MemoCell::new());
    let body: BodyFn = Arc::new(move |frame: &mut Frame, label: &Arc<str>| {
        let deps = Deps::extract(frame)?;
        let key = deps.memo_key();
        let values = cell
            .get_or_compute(key, || f.produce(deps).map(|out| out.into_values()).map_err(Into::into))
            .map_err(|err| RunErrorKind::Provide {
                provider: label.clone(),
                source: err,
            })?;
        for (info, value) in values {
            frame.insert_raw(info, value);
        }
        Ok(())
    });

    let mut built = Provider::from_parts(Kind::Function, inputs, outputs, Vec::new(), Vec::new(), Body::Call(body));
    built.flags.memoize = true;
    built.flags.cacheable = true;
    built
}
