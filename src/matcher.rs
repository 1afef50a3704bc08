use crate::{any::TypeInfo, collection::FlatEntry, errors::BindErrorKind};

/// Where one resolved input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// Output of the provider at this flattened position.
    Step(usize),
    /// Loose match: the provider at this position produces a type coercible
    /// to the requested one.
    Coerced(usize),
    /// Caller-supplied invoke parameter slot.
    InvokeArg(usize),
    /// Caller-supplied initialization parameter slot.
    InitArg(usize),
}

/// The flattened provider pool plus the external parameter types, the whole
/// search space for input resolution.
pub(crate) struct Pool<'a> {
    pub(crate) entries: &'a [FlatEntry],
    pub(crate) invoke_args: &'a [TypeInfo],
    pub(crate) init_args: &'a [TypeInfo],
    /// The terminal function's outputs flow upward, never downward, so it
    /// is barred from acting as a producer.
    pub(crate) terminal: Option<usize>,
}

impl Pool<'_> {
    /// Resolves one input of the provider at `consumer`, considering only
    /// providers still marked included.
    ///
    /// Preference order: the nearest preceding exact producer, then an
    /// external parameter (invoke before init), then the nearest preceding
    /// loose producer, then a unique later producer (exact before loose),
    /// whose pull forward is legal as long as the dependency edges permit
    /// it. Two or more eligible later producers are ambiguous. A provider
    /// producing a type it also consumes never feeds itself; the value
    /// passes through from elsewhere.
    pub(crate) fn find_producer(
        &self,
        consumer: usize,
        needed: TypeInfo,
        included: &[bool],
    ) -> Result<Option<Source>, BindErrorKind> {
        for index in (0..consumer).rev() {
            if included[index] && self.produces_exact(index, needed) {
                return Ok(Some(Source::Step(index)));
            }
        }

        if let Some(slot) = self.invoke_args.iter().position(|info| *info == needed) {
            return Ok(Some(Source::InvokeArg(slot)));
        }
        if let Some(slot) = self.init_args.iter().position(|info| *info == needed) {
            return Ok(Some(Source::InitArg(slot)));
        }

        for index in (0..consumer).rev() {
            if included[index] && self.produces_loose(index, needed) {
                return Ok(Some(Source::Coerced(index)));
            }
        }

        let later_exact: Vec<usize> = (consumer + 1..self.entries.len())
            .filter(|&index| included[index] && self.produces_exact(index, needed))
            .collect();
        match later_exact.as_slice() {
            [] => {}
            [single] => return Ok(Some(Source::Step(*single))),
            many => return Err(self.ambiguous(consumer, needed, many)),
        }

        let later_loose: Vec<usize> = (consumer + 1..self.entries.len())
            .filter(|&index| included[index] && self.produces_loose(index, needed))
            .collect();
        match later_loose.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(Source::Coerced(*single))),
            many => Err(self.ambiguous(consumer, needed, many)),
        }
    }

    #[inline]
    pub(crate) fn produces_exact(&self, index: usize, needed: TypeInfo) -> bool {
        self.terminal != Some(index) && self.entries[index].provider.outputs.contains(&needed)
    }

    #[inline]
    pub(crate) fn produces_loose(&self, index: usize, needed: TypeInfo) -> bool {
        if self.terminal == Some(index) {
            return false;
        }
        let provider = &self.entries[index].provider;
        provider.flags.loose && provider.coercions.iter().any(|coercion| coercion.target == needed)
    }

    fn ambiguous(&self, consumer: usize, needed: TypeInfo, candidates: &[usize]) -> BindErrorKind {
        BindErrorKind::AmbiguousResolution {
            consumer: self.entries[consumer].name.clone(),
            needed,
            candidates: candidates
                .iter()
                .map(|&index| self.entries[index].name.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Pool, Source};
    use crate::{
        any::TypeInfo,
        collection::Collection,
        errors::{BindErrorKind, ProvideErrorKind},
        extract::Cloned,
    };

    fn all_included(len: usize) -> Vec<bool> {
        vec![true; len]
    }

    #[test]
    fn test_prefers_nearest_preceding_producer() {
        let chain = Collection::new("chain")
            .value(1_i64)
            .value(2_i64)
            .provide(|Cloned(x): Cloned<i64>| Ok::<_, ProvideErrorKind>((x.to_string(),)));
        let entries = chain.flatten();
        let pool = Pool {
            entries: &entries,
            invoke_args: &[],
            init_args: &[],
            terminal: None,
        };

        let source = pool
            .find_producer(2, TypeInfo::of::<i64>(), &all_included(3))
            .unwrap();
        assert_eq!(source, Some(Source::Step(1)));
    }

    #[test]
    fn test_invoke_arg_beats_init_arg_and_later_producer() {
        let chain = Collection::new("chain")
            .provide(|Cloned(x): Cloned<i64>| Ok::<_, ProvideErrorKind>((x.to_string(),)))
            .value(9_i64);
        let entries = chain.flatten();
        let invoke_args = [TypeInfo::of::<i64>()];
        let init_args = [TypeInfo::of::<i64>()];
        let pool = Pool {
            entries: &entries,
            invoke_args: &invoke_args,
            init_args: &init_args,
            terminal: None,
        };

        let source = pool
            .find_producer(0, TypeInfo::of::<i64>(), &all_included(2))
            .unwrap();
        assert_eq!(source, Some(Source::InvokeArg(0)));
    }

    #[test]
    fn test_unique_later_producer_is_pulled_forward() {
        let chain = Collection::new("chain")
            .provide(|Cloned(x): Cloned<i64>| Ok::<_, ProvideErrorKind>((x.to_string(),)))
            .value(9_i64);
        let entries = chain.flatten();
        let pool = Pool {
            entries: &entries,
            invoke_args: &[],
            init_args: &[],
            terminal: None,
        };

        let source = pool
            .find_producer(0, TypeInfo::of::<i64>(), &all_included(2))
            .unwrap();
        assert_eq!(source, Some(Source::Step(1)));
    }

    #[test]
    fn test_two_later_producers_are_ambiguous() {
        let chain = Collection::new("chain")
            .provide(|Cloned(x): Cloned<i64>| Ok::<_, ProvideErrorKind>((x.to_string(),)))
            .value(1_i64)
            .value(2_i64);
        let entries = chain.flatten();
        let pool = Pool {
            entries: &entries,
            invoke_args: &[],
            init_args: &[],
            terminal: None,
        };

        let err = pool
            .find_producer(0, TypeInfo::of::<i64>(), &all_included(3))
            .unwrap_err();
        assert!(matches!(err, BindErrorKind::AmbiguousResolution { candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn test_excluded_producers_are_invisible() {
        let chain = Collection::new("chain")
            .value(1_i64)
            .provide(|Cloned(x): Cloned<i64>| Ok::<_, ProvideErrorKind>((x.to_string(),)));
        let entries = chain.flatten();
        let pool = Pool {
            entries: &entries,
            invoke_args: &[],
            init_args: &[],
            terminal: None,
        };

        let source = pool
            .find_producer(1, TypeInfo::of::<i64>(), &[false, true])
            .unwrap();
        assert_eq!(source, None);
    }
}
