use std::{any::Any, sync::Arc};

use crate::{
    any::TypeInfo,
    errors::{BindErrorKind, RunErrorKind},
    extract::Extract,
    frame::Frame,
    provider::{Body, BodyFn, Kind, Provider},
};

type FieldFn<S> = Arc<dyn Fn(&mut S, &Frame) -> Result<(), RunErrorKind> + Send + Sync>;

struct FieldPlan<S> {
    tag: Arc<str>,
    source: TypeInfo,
    populate: FieldFn<S>,
    /// The registered accessor, kept erased so post-actions declared later
    /// can be checked against the field's real type.
    accessor: Arc<dyn Any + Send + Sync>,
    actions: Vec<FieldFn<S>>,
}

/// Builds a provider that populates a struct field by field from the chain
/// and then runs tagged post-actions against the populated fields.
///
/// Fields are registered with a tag and an accessor; post-actions attach to
/// an already-registered tag and run after every field is populated, in
/// field-registration order. Registration mistakes (unknown tag, type
/// mismatch) are collected and reported together by [`StructBuilder::build`].
pub struct StructBuilder<S> {
    fields: Vec<FieldPlan<S>>,
    extra_inputs: Vec<TypeInfo>,
    defects: Vec<String>,
}

impl<S> StructBuilder<S>
where
    S: Default + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            extra_inputs: Vec::new(),
            defects: Vec::new(),
        }
    }

    /// Registers one field: its value is pulled from the chain by type and
    /// written through `access`.
    #[must_use]
    pub fn field<T>(mut self, tag: &str, access: fn(&mut S) -> &mut T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.fields.iter().any(|field| &*field.tag == tag) {
            self.defects.push(format!("field tag `{tag}` is registered twice"));
            return self;
        }
        let source = TypeInfo::of::<T>();
        let populate: FieldFn<S> = Arc::new(move |value: &mut S, frame: &Frame| {
            let found = frame.get::<T>().ok_or(RunErrorKind::MissingValue { needed: source })?;
            *access(value) = (*found).clone();
            Ok(())
        });
        self.fields.push(FieldPlan {
            tag: Arc::from(tag),
            source,
            populate,
            accessor: Arc::new(access),
            actions: Vec::new(),
        });
        self
    }

    /// Attaches a post-action that mutates the tagged field in place.
    #[must_use]
    pub fn post_action<T, A>(self, tag: &str, action: A) -> Self
    where
        T: Send + Sync + 'static,
        A: Fn(&mut T) + Send + Sync + 'static,
    {
        self.attach::<T, _>(tag, move |field, _frame| {
            action(field);
            Ok(())
        })
    }

    /// Attaches a post-action that observes a copy of the tagged field.
    #[must_use]
    pub fn post_action_value<T, A>(self, tag: &str, action: A) -> Self
    where
        T: Clone + Send + Sync + 'static,
        A: Fn(T) + Send + Sync + 'static,
    {
        self.attach::<T, _>(tag, move |field, _frame| {
            action(field.clone());
            Ok(())
        })
    }

    /// Attaches a post-action that mutates the tagged field with extra
    /// dependencies taken from the chain. The dependencies join the built
    /// provider's inputs.
    #[must_use]
    pub fn post_action_with<T, Deps, A>(mut self, tag: &str, action: A) -> Self
    where
        T: Send + Sync + 'static,
        Deps: Extract,
        A: Fn(&mut T, Deps) + Send + Sync + 'static,
    {
        Deps::append_types(&mut self.extra_inputs);
        self.attach::<T, _>(tag, move |field, frame| {
            let deps = Deps::extract(frame)?;
            action(field, deps);
            Ok(())
        })
    }

    /// Attaches a post-action that receives the tagged field through a
    /// conversion, for actions declared against a compatible rather than
    /// the exact field type.
    #[must_use]
    pub fn post_action_map<T, U, C, A>(self, tag: &str, convert: C, action: A) -> Self
    where
        T: Send + Sync + 'static,
        C: Fn(&T) -> U + Send + Sync + 'static,
        A: Fn(U) + Send + Sync + 'static,
    {
        self.attach::<T, _>(tag, move |field, _frame| {
            action(convert(field));
            Ok(())
        })
    }

    fn attach<T, A>(mut self, tag: &str, action: A) -> Self
    where
        T: Send + Sync + 'static,
        A: Fn(&mut T, &Frame) -> Result<(), RunErrorKind> + Send + Sync + 'static,
    {
        let Some(position) = self.fields.iter().position(|field| &*field.tag == tag) else {
            self.defects
                .push(format!("post-action `{tag}` has no matching field; register the field first"));
            return self;
        };
        let Ok(access) = self.fields[position].accessor.clone().downcast::<fn(&mut S) -> &mut T>() else {
            self.defects.push(format!(
                "post-action `{tag}` expects {}, but the field holds {}",
                TypeInfo::of::<T>(),
                self.fields[position].source
            ));
            return self;
        };
        let access = *access;
        self.fields[position]
            .actions
            .push(Arc::new(move |value: &mut S, frame: &Frame| action(access(value), frame)));
        self
    }

    /// Finalizes the builder into a provider producing `S`.
    pub fn build(self) -> Result<Provider, BindErrorKind> {
        if !self.defects.is_empty() {
            return Err(BindErrorKind::MalformedSignature {
                detail: self.defects.join("; "),
            });
        }

        let mut inputs: Vec<TypeInfo> = self.fields.iter().map(|field| field.source).collect();
        inputs.extend(self.extra_inputs.iter().copied());
        let outputs = vec![TypeInfo::of::<S>()];

        let fields = Arc::new(self.fields);
        let body: BodyFn = Arc::new(move |frame: &mut Frame, _label: &Arc<str>| {
            let mut value = S::default();
            for field in fields.iter() {
                (field.populate)(&mut value, frame)?;
            }
            for field in fields.iter() {
                for action in &field.actions {
                    action(&mut value, frame)?;
                }
            }
            frame.insert_raw(TypeInfo::of::<S>(), Arc::new(value));
            Ok(())
        });

        Ok(Provider::from_parts(
            Kind::StructBuilder,
            inputs,
            outputs,
            Vec::new(),
            Vec::new(),
            Body::Call(body),
        ))
    }

    /// Like [`StructBuilder::build`], panicking on registration defects.
    #[must_use]
    pub fn must_build(self) -> Provider {
        match self.build() {
            Ok(provider) => provider,
            Err(err) => panic!("struct builder: {err}"),
        }
    }
}

impl<S> Default for StructBuilder<S>
where
    S: Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::StructBuilder;
    use crate::{any::TypeInfo, errors::BindErrorKind, frame::Frame, provider::Body};

    use std::sync::Arc;

    #[derive(Default)]
    struct Config {
        size: i64,
        label: String,
    }

    fn run_body(provider: &crate::provider::Provider, frame: &mut Frame) {
        let Body::Call(body) = &provider.body else {
            panic!("expected a callable body");
        };
        body(frame, &Arc::from("test")).unwrap();
    }

    #[test]
    fn test_populates_and_squares() {
        let built = StructBuilder::<Config>::new()
            .field("size", |config| &mut config.size)
            .field("label", |config| &mut config.label)
            .post_action("size", |size: &mut i64| *size *= *size)
            .must_build();

        assert_eq!(
            built.input_types(),
            &[TypeInfo::of::<i64>(), TypeInfo::of::<String>()]
        );

        let mut frame = Frame::new();
        frame.insert_raw(TypeInfo::of::<i64>(), Arc::new(4_i64));
        frame.insert_raw(TypeInfo::of::<String>(), Arc::new("boxed".to_string()));
        run_body(&built, &mut frame);

        let config = frame.get::<Config>().unwrap();
        assert_eq!(config.size, 16);
        assert_eq!(config.label, "boxed");
    }

    #[test]
    fn test_actions_run_in_field_order() {
        let built = StructBuilder::<Config>::new()
            .field("size", |config| &mut config.size)
            .field("label", |config| &mut config.label)
            .post_action("label", |label: &mut String| label.push('!'))
            .post_action("size", |size: &mut i64| *size += 1)
            .post_action("label", |label: &mut String| label.push('?'))
            .must_build();

        let mut frame = Frame::new();
        frame.insert_raw(TypeInfo::of::<i64>(), Arc::new(1_i64));
        frame.insert_raw(TypeInfo::of::<String>(), Arc::new("hm".to_string()));
        run_body(&built, &mut frame);

        let config = frame.get::<Config>().unwrap();
        assert_eq!(config.label, "hm!?");
        assert_eq!(config.size, 2);
    }

    #[test]
    fn test_unknown_tag_is_a_defect() {
        let err = StructBuilder::<Config>::new()
            .field("size", |config| &mut config.size)
            .post_action("missing", |_: &mut i64| {})
            .build()
            .unwrap_err();
        assert!(matches!(err, BindErrorKind::MalformedSignature { .. }));
    }

    #[test]
    fn test_type_mismatch_is_a_defect() {
        let err = StructBuilder::<Config>::new()
            .field("size", |config| &mut config.size)
            .post_action("size", |_: &mut String| {})
            .build()
            .unwrap_err();
        assert!(matches!(err, BindErrorKind::MalformedSignature { detail } if detail.contains("size")));
    }
}
