use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use wireup::{wrap, Cloned, Collection, Next, ProvideErrorKind};

#[test]
fn test_wrapper_injects_downward_and_observes_upward() {
    let observed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();

    let chain = Collection::new("framed")
        .with(wrap(move |inner: Next<(u32,), (String,)>| {
            let (rendered,) = inner.call((6,))?;
            sink.lock().push(rendered.clone());
            Ok::<_, ProvideErrorKind>(())
        }))
        .provide(|Cloned(n): Cloned<u32>| Ok::<_, ProvideErrorKind>((format!("n={n}"),)));

    let invoker = chain.bind::<(), (String,)>().unwrap();
    let (result,) = invoker.call(()).unwrap();

    assert_eq!(result, "n=6");
    assert_eq!(observed.lock().as_slice(), &["n=6".to_string()]);
}

#[test]
fn test_wrapper_return_flows_to_caller() {
    let chain = Collection::new("measured")
        .with(wrap(|inner: Next<(), (String,)>| {
            let (text,) = inner.call(())?;
            Ok::<_, ProvideErrorKind>((text.len() as i64,))
        }))
        .provide(|Cloned(seed): Cloned<String>| Ok::<_, ProvideErrorKind>((format!("<{seed}>"),)));

    let invoker = chain.bind::<(String,), (i64, String)>().unwrap();
    let (len, text) = invoker.call(("abc".to_string(),)).unwrap();

    assert_eq!(text, "<abc>");
    assert_eq!(len, 5);
}

#[test]
fn test_wrapper_with_unconsumed_return_is_dropped() {
    let entered = Arc::new(AtomicUsize::new(0));
    let observed = entered.clone();

    let chain = Collection::new("plain")
        .with(wrap(move |inner: Next<(), (String,)>| {
            observed.fetch_add(1, Ordering::SeqCst);
            let (text,) = inner.call(())?;
            Ok::<_, ProvideErrorKind>((text.len() as i64,))
        }))
        .provide(|Cloned(seed): Cloned<String>| Ok::<_, ProvideErrorKind>((seed,)));

    // Nothing consumes the wrapper's i64, so the wrapper is cut.
    let invoker = chain.bind::<(String,), (String,)>().unwrap();
    let (text,) = invoker.call(("kept".to_string(),)).unwrap();

    assert_eq!(text, "kept");
    assert_eq!(entered.load(Ordering::SeqCst), 0);
}

#[test]
fn test_consumption_optional_keeps_unobserved_wrapper() {
    let entered = Arc::new(AtomicUsize::new(0));
    let observed = entered.clone();

    let chain = Collection::new("tolerant")
        .with(
            wrap(move |inner: Next<(), (String,)>| {
                observed.fetch_add(1, Ordering::SeqCst);
                let (text,) = inner.call(())?;
                Ok::<_, ProvideErrorKind>((text.len() as i64,))
            })
            .consumption_optional(),
        )
        .provide(|Cloned(seed): Cloned<String>| Ok::<_, ProvideErrorKind>((seed,)));

    let invoker = chain.bind::<(String,), (String,)>().unwrap();
    invoker.call(("kept".to_string(),)).unwrap();

    assert_eq!(entered.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wrapper_can_short_circuit_the_chain() {
    let terminal_runs = Arc::new(AtomicUsize::new(0));
    let observed = terminal_runs.clone();

    let chain = Collection::new("gated")
        .with(wrap(|inner: Next<(), (String,)>, Cloned(open): Cloned<bool>| {
            if open {
                let (text,) = inner.call(())?;
                Ok::<_, ProvideErrorKind>((text,))
            } else {
                Ok(("gate closed".to_string(),))
            }
        }))
        .provide(move || {
            observed.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProvideErrorKind>(("passed".to_string(),))
        });

    let invoker = chain.bind::<(bool,), (String,)>().unwrap();

    assert_eq!(invoker.call((false,)).unwrap(), ("gate closed".to_string(),));
    assert_eq!(terminal_runs.load(Ordering::SeqCst), 0);
    assert_eq!(invoker.call((true,)).unwrap(), ("passed".to_string(),));
    assert_eq!(terminal_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_nested_wrappers_unwind_inside_out() {
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let outer_trace = trace.clone();
    let inner_trace = trace.clone();
    let terminal_trace = trace.clone();

    let chain = Collection::new("nested")
        .with(
            wrap(move |inner: Next<(), (i64,)>| {
                outer_trace.lock().push("outer:enter");
                let (value,) = inner.call(())?;
                outer_trace.lock().push("outer:exit");
                Ok::<_, ProvideErrorKind>((value + 1,))
            })
            .named("outer"),
        )
        .with(
            wrap(move |inner: Next<(), (i64,)>| {
                inner_trace.lock().push("inner:enter");
                let (value,) = inner.call(())?;
                inner_trace.lock().push("inner:exit");
                Ok::<_, ProvideErrorKind>((value * 10,))
            })
            .named("inner"),
        )
        .provide(move || {
            terminal_trace.lock().push("terminal");
            Ok::<_, ProvideErrorKind>((4_i64,))
        });

    let invoker = chain.bind::<(), (i64,)>().unwrap();
    let (value,) = invoker.call(()).unwrap();

    // outer observes inner's transformed value, then adds its own.
    assert_eq!(value, 41);
    assert_eq!(
        trace.lock().as_slice(),
        &["outer:enter", "inner:enter", "terminal", "inner:exit", "outer:exit"]
    );
}
