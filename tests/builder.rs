use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use wireup::{Cloned, Collection, ProvideErrorKind, StructBuilder};

#[derive(Clone, Default)]
struct Job {
    priority: i64,
    queue: String,
}

#[test]
fn test_builder_in_a_chain_squares_tagged_field() {
    let builder = StructBuilder::<Job>::new()
        .field("priority", |job| &mut job.priority)
        .field("queue", |job| &mut job.queue)
        .post_action("priority", |priority: &mut i64| *priority *= *priority)
        .must_build();

    let chain = Collection::new("jobs")
        .value("ingest".to_string())
        .with(builder)
        .provide(|Cloned(job): Cloned<Job>| Ok::<_, ProvideErrorKind>((job.priority, job.queue)));

    let invoker = chain.bind::<(i64,), (i64, String)>().unwrap();
    let (priority, queue) = invoker.call((4,)).unwrap();

    assert_eq!(priority, 16);
    assert_eq!(queue, "ingest");
}

#[test]
fn test_post_action_with_chain_dependency() {
    let builder = StructBuilder::<Job>::new()
        .field("priority", |job| &mut job.priority)
        .post_action_with("priority", |priority: &mut i64, (Cloned(boost),): (Cloned<u8>,)| {
            *priority += i64::from(boost);
        })
        .must_build();

    let chain = Collection::new("boosted")
        .value(7_u8)
        .with(builder)
        .provide(|Cloned(job): Cloned<Job>| Ok::<_, ProvideErrorKind>((job.priority,)));

    let invoker = chain.bind::<(i64,), (i64,)>().unwrap();
    assert_eq!(invoker.call((10,)).unwrap(), (17,));
}

#[test]
fn test_post_action_value_and_map_observe_without_mutating() {
    let seen_value = Arc::new(AtomicI64::new(0));
    let seen_converted = Arc::new(AtomicI64::new(0));
    let value_sink = seen_value.clone();
    let converted_sink = seen_converted.clone();

    let builder = StructBuilder::<Job>::new()
        .field("priority", |job| &mut job.priority)
        .post_action_value("priority", move |priority: i64| {
            value_sink.store(priority, Ordering::SeqCst);
        })
        .post_action_map(
            "priority",
            |priority: &i64| priority * 2,
            move |doubled| converted_sink.store(doubled, Ordering::SeqCst),
        )
        .must_build();

    let chain = Collection::new("observed")
        .with(builder)
        .provide(|Cloned(job): Cloned<Job>| Ok::<_, ProvideErrorKind>((job.priority,)));

    let invoker = chain.bind::<(i64,), (i64,)>().unwrap();
    assert_eq!(invoker.call((9,)).unwrap(), (9,));
    assert_eq!(seen_value.load(Ordering::SeqCst), 9);
    assert_eq!(seen_converted.load(Ordering::SeqCst), 18);
}
