//! Type-directed call-chain assembly.
//!
//! Providers declare what they consume and produce; a [`Collection`] of
//! providers is compiled by [`Collection::bind`] into directly-callable
//! entry points, with wiring resolved once at bind time. Providers may opt
//! into once-per-chain execution ([`Provider::cacheable`]), per-input
//! memoization ([`memoize`]), wrapping the rest of the chain ([`wrap`]),
//! and inclusion policies such as [`Provider::required`] and
//! [`Provider::must_consume`].
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use wireup::{Cloned, Collection, ProvideErrorKind};
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let sink = log.clone();
//! let chain = Collection::new("greet")
//!     .provide(|Cloned(name): Cloned<String>| {
//!         Ok::<_, ProvideErrorKind>((name.len() as i64,))
//!     })
//!     .provide(move |Cloned(len): Cloned<i64>, Cloned(name): Cloned<String>| {
//!         sink.lock().unwrap().push(format!("{name}: {len}"));
//!         Ok::<_, ProvideErrorKind>(())
//!     });
//!
//! let invoker = chain.bind::<(String,), ()>().unwrap();
//! invoker.call(("hello".to_string(),)).unwrap();
//! assert_eq!(log.lock().unwrap().as_slice(), ["hello: 5"]);
//! ```

#[macro_use]
mod macros;

mod any;
mod api;
mod bind;
mod cache;
mod collection;
pub mod errors;
mod extract;
mod factory;
mod frame;
mod graph;
mod matcher;
mod outputs;
mod provider;
mod struct_builder;
mod wrapper;

pub use any::TypeInfo;
pub use api::{must_bind, must_run, run, set_callback, set_callback_with_init, ChainError, ChainFailure};
pub use bind::{Initializer, Invoker};
pub use cache::MemoCell;
pub use collection::Collection;
pub use errors::{BindError, BindErrorKind, ProvideErrorKind, RunErrorKind};
pub use extract::{Cloned, Extract, MemoInput, Shared};
pub use factory::Factory;
pub use frame::Frame;
pub use outputs::{Outputs, Signature};
pub use provider::{instance, memoize, provider, Kind, Provider};
pub use struct_builder::StructBuilder;
pub use wrapper::{wrap, Next, Wrapper};
