mod bind;
mod provide;
mod run;

pub use bind::{BindError, BindErrorKind};
pub use provide::ProvideErrorKind;
pub use run::RunErrorKind;
