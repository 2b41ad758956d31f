pub mod form;
pub mod prelude;

pub use form::{FormController, FormError, FormOptions, FormResult, FormValues};

#[cfg(test)]
mod test_public_api;
