mod array;
mod binding;
mod controller;
mod dependency;
mod draft;
mod error;
mod observe;
mod response;
mod store;
mod validation;
mod values;


pub use calmform_derive::FormModel;
pub use controller::{
    FieldKey, FormController, FormError, FormOptions, FormResult, FormSnapshot,
    ResetOptions, RevalidateMode, SubmitError, SubmitOutcome, SubmitState, ValidationMode,
};
pub use draft::{FormDraftStore, InMemoryDraftStore};
pub use error::ErrorOptions;
pub use observe::{FormEvent, SubscriptionId};
pub use response::{FormResponse, ResponseStatus};
pub use store::{
    FieldArrayConfig, FieldArrayPatch, FieldArraySnapshot, FieldConfig, FieldPatch,
    FieldSnapshot, ItemKey,
};
pub use validation::{
    AsyncFieldValidator, BoxedValidationFuture, FieldValidator, Rule, SetValueOptions,
    ValidateOptions,
};
pub use values::{FormModel, FormValues};
