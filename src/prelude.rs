pub use crate::form::{
    ErrorOptions, FieldArrayConfig, FieldConfig, FieldKey, FormController, FormError, FormEvent,
    FormModel, FormOptions, FormResponse, FormResult, FormValues, ResetOptions, RevalidateMode,
    Rule, SetValueOptions, SubmitError, SubmitOutcome, SubmitState, ValidateOptions,
    ValidationMode,
};
