use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::dependency::DependencyGraph;
use super::observe::{FormEvent, Observers};
use super::response::FormResponse;
use super::store::{
    FieldArrayConfig, FieldArrayPatch, FieldArrayRecord, FieldArraySnapshot, FieldConfig,
    FieldPatch, FieldRecord, FieldSnapshot, is_within,
};
use super::validation::Rule;
use super::values::{FormModel, FormValues};

/// Field name generated by `#[derive(FormModel)]`. Name-taking operations also accept
/// dynamic names such as `todos.2.title`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }

    pub fn item(self, index: usize, field: &str) -> String {
        format!("{}.{index}.{field}", self.0)
    }
}

impl AsRef<str> for FieldKey {
    fn as_ref(&self) -> &str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ValidationMode {
    #[serde(rename = "touched")]
    OnTouched,
    #[serde(rename = "input")]
    OnInput,
    #[serde(rename = "blur")]
    OnBlur,
    #[serde(rename = "submit")]
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RevalidateMode {
    #[serde(rename = "input")]
    OnInput,
    #[serde(rename = "blur")]
    OnBlur,
    #[serde(rename = "submit")]
    OnSubmit,
}

impl From<RevalidateMode> for ValidationMode {
    fn from(mode: RevalidateMode) -> Self {
        match mode {
            RevalidateMode::OnInput => ValidationMode::OnInput,
            RevalidateMode::OnBlur => ValidationMode::OnBlur,
            RevalidateMode::OnSubmit => ValidationMode::OnSubmit,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub validate_on: ValidationMode,
    /// Applies once an entry has an error, or with `validate_on = submit` once the
    /// form was submitted.
    pub revalidate_on: RevalidateMode,
    pub focus_first_error_on_submit: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_on: ValidationMode::OnSubmit,
            revalidate_on: RevalidateMode::OnInput,
            focus_first_error_on_submit: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResetOptions {
    pub keep_values: bool,
    pub keep_dirty_values: bool,
    pub keep_items: bool,
    pub keep_errors: bool,
    pub keep_touched: bool,
    pub keep_submit_count: bool,
    pub keep_submitted: bool,
    pub keep_response: bool,
}

impl ResetOptions {
    pub fn keep_values(mut self, value: bool) -> Self {
        self.keep_values = value;
        self
    }

    pub fn keep_dirty_values(mut self, value: bool) -> Self {
        self.keep_dirty_values = value;
        self
    }

    pub fn keep_items(mut self, value: bool) -> Self {
        self.keep_items = value;
        self
    }

    pub fn keep_errors(mut self, value: bool) -> Self {
        self.keep_errors = value;
        self
    }

    pub fn keep_touched(mut self, value: bool) -> Self {
        self.keep_touched = value;
        self
    }

    pub fn keep_submit_count(mut self, value: bool) -> Self {
        self.keep_submit_count = value;
        self
    }

    pub fn keep_submitted(mut self, value: bool) -> Self {
        self.keep_submitted = value;
        self
    }

    pub fn keep_response(mut self, value: bool) -> Self {
        self.keep_response = value;
        self
    }
}

#[derive(Clone, Debug)]
pub struct FormSnapshot {
    pub values: FormValues,
    pub invalid: bool,
    pub dirty: bool,
    pub touched: bool,
    pub validating: bool,
    pub submitting: bool,
    pub submitted: bool,
    pub submit_count: u32,
    pub submit_state: SubmitState,
    pub response: FormResponse,
    pub fields: BTreeMap<String, FieldSnapshot>,
    pub field_arrays: BTreeMap<String, FieldArraySnapshot>,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("form submit is already in progress")]
    AlreadySubmitting,
    #[error("failed to convert form values: {0}")]
    ValueConversion(String),
    #[error("failed to load draft: {0}")]
    DraftLoadFailed(String),
    #[error("failed to save draft: {0}")]
    DraftSaveFailed(String),
    #[error("failed to clear draft: {0}")]
    DraftClearFailed(String),
}

pub type FormResult<T> = Result<T, FormError>;

#[derive(Debug, Error)]
pub enum SubmitError<E> {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("submit handler failed: {0}")]
    Handler(E),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Submitted,
    /// The handler was not called: validation failed or a reset cancelled the submit.
    Invalid,
}

pub(super) type FocusHandler = Arc<dyn Fn() + Send + Sync>;

pub(super) struct FormState {
    pub(super) initial_values: FormValues,
    pub(super) fields: BTreeMap<String, FieldRecord>,
    pub(super) field_arrays: BTreeMap<String, FieldArrayRecord>,
    pub(super) next_seq: u64,
    pub(super) next_item: u64,
    pub(super) next_ticket: u64,
    pub(super) invalid: bool,
    pub(super) dirty: bool,
    pub(super) touched: bool,
    pub(super) validating: usize,
    pub(super) submit_state: SubmitState,
    pub(super) submit_count: u32,
    pub(super) submitted: bool,
    pub(super) submit_cycle: u64,
    pub(super) response: FormResponse,
    pub(super) response_seq: u64,
}

#[derive(Clone)]
pub struct FormController {
    pub(super) options: FormOptions,
    pub(super) state: Arc<RwLock<FormState>>,
    pub(super) dependencies: Arc<RwLock<DependencyGraph>>,
    pub(super) focus_handlers: Arc<RwLock<BTreeMap<String, FocusHandler>>>,
    pub(super) observers: Arc<RwLock<Observers>>,
}

impl FormController {
    pub fn new(options: FormOptions) -> Self {
        Self::with_initial_values(Value::Object(Default::default()), options)
    }

    pub fn with_initial_values(initial: Value, options: FormOptions) -> Self {
        Self {
            options,
            state: Arc::new(RwLock::new(FormState {
                initial_values: FormValues::new(initial),
                fields: BTreeMap::new(),
                field_arrays: BTreeMap::new(),
                next_seq: 0,
                next_item: 0,
                next_ticket: 0,
                invalid: false,
                dirty: false,
                touched: false,
                validating: 0,
                submit_state: SubmitState::Idle,
                submit_count: 0,
                submitted: false,
                submit_cycle: 0,
                response: FormResponse::default(),
                response_seq: 0,
            })),
            dependencies: Arc::new(RwLock::new(DependencyGraph::default())),
            focus_handlers: Arc::new(RwLock::new(BTreeMap::new())),
            observers: Arc::new(RwLock::new(Observers::default())),
        }
    }

    /// The model's fields are pre-registered (inactive) in declaration order, so submit
    /// focus follows the struct layout.
    pub fn from_model<M>(model: &M, options: FormOptions) -> FormResult<Self>
    where
        M: FormModel + Serialize,
    {
        let initial = serde_json::to_value(model)
            .map_err(|error| FormError::ValueConversion(error.to_string()))?;
        let controller = Self::with_initial_values(initial, options);
        {
            let mut state = write_lock(&controller.state, "pre-registering model fields")?;
            for name in M::FIELD_NAMES {
                let start = state.initial_values.get(name).cloned();
                state.seed_field((*name).to_owned(), start);
            }
        }
        Ok(controller)
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub(super) fn canonical(&self, name: &str) -> FormResult<Option<String>> {
        Ok(read_lock(&self.state, "resolving field name")?.resolve(name))
    }

    /// Re-registering keeps value, touched and dirty and only swaps the configuration.
    pub fn register_field(&self, name: impl AsRef<str>, config: FieldConfig) -> FormResult<()> {
        let name = name.as_ref();
        let (canonical, reads) = {
            let mut state = write_lock(&self.state, "registering field")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            let reads = rule_sources(&state, &config.rules);
            if let Some(field) = state.fields.get_mut(&canonical) {
                field.active = true;
                field.config = config;
            } else {
                let start = if FormState::has_item_segment(&canonical) {
                    None
                } else {
                    state.initial_values.get(name).cloned()
                };
                let seq = state.next_seq();
                let mut field = FieldRecord::new(seq, start, true);
                field.config = config;
                state.fields.insert(canonical.clone(), field);
            }
            state.recompute();
            (canonical, reads)
        };
        write_lock(&self.dependencies, "linking field rules")?.replace_rule_links(&canonical, reads);
        self.notify(vec![FormEvent::FieldChanged(name.to_owned())])
    }

    pub fn register_field_array(
        &self,
        name: impl AsRef<str>,
        config: FieldArrayConfig,
    ) -> FormResult<()> {
        let name = name.as_ref();
        let (canonical, reads) = {
            let mut state = write_lock(&self.state, "registering field array")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            let reads = rule_sources(&state, &config.rules);
            if let Some(array) = state.field_arrays.get_mut(&canonical) {
                array.active = true;
                array.config = config;
            } else {
                let seeded = state
                    .fields
                    .remove(&canonical)
                    .and_then(|field| field.value);
                let initial = seeded.or_else(|| {
                    (!FormState::has_item_segment(&canonical))
                        .then(|| state.initial_values.get(name).cloned())
                        .flatten()
                });
                let seq = state.next_seq();
                let mut array = FieldArrayRecord::new(seq);
                array.config = config;
                state.field_arrays.insert(canonical.clone(), array);

                let elements = match initial {
                    Some(Value::Array(elements)) => elements,
                    _ => Vec::new(),
                };
                let items = elements
                    .iter()
                    .map(|element| state.seed_item(&canonical, Some(element)))
                    .collect::<Vec<_>>();
                if let Some(array) = state.field_arrays.get_mut(&canonical) {
                    array.start_items = items.clone();
                    array.items = items;
                }
            }
            state.recompute();
            (canonical, reads)
        };
        write_lock(&self.dependencies, "linking field array rules")?
            .replace_rule_links(&canonical, reads);
        self.notify(vec![FormEvent::FieldArrayChanged(name.to_owned())])
    }

    pub fn unmount_field(&self, name: impl AsRef<str>) -> FormResult<()> {
        let name = name.as_ref();
        {
            let mut state = write_lock(&self.state, "unmounting field")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            let ticket = state.next_ticket();
            let Some(field) = state.fields.get_mut(&canonical) else {
                return Ok(());
            };
            if !field.config.keep_active {
                field.active = false;
            }
            if !field.config.keep_state {
                field.value = field.start_value.clone();
                field.touched = false;
                field.error.clear();
                field.slot.ticket = ticket;
                field.refresh_dirty();
            }
            state.recompute();
        }
        self.notify(vec![FormEvent::FieldChanged(name.to_owned())])
    }

    pub fn unmount_field_array(&self, name: impl AsRef<str>) -> FormResult<()> {
        let name = name.as_ref();
        {
            let mut state = write_lock(&self.state, "unmounting field array")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            let ticket = state.next_ticket();
            let Some(array) = state.field_arrays.get_mut(&canonical) else {
                return Ok(());
            };
            if !array.config.keep_active {
                array.active = false;
            }
            if !array.config.keep_state {
                array.touched = false;
                array.error.clear();
                array.slot.ticket = ticket;
            }
            state.recompute();
        }
        self.notify(vec![FormEvent::FieldArrayChanged(name.to_owned())])
    }

    pub fn unregister_field(&self, name: impl AsRef<str>) -> FormResult<()> {
        let name = name.as_ref();
        let canonical = {
            let mut state = write_lock(&self.state, "unregistering field")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            if state.fields.remove(&canonical).is_none() {
                return Ok(());
            }
            state.recompute();
            canonical
        };
        self.forget(&[canonical])?;
        self.notify(vec![FormEvent::FieldChanged(name.to_owned()), FormEvent::FormChanged])
    }

    pub fn unregister_field_array(&self, name: impl AsRef<str>) -> FormResult<()> {
        let name = name.as_ref();
        let canonical = {
            let mut state = write_lock(&self.state, "unregistering field array")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            if !state.field_arrays.contains_key(&canonical) {
                return Ok(());
            }
            state.field_arrays.retain(|key, _| !is_within(key, &canonical));
            state.fields.retain(|key, _| !is_within(key, &canonical));
            state.recompute();
            canonical
        };
        self.forget(&[canonical])?;
        self.notify(vec![
            FormEvent::FieldArrayChanged(name.to_owned()),
            FormEvent::FormChanged,
        ])
    }

    pub fn patch_field(&self, name: impl AsRef<str>, patch: FieldPatch) -> FormResult<bool> {
        let name = name.as_ref();
        {
            let mut state = write_lock(&self.state, "patching field")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(false);
            };
            let Some(field) = state.fields.get_mut(&canonical) else {
                return Ok(false);
            };
            if let Some(value) = patch.value {
                field.value = value;
                field.refresh_dirty();
            }
            if let Some(error) = patch.error {
                field.error = error;
            }
            if let Some(touched) = patch.touched {
                field.touched = touched;
            }
            if let Some(active) = patch.active {
                field.active = active;
            }
            state.recompute();
        }
        self.notify(vec![FormEvent::FieldChanged(name.to_owned())])?;
        Ok(true)
    }

    pub fn patch_field_array(
        &self,
        name: impl AsRef<str>,
        patch: FieldArrayPatch,
    ) -> FormResult<bool> {
        let name = name.as_ref();
        {
            let mut state = write_lock(&self.state, "patching field array")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(false);
            };
            let Some(array) = state.field_arrays.get_mut(&canonical) else {
                return Ok(false);
            };
            if let Some(error) = patch.error {
                array.error = error;
            }
            if let Some(touched) = patch.touched {
                array.touched = touched;
            }
            if let Some(active) = patch.active {
                array.active = active;
            }
            state.recompute();
        }
        self.notify(vec![FormEvent::FieldArrayChanged(name.to_owned())])?;
        Ok(true)
    }

    pub fn field(&self, name: impl AsRef<str>) -> FormResult<Option<FieldSnapshot>> {
        let name = name.as_ref();
        let state = read_lock(&self.state, "reading field")?;
        Ok(state
            .resolve(name)
            .and_then(|canonical| state.fields.get(&canonical))
            .map(|field| field.snapshot(name.to_owned())))
    }

    pub fn field_array(&self, name: impl AsRef<str>) -> FormResult<Option<FieldArraySnapshot>> {
        let name = name.as_ref();
        let state = read_lock(&self.state, "reading field array")?;
        Ok(state
            .resolve(name)
            .and_then(|canonical| state.field_arrays.get(&canonical))
            .map(|array| array.snapshot(name.to_owned())))
    }

    pub fn value(&self, name: impl AsRef<str>) -> FormResult<Option<Value>> {
        Ok(self.field(name)?.and_then(|field| field.value))
    }

    pub fn error(&self, name: impl AsRef<str>) -> FormResult<String> {
        let state = read_lock(&self.state, "reading error")?;
        Ok(state
            .resolve(name.as_ref())
            .and_then(|canonical| state.entry(&canonical).map(|entry| entry.error().to_owned()))
            .unwrap_or_default())
    }

    pub fn values(&self) -> FormResult<FormValues> {
        Ok(FormValues::collect(&*read_lock(
            &self.state,
            "collecting form values",
        )?))
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        Ok(FormSnapshot {
            values: FormValues::collect(&state),
            invalid: state.invalid,
            dirty: state.dirty,
            touched: state.touched,
            validating: state.validating > 0,
            submitting: state.submit_state == SubmitState::Submitting,
            submitted: state.submitted,
            submit_count: state.submit_count,
            submit_state: state.submit_state,
            response: state.response.clone(),
            fields: state.field_snapshots(),
            field_arrays: state.field_array_snapshots(),
        })
    }

    pub fn is_invalid(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading invalid flag")?.invalid)
    }

    pub fn is_dirty(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading dirty flag")?.dirty)
    }

    pub fn is_touched(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading touched flag")?.touched)
    }

    pub fn is_validating(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading validating flag")?.validating > 0)
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading submitting flag")?.submit_state
            == SubmitState::Submitting)
    }

    pub fn is_submitted(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading submitted flag")?.submitted)
    }

    pub fn submit_count(&self) -> FormResult<u32> {
        Ok(read_lock(&self.state, "reading submit count")?.submit_count)
    }

    pub fn submit_state(&self) -> FormResult<SubmitState> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state)
    }

    /// In-flight validations are discarded unless errors are kept. A submit that is still
    /// validating is cancelled; one whose handler runs keeps the submit slot.
    pub fn reset(&self, options: ResetOptions) -> FormResult<()> {
        let removed = {
            let mut state = write_lock(&self.state, "resetting form")?;
            let mut removed = Vec::new();
            if !options.keep_items {
                let mut arrays = state.field_arrays.keys().cloned().collect::<Vec<_>>();
                arrays.sort_by_key(|name| name.split('.').count());
                for array in arrays {
                    removed.extend(state.restore_items(&array));
                }
            }
            let ticket = state.next_ticket();
            for field in state.fields.values_mut() {
                reset_field_record(field, &options, ticket);
            }
            for array in state.field_arrays.values_mut() {
                reset_array_record(array, &options, ticket);
            }
            if !options.keep_submit_count {
                state.submit_count = 0;
            }
            if !options.keep_submitted {
                state.submitted = false;
            }
            if !options.keep_response {
                state.clear_response();
            }
            state.restart_submit_cycle()?;
            state.recompute();
            removed
        };
        debug!(removed_items = removed.len(), "form reset");
        self.forget(&removed)?;
        self.notify(vec![FormEvent::FormChanged])
    }

    pub fn reset_field(&self, name: impl AsRef<str>, options: ResetOptions) -> FormResult<()> {
        let name = name.as_ref();
        let (removed, events) = {
            let mut state = write_lock(&self.state, "resetting field")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            let mut removed = Vec::new();
            let mut events = Vec::new();
            let ticket = state.next_ticket();
            if let Some(field) = state.fields.get_mut(&canonical) {
                reset_field_record(field, &options, ticket);
                events.push(FormEvent::FieldChanged(name.to_owned()));
            }
            if state.field_arrays.contains_key(&canonical) {
                if !options.keep_items {
                    removed = state.restore_items(&canonical);
                }
                for (key, field) in state.fields.iter_mut() {
                    if is_within(key, &canonical) {
                        reset_field_record(field, &options, ticket);
                    }
                }
                for (key, array) in state.field_arrays.iter_mut() {
                    if is_within(key, &canonical) {
                        reset_array_record(array, &options, ticket);
                    }
                }
                events.push(FormEvent::FieldArrayChanged(name.to_owned()));
            }
            state.recompute();
            (removed, events)
        };
        self.forget(&removed)?;
        self.notify(events)
    }

    /// A second call while one is validating or submitting is rejected with
    /// [`FormError::AlreadySubmitting`]. A handler error is recorded as an error response.
    pub async fn handle_submit<F, Fut, E>(
        &self,
        submit: F,
    ) -> Result<SubmitOutcome, SubmitError<E>>
    where
        F: FnOnce(FormValues) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let cycle = {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if matches!(
                state.submit_state,
                SubmitState::Validating | SubmitState::Submitting
            ) {
                return Err(FormError::AlreadySubmitting.into());
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
            state.submitted = true;
            state.clear_response();
            debug!(submit_count = state.submit_count, "submit started");
            state.submit_cycle
        };
        self.notify(vec![FormEvent::FormChanged])?;
        let guard = SubmitGuard::new(self);

        let targets = {
            let state = read_lock(&self.state, "collecting submit validation targets")?;
            state.validation_targets(false)
        };
        self.validate_entries(targets).await?;

        let checked = {
            let mut state = write_lock(&self.state, "checking submit validation result")?;
            if state.submit_cycle != cycle {
                SubmitCheck::Cancelled
            } else if state.invalid {
                SubmitCheck::Invalid
            } else {
                transition_submit_state(&mut state, SubmitState::Submitting)?;
                SubmitCheck::Valid(FormValues::collect(&state))
            }
        };
        let values = match checked {
            SubmitCheck::Valid(values) => values,
            SubmitCheck::Cancelled => {
                guard.finish(SubmitState::Idle)?;
                debug!("submit cancelled by reset");
                self.notify(vec![FormEvent::FormChanged])?;
                return Ok(SubmitOutcome::Invalid);
            }
            SubmitCheck::Invalid => {
                guard.finish(SubmitState::Failed)?;
                debug!("submit blocked by validation errors");
                if self.options.focus_first_error_on_submit {
                    self.focus_first_error()?;
                }
                self.notify(vec![FormEvent::FormChanged])?;
                return Ok(SubmitOutcome::Invalid);
            }
        };
        self.notify(vec![FormEvent::FormChanged])?;

        let result = submit(values).await;
        let outcome = match result {
            Ok(()) => {
                guard.finish(SubmitState::Succeeded)?;
                debug!("submit succeeded");
                Ok(SubmitOutcome::Submitted)
            }
            Err(error) => {
                {
                    let mut state = write_lock(&self.state, "recording submit failure")?;
                    state.replace_response(FormResponse::error(error.to_string()));
                }
                guard.finish(SubmitState::Failed)?;
                debug!(%error, "submit handler failed");
                Err(SubmitError::Handler(error))
            }
        };
        self.notify(vec![FormEvent::FormChanged])?;
        outcome
    }

    pub(super) fn forget(&self, removed: &[String]) -> FormResult<()> {
        if removed.is_empty() {
            return Ok(());
        }
        let gone = |key: &String| removed.iter().any(|prefix| is_within(key, prefix));
        write_lock(&self.focus_handlers, "forgetting focus handlers")?.retain(|key, _| !gone(key));
        let mut dependencies = write_lock(&self.dependencies, "forgetting dependencies")?;
        for prefix in removed {
            dependencies.forget(prefix);
        }
        Ok(())
    }
}

enum SubmitCheck {
    Valid(FormValues),
    Invalid,
    Cancelled,
}

/// Owns the submit slot from `Validating` until `finish`. Dropped unfinished, it leaves
/// the form in `Failed`.
struct SubmitGuard {
    state: Arc<RwLock<FormState>>,
    armed: bool,
}

impl SubmitGuard {
    fn new(controller: &FormController) -> Self {
        Self {
            state: controller.state.clone(),
            armed: true,
        }
    }

    fn finish(mut self, next: SubmitState) -> FormResult<()> {
        self.armed = false;
        let mut state = write_lock(&self.state, "finishing submit")?;
        transition_submit_state(&mut state, next)
    }
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if matches!(
            state.submit_state,
            SubmitState::Validating | SubmitState::Submitting
        ) {
            state.submit_state = SubmitState::Failed;
        }
    }
}

impl FormState {
    /// Starts the submit cycle over. A submit in flight keeps its slot, and one that is
    /// still validating sees the new cycle and cancels itself.
    pub(super) fn restart_submit_cycle(&mut self) -> FormResult<()> {
        self.submit_cycle += 1;
        if matches!(
            self.submit_state,
            SubmitState::Validating | SubmitState::Submitting
        ) {
            return Ok(());
        }
        transition_submit_state(self, SubmitState::Idle)
    }

    pub(super) fn validation_targets(&self, only_active: bool) -> Vec<String> {
        let mut targets = self
            .fields
            .iter()
            .map(|(name, field)| (field.seq, name, field.active, field.config.rules.len()))
            .chain(
                self.field_arrays
                    .iter()
                    .map(|(name, array)| (array.seq, name, array.active, array.config.rules.len())),
            )
            .filter(|(_, _, active, rules)| *rules > 0 && (*active || !only_active))
            .map(|(seq, name, _, _)| (seq, name.clone()))
            .collect::<Vec<_>>();
        targets.sort();
        targets.into_iter().map(|(_, name)| name).collect()
    }

    /// Removed start items come back seeded from the initial values. Returns the
    /// canonical prefixes of dropped items.
    fn restore_items(&mut self, canonical: &str) -> Vec<String> {
        let Some(array) = self.field_arrays.get(canonical) else {
            return Vec::new();
        };
        if array.items == array.start_items {
            return Vec::new();
        }
        let (items, start) = (array.items.clone(), array.start_items.clone());

        let mut removed = Vec::new();
        for key in items.iter().filter(|key| !start.contains(key)) {
            let prefix = format!("{canonical}.{key}");
            self.remove_within(&prefix);
            removed.push(prefix);
        }

        let display = (!FormState::has_item_segment(canonical))
            .then(|| self.display_name(canonical))
            .flatten();
        for (index, key) in start.iter().enumerate() {
            if items.contains(key) {
                continue;
            }
            let initial = display
                .as_ref()
                .and_then(|name| self.initial_values.get(&format!("{name}.{index}")))
                .cloned();
            if let Some(value) = initial {
                self.seed_value(&format!("{canonical}.{key}"), &value);
            }
        }

        if let Some(array) = self.field_arrays.get_mut(canonical) {
            array.items = start;
        }
        removed
    }
}

fn reset_field_record(field: &mut FieldRecord, options: &ResetOptions, ticket: u64) {
    let keep_value = options.keep_values || (options.keep_dirty_values && field.dirty);
    if !keep_value {
        field.value = field.start_value.clone();
    }
    if !options.keep_touched {
        field.touched = false;
    }
    if !options.keep_errors {
        field.error.clear();
        field.slot.ticket = ticket;
    }
    field.refresh_dirty();
}

fn reset_array_record(array: &mut FieldArrayRecord, options: &ResetOptions, ticket: u64) {
    if !options.keep_touched {
        array.touched = false;
    }
    if !options.keep_errors {
        array.error.clear();
        array.slot.ticket = ticket;
    }
}

fn rule_sources(state: &FormState, rules: &[Rule]) -> BTreeSet<String> {
    rules
        .iter()
        .flat_map(|rule| rule.dependencies().iter())
        .filter_map(|source| state.resolve(source))
        .collect()
}

pub(super) fn transition_submit_state(
    state: &mut FormState,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Idle)
            | (SubmitState::Succeeded, SubmitState::Idle)
            | (SubmitState::Failed, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
