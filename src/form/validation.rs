use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use futures_timer::Delay;
use serde_json::Value;
use tracing::trace;

use super::controller::{
    FormController, FormOptions, FormResult, FormState, ValidationMode, read_lock, write_lock,
};
use super::observe::FormEvent;
use super::store::EntryKind;
use super::values::FormValues;

pub trait FieldValidator: Send + Sync {
    fn validate(&self, value: Option<&Value>, values: &FormValues) -> String;
}

impl<F> FieldValidator for F
where
    F: Fn(Option<&Value>, &FormValues) -> String + Send + Sync,
{
    fn validate(&self, value: Option<&Value>, values: &FormValues) -> String {
        (self)(value, values)
    }
}

pub type BoxedValidationFuture = Pin<Box<dyn Future<Output = String> + Send + 'static>>;

pub trait AsyncFieldValidator: Send + Sync {
    fn validate(&self, value: Option<Value>, values: FormValues) -> BoxedValidationFuture;
}

impl<F, Fut> AsyncFieldValidator for F
where
    F: Fn(Option<Value>, FormValues) -> Fut + Send + Sync,
    Fut: Future<Output = String> + Send + 'static,
{
    fn validate(&self, value: Option<Value>, values: FormValues) -> BoxedValidationFuture {
        Box::pin((self)(value, values))
    }
}

#[derive(Clone)]
enum RuleKind {
    Sync(Arc<dyn FieldValidator>),
    Async(Arc<dyn AsyncFieldValidator>),
}

/// One entry of a field's rule chain. Rules run in declaration order and the chain
/// stops at the first error.
#[derive(Clone)]
pub struct Rule {
    kind: RuleKind,
    reads: Vec<String>,
    debounce: Duration,
}

impl Rule {
    pub fn new<V>(validator: V) -> Self
    where
        V: FieldValidator + 'static,
    {
        Self {
            kind: RuleKind::Sync(Arc::new(validator)),
            reads: Vec::new(),
            debounce: Duration::ZERO,
        }
    }

    pub fn new_async<V>(validator: V) -> Self
    where
        V: AsyncFieldValidator + 'static,
    {
        Self {
            kind: RuleKind::Async(Arc::new(validator)),
            reads: Vec::new(),
            debounce: Duration::ZERO,
        }
    }

    pub fn reads(mut self, name: impl AsRef<str>) -> Self {
        self.reads.push(name.as_ref().to_owned());
        self
    }

    /// Waits before running an async rule and skips it if a newer validation started
    /// meanwhile. Has no effect on sync rules.
    pub fn debounce(mut self, debounce_ms: u64) -> Self {
        self.debounce = Duration::from_millis(debounce_ms);
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.reads
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, RuleKind::Async(_))
    }
}

impl Debug for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("async", &self.is_async())
            .field("reads", &self.reads)
            .field("debounce", &self.debounce)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetValueOptions {
    pub should_touched: bool,
    pub should_dirty: bool,
    pub should_validate: bool,
    pub should_focus: bool,
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self {
            should_touched: true,
            should_dirty: true,
            should_validate: true,
            should_focus: true,
        }
    }
}

impl SetValueOptions {
    pub fn should_touched(mut self, value: bool) -> Self {
        self.should_touched = value;
        self
    }

    pub fn should_dirty(mut self, value: bool) -> Self {
        self.should_dirty = value;
        self
    }

    pub fn should_validate(mut self, value: bool) -> Self {
        self.should_validate = value;
        self
    }

    pub fn should_focus(mut self, value: bool) -> Self {
        self.should_focus = value;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidateOptions {
    pub should_active: bool,
    pub should_focus: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            should_active: true,
            should_focus: true,
        }
    }
}

impl ValidateOptions {
    pub fn should_active(mut self, value: bool) -> Self {
        self.should_active = value;
        self
    }

    pub fn should_focus(mut self, value: bool) -> Self {
        self.should_focus = value;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum FieldEvent {
    Input,
    Blur,
}

impl FormOptions {
    /// Whether `event` validates an entry. Before its first error (or, in submit mode,
    /// before the first submit) `validate_on` applies, afterwards `revalidate_on`.
    pub(super) fn validates_on(&self, event: FieldEvent, submitted: bool, has_error: bool) -> bool {
        let revalidating = if self.validate_on == ValidationMode::OnSubmit {
            submitted
        } else {
            has_error
        };
        let mode = if revalidating {
            ValidationMode::from(self.revalidate_on)
        } else {
            self.validate_on
        };
        matches!(
            (mode, event),
            (ValidationMode::OnTouched, _)
                | (ValidationMode::OnInput, FieldEvent::Input)
                | (ValidationMode::OnBlur, FieldEvent::Blur)
        )
    }
}

pub(super) struct ValidationJob {
    canonical: String,
    kind: EntryKind,
    seq: u64,
    ticket: u64,
    rules: Vec<Rule>,
    value: Option<Value>,
    values: FormValues,
}

impl FormState {
    pub(super) fn begin_validation(&mut self, canonical: &str) -> Option<ValidationJob> {
        let kind = if self.fields.contains_key(canonical) {
            EntryKind::Field
        } else if self.field_arrays.contains_key(canonical) {
            EntryKind::FieldArray
        } else {
            return None;
        };
        let entry = self.entry(canonical)?;
        if entry.rules().is_empty() {
            return None;
        }
        let (seq, rules) = (entry.seq(), entry.rules().to_vec());

        let values = FormValues::collect(self);
        let value = match kind {
            EntryKind::Field => self.fields.get(canonical).and_then(|field| field.value.clone()),
            EntryKind::FieldArray => self
                .display_name(canonical)
                .and_then(|name| values.get(&name).cloned()),
        };
        let ticket = self.next_ticket();
        let slot = self.entry_mut(canonical, kind)?.slot_mut();
        slot.ticket = ticket;
        slot.in_flight += 1;
        self.validating += 1;

        Some(ValidationJob {
            canonical: canonical.to_owned(),
            kind,
            seq,
            ticket,
            rules,
            value,
            values,
        })
    }

    /// Ends one run. The error is written only when `outcome` is present and the run's
    /// ticket is still the entry's latest; stale results are dropped. Returns whether
    /// the error was committed.
    fn settle_validation(
        &mut self,
        canonical: &str,
        kind: EntryKind,
        seq: u64,
        ticket: u64,
        outcome: Option<String>,
    ) -> bool {
        self.validating = self.validating.saturating_sub(1);
        let Some(entry) = self
            .entry_mut(canonical, kind)
            .filter(|entry| entry.seq() == seq)
        else {
            return false;
        };
        let slot = entry.slot_mut();
        slot.in_flight = slot.in_flight.saturating_sub(1);
        let current = slot.ticket == ticket;
        let committed = match outcome {
            Some(error) if current => {
                entry.set_error(error);
                true
            }
            _ => false,
        };
        self.recompute();
        committed
    }

    fn is_latest_ticket(&self, canonical: &str, ticket: u64) -> bool {
        let field = self.fields.get(canonical).map(|field| field.slot.ticket);
        let array = self.field_arrays.get(canonical).map(|array| array.slot.ticket);
        field == Some(ticket) || array == Some(ticket)
    }

    fn gate(&self, options: &FormOptions, canonical: &str, event: FieldEvent) -> bool {
        self.entry(canonical).is_some_and(|entry| {
            !entry.rules().is_empty()
                && options.validates_on(event, self.submitted, !entry.error().is_empty())
        })
    }
}

/// Keeps the in-flight counters honest: a run that is dropped before it settles (its
/// future was cancelled or a rule panicked) still gives back its slot.
struct InFlight {
    state: Arc<RwLock<FormState>>,
    canonical: String,
    kind: EntryKind,
    seq: u64,
    ticket: u64,
    settled: bool,
}

impl InFlight {
    fn settle(mut self, outcome: Option<String>) -> FormResult<bool> {
        let committed = {
            let mut state = write_lock(&self.state, "settling validation")?;
            self.settled = true;
            state.settle_validation(&self.canonical, self.kind, self.seq, self.ticket, outcome)
        };
        Ok(committed)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.settle_validation(&self.canonical, self.kind, self.seq, self.ticket, None);
    }
}

impl FormController {
    pub fn register_dependency(
        &self,
        source: impl AsRef<str>,
        dependent: impl AsRef<str>,
    ) -> FormResult<()> {
        let (source, dependent) = {
            let state = read_lock(&self.state, "resolving dependency names")?;
            let (Some(source), Some(dependent)) = (
                state.resolve(source.as_ref()),
                state.resolve(dependent.as_ref()),
            ) else {
                return Ok(());
            };
            (source, dependent)
        };
        write_lock(&self.dependencies, "registering dependency")?.link(&source, &dependent);
        Ok(())
    }

    pub async fn set_value(
        &self,
        name: impl AsRef<str>,
        value: impl Into<Option<Value>>,
        options: SetValueOptions,
    ) -> FormResult<()> {
        self.set_values([(name.as_ref().to_owned(), value.into())], options)
            .await
    }

    /// Writes several values atomically, then validates the union of affected entries
    /// once.
    pub async fn set_values<I, N>(&self, values: I, options: SetValueOptions) -> FormResult<()>
    where
        I: IntoIterator<Item = (N, Option<Value>)>,
        N: AsRef<str>,
    {
        let mut changed = Vec::new();
        let mut events = Vec::new();
        {
            let mut state = write_lock(&self.state, "writing field values")?;
            for (name, value) in values {
                let name = name.as_ref();
                let Some(canonical) = state.resolve(name) else {
                    continue;
                };
                let Some(field) = state.fields.get_mut(&canonical) else {
                    continue;
                };
                field.value = value;
                if options.should_touched {
                    field.touched = true;
                }
                if options.should_dirty {
                    field.refresh_dirty();
                }
                events.push(FormEvent::FieldChanged(name.to_owned()));
                changed.push(canonical);
            }
            state.recompute();
        }
        self.notify(events)?;

        if options.should_validate {
            self.revalidate_after(&changed, FieldEvent::Input).await?;
        }
        if options.should_focus {
            let focus = {
                let state = read_lock(&self.state, "checking errors after value change")?;
                changed
                    .iter()
                    .find(|canonical| {
                        state
                            .fields
                            .get(*canonical)
                            .is_some_and(|field| !field.error.is_empty())
                    })
                    .cloned()
            };
            if let Some(canonical) = focus {
                self.focus_canonical(&canonical)?;
            }
        }
        Ok(())
    }

    pub async fn blur(&self, name: impl AsRef<str>) -> FormResult<()> {
        let name = name.as_ref();
        let canonical = {
            let mut state = write_lock(&self.state, "touching field")?;
            let Some(canonical) = state.resolve(name) else {
                return Ok(());
            };
            let Some(field) = state.fields.get_mut(&canonical) else {
                return Ok(());
            };
            field.touched = true;
            state.recompute();
            canonical
        };
        self.notify(vec![FormEvent::FieldChanged(name.to_owned())])?;
        self.revalidate_after(&[canonical], FieldEvent::Blur).await
    }

    pub async fn validate(
        &self,
        name: impl AsRef<str>,
        options: ValidateOptions,
    ) -> FormResult<bool> {
        let Some(canonical) = self.canonical(name.as_ref())? else {
            return Ok(true);
        };
        self.validate_entries(vec![canonical.clone()]).await?;

        let (valid, is_field) = {
            let state = read_lock(&self.state, "reading validation result")?;
            let valid = state
                .entry(&canonical)
                .is_none_or(|entry| entry.error().is_empty());
            (valid, state.fields.contains_key(&canonical))
        };
        if !valid && is_field && options.should_focus {
            self.focus_canonical(&canonical)?;
        }
        Ok(valid)
    }

    pub async fn validate_form(&self, options: ValidateOptions) -> FormResult<bool> {
        let targets = read_lock(&self.state, "collecting validation targets")?
            .validation_targets(options.should_active);
        self.validate_entries(targets).await?;
        let valid = !self.is_invalid()?;
        if !valid && options.should_focus {
            self.focus_first_error()?;
        }
        Ok(valid)
    }

    pub(super) async fn revalidate_after(
        &self,
        sources: &[String],
        event: FieldEvent,
    ) -> FormResult<()> {
        if sources.is_empty() {
            return Ok(());
        }
        let dependents = read_lock(&self.dependencies, "reading dependencies")?.fan_out(sources);
        let targets = {
            let state = read_lock(&self.state, "gating validation")?;
            let mut seen = BTreeSet::new();
            sources
                .iter()
                .chain(dependents.iter())
                .filter(|canonical| seen.insert((*canonical).clone()))
                .filter(|canonical| state.gate(&self.options, canonical, event))
                .cloned()
                .collect::<Vec<_>>()
        };
        self.validate_entries(targets).await
    }

    /// Starts one run per target (tickets are issued together, atomically) and waits for
    /// all of them to settle.
    pub(super) async fn validate_entries(&self, targets: Vec<String>) -> FormResult<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let jobs = {
            let mut state = write_lock(&self.state, "starting validation")?;
            targets
                .iter()
                .filter_map(|canonical| state.begin_validation(canonical))
                .collect::<Vec<_>>()
        };
        if jobs.is_empty() {
            return Ok(());
        }
        self.notify(vec![FormEvent::FormChanged])?;

        let results = join_all(jobs.into_iter().map(|job| self.run_validation(job))).await;
        let committed = results
            .into_iter()
            .collect::<FormResult<Vec<bool>>>()?
            .into_iter()
            .filter(|committed| *committed)
            .count();
        trace!(committed, "validation batch settled");
        self.notify(vec![FormEvent::FormChanged])
    }

    async fn run_validation(&self, job: ValidationJob) -> FormResult<bool> {
        let ValidationJob {
            canonical,
            kind,
            seq,
            ticket,
            rules,
            value,
            values,
        } = job;
        let in_flight = InFlight {
            state: self.state.clone(),
            canonical,
            kind,
            seq,
            ticket,
            settled: false,
        };
        trace!(entry = %in_flight.canonical, ticket, "validation started");

        let mut error = String::new();
        for rule in &rules {
            error = match &rule.kind {
                RuleKind::Sync(validator) => validator.validate(value.as_ref(), &values),
                RuleKind::Async(validator) => {
                    if !rule.debounce.is_zero() {
                        Delay::new(rule.debounce).await;
                        let latest = read_lock(&self.state, "checking latest validation ticket")?
                            .is_latest_ticket(&in_flight.canonical, ticket);
                        if !latest {
                            trace!(entry = %in_flight.canonical, ticket, "debounced validation superseded");
                            return in_flight.settle(None);
                        }
                    }
                    validator.validate(value.clone(), values.clone()).await
                }
            };
            if !error.is_empty() {
                break;
            }
        }

        let entry = in_flight.canonical.clone();
        let committed = in_flight.settle(Some(error))?;
        if committed {
            trace!(entry = %entry, ticket, "validation committed");
        } else {
            trace!(entry = %entry, ticket, "stale validation result discarded");
        }
        Ok(committed)
    }
}
