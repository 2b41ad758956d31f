use std::time::Duration;

use futures_timer::Delay;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::controller::{FormController, FormResult, FormState, read_lock, write_lock};
use super::observe::FormEvent;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Info,
    Error,
    Success,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormResponse {
    pub status: Option<ResponseStatus>,
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl FormResponse {
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Error, message)
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.message.is_none() && self.data.is_none()
    }

    fn with_status(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            data: None,
        }
    }
}

impl FormState {
    pub(super) fn replace_response(&mut self, response: FormResponse) -> u64 {
        self.response = response;
        self.response_seq += 1;
        self.response_seq
    }

    pub(super) fn clear_response(&mut self) {
        if !self.response.is_empty() {
            self.replace_response(FormResponse::default());
        }
    }
}

impl FormController {
    pub fn response(&self) -> FormResult<FormResponse> {
        Ok(read_lock(&self.state, "reading form response")?.response.clone())
    }

    pub fn set_response(&self, response: FormResponse) -> FormResult<()> {
        write_lock(&self.state, "setting form response")?.replace_response(response);
        self.notify(vec![FormEvent::FormChanged])
    }

    pub fn clear_response(&self) -> FormResult<()> {
        write_lock(&self.state, "clearing form response")?.clear_response();
        self.notify(vec![FormEvent::FormChanged])
    }

    /// Shows `response` for `duration`, then clears it unless another response replaced
    /// it meanwhile.
    pub async fn flash_response(
        &self,
        response: FormResponse,
        duration: Duration,
    ) -> FormResult<()> {
        let seq = write_lock(&self.state, "setting form response")?.replace_response(response);
        self.notify(vec![FormEvent::FormChanged])?;

        Delay::new(duration).await;
        let cleared = {
            let mut state = write_lock(&self.state, "expiring form response")?;
            let current = state.response_seq == seq;
            if current {
                state.replace_response(FormResponse::default());
            }
            current
        };
        debug!(cleared, "flashed response expired");
        if cleared {
            self.notify(vec![FormEvent::FormChanged])?;
        }
        Ok(())
    }
}
