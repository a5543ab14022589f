use std::thread::{self, JoinHandle};
use serde::Serialize;
use tauri::{AppHandle, Emitter};
use crate::models::JobState;
use crate::utils::events::{EngineEvent, EventStream, LOG_UPDATE, NEED_PASSWORD, STATE_CHANGED};

/// Payload of the `stateChanged` event
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub state: JobState,
    /// Buttons the frontend should offer, derived from the state
    pub can_select: bool,
    pub can_cancel: bool,
    pub awaiting_password: bool,
}

impl From<JobState> for StateEvent {
    fn from(state: JobState) -> Self {
        Self {
            can_select: state.accepts_selection(),
            can_cancel: state.is_running(),
            awaiting_password: state == JobState::AwaitingManualPassword,
            state,
        }
    }
}

/// Pushes engine events to the webview
pub struct ProgressEmitter {
    app: AppHandle,
}

impl ProgressEmitter {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }

    /// Emit one ordered log line
    pub fn emit_log(&self, message: String) -> Result<(), String> {
        self.app
            .emit(LOG_UPDATE, message)
            .map_err(|e| format!("Failed to emit log event: {}", e))
    }

    /// Ask the frontend to open the password dialog
    pub fn emit_need_password(&self) -> Result<(), String> {
        self.app
            .emit(NEED_PASSWORD, true)
            .map_err(|e| format!("Failed to emit password prompt: {}", e))
    }

    pub fn emit_state(&self, state: JobState) -> Result<(), String> {
        self.app
            .emit(STATE_CHANGED, StateEvent::from(state))
            .map_err(|e| format!("Failed to emit state event: {}", e))
    }

    pub fn forward(&self, event: EngineEvent) -> Result<(), String> {
        match event {
            EngineEvent::Log(message) => self.emit_log(message),
            EngineEvent::NeedPassword => self.emit_need_password(),
            EngineEvent::StateChanged(state) => self.emit_state(state),
        }
    }

    /// Drain `stream` on a dedicated thread until the coordinator is gone
    pub fn spawn(self, stream: EventStream) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("unpick-events".to_string())
            .spawn(move || {
                for event in stream {
                    if let Err(e) = self.forward(event) {
                        tracing::warn!("{}", e);
                    }
                }
            })
    }
}
