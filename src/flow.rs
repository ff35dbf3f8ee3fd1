use std::cell::Cell;
use std::rc::Rc;

use percent_encoding::percent_decode_str;
use serde_json::json;

use crate::bridge::{report, HostBridge, PageView};
use crate::events::ShimEvent;
use crate::hub::EventHub;
use crate::transactions::TransactionTracker;

/// Which step of the configuration flow the user is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiPhase {
    Initial,
    /// Waiting for the host window to come back to the foreground.
    AwaitingReturn,
    /// Reviewing a captured configuration before submitting it.
    ShowingConfig,
    /// The page's own form is up.
    Focused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Initial,
    ReturnedConfig,
    NoStoredPreset,
    HasStoredPreset,
    ShowingConfig,
    Submitted,
    FocusRegained,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowOptions {
    /// Hold `showConfiguration` back until the host window regains focus.
    pub defer_show_configuration: bool,
}

/// The page URL parameters the flow reacts to.
#[derive(Debug, Default)]
struct LoadQuery<'a> {
    returned: bool,
    /// Still percent-encoded.
    json: &'a str,
}

impl<'a> LoadQuery<'a> {
    fn parse(query: &'a str) -> Self {
        let mut params = Self::default();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "config" => params.returned = value == "true",
                "json" => params.json = value,
                _ => {}
            }
        }
        params
    }
}

/// Decides which phase is visible and when the page sees `ready`,
/// `showConfiguration` and `webviewclosed`.
pub struct ConfigurationFlow {
    hub: EventHub,
    tracker: TransactionTracker,
    host: Rc<dyn HostBridge>,
    page: Rc<dyn PageView>,
    options: FlowOptions,
    state: Cell<FlowState>,
    phase: Cell<UiPhase>,
    show_on_focus: Cell<bool>,
    external_open: Cell<bool>,
}

impl ConfigurationFlow {
    pub fn new(
        hub: EventHub,
        tracker: TransactionTracker,
        host: Rc<dyn HostBridge>,
        page: Rc<dyn PageView>,
        options: FlowOptions,
    ) -> Self {
        Self {
            hub,
            tracker,
            host,
            page,
            options,
            state: Cell::new(FlowState::Initial),
            phase: Cell::new(UiPhase::Initial),
            show_on_focus: Cell::new(false),
            external_open: Cell::new(false),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state.get()
    }

    pub fn phase(&self) -> UiPhase {
        self.phase.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state.get() == FlowState::Closed
    }

    /// Outbound app messages land in the transcript instead of the host.
    pub fn is_intercepting(&self) -> bool {
        self.phase.get() == UiPhase::ShowingConfig
            && !matches!(self.state.get(), FlowState::Submitted | FlowState::Closed)
    }

    /// Entry point once the page script has loaded. `query` is the page URL's
    /// query string, with or without the leading `?`.
    pub fn script_loaded(&self, query: &str) {
        if self.is_closed() || self.state.get() != FlowState::Initial {
            tracing::debug!(target: "flow", state = ?self.state.get(), "script already loaded");
            return;
        }

        let params = LoadQuery::parse(query.strip_prefix('?').unwrap_or(query));

        if params.returned {
            self.state.set(FlowState::ReturnedConfig);
            self.show(UiPhase::ShowingConfig);
            // Decoded as a URI component, like a pasted return: `+` stays `+`.
            let response = match percent_decode_str(params.json).decode_utf8() {
                Ok(response) => response,
                Err(err) => {
                    report(
                        self.host.as_ref(),
                        &format!("returned configuration is not valid UTF-8: {err}"),
                    );
                    return;
                }
            };
            if !response.is_empty() {
                self.hub
                    .fire(&ShimEvent::WebviewClosed, &[json!({ "response": response })]);
            }
            return;
        }

        let has_preset = self.host.app_stored_preset().is_some();
        self.state.set(if has_preset {
            FlowState::HasStoredPreset
        } else {
            FlowState::NoStoredPreset
        });
        self.page.set_preset_controls_visible(has_preset);

        self.hub.fire(&ShimEvent::Ready, &[]);
        if self.is_closed() {
            return;
        }

        if self.options.defer_show_configuration {
            self.show_on_focus.set(true);
            self.show(UiPhase::AwaitingReturn);
        } else {
            self.show_configuration();
        }
    }

    /// The host window is in the foreground again.
    pub fn focus_regained(&self) {
        if self.is_closed() {
            return;
        }
        if self.show_on_focus.replace(false) {
            self.show_configuration();
            return;
        }
        if self.external_open.replace(false) {
            self.state.set(FlowState::FocusRegained);
            self.show(UiPhase::Focused);
        }
    }

    /// An external configuration website was opened; it answers through a
    /// reload with `config=true`, or not at all.
    pub fn awaiting_external(&self) {
        if self.is_closed() {
            return;
        }
        self.external_open.set(true);
        self.show(UiPhase::AwaitingReturn);
    }

    /// Show the captured configuration for review.
    pub fn enter_review(&self) {
        if self.is_closed() {
            return;
        }
        if self.state.get() != FlowState::ReturnedConfig {
            self.state.set(FlowState::ShowingConfig);
        }
        self.show(UiPhase::ShowingConfig);
    }

    pub fn submitted(&self) {
        if !self.is_closed() {
            self.state.set(FlowState::Submitted);
        }
    }

    /// The page has no configuration to offer; bail out instead of leaving
    /// the user in front of an empty overlay.
    pub fn does_not_support_configuration(&self) {
        report(
            self.host.as_ref(),
            "watch app does not support configuration, closing",
        );
        self.close();
    }

    /// Terminal. The host is asked to dismiss the overlay, every listener is
    /// dropped and unanswered transactions are abandoned.
    pub fn close(&self) {
        if self.state.replace(FlowState::Closed) == FlowState::Closed {
            return;
        }
        self.show_on_focus.set(false);
        self.external_open.set(false);
        tracing::info!(target: "flow", "closing configuration overlay");
        self.host.close_activity();
        self.hub.clear();
        self.tracker.clear();
    }

    fn show_configuration(&self) {
        self.state.set(FlowState::ShowingConfig);
        self.show(UiPhase::Focused);
        self.hub.fire(&ShimEvent::ShowConfiguration, &[]);
    }

    fn show(&self, phase: UiPhase) {
        let previous = self.phase.replace(phase);
        if previous != phase {
            tracing::debug!(target: "flow", ?previous, ?phase, "phase change");
        }
        self.page.show_phase(phase);
    }
}
