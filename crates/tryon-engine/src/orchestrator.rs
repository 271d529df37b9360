use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tryon_contracts::events::EventWriter;
use tryon_contracts::session::{SessionHistory, SessionSummary};
use tryon_contracts::tryon::{
    Angle, ErrorKind, GenerationError, QualityTier, Slot, SCENARIO_PRESETS,
};

use crate::client::GenerationRequest;
use crate::encoder::{AssetId, ImageAsset};
use crate::prompt;

/// Monotonic identity of one triggered request. Never reused within a session.
pub type RequestToken = u64;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    Pending(RequestToken),
    Ready(String),
    Failed(ErrorKind),
}

impl SlotState {
    pub fn is_pending(&self) -> bool {
        matches!(self, SlotState::Pending(_))
    }

    pub fn result(&self) -> Option<&str> {
        match self {
            SlotState::Ready(image) => Some(image.as_str()),
            _ => None,
        }
    }
}

/// Interactive credential selection offered by the hosting environment.
pub trait CredentialSelector: Send + Sync {
    fn has_selected_credential(&self) -> bool;
    /// Blocks until the user has finished choosing a credential.
    fn open_selector(&self) -> anyhow::Result<()>;
}

/// A request the caller must execute and later hand back to [`Orchestrator::resolve`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub slot: Slot,
    pub token: RequestToken,
    pub request: Arc<GenerationRequest>,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Committed {
        slot: Slot,
        token: RequestToken,
    },
    Failed {
        slot: Slot,
        token: RequestToken,
        kind: ErrorKind,
    },
    /// The credential was re-selected and the same request issued again.
    Retried {
        slot: Slot,
        token: RequestToken,
        dispatch: Dispatch,
    },
    /// The slot has moved on; the outcome was dropped.
    Discarded {
        token: RequestToken,
    },
}

/// User-facing failure report, drained by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub slot: Slot,
    pub kind: ErrorKind,
    pub message: String,
}

impl Notice {
    pub fn requires_configuration(&self) -> bool {
        self.kind.requires_configuration()
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.slot, self.kind.user_message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub slot: Slot,
    pub image: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub triggered: u64,
    pub committed: u64,
    pub superseded: u64,
    pub failed: u64,
    pub discarded: u64,
}

#[derive(Debug)]
struct ActiveRequest {
    token: RequestToken,
    request: Arc<GenerationRequest>,
    credential_retry: bool,
}

#[derive(Debug, Default)]
struct SlotRecord {
    state: SlotState,
    active: Option<ActiveRequest>,
}

/// Owns every piece of mutable session state: selections, both slots, the
/// history, the preview and pending notices.
///
/// Each trigger takes a fresh token and records it as the slot's active request.
/// An outcome is committed only if its token is still the active one, so older
/// in-flight calls can finish in any order without touching visible state.
pub struct Orchestrator {
    events: EventWriter,
    credential_selector: Option<Arc<dyn CredentialSelector>>,
    person: Option<ImageAsset>,
    garment: Option<ImageAsset>,
    scenario_preset: String,
    custom_scenario: String,
    angle: Angle,
    tier: QualityTier,
    primary: SlotRecord,
    flat_lay: SlotRecord,
    flat_lay_garment: Option<AssetId>,
    next_token: RequestToken,
    history: SessionHistory,
    history_visible: bool,
    preview: Option<Preview>,
    notices: Vec<Notice>,
    stats: SessionStats,
}

impl Orchestrator {
    pub fn new(events: EventWriter) -> Self {
        let orchestrator = Self {
            events,
            credential_selector: None,
            person: None,
            garment: None,
            scenario_preset: SCENARIO_PRESETS[0].to_string(),
            custom_scenario: String::new(),
            angle: Angle::default(),
            tier: QualityTier::default(),
            primary: SlotRecord::default(),
            flat_lay: SlotRecord::default(),
            flat_lay_garment: None,
            next_token: 1,
            history: SessionHistory::new(),
            history_visible: false,
            preview: None,
            notices: Vec::new(),
            stats: SessionStats::default(),
        };
        orchestrator.emit(
            "session_started",
            json!({ "history_limit": orchestrator.history.limit() }),
        );
        orchestrator
    }

    pub fn with_credential_selector(mut self, selector: Arc<dyn CredentialSelector>) -> Self {
        self.credential_selector = Some(selector);
        self
    }

    pub fn slot_state(&self, slot: Slot) -> &SlotState {
        &self.record(slot).state
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn history_visible(&self) -> bool {
        self.history_visible
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn angle(&self) -> Angle {
        self.angle
    }

    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    pub fn person(&self) -> Option<&ImageAsset> {
        self.person.as_ref()
    }

    pub fn garment(&self) -> Option<&ImageAsset> {
        self.garment.as_ref()
    }

    pub fn scenario(&self) -> String {
        prompt::resolve_scenario(
            Some(self.scenario_preset.as_str()),
            Some(self.custom_scenario.as_str()),
        )
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn summary(&self, started_at: &str, finished_at: &str) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id().to_string(),
            started_at: started_at.to_string(),
            finished_at: finished_at.to_string(),
            triggered: self.stats.triggered,
            committed: self.stats.committed,
            superseded: self.stats.superseded,
            failed: self.stats.failed,
            history_len: self.history.len() as u64,
        }
    }

    pub fn select_person(&mut self, asset: ImageAsset) {
        self.emit_asset_selected("person", &asset);
        self.person = Some(asset);
    }

    /// Replaces the garment. The current try-on no longer matches it, so the
    /// primary slot drops back to idle and the angle to its default; the
    /// product shot is regenerated for the new garment.
    pub fn select_garment(&mut self, asset: ImageAsset) -> Option<Dispatch> {
        self.emit_asset_selected("garment", &asset);
        self.garment = Some(asset);

        self.invalidate(Slot::Primary);
        self.angle = Angle::default();
        if self
            .preview
            .as_ref()
            .is_some_and(|preview| preview.slot == Slot::Primary)
        {
            self.preview = None;
        }

        self.on_garment_asset_changed()
    }

    /// Starts the flat-lay generation once per distinct garment selection.
    /// Calling it again for the same garment does nothing.
    pub fn on_garment_asset_changed(&mut self) -> Option<Dispatch> {
        let garment = self.garment.clone()?;
        if self.flat_lay_garment == Some(garment.id()) {
            return None;
        }
        self.flat_lay_garment = Some(garment.id());

        let request = GenerationRequest {
            assets: vec![garment],
            instruction: prompt::flat_lay_prompt(),
            tier: QualityTier::Standard,
            angle: None,
        };
        Some(self.begin(Slot::FlatLay, request, false))
    }

    /// Picks a preset; clears any custom scene text.
    pub fn select_scenario(&mut self, preset: &str) {
        let preset = preset.trim();
        if preset.is_empty() {
            return;
        }
        self.scenario_preset = preset.to_string();
        self.custom_scenario.clear();
    }

    pub fn set_custom_scenario(&mut self, text: &str) {
        self.custom_scenario = text.trim().to_string();
    }

    /// Records the angle. When a try-on is showing or on its way, the change
    /// regenerates into the same slot.
    pub fn select_angle(&mut self, token: &str) -> Option<Dispatch> {
        let angle = Angle::from_token(token).unwrap_or_else(|| {
            tracing::warn!(token, "unknown angle token; using front");
            Angle::default()
        });
        self.angle = angle;
        let regenerate = matches!(
            self.primary.state,
            SlotState::Ready(_) | SlotState::Pending(_)
        );
        if regenerate {
            return self.trigger_primary(None);
        }
        None
    }

    pub fn set_quality_tier(&mut self, tier: QualityTier) {
        if tier == QualityTier::Enhanced && self.tier != QualityTier::Enhanced {
            if let Some(selector) = self.credential_selector.as_ref() {
                if !selector.has_selected_credential() {
                    if let Err(err) = selector.open_selector() {
                        tracing::warn!("credential selection unavailable: {err:#}");
                    }
                }
            }
        }
        self.tier = tier;
    }

    /// Builds a try-on request from the current selection. A no-op without both
    /// photos, or when the identical request is already in flight.
    pub fn trigger_primary(&mut self, angle: Option<Angle>) -> Option<Dispatch> {
        let (Some(person), Some(garment)) = (self.person.clone(), self.garment.clone()) else {
            tracing::debug!("primary trigger ignored: person and garment required");
            return None;
        };
        if let Some(angle) = angle {
            self.angle = angle;
        }

        let request = GenerationRequest {
            assets: vec![person, garment],
            instruction: prompt::try_on_prompt(&self.scenario(), self.angle, self.tier),
            tier: self.tier,
            angle: Some(self.angle),
        };
        if self
            .primary
            .active
            .as_ref()
            .is_some_and(|active| active.request.same_as(&request))
        {
            tracing::debug!("primary trigger ignored: identical request in flight");
            return None;
        }
        Some(self.begin(Slot::Primary, request, false))
    }

    /// Feeds back the outcome of a dispatched request.
    pub fn resolve(
        &mut self,
        token: RequestToken,
        outcome: Result<String, GenerationError>,
    ) -> Resolution {
        let Some(slot) = self.slot_for_token(token) else {
            self.stats.discarded += 1;
            tracing::debug!(token, "discarding stale resolution");
            return Resolution::Discarded { token };
        };
        let Some(active) = self.record_mut(slot).active.take() else {
            return Resolution::Discarded { token };
        };

        match outcome {
            Ok(image) => {
                self.commit(slot, token, image);
                Resolution::Committed { slot, token }
            }
            Err(err) => {
                if err.kind == ErrorKind::CredentialRejected && !active.credential_retry {
                    if let Some(dispatch) = self.reselect_credential(slot, &active) {
                        return Resolution::Retried {
                            slot,
                            token,
                            dispatch,
                        };
                    }
                }
                let kind = err.kind;
                self.fail(slot, token, err);
                Resolution::Failed { slot, token, kind }
            }
        }
    }

    pub fn open_preview(&mut self, slot: Slot) -> bool {
        let Some(image) = self.record(slot).state.result() else {
            return false;
        };
        self.preview = Some(Preview {
            slot,
            image: image.to_string(),
            filename: self.download_filename(slot),
        });
        true
    }

    /// Refused while the primary slot is rendering a new angle.
    pub fn close_preview(&mut self) -> bool {
        if self.preview.is_some() && self.primary.state.is_pending() {
            return false;
        }
        self.preview = None;
        true
    }

    pub fn open_history(&mut self) {
        self.history_visible = true;
    }

    pub fn close_history(&mut self) {
        self.history_visible = false;
    }

    pub fn download_filename(&self, slot: Slot) -> String {
        match slot {
            Slot::Primary => format!("tryon-{}.png", self.angle.token()),
            Slot::FlatLay => "garment-flatlay.png".to_string(),
        }
    }

    /// Clears selections, slots, history and preview. Requests still in flight
    /// resolve into nothing.
    pub fn reset_session(&mut self) {
        self.person = None;
        self.garment = None;
        self.scenario_preset = SCENARIO_PRESETS[0].to_string();
        self.custom_scenario.clear();
        self.angle = Angle::default();
        self.primary = SlotRecord::default();
        self.flat_lay = SlotRecord::default();
        self.flat_lay_garment = None;
        self.history.clear();
        self.history_visible = false;
        self.preview = None;
        self.notices.clear();
        self.emit("session_reset", json!({ "next_token": self.next_token }));
    }

    fn begin(&mut self, slot: Slot, request: GenerationRequest, credential_retry: bool) -> Dispatch {
        let token = self.next_token;
        self.next_token += 1;
        let request = Arc::new(request);

        let record = self.record_mut(slot);
        let superseded = record
            .active
            .replace(ActiveRequest {
                token,
                request: Arc::clone(&request),
                credential_retry,
            })
            .map(|previous| previous.token);
        record.state = SlotState::Pending(token);

        self.stats.triggered += 1;
        if let Some(previous) = superseded {
            self.stats.superseded += 1;
            tracing::debug!(slot = %slot, previous, token, "request superseded");
            self.emit(
                "generation_superseded",
                json!({ "slot": slot, "token": previous, "by": token }),
            );
        }
        self.emit(
            "generation_started",
            json!({
                "slot": slot,
                "token": token,
                "tier": request.tier,
                "angle": request.angle.map(Angle::token),
                "images": request.assets.len(),
                "credential_retry": credential_retry,
            }),
        );

        Dispatch {
            slot,
            token,
            request,
        }
    }

    fn commit(&mut self, slot: Slot, token: RequestToken, image: String) {
        self.record_mut(slot).state = SlotState::Ready(image.clone());
        self.stats.committed += 1;
        self.emit(
            "generation_succeeded",
            json!({ "slot": slot, "token": token }),
        );
        if slot != Slot::Primary {
            return;
        }

        let evicted = self.history.push(image.clone());
        self.emit(
            "history_appended",
            json!({ "len": self.history.len(), "evicted": evicted.is_some() }),
        );

        let filename = self.download_filename(Slot::Primary);
        if let Some(preview) = self.preview.as_mut() {
            preview.slot = Slot::Primary;
            preview.image = image;
            preview.filename = filename;
            self.emit("preview_updated", json!({ "token": token }));
        }
    }

    fn fail(&mut self, slot: Slot, token: RequestToken, err: GenerationError) {
        tracing::warn!(slot = %slot, token, kind = %err.kind, "generation failed: {}", err.message);
        self.record_mut(slot).state = SlotState::Failed(err.kind);
        self.stats.failed += 1;
        self.emit(
            "generation_failed",
            json!({
                "slot": slot,
                "token": token,
                "kind": err.kind,
                "message": err.message,
                "requires_configuration": err.kind.requires_configuration(),
            }),
        );
        self.notices.push(Notice {
            slot,
            kind: err.kind,
            message: err.message,
        });
    }

    /// Opens the host's credential picker and re-issues the request once.
    fn reselect_credential(&mut self, slot: Slot, active: &ActiveRequest) -> Option<Dispatch> {
        let selector = self.credential_selector.clone()?;
        if let Err(err) = selector.open_selector() {
            tracing::warn!("credential re-selection failed: {err:#}");
            return None;
        }
        self.emit(
            "credential_reselection",
            json!({ "slot": slot, "token": active.token }),
        );
        Some(self.begin(slot, GenerationRequest::clone(&active.request), true))
    }

    /// Drops the slot's result and forgets its in-flight request.
    fn invalidate(&mut self, slot: Slot) {
        let record = self.record_mut(slot);
        let dropped = record.active.take().map(|active| active.token);
        record.state = SlotState::Idle;
        if let Some(previous) = dropped {
            self.stats.superseded += 1;
            self.emit(
                "generation_superseded",
                json!({ "slot": slot, "token": previous, "by": Value::Null }),
            );
        }
    }

    fn slot_for_token(&self, token: RequestToken) -> Option<Slot> {
        [Slot::Primary, Slot::FlatLay].into_iter().find(|slot| {
            self.record(*slot)
                .active
                .as_ref()
                .is_some_and(|active| active.token == token)
        })
    }

    fn record(&self, slot: Slot) -> &SlotRecord {
        match slot {
            Slot::Primary => &self.primary,
            Slot::FlatLay => &self.flat_lay,
        }
    }

    fn record_mut(&mut self, slot: Slot) -> &mut SlotRecord {
        match slot {
            Slot::Primary => &mut self.primary,
            Slot::FlatLay => &mut self.flat_lay,
        }
    }

    fn emit_asset_selected(&self, role: &str, asset: &ImageAsset) {
        self.emit(
            "asset_selected",
            json!({
                "role": role,
                "asset_id": asset.id().to_string(),
                "preview_handle": asset.preview_handle(),
                "media_type": asset.media_type(),
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        if let Err(err) = self.events.emit(event_type, payload) {
            tracing::warn!(event_type, "event log write failed: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::Value;
    use tryon_contracts::events::EventWriter;
    use tryon_contracts::tryon::{Angle, ErrorKind, GenerationError, QualityTier, Slot};

    use super::{CredentialSelector, Dispatch, Orchestrator, Resolution, SlotState};
    use crate::encoder::ImageAsset;
    use crate::prompt;

    #[derive(Default)]
    struct FakeSelector {
        selected: AtomicBool,
        opened: AtomicUsize,
    }

    impl CredentialSelector for FakeSelector {
        fn has_selected_credential(&self) -> bool {
            self.selected.load(Ordering::SeqCst)
        }

        fn open_selector(&self) -> anyhow::Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.selected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn asset(tag: &str) -> ImageAsset {
        ImageAsset::from_bytes(tag.as_bytes().to_vec(), Some("image/png"))
    }

    fn image(tag: &str) -> Result<String, GenerationError> {
        Ok(format!("data:image/png;base64,{tag}"))
    }

    fn failure(kind: ErrorKind) -> Result<String, GenerationError> {
        Err(GenerationError::new(kind, "remote said no"))
    }

    fn session() -> (Orchestrator, Dispatch) {
        let mut orchestrator = Orchestrator::new(EventWriter::disabled("test-session"));
        orchestrator.select_person(asset("person"));
        let flat_lay = orchestrator
            .select_garment(asset("garment"))
            .expect("flat-lay dispatch");
        (orchestrator, flat_lay)
    }

    fn trigger(orchestrator: &mut Orchestrator, angle: Angle) -> Dispatch {
        orchestrator
            .trigger_primary(Some(angle))
            .expect("primary dispatch")
    }

    #[test]
    fn only_the_latest_trigger_commits_regardless_of_arrival_order() {
        let (mut orchestrator, _) = session();
        let first = trigger(&mut orchestrator, Angle::Front);
        let second = trigger(&mut orchestrator, Angle::Back);
        let third = trigger(&mut orchestrator, Angle::Leaning);
        assert!(first.token < second.token && second.token < third.token);

        assert!(matches!(
            orchestrator.resolve(third.token, image("third")),
            Resolution::Committed { slot: Slot::Primary, .. }
        ));
        assert!(matches!(
            orchestrator.resolve(first.token, image("first")),
            Resolution::Discarded { .. }
        ));
        assert!(matches!(
            orchestrator.resolve(second.token, failure(ErrorKind::RemoteUnavailable)),
            Resolution::Discarded { .. }
        ));

        assert_eq!(
            orchestrator.slot_state(Slot::Primary).result(),
            Some("data:image/png;base64,third")
        );
        assert_eq!(orchestrator.history().len(), 1);
        assert!(orchestrator.take_notices().is_empty());
        assert_eq!(orchestrator.stats().superseded, 2);
        assert_eq!(orchestrator.stats().discarded, 2);
    }

    #[test]
    fn history_keeps_the_fifteen_most_recent_results() {
        let (mut orchestrator, _) = session();
        for index in 0..20 {
            let angle = if index % 2 == 0 { Angle::Front } else { Angle::Back };
            let dispatch = trigger(&mut orchestrator, angle);
            orchestrator.resolve(dispatch.token, image(&format!("r{index}")));
        }
        let history = orchestrator.history();
        assert_eq!(history.len(), 15);
        assert_eq!(history.get(0), Some("data:image/png;base64,r19"));
        assert_eq!(history.get(14), Some("data:image/png;base64,r5"));
    }

    #[test]
    fn garment_change_resets_primary_and_angle() {
        let (mut orchestrator, _) = session();
        let done = trigger(&mut orchestrator, Angle::Back);
        orchestrator.resolve(done.token, image("back"));
        let in_flight = trigger(&mut orchestrator, Angle::Leaning);

        let flat_lay = orchestrator.select_garment(asset("jacket"));
        assert!(flat_lay.is_some());
        assert_eq!(orchestrator.slot_state(Slot::Primary), &SlotState::Idle);
        assert_eq!(orchestrator.angle(), Angle::Front);

        assert!(matches!(
            orchestrator.resolve(in_flight.token, image("stale")),
            Resolution::Discarded { .. }
        ));
        assert_eq!(orchestrator.slot_state(Slot::Primary), &SlotState::Idle);
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[test]
    fn person_change_keeps_current_result() {
        let (mut orchestrator, _) = session();
        let done = trigger(&mut orchestrator, Angle::Front);
        orchestrator.resolve(done.token, image("front"));
        orchestrator.select_person(asset("someone else"));
        assert!(orchestrator.slot_state(Slot::Primary).result().is_some());
    }

    #[test]
    fn flat_lay_starts_once_per_garment_selection() {
        let mut orchestrator = Orchestrator::new(EventWriter::disabled("test-session"));
        assert!(orchestrator.on_garment_asset_changed().is_none());

        let garment = asset("garment");
        let first = orchestrator
            .select_garment(garment.clone())
            .expect("first selection dispatches");
        assert_eq!(first.slot, Slot::FlatLay);
        assert_eq!(first.request.tier, QualityTier::Standard);
        assert_eq!(first.request.instruction, prompt::flat_lay_prompt());
        assert_eq!(first.request.assets.len(), 1);

        assert!(orchestrator.on_garment_asset_changed().is_none());
        assert!(orchestrator.select_garment(garment).is_none());
        assert_eq!(orchestrator.stats().triggered, 1);

        let reloaded = orchestrator
            .select_garment(asset("garment"))
            .expect("new selection of the same file dispatches");
        assert!(reloaded.token > first.token);
        assert!(matches!(
            orchestrator.resolve(first.token, image("old-shot")),
            Resolution::Discarded { .. }
        ));
    }

    #[test]
    fn back_view_on_rooftop_sends_person_then_garment() {
        let mut orchestrator = Orchestrator::new(EventWriter::disabled("test-session"));
        let person = asset("person");
        let garment = asset("garment");
        orchestrator.select_person(person.clone());
        orchestrator.select_garment(garment.clone());
        orchestrator.select_scenario("Rooftop Party");

        let dispatch = trigger(&mut orchestrator, Angle::Back);
        let ids: Vec<_> = dispatch.request.assets.iter().map(ImageAsset::id).collect();
        assert_eq!(ids, vec![person.id(), garment.id()]);
        assert!(dispatch.request.instruction.contains("Rooftop Party"));
        assert!(dispatch
            .request
            .instruction
            .contains(prompt::angle_description(Angle::Back)));

        orchestrator.resolve(dispatch.token, image("rooftop"));
        assert_eq!(
            orchestrator.history().get(0),
            Some("data:image/png;base64,rooftop")
        );
        assert!(matches!(
            orchestrator.slot_state(Slot::Primary),
            SlotState::Ready(_)
        ));
    }

    #[test]
    fn custom_scene_overrides_preset_until_a_preset_is_picked() {
        let (mut orchestrator, _) = session();
        orchestrator.select_scenario("Rooftop Party");
        orchestrator.set_custom_scenario("  foggy harbour  ");
        assert_eq!(orchestrator.scenario(), "foggy harbour");
        let dispatch = trigger(&mut orchestrator, Angle::Front);
        assert!(dispatch
            .request
            .instruction
            .contains("Environment: foggy harbour. "));
        orchestrator.select_scenario("Sunset Beach");
        assert_eq!(orchestrator.scenario(), "Sunset Beach");
    }

    #[test]
    fn trigger_without_both_photos_is_ignored() {
        let mut orchestrator = Orchestrator::new(EventWriter::disabled("test-session"));
        orchestrator.select_person(asset("person"));
        assert!(orchestrator.trigger_primary(Some(Angle::Back)).is_none());
        assert_eq!(orchestrator.angle(), Angle::Front);
        assert_eq!(orchestrator.slot_state(Slot::Primary), &SlotState::Idle);
    }

    #[test]
    fn missing_credential_fails_primary_only() {
        let (mut orchestrator, flat_lay) = session();
        let primary = trigger(&mut orchestrator, Angle::Front);

        assert!(matches!(
            orchestrator.resolve(primary.token, failure(ErrorKind::MissingCredential)),
            Resolution::Failed {
                kind: ErrorKind::MissingCredential,
                ..
            }
        ));
        assert_eq!(
            orchestrator.slot_state(Slot::Primary),
            &SlotState::Failed(ErrorKind::MissingCredential)
        );
        assert!(orchestrator.slot_state(Slot::FlatLay).is_pending());

        let notices = orchestrator.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].requires_configuration());
        assert_eq!(notices[0].slot, Slot::Primary);

        orchestrator.resolve(flat_lay.token, image("flat"));
        assert!(orchestrator.slot_state(Slot::FlatLay).result().is_some());
        assert!(orchestrator.history().is_empty());
    }

    #[test]
    fn angle_changes_while_previewing_show_only_the_last() {
        let (mut orchestrator, _) = session();
        let front = trigger(&mut orchestrator, Angle::Front);
        orchestrator.resolve(front.token, image("front"));
        assert!(orchestrator.open_preview(Slot::Primary));

        let back = orchestrator.select_angle("back").expect("regenerates");
        assert!(!orchestrator.close_preview());
        let leaning = orchestrator.select_angle("leaning").expect("regenerates");
        let left = orchestrator.select_angle("left").expect("regenerates");

        orchestrator.resolve(back.token, image("back"));
        orchestrator.resolve(left.token, image("left"));
        orchestrator.resolve(leaning.token, image("leaning"));

        let preview = orchestrator.preview().expect("preview stays open");
        assert_eq!(preview.image, "data:image/png;base64,left");
        assert_eq!(preview.filename, "tryon-left-side.png");
        assert_eq!(orchestrator.history().len(), 2);
        assert!(orchestrator.close_preview());
        assert!(orchestrator.preview().is_none());
    }

    #[test]
    fn angle_change_without_result_only_records_angle() {
        let (mut orchestrator, _) = session();
        assert!(orchestrator.select_angle("lowered").is_none());
        assert_eq!(orchestrator.angle(), Angle::Lowered);
        assert!(orchestrator.select_angle("upside-down").is_none());
        assert_eq!(orchestrator.angle(), Angle::Front);
    }

    #[test]
    fn identical_trigger_in_flight_is_not_repeated() {
        let (mut orchestrator, _) = session();
        let dispatch = trigger(&mut orchestrator, Angle::Front);
        assert!(orchestrator.trigger_primary(None).is_none());
        assert_eq!(
            orchestrator.slot_state(Slot::Primary),
            &SlotState::Pending(dispatch.token)
        );

        orchestrator.set_quality_tier(QualityTier::Enhanced);
        let enhanced = trigger(&mut orchestrator, Angle::Front);
        assert_eq!(enhanced.request.tier, QualityTier::Enhanced);
    }

    #[test]
    fn rejected_credential_is_reselected_and_retried_once() {
        let selector = Arc::new(FakeSelector::default());
        let (orchestrator, _) = session();
        let mut orchestrator = orchestrator.with_credential_selector(selector.clone());
        let first = trigger(&mut orchestrator, Angle::Back);

        let retry = match orchestrator.resolve(first.token, failure(ErrorKind::CredentialRejected)) {
            Resolution::Retried { dispatch, .. } => dispatch,
            other => panic!("expected retry, got {other:?}"),
        };
        assert_eq!(selector.opened.load(Ordering::SeqCst), 1);
        assert!(retry.token > first.token);
        assert!(retry.request.same_as(&first.request));
        assert!(orchestrator.take_notices().is_empty());

        assert!(matches!(
            orchestrator.resolve(retry.token, failure(ErrorKind::CredentialRejected)),
            Resolution::Failed {
                kind: ErrorKind::CredentialRejected,
                ..
            }
        ));
        assert_eq!(selector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.take_notices().len(), 1);
    }

    #[test]
    fn rejected_credential_without_selector_fails() {
        let (mut orchestrator, _) = session();
        let dispatch = trigger(&mut orchestrator, Angle::Front);
        assert!(matches!(
            orchestrator.resolve(dispatch.token, failure(ErrorKind::CredentialRejected)),
            Resolution::Failed { .. }
        ));
    }

    #[test]
    fn enhanced_tier_asks_for_a_credential_once() {
        let selector = Arc::new(FakeSelector::default());
        let mut orchestrator = Orchestrator::new(EventWriter::disabled("test-session"))
            .with_credential_selector(selector.clone());
        orchestrator.set_quality_tier(QualityTier::Enhanced);
        assert_eq!(selector.opened.load(Ordering::SeqCst), 1);
        orchestrator.set_quality_tier(QualityTier::Standard);
        orchestrator.set_quality_tier(QualityTier::Enhanced);
        assert_eq!(selector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.tier(), QualityTier::Enhanced);
    }

    #[test]
    fn preview_requires_a_ready_slot() {
        let (mut orchestrator, flat_lay) = session();
        assert!(!orchestrator.open_preview(Slot::FlatLay));
        orchestrator.resolve(flat_lay.token, image("flat"));
        assert!(orchestrator.open_preview(Slot::FlatLay));
        let preview = orchestrator.preview().expect("preview");
        assert_eq!(preview.filename, "garment-flatlay.png");

        orchestrator.open_history();
        assert!(orchestrator.history_visible());
        orchestrator.close_history();
        assert!(!orchestrator.history_visible());
    }

    #[test]
    fn reset_discards_in_flight_work() {
        let (mut orchestrator, flat_lay) = session();
        let primary = trigger(&mut orchestrator, Angle::Front);
        orchestrator.reset_session();

        assert!(matches!(
            orchestrator.resolve(primary.token, image("late")),
            Resolution::Discarded { .. }
        ));
        assert!(matches!(
            orchestrator.resolve(flat_lay.token, image("late-flat")),
            Resolution::Discarded { .. }
        ));
        assert!(orchestrator.person().is_none());
        assert!(orchestrator.history().is_empty());
        assert_eq!(orchestrator.slot_state(Slot::FlatLay), &SlotState::Idle);

        orchestrator.select_person(asset("person"));
        let again = orchestrator
            .select_garment(asset("garment"))
            .expect("flat-lay after reset");
        assert!(again.token > primary.token);
    }

    #[test]
    fn lifecycle_is_logged_to_events_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut orchestrator = Orchestrator::new(EventWriter::new(&path, "logged"));
        orchestrator.select_person(asset("person"));
        orchestrator.select_garment(asset("garment"));
        let first = trigger(&mut orchestrator, Angle::Front);
        let second = trigger(&mut orchestrator, Angle::Back);
        orchestrator.resolve(second.token, image("back"));
        orchestrator.resolve(first.token, image("front"));

        let types: Vec<String> = fs::read_to_string(&path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        for expected in [
            "session_started",
            "asset_selected",
            "generation_started",
            "generation_superseded",
            "generation_succeeded",
            "history_appended",
        ] {
            assert!(types.iter().any(|t| t == expected), "missing {expected}");
        }

        let summary = orchestrator.summary("start", "end");
        assert_eq!(summary.session_id, "logged");
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.superseded, 1);
        assert_eq!(summary.history_len, 1);
        Ok(())
    }
}
