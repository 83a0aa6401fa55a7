//! The router task: decode → sanitize → route → dispatch.
//!
//! One handler owns the registries, the proxy pools and the effect layer,
//! and processes commands and link events from its channels. Nothing in
//! here is allowed to abort the render tick or tear down a connection over
//! malformed input; every failure becomes a structured error reply.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, error, info, warn};
use network::protocol::{
    BatchUpdatePayload, InitPoolPayload, WireMessage, ZoneConfigPayload, ZoneSummary,
};
use network::{LinkEvent, LinkHandle};
use render_pool::{PoolService, ProxyKind, ProxyUpdate, RenderMode};
use settings_manager::{LayoutConfig, LayoutStore};
use spatial::{StageRegistry, Zone, ZoneRegistry};
use stage_core::{AudioState, Error, LinkId};
use tokio::sync::mpsc;

use crate::assist::BeatAssist;
use crate::effects::{BeatEvent, EffectRegistry};
use crate::ingest;

/// Default pool size when `init_pool` omits a count.
const DEFAULT_POOL_SIZE: usize = 32;

/// Where replies for a link go. Link handles implement this by enqueueing
/// onto their outbound queue; tests substitute a recording sink.
pub trait ReplySink: Send {
    fn send(&self, message: WireMessage);
}

impl ReplySink for LinkHandle {
    fn send(&self, message: WireMessage) {
        self.enqueue(message);
    }
}

/// Commands the application sends to the router.
pub enum RouterCommand {
    /// Register a link so replies can reach it.
    AttachLink {
        link: LinkId,
        sink: Box<dyn ReplySink>,
    },
    /// Remove a link's reply sink.
    DetachLink { link: LinkId },
    /// Stop the handler loop.
    Shutdown,
}

/// Routes inbound wire messages and dispatches their effects.
pub struct RouterHandler {
    zones: ZoneRegistry,
    stages: StageRegistry,
    pools: PoolService,
    effects: EffectRegistry,
    assist: BeatAssist,
    audio: AudioState,
    store: Option<LayoutStore>,
    links: HashMap<LinkId, Box<dyn ReplySink>>,
    command_rx: mpsc::Receiver<RouterCommand>,
    link_rx: mpsc::Receiver<LinkEvent>,
}

impl RouterHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zones: ZoneRegistry,
        stages: StageRegistry,
        pools: PoolService,
        effects: EffectRegistry,
        assist: BeatAssist,
        store: Option<LayoutStore>,
        command_rx: mpsc::Receiver<RouterCommand>,
        link_rx: mpsc::Receiver<LinkEvent>,
    ) -> Self {
        Self {
            zones,
            stages,
            pools,
            effects,
            assist,
            audio: AudioState::default(),
            store,
            links: HashMap::new(),
            command_rx,
            link_rx,
        }
    }

    /// The most recent audio snapshot, raw phase and confidence included,
    /// whether or not any assist fired for it.
    pub fn audio(&self) -> &AudioState {
        &self.audio
    }

    /// Run the handler, processing commands and link events until shutdown.
    pub async fn run(&mut self) -> Result<(), Error> {
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    if let RouterCommand::Shutdown = command {
                        info!("received shutdown command, exiting router");
                        break;
                    }
                    self.handle_command(command);
                }

                Some(event) = self.link_rx.recv() => {
                    self.handle_link_event(event);
                }

                else => break,
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::AttachLink { link, sink } => {
                debug!("attached link {}", link);
                self.links.insert(link, sink);
            }
            RouterCommand::DetachLink { link } => {
                debug!("detached link {}", link);
                self.links.remove(&link);
            }
            RouterCommand::Shutdown => unreachable!(),
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up { link } => {
                info!("link {} is up", link);
            }
            LinkEvent::Down { link, reason } => {
                warn!("link {} is down: {}", link, reason);
            }
            LinkEvent::Inbound { link, message } => {
                self.handle_message(link, message);
            }
            LinkEvent::Malformed { link, error } => {
                // Undecodable frames get a structured reply and the
                // connection stays up.
                debug!("link {}: {}", link, error);
                self.reply_error(link, &error.to_string());
            }
        }
    }

    fn handle_message(&mut self, link: LinkId, message: WireMessage) {
        match message {
            WireMessage::AudioState(payload) => self.handle_audio_state(link, payload),
            WireMessage::BatchUpdate(payload) => self.handle_batch_update(link, payload),
            WireMessage::InitPool(payload) => self.handle_init_pool(link, payload),
            WireMessage::SetZoneConfig(payload) => self.handle_zone_config(link, payload),
            WireMessage::DeleteZone { zone, .. } => self.handle_delete_zone(link, zone),
            WireMessage::SetRenderMode { mode, .. } => self.handle_render_mode(link, mode),
            WireMessage::SetVisible { zone, visible, .. } => {
                self.handle_set_visible(link, zone, visible)
            }
            WireMessage::ListZones { .. } => {
                let zones = self.zone_summaries();
                self.reply(link, WireMessage::Zones { zones });
            }
            WireMessage::Ping { seq } => {
                self.reply(link, WireMessage::Pong { seq });
            }
            WireMessage::Hello { link: remote, .. } => {
                // A peer (re)announcing itself over an established session.
                self.reply(link, WireMessage::HelloAck { link: remote });
            }
            WireMessage::Error { message } => {
                warn!("link {} reported an error: {}", link, message);
            }
            other => {
                // Replies and handshake acks are consumed elsewhere; seeing
                // one here is harmless.
                debug!("ignoring inbound '{}'", message_tag(&other));
            }
        }
    }

    /// Install a full audio snapshot and run the dispatch fan-out.
    fn handle_audio_state(
        &mut self,
        link: LinkId,
        payload: network::protocol::AudioStatePayload,
    ) {
        let state = match ingest::audio_state(&payload) {
            Ok(state) => state,
            Err(e) => {
                self.reply_error(link, &e.to_string());
                return;
            }
        };

        // Full replacement, never a merge. Raw phase and confidence are
        // kept even when no assist fires so effect layers can read them.
        self.audio = state.clone();

        self.effects.tick_all(&state, &self.zones, &mut self.pools);

        if state.is_beat {
            let beat = BeatEvent {
                intensity: state.beat_intensity,
                projected: false,
            };
            self.effects.beat_all(&beat, &self.zones, &mut self.pools);
        } else {
            let now = Instant::now();
            for zone in self.effects.active_zones() {
                if let Some(beat) = self.assist.maybe_project(&zone, &state, now) {
                    debug!("assist projected a beat for zone '{}'", zone);
                    self.effects
                        .beat_zone(&zone, &beat, &self.zones, &mut self.pools);
                }
            }
        }
    }

    fn handle_batch_update(&mut self, link: LinkId, payload: BatchUpdatePayload) {
        if !self.pools.has_pool(&payload.zone) {
            self.reply_error(link, &format!("unknown zone '{}'", payload.zone));
            return;
        }

        let updates: Vec<ProxyUpdate> = payload.entities.iter().map(ingest::proxy_update).collect();
        let particles = ingest::particles(&payload.particles);

        match self.pools.apply_batch(&payload.zone, &updates, particles) {
            Ok(updated) => self.reply(link, WireMessage::BatchUpdated { updated }),
            Err(e) => {
                error!("batch update for '{}' failed: {}", payload.zone, e);
                self.reply_error(link, &e.to_string());
            }
        }
    }

    fn handle_init_pool(&mut self, link: LinkId, payload: InitPoolPayload) {
        if !self.zones.contains_name(&payload.zone) {
            self.reply_error(link, &format!("unknown zone '{}'", payload.zone));
            return;
        }

        let count = payload
            .count
            .map(|c| c.max(0) as usize)
            .unwrap_or(DEFAULT_POOL_SIZE);
        let kind = payload
            .kind
            .as_deref()
            .and_then(ProxyKind::parse)
            .unwrap_or(ProxyKind::Block);

        match self
            .pools
            .init_pool(&payload.zone, count, kind, payload.hint.clone())
        {
            Ok(count) => self.reply(
                link,
                WireMessage::PoolInitialized {
                    zone: payload.zone,
                    count,
                },
            ),
            Err(e) => self.reply_error(link, &e.to_string()),
        }
    }

    fn handle_zone_config(&mut self, link: LinkId, payload: ZoneConfigPayload) {
        match self.apply_zone_config(&payload) {
            Ok(zone) => self.reply(link, WireMessage::Zone { zone }),
            Err(e) => self.reply_error(link, &e.to_string()),
        }
    }

    fn apply_zone_config(&mut self, payload: &ZoneConfigPayload) -> Result<ZoneSummary, Error> {
        if self.zones.contains_name(&payload.zone) {
            if let Some(origin) = &payload.origin {
                self.zones.move_zone(&payload.zone, ingest::vec3(origin))?;
            }
            if let Some(size) = &payload.size {
                self.zones.resize_zone(&payload.zone, ingest::vec3(size))?;
            }
            if let Some(rotation) = payload.rotation {
                self.zones
                    .rotate_zone(&payload.zone, stage_core::sanitize::sanitize_coord(rotation))?;
            }
        } else {
            let origin = payload.origin.as_ref().ok_or_else(|| {
                Error::Validation("creating a zone requires origin and size".to_string())
            })?;
            let size = payload.size.as_ref().ok_or_else(|| {
                Error::Validation("creating a zone requires origin and size".to_string())
            })?;
            let zone = Zone::new(
                payload.zone.clone(),
                payload.world.clone().unwrap_or_else(|| "main".to_string()),
                ingest::vec3(origin),
                ingest::vec3(size),
                payload
                    .rotation
                    .map(stage_core::sanitize::sanitize_coord)
                    .unwrap_or(0.0),
            )?;
            self.zones.create(zone)?;
        }

        self.persist();
        self.summary(&payload.zone)
    }

    fn handle_delete_zone(&mut self, link: LinkId, zone: String) {
        if !self.zones.contains_name(&zone) {
            self.reply_error(link, &format!("unknown zone '{}'", zone));
            return;
        }

        // Proxies go first so the zone never leaves orphans behind.
        self.effects.deactivate_zone(&zone, &mut self.pools);
        if let Err(e) = self.pools.cleanup(&zone) {
            error!("cleanup for zone '{}' failed: {}", zone, e);
        }
        self.assist.forget_zone(&spatial::zone_key(&zone));
        self.zones.remove(&zone);
        self.persist();

        self.reply(link, WireMessage::ZoneDeleted { zone });
    }

    fn handle_render_mode(&mut self, link: LinkId, mode: String) {
        match RenderMode::parse(&mode) {
            Some(parsed) => {
                self.pools.set_render_mode(parsed);
                self.reply(
                    link,
                    WireMessage::RenderModeUpdated {
                        mode: parsed.as_str().to_string(),
                    },
                );
            }
            None => self.reply_error(link, &format!("unknown render mode '{}'", mode)),
        }
    }

    fn handle_set_visible(&mut self, link: LinkId, zone: String, visible: bool) {
        match self.pools.set_visible(&zone, visible) {
            Ok(_) => self.reply(link, WireMessage::VisibilityUpdated { zone, visible }),
            Err(e) => self.reply_error(link, &e.to_string()),
        }
    }

    fn zone_summaries(&self) -> Vec<ZoneSummary> {
        self.zones
            .list()
            .into_iter()
            .map(|zone| self.summarize(zone))
            .collect()
    }

    fn summary(&self, name: &str) -> Result<ZoneSummary, Error> {
        self.zones
            .get(name)
            .map(|zone| self.summarize(zone))
            .ok_or_else(|| Error::NotFound(format!("zone '{}'", name)))
    }

    fn summarize(&self, zone: &Zone) -> ZoneSummary {
        ZoneSummary {
            name: zone.name.clone(),
            world: zone.world.clone(),
            origin: [zone.origin.x, zone.origin.y, zone.origin.z],
            size: [zone.size.x, zone.size.y, zone.size.z],
            rotation: zone.rotation_degrees,
            entities: self.pools.entity_count(&zone.name),
        }
    }

    /// Write the current layout through the store. Persistence failures are
    /// logged, never surfaced to the wire.
    fn persist(&mut self) {
        let Some(store) = &mut self.store else {
            return;
        };
        let layout =
            LayoutConfig::capture(&self.zones, &self.stages, store.layout().effects.clone());
        store.set_layout(layout);
        if let Err(e) = store.save() {
            warn!("failed to persist layout: {}", e);
        }
    }

    fn reply(&mut self, link: LinkId, message: WireMessage) {
        match self.links.get(&link) {
            Some(sink) => sink.send(message),
            None => warn!("no reply sink for link {}", link),
        }
    }

    fn reply_error(&mut self, link: LinkId, message: &str) {
        self.reply(
            link,
            WireMessage::Error {
                message: message.to_string(),
            },
        );
    }
}

fn message_tag(message: &WireMessage) -> &'static str {
    match message {
        WireMessage::AudioState(_) => "audio_state",
        WireMessage::BatchUpdate(_) => "batch_update",
        WireMessage::InitPool(_) => "init_pool",
        WireMessage::SetZoneConfig(_) => "set_zone_config",
        WireMessage::DeleteZone { .. } => "delete_zone",
        WireMessage::SetRenderMode { .. } => "set_render_mode",
        WireMessage::SetVisible { .. } => "set_visible",
        WireMessage::ListZones { .. } => "list_zones",
        WireMessage::Ping { .. } => "ping",
        WireMessage::Pong { .. } => "pong",
        WireMessage::Hello { .. } => "hello",
        WireMessage::HelloAck { .. } => "hello_ack",
        WireMessage::PoolInitialized { .. } => "pool_initialized",
        WireMessage::BatchUpdated { .. } => "batch_updated",
        WireMessage::Zones { .. } => "zones",
        WireMessage::Zone { .. } => "zone",
        WireMessage::VisibilityUpdated { .. } => "visibility_updated",
        WireMessage::RenderModeUpdated { .. } => "render_mode_updated",
        WireMessage::ZoneDeleted { .. } => "zone_deleted",
        WireMessage::Error { .. } => "error",
    }
}
