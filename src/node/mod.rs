//! Per-node control loop
//!
//! `NodeController` owns everything one node needs: the link, the settings
//! store, the firmware source, the clock, both sub-protocol engines, the live
//! radio profile and the role. Each `tick` receives at most one frame,
//! dispatches it by tag and then lets exactly one party use the channel:
//! the firmware cascade first, then a pending parameter broadcast, then the
//! Sender heartbeat.

pub mod status;

pub use status::StatusEvent;

use crate::cascade::{CascadeEvent, FirmwareCascade};
use crate::clock::Clock;
use crate::config::node::{HEARTBEAT_INTERVAL_MS, RX_POLL_MS, STATUS_QUEUE_LEN};
use crate::config::sync::{
    BOOT_LEAD_IN_MS, CONTROL_ANNOUNCE_INTERVAL_MS, CONTROL_ANNOUNCE_REPEATS,
    CONTROL_LISTEN_WINDOW_MS, INTER_FRAME_GUARD_MS,
};
use crate::firmware::FirmwareSource;
use crate::protocol::{FrameSerialiser, Message, MessageParser, Tag};
use crate::radio::params::RadioParameters;
use crate::radio::{Link, RxFrame, Transport, TransportError};
use crate::storage::{load_settings, save_parameters, save_role, SettingsStore};
use crate::sync::discovery::{announce_on_control, listen_on_control};
use crate::sync::{ParameterSync, SyncError};
use core::convert::Infallible;
use heapless::{Deque, String};
use log::{error, info, warn};

/// Which side of the link this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Sends heartbeats and receives firmware
    Sender,
    /// Listens, and distributes firmware it obtains
    Receiver,
}

impl NodeRole {
    pub fn toggled(self) -> Self {
        match self {
            NodeRole::Sender => NodeRole::Receiver,
            NodeRole::Receiver => NodeRole::Sender,
        }
    }
}

/// Classified button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Ignore,
    ToggleMode,
    CycleSF,
    CycleBW,
}

/// Conditions that stop the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// The radio could not be brought up; no protocol is possible
    RadioInit(TransportError),
}

/// Node-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Frames with an unrecognised tag or an unparseable `PING`
    pub protocol_errors: u32,
    pub pings_sent: u32,
    pub pings_heard: u32,
    pub last_ping_seq: Option<u32>,
    /// `CFG` frames ignored because a cascade session was open
    pub configs_deferred: u32,
    pub settings_write_failures: u32,
}

/// The node context
pub struct NodeController<T, S, F, C> {
    link: Link<T>,
    store: S,
    firmware: F,
    clock: C,
    sync: ParameterSync,
    cascade: FirmwareCascade,
    params: RadioParameters,
    role: NodeRole,
    ping_seq: u32,
    last_heartbeat_ms: Option<u64>,
    stats: NodeStats,
    status: Deque<StatusEvent, STATUS_QUEUE_LEN>,
    parser: MessageParser,
    serialiser: FrameSerialiser,
}

impl<T, S, F, C> NodeController<T, S, F, C>
where
    T: Transport,
    S: SettingsStore,
    F: FirmwareSource,
    C: Clock,
{
    /// Build a node from its collaborators, loading the persisted profile and role
    pub fn new(transport: T, store: S, firmware: F, clock: C) -> Self {
        let (params, role) = load_settings(&store);
        info!(
            "Node: loaded {} SF{} BW{} CR{} TX{}",
            role,
            params.spreading_factor,
            params.bandwidth.khz(),
            params.coding_rate,
            params.tx_power_dbm
        );
        Self {
            link: Link::new(transport),
            store,
            firmware,
            clock,
            sync: ParameterSync::new(),
            cascade: FirmwareCascade::new(),
            params,
            role,
            ping_seq: 0,
            last_heartbeat_ms: None,
            stats: NodeStats::default(),
            status: Deque::new(),
            parser: MessageParser::new(),
            serialiser: FrameSerialiser::new(),
        }
    }

    /// Bring the radio up and resynchronise with the peer.
    ///
    /// A Sender announces its profile on the control channel and then
    /// rebroadcasts it on the operational channel. A Receiver listens on the
    /// control channel for a bounded window and adopts what it hears.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        info!("Node: starting as {}", self.role);
        if let Err(e) = self.link.init(&self.params).await {
            error!("Node: radio init failed ({:?})", e);
            return Err(NodeError::RadioInit(e));
        }

        match self.role {
            NodeRole::Sender => {
                self.clock.delay_ms(BOOT_LEAD_IN_MS).await;
                if let Err(e) = announce_on_control(
                    &mut self.link,
                    &self.clock,
                    &self.params,
                    CONTROL_ANNOUNCE_REPEATS,
                    CONTROL_ANNOUNCE_INTERVAL_MS,
                )
                .await
                {
                    warn!("Node: control announce incomplete ({:?})", e);
                }
                // Nodes already on the operational channel never visit control
                if let Err(e) = self.sync.request_change(self.params) {
                    warn!("Node: boot rebroadcast refused ({:?})", e);
                }
            }
            NodeRole::Receiver => {
                match listen_on_control(
                    &mut self.sync,
                    &mut self.link,
                    &self.clock,
                    &self.params,
                    CONTROL_LISTEN_WINDOW_MS,
                )
                .await
                {
                    Ok(Some(heard)) => {
                        // The link is already on the heard profile
                        self.params = heard;
                        self.persist_parameters();
                        self.push_status(StatusEvent::ParametersApplied(heard));
                    }
                    Ok(None) => info!("Node: nothing heard on control channel"),
                    Err(e) => warn!("Node: control listen failed ({:?})", e),
                }
            }
        }

        self.last_heartbeat_ms = Some(self.clock.now_ms());
        Ok(())
    }

    /// `start`, then `tick` forever
    pub async fn run(&mut self) -> Result<Infallible, NodeError> {
        self.start().await?;
        loop {
            self.tick().await;
        }
    }

    /// One cooperative step of the node loop
    pub async fn tick(&mut self) {
        let now = self.clock.now_ms();
        let frame = self.link.receive(RX_POLL_MS, now).await;

        // A late frame must not complete a session that has already expired
        let now = self.clock.now_ms();
        if let Some(event) = self.cascade.expire(now) {
            self.on_cascade_event(event);
        }
        if let Some(frame) = frame {
            self.dispatch(&frame, now).await;
        }

        if let Some(event) = self
            .cascade
            .poll(&mut self.link, &mut self.firmware, now)
            .await
        {
            self.on_cascade_event(event);
        }

        if self.role == NodeRole::Receiver
            && self.cascade.is_idle()
            && !self.sync.is_broadcasting()
            && self.firmware.has_new_image()
        {
            if let Some(event) = self.cascade.begin_notify(&mut self.firmware) {
                self.on_cascade_event(event);
                if let Some(event) = self
                    .cascade
                    .poll(&mut self.link, &mut self.firmware, now)
                    .await
                {
                    self.on_cascade_event(event);
                }
            }
        }

        // A cascade in flight owns the channel
        if !self.cascade.is_idle() {
            return;
        }

        if self.sync.is_broadcasting() {
            if let Some(target) = self.sync.poll(&mut self.link, now).await {
                self.apply_parameters(target).await;
                self.last_heartbeat_ms = Some(now);
            }
            return;
        }

        if self.role == NodeRole::Sender {
            self.heartbeat(now).await;
        }
    }

    /// Turn a classified button press into a protocol action
    pub fn handle_button(&mut self, action: ButtonAction) -> Result<(), SyncError> {
        match action {
            ButtonAction::Ignore => Ok(()),
            ButtonAction::ToggleMode => {
                self.role = self.role.toggled();
                self.ping_seq = 0;
                info!("Node: role is now {}", self.role);
                if let Err(e) = save_role(&mut self.store, self.role) {
                    warn!("Node: role not persisted ({:?})", e);
                    self.stats.settings_write_failures += 1;
                }
                self.push_status(StatusEvent::RoleChanged(self.role));
                Ok(())
            }
            ButtonAction::CycleSF | ButtonAction::CycleBW => {
                if !self.cascade.is_idle() {
                    warn!("Node: parameter change refused, cascade active");
                    return Err(SyncError::Busy);
                }
                let base = self
                    .sync
                    .pending()
                    .map(|pending| pending.target)
                    .unwrap_or(self.params);
                let next = if action == ButtonAction::CycleSF {
                    base.with_next_spreading_factor()
                } else {
                    base.with_next_bandwidth()
                };
                self.sync.request_change(next)?;
                self.push_status(StatusEvent::ChangeRequested(next));
                Ok(())
            }
        }
    }

    /// Ask a distributor for its image without waiting for an announcement
    pub async fn request_update(&mut self) -> bool {
        let now = self.clock.now_ms();
        match self.cascade.request_update(&mut self.link, now).await {
            Some(event) => {
                self.on_cascade_event(event);
                true
            }
            None => false,
        }
    }

    async fn dispatch(&mut self, frame: &RxFrame, now: u64) {
        match Tag::of(&frame.data) {
            Some(Tag::Config) => {
                if self.cascade.session().is_some() {
                    warn!("Node: CFG ignored during firmware transfer");
                    self.stats.configs_deferred += 1;
                    return;
                }
                if let Some(params) = self.sync.on_config_frame(&frame.data) {
                    self.apply_parameters(params).await;
                }
            }
            Some(Tag::Ping) => match self.parser.parse(&frame.data) {
                Ok(Message::Ping { seq }) => {
                    info!("Node: PING #{} RSSI {} SNR {}", seq, frame.rssi, frame.snr);
                    self.stats.pings_heard += 1;
                    self.stats.last_ping_seq = Some(seq);
                    self.push_status(StatusEvent::PingHeard {
                        seq,
                        rssi: frame.rssi,
                        snr: frame.snr,
                    });
                }
                _ => {
                    warn!("Node: malformed PING discarded");
                    self.stats.protocol_errors += 1;
                }
            },
            Some(_) => {
                if let Some(event) = self
                    .cascade
                    .on_frame(&mut self.link, &mut self.firmware, self.role, &frame.data, now)
                    .await
                {
                    self.on_cascade_event(event);
                }
            }
            None => {
                warn!("Node: unknown frame ({} bytes) discarded", frame.data.len());
                self.stats.protocol_errors += 1;
            }
        }
    }

    async fn heartbeat(&mut self, now: u64) {
        let due = self
            .last_heartbeat_ms
            .map_or(true, |last| now.saturating_sub(last) >= HEARTBEAT_INTERVAL_MS);
        if !due || !self.link.quiet_for(INTER_FRAME_GUARD_MS, now) {
            return;
        }

        let seq = self.ping_seq;
        if let Ok(frame) = self.serialiser.serialise(&Message::Ping { seq }) {
            if self.link.send(&frame, now).await.is_ok() {
                self.stats.pings_sent += 1;
                self.push_status(StatusEvent::PingSent { seq });
            }
        }
        self.ping_seq = self.ping_seq.wrapping_add(1);
        self.last_heartbeat_ms = Some(now);
    }

    /// Retune to `params`, then make them live and persist them
    async fn apply_parameters(&mut self, params: RadioParameters) {
        if let Err(e) = self.link.apply_operational(&params).await {
            warn!("Node: retune failed ({:?}), keeping current profile", e);
            return;
        }
        self.params = params;
        info!(
            "Node: live SF{} BW{} CR{} TX{}",
            params.spreading_factor,
            params.bandwidth.khz(),
            params.coding_rate,
            params.tx_power_dbm
        );
        self.persist_parameters();
        self.push_status(StatusEvent::ParametersApplied(params));
    }

    fn persist_parameters(&mut self) {
        if let Err(e) = save_parameters(&mut self.store, &self.params) {
            warn!("Node: parameters not persisted ({:?})", e);
            self.stats.settings_write_failures += 1;
        }
    }

    fn on_cascade_event(&mut self, event: CascadeEvent) {
        let status = match event {
            CascadeEvent::NotifyStarted => StatusEvent::FirmwareAnnounced,
            CascadeEvent::RequestSent => StatusEvent::UpdateRequested,
            CascadeEvent::RequestReceived => StatusEvent::PeerRequestedUpdate,
            CascadeEvent::SessionStarted { size } => StatusEvent::TransferStarted { size },
            CascadeEvent::Progress { percent } => StatusEvent::TransferProgress { percent },
            CascadeEvent::VersionAdvertised => {
                let mut version = String::new();
                let _ = version.push_str(self.cascade.advertised_version().unwrap_or(""));
                StatusEvent::PeerFirmware(version)
            }
            CascadeEvent::Finished(outcome) => StatusEvent::CascadeFinished(outcome),
        };
        self.push_status(status);
    }

    fn push_status(&mut self, event: StatusEvent) {
        if self.status.is_full() {
            self.status.pop_front();
        }
        let _ = self.status.push_back(event);
    }

    /// Take the oldest queued status event
    pub fn next_status(&mut self) -> Option<StatusEvent> {
        self.status.pop_front()
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Live radio profile
    pub fn parameters(&self) -> &RadioParameters {
        &self.params
    }

    pub fn sync(&self) -> &ParameterSync {
        &self.sync
    }

    pub fn cascade(&self) -> &FirmwareCascade {
        &self.cascade
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn firmware(&self) -> &F {
        &self.firmware
    }

    /// Mutable access for the collaborator that feeds new images in
    pub fn firmware_mut(&mut self) -> &mut F {
        &mut self.firmware
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
