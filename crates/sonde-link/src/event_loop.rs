//! The single background IO loop: receives and fuses inbound telemetry,
//! keeps the GCS heartbeat and stream requests flowing, and emits
//! periodic state snapshots.
//!
//! One loop task exists per connection. All decode and transmit errors
//! inside the loop are logged and swallowed; only cancellation ends it.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use mavlink::common::{self, MavCmd};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event_bus::{Event, EventBus, EventTopic};
use crate::modes;
use crate::params::{ParamEvent, ParamKind, ParamTable, ParamUpdate};
use crate::sensor::{valid_channels, CassDataType, CassSensorRaw};
use crate::state::{AdsbTarget, HistorySample, Severity, SharedVehicleState};
use crate::transport::{Inbound, LinkEndpoint, Transport};
use crate::wind::{self, WindEstimator};

/// Identity of the tracked vehicle, learned from its heartbeats.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VehicleTarget {
    pub system_id: u8,
    pub component_id: u8,
}

/// Fallback identity used before any heartbeat has been seen.
const DEFAULT_TARGET: VehicleTarget = VehicleTarget {
    system_id: 1,
    component_id: 1,
};

const HEARTBEAT_BURST: usize = 3;
const TICK_INTERVAL: Duration = Duration::from_millis(50);
const WATCHDOG_INTERVAL_S: u64 = 5;

pub(crate) struct IoLoop {
    pub state: SharedVehicleState,
    pub bus: Arc<EventBus>,
    pub params: Arc<StdMutex<ParamTable>>,
    pub wind: Arc<StdRwLock<WindEstimator>>,
    pub target: Arc<StdMutex<Option<VehicleTarget>>>,
    pub stream_rate_hz: Arc<AtomicU16>,
    pub message_count: Arc<AtomicU64>,
    pub config: ClientConfig,
    pub endpoint: LinkEndpoint,
}

/// Loop-local cadence tracking; recreated on every connect.
struct LoopClock {
    connect_time: Instant,
    first_msg_at: Option<Instant>,
    last_watchdog_log: u64,
    last_gcs_heartbeat: Option<Instant>,
    last_stream_request: Option<Instant>,
    last_data_emit: Option<Instant>,
    streams_requested: bool,
}

impl IoLoop {
    pub(crate) async fn run(
        mut self,
        transport: Box<dyn Transport>,
        mut cmd_rx: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        let transport = &*transport;
        let mut clock = LoopClock {
            connect_time: Instant::now(),
            first_msg_at: None,
            last_watchdog_log: 0,
            last_gcs_heartbeat: None,
            last_stream_request: None,
            last_data_emit: None,
            streams_requested: false,
        };

        // Some routers only forward vehicle traffic after observing
        // outbound GCS packets, so prime the link with a short burst.
        for _ in 0..HEARTBEAT_BURST {
            self.send_gcs_heartbeat(transport).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        clock.last_gcs_heartbeat = Some(Instant::now());
        debug!("initial heartbeat burst sent ({HEARTBEAT_BURST} packets)");

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("IO loop cancelled");
                    break;
                }
                Some(cmd) = cmd_rx.recv() => {
                    self.handle_command(transport, cmd).await;
                }
                result = transport.recv() => {
                    match result {
                        Ok(inbound) => {
                            self.handle_inbound(transport, inbound, &mut clock).await;
                        }
                        Err(err) => {
                            // Transient by policy: malformed packets and
                            // socket hiccups must not kill the loop.
                            warn!("transport recv error: {err}");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.on_tick(transport, &mut clock).await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    async fn on_tick(&mut self, transport: &dyn Transport, clock: &mut LoopClock) {
        // Watchdog: distinguish "never connected" from "went silent".
        if clock.first_msg_at.is_none() {
            let elapsed = clock.connect_time.elapsed().as_secs();
            if elapsed >= WATCHDOG_INTERVAL_S
                && elapsed % WATCHDOG_INTERVAL_S == 0
                && elapsed != clock.last_watchdog_log
            {
                clock.last_watchdog_log = elapsed;
                warn!(
                    endpoint = %self.endpoint,
                    "still waiting for first MAVLink message ({elapsed}s elapsed)"
                );
            }
        }

        if elapsed_at_least(clock.last_gcs_heartbeat, self.config.gcs_heartbeat_interval) {
            self.send_gcs_heartbeat(transport).await;
            clock.last_gcs_heartbeat = Some(Instant::now());
        }

        // Re-request streams unconditionally; survives autopilot reboots
        // and requests lost on the way up.
        if clock.streams_requested
            && elapsed_at_least(clock.last_stream_request, self.config.stream_request_interval)
        {
            self.request_data_streams(transport, clock).await;
        }

        let silence = {
            let mut params = self.params.lock().expect("param table lock poisoned");
            params.check_silence(self.config.param_silence_timeout)
        };
        if let Some(outcome) = silence {
            if let ParamEvent::DownloadComplete { received, declared, .. } = &outcome {
                info!("parameter download timed out: received {received}/{declared}");
            }
            self.bus.emit(Event::Param(outcome));
        }

        if elapsed_at_least(clock.last_data_emit, self.config.data_emit_interval) {
            // Snapshot construction is skipped when nothing listens.
            if self.bus.has_subscribers(EventTopic::DataUpdated) {
                let snapshot = self.state.snapshot(self.config.heartbeat_timeout);
                self.bus.emit(Event::DataUpdated(snapshot));
            }
            clock.last_data_emit = Some(Instant::now());
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn handle_inbound(
        &mut self,
        transport: &dyn Transport,
        inbound: Inbound,
        clock: &mut LoopClock,
    ) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        if clock.first_msg_at.is_none() {
            clock.first_msg_at = Some(Instant::now());
            info!(
                "first MAVLink message received after {:.1}s",
                clock.connect_time.elapsed().as_secs_f64()
            );
        }

        match inbound {
            Inbound::Mav { header, message } => {
                self.fuse_message(transport, &header, &message, clock).await;
            }
            Inbound::Sensor { frame, .. } => self.fuse_sensor(&frame),
        }
    }

    async fn fuse_message(
        &mut self,
        transport: &dyn Transport,
        header: &mavlink::MavHeader,
        message: &common::MavMessage,
        clock: &mut LoopClock,
    ) {
        match message {
            common::MavMessage::HEARTBEAT(data) => {
                self.on_heartbeat(transport, header, data, clock).await;
            }
            common::MavMessage::GLOBAL_POSITION_INT(data) => {
                let mut state = self.state.write();
                // Wire encoding is degE7 / mm / cm/s / cdeg.
                state.lat = f64::from(data.lat) / 1e7;
                state.lon = f64::from(data.lon) / 1e7;
                state.alt_amsl = f64::from(data.alt) / 1000.0;
                state.alt_rel = f64::from(data.relative_alt) / 1000.0;
                state.vx = data.vx;
                state.vy = data.vy;
                state.vz = data.vz;
                if data.hdg != u16::MAX {
                    // 65535 = heading unknown; leave the last value alone.
                    state.heading_deg = f64::from(data.hdg) / 100.0;
                }
            }
            common::MavMessage::ATTITUDE(data) => {
                let estimator = *self.wind.read().expect("wind estimator lock poisoned");
                let mut state = self.state.write();
                state.roll = f64::from(data.roll);
                state.pitch = f64::from(data.pitch);
                state.yaw = f64::from(data.yaw);
                // Wind is attitude-driven; recompute so it never lags the
                // latest pitch.
                let estimate = estimator.estimate(state.pitch, state.yaw, state.vz);
                state.wind_speed = estimate.speed;
                state.wind_direction = estimate.direction;
                state.vertical_wind = estimate.vertical;
            }
            common::MavMessage::VFR_HUD(data) => {
                let mut state = self.state.write();
                state.airspeed = f64::from(data.airspeed);
                state.groundspeed = f64::from(data.groundspeed);
                state.heading_deg = f64::from(data.heading);
                state.throttle = data.throttle;
                // VFR_HUD.alt is AMSL; alt_rel belongs to
                // GLOBAL_POSITION_INT and must not be overwritten here.
                state.alt_amsl = f64::from(data.alt);
            }
            common::MavMessage::SYS_STATUS(data) => {
                let mut state = self.state.write();
                state.voltage = if data.voltage_battery == 0 || data.voltage_battery == u16::MAX {
                    0.0
                } else {
                    f64::from(data.voltage_battery) / 1000.0
                };
                state.current_ma = if data.current_battery >= 0 {
                    f64::from(data.current_battery)
                } else {
                    0.0
                };
                state.battery_pct = data.battery_remaining.max(0);
            }
            common::MavMessage::GPS_RAW_INT(data) => {
                let mut state = self.state.write();
                state.fix_type = data.fix_type as u8;
                state.satellites = data.satellites_visible;
                state.hdop = if data.eph > 0 && data.eph < 9999 {
                    f64::from(data.eph) / 100.0
                } else {
                    crate::state::HDOP_UNKNOWN
                };
            }
            common::MavMessage::RC_CHANNELS(data) => {
                // rssi 255 means unknown; 0-254 rescales to percent.
                if data.rssi < 255 {
                    self.state.write().rssi_percent = (u16::from(data.rssi) * 100 / 254) as u8;
                }
            }
            common::MavMessage::STATUSTEXT(data) => {
                let severity = Severity::from_raw(data.severity as u8);
                let text = String::from_utf8_lossy(&data.text[..])
                    .trim_end_matches('\0')
                    .to_string();
                info!("STATUSTEXT [{}]: {}", severity.name(), text);
                self.state.write().push_status(severity, text);
            }
            common::MavMessage::COMMAND_ACK(data) => {
                info!("COMMAND_ACK cmd={:?} result={:?}", data.command, data.result);
                self.state.write().last_command_ack =
                    Some((data.command as u16, data.result as u8));
            }
            common::MavMessage::SERVO_OUTPUT_RAW(data) => {
                self.state.write().servo_raw = [
                    data.servo1_raw,
                    data.servo2_raw,
                    data.servo3_raw,
                    data.servo4_raw,
                    data.servo5_raw,
                    data.servo6_raw,
                    data.servo7_raw,
                    data.servo8_raw,
                ];
            }
            common::MavMessage::ADSB_VEHICLE(data) => {
                let target = AdsbTarget {
                    icao: data.ICAO_address,
                    callsign: String::from_utf8_lossy(&data.callsign[..])
                        .trim_end_matches('\0')
                        .to_string(),
                    lat: f64::from(data.lat) / 1e7,
                    lon: f64::from(data.lon) / 1e7,
                    alt_m: f64::from(data.altitude) / 1000.0,
                    heading_deg: f64::from(data.heading) / 100.0,
                    speed_ms: f64::from(data.hor_velocity) / 100.0,
                    last_seen: crate::state::unix_now(),
                };
                // Upsert; stale entries are pruned by the consumer.
                self.state
                    .write()
                    .adsb_targets
                    .insert(target.icao, target.clone());
                self.bus.emit(Event::AdsbUpdated(target));
            }
            common::MavMessage::SYSTEM_TIME(data) => {
                let mut state = self.state.write();
                state.time_since_boot = f64::from(data.time_boot_ms) / 1000.0;
                if data.time_unix_usec > 0 {
                    state.utc_time = Some(data.time_unix_usec as f64 / 1e6);
                }
            }
            common::MavMessage::PARAM_VALUE(data) => {
                self.on_param_value(data);
            }
            _ => {
                // Most of the dialect is irrelevant here, by design.
                trace!("unhandled message type");
            }
        }
    }

    async fn on_heartbeat(
        &mut self,
        transport: &dyn Transport,
        header: &mavlink::MavHeader,
        data: &common::HEARTBEAT_DATA,
        clock: &mut LoopClock,
    ) {
        // Other ground stations share the network; their heartbeats must
        // not be mistaken for the vehicle.
        if data.mavtype == common::MavType::MAV_TYPE_GCS {
            return;
        }

        *self.target.lock().expect("target lock poisoned") = Some(VehicleTarget {
            system_id: header.system_id,
            component_id: header.component_id,
        });

        {
            let mut state = self.state.write();
            state.last_heartbeat = Some(Instant::now());
            state.armed = data
                .base_mode
                .contains(common::MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            state.flight_mode = modes::mode_name(data.custom_mode);
            state.system_status = data.system_status as u8;
        }

        // First vehicle heartbeat: ask for telemetry streams once; the
        // tick keeps re-issuing from then on.
        if !clock.streams_requested {
            clock.streams_requested = true;
            self.request_data_streams(transport, clock).await;
        }
    }

    fn on_param_value(&mut self, data: &common::PARAM_VALUE_DATA) {
        let name = String::from_utf8_lossy(&data.param_id[..])
            .trim_end_matches('\0')
            .to_string();
        let update = ParamUpdate {
            name,
            value: data.param_value,
            kind: ParamKind::from_mav(data.param_type),
            index: data.param_index,
            count: data.param_count,
        };
        // index 65535 marks unsolicited values such as write echoes.
        debug!(
            "PARAM_VALUE {} = {} (index {} of {})",
            update.name, update.value, update.index, update.count
        );

        let outcomes = {
            let mut params = self.params.lock().expect("param table lock poisoned");
            params.on_param_value(&update)
        };
        self.bus.emit(Event::Param(ParamEvent::Received(update)));
        for outcome in outcomes {
            match &outcome {
                ParamEvent::DownloadComplete { received, .. } => {
                    info!("parameter download complete: {received} parameters");
                }
                ParamEvent::WriteConfirmed { name, value } => {
                    info!("parameter write confirmed: {name} = {value}");
                }
                ParamEvent::WriteFailed { name, reported, .. } => {
                    warn!("parameter write failed: {name}, vehicle reports {reported}");
                }
                ParamEvent::Received(_) => {}
            }
            self.bus.emit(Event::Param(outcome));
        }
    }

    fn fuse_sensor(&mut self, frame: &CassSensorRaw) {
        let mut state = self.state.write();
        if frame.time_boot_ms > 0 {
            state.time_since_boot = f64::from(frame.time_boot_ms) / 1000.0;
        }

        match frame.data_type() {
            CassDataType::Temperature => {
                let temps = valid_channels(&frame.values);
                if !temps.is_empty() {
                    state.mean_temp = temps.iter().sum::<f64>() / temps.len() as f64;
                    state.temperature_sensors = temps;
                }
            }
            CassDataType::Humidity => {
                let rhs = valid_channels(&frame.values);
                if !rhs.is_empty() {
                    state.mean_rh = rhs.iter().sum::<f64>() / rhs.len() as f64;
                    state.humidity_sensors = rhs;
                }
            }
            // Resistance is unused; vehicle-computed wind is superseded by
            // the pitch-based estimate.
            _ => return,
        }

        // Kelvin guard: before the sensors initialize the mean sits near
        // zero and must not be shifted by -273.15.
        let temp_c = if state.mean_temp > 100.0 {
            state.mean_temp - 273.15
        } else {
            state.mean_temp
        };
        let dew = wind::dew_point(temp_c, state.mean_rh);
        let sample = HistorySample {
            time_since_boot: state.time_since_boot,
            lat: state.lat,
            lon: state.lon,
            alt_rel: state.alt_rel,
            alt_amsl: state.alt_amsl,
            temperature_c: temp_c,
            humidity: state.mean_rh,
            dew_point_c: dew,
            wind_speed: state.wind_speed,
            wind_dir: state.wind_direction,
            vertical_wind: state.vertical_wind,
            temp_sensors: state.temperature_sensors.clone(),
            rh_sensors: state.humidity_sensors.clone(),
            vz_cms: f64::from(state.vz),
        };
        // The single growth point for all history buffers.
        state.history.push(sample);
    }

    // ------------------------------------------------------------------
    // Transmit path
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, transport: &dyn Transport, cmd: Command) {
        match cmd {
            Command::CommandLong { command, params, reply } => {
                let result = self.send_command_long(transport, command, params).await;
                let _ = reply.send(result);
            }
            Command::SetMode { mode, reply } => {
                let result = match modes::mode_number(&mode) {
                    Some(custom_mode) => {
                        // param1 = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
                        self.send_command_long(
                            transport,
                            MavCmd::MAV_CMD_DO_SET_MODE,
                            [1.0, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
                        )
                        .await
                    }
                    None => {
                        warn!("unknown flight mode: {mode}");
                        Err(ClientError::ModeUnknown(mode))
                    }
                };
                let _ = reply.send(result);
            }
            Command::SetParam { name, value, kind, reply } => {
                let target = self.target_ids();
                // Param names are exactly 16 bytes on the wire, null-padded.
                let mut param_id = [0u8; 16];
                for (slot, byte) in param_id.iter_mut().zip(name.bytes()) {
                    *slot = byte;
                }
                let result = self
                    .transmit(
                        transport,
                        common::MavMessage::PARAM_SET(common::PARAM_SET_DATA {
                            param_value: value,
                            target_system: target.system_id,
                            target_component: target.component_id,
                            param_id: param_id.into(),
                            param_type: kind.to_mav(),
                        }),
                    )
                    .await;
                let _ = reply.send(result);
            }
            Command::RequestAllParams { reply } => {
                let target = self.target_ids();
                {
                    let mut params = self.params.lock().expect("param table lock poisoned");
                    params.begin_download();
                }
                info!(
                    "requesting all parameters from {}/{}",
                    target.system_id, target.component_id
                );
                let result = self
                    .transmit(
                        transport,
                        common::MavMessage::PARAM_REQUEST_LIST(common::PARAM_REQUEST_LIST_DATA {
                            target_system: target.system_id,
                            target_component: target.component_id,
                        }),
                    )
                    .await;
                let _ = reply.send(result);
            }
            Command::RcOverride { channel, pwm, reply } => {
                let result = self.send_rc_override(transport, channel, pwm).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn send_command_long(
        &mut self,
        transport: &dyn Transport,
        command: MavCmd,
        params: [f32; 7],
    ) -> Result<(), ClientError> {
        let target = self.target_ids();
        self.transmit(
            transport,
            common::MavMessage::COMMAND_LONG(common::COMMAND_LONG_DATA {
                target_system: target.system_id,
                target_component: target.component_id,
                command,
                confirmation: 0,
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
            }),
        )
        .await
    }

    async fn send_rc_override(
        &mut self,
        transport: &dyn Transport,
        channel: u8,
        pwm: u16,
    ) -> Result<(), ClientError> {
        if !(1..=8).contains(&channel) {
            warn!("RC override channel {channel} out of range, ignored");
            return Ok(());
        }
        let target = self.target_ids();
        // 0 = no change / release for every other channel.
        let mut channels = [0u16; 8];
        channels[usize::from(channel) - 1] = pwm;
        self.transmit(
            transport,
            common::MavMessage::RC_CHANNELS_OVERRIDE(common::RC_CHANNELS_OVERRIDE_DATA {
                target_system: target.system_id,
                target_component: target.component_id,
                chan1_raw: channels[0],
                chan2_raw: channels[1],
                chan3_raw: channels[2],
                chan4_raw: channels[3],
                chan5_raw: channels[4],
                chan6_raw: channels[5],
                chan7_raw: channels[6],
                chan8_raw: channels[7],
                ..Default::default()
            }),
        )
        .await
    }

    async fn request_data_streams(&mut self, transport: &dyn Transport, clock: &mut LoopClock) {
        let target = self.target_ids();
        let rate = self.stream_rate_hz.load(Ordering::Relaxed);
        let message = common::MavMessage::REQUEST_DATA_STREAM(common::REQUEST_DATA_STREAM_DATA {
            req_message_rate: rate,
            target_system: target.system_id,
            target_component: target.component_id,
            req_stream_id: 0, // MAV_DATA_STREAM_ALL
            start_stop: 1,
        });
        match transport.send(&message).await {
            Ok(()) => {
                clock.last_stream_request = Some(Instant::now());
                debug!(
                    "requested all data streams at {rate} Hz (target {}/{})",
                    target.system_id, target.component_id
                );
            }
            Err(err) => warn!("failed to request data streams: {err}"),
        }
    }

    async fn send_gcs_heartbeat(&self, transport: &dyn Transport) {
        let message = common::MavMessage::HEARTBEAT(common::HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: common::MavType::MAV_TYPE_GCS,
            autopilot: common::MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: common::MavModeFlag::empty(),
            system_status: common::MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        });
        if let Err(err) = transport.send(&message).await {
            warn!("failed to send GCS heartbeat: {err}");
        }
    }

    async fn transmit(
        &self,
        transport: &dyn Transport,
        message: common::MavMessage,
    ) -> Result<(), ClientError> {
        transport.send(&message).await.map_err(ClientError::from)
    }

    fn target_ids(&self) -> VehicleTarget {
        self.target
            .lock()
            .expect("target lock poisoned")
            .unwrap_or(DEFAULT_TARGET)
    }
}

fn elapsed_at_least(since: Option<Instant>, interval: Duration) -> bool {
    match since {
        Some(at) => at.elapsed() >= interval,
        None => true,
    }
}
