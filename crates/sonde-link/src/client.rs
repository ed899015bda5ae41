//! Public client handle: connection lifecycle, command facade and the
//! multi-step mission workflows.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use mavlink::common::MavCmd;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event_bus::{Event, EventBus, EventTopic};
use crate::event_loop::{IoLoop, VehicleTarget};
use crate::params::{Param, ParamKind, ParamProgress, ParamTable};
use crate::state::{SharedVehicleState, StateSnapshot};
use crate::transport::{self, LinkEndpoint, Transport, TransportSettings};
use crate::wind::WindEstimator;

const COMMAND_BUFFER: usize = 32;

/// AutoVP trigger pulse levels, µs.
const RC_PULSE_HIGH: u16 = 1900;
const RC_PULSE_RELEASE: u16 = 1100;

struct LinkHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
    cmd_tx: mpsc::Sender<Command>,
    connected_at: Instant,
    endpoint: LinkEndpoint,
}

/// Async MAVLink client for one CopterSonde vehicle.
///
/// Owns the shared [`VehicleState`](crate::state::VehicleState), the
/// [`EventBus`] and the parameter table; `start` spawns the single IO
/// loop task, `stop` tears it down. The handle itself stays usable across
/// reconnects, and telemetry fields survive them.
pub struct MavClient {
    config: ClientConfig,
    state: SharedVehicleState,
    bus: Arc<EventBus>,
    params: Arc<StdMutex<ParamTable>>,
    wind: Arc<StdRwLock<WindEstimator>>,
    target: Arc<StdMutex<Option<VehicleTarget>>>,
    stream_rate_hz: Arc<AtomicU16>,
    message_count: Arc<AtomicU64>,
    link: StdMutex<Option<LinkHandle>>,
}

impl Default for MavClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for MavClient {
    fn drop(&mut self) {
        // Dropping the handle without stop() must not leak the IO task.
        if let Ok(mut link) = self.link.lock() {
            if let Some(handle) = link.take() {
                handle.cancel.cancel();
            }
        }
    }
}

impl MavClient {
    pub fn new(config: ClientConfig) -> Self {
        let stream_rate = config.stream_rate_hz;
        Self {
            config,
            state: SharedVehicleState::new(),
            bus: Arc::new(EventBus::new()),
            params: Arc::new(StdMutex::new(ParamTable::new())),
            wind: Arc::new(StdRwLock::new(WindEstimator::default())),
            target: Arc::new(StdMutex::new(None)),
            stream_rate_hz: Arc::new(AtomicU16::new(stream_rate)),
            message_count: Arc::new(AtomicU64::new(0)),
            link: StdMutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the transport and start the background IO loop.
    ///
    /// Transport-open failures surface here and leave the client ready
    /// for another attempt. Calling while already running is a no-op.
    pub async fn start(&self, endpoint: &LinkEndpoint) -> Result<(), ClientError> {
        if self.running() {
            warn!("start() called but already running");
            return Ok(());
        }

        info!("opening MAVLink connection: {endpoint}");
        let settings = TransportSettings {
            system_id: self.config.gcs_system_id,
            component_id: self.config.gcs_component_id,
            cass_extra_crc: self.config.cass_extra_crc,
        };
        let transport = transport::connect(endpoint, settings)
            .await
            .map_err(|err| ClientError::ConnectFailed(err.to_string()))?;
        self.start_with_transport(endpoint, transport).await
    }

    /// Start the IO loop over an already-open transport. Useful for
    /// alternate producers and scripted transports in tests; `start`
    /// is this plus the production `connect`.
    pub async fn start_with_transport(
        &self,
        endpoint: &LinkEndpoint,
        transport: Box<dyn Transport>,
    ) -> Result<(), ClientError> {
        if self.running() {
            warn!("start() called but already running");
            return Ok(());
        }

        // Connection-scoped state starts fresh on every connect; the
        // telemetry fields in VehicleState deliberately do not.
        self.message_count.store(0, Ordering::Relaxed);
        *self.target.lock().expect("target lock poisoned") = None;

        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let io = IoLoop {
            state: self.state.clone(),
            bus: self.bus.clone(),
            params: self.params.clone(),
            wind: self.wind.clone(),
            target: self.target.clone(),
            stream_rate_hz: self.stream_rate_hz.clone(),
            message_count: self.message_count.clone(),
            config: self.config.clone(),
            endpoint: endpoint.clone(),
        };
        let join = tokio::spawn(io.run(transport, cmd_rx, cancel.clone()));

        let mut link = self.link.lock().expect("link lock poisoned");
        if link.is_some() {
            // Lost a start race; keep the existing connection.
            warn!("start() raced an active connection, dropping new transport");
            cancel.cancel();
            return Ok(());
        }
        *link = Some(LinkHandle {
            cancel,
            join,
            cmd_tx,
            connected_at: Instant::now(),
            endpoint: endpoint.clone(),
        });
        drop(link);

        info!("MAVLink IO task started");
        self.bus.emit(Event::ConnectionChanged { connected: true });
        Ok(())
    }

    /// Signal the IO loop to stop and wait (bounded) for it to exit.
    /// Safe to call when not running.
    pub async fn stop(&self) {
        let handle = self.link.lock().expect("link lock poisoned").take();
        let Some(handle) = handle else {
            return;
        };
        info!("stopping MAVLink IO task");
        handle.cancel.cancel();
        let abort = handle.join.abort_handle();
        match tokio::time::timeout(self.config.stop_timeout, handle.join).await {
            Ok(_) => debug!("MAVLink IO task stopped"),
            Err(_) => {
                warn!(
                    "IO task did not exit within {:?}, aborting",
                    self.config.stop_timeout
                );
                abort.abort();
            }
        }
        self.bus.emit(Event::ConnectionChanged { connected: false });
    }

    pub fn running(&self) -> bool {
        self.link.lock().expect("link lock poisoned").is_some()
    }

    /// Endpoint of the active connection, if any.
    pub fn endpoint(&self) -> Option<LinkEndpoint> {
        self.link
            .lock()
            .expect("link lock poisoned")
            .as_ref()
            .map(|l| l.endpoint.clone())
    }

    /// Seconds since `start()`, for connection diagnostics.
    pub fn waiting_elapsed(&self) -> Duration {
        self.link
            .lock()
            .expect("link lock poisoned")
            .as_ref()
            .map(|l| l.connected_at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.state.read().heartbeat_age()
    }

    /// True while a vehicle heartbeat has been seen within the timeout
    /// window. Alerting on loss is the consumer's policy, not ours.
    pub fn is_healthy(&self) -> bool {
        self.state.read().is_healthy(self.config.heartbeat_timeout)
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // State and events
    // ------------------------------------------------------------------

    pub fn state(&self) -> SharedVehicleState {
        self.state.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot(self.config.heartbeat_timeout)
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn subscribe(&self, topic: EventTopic) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe(topic)
    }

    /// Drop the rolling history (user "clear profile"); current telemetry
    /// is untouched.
    pub fn clear_history(&self) {
        self.state.clear_history();
        self.bus.emit(Event::ClearData);
    }

    // ------------------------------------------------------------------
    // Runtime tuning (persisted by the configuration collaborator)
    // ------------------------------------------------------------------

    /// Swap the wind-regression coefficients without reconnecting.
    pub fn set_wind_coefficients(&self, ws_a: f64, ws_b: f64) {
        *self.wind.write().expect("wind estimator lock poisoned") =
            WindEstimator::new(ws_a, ws_b);
    }

    pub fn wind_coefficients(&self) -> (f64, f64) {
        let est = *self.wind.read().expect("wind estimator lock poisoned");
        (est.ws_a, est.ws_b)
    }

    /// Takes effect on the next stream request (at most 5 s away).
    pub fn set_stream_rate_hz(&self, rate: u16) {
        self.stream_rate_hz.store(rate, Ordering::Relaxed);
    }

    pub fn stream_rate_hz(&self) -> u16 {
        self.stream_rate_hz.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub async fn arm(&self) -> Result<(), ClientError> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    pub async fn disarm(&self) -> Result<(), ClientError> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Set flight mode by name, e.g. `"GUIDED"`, `"RTL"`, `"LAND"`.
    pub async fn set_mode(&self, mode: &str) -> Result<(), ClientError> {
        self.send_command(|reply| Command::SetMode {
            mode: mode.to_string(),
            reply,
        })
        .await
    }

    pub async fn takeoff(&self, altitude_m: f32) -> Result<(), ClientError> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude_m],
        )
        .await
    }

    pub async fn command_long(
        &self,
        command: MavCmd,
        params: [f32; 7],
    ) -> Result<(), ClientError> {
        self.send_command(|reply| Command::CommandLong {
            command,
            params,
            reply,
        })
        .await
    }

    pub async fn set_param(
        &self,
        name: &str,
        value: f32,
        kind: ParamKind,
    ) -> Result<(), ClientError> {
        self.send_command(|reply| Command::SetParam {
            name: name.to_string(),
            value,
            kind,
            reply,
        })
        .await
    }

    pub async fn request_all_params(&self) -> Result<(), ClientError> {
        self.send_command(|reply| Command::RequestAllParams { reply }).await
    }

    /// Override one RC channel (1-8). The vehicle-side mission script
    /// watches one of these for the AutoVP trigger.
    pub async fn set_rc_override(&self, channel: u8, pwm: u16) -> Result<(), ClientError> {
        self.send_command(|reply| Command::RcOverride { channel, pwm, reply })
            .await
    }

    /// Parameter sub-API.
    pub fn params(&self) -> ParamsHandle<'_> {
        ParamsHandle { client: self }
    }

    // ------------------------------------------------------------------
    // Multi-step workflows
    // ------------------------------------------------------------------

    /// Write the target altitude parameter, then pulse the trigger RC
    /// channel so the vehicle-side script generates and starts the
    /// profiling mission. Runs as an independent task; `on_done` is
    /// called exactly once with (success, message).
    pub fn trigger_autovp(
        &self,
        target_altitude_m: f64,
        on_done: impl FnOnce(bool, String) + Send + 'static,
    ) {
        let Some(cmd_tx) = self.current_cmd_tx() else {
            on_done(false, "AutoVP error: not connected".to_string());
            return;
        };
        let param = self.config.autovp_altitude_param.clone();
        let channel = self.config.autovp_channel;

        tokio::spawn(async move {
            let result: Result<(), ClientError> = async {
                info!("AutoVP: setting {param} = {target_altitude_m:.0}");
                send_via(&cmd_tx, |reply| Command::SetParam {
                    name: param,
                    value: target_altitude_m as f32,
                    kind: ParamKind::Real32,
                    reply,
                })
                .await?;
                // Let the parameter propagate before the RC trigger.
                tokio::time::sleep(Duration::from_millis(500)).await;

                // The link is lossy; a single override packet is not
                // reliable, so pulse at ~10 Hz for 1.5 s.
                info!("AutoVP: pulsing RC{channel} ({RC_PULSE_HIGH}) for 1.5 s");
                let pulse_until = Instant::now() + Duration::from_millis(1500);
                while Instant::now() < pulse_until {
                    send_via(&cmd_tx, |reply| Command::RcOverride {
                        channel,
                        pwm: RC_PULSE_HIGH,
                        reply,
                    })
                    .await?;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }

                info!("AutoVP: releasing RC{channel} ({RC_PULSE_RELEASE})");
                for _ in 0..5 {
                    send_via(&cmd_tx, |reply| Command::RcOverride {
                        channel,
                        pwm: RC_PULSE_RELEASE,
                        reply,
                    })
                    .await?;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(())
            }
            .await;

            match result {
                Ok(()) => {
                    info!("AutoVP: mission generation triggered");
                    on_done(true, format!("AutoVP triggered: {target_altitude_m:.0} m"));
                }
                Err(err) => {
                    warn!("AutoVP trigger failed: {err}");
                    on_done(false, format!("AutoVP error: {err}"));
                }
            }
        });
    }

    /// Arm and start the loaded Auto mission: LOITER, settle, arm,
    /// settle, AUTO. The fixed delays stand in for mode/arm
    /// acknowledgments; `on_done` is called exactly once.
    pub fn arm_and_takeoff_auto(&self, on_done: impl FnOnce(bool, String) + Send + 'static) {
        let Some(cmd_tx) = self.current_cmd_tx() else {
            on_done(false, "Arm & Takeoff error: not connected".to_string());
            return;
        };

        tokio::spawn(async move {
            let result: Result<(), ClientError> = async {
                send_via(&cmd_tx, |reply| Command::SetMode {
                    mode: "LOITER".to_string(),
                    reply,
                })
                .await?;
                tokio::time::sleep(Duration::from_secs(2)).await;
                send_via(&cmd_tx, |reply| Command::CommandLong {
                    command: MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    params: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    reply,
                })
                .await?;
                tokio::time::sleep(Duration::from_secs(3)).await;
                send_via(&cmd_tx, |reply| Command::SetMode {
                    mode: "AUTO".to_string(),
                    reply,
                })
                .await?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => on_done(true, "Armed: Auto mission started".to_string()),
                Err(err) => {
                    warn!("arm and takeoff sequence failed: {err}");
                    on_done(false, format!("Arm & Takeoff error: {err}"));
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn current_cmd_tx(&self) -> Option<mpsc::Sender<Command>> {
        self.link
            .lock()
            .expect("link lock poisoned")
            .as_ref()
            .map(|l| l.cmd_tx.clone())
    }

    pub(crate) async fn send_command<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> Command,
    ) -> Result<T, ClientError> {
        let cmd_tx = self.current_cmd_tx().ok_or(ClientError::NotConnected)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ClientError::Disconnected)?;
        reply_rx.await.map_err(|_| ClientError::Disconnected)?
    }
}

async fn send_via<T>(
    cmd_tx: &mpsc::Sender<Command>,
    make: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> Command,
) -> Result<T, ClientError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(make(reply_tx))
        .await
        .map_err(|_| ClientError::Disconnected)?;
    reply_rx.await.map_err(|_| ClientError::Disconnected)?
}

/// Handle to parameter operations on a [`MavClient`].
pub struct ParamsHandle<'a> {
    client: &'a MavClient,
}

impl ParamsHandle<'_> {
    /// Discard the previous session and request every parameter.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.client.request_all_params().await
    }

    /// Stage a write intention; nothing is transmitted until `commit`.
    pub fn stage(&self, name: &str, value: f32) {
        self.client
            .params
            .lock()
            .expect("param table lock poisoned")
            .stage(name, value);
    }

    /// Transmit a PARAM_SET for every staged edit. Confirmation arrives
    /// asynchronously as `ParamEvent::WriteConfirmed` / `WriteFailed`.
    pub async fn commit(&self) -> Result<usize, ClientError> {
        let staged = self
            .client
            .params
            .lock()
            .expect("param table lock poisoned")
            .staged();
        for (name, value, kind) in &staged {
            self.client.set_param(name, *value, *kind).await?;
        }
        Ok(staged.len())
    }

    pub fn progress(&self) -> ParamProgress {
        self.client
            .params
            .lock()
            .expect("param table lock poisoned")
            .progress()
    }

    pub fn get(&self, name: &str) -> Option<Param> {
        self.client
            .params
            .lock()
            .expect("param table lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn original(&self, name: &str) -> Option<f32> {
        self.client
            .params
            .lock()
            .expect("param table lock poisoned")
            .original(name)
    }

    pub fn pending_count(&self) -> usize {
        self.client
            .params
            .lock()
            .expect("param table lock poisoned")
            .pending_count()
    }
}
