//! Per-connection actor. Messages from one connection are handled strictly in
//! order; video forwarding runs beside it as a separate task so drive
//! commands never wait on frames.

pub mod forward;
pub mod outbound;
pub mod registry;

use std::{net::SocketAddr, sync::Arc};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    core::errors::{ProtocolError, SendError},
    protocol::{ClientMessage, CommandStatus, MovementRequest, ServerMessage},
    robot::{DriveCommand, Power},
};
use forward::forward_frames;
use outbound::Outbound;
use registry::SessionId;

struct VideoTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Session {
    id: SessionId,
    state: Arc<AppState>,
    outbound: Outbound,
    power: Power,
    video: Option<VideoTask>,
}

impl Session {
    /// Registers the connection and greets the client.
    pub async fn open(state: Arc<AppState>, outbound: Outbound, peer: Option<SocketAddr>) -> Self {
        let id = state.registry.allocate_id();
        let live = state.registry.register(id, peer).await;
        info!(session_id = %id, peer = ?peer, sessions = live, "session opened");

        if let Err(err) = outbound.send(ServerMessage::connected()) {
            debug!(session_id = %id, "greeting not delivered: {err}");
        }

        Self {
            id,
            state,
            outbound,
            power: Power::default(),
            video: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn video_active(&self) -> bool {
        self.video.is_some()
    }

    /// Last level set through `power_update`.
    #[cfg(test)]
    pub fn power(&self) -> Power {
        self.power
    }

    /// Handles one text frame. Fails only when the connection can no longer
    /// be written to.
    pub async fn on_text(&mut self, text: &str) -> Result<(), SendError> {
        self.reap_video().await;
        match ClientMessage::parse(text) {
            Ok(message) => self.on_message(message).await,
            Err(err) => self.on_protocol_error(err),
        }
    }

    pub fn on_protocol_error(&self, err: ProtocolError) -> Result<(), SendError> {
        warn!(session_id = %self.id, "rejected message: {err}");
        let request = match &err {
            ProtocolError::InvalidPayload { kind, .. } => Some(*kind),
            _ => None,
        };
        self.outbound.send(ServerMessage::error(err.to_string(), request))
    }

    pub async fn on_message(&mut self, message: ClientMessage) -> Result<(), SendError> {
        debug!(
            session_id = %self.id,
            kind = message.kind(),
            streaming = self.video_active(),
            "message received"
        );
        match message {
            ClientMessage::MovementCommand(request) => self.on_movement(&request),
            ClientMessage::PowerUpdate { power } => {
                self.on_power_update(power);
                Ok(())
            }
            ClientMessage::StartVideo => self.start_video().await,
            ClientMessage::StopVideo => {
                self.stop_video().await;
                Ok(())
            }
        }
    }

    fn on_movement(&self, request: &MovementRequest) -> Result<(), SendError> {
        let robot = &self.state.robot;
        let response = match (request.drive(), request.power) {
            // Stop ignores power.
            (Some(DriveCommand::Stop), _) => {
                let state = robot.execute(DriveCommand::Stop, Power::ZERO);
                info!(session_id = %self.id, command = "stop", "movement executed");
                ServerMessage::command_response(CommandStatus::Executed, request, state)
            }
            (Some(command), Some(power)) => {
                let state = robot.execute(command, power);
                info!(session_id = %self.id, command = command.as_str(), %power, "movement executed");
                ServerMessage::command_response(CommandStatus::Executed, request, state)
            }
            _ => {
                warn!(session_id = %self.id, command = %request.command, "movement ignored");
                ServerMessage::command_response(CommandStatus::Ignored, request, robot.get_state())
            }
        };
        self.outbound.send(response)
    }

    fn on_power_update(&mut self, power: Power) {
        let previous = std::mem::replace(&mut self.power, power);
        if self.state.robot.set_power(power) {
            info!(session_id = %self.id, %previous, %power, "power applied to moving motors");
        } else {
            info!(session_id = %self.id, %previous, %power, "power level updated");
        }
    }

    async fn start_video(&mut self) -> Result<(), SendError> {
        if self.video.is_some() {
            debug!(session_id = %self.id, "video already streaming");
            return Ok(());
        }

        let frames = match self.state.stream.acquire(self.id).await {
            Ok(frames) => frames,
            Err(err) => {
                warn!(session_id = %self.id, "start_video failed: {err}");
                return self
                    .outbound
                    .send(ServerMessage::error(err.to_string(), Some("start_video")));
            }
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(forward_frames(
            self.id,
            frames,
            self.outbound.clone(),
            self.state.fps.clone(),
            cancel.clone(),
        ));
        self.video = Some(VideoTask { cancel, handle });
        self.state.registry.set_video_active(self.id, true).await;
        info!(session_id = %self.id, "video started");
        Ok(())
    }

    async fn stop_video(&mut self) {
        let Some(task) = self.video.take() else {
            return;
        };

        task.cancel.cancel();
        if let Err(err) = task.handle.await {
            warn!(session_id = %self.id, "forwarding task ended abnormally: {err}");
        }
        self.state.stream.release(self.id).await;
        self.state.registry.set_video_active(self.id, false).await;
        info!(session_id = %self.id, "video stopped");
    }

    /// A forwarding task that exited on a send failure still holds a viewer
    /// slot; give it back before handling the next message.
    async fn reap_video(&mut self) {
        if self
            .video
            .as_ref()
            .is_some_and(|task| task.handle.is_finished())
        {
            debug!(session_id = %self.id, "forwarding task exited on its own");
            self.stop_video().await;
        }
    }

    /// Tears the session down: stops its video, leaves the registry, and
    /// stops the robot if nobody else is connected.
    pub async fn close(mut self) {
        self.stop_video().await;
        let remaining = self.state.registry.deregister(self.id).await;
        info!(session_id = %self.id, sessions = remaining.unwrap_or(0), "session closed");

        if remaining == Some(0) && self.state.robot.is_moving() {
            self.state.robot.stop();
            info!("no sessions left, robot stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::{
        Session,
        outbound::{OutboundLanes, outbound_channel},
    };
    use crate::{
        app_state::AppState,
        camera::testing::{CameraProbe, FakeCamera},
        core::state::SourceState,
        protocol::{CommandStatus, ServerMessage},
        robot::{Power, motor::Direction},
    };

    const START: &str = r#"{"type":"start_video","data":{}}"#;
    const STOP: &str = r#"{"type":"stop_video","data":{}}"#;

    fn app() -> (Arc<AppState>, CameraProbe) {
        let (camera, probe) = FakeCamera::new();
        (AppState::for_tests(camera), probe)
    }

    async fn connect(state: &Arc<AppState>) -> (Session, OutboundLanes) {
        let (outbound, mut lanes) = outbound_channel();
        let session = Session::open(state.clone(), outbound, None).await;
        assert_eq!(lanes.recv().await, Some(ServerMessage::connected()));
        (session, lanes)
    }

    async fn next_message(lanes: &mut OutboundLanes) -> ServerMessage {
        timeout(Duration::from_secs(2), lanes.recv())
            .await
            .expect("message within timeout")
            .expect("lanes open")
    }

    #[tokio::test]
    async fn forward_command_drives_both_motors() {
        let (state, _probe) = app();
        let (mut session, mut lanes) = connect(&state).await;

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"forward","power":60}}"#)
            .await
            .expect("send");

        let ServerMessage::CommandResponse(response) = next_message(&mut lanes).await else {
            panic!("expected command_response");
        };
        assert_eq!(response.status, CommandStatus::Executed);
        assert_eq!(response.power, Some(Power::new(60)));
        for motor in [&response.state.left_motor, &response.state.right_motor] {
            assert_eq!(motor.state, Direction::Forward);
            assert_eq!(motor.power, Power::new(60));
        }
        session.close().await;
    }

    #[tokio::test]
    async fn stop_runs_even_with_non_numeric_power() {
        let (state, _probe) = app();
        let (mut session, mut lanes) = connect(&state).await;

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"forward","power":80}}"#)
            .await
            .expect("send");
        next_message(&mut lanes).await;
        assert!(state.robot.is_moving());

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"stop","power":"x"}}"#)
            .await
            .expect("send");
        let ServerMessage::CommandResponse(response) = next_message(&mut lanes).await else {
            panic!("expected command_response");
        };
        assert_eq!(response.status, CommandStatus::Executed);
        assert_eq!(response.power, None);
        assert!(!state.robot.is_moving());

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"forward","power":"x"}}"#)
            .await
            .expect("send");
        let ServerMessage::CommandResponse(response) = next_message(&mut lanes).await else {
            panic!("expected command_response");
        };
        assert_eq!(response.status, CommandStatus::Ignored);
        assert!(!state.robot.is_moving());
        session.close().await;
    }

    #[tokio::test]
    async fn unknown_command_is_ignored_without_moving() {
        let (state, _probe) = app();
        let (mut session, mut lanes) = connect(&state).await;

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"jump"}}"#)
            .await
            .expect("send");

        let ServerMessage::CommandResponse(response) = next_message(&mut lanes).await else {
            panic!("expected command_response");
        };
        assert_eq!(response.status, CommandStatus::Ignored);
        assert_eq!(response.command, "jump");
        assert!(!state.robot.is_moving());
        session.close().await;
    }

    #[tokio::test]
    async fn power_update_reapplies_duty_only_while_moving() {
        let (state, _probe) = app();
        let (mut session, mut lanes) = connect(&state).await;

        session
            .on_text(r#"{"type":"power_update","data":{"power":30}}"#)
            .await
            .expect("send");
        assert_eq!(session.power(), Power::new(30));
        assert!(!state.robot.is_moving());

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"left","power":90}}"#)
            .await
            .expect("send");
        next_message(&mut lanes).await;
        session
            .on_text(r#"{"type":"power_update","data":{"power":45}}"#)
            .await
            .expect("send");

        let robot = state.robot.get_state();
        assert_eq!(robot.left_motor.state, Direction::Backward);
        assert_eq!(robot.left_motor.power, Power::new(45));
        assert_eq!(robot.right_motor.power, Power::new(45));
        session.close().await;
    }

    #[tokio::test]
    async fn protocol_errors_are_reported_and_connection_survives() {
        let (state, _probe) = app();
        let (mut session, mut lanes) = connect(&state).await;

        session.on_text("{oops").await.expect("send");
        assert!(matches!(
            next_message(&mut lanes).await,
            ServerMessage::Error { request: None, .. }
        ));

        session
            .on_text(r#"{"type":"teleport","data":{}}"#)
            .await
            .expect("send");
        let ServerMessage::Error { message, .. } = next_message(&mut lanes).await else {
            panic!("expected error");
        };
        assert!(message.contains("teleport"));

        session
            .on_text(r#"{"type":"movement_command","data":{"command":"stop"}}"#)
            .await
            .expect("still usable");
        assert!(matches!(
            next_message(&mut lanes).await,
            ServerMessage::CommandResponse(_)
        ));
        session.close().await;
    }

    #[tokio::test]
    async fn frames_reach_the_streaming_session() {
        let (state, _probe) = app();
        let (mut session, mut lanes) = connect(&state).await;

        session.on_text(START).await.expect("send");
        assert!(session.video_active());

        let ServerMessage::VideoFrame(frame) = next_message(&mut lanes).await else {
            panic!("expected video_frame");
        };
        assert!(!frame.frame.is_empty());
        assert!(frame.timestamp > 0.0);
        session.close().await;
    }

    #[tokio::test]
    async fn commands_are_answered_while_video_is_slow() {
        let (state, probe) = app();
        let (mut session, mut lanes) = connect(&state).await;
        session.on_text(START).await.expect("send");
        probe.set_read_delay(Duration::from_millis(300));

        timeout(
            Duration::from_millis(100),
            session.on_text(
                r#"{"type":"movement_command","data":{"command":"right","power":70}}"#,
            ),
        )
        .await
        .expect("dispatch must not wait on the camera")
        .expect("send");

        let reply = timeout(Duration::from_millis(100), async {
            loop {
                if let Some(ServerMessage::CommandResponse(response)) = lanes.recv().await {
                    return response;
                }
            }
        })
        .await
        .expect("command response must not queue behind frames");
        assert_eq!(reply.status, CommandStatus::Executed);

        probe.set_read_delay(Duration::ZERO);
        session.close().await;
    }

    #[tokio::test]
    async fn start_twice_and_stop_while_idle_are_noops() {
        let (state, probe) = app();
        let (mut session, _lanes) = connect(&state).await;

        session.on_text(STOP).await.expect("send");
        assert!(!session.video_active());
        assert_eq!(probe.releases(), 0);

        session.on_text(START).await.expect("send");
        session.on_text(START).await.expect("send");
        assert_eq!(probe.opens(), 1);
        assert_eq!(state.stream.viewer_count().await, 1);

        session.on_text(STOP).await.expect("send");
        session.on_text(STOP).await.expect("send");
        assert_eq!(probe.releases(), 1);
        assert_eq!(state.stream.viewer_count().await, 0);
        session.close().await;
    }

    #[tokio::test]
    async fn closing_a_streaming_session_releases_once() {
        let (state, probe) = app();
        let (mut session, _lanes) = connect(&state).await;
        session.on_text(START).await.expect("send");

        session.close().await;
        assert_eq!(probe.releases(), 1);
        assert_eq!(state.stream.viewer_count().await, 0);
        assert_eq!(state.registry.len().await, 0);
        assert_eq!(state.stream.source().state(), SourceState::Idle);
    }

    #[tokio::test]
    async fn dead_writer_still_releases_once_on_close() {
        let (state, probe) = app();
        let (mut session, lanes) = connect(&state).await;
        session.on_text(START).await.expect("send");

        drop(lanes);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.on_text(STOP).await.is_ok());
        session.close().await;

        assert_eq!(probe.releases(), 1);
        assert_eq!(state.stream.viewer_count().await, 0);
    }

    #[tokio::test]
    async fn failed_camera_init_reports_error_not_frames() {
        let (state, probe) = app();
        probe.fail_next_opens(1);
        let (mut session, mut lanes) = connect(&state).await;

        session.on_text(START).await.expect("send");
        assert!(!session.video_active());
        assert_eq!(
            next_message(&mut lanes).await,
            ServerMessage::Error {
                message: "camera unavailable: no camera attached".to_string(),
                request: Some("start_video"),
            }
        );
        assert!(lanes.try_recv_video().is_none());
        assert_eq!(state.stream.viewer_count().await, 0);

        session.on_text(START).await.expect("retry");
        assert!(session.video_active());
        session.close().await;
    }

    #[tokio::test]
    async fn camera_outlives_the_first_of_two_viewers() {
        let (state, probe) = app();
        let (mut a, _lanes_a) = connect(&state).await;
        let (mut b, _lanes_b) = connect(&state).await;
        a.on_text(START).await.expect("send");
        b.on_text(START).await.expect("send");

        a.close().await;
        assert_eq!(probe.releases(), 0);
        assert!(state.stream.source().state().is_active());

        b.close().await;
        assert_eq!(probe.opens(), 1);
        assert_eq!(probe.releases(), 1);
        assert_eq!(state.stream.source().state(), SourceState::Idle);
    }

    #[tokio::test]
    async fn last_session_out_stops_the_robot() {
        let (state, _probe) = app();
        let (mut driver, mut lanes) = connect(&state).await;
        let (watcher, _watcher_lanes) = connect(&state).await;

        driver
            .on_text(r#"{"type":"movement_command","data":{"command":"backward"}}"#)
            .await
            .expect("send");
        next_message(&mut lanes).await;

        driver.close().await;
        assert!(state.robot.is_moving());
        watcher.close().await;
        assert!(!state.robot.is_moving());
    }
}
