use crate::error::ClientError;
use crate::params::ParamKind;
use mavlink::common::MavCmd;
use tokio::sync::oneshot;

/// Mailbox messages from the public API into the IO loop, which owns the
/// transport's transmit path.
pub(crate) enum Command {
    CommandLong {
        command: MavCmd,
        params: [f32; 7],
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    SetMode {
        mode: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    SetParam {
        name: String,
        value: f32,
        kind: ParamKind,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    RequestAllParams {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    RcOverride {
        channel: u8,
        pwm: u16,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}
