//! Typed request API over the dispatcher.
//!
//! `Client::connect` performs the JOIN/WELCOME handshake on the bare
//! socket before the dispatcher's reader takes over, so the handshake
//! needs no expected-type machinery. Every control method passes a tight
//! expected set — `{ACK, ERROR}` for control requests, `{STATUS, ERROR}`
//! for status queries — per the type-matched response contract.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use meander_proto::{
    frame, CreateSim, GlobalMode, Message, MsgType, SimState, Status, Welcome,
};
use tracing::info;

use crate::assembler::SnapshotData;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;

/// Default per-request wait.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected control client.
pub struct Client {
    dispatcher: Dispatcher,
    welcome: Welcome,
    pid: u32,
    timeout: Duration,
}

impl Client {
    /// Connect to a server socket, JOIN, and start the dispatcher.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path.as_ref())?;
        let pid = std::process::id();
        frame::send_msg(&stream, &Message::Join { pid })?;
        let welcome = match frame::recv_msg(&stream)? {
            Message::Welcome(welcome) => welcome,
            other => {
                return Err(ClientError::UnexpectedReply {
                    got: other.msg_type(),
                })
            }
        };
        info!(pid, "joined server");
        let dispatcher = Dispatcher::start(stream)?;
        Ok(Self {
            dispatcher,
            welcome,
            pid,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// The WELCOME payload received at connect time.
    pub fn welcome(&self) -> &Welcome {
        &self.welcome
    }

    /// PID this client joined with.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Change the per-request timeout.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn control(&self, request: Message) -> Result<(), ClientError> {
        let reply = self.dispatcher.send_and_wait(
            &request,
            &[MsgType::Ack, MsgType::Error],
            Some(self.timeout),
        )?;
        match reply {
            Message::Ack { .. } => Ok(()),
            Message::Error { code, message } => Err(ClientError::Server { code, message }),
            other => Err(ClientError::UnexpectedReply {
                got: other.msg_type(),
            }),
        }
    }

    /// Reconfigure the simulation (owner only).
    pub fn create_sim(&self, req: CreateSim) -> Result<(), ClientError> {
        self.control(Message::CreateSim(req))
    }

    /// Start the configured batch (owner only).
    pub fn start_sim(&self) -> Result<(), ClientError> {
        self.control(Message::StartSim)
    }

    /// Request a cooperative stop (owner only).
    pub fn stop_sim(&self) -> Result<(), ClientError> {
        self.control(Message::StopSim { pid: self.pid })
    }

    /// Restart with a new replication count (owner only).
    pub fn restart_sim(&self, total_reps: u32) -> Result<(), ClientError> {
        self.control(Message::RestartSim { total_reps })
    }

    /// Ask the server to load a world file (owner only).
    pub fn load_world(&self, path: &str, multi_user: bool) -> Result<(), ClientError> {
        self.control(Message::LoadWorld {
            path: path.into(),
            multi_user,
        })
    }

    /// Ask the server to load a results file (owner only).
    pub fn load_results(&self, path: &str) -> Result<(), ClientError> {
        self.control(Message::LoadResults { path: path.into() })
    }

    /// Ask the server to save results (owner only).
    pub fn save_results(&self, path: &str) -> Result<(), ClientError> {
        self.control(Message::SaveResults { path: path.into() })
    }

    /// Request a snapshot stream; the data arrives asynchronously and is
    /// collected via [`Client::wait_for_snapshot`].
    pub fn request_snapshot(&self) -> Result<(), ClientError> {
        self.control(Message::RequestSnapshot { pid: self.pid })
    }

    /// Query the full status block. Open to any client.
    pub fn query_status(&self) -> Result<Status, ClientError> {
        let reply = self.dispatcher.send_and_wait(
            &Message::QueryStatus { pid: self.pid },
            &[MsgType::Status, MsgType::Error],
            Some(self.timeout),
        )?;
        match reply {
            Message::Status(status) => Ok(status),
            Message::Error { code, message } => Err(ClientError::Server { code, message }),
            other => Err(ClientError::UnexpectedReply {
                got: other.msg_type(),
            }),
        }
    }

    /// Request a global mode change. No direct reply; confirmation comes
    /// as a GLOBAL_MODE_CHANGED broadcast.
    pub fn set_global_mode(&self, mode: GlobalMode) -> Result<(), ClientError> {
        self.dispatcher.send(&Message::SetGlobalMode { mode })
    }

    /// Leave the session. With `stop_if_owner`, a running batch is also
    /// asked to stop when this client owns the session.
    pub fn quit(&self, stop_if_owner: bool) -> Result<(), ClientError> {
        self.control(Message::Quit {
            pid: self.pid,
            stop_if_owner,
        })
    }

    /// Wait for the next fully assembled snapshot.
    pub fn wait_for_snapshot(&self, timeout: Duration) -> Result<SnapshotData, ClientError> {
        self.dispatcher.wait_for_snapshot(timeout)
    }

    /// Poll status until the server reaches `state`.
    pub fn wait_until_state(
        &self,
        state: SimState,
        timeout: Duration,
    ) -> Result<Status, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.query_status()?;
            if status.sim_state == state {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}
