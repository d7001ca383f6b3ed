//! Protocol engine state machine, shared by client (initiator) and server (acceptor).
//!
//! No I/O here: the host reads and writes the wire, feeds what it read into the
//! session and sends back whatever the session hands it.
//!
//! ```text
//! Connected -> Authenticating -> Authenticated -> AwaitingCommand
//!     AwaitingCommand -> Uploading   (PUT_FILE) -> Completed | Failed
//!     AwaitingCommand -> Downloading (GET_FILE) -> Completed | Failed
//!     Uploading | Downloading -> AwaitingCommand (refused, stream still framed)
//!     Completed -> AwaitingCommand (acceptor keeps serving the connection)
//! ```

use crate::error::ProtocolError;
use crate::wire::{AuthHeader, Command, TransferHeader, MAX_FILENAME_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticating,
    Authenticated,
    AwaitingCommand,
    Uploading,
    Downloading,
    Completed,
    Failed,
}

/// Username/password pair a server enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Compare against what a peer sent, after the same truncation the wire applies.
    pub fn matches(&self, presented: &AuthHeader) -> bool {
        let expected = AuthHeader::request(&self.username, &self.password);
        expected.username == presented.username && expected.password == presented.password
    }
}

/// What the acceptor should do after reading a command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Read `filename_len` name bytes, then `filesize` file bytes.
    Upload { filesize: u32, filename_len: u16 },
    /// Read `filename_len` name bytes, then send the file.
    Download { filename_len: u16 },
    /// Unknown or misplaced command: answer `Nak` and keep waiting.
    Reject(Command),
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    fn require(&self, allowed: &[SessionState], event: &'static str) -> Result<(), ProtocolError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidTransition {
                from: self.state,
                event,
            })
        }
    }

    /// Initiator: build the auth request to send first.
    pub fn auth_request(&mut self, username: &str, password: &str) -> Result<AuthHeader, ProtocolError> {
        self.require(&[SessionState::Connected], "auth_request")?;
        self.state = SessionState::Authenticating;
        Ok(AuthHeader::request(username, password))
    }

    /// Initiator: apply the acceptor's verdict. A rejection is terminal.
    pub fn on_auth_response(&mut self, response: &AuthHeader) -> Result<bool, ProtocolError> {
        self.require(&[SessionState::Authenticating], "auth_response")?;
        if response.accepted() {
            self.state = SessionState::Authenticated;
            Ok(true)
        } else {
            self.state = SessionState::Failed;
            Ok(false)
        }
    }

    /// Acceptor: check presented credentials. `None` policy means anonymous access.
    /// Returns the response to send back.
    pub fn authenticate(
        &mut self,
        policy: Option<&Credentials>,
        presented: &AuthHeader,
    ) -> Result<AuthHeader, ProtocolError> {
        self.require(&[SessionState::Connected], "authenticate")?;
        self.state = SessionState::Authenticating;
        let ok = policy.map_or(true, |c| c.matches(presented));
        self.state = if ok {
            SessionState::Authenticated
        } else {
            SessionState::Failed
        };
        Ok(AuthHeader::response(ok))
    }

    /// Ready for the next command header.
    pub fn await_command(&mut self) -> Result<(), ProtocolError> {
        self.require(
            &[
                SessionState::Authenticated,
                SessionState::AwaitingCommand,
                SessionState::Completed,
            ],
            "await_command",
        )?;
        self.state = SessionState::AwaitingCommand;
        Ok(())
    }

    /// Acceptor: classify an incoming command header.
    pub fn dispatch(&mut self, header: &TransferHeader) -> Result<Dispatch, ProtocolError> {
        self.require(&[SessionState::AwaitingCommand], "dispatch")?;
        let dispatch = match header.command {
            Command::PutFile => {
                check_filename_len(header.filename_len).inspect_err(|_| self.fail())?;
                self.state = SessionState::Uploading;
                Dispatch::Upload {
                    filesize: header.filesize,
                    filename_len: header.filename_len,
                }
            }
            Command::GetFile => {
                check_filename_len(header.filename_len).inspect_err(|_| self.fail())?;
                self.state = SessionState::Downloading;
                Dispatch::Download {
                    filename_len: header.filename_len,
                }
            }
            other => Dispatch::Reject(other),
        };
        Ok(dispatch)
    }

    /// Initiator: build the command header for a put or get.
    pub fn request(
        &mut self,
        command: Command,
        filesize: u32,
        filename: &str,
    ) -> Result<TransferHeader, ProtocolError> {
        self.require(&[SessionState::Authenticated, SessionState::AwaitingCommand], "request")?;
        check_filename_len(filename.len()).inspect_err(|_| self.fail())?;
        self.state = match command {
            Command::PutFile => SessionState::Uploading,
            Command::GetFile => SessionState::Downloading,
            other => return Err(ProtocolError::UnexpectedCommand(other)),
        };
        Ok(TransferHeader::new(command, filesize, filename.len() as u16))
    }

    /// Transfer finished and acknowledged.
    pub fn complete(&mut self) -> Result<(), ProtocolError> {
        self.require(
            &[SessionState::Uploading, SessionState::Downloading],
            "complete",
        )?;
        self.state = SessionState::Completed;
        Ok(())
    }

    /// Transfer refused before the exchange finished (bad name, missing file).
    /// The stream is still framed, so the session goes back to awaiting commands.
    pub fn refuse(&mut self) -> Result<(), ProtocolError> {
        self.require(
            &[SessionState::Uploading, SessionState::Downloading],
            "refuse",
        )?;
        self.state = SessionState::AwaitingCommand;
        Ok(())
    }

    /// Terminal failure. Allowed from any state.
    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn check_filename_len(len: impl Into<usize>) -> Result<(), ProtocolError> {
    let len = len.into();
    if len == 0 || len > MAX_FILENAME_LEN {
        return Err(ProtocolError::FilenameLength(len));
    }
    Ok(())
}
